//! Application-wide error types.
//!
//! Library modules use their own `thiserror` enums ([`PlayerError`],
//! [`LikedStoreError`], ...). This module aggregates them for the CLI
//! commands, while `main` itself uses `anyhow`.
//!
//! # Example
//!
//! ```ignore
//! use headphone_player::error::{Result, ResultExt};
//!
//! async fn like(store: &JsonLikedStore, id: TrackId) -> Result<bool> {
//!     store.toggle(id).await.with_context("while saving liked songs")
//! }
//! ```

use std::path::PathBuf;

use crate::config::ConfigError;
use crate::liked::LikedStoreError;
use crate::metadata::MetadataError;
use crate::player::PlayerError;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level application error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Playback error: {0}")]
    Player(#[from] PlayerError),

    #[error("Library error: {0}")]
    Metadata(#[from] MetadataError),

    #[error("Liked songs error: {0}")]
    Liked(#[from] LikedStoreError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("File not found: {0}")]
    NotFound(PathBuf),

    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    pub fn not_found(path: impl Into<PathBuf>) -> Self {
        Self::NotFound(path.into())
    }

    /// Add context to an error.
    pub fn context(self, ctx: impl Into<String>) -> Self {
        Self::WithContext {
            context: ctx.into(),
            source: Box::new(self),
        }
    }
}

/// Extension trait for adding context to Results.
pub trait ResultExt<T> {
    fn with_context(self, ctx: impl Into<String>) -> Result<T>;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: Into<Error>,
{
    fn with_context(self, ctx: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().context(ctx))
    }
}
