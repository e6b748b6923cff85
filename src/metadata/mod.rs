//! Track enumeration and metadata extraction.
//!
//! [`MetadataProvider`] is the capability the player consumes. The
//! production implementation, [`LibraryProvider`], walks the configured
//! library folders and reads tags with lofty.

use async_trait::async_trait;
use futures::StreamExt;
use lofty::file::{AudioFile, TaggedFileExt};
use lofty::probe::Probe;
use lofty::tag::Accessor;
use std::path::{Path, PathBuf};

use crate::cover;
use crate::model::{CoverImage, SourceRef, Track, TrackId};
use crate::scanner;

/// Metadata errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MetadataError {
    #[error("Failed to read tags from {path}: {message}")]
    Tags { path: PathBuf, message: String },

    #[error("Library task failed: {0}")]
    TaskJoin(String),
}

impl MetadataError {
    fn tags(path: &Path, message: impl ToString) -> Self {
        Self::Tags {
            path: path.to_path_buf(),
            message: message.to_string(),
        }
    }
}

/// Source of tracks and their cover art. Both calls may be slow.
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    async fn list_tracks(&self) -> Result<Vec<Track>, MetadataError>;

    async fn load_cover(&self, source: &SourceRef) -> Option<CoverImage>;
}

/// Tracks found under a set of library folders.
#[derive(Debug, Clone, Default)]
pub struct LibraryProvider {
    roots: Vec<PathBuf>,
}

impl LibraryProvider {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self { roots }
    }
}

#[async_trait]
impl MetadataProvider for LibraryProvider {
    /// Ids are assigned 1-based in sorted path order so they stay stable
    /// across runs as long as the library doesn't change.
    async fn list_tracks(&self) -> Result<Vec<Track>, MetadataError> {
        let mut paths: Vec<PathBuf> = scanner::scan(self.roots.clone()).collect().await;
        paths.sort();
        paths.dedup();

        tokio::task::spawn_blocking(move || {
            paths
                .iter()
                .enumerate()
                .filter_map(|(index, path)| {
                    let id = TrackId(index as i64 + 1);
                    match read_track(id, path) {
                        Ok(track) => Some(track),
                        Err(e) => {
                            tracing::warn!(error = %e, "Skipping unreadable track");
                            None
                        }
                    }
                })
                .collect()
        })
        .await
        .map_err(|e| MetadataError::TaskJoin(e.to_string()))
    }

    async fn load_cover(&self, source: &SourceRef) -> Option<CoverImage> {
        let path = source.path().to_path_buf();
        tokio::task::spawn_blocking(move || cover::extract_embedded_cover(&path))
            .await
            .ok()
            .flatten()
    }
}

/// Read a single file into a [`Track`].
pub fn read_track(id: TrackId, path: &Path) -> Result<Track, MetadataError> {
    let tagged_file = Probe::open(path)
        .map_err(|e| MetadataError::tags(path, e))?
        .read()
        .map_err(|e| MetadataError::tags(path, e))?;

    let tag = tagged_file
        .primary_tag()
        .or_else(|| tagged_file.first_tag());

    let title = tag
        .and_then(|t| t.title().map(|s| s.to_string()))
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| file_stem(path));

    let artist = display_artist(tag.and_then(|t| t.artist()).as_deref());

    let duration_ms =
        u64::try_from(tagged_file.properties().duration().as_millis()).unwrap_or(u64::MAX);

    Ok(Track::new(
        id,
        SourceRef::new(path),
        title,
        artist,
        duration_ms,
    ))
}

/// Normalize an artist tag for display.
pub fn display_artist(raw: Option<&str>) -> String {
    match raw.map(str::trim) {
        Some(artist) if !artist.is_empty() && !artist.contains("<unknown>") => artist.to_string(),
        _ => "Unknown artist".to_string(),
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "Unknown".to_string())
}
