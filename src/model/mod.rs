//! Core data models shared by the library, player and liked-songs store.
//!
//! A [`Track`] is produced once by a metadata provider and never mutated
//! afterwards; the player only ever replaces it wholesale (for example to
//! attach cover art once it has been loaded).

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Stable, unique identifier of a track in the library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackId(pub i64);

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque locator of a track's audio data.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceRef(PathBuf);

impl SourceRef {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    pub fn path(&self) -> &Path {
        &self.0
    }
}

impl From<PathBuf> for SourceRef {
    fn from(path: PathBuf) -> Self {
        Self(path)
    }
}

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// Encoded cover image, ready to hand to whatever renders it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverImage {
    /// Raw image data (JPEG, PNG, ...)
    pub data: Vec<u8>,
    /// MIME type sniffed from the data
    pub mime_type: String,
}

impl CoverImage {
    /// Wrap encoded image bytes, sniffing the MIME type from the content.
    ///
    /// `hint` is used when the bytes are not a format the sniffer knows.
    pub fn new(data: Vec<u8>, hint: Option<&str>) -> Self {
        let mime_type = image::guess_format(&data)
            .map(|format| format.to_mime_type().to_string())
            .ok()
            .or_else(|| hint.map(str::to_string))
            .unwrap_or_else(|| "application/octet-stream".to_string());
        Self { data, mime_type }
    }
}

/// A playable track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Track {
    pub id: TrackId,
    pub source: SourceRef,
    pub title: String,
    pub artist: String,
    /// Duration in milliseconds
    pub duration_ms: u64,
    /// Cover art, shared between state snapshots
    pub cover: Option<Arc<CoverImage>>,
}

impl Track {
    pub fn new(
        id: TrackId,
        source: SourceRef,
        title: impl Into<String>,
        artist: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        Self {
            id,
            source,
            title: title.into(),
            artist: artist.into(),
            duration_ms,
            cover: None,
        }
    }

    /// Return a copy of this track with the given cover attached.
    pub fn with_cover(self, cover: Option<CoverImage>) -> Self {
        Self {
            cover: cover.map(Arc::new),
            ..self
        }
    }

    /// Clamp a requested position into `[0, duration_ms]`.
    pub fn clamp_position(&self, position_ms: i64) -> u64 {
        u64::try_from(position_ms)
            .unwrap_or(0)
            .min(self.duration_ms)
    }
}
