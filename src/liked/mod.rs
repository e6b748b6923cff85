//! Liked songs, persisted as a small JSON file.
//!
//! The in-memory set is updated optimistically before the write. If the
//! write fails the error is reported, but the in-memory set keeps the new
//! membership: the last local intent wins and the file catches up on the
//! next successful write.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tokio::sync::{Mutex, watch};

use crate::model::TrackId;

/// Set of liked track ids.
pub type LikedSet = BTreeSet<TrackId>;

/// Liked store errors.
#[derive(Debug, thiserror::Error)]
pub enum LikedStoreError {
    #[error("Could not determine data directory")]
    NoDataDir,

    #[error("Failed to write liked songs to {0}: {1}")]
    Write(PathBuf, std::io::Error),

    #[error("Failed to serialize liked songs: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Task join error: {0}")]
    TaskJoin(String),
}

/// Persisted liked-songs capability.
#[async_trait]
pub trait LikedStore: Send + Sync {
    /// Flip membership of `id`. Returns whether the track is now liked.
    async fn toggle(&self, id: TrackId) -> Result<bool, LikedStoreError>;

    /// Live view of the liked set, pushed on every change.
    fn observe_liked(&self) -> watch::Receiver<LikedSet>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LikedFile {
    liked: Vec<TrackId>,
    #[serde(default)]
    updated_at: Option<String>,
}

/// [`LikedStore`] backed by a JSON file.
pub struct JsonLikedStore {
    path: PathBuf,
    liked: watch::Sender<LikedSet>,
    write_lock: Mutex<()>,
}

impl JsonLikedStore {
    /// Open the store at `path`. A missing or unreadable file starts empty.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let initial = read_liked(&path);
        tracing::info!(path = %path.display(), count = initial.len(), "Loaded liked songs");
        Self {
            path,
            liked: watch::Sender::new(initial),
            write_lock: Mutex::new(()),
        }
    }

    /// `<data dir>/headphone-player/liked.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::data_dir().map(|d| d.join("headphone-player").join("liked.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn snapshot(&self) -> LikedSet {
        self.liked.borrow().clone()
    }
}

#[async_trait]
impl LikedStore for JsonLikedStore {
    async fn toggle(&self, id: TrackId) -> Result<bool, LikedStoreError> {
        // Serialize writers so files land in the order toggles were applied.
        let _guard = self.write_lock.lock().await;

        let mut now_liked = false;
        self.liked.send_modify(|set| {
            now_liked = !set.remove(&id);
            if now_liked {
                set.insert(id);
            }
        });
        let snapshot = self.snapshot();

        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_liked(&path, &snapshot))
            .await
            .map_err(|e| LikedStoreError::TaskJoin(e.to_string()))??;

        tracing::debug!(track_id = %id, liked = now_liked, "Toggled liked song");
        Ok(now_liked)
    }

    fn observe_liked(&self) -> watch::Receiver<LikedSet> {
        self.liked.subscribe()
    }
}

fn read_liked(path: &Path) -> LikedSet {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return LikedSet::new(),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Failed to read liked songs");
            return LikedSet::new();
        }
    };

    match serde_json::from_str::<LikedFile>(&contents) {
        Ok(file) => file.liked.into_iter().collect(),
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "Corrupt liked songs file, starting empty"
            );
            LikedSet::new()
        }
    }
}

/// Write atomically (write to temp, then rename).
fn write_liked(path: &Path, liked: &LikedSet) -> Result<(), LikedStoreError> {
    let file = LikedFile {
        liked: liked.iter().copied().collect(),
        updated_at: Some(chrono::Utc::now().to_rfc3339()),
    };
    let contents = serde_json::to_string_pretty(&file)?;

    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| LikedStoreError::Write(dir.to_path_buf(), e))?;
    }
    let temp_path = path.with_extension("json.tmp");
    std::fs::write(&temp_path, contents).map_err(|e| LikedStoreError::Write(temp_path.clone(), e))?;
    std::fs::rename(&temp_path, path).map_err(|e| LikedStoreError::Write(path.to_path_buf(), e))?;
    Ok(())
}
