//! Audio file discovery.

use futures::stream::Stream;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use walkdir::WalkDir;

/// Check if a path has a supported audio extension (case-insensitive).
pub fn is_audio_file(path: &Path) -> bool {
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_lowercase());
    matches!(ext.as_deref(), Some("mp3" | "flac" | "ogg" | "m4a" | "wav"))
}

/// Walk every root recursively and stream the audio files found.
///
/// Hidden directories are skipped. Traversal runs on a blocking worker and
/// stops early if the stream is dropped.
pub fn scan(roots: Vec<PathBuf>) -> impl Stream<Item = PathBuf> {
    let (tx, rx) = mpsc::channel(100);

    tokio::task::spawn_blocking(move || {
        for root in roots {
            let entries = WalkDir::new(&root)
                .follow_links(true)
                .into_iter()
                .filter_entry(|e| e.depth() == 0 || !is_hidden(e.path()));

            for entry in entries {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        tracing::warn!(
                            root = %root.display(),
                            error = %e,
                            "Skipping unreadable entry"
                        );
                        continue;
                    }
                };
                if entry.file_type().is_file()
                    && is_audio_file(entry.path())
                    && tx.blocking_send(entry.into_path()).is_err()
                {
                    return;
                }
            }
        }
    });

    futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|path| (path, rx))
    })
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.'))
}
