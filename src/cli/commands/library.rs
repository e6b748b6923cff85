//! Library listing and liked songs commands.

use std::path::{Path, PathBuf};
use tokio::runtime::Runtime;

use super::library_roots;
use crate::config::Config;
use crate::error::{Result, ResultExt};
use crate::liked::{JsonLikedStore, LikedSet, LikedStore, LikedStoreError};
use crate::metadata::{LibraryProvider, MetadataProvider};
use crate::model::{Track, TrackId};
use crate::player::format_position;

fn open_liked(config: &Config) -> Result<JsonLikedStore> {
    let path = config.liked_path().ok_or(LikedStoreError::NoDataDir)?;
    Ok(JsonLikedStore::open(path))
}

fn print_track(track: &Track, liked: bool) {
    println!(
        "{:>4} {} {:>8}  {} - {}",
        track.id.0,
        if liked { "♥" } else { " " },
        format_position(track.duration_ms),
        track.artist,
        track.title
    );
}

async fn library_tracks(roots: Vec<PathBuf>) -> Result<Vec<Track>> {
    if roots.is_empty() {
        return Ok(Vec::new());
    }
    LibraryProvider::new(roots)
        .list_tracks()
        .await
        .with_context("while listing the library")
}

/// List tracks, marking liked ones.
pub fn cmd_list(rt: &Runtime, config: &Config, path: Option<&Path>) -> Result<()> {
    let roots = library_roots(config, path);
    if roots.is_empty() {
        eprintln!(
            "No library folders configured. Pass a folder or add [library] paths to the config."
        );
        return Ok(());
    }

    let tracks = rt.block_on(library_tracks(roots))?;
    let liked = open_liked(config)?.snapshot();

    for track in &tracks {
        print_track(track, liked.contains(&track.id));
    }
    println!("{} tracks", tracks.len());
    Ok(())
}

/// Toggle a liked track.
pub fn cmd_like(rt: &Runtime, config: &Config, id: i64) -> Result<()> {
    let store = open_liked(config)?;
    let liked = rt
        .block_on(store.toggle(TrackId(id)))
        .with_context(format!("while saving {}", store.path().display()))?;
    println!("Track {} {}", id, if liked { "liked" } else { "unliked" });
    Ok(())
}

/// Show liked tracks, resolved against the configured library when possible.
pub fn cmd_liked(rt: &Runtime, config: &Config) -> Result<()> {
    let liked: LikedSet = open_liked(config)?.snapshot();
    if liked.is_empty() {
        println!("No liked tracks yet.");
        return Ok(());
    }

    let tracks = rt.block_on(library_tracks(config.library.paths.clone()))?;
    for id in &liked {
        match tracks.iter().find(|t| t.id == *id) {
            Some(track) => print_track(track, true),
            None => println!("{:>4} ♥ (not in library)", id.0),
        }
    }
    Ok(())
}
