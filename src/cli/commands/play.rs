//! Play a single file with a text waveform.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use tokio::runtime::Runtime;
use tokio::sync::broadcast::error::RecvError;

use crate::config::Config;
use crate::error::{Error, Result, ResultExt};
use crate::liked::{JsonLikedStore, LikedStoreError};
use crate::metadata::{self, LibraryProvider};
use crate::model::TrackId;
use crate::player::{
    CaptureBus, Collaborators, CpalEngineFactory, MAX_MAGNITUDE, PlaybackController,
    PlaybackState, PlayerConfig, PlayerEvent, PlayerHandle, VisualizerFrame, format_position,
};

const LEVELS: [char; 9] = [' ', '▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

/// Render bars as block characters scaled against the sample bound.
fn render_bars(frame: &VisualizerFrame) -> String {
    frame
        .bars()
        .iter()
        .map(|&bar| {
            let level =
                (bar.min(MAX_MAGNITUDE) as usize * (LEVELS.len() - 1)) / MAX_MAGNITUDE as usize;
            LEVELS[level]
        })
        .collect()
}

fn render_status(state: &PlaybackState, frame: &VisualizerFrame) -> String {
    let duration = state.track().map_or(0, |t| t.duration_ms);
    format!(
        "\r{} {} / {} [{}]",
        render_bars(frame),
        format_position(state.position_ms()),
        format_position(duration),
        state.label()
    )
}

/// Play `path` until it ends or Ctrl+C is pressed.
pub fn cmd_play(rt: &Runtime, config: &Config, path: &Path, start_secs: u64) -> Result<()> {
    if !path.exists() {
        return Err(Error::not_found(path));
    }
    let track = metadata::read_track(TrackId(0), path).with_context("while reading tags")?;
    println!("{} - {}", track.artist, track.title);

    let liked_path = config.liked_path().ok_or(LikedStoreError::NoDataDir)?;
    rt.block_on(async {
        let engines = CpalEngineFactory::new(CaptureBus::new());
        let handle = PlaybackController::spawn(
            PlayerConfig::from(config),
            Collaborators {
                capture: Arc::new(engines.bus().clone()),
                engines: Arc::new(engines),
                metadata: Arc::new(LibraryProvider::new(config.library.paths.clone())),
                liked: Arc::new(JsonLikedStore::open(liked_path)),
            },
        );

        let result = play_until_done(&handle, track, start_secs).await;
        handle.shutdown().await?;
        println!();
        result
    })
}

async fn play_until_done(
    handle: &PlayerHandle,
    track: crate::model::Track,
    start_secs: u64,
) -> Result<()> {
    let mut events = handle.subscribe_events();
    let mut states = handle.subscribe_state();
    let mut frames = handle.subscribe_frames();

    handle.load_track(track).await?;
    if start_secs > 0 {
        handle
            .seek(i64::try_from(start_secs.saturating_mul(1000)).unwrap_or(i64::MAX))
            .await?;
    }
    handle.play().await?;

    let mut stdout = std::io::stdout();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                handle.stop().await?;
                return Ok(());
            }
            event = events.recv() => match event {
                Ok(PlayerEvent::PlaybackFinished { .. }) => return Ok(()),
                Ok(PlayerEvent::TrackUnavailable { reason, .. }) => {
                    tracing::warn!(%reason, "Track unavailable");
                    return Ok(());
                }
                Ok(PlayerEvent::PersistenceFailed { .. }) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => return Ok(()),
            },
            changed = frames.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
            }
            changed = states.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
            }
        }

        let line = render_status(&handle.state(), &handle.frame());
        print!("{line}");
        stdout.flush()?;
    }
}
