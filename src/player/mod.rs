//! Audio playback with a live waveform visualizer.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                 PlayerHandle (any task, cloneable)              │
//! │        load / play / pause / stop / seek / toggle_like          │
//! └────────────────────────────┬────────────────────────────────────┘
//!                              │ inbox (mpsc)
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │              PlaybackController (single owner task)             │
//! │  engine slot, state machine, publishes state/frames via watch   │
//! └──────┬───────────────────────┬──────────────────────┬───────────┘
//!        │ spawn_blocking        │ PositionReader       │ SessionId
//!        ▼                       ▼                      ▼
//! ┌──────────────┐      ┌─────────────────┐    ┌───────────────────┐
//! │ AudioEngine  │      │ PositionPoller  │    │ VisualizerCapture │
//! │ (CpalEngine) │      │  (tokio task)   │    │  (capture thread) │
//! └──────────────┘      └─────────────────┘    └───────────────────┘
//! ```
//!
//! Ticks, frames and engine completions travel back through the same inbox,
//! so the controller task is the only writer of playback state.

mod bus;
mod capture;
mod controller;
mod decoder;
mod engine;
mod output;
mod poller;
mod rate;
mod state;
mod waveform;

pub use bus::CaptureBus;
pub use capture::{
    CaptureError, CaptureHandle, CaptureSink, CaptureSource, DEFAULT_CAPTURE_SIZE,
    DEFAULT_THROTTLE, Throttle, VisualizerCapture,
};
pub use controller::{
    Collaborators, DEFAULT_RESOLUTION, PlaybackController, PlayerConfig, PlayerHandle,
};
pub use decoder::{DecodedBlock, TrackDecoder};
pub use engine::{
    AudioEngine, CompletionCallback, EngineError, EngineFactory, PositionCell, PositionReader,
    SessionId,
};
pub use output::{CpalEngine, CpalEngineFactory};
pub use poller::{DEFAULT_POLL_INTERVAL, PositionPoller};
pub use rate::RateConverter;
pub use state::{PlaybackState, PlayerEvent, format_position};
pub use waveform::{MAX_MAGNITUDE, VisualizerFrame, WaveformCapture, max_processed, resample};

use crate::metadata::MetadataError;
use crate::model::TrackId;

/// Player errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PlayerError {
    #[error("Track {track_id} unavailable: {reason}")]
    TrackUnavailable { track_id: TrackId, reason: String },

    #[error("Audio engine failure: {0}")]
    Engine(#[from] EngineError),

    #[error("Cannot {operation} while {state}")]
    InvalidTransition {
        operation: &'static str,
        state: &'static str,
    },

    #[error("Another track is still loading")]
    LoadInFlight,

    #[error("Load cancelled by a newer command")]
    LoadCancelled,

    #[error("Failed to save liked songs: {0}")]
    Persistence(String),

    #[error("Library error: {0}")]
    Library(#[from] MetadataError),

    #[error("Player channel closed")]
    ChannelClosed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = PlayerError::InvalidTransition {
            operation: "pause",
            state: "idle",
        };
        assert_eq!(err.to_string(), "Cannot pause while idle");

        let err: PlayerError = EngineError::NotPrepared.into();
        assert_eq!(err.to_string(), "Audio engine failure: Engine not prepared");
    }
}
