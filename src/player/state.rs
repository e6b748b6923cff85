//! Playback state and player events.

use crate::model::{Track, TrackId};

/// The controller's playback state. Replaced wholesale on every transition.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PlaybackState {
    #[default]
    Idle,
    Loading,
    Ready(Track),
    Playing { track: Track, position_ms: u64 },
    Paused { track: Track, position_ms: u64 },
    Stopped,
}

impl PlaybackState {
    /// The current track, if one is loaded.
    pub fn track(&self) -> Option<&Track> {
        match self {
            Self::Ready(track) | Self::Playing { track, .. } | Self::Paused { track, .. } => {
                Some(track)
            }
            Self::Idle | Self::Loading | Self::Stopped => None,
        }
    }

    pub fn position_ms(&self) -> u64 {
        match self {
            Self::Playing { position_ms, .. } | Self::Paused { position_ms, .. } => *position_ms,
            _ => 0,
        }
    }

    pub fn is_playing(&self) -> bool {
        matches!(self, Self::Playing { .. })
    }

    /// Same state with a new position, clamped to the track duration.
    /// States without a position are returned unchanged.
    pub fn with_position(&self, position_ms: u64) -> Self {
        match self {
            Self::Playing { track, .. } => Self::Playing {
                position_ms: position_ms.min(track.duration_ms),
                track: track.clone(),
            },
            Self::Paused { track, .. } => Self::Paused {
                position_ms: position_ms.min(track.duration_ms),
                track: track.clone(),
            },
            other => other.clone(),
        }
    }

    /// Short name for logs and error messages.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Loading => "loading",
            Self::Ready(_) => "ready",
            Self::Playing { .. } => "playing",
            Self::Paused { .. } => "paused",
            Self::Stopped => "stopped",
        }
    }
}

/// Out-of-band notifications from the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerEvent {
    /// The engine could not prepare the track
    TrackUnavailable { track_id: TrackId, reason: String },
    /// The track played to the end
    PlaybackFinished { track_id: TrackId },
    /// Liked songs could not be written
    PersistenceFailed { reason: String },
}

/// Format a millisecond position as M:SS or H:MM:SS.
pub fn format_position(position_ms: u64) -> String {
    let secs = position_ms / 1000;
    let hours = secs / 3600;
    let mins = (secs % 3600) / 60;
    let secs = secs % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, mins, secs)
    } else {
        format!("{}:{:02}", mins, secs)
    }
}
