//! The audio engine capability consumed by the playback controller.
//!
//! The controller owns exactly one engine per loaded track. Other components
//! never see the engine: the poller only gets a [`PositionReader`] and the
//! visualizer capture only gets the engine's [`SessionId`].

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::model::SourceRef;

/// Identifier the engine assigns to a prepared track, used to scope the
/// visualizer capture to that playback instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub u32);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Narrow read-only view of an engine's playback position.
///
/// Fails with [`EngineError::Released`] once the engine is gone.
pub type PositionReader = Arc<dyn Fn() -> Result<u64, EngineError> + Send + Sync>;

/// Invoked by the engine when the track finishes naturally.
pub type CompletionCallback = Box<dyn Fn() + Send + Sync>;

/// Audio engine errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("No source set")]
    NoSource,

    #[error("Cannot open source: {0}")]
    Source(String),

    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),

    #[error("Failed to decode audio: {0}")]
    Decode(String),

    #[error("Audio output failed: {0}")]
    Output(String),

    #[error("Engine not prepared")]
    NotPrepared,

    #[error("Engine already released")]
    Released,

    #[error("Engine worker failed: {0}")]
    Worker(String),
}

/// A single-track audio engine.
///
/// `set_source`, `prepare`, `start` and `seek_to` may block and are called
/// from a blocking worker; everything else must return promptly.
pub trait AudioEngine: Send {
    fn set_source(&mut self, source: &SourceRef) -> Result<(), EngineError>;

    /// Prepare the source for playback and return its session handle.
    fn prepare(&mut self) -> Result<SessionId, EngineError>;

    fn start(&mut self) -> Result<(), EngineError>;

    fn pause(&mut self) -> Result<(), EngineError>;

    fn stop(&mut self) -> Result<(), EngineError>;

    /// Free all resources. Must be safe to call more than once.
    fn release(&mut self);

    fn seek_to(&mut self, position_ms: u64) -> Result<(), EngineError>;

    fn current_position(&self) -> Result<u64, EngineError>;

    fn on_completion(&mut self, callback: CompletionCallback);

    fn position_reader(&self) -> PositionReader;
}

/// Creates a fresh engine for every loaded track.
pub trait EngineFactory: Send + Sync {
    fn create(&self) -> Box<dyn AudioEngine>;
}

impl<F> EngineFactory for F
where
    F: Fn() -> Box<dyn AudioEngine> + Send + Sync,
{
    fn create(&self) -> Box<dyn AudioEngine> {
        self()
    }
}

/// Playback position shared between an engine and its readers.
#[derive(Debug, Default)]
pub struct PositionCell {
    position_ms: AtomicU64,
    retired: AtomicBool,
}

impl PositionCell {
    pub fn get(&self) -> u64 {
        self.position_ms.load(Ordering::Acquire)
    }

    pub fn set(&self, position_ms: u64) {
        self.position_ms.store(position_ms, Ordering::Release);
    }

    /// Mark the owning engine as released; readers fail from now on.
    pub fn retire(&self) {
        self.retired.store(true, Ordering::Release);
    }

    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }

    /// A reader that holds only a weak reference to the cell.
    pub fn reader(cell: &Arc<Self>) -> PositionReader {
        let weak = Arc::downgrade(cell);
        Arc::new(move || match weak.upgrade() {
            Some(cell) if !cell.is_retired() => Ok(cell.get()),
            _ => Err(EngineError::Released),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reader_follows_cell() {
        let cell = Arc::new(PositionCell::default());
        let reader = PositionCell::reader(&cell);
        cell.set(1500);
        assert_eq!(reader(), Ok(1500));
    }

    #[test]
    fn test_reader_fails_after_retire() {
        let cell = Arc::new(PositionCell::default());
        let reader = PositionCell::reader(&cell);
        cell.retire();
        assert_eq!(reader(), Err(EngineError::Released));
    }

    #[test]
    fn test_reader_fails_after_drop() {
        let cell = Arc::new(PositionCell::default());
        let reader = PositionCell::reader(&cell);
        drop(cell);
        assert_eq!(reader(), Err(EngineError::Released));
    }
}
