//! Test utilities and fixtures.
//!
//! Mock implementations of the player's collaborators: an engine whose every
//! call is recorded in an [`EngineProbe`], a capture source that tests feed
//! by hand, and in-memory metadata / liked stores.
//!
//! # Example
//!
//! ```ignore
//! let engines = MockEngineFactory::default();
//! let handle = PlaybackController::spawn(config, engines.collaborators());
//! handle.load_track(mock_track(1, 180_000)).await?;
//! assert_eq!(engines.last().releases(), 0);
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::liked::{LikedSet, LikedStore, LikedStoreError};
use crate::metadata::{MetadataError, MetadataProvider};
use crate::model::{CoverImage, SourceRef, Track, TrackId};
use crate::player::{
    AudioEngine, CaptureError, CaptureHandle, CaptureSink, CaptureSource, CompletionCallback,
    EngineError, EngineFactory, PositionCell, PositionReader, SessionId,
};

/// Creates a track with the given id and duration.
pub fn mock_track(id: i64, duration_ms: u64) -> Track {
    Track::new(
        TrackId(id),
        SourceRef::new(format!("/test/music/track{id}.mp3")),
        format!("Track {id}"),
        "Test Artist",
        duration_ms,
    )
}

/// Write a 16-bit PCM WAV file holding a 440 Hz tone.
pub fn write_wav_fixture(sample_rate: u32, channels: u16, frames: u32) -> tempfile::NamedTempFile {
    use std::io::Write;

    let data_len = frames * u32::from(channels) * 2;
    let mut bytes = Vec::with_capacity(44 + data_len as usize);
    bytes.extend_from_slice(b"RIFF");
    bytes.extend_from_slice(&(36 + data_len).to_le_bytes());
    bytes.extend_from_slice(b"WAVEfmt ");
    bytes.extend_from_slice(&16u32.to_le_bytes());
    bytes.extend_from_slice(&1u16.to_le_bytes());
    bytes.extend_from_slice(&channels.to_le_bytes());
    bytes.extend_from_slice(&sample_rate.to_le_bytes());
    bytes.extend_from_slice(&(sample_rate * u32::from(channels) * 2).to_le_bytes());
    bytes.extend_from_slice(&(channels * 2).to_le_bytes());
    bytes.extend_from_slice(&16u16.to_le_bytes());
    bytes.extend_from_slice(b"data");
    bytes.extend_from_slice(&data_len.to_le_bytes());
    for frame in 0..frames {
        let t = frame as f32 / sample_rate as f32;
        let sample = ((t * 440.0 * std::f32::consts::TAU).sin() * 16_000.0) as i16;
        for _ in 0..channels {
            bytes.extend_from_slice(&sample.to_le_bytes());
        }
    }

    let mut file = tempfile::Builder::new()
        .suffix(".wav")
        .tempfile()
        .expect("create wav fixture");
    file.write_all(&bytes).expect("write wav fixture");
    file
}

// ============================================================================
// Engine
// ============================================================================

/// Everything a [`MockEngine`] was asked to do.
#[derive(Default)]
pub struct EngineProbe {
    set_source_calls: AtomicUsize,
    prepare_calls: AtomicUsize,
    start_calls: AtomicUsize,
    pause_calls: AtomicUsize,
    stop_calls: AtomicUsize,
    release_calls: AtomicUsize,
    seeks: Mutex<Vec<u64>>,
    position: Arc<PositionCell>,
    completion: Mutex<Option<CompletionCallback>>,
}

impl EngineProbe {
    pub fn set_position(&self, position_ms: u64) {
        self.position.set(position_ms);
    }

    pub fn prepares(&self) -> usize {
        self.prepare_calls.load(Ordering::SeqCst)
    }

    pub fn starts(&self) -> usize {
        self.start_calls.load(Ordering::SeqCst)
    }

    pub fn pauses(&self) -> usize {
        self.pause_calls.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.release_calls.load(Ordering::SeqCst)
    }

    pub fn seeks(&self) -> Vec<u64> {
        self.seeks.lock().clone()
    }

    /// Fire the completion callback as if the track ended.
    pub fn complete(&self) {
        if let Some(callback) = self.completion.lock().as_ref() {
            callback();
        }
    }
}

/// Engine that records calls and never touches audio hardware.
pub struct MockEngine {
    probe: Arc<EngineProbe>,
    session: SessionId,
    fail_prepare: bool,
    fail_start: bool,
    prepare_delay: Duration,
    seek_delay: Duration,
}

impl AudioEngine for MockEngine {
    fn set_source(&mut self, _source: &SourceRef) -> Result<(), EngineError> {
        self.probe.set_source_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn prepare(&mut self) -> Result<SessionId, EngineError> {
        self.probe.prepare_calls.fetch_add(1, Ordering::SeqCst);
        if !self.prepare_delay.is_zero() {
            std::thread::sleep(self.prepare_delay);
        }
        if self.fail_prepare {
            return Err(EngineError::UnsupportedFormat("mock".to_string()));
        }
        Ok(self.session)
    }

    fn start(&mut self) -> Result<(), EngineError> {
        self.probe.start_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_start {
            return Err(EngineError::Output("mock device lost".to_string()));
        }
        Ok(())
    }

    fn pause(&mut self) -> Result<(), EngineError> {
        self.probe.pause_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), EngineError> {
        self.probe.stop_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Counts every call so tests can detect a double release.
    fn release(&mut self) {
        self.probe.release_calls.fetch_add(1, Ordering::SeqCst);
        self.probe.position.retire();
    }

    fn seek_to(&mut self, position_ms: u64) -> Result<(), EngineError> {
        self.probe.seeks.lock().push(position_ms);
        if !self.seek_delay.is_zero() {
            std::thread::sleep(self.seek_delay);
        }
        self.probe.position.set(position_ms);
        Ok(())
    }

    fn current_position(&self) -> Result<u64, EngineError> {
        (self.position_reader())()
    }

    fn on_completion(&mut self, callback: CompletionCallback) {
        *self.probe.completion.lock() = Some(callback);
    }

    fn position_reader(&self) -> PositionReader {
        PositionCell::reader(&self.probe.position)
    }
}

/// Hands out [`MockEngine`]s and keeps their probes.
#[derive(Clone, Default)]
pub struct MockEngineFactory {
    probes: Arc<Mutex<Vec<Arc<EngineProbe>>>>,
    fail_prepare: Arc<AtomicBool>,
    fail_start: Arc<AtomicBool>,
    prepare_delay: Arc<Mutex<Duration>>,
    seek_delay: Arc<Mutex<Duration>>,
}

impl MockEngineFactory {
    pub fn fail_prepare(&self, fail: bool) {
        self.fail_prepare.store(fail, Ordering::SeqCst);
    }

    pub fn fail_start(&self, fail: bool) {
        self.fail_start.store(fail, Ordering::SeqCst);
    }

    pub fn prepare_delay(&self, delay: Duration) {
        *self.prepare_delay.lock() = delay;
    }

    /// Make seeks slow; the position only moves once the delay is over.
    pub fn seek_delay(&self, delay: Duration) {
        *self.seek_delay.lock() = delay;
    }

    pub fn created(&self) -> usize {
        self.probes.lock().len()
    }

    pub fn probe(&self, index: usize) -> Arc<EngineProbe> {
        Arc::clone(&self.probes.lock()[index])
    }

    /// Probe of the most recently created engine.
    pub fn last(&self) -> Arc<EngineProbe> {
        let probes = self.probes.lock();
        Arc::clone(probes.last().expect("no engine created yet"))
    }
}

impl EngineFactory for MockEngineFactory {
    fn create(&self) -> Box<dyn AudioEngine> {
        let probe = Arc::new(EngineProbe::default());
        let mut probes = self.probes.lock();
        probes.push(Arc::clone(&probe));
        Box::new(MockEngine {
            probe,
            session: SessionId(probes.len() as u32),
            fail_prepare: self.fail_prepare.load(Ordering::SeqCst),
            fail_start: self.fail_start.load(Ordering::SeqCst),
            prepare_delay: *self.prepare_delay.lock(),
            seek_delay: *self.seek_delay.lock(),
        })
    }
}

// ============================================================================
// Capture
// ============================================================================

/// Capture source driven by [`ManualCaptureSource::emit`].
#[derive(Default)]
pub struct ManualCaptureSource {
    sink: Arc<Mutex<Option<CaptureSink>>>,
    opened: AtomicUsize,
    released: Arc<AtomicUsize>,
    unavailable: AtomicBool,
    last_session: Mutex<Option<SessionId>>,
}

impl ManualCaptureSource {
    /// Deliver a raw capture to the open sink. Returns false if none is open.
    pub fn emit(&self, samples: &[i8]) -> bool {
        match self.sink.lock().as_mut() {
            Some(sink) => {
                sink(samples);
                true
            }
            None => false,
        }
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    pub fn is_open(&self) -> bool {
        self.sink.lock().is_some()
    }

    pub fn last_session(&self) -> Option<SessionId> {
        *self.last_session.lock()
    }
}

impl CaptureSource for ManualCaptureSource {
    fn open(
        &self,
        session: SessionId,
        _capture_size: usize,
        sink: CaptureSink,
    ) -> Result<Box<dyn CaptureHandle>, CaptureError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CaptureError::Unavailable {
                session,
                reason: "mock capture disabled".to_string(),
            });
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        *self.last_session.lock() = Some(session);
        *self.sink.lock() = Some(sink);
        Ok(Box::new(ManualHandle {
            sink: Arc::clone(&self.sink),
            released: Arc::clone(&self.released),
            done: false,
        }))
    }
}

struct ManualHandle {
    sink: Arc<Mutex<Option<CaptureSink>>>,
    released: Arc<AtomicUsize>,
    done: bool,
}

impl CaptureHandle for ManualHandle {
    fn release(&mut self) {
        if !self.done {
            self.done = true;
            self.sink.lock().take();
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }
}

// ============================================================================
// Metadata and liked songs
// ============================================================================

/// Metadata provider with a fixed track list and optional cover.
#[derive(Default)]
pub struct StubMetadata {
    pub tracks: Vec<Track>,
    pub cover: Option<CoverImage>,
}

#[async_trait]
impl MetadataProvider for StubMetadata {
    async fn list_tracks(&self) -> Result<Vec<Track>, MetadataError> {
        Ok(self.tracks.clone())
    }

    async fn load_cover(&self, _source: &SourceRef) -> Option<CoverImage> {
        self.cover.clone()
    }
}

/// In-memory liked store that can be told to fail its writes.
pub struct MemoryLikedStore {
    liked: watch::Sender<LikedSet>,
    fail_writes: AtomicBool,
}

impl Default for MemoryLikedStore {
    fn default() -> Self {
        Self {
            liked: watch::Sender::new(LikedSet::new()),
            fail_writes: AtomicBool::new(false),
        }
    }
}

impl MemoryLikedStore {
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl LikedStore for MemoryLikedStore {
    async fn toggle(&self, id: TrackId) -> Result<bool, LikedStoreError> {
        let mut now_liked = false;
        self.liked.send_modify(|set| {
            now_liked = !set.remove(&id);
            if now_liked {
                set.insert(id);
            }
        });
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(LikedStoreError::Write(
                "/mock/liked.json".into(),
                std::io::Error::other("disk full"),
            ));
        }
        Ok(now_liked)
    }

    fn observe_liked(&self) -> watch::Receiver<LikedSet> {
        self.liked.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_track_defaults() {
        let track = mock_track(42, 1000);
        assert_eq!(track.id, TrackId(42));
        assert_eq!(track.title, "Track 42");
        assert_eq!(track.duration_ms, 1000);
    }

    #[test]
    fn test_mock_engine_records_calls() {
        let factory = MockEngineFactory::default();
        let mut engine = factory.create();
        engine.set_source(&SourceRef::new("a.mp3")).unwrap();
        assert_eq!(engine.prepare().unwrap(), SessionId(1));
        engine.seek_to(500).unwrap();
        assert_eq!(engine.current_position(), Ok(500));
        engine.release();

        let probe = factory.last();
        assert_eq!(probe.prepares(), 1);
        assert_eq!(probe.seeks(), vec![500]);
        assert_eq!(probe.releases(), 1);
        assert_eq!(engine.current_position(), Err(EngineError::Released));
    }

    #[tokio::test]
    async fn test_memory_liked_store_failure_keeps_state() {
        let store = MemoryLikedStore::default();
        store.fail_writes(true);
        assert!(store.toggle(TrackId(1)).await.is_err());
        assert!(store.observe_liked().borrow().contains(&TrackId(1)));
    }
}
