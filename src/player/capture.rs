//! Throttled visualizer capture.
//!
//! [`VisualizerCapture`] binds a capture facility ([`CaptureSource`]) to an
//! engine session and forwards at most one raw capture per throttle window.
//! Captures arrive on the facility's own thread; the throttle runs there too
//! so discarded captures are never copied.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::engine::SessionId;
use super::waveform::WaveformCapture;

/// Minimum time between two forwarded captures.
pub const DEFAULT_THROTTLE: Duration = Duration::from_millis(100);

/// Samples per raw capture.
pub const DEFAULT_CAPTURE_SIZE: usize = 1024;

/// Receives raw signed 8-bit captures on the capture thread.
pub type CaptureSink = Box<dyn FnMut(&[i8]) + Send>;

/// Capture errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CaptureError {
    #[error("Capture unavailable for {session}: {reason}")]
    Unavailable { session: SessionId, reason: String },
}

/// A live capture. Releasing it guarantees the sink is not called again.
pub trait CaptureHandle: Send {
    fn release(&mut self);
}

/// Waveform capture facility.
pub trait CaptureSource: Send + Sync {
    fn open(
        &self,
        session: SessionId,
        capture_size: usize,
        sink: CaptureSink,
    ) -> Result<Box<dyn CaptureHandle>, CaptureError>;
}

/// Forwarding gate: admits an event only if the window has elapsed since
/// the last admitted one. The first event after a reset is always admitted.
#[derive(Debug, Clone)]
pub struct Throttle {
    window: Duration,
    last_forwarded: Option<Instant>,
}

impl Throttle {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_forwarded: None,
        }
    }

    pub fn reset(&mut self) {
        self.last_forwarded = None;
    }

    pub fn admit(&mut self, now: Instant) -> bool {
        match self.last_forwarded {
            Some(last) if now.saturating_duration_since(last) < self.window => false,
            _ => {
                self.last_forwarded = Some(now);
                true
            }
        }
    }
}

/// Visualizer capture bound to at most one engine session at a time.
pub struct VisualizerCapture {
    source: Arc<dyn CaptureSource>,
    capture_size: usize,
    throttle: Arc<Mutex<Throttle>>,
    active: Option<Box<dyn CaptureHandle>>,
}

impl VisualizerCapture {
    pub fn new(source: Arc<dyn CaptureSource>, capture_size: usize, window: Duration) -> Self {
        Self {
            source,
            capture_size,
            throttle: Arc::new(Mutex::new(Throttle::new(window))),
            active: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Start capturing `session`, tearing down any previous capture first.
    pub fn start<F>(&mut self, session: SessionId, mut on_frame: F) -> Result<(), CaptureError>
    where
        F: FnMut(WaveformCapture) + Send + 'static,
    {
        self.stop();
        self.throttle.lock().reset();

        let throttle = Arc::clone(&self.throttle);
        let capture_size = self.capture_size;
        let sink: CaptureSink = Box::new(move |samples: &[i8]| {
            if throttle.lock().admit(Instant::now()) {
                on_frame(WaveformCapture::new(samples.to_vec(), capture_size));
            }
        });

        let handle = self.source.open(session, capture_size, sink)?;
        tracing::debug!(%session, capture_size, "Visualizer capture started");
        self.active = Some(handle);
        Ok(())
    }

    /// Release the current capture, if any.
    pub fn stop(&mut self) {
        if let Some(mut handle) = self.active.take() {
            handle.release();
            tracing::debug!("Visualizer capture released");
        }
    }
}

impl Drop for VisualizerCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::ManualCaptureSource;
    use std::sync::mpsc;

    #[test]
    fn test_throttle_first_event_admitted() {
        let mut throttle = Throttle::new(Duration::from_millis(100));
        assert!(throttle.admit(Instant::now()));
    }

    #[test]
    fn test_throttle_ten_ms_captures_over_one_second() {
        let mut throttle = Throttle::new(Duration::from_millis(100));
        let origin = Instant::now();
        let forwarded = (0..100)
            .map(|i| origin + Duration::from_millis(i * 10))
            .filter(|&now| throttle.admit(now))
            .count();
        assert!((9..=11).contains(&forwarded), "forwarded {forwarded}");
    }

    #[test]
    fn test_throttle_reset() {
        let mut throttle = Throttle::new(Duration::from_secs(60));
        let now = Instant::now();
        assert!(throttle.admit(now));
        assert!(!throttle.admit(now + Duration::from_millis(5)));
        throttle.reset();
        assert!(throttle.admit(now + Duration::from_millis(6)));
    }

    fn capture_with(source: &Arc<ManualCaptureSource>, window: Duration) -> VisualizerCapture {
        let source: Arc<dyn CaptureSource> = Arc::clone(source) as Arc<dyn CaptureSource>;
        VisualizerCapture::new(source, 4, window)
    }

    #[test]
    fn test_forwards_throttled_captures() {
        let source = Arc::new(ManualCaptureSource::default());
        let mut capture = capture_with(&source, Duration::from_secs(60));
        let (tx, rx) = mpsc::channel();

        capture
            .start(SessionId(1), move |frame| {
                let _ = tx.send(frame);
            })
            .unwrap();

        assert!(source.emit(&[1, -2, 3, -4]));
        assert!(source.emit(&[9, 9, 9, 9]));

        let frames: Vec<WaveformCapture> = rx.try_iter().collect();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].samples, vec![1, -2, 3, -4]);
        assert_eq!(frames[0].capture_size, 4);
    }

    #[test]
    fn test_restart_releases_previous_capture() {
        let source = Arc::new(ManualCaptureSource::default());
        let mut capture = capture_with(&source, DEFAULT_THROTTLE);

        capture.start(SessionId(1), |_| {}).unwrap();
        capture.start(SessionId(2), |_| {}).unwrap();

        assert_eq!(source.opened(), 2);
        assert_eq!(source.released(), 1);
        assert_eq!(source.last_session(), Some(SessionId(2)));
    }

    #[test]
    fn test_restart_resets_throttle() {
        let source = Arc::new(ManualCaptureSource::default());
        let mut capture = capture_with(&source, Duration::from_secs(60));
        let (tx, rx) = mpsc::channel();

        let first = tx.clone();
        capture
            .start(SessionId(1), move |frame| {
                let _ = first.send(frame);
            })
            .unwrap();
        source.emit(&[1, 1, 1, 1]);

        capture
            .start(SessionId(1), move |frame| {
                let _ = tx.send(frame);
            })
            .unwrap();
        source.emit(&[2, 2, 2, 2]);

        assert_eq!(rx.try_iter().count(), 2);
    }

    #[test]
    fn test_stop_releases_exactly_once() {
        let source = Arc::new(ManualCaptureSource::default());
        let mut capture = capture_with(&source, DEFAULT_THROTTLE);

        capture.stop();
        assert_eq!(source.released(), 0);

        capture.start(SessionId(3), |_| {}).unwrap();
        capture.stop();
        capture.stop();
        drop(capture);

        assert_eq!(source.released(), 1);
        assert!(!source.emit(&[0, 0, 0, 0]));
    }

    #[test]
    fn test_unavailable_source() {
        let source = Arc::new(ManualCaptureSource::default());
        source.set_unavailable(true);
        let mut capture = capture_with(&source, DEFAULT_THROTTLE);

        let err = capture.start(SessionId(4), |_| {}).unwrap_err();
        assert!(matches!(err, CaptureError::Unavailable { .. }));
        assert!(!capture.is_active());
    }
}
