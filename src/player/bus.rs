//! Waveform capture for the built-in engine.
//!
//! Engines publish the decoded signal of their session to a shared
//! [`CaptureBus`]. A visualizer that opens a capture on the bus gets a
//! dedicated thread that slices the signal into fixed-size signed 8-bit
//! buffers and hands them to its sink.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Sender, TrySendError, bounded};
use parking_lot::Mutex;

use super::capture::{CaptureError, CaptureHandle, CaptureSink, CaptureSource};
use super::engine::SessionId;

/// Blocks of decoded audio queued per subscriber before new ones are dropped.
const QUEUE_DEPTH: usize = 8;

type Subscribers = Arc<Mutex<HashMap<SessionId, Sender<Vec<f32>>>>>;

/// Session allocator and signal fan-out shared by engines and visualizers.
#[derive(Clone, Default)]
pub struct CaptureBus {
    subscribers: Subscribers,
    next_session: Arc<AtomicU32>,
}

impl CaptureBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// A session id no other engine on this bus has used.
    pub fn allocate_session(&self) -> SessionId {
        SessionId(self.next_session.fetch_add(1, Ordering::Relaxed) + 1)
    }

    pub fn is_tapped(&self, session: SessionId) -> bool {
        self.subscribers.lock().contains_key(&session)
    }

    /// Offer mono samples in `[-1.0, 1.0]` to whoever captures `session`.
    /// Never blocks: a slow subscriber just misses blocks.
    pub fn publish(&self, session: SessionId, samples: &[f32]) {
        let subscribers = self.subscribers.lock();
        let Some(tx) = subscribers.get(&session) else {
            return;
        };
        match tx.try_send(samples.to_vec()) {
            Ok(()) | Err(TrySendError::Full(_)) => {}
            Err(TrySendError::Disconnected(_)) => {
                tracing::trace!(%session, "Capture subscriber gone");
            }
        }
    }
}

impl CaptureSource for CaptureBus {
    fn open(
        &self,
        session: SessionId,
        capture_size: usize,
        mut sink: CaptureSink,
    ) -> Result<Box<dyn CaptureHandle>, CaptureError> {
        if capture_size == 0 {
            return Err(CaptureError::Unavailable {
                session,
                reason: "capture size must be positive".to_string(),
            });
        }

        let (tx, rx) = bounded::<Vec<f32>>(QUEUE_DEPTH);
        {
            let mut subscribers = self.subscribers.lock();
            if subscribers.contains_key(&session) {
                return Err(CaptureError::Unavailable {
                    session,
                    reason: "session already captured".to_string(),
                });
            }
            subscribers.insert(session, tx);
        }

        let stopped = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stopped);
        let worker = thread::Builder::new()
            .name("visualizer-capture".to_string())
            .spawn(move || {
                let mut capture: Vec<i8> = Vec::with_capacity(capture_size);
                for block in rx.iter() {
                    if stop_flag.load(Ordering::Acquire) {
                        break;
                    }
                    for sample in block {
                        capture.push(to_i8(sample));
                        if capture.len() == capture_size {
                            sink(&capture);
                            capture.clear();
                        }
                    }
                }
            });

        let worker = match worker {
            Ok(worker) => worker,
            Err(e) => {
                self.subscribers.lock().remove(&session);
                return Err(CaptureError::Unavailable {
                    session,
                    reason: e.to_string(),
                });
            }
        };

        Ok(Box::new(BusCapture {
            session,
            subscribers: Arc::clone(&self.subscribers),
            stopped,
            worker: Some(worker),
        }))
    }
}

/// Quantize a float sample to the signed 8-bit capture format.
fn to_i8(sample: f32) -> i8 {
    (sample.clamp(-1.0, 1.0) * 127.0) as i8
}

struct BusCapture {
    session: SessionId,
    subscribers: Subscribers,
    stopped: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl CaptureHandle for BusCapture {
    /// Waits for the capture thread, which exits after at most the block it
    /// is converting; queued blocks are skipped.
    fn release(&mut self) {
        self.stopped.store(true, Ordering::Release);
        // Dropping the sender ends the worker's receive loop
        self.subscribers.lock().remove(&self.session);
        if let Some(worker) = self.worker.take()
            && worker.join().is_err()
        {
            tracing::warn!(session = %self.session, "Capture thread panicked");
        }
    }
}

impl Drop for BusCapture {
    fn drop(&mut self) {
        self.release();
    }
}
