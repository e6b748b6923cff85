//! The built-in audio engine: symphonia decoding into a cpal output stream.
//!
//! ```text
//! ┌──────────────┐  Seek / Wake   ┌─────────────────────────────┐
//! │  CpalEngine  │ ─────────────▶ │  audio-decoder thread       │
//! │ (controller) │                │  decode → resample → remap  │──▶ CaptureBus
//! └──────┬───────┘                └──────────────┬──────────────┘
//!        │ transport / position                  │ bounded chunk queue
//!        ▼                                       ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                cpal output callback (real-time)             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! The cpal stream is not `Send`, so the decoder thread builds it, owns it
//! and drops it on exit.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, SampleFormat, SizedSample, Stream, StreamConfig};
use crossbeam_channel::{Receiver, RecvTimeoutError, SendTimeoutError, Sender, bounded};
use parking_lot::{Mutex, RwLock};

use super::bus::CaptureBus;
use super::decoder::TrackDecoder;
use super::engine::{
    AudioEngine, CompletionCallback, EngineError, EngineFactory, PositionCell, PositionReader,
    SessionId,
};
use super::rate::{RateConverter, remap_channels};
use crate::model::SourceRef;

/// Decoded chunks buffered ahead of the output callback.
const QUEUE_CHUNKS: usize = 8;
/// How long the decoder waits on a full queue or an idle transport before
/// checking for commands again.
const POLL_WAIT: Duration = Duration::from_millis(50);

const HEADPHONE_KEYWORDS: [&str; 6] = [
    "headphone",
    "headset",
    "earphone",
    "airpod",
    "buds",
    "earbuds",
];

/// Creates a [`CpalEngine`] per track, all publishing to one capture bus.
#[derive(Clone, Default)]
pub struct CpalEngineFactory {
    bus: CaptureBus,
}

impl CpalEngineFactory {
    pub fn new(bus: CaptureBus) -> Self {
        Self { bus }
    }

    pub fn bus(&self) -> &CaptureBus {
        &self.bus
    }
}

impl EngineFactory for CpalEngineFactory {
    fn create(&self) -> Box<dyn AudioEngine> {
        Box::new(CpalEngine::new(self.bus.clone()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transport {
    Paused,
    Playing,
    Finished,
}

enum WorkerCommand {
    Seek(u64),
    Wake,
}

/// State shared by the engine, its decoder thread and the output callback.
///
/// When the decoder reaches the end of the file it only marks the track as
/// draining; the output callback finishes it once the queue has run dry.
struct Shared {
    transport: RwLock<Transport>,
    position: Arc<PositionCell>,
    completion: Mutex<Option<CompletionCallback>>,
    draining: AtomicBool,
    end_ms: AtomicU64,
    shutdown: AtomicBool,
}

impl Shared {
    fn new() -> Self {
        Self {
            transport: RwLock::new(Transport::Paused),
            position: Arc::new(PositionCell::default()),
            completion: Mutex::new(None),
            draining: AtomicBool::new(false),
            end_ms: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
        }
    }

    fn transport(&self) -> Transport {
        *self.transport.read()
    }

    fn is_playing(&self) -> bool {
        self.transport() == Transport::Playing
    }

    fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    /// Mark playback as resumed. Returns whether the track had finished and
    /// must restart from the top.
    fn resume(&self) -> bool {
        let mut transport = self.transport.write();
        let restart = *transport == Transport::Finished;
        if restart {
            self.position.set(0);
        }
        *transport = Transport::Playing;
        restart
    }

    fn pause(&self) {
        let mut transport = self.transport.write();
        if *transport == Transport::Playing {
            *transport = Transport::Paused;
        }
    }

    /// Record a seek. A finished track becomes paused at the new position.
    fn seek(&self, position_ms: u64) {
        self.draining.store(false, Ordering::Release);
        let mut transport = self.transport.write();
        if *transport == Transport::Finished {
            *transport = Transport::Paused;
        }
        self.position.set(position_ms);
    }

    /// Called by the decoder after queueing the last chunk.
    fn begin_drain(&self, end_ms: u64) {
        self.end_ms.store(end_ms, Ordering::Release);
        self.draining.store(true, Ordering::Release);
    }

    /// Finish the track if the decoder is done. Returns whether it finished.
    fn finish_if_drained(&self) -> bool {
        if !self.draining.swap(false, Ordering::AcqRel) {
            return false;
        }
        *self.transport.write() = Transport::Finished;
        self.position.set(self.end_ms.load(Ordering::Acquire));
        if let Some(callback) = self.completion.lock().as_ref() {
            callback();
        }
        true
    }
}

struct Worker {
    session: SessionId,
    commands: Sender<WorkerCommand>,
    thread: JoinHandle<()>,
}

/// Local-file audio engine.
pub struct CpalEngine {
    bus: CaptureBus,
    source: Option<SourceRef>,
    shared: Arc<Shared>,
    worker: Option<Worker>,
    released: bool,
}

impl CpalEngine {
    pub fn new(bus: CaptureBus) -> Self {
        Self {
            bus,
            source: None,
            shared: Arc::new(Shared::new()),
            worker: None,
            released: false,
        }
    }

    fn ensure_live(&self) -> Result<(), EngineError> {
        if self.released {
            Err(EngineError::Released)
        } else {
            Ok(())
        }
    }

    fn worker(&self) -> Result<&Worker, EngineError> {
        self.ensure_live()?;
        self.worker.as_ref().ok_or(EngineError::NotPrepared)
    }

    fn send(&self, command: WorkerCommand) -> Result<(), EngineError> {
        self.worker()?
            .commands
            .send(command)
            .map_err(|_| EngineError::Worker("decoder thread exited".to_string()))
    }
}

impl AudioEngine for CpalEngine {
    fn set_source(&mut self, source: &SourceRef) -> Result<(), EngineError> {
        self.ensure_live()?;
        self.source = Some(source.clone());
        Ok(())
    }

    fn prepare(&mut self) -> Result<SessionId, EngineError> {
        self.ensure_live()?;
        if let Some(worker) = &self.worker {
            return Ok(worker.session);
        }
        let source = self.source.as_ref().ok_or(EngineError::NoSource)?;
        let decoder = TrackDecoder::open(source.path())?;

        let session = self.bus.allocate_session();
        let (commands, command_rx) = bounded(16);
        let (ready_tx, ready_rx) = bounded(1);
        let bus = self.bus.clone();
        let shared = Arc::clone(&self.shared);

        let thread = thread::Builder::new()
            .name("audio-decoder".to_string())
            .spawn(move || decoder_main(decoder, session, bus, shared, command_rx, ready_tx))
            .map_err(|e| EngineError::Output(e.to_string()))?;

        let ready = ready_rx
            .recv()
            .unwrap_or_else(|_| Err(EngineError::Worker("decoder thread exited".to_string())));
        if let Err(e) = ready {
            let _ = thread.join();
            return Err(e);
        }

        tracing::info!(%session, source = %source, "Engine prepared");
        self.worker = Some(Worker {
            session,
            commands,
            thread,
        });
        Ok(session)
    }

    fn start(&mut self) -> Result<(), EngineError> {
        self.worker()?;
        // Rewind before the transport flips, so the decoder never runs past the end
        if self.shared.transport() == Transport::Finished {
            self.send(WorkerCommand::Seek(0))?;
        }
        self.shared.resume();
        self.send(WorkerCommand::Wake)
    }

    fn pause(&mut self) -> Result<(), EngineError> {
        self.worker()?;
        self.shared.pause();
        Ok(())
    }

    fn stop(&mut self) -> Result<(), EngineError> {
        self.worker()?;
        *self.shared.transport.write() = Transport::Paused;
        self.seek_to(0)
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.shared.shutdown.store(true, Ordering::Release);
        *self.shared.transport.write() = Transport::Paused;
        self.shared.completion.lock().take();
        self.shared.position.retire();

        if let Some(worker) = self.worker.take() {
            drop(worker.commands);
            if worker.thread.join().is_err() {
                tracing::warn!(session = %worker.session, "Decoder thread panicked");
            }
            tracing::debug!(session = %worker.session, "Engine released");
        }
    }

    fn seek_to(&mut self, position_ms: u64) -> Result<(), EngineError> {
        self.send(WorkerCommand::Seek(position_ms))?;
        self.shared.seek(position_ms);
        Ok(())
    }

    fn current_position(&self) -> Result<u64, EngineError> {
        self.ensure_live()?;
        Ok(self.shared.position.get())
    }

    fn on_completion(&mut self, callback: CompletionCallback) {
        *self.shared.completion.lock() = Some(callback);
    }

    fn position_reader(&self) -> PositionReader {
        PositionCell::reader(&self.shared.position)
    }
}

impl Drop for CpalEngine {
    fn drop(&mut self) {
        self.release();
    }
}

// ============================================================================
// Decoder thread
// ============================================================================

/// A chunk of output-ready interleaved samples.
struct AudioChunk {
    samples: Vec<f32>,
    timestamp_ms: u64,
}

struct Output {
    _stream: Stream,
    chunks: Sender<AudioChunk>,
    /// Second receiver end, used to drop queued audio after a seek
    drain: Receiver<AudioChunk>,
    sample_rate: u32,
    channels: usize,
}

fn decoder_main(
    mut decoder: TrackDecoder,
    session: SessionId,
    bus: CaptureBus,
    shared: Arc<Shared>,
    commands: Receiver<WorkerCommand>,
    ready: Sender<Result<(), EngineError>>,
) {
    let output = match open_output(Arc::clone(&shared)) {
        Ok(output) => output,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    let _ = ready.send(Ok(()));

    let source_channels = usize::from(decoder.channels());
    let mut converter =
        RateConverter::new(decoder.sample_rate(), output.sample_rate, decoder.channels());
    if converter.is_active() {
        tracing::debug!(%session, ratio = converter.ratio(), "Converting sample rate");
    }
    let mut backlog: Option<AudioChunk> = None;
    let mut last_ms = 0;

    while !shared.shutdown.load(Ordering::Acquire) {
        let command = if shared.is_playing() && !shared.is_draining() {
            commands.try_recv().ok()
        } else {
            match commands.recv_timeout(POLL_WAIT) {
                Ok(command) => Some(command),
                Err(RecvTimeoutError::Timeout) => None,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        };

        if let Some(WorkerCommand::Seek(position_ms)) = command {
            match decoder.seek_ms(position_ms) {
                Ok(landed) => {
                    shared.draining.store(false, Ordering::Release);
                    backlog = None;
                    while output.drain.try_recv().is_ok() {}
                    converter.reset();
                    shared.position.set(landed);
                    last_ms = landed;
                }
                Err(e) => tracing::warn!(%session, error = %e, "Seek failed"),
            }
        }

        if !shared.is_playing() || shared.is_draining() {
            continue;
        }

        let chunk = match backlog.take() {
            Some(chunk) => chunk,
            None => match decoder.decode_next() {
                Ok(Some(block)) => {
                    let left: Vec<f32> = block
                        .samples
                        .iter()
                        .step_by(source_channels.max(1))
                        .copied()
                        .collect();
                    bus.publish(session, &left);
                    last_ms = block.timestamp_ms;

                    let converted = converter.process(&block.samples);
                    AudioChunk {
                        samples: remap_channels(&converted, source_channels, output.channels),
                        timestamp_ms: block.timestamp_ms,
                    }
                }
                Ok(None) => {
                    let tail = converter.flush();
                    if !tail.is_empty() {
                        let _ = output.chunks.send_timeout(
                            AudioChunk {
                                samples: remap_channels(&tail, source_channels, output.channels),
                                timestamp_ms: last_ms,
                            },
                            POLL_WAIT,
                        );
                    }
                    tracing::info!(%session, "Decoding finished, draining output");
                    shared.begin_drain(decoder.duration_ms().max(last_ms));
                    continue;
                }
                Err(e) => {
                    tracing::error!(%session, error = %e, "Decode failed, ending track");
                    shared.begin_drain(decoder.duration_ms().max(last_ms));
                    continue;
                }
            },
        };

        match output.chunks.send_timeout(chunk, POLL_WAIT) {
            Ok(()) => {}
            Err(SendTimeoutError::Timeout(chunk)) => backlog = Some(chunk),
            Err(SendTimeoutError::Disconnected(_)) => break,
        }
    }
    tracing::debug!(%session, "Decoder thread exiting");
}

fn open_output(shared: Arc<Shared>) -> Result<Output, EngineError> {
    let host = cpal::default_host();
    let device = select_device(&host)?;
    let supported = device
        .default_output_config()
        .map_err(|e| EngineError::Output(e.to_string()))?;

    let config = StreamConfig {
        channels: supported.channels(),
        sample_rate: supported.sample_rate(),
        buffer_size: cpal::BufferSize::Default,
    };
    tracing::info!(
        device = %device.name().unwrap_or_else(|_| "Unknown".to_string()),
        sample_rate = config.sample_rate.0,
        channels = config.channels,
        "Opening audio output"
    );

    let (chunks, chunk_rx) = bounded::<AudioChunk>(QUEUE_CHUNKS);
    let drain = chunk_rx.clone();
    let stream = match supported.sample_format() {
        SampleFormat::F32 => build_stream::<f32>(&device, &config, chunk_rx, shared),
        SampleFormat::I16 => build_stream::<i16>(&device, &config, chunk_rx, shared),
        SampleFormat::U16 => build_stream::<u16>(&device, &config, chunk_rx, shared),
        format => {
            return Err(EngineError::Output(format!(
                "Unsupported sample format: {format:?}"
            )));
        }
    }
    .map_err(|e| EngineError::Output(e.to_string()))?;
    stream.play().map_err(|e| EngineError::Output(e.to_string()))?;

    Ok(Output {
        _stream: stream,
        chunks,
        drain,
        sample_rate: config.sample_rate.0,
        channels: usize::from(config.channels),
    })
}

/// Prefer headphones, then the default device.
fn select_device(host: &cpal::Host) -> Result<Device, EngineError> {
    let devices: Vec<Device> = host
        .output_devices()
        .map_err(|e| EngineError::Output(e.to_string()))?
        .collect();

    let headphones = devices.iter().find(|device| {
        device.name().is_ok_and(|name| {
            let name = name.to_lowercase();
            HEADPHONE_KEYWORDS.iter().any(|keyword| name.contains(keyword))
        })
    });
    if let Some(device) = headphones {
        tracing::info!(device = %device.name().unwrap_or_default(), "Selected headphones");
        return Ok(device.clone());
    }

    host.default_output_device()
        .ok_or_else(|| EngineError::Output("No output device found".to_string()))
}

fn build_stream<T>(
    device: &Device,
    config: &StreamConfig,
    chunks: Receiver<AudioChunk>,
    shared: Arc<Shared>,
) -> Result<Stream, cpal::BuildStreamError>
where
    T: SizedSample + FromSample<f32>,
{
    let mut current: Option<(AudioChunk, usize)> = None;

    device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            fill_output(data, &mut current, &chunks, &shared);
        },
        |err| tracing::error!(error = %err, "Audio stream error"),
        None,
    )
}

/// Body of the output callback. Plays queued chunks while the transport is
/// playing and finishes the track once a draining queue is empty.
fn fill_output<T>(
    data: &mut [T],
    current: &mut Option<(AudioChunk, usize)>,
    chunks: &Receiver<AudioChunk>,
    shared: &Shared,
) where
    T: SizedSample + FromSample<f32>,
{
    if !shared.is_playing() {
        data.fill(T::EQUILIBRIUM);
        return;
    }

    let mut written = 0;
    while written < data.len() {
        if current.is_none() {
            match chunks.try_recv() {
                Ok(chunk) => {
                    shared.position.set(chunk.timestamp_ms);
                    *current = Some((chunk, 0));
                }
                Err(_) => {
                    data[written..].fill(T::EQUILIBRIUM);
                    // The decoder sets the flag after its last send
                    if shared.is_draining() && chunks.is_empty() {
                        shared.finish_if_drained();
                    }
                    return;
                }
            }
        }

        if let Some((chunk, offset)) = current.as_mut() {
            let count = (chunk.samples.len() - *offset).min(data.len() - written);
            for (out, &sample) in data[written..written + count]
                .iter_mut()
                .zip(&chunk.samples[*offset..*offset + count])
            {
                *out = T::from_sample(sample);
            }
            *offset += count;
            written += count;
            if *offset >= chunk.samples.len() {
                *current = None;
            }
        }
    }
}
