//! The playback state machine.
//!
//! A [`PlaybackController`] runs as a single tokio task that owns the engine,
//! the visualizer capture and the position poller. Everything reaches it
//! through one inbox: commands from [`PlayerHandle`], load results, poller
//! ticks, capture frames and engine completions. Because the task is the only
//! writer of the published state, commands are linearizable.
//!
//! Two counters guard against late messages:
//! - `generation` is bumped for every load. Load results and completions
//!   carry it and are dropped once a newer load or a stop superseded them.
//! - `run` is bumped whenever capture and poller start or stop. Ticks and
//!   frames carry it, so anything produced before a pause, seek or stop is
//!   dropped.
//!
//! Engines are stopped and released on the blocking pool, since releasing
//! joins the engine's threads.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, UnboundedSender, WeakUnboundedSender};
use tokio::sync::{broadcast, oneshot, watch};

use super::capture::{
    CaptureError, CaptureSource, DEFAULT_CAPTURE_SIZE, DEFAULT_THROTTLE, VisualizerCapture,
};
use super::engine::{AudioEngine, EngineError, EngineFactory, SessionId};
use super::poller::{DEFAULT_POLL_INTERVAL, PositionPoller};
use super::state::{PlaybackState, PlayerEvent};
use super::waveform::{self, VisualizerFrame, WaveformCapture};
use super::PlayerError;
use crate::config::Config;
use crate::liked::{LikedSet, LikedStore};
use crate::metadata::MetadataProvider;
use crate::model::{CoverImage, Track, TrackId};

/// Bars per visualizer frame.
pub const DEFAULT_RESOLUTION: usize = 32;

const EVENT_CAPACITY: usize = 16;

/// Tunables of the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerConfig {
    pub poll_interval: Duration,
    pub throttle: Duration,
    pub capture_size: usize,
    pub resolution: usize,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            throttle: DEFAULT_THROTTLE,
            capture_size: DEFAULT_CAPTURE_SIZE,
            resolution: DEFAULT_RESOLUTION,
        }
    }
}

impl From<&Config> for PlayerConfig {
    fn from(config: &Config) -> Self {
        Self {
            poll_interval: Duration::from_millis(config.playback.poll_interval_ms),
            throttle: Duration::from_millis(config.visualizer.throttle_ms),
            capture_size: config.visualizer.capture_size,
            resolution: config.visualizer.resolution,
        }
    }
}

/// The capabilities the controller drives.
pub struct Collaborators {
    pub engines: Arc<dyn EngineFactory>,
    pub capture: Arc<dyn CaptureSource>,
    pub metadata: Arc<dyn MetadataProvider>,
    pub liked: Arc<dyn LikedStore>,
}

type Reply<T = ()> = oneshot::Sender<Result<T, PlayerError>>;

enum Command {
    Load(Track, Reply),
    Play(Reply),
    Pause(Reply),
    Stop(Reply),
    Seek(i64, Reply),
    ToggleLike(TrackId, Reply<bool>),
    Shutdown(oneshot::Sender<()>),
}

enum Inbox {
    Command(Command),
    Loaded(LoadOutcome),
    Position { run: u64, position_ms: u64 },
    Frame { run: u64, capture: WaveformCapture },
    Completed { generation: u64 },
}

struct LoadOutcome {
    generation: u64,
    track: Track,
    /// `None` if the blocking worker panicked and took the engine with it
    engine: Option<Box<dyn AudioEngine>>,
    prepared: Result<SessionId, EngineError>,
    cover: Option<CoverImage>,
    reply: Reply,
}

struct ActiveEngine {
    engine: Box<dyn AudioEngine>,
    session: SessionId,
    generation: u64,
}

#[derive(Default)]
enum EngineSlot {
    #[default]
    Empty,
    Active(ActiveEngine),
}

/// Deliver a message if the controller is still alive.
fn post(inbox: &WeakUnboundedSender<Inbox>, message: Inbox) -> bool {
    inbox
        .upgrade()
        .is_some_and(|tx| tx.send(message).is_ok())
}

/// Owner of the engine and the playback state.
pub struct PlaybackController {
    config: PlayerConfig,
    engines: Arc<dyn EngineFactory>,
    metadata: Arc<dyn MetadataProvider>,
    liked: Arc<dyn LikedStore>,
    slot: EngineSlot,
    capture: VisualizerCapture,
    poller: PositionPoller,
    generation: u64,
    run: u64,
    pending_load: Option<u64>,
    state_tx: watch::Sender<PlaybackState>,
    frame_tx: watch::Sender<VisualizerFrame>,
    events_tx: broadcast::Sender<PlayerEvent>,
    inbox: WeakUnboundedSender<Inbox>,
}

impl PlaybackController {
    /// Start the owner task and return a handle to it.
    ///
    /// Must be called from within a tokio runtime. The task ends when
    /// [`PlayerHandle::shutdown`] is called or every handle is dropped.
    pub fn spawn(config: PlayerConfig, collaborators: Collaborators) -> PlayerHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(PlaybackState::Idle);
        let (frame_tx, frame_rx) = watch::channel(VisualizerFrame::silent(config.resolution));
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);

        let controller = Self {
            capture: VisualizerCapture::new(
                collaborators.capture,
                config.capture_size,
                config.throttle,
            ),
            poller: PositionPoller::new(),
            engines: collaborators.engines,
            metadata: Arc::clone(&collaborators.metadata),
            liked: Arc::clone(&collaborators.liked),
            slot: EngineSlot::Empty,
            generation: 0,
            run: 0,
            pending_load: None,
            state_tx,
            frame_tx,
            events_tx: events_tx.clone(),
            inbox: tx.downgrade(),
            config: config.clone(),
        };
        tokio::spawn(controller.run(rx));

        PlayerHandle {
            inbox: tx,
            state: state_rx,
            frames: frame_rx,
            events: events_tx,
            metadata: collaborators.metadata,
            liked: collaborators.liked,
            resolution: config.resolution,
        }
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Inbox>) {
        tracing::debug!("Playback controller started");
        while let Some(message) = rx.recv().await {
            match message {
                Inbox::Command(command) => {
                    if self.handle_command(command).await.is_break() {
                        break;
                    }
                }
                Inbox::Loaded(outcome) => self.finish_load(outcome),
                Inbox::Position { run, position_ms } => self.apply_position(run, position_ms),
                Inbox::Frame { run, capture } => self.apply_frame(run, capture),
                Inbox::Completed { generation } => self.complete(generation),
            }
        }
        tracing::debug!("Playback controller stopped");
    }

    async fn handle_command(&mut self, command: Command) -> ControlFlow<()> {
        match command {
            Command::Load(track, reply) => self.begin_load(track, reply).await,
            Command::Play(reply) => {
                let _ = reply.send(self.play().await);
            }
            Command::Pause(reply) => {
                let _ = reply.send(self.pause());
            }
            Command::Stop(reply) => {
                let _ = reply.send(self.stop().await);
            }
            Command::Seek(position_ms, reply) => {
                let _ = reply.send(self.seek(position_ms).await);
            }
            Command::ToggleLike(id, reply) => self.toggle_like(id, reply),
            Command::Shutdown(ack) => {
                self.shutdown().await;
                let _ = ack.send(());
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    fn state(&self) -> PlaybackState {
        self.state_tx.borrow().clone()
    }

    fn set_state(&self, state: PlaybackState) {
        tracing::info!(state = state.label(), "Playback state changed");
        self.state_tx.send_replace(state);
    }

    fn emit(&self, event: PlayerEvent) {
        // No subscribers is fine
        let _ = self.events_tx.send(event);
    }

    fn invalid(operation: &'static str, state: &PlaybackState) -> PlayerError {
        PlayerError::InvalidTransition {
            operation,
            state: state.label(),
        }
    }

    // ------------------------------------------------------------------
    // Load
    // ------------------------------------------------------------------

    async fn begin_load(&mut self, track: Track, reply: Reply) {
        if self.pending_load.is_some() {
            let _ = reply.send(Err(PlayerError::LoadInFlight));
            return;
        }

        self.teardown_engine().await;
        self.generation += 1;
        let generation = self.generation;
        self.pending_load = Some(generation);
        self.set_state(PlaybackState::Loading);
        self.frame_tx
            .send_replace(VisualizerFrame::silent(self.config.resolution));

        let mut engine = self.engines.create();
        let completions = self.inbox.clone();
        engine.on_completion(Box::new(move || {
            post(&completions, Inbox::Completed { generation });
        }));

        tracing::info!(track_id = %track.id, source = %track.source, generation, "Loading track");

        let metadata = Arc::clone(&self.metadata);
        let inbox = self.inbox.clone();
        tokio::spawn(async move {
            let source = track.source.clone();
            let prepare = tokio::task::spawn_blocking(move || {
                let prepared = engine.set_source(&source).and_then(|()| engine.prepare());
                (engine, prepared)
            });
            let (joined, cover) = tokio::join!(prepare, metadata.load_cover(&track.source));

            let (engine, prepared) = match joined {
                Ok((engine, prepared)) => (Some(engine), prepared),
                Err(e) => (None, Err(EngineError::Worker(e.to_string()))),
            };
            let outcome = LoadOutcome {
                generation,
                track,
                engine,
                prepared,
                cover,
                reply,
            };

            let undelivered = match inbox.upgrade() {
                Some(tx) => tx.send(Inbox::Loaded(outcome)).err().map(|e| e.0),
                None => Some(Inbox::Loaded(outcome)),
            };
            if let Some(Inbox::Loaded(LoadOutcome {
                engine: Some(mut engine),
                ..
            })) = undelivered
            {
                tokio::task::spawn_blocking(move || engine.release());
            }
        });
    }

    fn finish_load(&mut self, outcome: LoadOutcome) {
        let LoadOutcome {
            generation,
            track,
            engine,
            prepared,
            cover,
            reply,
        } = outcome;

        if self.pending_load != Some(generation) {
            tracing::debug!(generation, "Discarding superseded load");
            // Reply once the engine is gone
            tokio::task::spawn_blocking(move || {
                if let Some(mut engine) = engine {
                    engine.release();
                }
                let _ = reply.send(Err(PlayerError::LoadCancelled));
            });
            return;
        }
        self.pending_load = None;

        match (engine, prepared) {
            (Some(engine), Ok(session)) => {
                tracing::info!(
                    track_id = %track.id,
                    %session,
                    has_cover = cover.is_some(),
                    "Track ready"
                );
                self.slot = EngineSlot::Active(ActiveEngine {
                    engine,
                    session,
                    generation,
                });
                self.set_state(PlaybackState::Ready(track.with_cover(cover)));
                let _ = reply.send(Ok(()));
            }
            (engine, result) => {
                let reason = match result {
                    Err(e) => e.to_string(),
                    Ok(_) => EngineError::Released.to_string(),
                };
                tracing::warn!(track_id = %track.id, %reason, "Track unavailable");
                if let Some(mut engine) = engine {
                    engine.release();
                }
                self.set_state(PlaybackState::Idle);
                self.emit(PlayerEvent::TrackUnavailable {
                    track_id: track.id,
                    reason: reason.clone(),
                });
                let _ = reply.send(Err(PlayerError::TrackUnavailable {
                    track_id: track.id,
                    reason,
                }));
            }
        }
    }

    // ------------------------------------------------------------------
    // Transport
    // ------------------------------------------------------------------

    async fn play(&mut self) -> Result<(), PlayerError> {
        let (track, held_ms) = match self.state() {
            PlaybackState::Ready(track) => (track, 0),
            PlaybackState::Paused { track, position_ms } => (track, position_ms),
            other => return Err(Self::invalid("play", &other)),
        };

        // The engine knows best where it resumes (a finished track restarts)
        let position_ms = self
            .with_engine(|engine| {
                engine.start()?;
                Ok(engine.current_position().ok())
            })
            .await?
            .unwrap_or(held_ms);

        if !self.start_run() {
            return Err(PlayerError::Engine(EngineError::NotPrepared));
        }
        self.set_state(PlaybackState::Playing {
            position_ms: position_ms.min(track.duration_ms),
            track,
        });
        Ok(())
    }

    /// Start capture and poller for the active engine under a fresh run.
    /// Returns false if no engine is loaded.
    fn start_run(&mut self) -> bool {
        let EngineSlot::Active(active) = &self.slot else {
            return false;
        };
        let session = active.session;
        let reader = active.engine.position_reader();

        self.run += 1;
        let run = self.run;

        let frames = self.inbox.clone();
        match self.capture.start(session, move |capture| {
            post(&frames, Inbox::Frame { run, capture });
        }) {
            Ok(()) => {}
            Err(CaptureError::Unavailable { session, reason }) => {
                tracing::warn!(%session, %reason, "Visualizer unavailable, playing without frames");
            }
        }

        let ticks = self.inbox.clone();
        self.poller.start(
            reader,
            move |position_ms| {
                post(&ticks, Inbox::Position { run, position_ms });
            },
            self.config.poll_interval,
        );
        true
    }

    fn pause(&mut self) -> Result<(), PlayerError> {
        let state = self.state();
        let PlaybackState::Playing { track, position_ms } = state else {
            return Err(Self::invalid("pause", &state));
        };

        self.halt_run();
        if let EngineSlot::Active(active) = &mut self.slot
            && let Err(e) = active.engine.pause()
        {
            tracing::warn!(error = %e, "Engine pause failed");
        }
        self.set_state(PlaybackState::Paused { track, position_ms });
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), PlayerError> {
        let cancelled_load = self.pending_load.take();
        let had_engine = self.teardown_engine().await;
        if cancelled_load.is_none() && !had_engine {
            return Ok(());
        }

        self.set_state(PlaybackState::Stopped);
        self.frame_tx
            .send_replace(VisualizerFrame::silent(self.config.resolution));
        Ok(())
    }

    async fn seek(&mut self, requested_ms: i64) -> Result<(), PlayerError> {
        let state = self.state();
        let Some(track) = state.track() else {
            return Err(Self::invalid("seek", &state));
        };
        let position_ms = track.clamp_position(requested_ms);

        // Ticks read while the engine seeks would report the old position
        let playing = state.is_playing();
        if playing {
            self.halt_run();
        }
        let sought = self
            .with_engine(move |engine| engine.seek_to(position_ms))
            .await;
        if playing {
            self.start_run();
        }
        sought?;

        // Re-read: the engine call ran off-task but nothing else can write
        let updated = self.state().with_position(position_ms);
        self.state_tx.send_replace(updated);
        tracing::debug!(position_ms, "Seeked");
        Ok(())
    }

    fn complete(&mut self, generation: u64) {
        let current = match &self.slot {
            EngineSlot::Active(active) => active.generation == generation,
            EngineSlot::Empty => false,
        };
        let PlaybackState::Playing { track, .. } = self.state() else {
            tracing::debug!(generation, "Ignoring completion outside of playback");
            return;
        };
        if !current {
            tracing::debug!(generation, "Ignoring completion from a released engine");
            return;
        }

        self.halt_run();
        if let EngineSlot::Active(active) = &mut self.slot
            && let Err(e) = active.engine.pause()
        {
            tracing::warn!(error = %e, "Engine pause after completion failed");
        }
        let track_id = track.id;
        self.set_state(PlaybackState::Paused {
            position_ms: track.duration_ms,
            track,
        });
        self.emit(PlayerEvent::PlaybackFinished { track_id });
    }

    // ------------------------------------------------------------------
    // Ticks and frames
    // ------------------------------------------------------------------

    fn apply_position(&mut self, run: u64, position_ms: u64) {
        if run != self.run {
            tracing::trace!(run, "Dropping stale position tick");
            return;
        }
        self.state_tx.send_if_modified(|state| match state {
            PlaybackState::Playing {
                track,
                position_ms: current,
            } => {
                let clamped = position_ms.min(track.duration_ms);
                let changed = *current != clamped;
                *current = clamped;
                changed
            }
            _ => false,
        });
    }

    fn apply_frame(&mut self, run: u64, capture: WaveformCapture) {
        if run != self.run || !self.state_tx.borrow().is_playing() {
            tracing::trace!(run, "Dropping stale capture");
            return;
        }
        self.frame_tx
            .send_replace(capture.resample(self.config.resolution));
    }

    // ------------------------------------------------------------------
    // Liked songs
    // ------------------------------------------------------------------

    fn toggle_like(&self, id: TrackId, reply: Reply<bool>) {
        let liked = Arc::clone(&self.liked);
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let result = liked.toggle(id).await.map_err(|e| {
                tracing::warn!(track_id = %id, error = %e, "Failed to persist liked songs");
                let reason = e.to_string();
                let _ = events.send(PlayerEvent::PersistenceFailed {
                    reason: reason.clone(),
                });
                PlayerError::Persistence(reason)
            });
            let _ = reply.send(result);
        });
    }

    // ------------------------------------------------------------------
    // Resources
    // ------------------------------------------------------------------

    /// Run a blocking engine call on a worker, moving the engine there and
    /// back. If the worker panics the engine is lost and the player goes idle.
    async fn with_engine<T, F>(&mut self, op: F) -> Result<T, PlayerError>
    where
        F: FnOnce(&mut dyn AudioEngine) -> Result<T, EngineError> + Send + 'static,
        T: Send + 'static,
    {
        let EngineSlot::Active(active) = std::mem::take(&mut self.slot) else {
            return Err(PlayerError::Engine(EngineError::NotPrepared));
        };
        let ActiveEngine {
            mut engine,
            session,
            generation,
        } = active;

        let joined = tokio::task::spawn_blocking(move || {
            let result = op(engine.as_mut());
            (engine, result)
        })
        .await;

        match joined {
            Ok((engine, result)) => {
                self.slot = EngineSlot::Active(ActiveEngine {
                    engine,
                    session,
                    generation,
                });
                Ok(result?)
            }
            Err(e) => {
                tracing::error!(error = %e, "Engine worker failed, dropping engine");
                self.halt_run();
                self.set_state(PlaybackState::Idle);
                Err(PlayerError::Engine(EngineError::Worker(e.to_string())))
            }
        }
    }

    /// Stop capture and poller and invalidate anything they already sent.
    fn halt_run(&mut self) {
        tracing::trace!(
            run = self.run,
            capture = self.capture.is_active(),
            poller = self.poller.is_running(),
            "Halting run"
        );
        self.capture.stop();
        self.poller.stop();
        self.run += 1;
    }

    /// Stop and release the current engine on the blocking pool. Returns
    /// whether there was one.
    async fn teardown_engine(&mut self) -> bool {
        self.halt_run();
        let EngineSlot::Active(active) = std::mem::take(&mut self.slot) else {
            return false;
        };
        let session = active.session;
        if let Err(e) = tokio::task::spawn_blocking(move || release_engine(active)).await {
            tracing::error!(%session, error = %e, "Engine release failed");
        }
        true
    }

    async fn shutdown(&mut self) {
        self.pending_load = None;
        self.teardown_engine().await;
        tracing::info!("Player shut down");
    }
}

fn release_engine(mut active: ActiveEngine) {
    if let Err(e) = active.engine.stop() {
        tracing::debug!(error = %e, "Engine stop failed");
    }
    active.engine.release();
    tracing::debug!(session = %active.session, "Engine released");
}

impl Drop for PlaybackController {
    /// Last resort when every handle was dropped: releases in place, which
    /// waits for the engine's decoder thread to notice.
    fn drop(&mut self) {
        self.halt_run();
        if let EngineSlot::Active(active) = std::mem::take(&mut self.slot) {
            release_engine(active);
        }
    }
}

/// Cloneable front end of a running [`PlaybackController`].
#[derive(Clone)]
pub struct PlayerHandle {
    inbox: UnboundedSender<Inbox>,
    state: watch::Receiver<PlaybackState>,
    frames: watch::Receiver<VisualizerFrame>,
    events: broadcast::Sender<PlayerEvent>,
    metadata: Arc<dyn MetadataProvider>,
    liked: Arc<dyn LikedStore>,
    resolution: usize,
}

impl PlayerHandle {
    async fn request<T>(
        &self,
        command: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T, PlayerError> {
        let (tx, rx) = oneshot::channel();
        self.inbox
            .send(Inbox::Command(command(tx)))
            .map_err(|_| PlayerError::ChannelClosed)?;
        rx.await.map_err(|_| PlayerError::ChannelClosed)?
    }

    /// Load a track, replacing whatever was loaded. Resolves once the track
    /// is ready or has failed.
    pub async fn load_track(&self, track: Track) -> Result<(), PlayerError> {
        self.request(|reply| Command::Load(track, reply)).await
    }

    pub async fn play(&self) -> Result<(), PlayerError> {
        self.request(Command::Play).await
    }

    pub async fn pause(&self) -> Result<(), PlayerError> {
        self.request(Command::Pause).await
    }

    /// Stop and release the engine. A no-op when nothing is loaded.
    pub async fn stop(&self) -> Result<(), PlayerError> {
        self.request(Command::Stop).await
    }

    /// Seek within the current track. Out-of-range positions are clamped.
    pub async fn seek(&self, position_ms: i64) -> Result<(), PlayerError> {
        self.request(|reply| Command::Seek(position_ms, reply)).await
    }

    /// Flip the liked flag of a track. Returns whether it is now liked.
    pub async fn toggle_like(&self, id: TrackId) -> Result<bool, PlayerError> {
        self.request(|reply| Command::ToggleLike(id, reply)).await
    }

    /// Release everything and stop the controller task.
    pub async fn shutdown(&self) -> Result<(), PlayerError> {
        let (tx, rx) = oneshot::channel();
        self.inbox
            .send(Inbox::Command(Command::Shutdown(tx)))
            .map_err(|_| PlayerError::ChannelClosed)?;
        rx.await.map_err(|_| PlayerError::ChannelClosed)
    }

    pub fn state(&self) -> PlaybackState {
        self.state.borrow().clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<PlaybackState> {
        self.state.clone()
    }

    pub fn frame(&self) -> VisualizerFrame {
        self.frames.borrow().clone()
    }

    pub fn subscribe_frames(&self) -> watch::Receiver<VisualizerFrame> {
        self.frames.clone()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<PlayerEvent> {
        self.events.subscribe()
    }

    pub fn liked(&self) -> watch::Receiver<LikedSet> {
        self.liked.observe_liked()
    }

    pub async fn tracks(&self) -> Result<Vec<Track>, PlayerError> {
        Ok(self.metadata.list_tracks().await?)
    }

    /// Upper bound a renderer can scale bars against.
    pub fn max_frame(&self) -> VisualizerFrame {
        waveform::max_processed(self.resolution)
    }
}
