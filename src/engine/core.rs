//! Player: the playback orchestration layer.
//!
//! A `Player` owns the audio clock, the instrument bank, the shared gain
//! stage and the host channels. Each call to `init_player` runs one session
//! end to end: gesture unlock, instrument loading, the loading overlay
//! fade, countdown, scheduling and the display loop.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tracing::Instrument as _;

use crate::api::{ControlMessage, HostEvent};
use crate::audio::{
    AudioClock, Clock, InstrumentBank, InstrumentKind, InstrumentLoader, PlayOptions,
    VolumeChannel,
};
use crate::config::AppConfig;
use crate::engine::backend::AudioDevice;
use crate::error::{log_playback_error, ErrorCode, PlaybackError};
use crate::managers::{BroadcastChannelManager, SessionManager};
use crate::playback::{
    BeatDisplay, CancelToken, CountdownClick, CountdownSequencer, DisplaySink, DisplaySlot,
    DisplaySynchronizer, EventScheduler, FrameSource, GestureSource, IntervalFrameSource,
    PlaybackSession, PlayerRequest, Sequence, SyncOutcome, Tempo, TempoControl,
};
use crate::telemetry::{SessionPhase, TelemetryHub};

pub const LOADING_TEXT: &str = "Loading sounds...";

/// Builds a fresh frame source for each session.
pub type FrameFactory = Arc<dyn Fn() -> Box<dyn FrameSource> + Send + Sync>;

/// Assembles a [`Player`] from its platform collaborators.
pub struct PlayerBuilder {
    config: AppConfig,
    device: Arc<dyn AudioDevice>,
    loader: Arc<dyn InstrumentLoader>,
    sink: Arc<dyn DisplaySink>,
    frames: Option<FrameFactory>,
    gestures: Option<Box<dyn GestureSource>>,
    tempo: Option<Arc<dyn TempoControl>>,
    telemetry: Option<Arc<TelemetryHub>>,
}

impl PlayerBuilder {
    pub fn config(mut self, config: AppConfig) -> Self {
        self.config = config;
        self
    }

    /// Frame callbacks; defaults to a timer at the configured frame rate.
    pub fn frame_source(mut self, factory: FrameFactory) -> Self {
        self.frames = Some(factory);
        self
    }

    /// User gestures, required on platforms that block audio until a tap.
    pub fn gestures(mut self, gestures: Box<dyn GestureSource>) -> Self {
        self.gestures = Some(gestures);
        self
    }

    /// Live tempo control read at the start of every session.
    pub fn tempo_control(mut self, tempo: Arc<dyn TempoControl>) -> Self {
        self.tempo = Some(tempo);
        self
    }

    pub fn telemetry(mut self, telemetry: Arc<TelemetryHub>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn build(self) -> Player {
        let config = self.config;
        let restricted = config
            .platform
            .restricted_audio
            .unwrap_or_else(|| self.device.requires_user_gesture());
        let clock = Arc::new(
            AudioClock::new(self.device)
                .with_unlock_timeout(Duration::from_millis(config.platform.unlock_timeout_ms)),
        );
        let telemetry = self.telemetry.unwrap_or_default();
        let frames_per_second = config.display.frames_per_second;
        let frames: FrameFactory = match self.frames {
            Some(frames) => frames,
            None => Arc::new(move || -> Box<dyn FrameSource> {
                Box::new(IntervalFrameSource::new(frames_per_second))
            }),
        };

        log::info!(
            "[Player] Created (restricted audio: {}, strategy: {:?})",
            restricted,
            config.scheduler.strategy
        );

        Player {
            volume: VolumeChannel::new(Arc::clone(&clock), Arc::clone(&telemetry)),
            instruments: InstrumentBank::new(self.loader),
            sink: self.sink,
            frames,
            gestures: Mutex::new(self.gestures),
            tempo: self.tempo,
            restricted,
            sessions: SessionManager::new(),
            broadcasts: BroadcastChannelManager::new(),
            telemetry,
            clock,
            config,
        }
    }
}

/// One rhythm trainer instance: one audio clock, one gain stage, at most
/// one running session.
pub struct Player {
    config: AppConfig,
    clock: Arc<AudioClock>,
    instruments: InstrumentBank,
    sink: Arc<dyn DisplaySink>,
    frames: FrameFactory,
    gestures: Mutex<Option<Box<dyn GestureSource>>>,
    tempo: Option<Arc<dyn TempoControl>>,
    restricted: bool,
    sessions: SessionManager,
    broadcasts: BroadcastChannelManager,
    telemetry: Arc<TelemetryHub>,
    volume: VolumeChannel,
}

impl Player {
    pub fn builder(
        device: Arc<dyn AudioDevice>,
        loader: Arc<dyn InstrumentLoader>,
        sink: Arc<dyn DisplaySink>,
    ) -> PlayerBuilder {
        PlayerBuilder {
            config: AppConfig::default(),
            device,
            loader,
            sink,
            frames: None,
            gestures: None,
            tempo: None,
            telemetry: None,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn clock(&self) -> &AudioClock {
        &self.clock
    }

    pub fn telemetry(&self) -> Arc<TelemetryHub> {
        Arc::clone(&self.telemetry)
    }

    pub fn is_restricted(&self) -> bool {
        self.restricted
    }

    pub fn is_playing(&self) -> bool {
        self.sessions.is_running()
    }

    pub fn subscribe_host_events(&self) -> broadcast::Receiver<HostEvent> {
        self.broadcasts.subscribe_host_events()
    }

    /// Sender for inbound control messages (`volume_update`).
    ///
    /// Messages are applied by a listener task started with the first
    /// session or preview.
    pub fn control_sender(&self) -> mpsc::Sender<ControlMessage> {
        self.broadcasts.control_sender()
    }

    /// Apply a control message synchronously.
    pub fn handle_control_message(&self, message: &ControlMessage) -> bool {
        self.volume.handle_message(message)
    }

    fn ensure_control_listener(&self) {
        if let Some(rx) = self.broadcasts.take_control_receiver() {
            self.volume.clone().spawn_listener(rx);
            log::debug!("[Player] Control listener started");
        }
    }

    /// Play a full session and wait for it to end.
    ///
    /// Returns the outcome of the display loop: `Completed` when the
    /// sequence ran out, `Cancelled` after [`stop`](Self::stop). Fatal
    /// errors are rendered in the loading text, published as
    /// `PlaybackFailed` and returned.
    pub async fn init_player(&self, request: PlayerRequest) -> Result<SyncOutcome, PlaybackError> {
        self.ensure_control_listener();

        let sequence = match self.build_sequence(&request) {
            Ok(sequence) => sequence,
            Err(err) => {
                self.fail(None, &err);
                return Err(err);
            }
        };

        // Held across the whole session: if this future is dropped, the
        // lease cancels every pending note and the display loop.
        let lease = self.sessions.lease()?;
        let id = lease.id();
        let span = tracing::info_span!("session", id, bpm = sequence.tempo().bpm());
        let result = self
            .run_session(id, &request, &sequence, lease.cancel_token())
            .instrument(span)
            .await;
        drop(lease);

        match result {
            Ok(SyncOutcome::Completed) => {
                self.telemetry.record_session_phase(id, SessionPhase::Completed);
                self.broadcasts
                    .publish(HostEvent::PlaybackComplete { session_id: id });
                Ok(SyncOutcome::Completed)
            }
            Ok(SyncOutcome::Cancelled) | Err(PlaybackError::Cancelled) => {
                self.telemetry.record_session_phase(id, SessionPhase::Cancelled);
                self.broadcasts
                    .publish(HostEvent::PlaybackStopped { session_id: id });
                Ok(SyncOutcome::Cancelled)
            }
            Err(err) => {
                self.fail(Some(id), &err);
                Err(err)
            }
        }
    }

    fn build_sequence(&self, request: &PlayerRequest) -> Result<Sequence, PlaybackError> {
        let tempo = Tempo::resolve(request.bpm, self.tempo.as_deref())?;
        Sequence::from_request(
            request,
            tempo,
            &self.config.playback,
            self.config.scheduler.downbeat_tolerance,
        )
    }

    async fn run_session(
        &self,
        id: u64,
        request: &PlayerRequest,
        sequence: &Sequence,
        cancel: &CancelToken,
    ) -> Result<SyncOutcome, PlaybackError> {
        let countdown = CountdownSequencer::new(
            Arc::clone(&self.sink),
            CountdownClick {
                note: self.config.playback.click_note.clone(),
                duration: self.config.playback.click_duration,
                gain: request
                    .metronome_volume
                    .unwrap_or(self.config.playback.metronome_volume)
                    .clamp(0.0, 1.0),
            },
        );

        let clock = self.unlock_clock(id, &countdown, cancel).await?;
        self.telemetry.record_session_phase(id, SessionPhase::AudioUnlocked);

        self.sink.set_style(DisplaySlot::LoadingOverlay, "display", "flex");
        self.sink.set_style(DisplaySlot::LoadingOverlay, "opacity", "1");
        self.sink.set_style(DisplaySlot::LoadingText, "color", "");
        self.sink.set_text(DisplaySlot::LoadingText, LOADING_TEXT);

        clock.ensure_running()?;
        let instruments = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PlaybackError::Cancelled),
            loaded = self.instruments.load_all() => loaded?,
        };
        self.telemetry
            .record_session_phase(id, SessionPhase::InstrumentsLoaded);

        self.volume.apply(request.volume);

        let beats = sequence.time_signature().beats_per_measure();
        let mut display = BeatDisplay::new(Arc::clone(&self.sink), sequence.labels().to_vec(), beats)
            .with_lookahead(self.config.display.lookahead);
        display.reset();

        self.sink.set_style(DisplaySlot::LoadingOverlay, "opacity", "0");
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PlaybackError::Cancelled),
            _ = tokio::time::sleep(Duration::from_millis(self.config.display.fade_ms)) => {}
        }
        self.sink.set_style(DisplaySlot::LoadingOverlay, "display", "none");

        self.telemetry
            .record_session_phase(id, SessionPhase::CountdownStarted);
        let start_instant = countdown
            .run(
                &clock,
                &instruments.percussion,
                beats,
                sequence.tempo().seconds_per_beat(),
                cancel,
            )
            .await?;

        let session = PlaybackSession::new(id, sequence, start_instant);
        let scheduler = EventScheduler::new(
            clock.clone(),
            instruments,
            self.config.scheduler.strategy,
            Arc::clone(&self.telemetry),
        );
        let mut scheduled = scheduler.schedule_with_token(sequence, start_instant, cancel.clone());

        self.broadcasts.publish(HostEvent::PlaybackStarted {
            session_id: id,
            bpm: sequence.tempo().bpm(),
        });
        self.telemetry.record_session_phase(id, SessionPhase::Playing);

        let sync = DisplaySynchronizer::new(clock, display)
            .with_min_frame_interval(self.config.display.min_frame_interval_ms)
            .with_keep_alive(self.restricted);
        let outcome = sync
            .start(session, (self.frames)(), cancel.clone())
            .finished()
            .await;

        scheduled.cancel();
        if scheduled.failure_count() > 0 {
            log::warn!(
                "[Player] Session {} finished with {} failed notes",
                id,
                scheduled.failure_count()
            );
        }
        Ok(outcome)
    }

    /// Running clock for a session, waiting for a gesture where the
    /// platform demands one.
    async fn unlock_clock(
        &self,
        id: u64,
        countdown: &CountdownSequencer,
        cancel: &CancelToken,
    ) -> Result<Clock, PlaybackError> {
        if !self.restricted {
            return Ok(self.clock.acquire()?);
        }
        if let Some(clock) = self.clock.get().filter(|clock| !clock.is_suspended()) {
            return Ok(clock);
        }

        self.telemetry
            .record_session_phase(id, SessionPhase::AwaitingGesture);
        let mut gestures = self
            .gestures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(PlaybackError::NoGestureSource)?;

        let result = countdown
            .await_unlock(&self.clock, gestures.as_mut(), cancel)
            .await;
        *self.gestures.lock().unwrap_or_else(PoisonError::into_inner) = Some(gestures);
        result
    }

    fn fail(&self, id: Option<u64>, err: &PlaybackError) {
        log_playback_error(err, "init_player");
        self.sink.set_style(DisplaySlot::LoadingOverlay, "display", "flex");
        self.sink.set_style(DisplaySlot::LoadingOverlay, "opacity", "1");
        self.sink
            .set_text(DisplaySlot::LoadingText, &format!("Error: {}", err.message()));
        self.sink.set_style(
            DisplaySlot::LoadingText,
            "color",
            &self.config.display.error_color,
        );

        self.telemetry.record_error(err.code(), err.message());
        if let Some(id) = id {
            self.telemetry.record_session_phase(id, SessionPhase::Failed);
        }
        self.broadcasts.publish(HostEvent::PlaybackFailed {
            code: err.code(),
            message: err.message(),
        });
    }

    /// Play a single note right away (the "test sound" button).
    ///
    /// Loads the instrument on first use. On restricted platforms this must
    /// be called from a user gesture: it unlocks audio itself.
    pub async fn play_note(
        &self,
        note: &str,
        duration: f64,
        gain: f32,
        instrument: InstrumentKind,
    ) -> Result<(), PlaybackError> {
        self.ensure_control_listener();

        let clock = self.clock.acquire()?;
        if self.restricted && clock.is_suspended() {
            clock.unlock_for_restricted_platform().await?;
        }
        clock.ensure_running()?;

        let instrument = self.instruments.load(instrument).await?;
        let options = PlayOptions {
            duration,
            gain: gain.clamp(0.0, 1.0),
        };
        instrument
            .play(note, clock.current_time(), options)
            .map_err(|err| {
                log_playback_error(&err, "play_note");
                err
            })?;
        log::info!("[Player] Previewed {} on {}", note, instrument.kind());
        Ok(())
    }

    /// Cancel the running session.
    ///
    /// The display loop stops and resets, pending notes are dropped and the
    /// audio clock keeps running. Returns the id of the stopped session.
    pub fn stop(&self) -> Result<u64, PlaybackError> {
        self.sessions.stop()
    }
}
