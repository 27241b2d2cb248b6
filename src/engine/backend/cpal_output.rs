//! cpal-backed output device.
//!
//! The output callback owns the clock: it advances an atomic frame counter by
//! every buffer it renders, so `current_time` is exactly the amount of audio
//! played so far and freezes while the stream is paused.
//!
//! Voices take two hops. `submit` hands them to the stream thread, whose
//! [`VoiceFeeder`] keeps every not-yet-due voice in a backlog ordered by start
//! frame. Shortly before a voice is due the feeder moves it into a lock-free
//! `rtrb` queue read by the callback's [`VoiceMixer`]. Finished voices travel
//! back through a second queue so their sample buffers are released off the
//! audio thread.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use crate::audio::sampler::{ScheduledVoice, VoiceOutput};
use crate::error::AudioError;

use super::AudioDevice;

/// Capacity of the queue from the feeder to the callback
const MIXER_QUEUE_CAPACITY: usize = 256;

/// Voices the callback mixes at once, counting those about to start
const MAX_ACTIVE_VOICES: usize = 64;

/// Capacity of the queue returning finished voices to the feeder
const RETIRED_QUEUE_CAPACITY: usize = MIXER_QUEUE_CAPACITY + MAX_ACTIVE_VOICES;

/// How far ahead of the playhead voices are handed to the callback
const FEED_AHEAD_SECONDS: f64 = 0.2;

/// Feeder wake-up period when no commands arrive
const FEED_INTERVAL: Duration = Duration::from_millis(5);

/// Sentinel for "no pending gain change"
const NO_PENDING_FRAME: u64 = u64::MAX;

/// State shared between the control side and the audio callback.
struct RenderShared {
    frame_counter: AtomicU64,
    sample_rate: AtomicU32,
    gain_bits: AtomicU32,
    pending_gain_bits: AtomicU32,
    pending_gain_frame: AtomicU64,
    suspended: AtomicBool,
}

impl RenderShared {
    fn new() -> Self {
        Self {
            frame_counter: AtomicU64::new(0),
            sample_rate: AtomicU32::new(0),
            gain_bits: AtomicU32::new(1.0f32.to_bits()),
            pending_gain_bits: AtomicU32::new(1.0f32.to_bits()),
            pending_gain_frame: AtomicU64::new(NO_PENDING_FRAME),
            suspended: AtomicBool::new(false),
        }
    }

    /// Gain for `frame`, promoting a pending change once its frame is reached.
    fn gain_at(&self, frame: u64) -> f32 {
        let pending = self.pending_gain_frame.load(Ordering::Acquire);
        if pending != NO_PENDING_FRAME && frame >= pending {
            let bits = self.pending_gain_bits.load(Ordering::Relaxed);
            self.gain_bits.store(bits, Ordering::Relaxed);
            let _ = self.pending_gain_frame.compare_exchange(
                pending,
                NO_PENDING_FRAME,
                Ordering::AcqRel,
                Ordering::Relaxed,
            );
        }
        f32::from_bits(self.gain_bits.load(Ordering::Relaxed))
    }
}

enum StreamCommand {
    Play,
    Pause,
    Voice(ScheduledVoice),
    Shutdown,
}

struct StreamControl {
    commands: mpsc::Sender<StreamCommand>,
}

/// Wire a feeder to a mixer through the two voice queues.
fn voice_pipeline() -> (VoiceFeeder, VoiceMixer) {
    let (to_mixer, incoming) = rtrb::RingBuffer::new(MIXER_QUEUE_CAPACITY);
    let (retire, retired) = rtrb::RingBuffer::new(RETIRED_QUEUE_CAPACITY);
    (
        VoiceFeeder {
            backlog: Vec::new(),
            to_mixer,
            retired,
        },
        VoiceMixer {
            incoming,
            retire,
            active: Vec::with_capacity(MAX_ACTIVE_VOICES),
        },
    )
}

/// Stream-thread side of the voice pipeline.
struct VoiceFeeder {
    /// Ordered by descending start frame; the next voice due is last.
    backlog: Vec<ScheduledVoice>,
    to_mixer: rtrb::Producer<ScheduledVoice>,
    retired: rtrb::Consumer<ScheduledVoice>,
}

impl VoiceFeeder {
    fn accept(&mut self, voice: ScheduledVoice) {
        let at = self
            .backlog
            .partition_point(|queued| queued.start_frame > voice.start_frame);
        self.backlog.insert(at, voice);
    }

    /// Release finished voices, then hand the mixer every voice starting
    /// before `playhead + horizon` that fits in its queue. Stopped voices
    /// never leave the backlog. Returns the number of voices handed over.
    fn pump(&mut self, playhead: u64, horizon: u64) -> usize {
        while self.retired.pop().is_ok() {}

        let limit = playhead.saturating_add(horizon);
        let mut fed = 0;
        while let Some(next) = self.backlog.last() {
            if next.stopped.load(Ordering::Relaxed) {
                self.backlog.pop();
                continue;
            }
            if next.start_frame >= limit || self.to_mixer.is_full() {
                break;
            }
            let Some(voice) = self.backlog.pop() else { break };
            if self.to_mixer.push(voice).is_err() {
                break;
            }
            fed += 1;
        }
        fed
    }

    fn pending(&self) -> usize {
        self.backlog.len()
    }
}

struct ActiveVoice {
    voice: ScheduledVoice,
    position: usize,
}

/// Mixer state living on the audio thread.
struct VoiceMixer {
    incoming: rtrb::Consumer<ScheduledVoice>,
    retire: rtrb::Producer<ScheduledVoice>,
    active: Vec<ActiveVoice>,
}

impl VoiceMixer {
    fn render(&mut self, data: &mut [f32], channels: usize, shared: &RenderShared) {
        // Voices beyond the active limit wait in the queue for a free slot.
        while self.active.len() < MAX_ACTIVE_VOICES {
            match self.incoming.pop() {
                Ok(voice) => self.active.push(ActiveVoice { voice, position: 0 }),
                Err(_) => break,
            }
        }

        let frame_count = data.len() / channels;
        let first_frame = shared.frame_counter.load(Ordering::Relaxed);

        for i in 0..frame_count {
            let frame_idx = first_frame + i as u64;
            let gain = shared.gain_at(frame_idx);
            let mut sample = 0.0f32;

            for active in self.active.iter_mut() {
                if frame_idx < active.voice.start_frame
                    || active.position >= active.voice.samples.len()
                    || active.voice.stopped.load(Ordering::Relaxed)
                {
                    continue;
                }
                sample += active.voice.samples[active.position] * active.voice.gain;
                active.position += 1;
            }

            let value = (sample * gain).clamp(-1.0, 1.0);
            for ch in 0..channels {
                data[i * channels + ch] = value;
            }
        }

        let mut i = 0;
        while i < self.active.len() {
            let active = &self.active[i];
            if active.position < active.voice.samples.len()
                && !active.voice.stopped.load(Ordering::Relaxed)
            {
                i += 1;
                continue;
            }
            let finished = self.active.swap_remove(i);
            let _ = self.retire.push(finished.voice);
        }

        shared
            .frame_counter
            .fetch_add(frame_count as u64, Ordering::Relaxed);
    }
}

/// Desktop output device.
///
/// `cpal::Stream` is not `Send` on every platform, so the stream lives on a
/// dedicated thread and is driven through a command channel.
pub struct CpalDevice {
    shared: Arc<RenderShared>,
    control: Mutex<Option<StreamControl>>,
}

impl CpalDevice {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(RenderShared::new()),
            control: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<StreamControl>> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn send(&self, command: StreamCommand) -> Result<(), AudioError> {
        let control = self.lock();
        let control = control.as_ref().ok_or(AudioError::NotAcquired)?;
        control
            .commands
            .send(command)
            .map_err(|_| AudioError::StreamFailure {
                reason: "audio thread has exited".to_string(),
            })
    }
}

impl Default for CpalDevice {
    fn default() -> Self {
        Self::new()
    }
}

fn build_output_stream(
    shared: Arc<RenderShared>,
    mut mixer: VoiceMixer,
) -> Result<(cpal::Stream, u32), AudioError> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| AudioError::DeviceUnavailable {
            reason: "No default output device found".to_string(),
        })?;

    let config = device
        .default_output_config()
        .map_err(|e| AudioError::DeviceUnavailable {
            reason: format!("Failed to get default output config: {:?}", e),
        })?;

    let stream_config: cpal::StreamConfig = config.clone().into();
    let channels = stream_config.channels as usize;
    let sample_rate = stream_config.sample_rate.0;

    let err_fn = |err: cpal::StreamError| log::error!("[CpalDevice] Output stream error: {}", err);

    let stream = match config.sample_format() {
        cpal::SampleFormat::F32 => device.build_output_stream(
            &stream_config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                mixer.render(data, channels, &shared);
            },
            err_fn,
            None,
        ),
        other => {
            return Err(AudioError::InitFailed {
                reason: format!("Only F32 output is supported, device offers {:?}", other),
            })
        }
    }
    .map_err(|e| AudioError::InitFailed {
        reason: format!("{:?}", e),
    })?;

    Ok((stream, sample_rate))
}

impl AudioDevice for CpalDevice {
    fn open(&self) -> Result<(), AudioError> {
        let mut control = self.lock();
        if control.is_some() {
            return Ok(());
        }

        let (mut feeder, mixer) = voice_pipeline();
        let (command_tx, command_rx) = mpsc::channel::<StreamCommand>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<u32, AudioError>>();
        let shared = Arc::clone(&self.shared);

        thread::Builder::new()
            .name("rhythm-audio".to_string())
            .spawn(move || {
                let (stream, rate) = match build_output_stream(Arc::clone(&shared), mixer) {
                    Ok((stream, rate)) => {
                        if let Err(e) = stream.play() {
                            let _ = ready_tx.send(Err(AudioError::InitFailed {
                                reason: format!("{:?}", e),
                            }));
                            return;
                        }
                        let _ = ready_tx.send(Ok(rate));
                        (stream, rate)
                    }
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };
                let horizon = (FEED_AHEAD_SECONDS * rate as f64).ceil() as u64;

                loop {
                    let result: Result<(), Box<dyn std::fmt::Debug>> = match command_rx.recv_timeout(FEED_INTERVAL) {
                        Ok(StreamCommand::Play) => stream.play().map_err(|e| Box::new(e) as Box<dyn std::fmt::Debug>),
                        Ok(StreamCommand::Pause) => stream.pause().map_err(|e| Box::new(e) as Box<dyn std::fmt::Debug>),
                        Ok(StreamCommand::Voice(voice)) => {
                            feeder.accept(voice);
                            Ok(())
                        }
                        Ok(StreamCommand::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                        Err(RecvTimeoutError::Timeout) => Ok(()),
                    };
                    if let Err(e) = result {
                        log::error!("[CpalDevice] Stream command failed: {:?}", e);
                    }
                    feeder.pump(shared.frame_counter.load(Ordering::Relaxed), horizon);
                }
                log::debug!(
                    "[CpalDevice] Audio thread exiting with {} voices unplayed",
                    feeder.pending()
                );
            })
            .map_err(|e| AudioError::InitFailed {
                reason: format!("Failed to spawn audio thread: {}", e),
            })?;

        let sample_rate = ready_rx.recv().map_err(|_| AudioError::InitFailed {
            reason: "audio thread exited during startup".to_string(),
        })??;

        self.shared.sample_rate.store(sample_rate, Ordering::Release);
        self.shared.suspended.store(false, Ordering::Release);
        *control = Some(StreamControl {
            commands: command_tx,
        });
        log::info!("[CpalDevice] Output stream running at {} Hz", sample_rate);
        Ok(())
    }

    fn current_time(&self) -> f64 {
        let rate = self.shared.sample_rate.load(Ordering::Acquire);
        if rate == 0 {
            return 0.0;
        }
        self.shared.frame_counter.load(Ordering::Relaxed) as f64 / rate as f64
    }

    fn is_suspended(&self) -> bool {
        self.shared.suspended.load(Ordering::Acquire)
    }

    fn suspend(&self) -> Result<(), AudioError> {
        self.send(StreamCommand::Pause)?;
        self.shared.suspended.store(true, Ordering::Release);
        Ok(())
    }

    fn resume(&self) -> Result<(), AudioError> {
        self.send(StreamCommand::Play)?;
        self.shared.suspended.store(false, Ordering::Release);
        Ok(())
    }

    fn emit_silent_buffer(&self) -> Result<(), AudioError> {
        // Desktop hosts never gate output on a gesture.
        Ok(())
    }

    fn set_gain_at_time(&self, value: f32, at_time: f64) {
        let rate = self.shared.sample_rate.load(Ordering::Acquire) as f64;
        let frame = (at_time.max(0.0) * rate).round() as u64;
        if frame <= self.shared.frame_counter.load(Ordering::Relaxed) {
            self.shared.gain_bits.store(value.to_bits(), Ordering::Relaxed);
            self.shared
                .pending_gain_frame
                .store(NO_PENDING_FRAME, Ordering::Release);
        } else {
            self.shared
                .pending_gain_bits
                .store(value.to_bits(), Ordering::Relaxed);
            self.shared.pending_gain_frame.store(frame, Ordering::Release);
        }
    }
}

impl VoiceOutput for CpalDevice {
    fn sample_rate(&self) -> u32 {
        self.shared.sample_rate.load(Ordering::Acquire)
    }

    fn output_time(&self) -> f64 {
        self.current_time()
    }

    fn submit(&self, voice: ScheduledVoice) -> Result<(), AudioError> {
        self.send(StreamCommand::Voice(voice))
    }
}

impl Drop for CpalDevice {
    fn drop(&mut self) {
        if let Some(control) = self.lock().take() {
            let _ = control.commands.send(StreamCommand::Shutdown);
        }
    }
}
