//! EventScheduler - hands every event of a sequence to its instrument
//!
//! Two delivery strategies exist. Native delivery passes the absolute fire
//! time straight to the instrument's timed-playback primitive and keeps the
//! returned voice so it can be silenced on cancel. Deferred delivery arms one
//! task per event that sleeps until the fire time and then plays "now"; it is
//! the fallback for instruments without timed playback. Either way a note
//! never reaches its instrument before `start_instant + offset`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use super::cancel::CancelToken;
use super::sequence::{MusicalEvent, Sequence};
use crate::audio::{Clock, Instrument, LoadedInstruments, PlayOptions, Voice};
use crate::config::DeliveryStrategy;
use crate::error::{log_playback_error, PlaybackError};
use crate::telemetry::TelemetryHub;

/// Remaining time below which a deferred note fires instead of sleeping again
const FIRE_EPSILON: f64 = 1e-6;

/// Submits sequences to the loaded instruments.
pub struct EventScheduler {
    clock: Clock,
    instruments: LoadedInstruments,
    strategy: DeliveryStrategy,
    telemetry: Arc<TelemetryHub>,
}

impl EventScheduler {
    pub fn new(
        clock: Clock,
        instruments: LoadedInstruments,
        strategy: DeliveryStrategy,
        telemetry: Arc<TelemetryHub>,
    ) -> Self {
        Self {
            clock,
            instruments,
            strategy,
            telemetry,
        }
    }

    pub fn schedule(&self, sequence: &Sequence, start_instant: f64) -> ScheduledSet {
        self.schedule_with_token(sequence, start_instant, CancelToken::new())
    }

    /// Schedule every event at `start_instant + offset`.
    ///
    /// Cancelling `token` (or the returned set) prevents every deferred note
    /// that has not fired yet.
    pub fn schedule_with_token(
        &self,
        sequence: &Sequence,
        start_instant: f64,
        token: CancelToken,
    ) -> ScheduledSet {
        let failures = Arc::new(AtomicUsize::new(0));
        let mut native = Vec::new();
        let mut tasks = Vec::new();

        for event in sequence.events() {
            let instrument = Arc::clone(self.instruments.get(event.instrument()));
            let fire_time = start_instant + event.offset();

            if self.strategy == DeliveryStrategy::Native && instrument.supports_timed_playback() {
                let options = play_options(event);
                match instrument.play(event.note(), fire_time, options) {
                    Ok(voice) => native.push(NativeVoice { fire_time, voice }),
                    Err(err) => report_failure(&self.telemetry, &failures, event, &err),
                }
            } else {
                tasks.push(self.spawn_deferred(
                    instrument,
                    event.clone(),
                    fire_time,
                    token.clone(),
                    Arc::clone(&failures),
                ));
            }
        }

        log::info!(
            "[Scheduler] Scheduled {} events from {:.3}s ({} native, {} deferred)",
            sequence.events().len(),
            start_instant,
            native.len(),
            tasks.len()
        );

        ScheduledSet {
            token,
            clock: self.clock.clone(),
            native,
            tasks,
            failures,
        }
    }

    fn spawn_deferred(
        &self,
        instrument: Arc<dyn Instrument>,
        event: MusicalEvent,
        fire_time: f64,
        token: CancelToken,
        failures: Arc<AtomicUsize>,
    ) -> JoinHandle<()> {
        let clock = self.clock.clone();
        let telemetry = Arc::clone(&self.telemetry);

        tokio::spawn(async move {
            loop {
                let remaining = fire_time - clock.current_time();
                if remaining <= FIRE_EPSILON {
                    break;
                }
                tokio::select! {
                    biased;
                    _ = token.cancelled() => return,
                    _ = tokio::time::sleep(Duration::from_secs_f64(remaining)) => {}
                }
                if clock.is_suspended() {
                    if let Err(err) = clock.ensure_running() {
                        log::debug!("[Scheduler] Clock still suspended: {}", err);
                    }
                }
            }

            if token.is_cancelled() {
                return;
            }

            let now = clock.current_time();
            telemetry.record_dispatch_lateness(now - fire_time);
            if let Err(err) = instrument.play(event.note(), now, play_options(&event)) {
                report_failure(&telemetry, &failures, &event, &err);
            }
        })
    }
}

fn play_options(event: &MusicalEvent) -> PlayOptions {
    PlayOptions {
        duration: event.duration(),
        gain: event.gain(),
    }
}

fn report_failure(
    telemetry: &TelemetryHub,
    failures: &AtomicUsize,
    event: &MusicalEvent,
    err: &PlaybackError,
) {
    failures.fetch_add(1, Ordering::Relaxed);
    log_playback_error(err, "schedule");
    telemetry.record_note_failure(event.instrument(), event.note());
}

struct NativeVoice {
    fire_time: f64,
    voice: Box<dyn Voice>,
}

/// Handle on everything one `schedule` call submitted.
pub struct ScheduledSet {
    token: CancelToken,
    clock: Clock,
    native: Vec<NativeVoice>,
    tasks: Vec<JoinHandle<()>>,
    failures: Arc<AtomicUsize>,
}

impl ScheduledSet {
    /// Notes that failed to play so far.
    pub fn failure_count(&self) -> usize {
        self.failures.load(Ordering::Relaxed)
    }

    pub fn token(&self) -> &CancelToken {
        &self.token
    }

    /// Stop everything that has not started yet.
    ///
    /// Pending deferred notes never reach their instrument afterwards and
    /// native voices whose fire time is still ahead are stopped. Notes that
    /// are already sounding finish on their own. Idempotent, and also run
    /// when the set is dropped.
    pub fn cancel(&mut self) {
        self.token.cancel();
        for task in self.tasks.drain(..) {
            task.abort();
        }

        let now = self.clock.current_time();
        let mut stopped = 0;
        for native in self.native.drain(..) {
            if native.fire_time > now {
                native.voice.stop();
                stopped += 1;
            }
        }
        if stopped > 0 {
            log::debug!("[Scheduler] Stopped {} pending voices", stopped);
        }
    }

    /// Wait for every deferred note to fire or be cancelled.
    pub async fn join(&mut self) {
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
    }
}

impl Drop for ScheduledSet {
    fn drop(&mut self) {
        self.cancel();
    }
}
