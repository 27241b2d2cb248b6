//! DisplaySynchronizer - frame-driven beat and chord indicator
//!
//! A cooperative loop woken once per rendered frame. Each tick reads the
//! audio clock, derives the beat/measure cursor and writes to the display
//! only when something changed, so identical frames cost nothing. When the
//! session runs out (or is cancelled) the display returns to its
//! pre-playback state.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};

use super::cancel::CancelToken;
use super::session::{BeatCursor, PlaybackSession};
use crate::audio::Clock;

const BEAT_ON: &str = "●";
const BEAT_OFF: &str = "○";

/// Logical display elements a host page exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplaySlot {
    BeatIndicator,
    CurrentChord,
    NextChord1,
    NextChord2,
    NextChord3,
    LoadingOverlay,
    LoadingText,
    Countdown,
}

impl DisplaySlot {
    /// Current chord followed by the look-ahead labels.
    pub const CHORDS: [DisplaySlot; 4] = [
        DisplaySlot::CurrentChord,
        DisplaySlot::NextChord1,
        DisplaySlot::NextChord2,
        DisplaySlot::NextChord3,
    ];

    /// Element id on the host page.
    pub fn element_id(&self) -> &'static str {
        match self {
            DisplaySlot::BeatIndicator => "beat-display",
            DisplaySlot::CurrentChord => "current-chord",
            DisplaySlot::NextChord1 => "next-chord1",
            DisplaySlot::NextChord2 => "next-chord2",
            DisplaySlot::NextChord3 => "next-chord3",
            DisplaySlot::LoadingOverlay => "loading-overlay",
            DisplaySlot::LoadingText => "loading-text",
            DisplaySlot::Countdown => "countdown",
        }
    }
}

/// Where display writes go: a DOM bridge, a terminal, a test recorder.
pub trait DisplaySink: Send + Sync {
    fn set_text(&self, slot: DisplaySlot, text: &str);
    fn set_style(&self, slot: DisplaySlot, property: &str, value: &str);
}

/// Beat indicator plus chord labels, remembering what is on screen.
pub struct BeatDisplay {
    sink: Arc<dyn DisplaySink>,
    labels: Vec<String>,
    beats_per_measure: u32,
    lookahead: usize,
    shown_beat: Option<i64>,
    shown_measure: Option<usize>,
}

impl BeatDisplay {
    pub fn new(sink: Arc<dyn DisplaySink>, labels: Vec<String>, beats_per_measure: u32) -> Self {
        Self {
            sink,
            labels,
            beats_per_measure,
            lookahead: DisplaySlot::CHORDS.len() - 1,
            shown_beat: None,
            shown_measure: None,
        }
    }

    /// Limit how many upcoming chords are shown (at most three).
    pub fn with_lookahead(mut self, lookahead: usize) -> Self {
        self.lookahead = lookahead.min(DisplaySlot::CHORDS.len() - 1);
        self
    }

    /// Beat indicator text: beats up to and including `beat` are lit.
    /// `-1` renders every beat dark.
    pub fn beat_text(&self, beat: i64) -> String {
        (0..self.beats_per_measure as i64)
            .map(|i| if i <= beat { BEAT_ON } else { BEAT_OFF })
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn label(&self, index: usize) -> &str {
        self.labels.get(index).map(String::as_str).unwrap_or("")
    }

    fn write_beat(&mut self, beat: i64) {
        let text = self.beat_text(beat);
        self.sink.set_text(DisplaySlot::BeatIndicator, &text);
        self.shown_beat = Some(beat);
    }

    fn write_chords(&mut self, measure: usize) {
        for (offset, slot) in DisplaySlot::CHORDS.iter().enumerate() {
            let text = if offset <= self.lookahead {
                self.label(measure + offset)
            } else {
                ""
            };
            self.sink.set_text(*slot, text);
        }
        self.shown_measure = Some(measure);
    }

    /// Pre-playback state: no beat lit, chords from the first measure.
    pub fn reset(&mut self) {
        self.write_beat(-1);
        self.write_chords(0);
    }

    /// Bring the display in line with `cursor`. Returns the number of
    /// writes issued; zero when nothing changed.
    pub fn update(&mut self, cursor: BeatCursor) -> usize {
        let mut writes = 0;
        if self.shown_beat != Some(cursor.beat as i64) {
            self.write_beat(cursor.beat as i64);
            writes += 1;
        }
        if self.shown_measure != Some(cursor.measure) {
            self.write_chords(cursor.measure);
            writes += DisplaySlot::CHORDS.len();
        }
        writes
    }
}

/// Source of frame callbacks. Yields a frame timestamp in milliseconds, or
/// `None` once the host stops rendering.
pub trait FrameSource: Send {
    fn next_frame(&mut self) -> BoxFuture<'_, Option<f64>>;
}

/// Frame source ticking at a fixed rate on the tokio timer.
pub struct IntervalFrameSource {
    interval: Interval,
    origin: Instant,
}

impl IntervalFrameSource {
    pub fn new(frames_per_second: u32) -> Self {
        let period = Duration::from_secs_f64(1.0 / frames_per_second.max(1) as f64);
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self {
            interval,
            origin: Instant::now(),
        }
    }
}

impl FrameSource for IntervalFrameSource {
    fn next_frame(&mut self) -> BoxFuture<'_, Option<f64>> {
        Box::pin(async move {
            let tick = self.interval.tick().await;
            Some(tick.saturating_duration_since(self.origin).as_secs_f64() * 1000.0)
        })
    }
}

/// How a display loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Completed,
    Cancelled,
}

/// Running display loop. Dropping the task cancels the loop, which then
/// resets the display and stops re-arming.
pub struct DisplayTask {
    handle: JoinHandle<SyncOutcome>,
    cancel: CancelToken,
    rendered: Arc<AtomicUsize>,
}

impl DisplayTask {
    /// Wait for the loop to end.
    pub async fn finished(mut self) -> SyncOutcome {
        match (&mut self.handle).await {
            Ok(outcome) => outcome,
            Err(err) => {
                log::warn!("[Display] Sync task ended abnormally: {}", err);
                SyncOutcome::Cancelled
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Frames that passed the minimum-interval guard and updated the display.
    pub fn frames_rendered(&self) -> usize {
        self.rendered.load(Ordering::Relaxed)
    }
}

impl Drop for DisplayTask {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Drives a [`BeatDisplay`] from the audio clock.
pub struct DisplaySynchronizer {
    clock: Clock,
    display: BeatDisplay,
    min_frame_interval_ms: Option<f64>,
    keep_alive: bool,
}

impl DisplaySynchronizer {
    pub fn new(clock: Clock, display: BeatDisplay) -> Self {
        Self {
            clock,
            display,
            min_frame_interval_ms: None,
            keep_alive: false,
        }
    }

    /// Discard frames arriving less than `interval_ms` after the last one.
    pub fn with_min_frame_interval(mut self, interval_ms: f64) -> Self {
        self.min_frame_interval_ms = (interval_ms > 0.0).then_some(interval_ms);
        self
    }

    /// Resume the clock from the frame loop if the platform suspends it.
    pub fn with_keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn start(
        self,
        session: PlaybackSession,
        frames: Box<dyn FrameSource>,
        cancel: CancelToken,
    ) -> DisplayTask {
        let rendered = Arc::new(AtomicUsize::new(0));
        DisplayTask {
            handle: tokio::spawn(self.run(session, frames, cancel.clone(), Arc::clone(&rendered))),
            cancel,
            rendered,
        }
    }

    async fn run(
        mut self,
        session: PlaybackSession,
        mut frames: Box<dyn FrameSource>,
        cancel: CancelToken,
        rendered: Arc<AtomicUsize>,
    ) -> SyncOutcome {
        log::debug!(
            "[Display] Session {} sync started, {} measures",
            session.id(),
            session.measures()
        );
        let mut last_frame_ms: Option<f64> = None;

        loop {
            let frame = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                frame = frames.next_frame() => frame,
            };
            let Some(timestamp_ms) = frame else {
                self.display.reset();
                log::debug!("[Display] Session {} sync cancelled", session.id());
                return SyncOutcome::Cancelled;
            };

            let now = self.clock.current_time();
            if session.is_complete(now) {
                self.display.reset();
                log::info!("[Display] Session {} complete", session.id());
                return SyncOutcome::Completed;
            }

            if let Some(min_interval) = self.min_frame_interval_ms {
                if let Some(last) = last_frame_ms {
                    if timestamp_ms - last < min_interval {
                        continue;
                    }
                }
                last_frame_ms = Some(timestamp_ms);
            }

            if self.keep_alive && self.clock.is_suspended() {
                if let Err(err) = self.clock.ensure_running() {
                    log::debug!("[Display] Keep-alive resume failed: {}", err);
                }
            }

            self.display.update(session.cursor_at(now));
            rendered.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::AudioClock;
    use crate::engine::backend::StubAudioDevice;
    use crate::playback::sequence::{Sequence, Tempo, TimeSignature};
    use crate::testing::RecordingSink;

    fn labels(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn display(sink: &Arc<RecordingSink>, chords: &[&str], beats: u32) -> BeatDisplay {
        BeatDisplay::new(sink.clone(), labels(chords), beats)
    }

    #[test]
    fn beat_text_lights_beats_up_to_current() {
        let sink = Arc::new(RecordingSink::new());
        let display = display(&sink, &["C"], 4);
        assert_eq!(display.beat_text(-1), "○ ○ ○ ○");
        assert_eq!(display.beat_text(1), "● ● ○ ○");
        assert_eq!(display.beat_text(3), "● ● ● ●");
    }

    #[test]
    fn identical_cursor_produces_no_writes() {
        let sink = Arc::new(RecordingSink::new());
        let mut display = display(&sink, &["C", "F", "G"], 4);
        let cursor = BeatCursor {
            beat: 2,
            measure: 1,
        };

        assert_eq!(display.update(cursor), 5);
        let before = sink.write_count();
        assert_eq!(display.update(cursor), 0);
        assert_eq!(sink.write_count(), before);
    }

    #[test]
    fn beat_change_alone_skips_chord_writes() {
        let sink = Arc::new(RecordingSink::new());
        let mut display = display(&sink, &["C", "F"], 4);
        display.reset();
        sink.clear();

        assert_eq!(display.update(BeatCursor { beat: 0, measure: 0 }), 1);
        assert_eq!(sink.last_text(DisplaySlot::BeatIndicator).as_deref(), Some("● ○ ○ ○"));
        assert!(sink.last_text(DisplaySlot::CurrentChord).is_none());
    }

    #[test]
    fn chord_labels_past_the_end_are_blank() {
        let sink = Arc::new(RecordingSink::new());
        let mut display = display(&sink, &["C", "F", "G"], 4);
        display.update(BeatCursor { beat: 0, measure: 1 });

        assert_eq!(sink.last_text(DisplaySlot::CurrentChord).as_deref(), Some("F"));
        assert_eq!(sink.last_text(DisplaySlot::NextChord1).as_deref(), Some("G"));
        assert_eq!(sink.last_text(DisplaySlot::NextChord2).as_deref(), Some(""));
        assert_eq!(sink.last_text(DisplaySlot::NextChord3).as_deref(), Some(""));
    }

    #[test]
    fn lookahead_limits_upcoming_labels() {
        let sink = Arc::new(RecordingSink::new());
        let mut display = display(&sink, &["C", "F", "G", "Am"], 4).with_lookahead(1);
        display.reset();
        assert_eq!(sink.last_text(DisplaySlot::NextChord1).as_deref(), Some("F"));
        assert_eq!(sink.last_text(DisplaySlot::NextChord2).as_deref(), Some(""));
    }

    fn session(start: f64) -> PlaybackSession {
        let sequence = Sequence::new(
            Vec::new(),
            labels(&["C", "G"]),
            TimeSignature::new(4).unwrap(),
            Tempo::new(60.0).unwrap(),
        );
        PlaybackSession::new(1, &sequence, start)
    }

    #[tokio::test(start_paused = true)]
    async fn loop_completes_and_resets_display() {
        let clock = AudioClock::new(Arc::new(StubAudioDevice::new()))
            .acquire()
            .unwrap();
        let sink = Arc::new(RecordingSink::new());
        let sync = DisplaySynchronizer::new(clock.clone(), display(&sink, &["C", "G"], 4));

        let task = sync.start(
            session(clock.current_time()),
            Box::new(IntervalFrameSource::new(60)),
            CancelToken::new(),
        );
        assert_eq!(task.finished().await, SyncOutcome::Completed);

        assert!(clock.current_time() >= 8.0);
        assert_eq!(sink.last_text(DisplaySlot::BeatIndicator).as_deref(), Some("○ ○ ○ ○"));
        assert_eq!(sink.last_text(DisplaySlot::CurrentChord).as_deref(), Some("C"));
        assert_eq!(sink.last_text(DisplaySlot::NextChord1).as_deref(), Some("G"));

        let beats = sink.texts_for(DisplaySlot::BeatIndicator);
        // eight beat changes plus the reset
        assert_eq!(beats.len(), 9);
        let chords = sink.texts_for(DisplaySlot::CurrentChord);
        assert_eq!(chords, ["C", "G", "C"]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_loop_and_resets() {
        let clock = AudioClock::new(Arc::new(StubAudioDevice::new()))
            .acquire()
            .unwrap();
        let sink = Arc::new(RecordingSink::new());
        let sync = DisplaySynchronizer::new(clock.clone(), display(&sink, &["C", "G"], 4));
        let cancel = CancelToken::new();

        let task = sync.start(
            session(clock.current_time()),
            Box::new(IntervalFrameSource::new(60)),
            cancel.clone(),
        );
        tokio::time::sleep(Duration::from_millis(1500)).await;
        cancel.cancel();

        assert_eq!(task.finished().await, SyncOutcome::Cancelled);
        assert_eq!(sink.last_text(DisplaySlot::BeatIndicator).as_deref(), Some("○ ○ ○ ○"));
    }

    /// Counts the frames it hands out.
    struct CountingFrames {
        inner: IntervalFrameSource,
        delivered: Arc<AtomicUsize>,
    }

    impl FrameSource for CountingFrames {
        fn next_frame(&mut self) -> BoxFuture<'_, Option<f64>> {
            self.delivered.fetch_add(1, Ordering::Relaxed);
            self.inner.next_frame()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn frames_faster_than_the_guard_are_discarded() {
        let clock = AudioClock::new(Arc::new(StubAudioDevice::new()))
            .acquire()
            .unwrap();
        let sink = Arc::new(RecordingSink::new());
        let sync = DisplaySynchronizer::new(clock.clone(), display(&sink, &["C", "G"], 4))
            .with_min_frame_interval(16.0);
        let delivered = Arc::new(AtomicUsize::new(0));
        let frames = CountingFrames {
            // a 4 ms frame period
            inner: IntervalFrameSource::new(250),
            delivered: Arc::clone(&delivered),
        };

        let task = sync.start(session(clock.current_time()), Box::new(frames), CancelToken::new());
        while !task.is_finished() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        let ended_at = clock.current_time();
        let rendered = task.frames_rendered();
        assert_eq!(task.finished().await, SyncOutcome::Completed);

        assert!((8.0..8.02).contains(&ended_at), "ended at {}", ended_at);
        let delivered = delivered.load(Ordering::Relaxed);
        assert!(delivered > 1900, "{} frames delivered", delivered);
        assert!(rendered * 3 < delivered, "{} of {} frames rendered", rendered, delivered);
        assert!(rendered * 6 > delivered, "{} of {} frames rendered", rendered, delivered);

        assert_eq!(sink.texts_for(DisplaySlot::BeatIndicator).len(), 9);
        assert_eq!(sink.texts_for(DisplaySlot::CurrentChord), ["C", "G", "C"]);
        assert_eq!(sink.last_text(DisplaySlot::BeatIndicator).as_deref(), Some("○ ○ ○ ○"));
    }

    #[tokio::test(start_paused = true)]
    async fn keep_alive_resumes_suspended_clock() {
        let clock = AudioClock::new(Arc::new(StubAudioDevice::new()))
            .acquire()
            .unwrap();
        let sink = Arc::new(RecordingSink::new());
        let sync = DisplaySynchronizer::new(clock.clone(), display(&sink, &["C"], 4))
            .with_keep_alive(true)
            .with_min_frame_interval(1000.0 / 60.0);

        let task = sync.start(
            session(clock.current_time()),
            Box::new(IntervalFrameSource::new(60)),
            CancelToken::new(),
        );
        tokio::time::sleep(Duration::from_millis(500)).await;
        clock.suspend().unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!clock.is_suspended());

        assert_eq!(task.finished().await, SyncOutcome::Completed);
    }
}
