use super::sequence::Sequence;

/// Live beat/measure position of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BeatCursor {
    /// Beat within the measure, `0..beats_per_measure`
    pub beat: u32,
    pub measure: usize,
}

/// Timing frame of one playback run, anchored on a single clock reading
/// taken after the countdown.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackSession {
    id: u64,
    start_instant: f64,
    seconds_per_beat: f64,
    seconds_per_measure: f64,
    beats_per_measure: u32,
    measures: usize,
}

impl PlaybackSession {
    pub fn new(id: u64, sequence: &Sequence, start_instant: f64) -> Self {
        let beats_per_measure = sequence.time_signature().beats_per_measure();
        let seconds_per_beat = sequence.tempo().seconds_per_beat();
        Self {
            id,
            start_instant,
            seconds_per_beat,
            seconds_per_measure: seconds_per_beat * beats_per_measure as f64,
            beats_per_measure,
            measures: sequence.measures(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn start_instant(&self) -> f64 {
        self.start_instant
    }

    pub fn seconds_per_beat(&self) -> f64 {
        self.seconds_per_beat
    }

    pub fn seconds_per_measure(&self) -> f64 {
        self.seconds_per_measure
    }

    pub fn beats_per_measure(&self) -> u32 {
        self.beats_per_measure
    }

    pub fn measures(&self) -> usize {
        self.measures
    }

    pub fn total_duration(&self) -> f64 {
        self.measures as f64 * self.seconds_per_measure
    }

    /// Seconds since the start instant, never negative.
    pub fn elapsed(&self, now: f64) -> f64 {
        (now - self.start_instant).max(0.0)
    }

    pub fn cursor_at(&self, now: f64) -> BeatCursor {
        let elapsed = self.elapsed(now);
        let total_beats = (elapsed / self.seconds_per_beat).floor() as u64;
        BeatCursor {
            beat: (total_beats % self.beats_per_measure as u64) as u32,
            measure: (elapsed / self.seconds_per_measure).floor() as usize,
        }
    }

    pub fn is_complete(&self, now: f64) -> bool {
        self.elapsed(now) >= self.total_duration()
    }
}
