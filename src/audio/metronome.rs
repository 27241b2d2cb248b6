//! Metronome - click generation and beat arithmetic
//!
//! This module provides the click sample used by the built-in percussion
//! voice and the tempo arithmetic shared by the scheduler, the countdown and
//! the display loop.
//! Key features:
//! - 20ms white noise burst click samples (deterministic, fixed seed)
//! - Beat/measure durations derived from BPM
//! - Downbeat detection with a floating tolerance and the fixed click gain policy

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Duration of metronome click in milliseconds
const CLICK_DURATION_MS: f32 = 20.0;

/// Ratio applied to the click gain on beats that are not downbeats
pub const OFFBEAT_GAIN_RATIO: f32 = 0.5;

/// Generates a metronome click sample (20ms white noise burst).
///
/// The noise is generated using a fixed seed to ensure identical output across calls.
///
/// # Arguments
/// * `sample_rate` - Sample rate in Hz (typically 48000)
///
/// # Returns
/// A `Vec<f32>` containing exactly 20ms worth of white noise samples in range [-1.0, 1.0]
pub fn generate_click_sample(sample_rate: u32) -> Vec<f32> {
    let num_samples = (sample_rate as f32 * CLICK_DURATION_MS / 1000.0) as usize;

    let mut rng = StdRng::seed_from_u64(42);

    let mut samples = Vec::with_capacity(num_samples);
    for _ in 0..num_samples {
        samples.push(rng.gen_range(-1.0..1.0));
    }

    samples
}

/// Seconds between consecutive beats: `60 / bpm`.
#[inline]
pub fn seconds_per_beat(bpm: f64) -> f64 {
    60.0 / bpm
}

/// Seconds per measure: `seconds_per_beat × beats_per_measure`.
#[inline]
pub fn seconds_per_measure(bpm: f64, beats_per_measure: u32) -> f64 {
    seconds_per_beat(bpm) * beats_per_measure as f64
}

/// Checks whether `time` falls on a measure boundary.
///
/// `time` is a downbeat iff it is an integer multiple of `seconds_per_measure`
/// within `tolerance` seconds.
///
/// # Examples
/// ```
/// use rhythm_trainer::audio::metronome::is_downbeat;
/// assert!(is_downbeat(4.0, 2.0, 1e-6));
/// assert!(!is_downbeat(3.0, 2.0, 1e-6));
/// ```
#[inline]
pub fn is_downbeat(time: f64, seconds_per_measure: f64, tolerance: f64) -> bool {
    if seconds_per_measure <= 0.0 {
        return false;
    }
    let measures = time / seconds_per_measure;
    (measures - measures.round()).abs() * seconds_per_measure <= tolerance
}

/// Click gain for a metronome event at `time`.
///
/// Downbeats get the full `volume`, every other beat gets half of it.
#[inline]
pub fn click_gain(time: f64, seconds_per_measure: f64, volume: f32, tolerance: f64) -> f32 {
    if is_downbeat(time, seconds_per_measure, tolerance) {
        volume
    } else {
        volume * OFFBEAT_GAIN_RATIO
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_click_sample_duration() {
        let sample_rates = [44100, 48000, 96000];

        for &sr in &sample_rates {
            let click = generate_click_sample(sr);
            let expected_samples = (sr as f32 * CLICK_DURATION_MS / 1000.0) as usize;
            assert_eq!(
                click.len(),
                expected_samples,
                "Click duration should be exactly 20ms at {} Hz",
                sr
            );
        }
    }

    #[test]
    fn test_generate_click_sample_range_and_determinism() {
        let click1 = generate_click_sample(48000);
        let click2 = generate_click_sample(48000);

        assert!(click1.iter().all(|s| (-1.0..=1.0).contains(s)));
        assert_eq!(click1, click2, "Generation should be deterministic");
    }

    #[test]
    fn test_tempo_arithmetic() {
        assert_eq!(seconds_per_beat(120.0), 0.5);
        assert_eq!(seconds_per_beat(60.0), 1.0);
        assert_eq!(seconds_per_measure(120.0, 4), 2.0);
        assert_eq!(seconds_per_measure(60.0, 3), 3.0);
    }

    #[test]
    fn test_downbeat_detection() {
        assert!(is_downbeat(0.0, 2.0, 1e-6));
        assert!(is_downbeat(4.0, 2.0, 1e-6));
        assert!(!is_downbeat(3.0, 2.0, 1e-6));
        assert!(!is_downbeat(0.5, 2.0, 1e-6));
    }

    #[test]
    fn test_downbeat_tolerates_float_accumulation() {
        // 0.1 * 30 accumulates rounding error but still lands on a measure of 1.5s
        let time: f64 = (0..30).map(|_| 0.1).sum();
        assert!(is_downbeat(time, 1.5, 1e-6));
    }

    #[test]
    fn test_click_gain_policy() {
        assert_eq!(click_gain(0.0, 2.0, 0.4, 1e-6), 0.4);
        assert_eq!(click_gain(0.5, 2.0, 0.4, 1e-6), 0.2);
        assert_eq!(click_gain(2.0, 2.0, 1.0, 1e-6), 1.0);
    }

    #[test]
    fn test_zero_measure_is_never_a_downbeat() {
        assert!(!is_downbeat(0.0, 0.0, 1e-6));
    }
}
