//! # Pitch Detection Module
//!
//! This module implements the per-frame fundamental frequency estimator used by
//! the tuner. It is a YIN variant built on the cumulative mean normalized
//! difference (CMND) function with parabolic refinement of the best lag.
//!
//! ## Features
//! - Lag search bounded by the configured frequency band
//! - Absolute-threshold dip search with descent to the local minimum
//! - Global-minimum fallback when no dip crosses the threshold
//! - Minimum-confidence acceptance gate
//! - Parabolic interpolation for sub-sample accuracy
//!
//! The estimator holds no state between calls: every frame is an independent
//! attempt, and any degenerate input (silence, short frames, noise) yields an
//! observation without a frequency instead of an error.

use log::trace;
use serde::{Deserialize, Serialize};

/// Default CMND threshold for the first-dip search.
pub const DEFAULT_CMND_THRESHOLD: f32 = 0.15;

/// Default minimum confidence for accepting a detection.
pub const DEFAULT_MIN_CONFIDENCE: f32 = 0.35;

/// Smallest lag ever searched. Lags 0 and 1 carry no usable period information.
const MIN_LAG_FLOOR: usize = 2;

/// Relative slack at the band edges for interpolation error. A refined
/// frequency this close outside the band is reported at the edge.
const BAND_EDGE_TOLERANCE: f32 = 1e-3;

/// Per-call configuration of the estimator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EstimatorConfig {
    /// Lowest frequency that may be reported, in Hz.
    pub min_frequency: f32,
    /// Highest frequency that may be reported, in Hz.
    pub max_frequency: f32,
    /// CMND value a lag must drop below to count as a candidate period.
    pub cmnd_threshold: f32,
    /// Detections with confidence at or below this value are rejected.
    pub min_confidence: f32,
}

impl EstimatorConfig {
    pub fn new(min_frequency: f32, max_frequency: f32) -> Self {
        Self {
            min_frequency,
            max_frequency,
            cmnd_threshold: DEFAULT_CMND_THRESHOLD,
            min_confidence: DEFAULT_MIN_CONFIDENCE,
        }
    }
}

/// Result of one estimator call.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PitchObservation {
    /// Detected fundamental in Hz, `None` when no periodic signal was found.
    pub frequency: Option<f32>,
    /// Confidence of the detection in `[0, 1]`.
    pub confidence: f32,
}

impl PitchObservation {
    /// An observation carrying no frequency.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_detected(&self) -> bool {
        self.frequency.is_some()
    }
}

/// Root-mean-square amplitude of a frame.
///
/// This is the frame energy measure fed to the signal gate. An empty frame
/// has zero energy.
pub fn signal_rms(signal: &[f32]) -> f32 {
    if signal.is_empty() {
        return 0.0;
    }
    (signal.iter().map(|&s| s * s).sum::<f32>() / signal.len() as f32).sqrt()
}

/// Estimates the fundamental frequency of a frame with the YIN algorithm.
///
/// # Arguments
/// * `signal` - Mono samples of one frame
/// * `sample_rate` - Sample rate in Hz
/// * `config` - Frequency band and acceptance thresholds
///
/// # Returns
/// * A [`PitchObservation`]; its `frequency` is `None` for silence, noise,
///   frames too short for the configured band, or out-of-band results.
///
/// The cost is `O(signal.len() * max_lag)` and is bounded by configuration.
pub fn detect_pitch_yin(
    signal: &[f32],
    sample_rate: f32,
    config: &EstimatorConfig,
) -> PitchObservation {
    let frame_size = signal.len();

    if !(sample_rate > 0.0)
        || !(config.min_frequency > 0.0)
        || !(config.max_frequency > config.min_frequency)
    {
        return PitchObservation::none();
    }

    // --- Step 1: Lag bounds from the frequency band ---
    let min_lag = ((sample_rate / config.max_frequency).floor() as usize).max(MIN_LAG_FLOOR);
    let max_lag = ((sample_rate / config.min_frequency).floor() as usize).min(frame_size / 2);
    if max_lag <= min_lag || frame_size <= max_lag {
        trace!(
            "frame of {} samples too short for lags {}..{}",
            frame_size, min_lag, max_lag
        );
        return PitchObservation::none();
    }

    // --- Step 2: Difference function and its cumulative mean normalization ---
    let cmnd = cumulative_mean_normalized_difference(signal, max_lag);

    // --- Step 3: First dip below the absolute threshold, or the global minimum ---
    let best_lag = match find_best_lag(&cmnd, min_lag, max_lag, config.cmnd_threshold) {
        Some(lag) => lag,
        None => return PitchObservation::none(),
    };

    // --- Step 4: Confidence gate ---
    let confidence = 1.0 - cmnd[best_lag].min(1.0);
    if !(confidence > config.min_confidence) {
        trace!("rejected lag {} with confidence {:.3}", best_lag, confidence);
        return PitchObservation::none();
    }

    // --- Step 5: Parabolic refinement ---
    let refined_lag = parabolic_refinement(&cmnd, best_lag);

    // --- Step 6: Lag to frequency, band check ---
    let frequency = match clamp_to_band(sample_rate / refined_lag, config) {
        Some(f) => f,
        None => {
            trace!("rejected out-of-band frequency {:.2} Hz", sample_rate / refined_lag);
            return PitchObservation::none();
        }
    };

    PitchObservation {
        frequency: Some(frequency),
        confidence,
    }
}

/// Computes the CMND function for lags `0..max_lag`.
///
/// The difference function uses a fixed window of `signal.len() - max_lag`
/// samples so every lag is summed over the same number of terms. A zero
/// running sum leaves the entry at 1.0, which keeps silence from ever
/// producing a candidate.
fn cumulative_mean_normalized_difference(signal: &[f32], max_lag: usize) -> Vec<f32> {
    let window = signal.len() - max_lag;
    let mut cmnd = vec![1.0; max_lag];

    let mut running_sum = 0.0f64;
    for tau in 1..max_lag {
        let mut diff = 0.0f64;
        for j in 0..window {
            let delta = (signal[j] - signal[j + tau]) as f64;
            diff += delta * delta;
        }
        running_sum += diff;
        if running_sum > 0.0 {
            cmnd[tau] = (diff * tau as f64 / running_sum) as f32;
        }
    }
    cmnd
}

fn find_best_lag(cmnd: &[f32], min_lag: usize, max_lag: usize, threshold: f32) -> Option<usize> {
    let mut tau = min_lag;
    while tau < max_lag {
        if cmnd[tau] < threshold {
            while tau + 1 < max_lag && cmnd[tau + 1] < cmnd[tau] {
                tau += 1;
            }
            return Some(tau);
        }
        tau += 1;
    }

    // No dip crossed the threshold; the global minimum still has to pass
    // the confidence gate.
    (min_lag..max_lag)
        .filter(|&t| cmnd[t].is_finite())
        .min_by(|&a, &b| {
            cmnd[a]
                .partial_cmp(&cmnd[b])
                .unwrap_or(std::cmp::Ordering::Equal)
        })
}

/// Fits a parabola through the CMND values around `lag`.
///
/// The neighbours only need to exist in `cmnd`, not inside the searched lag
/// range: a tone at the top of the band has its best lag at `min_lag`, and
/// that is exactly where the sub-sample offset matters most.
fn parabolic_refinement(cmnd: &[f32], lag: usize) -> f32 {
    if lag == 0 || lag + 1 >= cmnd.len() {
        return lag as f32;
    }

    let y1 = cmnd[lag - 1];
    let y2 = cmnd[lag];
    let y3 = cmnd[lag + 1];

    let denominator = y1 - 2.0 * y2 + y3;
    if denominator.abs() < 1e-9 {
        return lag as f32;
    }

    let shift = (y1 - y3) / (2.0 * denominator);
    if shift.is_finite() && shift.abs() < 1.0 {
        lag as f32 + shift
    } else {
        lag as f32
    }
}

/// Keeps `frequency` inside the configured band, pulling values within
/// [`BAND_EDGE_TOLERANCE`] of an edge onto it.
fn clamp_to_band(frequency: f32, config: &EstimatorConfig) -> Option<f32> {
    let low = config.min_frequency * (1.0 - BAND_EDGE_TOLERANCE);
    let high = config.max_frequency * (1.0 + BAND_EDGE_TOLERANCE);
    if !frequency.is_finite() || frequency < low || frequency > high {
        return None;
    }
    Some(frequency.clamp(config.min_frequency, config.max_frequency))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_RATE: f32 = 44100.0;

    fn sine(freq: f32, len: usize, amplitude: f32) -> Vec<f32> {
        (0..len)
            .map(|i| amplitude * (2.0 * std::f32::consts::PI * freq * i as f32 / SAMPLE_RATE).sin())
            .collect()
    }

    fn assert_within_one_percent(freq: f32, band: (f32, f32)) {
        let config = EstimatorConfig::new(band.0, band.1);
        let obs = detect_pitch_yin(&sine(freq, 2048, 0.5), SAMPLE_RATE, &config);
        let detected = obs.frequency.expect("sine should be detected");
        assert!(
            (detected - freq).abs() / freq < 0.01,
            "expected {} Hz, got {} Hz",
            freq,
            detected
        );
        assert!(obs.confidence > 0.9);
    }

    #[test]
    fn detects_sines_across_guitar_range() {
        for freq in [82.41, 110.0, 146.83, 196.0, 246.94, 329.63] {
            assert_within_one_percent(freq, (70.0, 400.0));
        }
    }

    #[test]
    fn detects_a440_in_wide_band() {
        assert_within_one_percent(440.0, (50.0, 1000.0));
    }

    #[test]
    fn tones_at_the_top_of_the_band_are_refined() {
        // At 44.1 kHz the best lag for these sits on the smallest searched lag
        assert_within_one_percent(400.0, (70.0, 400.0));
        assert_within_one_percent(399.5, (70.0, 400.0));
        assert_within_one_percent(1000.0, (50.0, 1000.0));

        let config = EstimatorConfig::new(70.0, 400.0);
        let obs = detect_pitch_yin(&sine(399.5, 2048, 0.5), SAMPLE_RATE, &config);
        let detected = obs.frequency.unwrap();
        assert!((detected - 399.5).abs() < 0.5, "got {} Hz", detected);
    }

    #[test]
    fn tone_just_above_band_is_rejected() {
        // The dip is below the smallest searched lag, so the edge lag wins
        let config = EstimatorConfig::new(70.0, 400.0);
        let obs = detect_pitch_yin(&sine(410.0, 2048, 0.5), SAMPLE_RATE, &config);
        assert!(!obs.is_detected());
    }

    #[test]
    fn refinement_uses_neighbours_below_the_searched_range() {
        let cmnd = [1.0, 0.9, 0.4, 0.1, 0.3, 0.8];
        let refined = parabolic_refinement(&cmnd, 3);
        assert!((refined - 3.1).abs() < 1e-5, "refined {}", refined);
        assert_eq!(parabolic_refinement(&cmnd, 5), 5.0);
        assert_eq!(parabolic_refinement(&cmnd, 0), 0.0);
    }

    #[test]
    fn silence_is_not_detected() {
        let config = EstimatorConfig::new(70.0, 400.0);
        let obs = detect_pitch_yin(&vec![0.0; 2048], SAMPLE_RATE, &config);
        assert_eq!(obs.frequency, None);
        assert!(!obs.confidence.is_nan());
    }

    #[test]
    fn constant_offset_is_not_detected() {
        let config = EstimatorConfig::new(70.0, 400.0);
        let obs = detect_pitch_yin(&vec![0.25; 2048], SAMPLE_RATE, &config);
        assert!(!obs.is_detected());
    }

    #[test]
    fn short_frame_is_rejected() {
        let config = EstimatorConfig::new(70.0, 400.0);
        // max lag would be 630, half the frame is only 128
        let obs = detect_pitch_yin(&sine(110.0, 256, 0.5), SAMPLE_RATE, &config);
        assert!(!obs.is_detected());
        assert!(!detect_pitch_yin(&[], SAMPLE_RATE, &config).is_detected());
    }

    #[test]
    fn tone_above_band_never_reports_out_of_band_frequency() {
        let config = EstimatorConfig::new(70.0, 400.0);
        let obs = detect_pitch_yin(&sine(1000.0, 2048, 0.5), SAMPLE_RATE, &config);
        if let Some(freq) = obs.frequency {
            assert!((70.0..=400.0).contains(&freq));
        }
    }

    #[test]
    fn invalid_band_is_rejected() {
        let config = EstimatorConfig::new(400.0, 70.0);
        let obs = detect_pitch_yin(&sine(110.0, 2048, 0.5), SAMPLE_RATE, &config);
        assert!(!obs.is_detected());
    }

    #[test]
    fn rms_of_full_scale_sine() {
        let rms = signal_rms(&sine(441.0, 44100, 1.0));
        assert!((rms - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-3);
        assert_eq!(signal_rms(&[]), 0.0);
    }
}
