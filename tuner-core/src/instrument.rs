//! # Instrument Configuration Module
//!
//! Every tunable constant of the pipeline lives in one serializable record per
//! instrument: the detection band, the noise gate, the smoothing and lock
//! parameters, and the open-string targets for single-string tuning.
//!
//! ## Features
//! - Built-in presets (chromatic, guitar, bass, ukulele, violin)
//! - JSON profile saving and loading
//! - Validation before a configuration reaches the real-time path

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::time::Duration;

use log::debug;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TunerError};
use crate::gate::SignalGate;
use crate::pitch::{DEFAULT_CMND_THRESHOLD, DEFAULT_MIN_CONFIDENCE, EstimatorConfig};
use crate::session::SessionConfig;
use crate::tuning::{self, calculate_cents_deviation};

/// One open string the player can tune to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StringTarget {
    /// Note name, e.g. "E2".
    pub name: String,
    /// Target frequency in Hz.
    pub frequency: f32,
}

impl StringTarget {
    /// Builds a target from a note name at its equal-temperament frequency.
    pub fn from_note_name(name: &str) -> Option<Self> {
        let note = tuning::parse_note_name(name)?;
        Some(Self {
            name: note.to_string(),
            frequency: note.frequency,
        })
    }
}

/// Configuration of a single instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentConfig {
    pub name: String,
    /// Lowest frequency detected and accepted, in Hz.
    pub min_frequency: f32,
    /// Highest frequency detected and accepted, in Hz.
    pub max_frequency: f32,
    /// RMS amplitude a frame must exceed to be considered signal.
    #[serde(default = "default_noise_gate")]
    pub noise_gate_threshold: f32,
    #[serde(default = "default_alpha")]
    pub alpha: f32,
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
    #[serde(default = "default_lock_threshold")]
    pub lock_threshold_cents: f32,
    #[serde(default = "default_close_threshold")]
    pub close_threshold_cents: f32,
    #[serde(default = "default_lock_duration")]
    pub lock_duration_secs: f32,
    #[serde(default = "default_decay_factor")]
    pub decay_factor: f32,
    #[serde(default = "default_cmnd_threshold")]
    pub cmnd_threshold: f32,
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f32,
    #[serde(default)]
    pub strings: Vec<StringTarget>,
}

fn default_noise_gate() -> f32 {
    0.01
}
fn default_alpha() -> f32 {
    0.08
}
fn default_buffer_capacity() -> usize {
    6
}
fn default_lock_threshold() -> f32 {
    4.0
}
fn default_close_threshold() -> f32 {
    15.0
}
fn default_lock_duration() -> f32 {
    1.0
}
fn default_decay_factor() -> f32 {
    0.9
}
fn default_cmnd_threshold() -> f32 {
    DEFAULT_CMND_THRESHOLD
}
fn default_min_confidence() -> f32 {
    DEFAULT_MIN_CONFIDENCE
}

impl InstrumentConfig {
    /// A configuration with default smoothing for the given band.
    pub fn new(name: &str, min_frequency: f32, max_frequency: f32) -> Self {
        Self {
            name: name.to_string(),
            min_frequency,
            max_frequency,
            noise_gate_threshold: default_noise_gate(),
            alpha: default_alpha(),
            buffer_capacity: default_buffer_capacity(),
            lock_threshold_cents: default_lock_threshold(),
            close_threshold_cents: default_close_threshold(),
            lock_duration_secs: default_lock_duration(),
            decay_factor: default_decay_factor(),
            cmnd_threshold: default_cmnd_threshold(),
            min_confidence: default_min_confidence(),
            strings: Vec::new(),
        }
    }

    fn with_strings(mut self, names: &[&str]) -> Self {
        self.strings = names
            .iter()
            .filter_map(|n| StringTarget::from_note_name(n))
            .collect();
        self
    }

    /// Checks every constraint the real-time path relies on.
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(TunerError::InvalidConfig(format!("{}: {}", self.name, msg)));

        if !(self.min_frequency > 0.0 && self.min_frequency < self.max_frequency)
            || !self.max_frequency.is_finite()
        {
            return fail(format!(
                "frequency band {}..{} Hz is not a positive range",
                self.min_frequency, self.max_frequency
            ));
        }
        if !(self.noise_gate_threshold >= 0.0) {
            return fail("noise gate threshold must be non-negative".into());
        }
        if !(self.alpha > 0.0 && self.alpha <= 1.0) {
            return fail(format!("alpha {} outside (0, 1]", self.alpha));
        }
        if self.buffer_capacity == 0 {
            return fail("buffer capacity must be at least 1".into());
        }
        if !(self.lock_threshold_cents >= 0.0
            && self.lock_threshold_cents < self.close_threshold_cents)
        {
            return fail(format!(
                "lock threshold {} must be below close threshold {}",
                self.lock_threshold_cents, self.close_threshold_cents
            ));
        }
        if !(self.lock_duration_secs > 0.0) || !self.lock_duration_secs.is_finite() {
            return fail("lock duration must be positive".into());
        }
        if !(self.decay_factor > 0.0 && self.decay_factor < 1.0) {
            return fail(format!("decay factor {} outside (0, 1)", self.decay_factor));
        }
        if !(self.cmnd_threshold > 0.0 && self.cmnd_threshold < 1.0)
            || !(self.min_confidence > 0.0 && self.min_confidence < 1.0)
        {
            return fail("estimator thresholds must lie in (0, 1)".into());
        }
        if let Some(bad) = self
            .strings
            .iter()
            .find(|s| !(s.frequency > 0.0) || !s.frequency.is_finite())
        {
            return fail(format!("string {} has invalid frequency {}", bad.name, bad.frequency));
        }
        Ok(())
    }

    pub fn estimator_config(&self) -> EstimatorConfig {
        EstimatorConfig {
            min_frequency: self.min_frequency,
            max_frequency: self.max_frequency,
            cmnd_threshold: self.cmnd_threshold,
            min_confidence: self.min_confidence,
        }
    }

    pub fn signal_gate(&self) -> SignalGate {
        SignalGate::new(self.noise_gate_threshold, self.min_frequency, self.max_frequency)
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            alpha: self.alpha,
            buffer_capacity: self.buffer_capacity,
            lock_threshold_cents: self.lock_threshold_cents,
            close_threshold_cents: self.close_threshold_cents,
            lock_duration: Duration::from_secs_f32(self.lock_duration_secs.max(0.0)),
            decay_factor: self.decay_factor,
            ..SessionConfig::default()
        }
    }

    pub fn string(&self, index: usize) -> Result<&StringTarget> {
        self.strings.get(index).ok_or_else(|| TunerError::UnknownString {
            instrument: self.name.clone(),
            index,
        })
    }

    /// Index of the string whose target is closest to `freq` in cents.
    pub fn nearest_string(&self, freq: f32) -> Option<usize> {
        self.strings
            .iter()
            .enumerate()
            .map(|(i, s)| (i, calculate_cents_deviation(freq, s.frequency).abs()))
            .filter(|(_, cents)| cents.is_finite())
            .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(i, _)| i)
    }
}

/// Built-in instrument presets, keyed by lowercase name.
static PRESETS: Lazy<Vec<InstrumentConfig>> = Lazy::new(|| {
    let chromatic = InstrumentConfig::new("chromatic", 50.0, 1000.0);

    let guitar = InstrumentConfig {
        alpha: 0.08,
        buffer_capacity: 6,
        ..InstrumentConfig::new("guitar", 70.0, 400.0)
    }
    .with_strings(&["E2", "A2", "D3", "G3", "B3", "E4"]);

    // Low strings: the estimate wanders more, so smooth harder.
    let bass = InstrumentConfig {
        noise_gate_threshold: 0.015,
        alpha: 0.05,
        buffer_capacity: 8,
        lock_threshold_cents: 5.0,
        lock_duration_secs: 1.2,
        ..InstrumentConfig::new("bass", 35.0, 200.0)
    }
    .with_strings(&["E1", "A1", "D2", "G2"]);

    let ukulele = InstrumentConfig {
        alpha: 0.1,
        buffer_capacity: 5,
        lock_threshold_cents: 3.0,
        close_threshold_cents: 12.0,
        lock_duration_secs: 0.6,
        ..InstrumentConfig::new("ukulele", 200.0, 600.0)
    }
    .with_strings(&["G4", "C4", "E4", "A4"]);

    let violin = InstrumentConfig {
        noise_gate_threshold: 0.008,
        alpha: 0.1,
        buffer_capacity: 5,
        lock_threshold_cents: 3.0,
        close_threshold_cents: 12.0,
        lock_duration_secs: 0.8,
        ..InstrumentConfig::new("violin", 180.0, 900.0)
    }
    .with_strings(&["G3", "D4", "A4", "E5"]);

    vec![chromatic, guitar, bass, ukulele, violin]
});

/// Looks up a built-in preset by name (case-insensitive).
pub fn preset(name: &str) -> Result<InstrumentConfig> {
    PRESETS
        .iter()
        .find(|p| p.name.eq_ignore_ascii_case(name))
        .cloned()
        .ok_or_else(|| TunerError::UnknownPreset(name.to_string()))
}

/// Names of all built-in presets.
pub fn preset_names() -> Vec<&'static str> {
    PRESETS.iter().map(|p| p.name.as_str()).collect()
}

/// Saves an instrument configuration as pretty-printed JSON.
pub fn save_profile(config: &InstrumentConfig, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let json_string = serde_json::to_string_pretty(config).map_err(|source| {
        TunerError::ProfileFormat {
            path: path.to_path_buf(),
            source,
        }
    })?;
    let io_err = |source| TunerError::ProfileIo {
        path: path.to_path_buf(),
        source,
    };
    let mut file = File::create(path).map_err(io_err)?;
    file.write_all(json_string.as_bytes()).map_err(io_err)?;
    debug!("saved instrument profile '{}' to {}", config.name, path.display());
    Ok(())
}

/// Loads and validates an instrument configuration from a JSON file.
pub fn load_profile(path: impl AsRef<Path>) -> Result<InstrumentConfig> {
    let path = path.as_ref();
    let io_err = |source| TunerError::ProfileIo {
        path: path.to_path_buf(),
        source,
    };
    let mut file = File::open(path).map_err(io_err)?;
    let mut data = String::new();
    file.read_to_string(&mut data).map_err(io_err)?;

    let config: InstrumentConfig =
        serde_json::from_str(&data).map_err(|source| TunerError::ProfileFormat {
            path: path.to_path_buf(),
            source,
        })?;
    config.validate()?;
    debug!("loaded instrument profile '{}' from {}", config.name, path.display());
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_are_valid() {
        for name in preset_names() {
            let config = preset(name).unwrap();
            config.validate().unwrap();
        }
    }

    #[test]
    fn preset_lookup_is_case_insensitive() {
        assert_eq!(preset("Guitar").unwrap().name, "guitar");
        assert!(matches!(preset("banjo"), Err(TunerError::UnknownPreset(_))));
    }

    #[test]
    fn guitar_strings_are_standard_tuning() {
        let guitar = preset("guitar").unwrap();
        let names: Vec<_> = guitar.strings.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["E2", "A2", "D3", "G3", "B3", "E4"]);
        assert!((guitar.strings[1].frequency - 110.0).abs() < 1e-3);
    }

    #[test]
    fn nearest_string_picks_the_closest_target() {
        let guitar = preset("guitar").unwrap();
        assert_eq!(guitar.nearest_string(83.0), Some(0));
        assert_eq!(guitar.nearest_string(108.0), Some(1));
        assert_eq!(guitar.nearest_string(330.5), Some(5));
        assert_eq!(preset("chromatic").unwrap().nearest_string(440.0), None);
    }

    #[test]
    fn string_index_out_of_range() {
        let guitar = preset("guitar").unwrap();
        assert!(guitar.string(5).is_ok());
        assert!(matches!(
            guitar.string(6),
            Err(TunerError::UnknownString { index: 6, .. })
        ));
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut config = InstrumentConfig::new("broken", 400.0, 70.0);
        assert!(config.validate().is_err());

        config = InstrumentConfig::new("broken", 70.0, 400.0);
        config.alpha = 0.0;
        assert!(config.validate().is_err());

        config = InstrumentConfig::new("broken", 70.0, 400.0);
        config.lock_threshold_cents = 20.0;
        assert!(config.validate().is_err());

        config = InstrumentConfig::new("broken", 70.0, 400.0);
        config.buffer_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_fields_take_defaults() {
        let json = r#"{ "name": "cello", "min_frequency": 60.0, "max_frequency": 500.0 }"#;
        let config: InstrumentConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.buffer_capacity, 6);
        assert_eq!(config.cmnd_threshold, DEFAULT_CMND_THRESHOLD);
        assert!(config.strings.is_empty());
        config.validate().unwrap();
    }

    #[test]
    fn profile_file_round_trip() {
        let path = std::env::temp_dir().join(format!("tuner-profile-{}.json", std::process::id()));
        let bass = preset("bass").unwrap();
        save_profile(&bass, &path).unwrap();
        let loaded = load_profile(&path).unwrap();
        assert_eq!(loaded, bass);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn missing_profile_is_an_io_error() {
        let err = load_profile("/nonexistent/tuner/profile.json").unwrap_err();
        assert!(matches!(err, TunerError::ProfileIo { .. }));
    }

    #[test]
    fn session_config_follows_instrument() {
        let bass = preset("bass").unwrap();
        let session = bass.session_config();
        assert_eq!(session.buffer_capacity, 8);
        assert_eq!(session.lock_duration, Duration::from_secs_f32(1.2));
    }
}
