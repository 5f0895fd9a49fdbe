//! Signal gate: decides whether an observation is a usable pitch reading.
//!
//! A frame is accepted only when its energy clears the noise gate, the
//! estimator found a frequency, and that frequency lies inside the
//! instrument's validity band. Everything else is silence.

use log::trace;

use crate::pitch::PitchObservation;
use crate::tuning::{self, NoteReading};

/// Gate parameters, usually taken from the active instrument.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalGate {
    /// Frames with energy at or below this amplitude are treated as silence.
    pub noise_gate_threshold: f32,
    /// Lowest accepted frequency in Hz.
    pub min_frequency: f32,
    /// Highest accepted frequency in Hz.
    pub max_frequency: f32,
}

/// Outcome of gating one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GateDecision {
    Silence,
    Accepted(NoteReading),
}

impl GateDecision {
    pub fn reading(&self) -> Option<&NoteReading> {
        match self {
            GateDecision::Silence => None,
            GateDecision::Accepted(reading) => Some(reading),
        }
    }

    /// Cents of an accepted reading, zero for silence.
    pub fn cents(&self) -> f32 {
        self.reading().map_or(0.0, |r| r.cents)
    }
}

impl SignalGate {
    pub fn new(noise_gate_threshold: f32, min_frequency: f32, max_frequency: f32) -> Self {
        Self {
            noise_gate_threshold,
            min_frequency,
            max_frequency,
        }
    }

    /// Returns the accepted frequency, or `None` if the frame is silence.
    pub fn admit(&self, observation: &PitchObservation, energy: f32) -> Option<f32> {
        if !(energy > self.noise_gate_threshold) {
            trace!("gated: energy {:.4} <= {:.4}", energy, self.noise_gate_threshold);
            return None;
        }
        let freq = observation.frequency?;
        if !freq.is_finite() || freq < self.min_frequency || freq > self.max_frequency {
            trace!("gated: {:.2} Hz outside validity band", freq);
            return None;
        }
        Some(freq)
    }

    /// Gates an observation and maps it to the nearest chromatic note.
    pub fn evaluate(&self, observation: &PitchObservation, energy: f32) -> GateDecision {
        self.evaluate_against(observation, energy, None)
    }

    /// Gates an observation and maps it to a note.
    ///
    /// With a `target_frequency`, cents are measured directly against the
    /// target instead of the nearest chromatic note.
    pub fn evaluate_against(
        &self,
        observation: &PitchObservation,
        energy: f32,
        target_frequency: Option<f32>,
    ) -> GateDecision {
        let Some(freq) = self.admit(observation, energy) else {
            return GateDecision::Silence;
        };
        let Some((note, nearest_cents)) = tuning::frequency_to_note(freq) else {
            return GateDecision::Silence;
        };

        let cents = match target_frequency {
            Some(target) if target.is_finite() && target > 0.0 => {
                tuning::calculate_cents_deviation(freq, target)
            }
            _ => nearest_cents,
        };

        GateDecision::Accepted(NoteReading {
            frequency: freq,
            note,
            cents,
        })
    }
}
