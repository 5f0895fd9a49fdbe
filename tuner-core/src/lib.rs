// tuner-core/src/lib.rs

//! The core logic of the instrument tuner.
//! This crate turns a stream of microphone frames into a stable tuning
//! verdict: pitch estimation, signal gating, note mapping, smoothing and
//! lock detection. It is completely headless and contains no GUI code.

pub mod audio;
pub mod error;
pub mod gate;
pub mod instrument;
pub mod pipeline;
pub mod pitch;
pub mod publish;
pub mod session;
pub mod tuning;

pub use error::{Result, TunerError};
pub use pipeline::{FrameAnalysis, Tuner, TuningMode};
pub use session::{TuningOutput, TuningState};

/// One block of mono samples delivered by a frame source.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleFrame {
    /// Amplitude samples, nominally in `[-1, 1]`.
    pub samples: Vec<f32>,
    /// Sample rate in Hz.
    pub sample_rate: f32,
}

impl SampleFrame {
    pub fn new(samples: Vec<f32>, sample_rate: f32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Duration covered by the frame in seconds.
    pub fn duration_secs(&self) -> f32 {
        if self.sample_rate > 0.0 {
            self.samples.len() as f32 / self.sample_rate
        } else {
            0.0
        }
    }
}
