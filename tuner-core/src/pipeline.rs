//! # Tuner Pipeline Module
//!
//! [`Tuner`] owns one monitoring session and pushes each frame forward:
//! estimator, gate and note mapping, then smoothing and lock tracking. It is
//! a plain struct with no globals; whoever drives capture owns it and calls
//! [`Tuner::process_frame`] once per frame from a single thread.
//!
//! Switching instrument, string or mode resets the session synchronously so
//! readings from the previous target never leak into the next one. Nothing
//! else resets it: a stray octave or neighbour-note frame in automatic modes
//! is absorbed by the smoothing like any other outlier.

use std::time::Instant;

use log::{debug, info, trace};

use crate::SampleFrame;
use crate::error::Result;
use crate::gate::SignalGate;
use crate::instrument::InstrumentConfig;
use crate::pitch::{self, EstimatorConfig, PitchObservation};
use crate::publish::{LockEvent, LockNotifier, SnapshotPublisher};
use crate::session::{TuningOutput, TuningSession};
use crate::tuning::NoteReading;

/// How the tuner picks the pitch it measures against.
#[derive(Debug, Clone, PartialEq)]
pub enum TuningMode {
    /// Nearest chromatic note.
    Auto,
    /// Nearest open string of the instrument, cents against its target.
    AutoString,
    /// One specific string chosen by the player.
    Manual {
        string_index: usize,
        note_name: String,
        target_freq: f32,
    },
}

/// Full result of processing one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameAnalysis {
    pub observation: PitchObservation,
    /// RMS energy of the frame.
    pub energy: f32,
    /// The accepted reading, `None` when the frame was treated as silence.
    pub reading: Option<NoteReading>,
    /// Target frequency the cents were measured against, if any.
    pub target_frequency: Option<f32>,
    pub output: TuningOutput,
}

pub struct Tuner {
    instrument: InstrumentConfig,
    estimator: EstimatorConfig,
    gate: SignalGate,
    session: TuningSession,
    mode: TuningMode,
    publisher: Option<SnapshotPublisher>,
    lock_notifier: Option<LockNotifier>,
}

impl Tuner {
    /// Creates a tuner in [`TuningMode::Auto`] for a validated instrument.
    pub fn new(instrument: InstrumentConfig) -> Result<Self> {
        instrument.validate()?;
        info!("tuner created for instrument '{}'", instrument.name);
        Ok(Self {
            estimator: instrument.estimator_config(),
            gate: instrument.signal_gate(),
            session: TuningSession::new(instrument.session_config()),
            instrument,
            mode: TuningMode::Auto,
            publisher: None,
            lock_notifier: None,
        })
    }

    /// Publishes every frame's output to a snapshot cell.
    pub fn with_publisher(mut self, publisher: SnapshotPublisher) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Sends a [`LockEvent`] each time a lock is achieved.
    pub fn with_lock_notifier(mut self, notifier: LockNotifier) -> Self {
        self.lock_notifier = Some(notifier);
        self
    }

    pub fn instrument(&self) -> &InstrumentConfig {
        &self.instrument
    }

    pub fn mode(&self) -> &TuningMode {
        &self.mode
    }

    pub fn session(&self) -> &TuningSession {
        &self.session
    }

    /// Current outputs, for polling consumers.
    pub fn output(&self) -> TuningOutput {
        self.session.output()
    }

    /// Switches instrument and resets the session.
    pub fn set_instrument(&mut self, instrument: InstrumentConfig) -> Result<()> {
        instrument.validate()?;
        info!("switching instrument to '{}'", instrument.name);
        self.estimator = instrument.estimator_config();
        self.gate = instrument.signal_gate();
        self.session.reconfigure(instrument.session_config());
        self.instrument = instrument;
        // String indices belong to the old instrument.
        if matches!(self.mode, TuningMode::Manual { .. }) {
            self.mode = TuningMode::Auto;
        }
        self.publish(&self.session.output());
        Ok(())
    }

    pub fn set_mode(&mut self, mode: TuningMode) {
        debug!("tuning mode -> {:?}", mode);
        self.mode = mode;
        self.clear();
    }

    /// Targets one string of the current instrument.
    pub fn select_string(&mut self, string_index: usize) -> Result<()> {
        let target = self.instrument.string(string_index)?;
        let mode = TuningMode::Manual {
            string_index,
            note_name: target.name.clone(),
            target_freq: target.frequency,
        };
        self.set_mode(mode);
        Ok(())
    }

    /// Stops monitoring: all smoothing and lock state is discarded.
    pub fn stop(&mut self) {
        self.clear();
    }

    fn clear(&mut self) {
        self.session.reset();
        self.publish(&self.session.output());
    }

    /// Processes one frame, measuring its energy as RMS amplitude.
    pub fn process_frame(&mut self, frame: &SampleFrame, now: Instant) -> FrameAnalysis {
        let energy = pitch::signal_rms(&frame.samples);
        let observation = pitch::detect_pitch_yin(&frame.samples, frame.sample_rate, &self.estimator);
        self.process_observation(observation, energy, now)
    }

    /// Processes an observation whose energy was measured elsewhere.
    pub fn process_observation(
        &mut self,
        observation: PitchObservation,
        energy: f32,
        now: Instant,
    ) -> FrameAnalysis {
        let target_frequency = self.resolve_target(&observation, energy);
        let reading = self
            .gate
            .evaluate_against(&observation, energy, target_frequency)
            .reading()
            .copied();

        let output = self.session.observe(reading.map(|r| r.cents), now);
        trace!(
            "frame: energy {:.4}, {:?} -> {:?}",
            energy, observation.frequency, output.state
        );

        self.publish(&output);
        if output.lock_achieved {
            if let (Some(notifier), Some(r)) = (&self.lock_notifier, reading) {
                notifier.notify(LockEvent {
                    note: r.note,
                    frequency: r.frequency,
                    target_frequency,
                });
            }
        }

        FrameAnalysis {
            observation,
            energy,
            reading,
            target_frequency,
            output,
        }
    }

    /// Frequency the cents are measured against; `None` means the nearest
    /// chromatic note.
    fn resolve_target(&self, observation: &PitchObservation, energy: f32) -> Option<f32> {
        let freq = self.gate.admit(observation, energy)?;
        match &self.mode {
            TuningMode::Manual { target_freq, .. } => Some(*target_freq),
            TuningMode::AutoString => self
                .instrument
                .nearest_string(freq)
                .map(|index| self.instrument.strings[index].frequency),
            TuningMode::Auto => None,
        }
    }

    fn publish(&self, output: &TuningOutput) {
        if let Some(publisher) = &self.publisher {
            publisher.publish(output);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::preset;
    use crate::publish::{lock_event_channel, snapshot_channel};
    use crate::session::TuningState;
    use std::time::Duration;

    fn observed(freq: f32) -> PitchObservation {
        PitchObservation {
            frequency: Some(freq),
            confidence: 0.95,
        }
    }

    #[test]
    fn invalid_instrument_is_rejected() {
        let mut config = preset("guitar").unwrap();
        config.alpha = 2.0;
        assert!(Tuner::new(config).is_err());
    }

    #[test]
    fn manual_mode_measures_against_the_string() {
        let mut tuner = Tuner::new(preset("guitar").unwrap()).unwrap();
        tuner.select_string(1).unwrap();
        let analysis = tuner.process_observation(observed(113.0), 0.2, Instant::now());
        let reading = analysis.reading.unwrap();
        assert_eq!(analysis.target_frequency, Some(tuner.instrument().strings[1].frequency));
        assert!((reading.cents - 46.6).abs() < 0.5);
    }

    #[test]
    fn auto_string_picks_nearest_string() {
        let mut tuner = Tuner::new(preset("guitar").unwrap()).unwrap();
        tuner.set_mode(TuningMode::AutoString);
        let analysis = tuner.process_observation(observed(150.0), 0.2, Instant::now());
        let d3 = tuner.instrument().strings[2].frequency;
        assert_eq!(analysis.target_frequency, Some(d3));
    }

    #[test]
    fn unknown_string_is_an_error() {
        let mut tuner = Tuner::new(preset("ukulele").unwrap()).unwrap();
        assert!(tuner.select_string(4).is_err());
        assert_eq!(tuner.mode(), &TuningMode::Auto);
    }

    #[test]
    fn octave_error_frame_keeps_the_lock() {
        let (notifier, events) = lock_event_channel(8);
        let mut tuner = Tuner::new(preset("guitar").unwrap())
            .unwrap()
            .with_lock_notifier(notifier);
        let mut t = Instant::now();
        for _ in 0..60 {
            tuner.process_observation(observed(110.0), 0.2, t);
            t += Duration::from_millis(40);
        }
        assert!(tuner.session().is_locked());

        let glitch = tuner.process_observation(observed(220.0), 0.2, t);
        assert_eq!(glitch.reading.unwrap().note.to_string(), "A3");
        assert_eq!(glitch.output.state, TuningState::InTune);
        assert_eq!(tuner.session().buffered_readings(), 6);
        t += Duration::from_millis(40);

        for _ in 0..60 {
            let analysis = tuner.process_observation(observed(110.0), 0.2, t);
            assert_eq!(analysis.output.state, TuningState::InTune);
            t += Duration::from_millis(40);
        }
        assert!(events.try_recv().is_ok());
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn neighbouring_note_is_smoothed_not_restarted() {
        let mut tuner = Tuner::new(preset("guitar").unwrap()).unwrap();
        let mut t = Instant::now();
        for _ in 0..10 {
            tuner.process_observation(observed(112.0), 0.2, t);
            t += Duration::from_millis(40);
        }
        let before = tuner.session().smoothed_cents();
        tuner.process_observation(observed(147.0), 0.2, t);
        assert_eq!(tuner.session().buffered_readings(), 6);
        assert_ne!(tuner.session().smoothed_cents(), 0.0);
        assert_ne!(tuner.session().smoothed_cents(), before);
    }

    #[test]
    fn instrument_switch_starts_a_fresh_session() {
        let (publisher, reader) = snapshot_channel();
        let mut tuner = Tuner::new(preset("guitar").unwrap())
            .unwrap()
            .with_publisher(publisher);
        tuner.select_string(5).unwrap();
        let mut t = Instant::now();
        for _ in 0..40 {
            tuner.process_observation(observed(330.0), 0.2, t);
            t += Duration::from_millis(40);
        }
        assert!(tuner.session().buffered_readings() > 0);

        let bass = preset("bass").unwrap();
        let capacity = bass.buffer_capacity;
        tuner.set_instrument(bass).unwrap();
        assert_eq!(tuner.mode(), &TuningMode::Auto);
        assert_eq!(tuner.session().config().buffer_capacity, capacity);
        assert_eq!(tuner.session().buffered_readings(), 0);
        assert_eq!(tuner.session().smoothed_cents(), 0.0);
        assert!(!tuner.session().is_locked());
        assert_eq!(reader.load().state, TuningState::NoSignal);
    }

    #[test]
    fn mode_change_resets_session_and_snapshot() {
        let (publisher, reader) = snapshot_channel();
        let mut tuner = Tuner::new(preset("guitar").unwrap())
            .unwrap()
            .with_publisher(publisher);
        let mut t = Instant::now();
        for _ in 0..40 {
            tuner.process_observation(observed(116.0), 0.2, t);
            t += Duration::from_millis(40);
        }
        assert_ne!(reader.load().state, TuningState::NoSignal);

        tuner.select_string(0).unwrap();
        assert_eq!(reader.load().state, TuningState::NoSignal);
        assert_eq!(tuner.session().smoothed_cents(), 0.0);
    }

    #[test]
    fn lock_event_fires_once_per_episode() {
        let (notifier, events) = lock_event_channel(8);
        let mut tuner = Tuner::new(preset("guitar").unwrap())
            .unwrap()
            .with_lock_notifier(notifier);
        let mut t = Instant::now();
        for _ in 0..100 {
            tuner.process_observation(observed(110.0), 0.2, t);
            t += Duration::from_millis(40);
        }
        let event = events.try_recv().expect("lock event");
        assert_eq!(event.note.to_string(), "A2");
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn gated_frames_are_silence() {
        let mut tuner = Tuner::new(preset("guitar").unwrap()).unwrap();
        let analysis = tuner.process_observation(observed(110.0), 0.001, Instant::now());
        assert!(analysis.reading.is_none());
        assert_eq!(analysis.output.state, TuningState::NoSignal);
    }
}
