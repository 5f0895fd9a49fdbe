//! # Tuning Session Module
//!
//! Turns the noisy frame-by-frame cents readings into a stable display value
//! and a discrete tuning verdict.
//!
//! Each accepted reading goes through a short rolling buffer, whose mean feeds
//! an exponentially weighted moving average. The session locks ("in tune")
//! once the average has stayed within the lock threshold for the configured
//! duration, and unlocks the instant it leaves it. Silence decays the average
//! towards zero instead of snapping it.
//!
//! The session never fails: anything that is not a finite reading is silence.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

/// Cents at which the needle reaches full deflection.
pub const NEEDLE_RANGE_CENTS: f32 = 50.0;

/// Smoothing and lock parameters of a session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionConfig {
    /// EWMA weight of the newest buffer mean, in `(0, 1]`. Smaller is smoother.
    pub alpha: f32,
    /// Number of readings kept in the rolling buffer.
    pub buffer_capacity: usize,
    /// Maximum |cents| that counts as in tune.
    pub lock_threshold_cents: f32,
    /// Maximum |cents| reported as `Close`; beyond it the state is `Flat`/`Sharp`.
    pub close_threshold_cents: f32,
    /// How long the average must stay within the lock threshold before locking.
    pub lock_duration: Duration,
    /// Per-frame multiplier applied to the average during silence.
    pub decay_factor: f32,
    /// Below this magnitude a decaying average snaps to zero.
    pub silence_epsilon: f32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            alpha: 0.1,
            buffer_capacity: 6,
            lock_threshold_cents: 4.0,
            close_threshold_cents: 15.0,
            lock_duration: Duration::from_millis(800),
            decay_factor: 0.9,
            silence_epsilon: 0.05,
        }
    }
}

impl SessionConfig {
    /// Replaces unusable values so the session arithmetic stays finite.
    ///
    /// Non-finite or non-positive `alpha` falls back to the default and is
    /// capped at 1. `decay_factor` is kept in `[0, 1)`, non-finite thresholds
    /// fall back to their defaults and the buffer holds at least one reading.
    pub fn sanitized(self) -> Self {
        let defaults = Self::default();
        let finite_or = |value: f32, fallback: f32| if value.is_finite() { value } else { fallback };

        let alpha = if self.alpha.is_finite() && self.alpha > 0.0 {
            self.alpha.min(1.0)
        } else {
            defaults.alpha
        };
        let decay_factor = if self.decay_factor.is_finite() {
            self.decay_factor.clamp(0.0, 0.999)
        } else {
            defaults.decay_factor
        };

        let sanitized = Self {
            alpha,
            buffer_capacity: self.buffer_capacity.max(1),
            lock_threshold_cents: finite_or(self.lock_threshold_cents, defaults.lock_threshold_cents).abs(),
            close_threshold_cents: finite_or(self.close_threshold_cents, defaults.close_threshold_cents).abs(),
            lock_duration: self.lock_duration,
            decay_factor,
            silence_epsilon: finite_or(self.silence_epsilon, defaults.silence_epsilon).abs(),
        };
        if sanitized != self {
            warn!("session config {:?} adjusted to {:?}", self, sanitized);
        }
        sanitized
    }
}

/// Discrete verdict shown to the player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TuningState {
    #[default]
    NoSignal,
    Flat,
    Sharp,
    Close,
    InTune,
}

impl TuningState {
    /// Classifies a smoothed value.
    ///
    /// This depends only on its arguments, so display code can recompute it
    /// from a snapshot at any time.
    pub fn classify(
        cents: f32,
        locked: bool,
        signal_present: bool,
        close_threshold_cents: f32,
    ) -> Self {
        if !signal_present {
            TuningState::NoSignal
        } else if locked {
            TuningState::InTune
        } else if cents.abs() <= close_threshold_cents {
            TuningState::Close
        } else if cents < 0.0 {
            TuningState::Flat
        } else {
            TuningState::Sharp
        }
    }
}

/// What the display consumes after each observation.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TuningOutput {
    /// Smoothed cents deviation; pinned to zero while locked.
    pub cents: f32,
    /// Needle position in `[-1, 1]`.
    pub needle: f32,
    pub state: TuningState,
    /// True only on the observation that achieved the lock.
    pub lock_achieved: bool,
}

/// Needle position for a cents value.
pub fn needle_position(cents: f32) -> f32 {
    (cents / NEEDLE_RANGE_CENTS).clamp(-1.0, 1.0)
}

/// Stateful smoother and lock tracker for one monitoring session.
#[derive(Debug, Clone)]
pub struct TuningSession {
    config: SessionConfig,
    readings: VecDeque<f32>,
    ewma: f32,
    locked: bool,
    in_zone_since: Option<Instant>,
    success_signaled: bool,
    signal_present: bool,
    last_state: TuningState,
}

impl TuningSession {
    /// Creates an empty session. The configuration passes through
    /// [`SessionConfig::sanitized`] first.
    pub fn new(config: SessionConfig) -> Self {
        let config = config.sanitized();
        Self {
            readings: VecDeque::with_capacity(config.buffer_capacity),
            config,
            ewma: 0.0,
            locked: false,
            in_zone_since: None,
            success_signaled: false,
            signal_present: false,
            last_state: TuningState::NoSignal,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Clears all smoothing and lock state.
    pub fn reset(&mut self) {
        debug!("tuning session reset");
        self.readings.clear();
        self.ewma = 0.0;
        self.locked = false;
        self.in_zone_since = None;
        self.success_signaled = false;
        self.signal_present = false;
        self.last_state = TuningState::NoSignal;
    }

    /// Replaces the configuration and starts over.
    pub fn reconfigure(&mut self, config: SessionConfig) {
        *self = Self::new(config);
        debug!("tuning session reconfigured: {:?}", self.config);
    }

    /// Feeds one frame's reading. `None` (or a non-finite value) is silence.
    pub fn observe(&mut self, cents: Option<f32>, now: Instant) -> TuningOutput {
        let lock_achieved = match cents.filter(|c| c.is_finite()) {
            Some(cents) => self.observe_signal(cents, now),
            None => {
                self.observe_silence();
                false
            }
        };

        let output = TuningOutput {
            lock_achieved,
            ..self.output()
        };
        if output.state != self.last_state {
            debug!(
                "tuning state {:?} -> {:?} (ewma {:.2} cents)",
                self.last_state, output.state, self.ewma
            );
            self.last_state = output.state;
        }
        output
    }

    fn observe_signal(&mut self, cents: f32, now: Instant) -> bool {
        self.signal_present = true;

        if self.readings.len() == self.config.buffer_capacity {
            self.readings.pop_front();
        }
        self.readings.push_back(cents);

        let mean = self.readings.iter().sum::<f32>() / self.readings.len() as f32;
        self.ewma = self.config.alpha * mean + (1.0 - self.config.alpha) * self.ewma;

        if self.ewma.abs() > self.config.lock_threshold_cents {
            self.clear_lock();
            return false;
        }

        let since = *self.in_zone_since.get_or_insert(now);
        if !self.locked && now.saturating_duration_since(since) >= self.config.lock_duration {
            self.locked = true;
            if !self.success_signaled {
                self.success_signaled = true;
                info!("locked in tune at {:+.2} cents", self.ewma);
                return true;
            }
        }
        false
    }

    fn observe_silence(&mut self) {
        self.signal_present = false;
        self.clear_lock();

        self.ewma *= self.config.decay_factor;
        if self.ewma.abs() < self.config.silence_epsilon {
            self.ewma = 0.0;
            self.readings.clear();
        }
    }

    fn clear_lock(&mut self) {
        self.in_zone_since = None;
        self.locked = false;
        self.success_signaled = false;
    }

    /// Current outputs, recomputed from the session state.
    pub fn output(&self) -> TuningOutput {
        let cents = if self.locked { 0.0 } else { self.ewma };
        TuningOutput {
            cents,
            needle: needle_position(cents),
            state: self.state(),
            lock_achieved: false,
        }
    }

    pub fn state(&self) -> TuningState {
        TuningState::classify(
            self.ewma,
            self.locked,
            self.signal_present,
            self.config.close_threshold_cents,
        )
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn success_signaled(&self) -> bool {
        self.success_signaled
    }

    /// The raw smoothed average, not pinned while locked.
    pub fn smoothed_cents(&self) -> f32 {
        self.ewma
    }

    pub fn buffered_readings(&self) -> usize {
        self.readings.len()
    }
}
