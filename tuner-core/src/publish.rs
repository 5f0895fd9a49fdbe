//! Cross-thread publishing of tuning outputs.
//!
//! The analysis thread owns the session and is the single writer. Display
//! code polls a [`SnapshotReader`]; the cents value and the state are packed
//! into one `AtomicU64`, so every read sees a consistent pair and neither
//! side ever blocks. The needle is derived from the packed cents on read.
//!
//! Lock events go over a bounded crossbeam channel with `try_send`, so a slow
//! consumer costs dropped events, never a stalled producer.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_channel::{Receiver, Sender, TrySendError};
use log::warn;

use crate::session::{TuningOutput, TuningState, needle_position};
use crate::tuning::MusicalNote;

/// A consistent view of the three display outputs.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TuningSnapshot {
    pub cents: f32,
    pub needle: f32,
    pub state: TuningState,
}

fn state_code(state: TuningState) -> u64 {
    match state {
        TuningState::NoSignal => 0,
        TuningState::Flat => 1,
        TuningState::Sharp => 2,
        TuningState::Close => 3,
        TuningState::InTune => 4,
    }
}

fn state_from_code(code: u64) -> TuningState {
    match code {
        1 => TuningState::Flat,
        2 => TuningState::Sharp,
        3 => TuningState::Close,
        4 => TuningState::InTune,
        _ => TuningState::NoSignal,
    }
}

fn pack(cents: f32, state: TuningState) -> u64 {
    ((cents.to_bits() as u64) << 32) | state_code(state)
}

fn unpack(bits: u64) -> TuningSnapshot {
    let cents = f32::from_bits((bits >> 32) as u32);
    TuningSnapshot {
        cents,
        needle: needle_position(cents),
        state: state_from_code(bits & 0xff),
    }
}

/// Writing half of a snapshot cell. Not `Clone`: there is one writer.
#[derive(Debug)]
pub struct SnapshotPublisher {
    cell: Arc<AtomicU64>,
}

/// Reading half of a snapshot cell; cheap to clone and share.
#[derive(Debug, Clone)]
pub struct SnapshotReader {
    cell: Arc<AtomicU64>,
}

/// Creates a connected publisher/reader pair holding a `NoSignal` snapshot.
pub fn snapshot_channel() -> (SnapshotPublisher, SnapshotReader) {
    let cell = Arc::new(AtomicU64::new(pack(0.0, TuningState::NoSignal)));
    (
        SnapshotPublisher { cell: cell.clone() },
        SnapshotReader { cell },
    )
}

impl SnapshotPublisher {
    pub fn publish(&self, output: &TuningOutput) {
        self.cell
            .store(pack(output.cents, output.state), Ordering::Release);
    }
}

impl SnapshotReader {
    pub fn load(&self) -> TuningSnapshot {
        unpack(self.cell.load(Ordering::Acquire))
    }
}

/// Fired once per lock episode.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LockEvent {
    /// Note the player locked onto.
    pub note: MusicalNote,
    /// Detected frequency on the locking frame, in Hz.
    pub frequency: f32,
    /// Target frequency when tuning to a specific string.
    pub target_frequency: Option<f32>,
}

/// Non-blocking sender of lock events.
#[derive(Debug, Clone)]
pub struct LockNotifier {
    sender: Sender<LockEvent>,
}

/// Creates a bounded lock event channel.
pub fn lock_event_channel(capacity: usize) -> (LockNotifier, Receiver<LockEvent>) {
    let (sender, receiver) = crossbeam_channel::bounded(capacity.max(1));
    (LockNotifier { sender }, receiver)
}

impl LockNotifier {
    /// Returns whether the event was delivered.
    pub fn notify(&self, event: LockEvent) -> bool {
        match self.sender.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("lock event dropped: consumer is not keeping up");
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }
}
