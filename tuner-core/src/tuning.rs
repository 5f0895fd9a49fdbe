//! # Musical Tuning Module
//!
//! Frequency to note mapping in twelve-tone equal temperament with A4 = 440 Hz.
//!
//! ## Features
//! - Nearest chromatic note with octave and cents deviation
//! - Cents deviation against an arbitrary target frequency
//! - Note name parsing ("E2", "C#3", "Bb2") and note frequency calculation
//!
//! All functions here are pure; the same input always yields the same note.

use std::fmt;

/// Reference pitch A4 in Hz.
pub const A4_FREQUENCY: f32 = 440.0;

/// Octave of the reference pitch.
const A4_OCTAVE: i32 = 4;

/// Semitones from C up to A within one octave.
const A_FROM_C: i32 = 9;

/// One of the twelve pitch classes, indexed from C.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PitchClass {
    C,
    CSharp,
    D,
    DSharp,
    E,
    F,
    FSharp,
    G,
    GSharp,
    A,
    ASharp,
    B,
}

impl PitchClass {
    pub const ALL: [PitchClass; 12] = [
        PitchClass::C,
        PitchClass::CSharp,
        PitchClass::D,
        PitchClass::DSharp,
        PitchClass::E,
        PitchClass::F,
        PitchClass::FSharp,
        PitchClass::G,
        PitchClass::GSharp,
        PitchClass::A,
        PitchClass::ASharp,
        PitchClass::B,
    ];

    /// Pitch class for any integer index; negative indices wrap around.
    pub fn from_index(index: i32) -> Self {
        Self::ALL[index.rem_euclid(12) as usize]
    }

    /// Index in `0..12`, C = 0.
    pub fn index(self) -> i32 {
        self as i32
    }

    pub fn name(self) -> &'static str {
        match self {
            PitchClass::C => "C",
            PitchClass::CSharp => "C#",
            PitchClass::D => "D",
            PitchClass::DSharp => "D#",
            PitchClass::E => "E",
            PitchClass::F => "F",
            PitchClass::FSharp => "F#",
            PitchClass::G => "G",
            PitchClass::GSharp => "G#",
            PitchClass::A => "A",
            PitchClass::ASharp => "A#",
            PitchClass::B => "B",
        }
    }
}

impl fmt::Display for PitchClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single musical note with its exact equal-temperament frequency.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MusicalNote {
    pub pitch_class: PitchClass,
    pub octave: i32,
    /// Reference frequency of this exact pitch in Hz.
    pub frequency: f32,
}

impl MusicalNote {
    /// Builds the note lying `semitones` above (or below) A4.
    pub fn from_semitones_from_a4(semitones: i32) -> Self {
        let from_c4 = semitones + A_FROM_C;
        Self {
            pitch_class: PitchClass::from_index(from_c4),
            octave: A4_OCTAVE + from_c4.div_euclid(12),
            frequency: note_frequency(semitones),
        }
    }

    /// Signed semitone distance from A4.
    pub fn semitones_from_a4(&self) -> i32 {
        (self.octave - A4_OCTAVE) * 12 + self.pitch_class.index() - A_FROM_C
    }

    pub fn name(&self) -> &'static str {
        self.pitch_class.name()
    }
}

impl fmt::Display for MusicalNote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.pitch_class, self.octave)
    }
}

/// An accepted frequency mapped onto a note.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoteReading {
    /// The detected frequency in Hz.
    pub frequency: f32,
    /// Nearest chromatic note to the detected frequency.
    pub note: MusicalNote,
    /// Deviation in cents, against the nearest note or an explicit target.
    pub cents: f32,
}

/// Frequency of the note `semitones` away from A4.
pub fn note_frequency(semitones: i32) -> f32 {
    A4_FREQUENCY * 2.0_f32.powf(semitones as f32 / 12.0)
}

/// Maps a frequency to its nearest chromatic note and the cents deviation.
///
/// The returned cents always lie in `[-50, 50]`.
///
/// # Arguments
/// * `freq` - Frequency in Hz, must be positive and finite
///
/// # Returns
/// * `Some((note, cents))`, or `None` for non-positive or non-finite input
pub fn frequency_to_note(freq: f32) -> Option<(MusicalNote, f32)> {
    if !freq.is_finite() || freq <= 0.0 {
        return None;
    }
    let semitones = 12.0 * (freq / A4_FREQUENCY).log2();
    let nearest = semitones.round();
    let cents = (semitones - nearest) * 100.0;
    Some((MusicalNote::from_semitones_from_a4(nearest as i32), cents))
}

/// Calculates the deviation from a target frequency in cents.
///
/// Cents are a logarithmic unit of pitch measurement where:
/// - 100 cents = 1 semitone
/// - 1200 cents = 1 octave
/// - Positive values indicate sharpness, negative values indicate flatness
pub fn calculate_cents_deviation(freq: f32, target_freq: f32) -> f32 {
    1200.0 * (freq / target_freq).log2()
}

/// Parses a note name such as "A4", "C#3", "Bb2" or "E-1".
pub fn parse_note_name(name: &str) -> Option<MusicalNote> {
    let name = name.trim();
    let mut chars = name.chars();
    let letter = chars.next()?.to_ascii_uppercase();
    let base = match letter {
        'C' => 0,
        'D' => 2,
        'E' => 4,
        'F' => 5,
        'G' => 7,
        'A' => 9,
        'B' => 11,
        _ => return None,
    };

    let rest = chars.as_str();
    let (accidental, octave_str) = match rest.chars().next() {
        Some('#') => (1, &rest[1..]),
        Some('b') => (-1, &rest[1..]),
        _ => (0, rest),
    };
    let octave: i32 = octave_str.parse().ok()?;

    let semitones = (octave - A4_OCTAVE) * 12 + base + accidental - A_FROM_C;
    Some(MusicalNote::from_semitones_from_a4(semitones))
}
