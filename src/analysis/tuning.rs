use serde::{Deserialize, Serialize};
use std::fmt;

/// Equal-tempered C4, the anchor every tuning table is built from.
pub const C4_HZ: f32 = 261.626;

/// Label returned for frequencies outside the audible naming range.
pub const UNKNOWN_NOTE: &str = "--";

const NAMING_MIN_HZ: f32 = 20.0;
const NAMING_MAX_HZ: f32 = 20_000.0;

const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Vallotti well-temperament, cents away from equal temperament per semitone from C.
const VALLOTTI_CENTS: [f32; 12] = [
    0.0, -5.86, -3.91, -9.77, -1.96, -1.96, -7.82, -1.96, -7.82, -3.91, -9.77, -1.96,
];

const EQUAL_CENTS: [f32; 12] = [0.0; 12];

/// One of the twelve pitch classes, C = 0 through B = 11.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(into = "String")]
pub struct PitchClass(u8);

impl PitchClass {
    pub const C: PitchClass = PitchClass(0);
    pub const E: PitchClass = PitchClass(4);
    pub const G: PitchClass = PitchClass(7);
    pub const A: PitchClass = PitchClass(9);

    /// Wraps any semitone offset into a pitch class.
    pub fn new(semitone: i32) -> Self {
        PitchClass(semitone.rem_euclid(12) as u8)
    }

    pub fn all() -> impl Iterator<Item = PitchClass> {
        (0..12).map(PitchClass)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub fn name(self) -> &'static str {
        NOTE_NAMES[self.index()]
    }

    pub fn from_name(name: &str) -> Option<Self> {
        NOTE_NAMES
            .iter()
            .position(|n| n.eq_ignore_ascii_case(name))
            .map(|i| PitchClass(i as u8))
    }

    /// Interval in semitones from `root` up to `self`, in 0..12.
    pub fn interval_from(self, root: PitchClass) -> u8 {
        (self.0 + 12 - root.0) % 12
    }

    pub fn transpose(self, semitones: i32) -> Self {
        PitchClass::new(self.0 as i32 + semitones)
    }
}

impl fmt::Display for PitchClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl From<PitchClass> for String {
    fn from(pc: PitchClass) -> Self {
        pc.name().to_string()
    }
}

/// A pitch class pinned to an octave, e.g. A4.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Note {
    pub pitch_class: PitchClass,
    pub octave: i32,
}

impl Note {
    pub fn new(pitch_class: PitchClass, octave: i32) -> Self {
        Self { pitch_class, octave }
    }

    /// Parses labels like "C#3" or "A4".
    pub fn parse(label: &str) -> Option<Self> {
        let split = label.find(|c: char| c.is_ascii_digit() || c == '-')?;
        let (name, octave) = label.split_at(split);
        Some(Self {
            pitch_class: PitchClass::from_name(name)?,
            octave: octave.parse().ok()?,
        })
    }
}

impl fmt::Display for Note {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.pitch_class, self.octave)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Temperament {
    /// Vallotti's 18th-century well-temperament.
    #[default]
    Vallotti,
    Equal,
}

impl Temperament {
    pub fn cents(self) -> &'static [f32; 12] {
        match self {
            Temperament::Vallotti => &VALLOTTI_CENTS,
            Temperament::Equal => &EQUAL_CENTS,
        }
    }
}

/// Frequency table for the twelve pitch classes under one temperament.
/// The cent offsets are constant across octaves.
#[derive(Clone, Copy, Debug)]
pub struct Tuning {
    temperament: Temperament,
}

impl Tuning {
    pub fn new(temperament: Temperament) -> Self {
        Self { temperament }
    }

    pub fn frequency(&self, pitch_class: PitchClass, octave: i32) -> f32 {
        let semitone = pitch_class.index() as f32;
        let equal = C4_HZ * 2f32.powf(semitone / 12.0) * 2f32.powi(octave - 4);
        equal * 2f32.powf(self.temperament.cents()[pitch_class.index()] / 1200.0)
    }

    pub fn note_frequency(&self, note: Note) -> f32 {
        self.frequency(note.pitch_class, note.octave)
    }

    /// Nearest tuned note across octaves 0-9, or `None` outside 20 Hz-20 kHz.
    pub fn nearest_note(&self, freq: f32) -> Option<Note> {
        if !(NAMING_MIN_HZ..=NAMING_MAX_HZ).contains(&freq) {
            return None;
        }

        let mut best = Note::new(PitchClass::C, 4);
        let mut best_distance = f32::INFINITY;
        for octave in 0..=9 {
            for pitch_class in PitchClass::all() {
                let distance = octave_distance(freq, self.frequency(pitch_class, octave));
                if distance < best_distance {
                    best_distance = distance;
                    best = Note::new(pitch_class, octave);
                }
            }
        }
        Some(best)
    }

    /// Note label such as "A4", or `"--"` for out-of-range input.
    pub fn note_name(&self, freq: f32) -> String {
        match self.nearest_note(freq) {
            Some(note) => note.to_string(),
            None => UNKNOWN_NOTE.to_string(),
        }
    }
}

impl Default for Tuning {
    fn default() -> Self {
        Self::new(Temperament::default())
    }
}

/// Distance between two frequencies in octaves.
pub fn octave_distance(a: f32, b: f32) -> f32 {
    (a / b).log2().abs()
}
