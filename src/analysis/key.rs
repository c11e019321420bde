use serde::{Deserialize, Serialize};
use std::fmt;

use super::peaks::Peak;
use super::room_modes::RoomMode;
use super::tuning::{octave_distance, PitchClass, Tuning};
use crate::config::{AnalysisConfig, KeyConfig};

/// Octaves searched when matching a peak to a pitch class.
const NOTE_OCTAVES: std::ops::RangeInclusive<i32> = 1..=6;
/// Maximum distance (octaves) for a peak to count as a note.
const NOTE_TOLERANCE: f32 = 0.08;
const NOTE_CONFIDENCE_FLOOR: f32 = 30.0;
const MAX_NOTES: usize = 6;
const OFF_SCALE_PENALTY: f32 = 0.5;
const ROOT_BONUS: f32 = 2.0;

const NEAREST_OCTAVES: std::ops::RangeInclusive<i32> = 1..=5;
const NEAREST_TOLERANCE: f32 = 0.1;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum KeyStrategy {
    /// Score whole scale templates against every detected note
    #[default]
    Scale,
    /// Pick the single best-supported pitch class
    Nearest,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScaleMode {
    Major,
    Minor,
    Dorian,
    Mixolydian,
    Pentatonic,
}

impl ScaleMode {
    /// Scoring order; on equal scores the earlier mode wins.
    pub const ALL: [ScaleMode; 5] = [
        ScaleMode::Major,
        ScaleMode::Minor,
        ScaleMode::Dorian,
        ScaleMode::Mixolydian,
        ScaleMode::Pentatonic,
    ];

    /// Semitones above the root.
    pub fn intervals(self) -> &'static [u8] {
        match self {
            ScaleMode::Major => &[0, 2, 4, 5, 7, 9, 11],
            ScaleMode::Minor => &[0, 2, 3, 5, 7, 8, 10],
            ScaleMode::Dorian => &[0, 2, 3, 5, 7, 9, 10],
            ScaleMode::Mixolydian => &[0, 2, 4, 5, 7, 9, 10],
            ScaleMode::Pentatonic => &[0, 2, 4, 7, 9],
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ScaleMode::Major => "major",
            ScaleMode::Minor => "minor",
            ScaleMode::Dorian => "dorian",
            ScaleMode::Mixolydian => "mixolydian",
            ScaleMode::Pentatonic => "pentatonic",
        }
    }
}

/// Weight of a scale degree, by its position in the template.
fn degree_bonus(position: usize) -> f32 {
    match position {
        0 => ROOT_BONUS,
        4 => 1.8,
        2 => 1.5,
        _ => 1.0,
    }
}

/// Tonal centre, with a mode when the strategy can tell one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct Key {
    pub root: PitchClass,
    pub mode: Option<ScaleMode>,
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.mode {
            Some(mode) => write!(f, "{} {}", self.root, mode.name()),
            None => write!(f, "{}", self.root),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct KeyHypothesis {
    pub key: Key,
    pub confidence: f32,
}

/// A frequency with the weight it carries into inference.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Observation {
    pub frequency: f32,
    pub weight: f32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DetectedNote {
    pub pitch_class: PitchClass,
    pub confidence: f32,
    pub frequency: f32,
}

/// Infers a key from peaks and room modes.
#[derive(Clone, Debug)]
pub struct KeyInference {
    strategy: KeyStrategy,
    tuning: Tuning,
    acceptance: f32,
    low_band_weight: f32,
    high_band_weight: f32,
}

impl KeyInference {
    pub fn new(key: &KeyConfig, analysis: &AnalysisConfig) -> Self {
        Self {
            strategy: key.strategy,
            tuning: Tuning::new(key.temperament),
            acceptance: key.acceptance,
            low_band_weight: analysis.low_band_weight,
            high_band_weight: analysis.high_band_weight,
        }
    }

    pub fn tuning(&self) -> &Tuning {
        &self.tuning
    }

    /// Low-band peaks share the drone band and count for less.
    pub fn observations(&self, peaks: &[Peak], modes: &[RoomMode]) -> Vec<Observation> {
        let weighted = peaks.iter().map(|p| Observation {
            frequency: p.frequency,
            weight: p.amplitude as f32
                * if p.is_low_band {
                    self.low_band_weight
                } else {
                    self.high_band_weight
                },
        });
        let resonant = modes.iter().map(|m| Observation {
            frequency: m.frequency,
            weight: m.strength,
        });
        weighted.chain(resonant).collect()
    }

    pub fn infer(&self, peaks: &[Peak], modes: &[RoomMode]) -> Option<KeyHypothesis> {
        self.infer_observations(&self.observations(peaks, modes))
    }

    pub fn infer_observations(&self, observations: &[Observation]) -> Option<KeyHypothesis> {
        let hypothesis = match self.strategy {
            KeyStrategy::Scale => {
                if observations.len() < 2 {
                    return None;
                }
                let notes = self.detect_notes(observations);
                self.score_scales(&notes)
            }
            KeyStrategy::Nearest => self.nearest_pitch_class(observations),
        }?;

        if hypothesis.confidence > self.acceptance {
            Some(hypothesis)
        } else {
            log::trace!(
                "Rejected {} at confidence {:.1}",
                hypothesis.key,
                hypothesis.confidence
            );
            None
        }
    }

    /// Best pitch class per observation, deduplicated and ranked by confidence.
    pub fn detect_notes(&self, observations: &[Observation]) -> Vec<DetectedNote> {
        let mut notes: Vec<DetectedNote> = Vec::new();

        for obs in observations {
            let mut best: Option<DetectedNote> = None;
            for pitch_class in PitchClass::all() {
                for octave in NOTE_OCTAVES {
                    let candidate = self.tuning.frequency(pitch_class, octave);
                    let distance = octave_distance(obs.frequency, candidate);
                    if distance >= NOTE_TOLERANCE {
                        continue;
                    }
                    let confidence = obs.weight * (1.0 - distance / NOTE_TOLERANCE);
                    if best.map_or(true, |b| confidence > b.confidence) {
                        best = Some(DetectedNote {
                            pitch_class,
                            confidence,
                            frequency: obs.frequency,
                        });
                    }
                }
            }
            if let Some(note) = best.filter(|n| n.confidence > NOTE_CONFIDENCE_FLOOR) {
                notes.push(note);
            }
        }

        notes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        let mut unique: Vec<DetectedNote> = Vec::with_capacity(MAX_NOTES);
        for note in notes {
            if !unique.iter().any(|n| n.pitch_class == note.pitch_class) {
                unique.push(note);
            }
        }
        unique.truncate(MAX_NOTES);
        unique
    }

    /// Best (root, mode) over every template, as a percentage of the score
    /// all-root input would reach. `None` below two distinct notes.
    pub fn score_scales(&self, notes: &[DetectedNote]) -> Option<KeyHypothesis> {
        if notes.len() < 2 {
            return None;
        }
        let total_weight: f32 = notes.iter().map(|n| n.confidence).sum();
        if total_weight <= 0.0 {
            return None;
        }

        let mut best: Option<KeyHypothesis> = None;
        let mut best_score = 0.0f32;
        for root in PitchClass::all() {
            for mode in ScaleMode::ALL {
                let pattern = mode.intervals();
                let matched: f32 = notes
                    .iter()
                    .map(|note| {
                        let interval = note.pitch_class.interval_from(root);
                        match pattern.iter().position(|&i| i == interval) {
                            Some(position) => note.confidence * degree_bonus(position),
                            None => -note.confidence * OFF_SCALE_PENALTY,
                        }
                    })
                    .sum();
                let score = 100.0 * matched / (ROOT_BONUS * total_weight);
                if score > best_score {
                    best_score = score;
                    best = Some(KeyHypothesis {
                        key: Key {
                            root,
                            mode: Some(mode),
                        },
                        confidence: score,
                    });
                }
            }
        }
        best
    }

    fn nearest_pitch_class(&self, observations: &[Observation]) -> Option<KeyHypothesis> {
        if observations.is_empty() {
            return None;
        }

        let mut best: Option<KeyHypothesis> = None;
        for pitch_class in PitchClass::all() {
            let score: f32 = observations
                .iter()
                .filter_map(|obs| {
                    let distance = NEAREST_OCTAVES
                        .map(|octave| {
                            octave_distance(obs.frequency, self.tuning.frequency(pitch_class, octave))
                        })
                        .fold(f32::INFINITY, f32::min);
                    (distance < NEAREST_TOLERANCE)
                        .then(|| obs.weight * (1.0 - distance / NEAREST_TOLERANCE))
                })
                .sum();
            if best.as_ref().map_or(true, |b| score > b.confidence) {
                best = Some(KeyHypothesis {
                    key: Key {
                        root: pitch_class,
                        mode: None,
                    },
                    confidence: score,
                });
            }
        }
        best
    }
}
