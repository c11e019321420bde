use serde::Serialize;

use crate::analysis::tuning::UNKNOWN_NOTE;
use crate::analysis::{Peak, Tuning};

const SMOOTHING: f32 = 0.92;
/// Ticks a new note must hold before it is displayed.
const NOTE_HOLD_TICKS: u32 = 8;
const FADE_DELAY_SECS: f64 = 0.5;
const FADE_SECS: f64 = 1.5;
const SECONDARY_PEAKS: usize = 3;

/// What a spectrum view needs to draw the peak indicators.
#[derive(Clone, Debug, Serialize)]
pub struct PeakDisplay {
    pub frequency: f32,
    /// Smoothed analysis column of the main peak
    pub position: f32,
    pub note: String,
    pub secondary: Vec<Peak>,
    pub opacity: f32,
    #[serde(skip)]
    candidate_note: String,
    #[serde(skip)]
    hold: u32,
    #[serde(skip)]
    last_peak_at: f64,
    #[serde(skip)]
    tuning: Tuning,
}

impl PeakDisplay {
    pub fn new(tuning: Tuning, now: f64) -> Self {
        Self {
            frequency: 0.0,
            position: 0.0,
            note: String::new(),
            secondary: Vec::new(),
            opacity: 0.0,
            candidate_note: String::new(),
            hold: 0,
            last_peak_at: now,
            tuning,
        }
    }

    /// Whether the indicator is worth drawing.
    pub fn visible(&self) -> bool {
        self.opacity > 0.05 && self.position > 0.0
    }

    pub fn update(&mut self, peaks: &[Peak], significant: bool, now: f64) {
        let main = match peaks.first() {
            Some(main) if significant => main,
            _ => {
                self.fade(now);
                return;
            }
        };

        self.frequency = self.frequency * SMOOTHING + main.frequency * (1.0 - SMOOTHING);
        self.position = self.position * SMOOTHING + main.position as f32 * (1.0 - SMOOTHING);

        let note = self.tuning.note_name(main.frequency);
        if note != self.candidate_note {
            self.candidate_note = note;
            self.hold = 0;
        } else {
            self.hold += 1;
        }
        if self.hold > NOTE_HOLD_TICKS || self.note.is_empty() {
            self.note = self.candidate_note.clone();
        }

        self.secondary = peaks.iter().skip(1).take(SECONDARY_PEAKS).cloned().collect();
        self.last_peak_at = now;
        self.opacity = 1.0;
    }

    fn fade(&mut self, now: f64) {
        let since = now - self.last_peak_at;
        if since > FADE_DELAY_SECS {
            let progress = ((since - FADE_DELAY_SECS) / FADE_SECS).min(1.0);
            self.opacity = (1.0 - progress) as f32;
        } else if self.position > 0.0 {
            self.opacity = 1.0;
        }
    }

    pub fn note_or_unknown(&self) -> &str {
        if self.note.is_empty() {
            UNKNOWN_NOTE
        } else {
            &self.note
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peak(frequency: f32, position: usize) -> Peak {
        Peak {
            frequency,
            amplitude: 200,
            position,
            is_low_band: frequency < 500.0,
        }
    }

    #[test]
    fn smooths_towards_the_main_peak() {
        let mut display = PeakDisplay::new(Tuning::default(), 0.0);
        for i in 0..200 {
            display.update(&[peak(440.0, 600)], true, i as f64 / 60.0);
        }
        assert!((display.frequency - 440.0).abs() < 1.0);
        assert!((display.position - 600.0).abs() < 1.0);
        assert_eq!(display.note, "A4");
        assert!(display.visible());
    }

    #[test]
    fn note_switches_only_after_holding() {
        let mut display = PeakDisplay::new(Tuning::default(), 0.0);
        display.update(&[peak(440.0, 600)], true, 0.0);
        assert_eq!(display.note, "A4");
        for i in 0..9 {
            display.update(&[peak(262.0, 500)], true, 0.1 + i as f64 * 0.01);
            assert_eq!(display.note, "A4");
        }
        display.update(&[peak(262.0, 500)], true, 0.2);
        assert_eq!(display.note, "C4");
    }

    #[test]
    fn keeps_up_to_three_secondary_peaks() {
        let mut display = PeakDisplay::new(Tuning::default(), 0.0);
        let peaks: Vec<Peak> = (0..5).map(|i| peak(100.0 * (i + 1) as f32, i)).collect();
        display.update(&peaks, true, 0.0);
        assert_eq!(display.secondary.len(), 3);
        assert_eq!(display.secondary[0].frequency, 200.0);
    }

    #[test]
    fn indicator_fades_after_the_delay() {
        let mut display = PeakDisplay::new(Tuning::default(), 0.0);
        display.update(&[peak(440.0, 600)], true, 1.0);
        display.update(&[], false, 1.4);
        assert_eq!(display.opacity, 1.0);
        display.update(&[], false, 2.25);
        assert!((display.opacity - 0.5).abs() < 1e-6);
        display.update(&[], false, 4.0);
        assert_eq!(display.opacity, 0.0);
        assert!(!display.visible());
        assert_eq!(display.note_or_unknown(), "A4");
    }
}
