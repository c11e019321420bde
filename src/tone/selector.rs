use crate::analysis::Peak;

/// Relative amplitude change that counts as a different peak.
const AMPLITUDE_HYSTERESIS: f32 = 0.3;
/// Relative frequency change that counts as a different peak.
const FREQUENCY_HYSTERESIS: f32 = 0.1;
/// Consecutive differing ticks needed before switching.
const STABLE_TICKS: u32 = 3;

#[derive(Clone, Debug, PartialEq)]
pub struct Selection {
    pub peak: Peak,
    /// The selection changed on this tick
    pub switched: bool,
}

/// Picks the peak echoed back into the room, resisting small fluctuations.
///
/// The candidate is always the second-strongest peak (the strongest when it
/// is alone), keeping the loudest frequency out of the feedback path.
#[derive(Debug, Default)]
pub struct TonePeakSelector {
    selected: Option<Peak>,
    counter: u32,
}

impl TonePeakSelector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn selected(&self) -> Option<&Peak> {
        self.selected.as_ref()
    }

    pub fn clear(&mut self) {
        self.selected = None;
        self.counter = 0;
    }

    /// Break a run of differing ticks without dropping the selection.
    pub fn interrupt(&mut self) {
        self.counter = 0;
    }

    pub fn select(&mut self, peaks: &[Peak]) -> Option<Selection> {
        let candidate = match peaks {
            [] => {
                self.clear();
                return None;
            }
            [only] => only,
            [_, second, ..] => second,
        };

        let Some(current) = &self.selected else {
            self.selected = Some(candidate.clone());
            self.counter = 0;
            return Some(Selection {
                peak: candidate.clone(),
                switched: true,
            });
        };

        let freq_diff = (candidate.frequency - current.frequency).abs() / current.frequency;
        let current_amp = current.amplitude.max(1) as f32;
        let amp_diff = (candidate.amplitude as f32 - current_amp).abs() / current_amp;

        if amp_diff > AMPLITUDE_HYSTERESIS || freq_diff > FREQUENCY_HYSTERESIS {
            self.counter += 1;
            if self.counter >= STABLE_TICKS {
                log::debug!(
                    "Tone peak {:.1}Hz -> {:.1}Hz",
                    current.frequency,
                    candidate.frequency
                );
                self.selected = Some(candidate.clone());
                self.counter = 0;
                return Some(Selection {
                    peak: candidate.clone(),
                    switched: true,
                });
            }
        } else {
            self.counter = 0;
        }

        self.selected.clone().map(|peak| Selection {
            peak,
            switched: false,
        })
    }
}
