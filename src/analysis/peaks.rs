use serde::Serialize;

use crate::config::AnalysisConfig;

/// A prominent spectral maximum found in one frame.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Peak {
    /// Frequency of the analysis column the peak was read from (Hz)
    pub frequency: f32,
    /// Raw bin magnitude (0-255)
    pub amplitude: u8,
    /// Column index on the log-frequency axis
    pub position: usize,
    /// Below the low-band split, where drones are generated
    pub is_low_band: bool,
}

/// Extracts up to `max_peaks` well-separated maxima from byte spectra.
///
/// The frame is read through a logarithmic axis of `columns` points from
/// `min_frequency` to Nyquist. Candidates above the threshold are taken
/// loudest first, and a candidate is dropped when it lies within
/// `separation` decades of a peak already taken. A pure tone smears across
/// neighbouring bins, so without this every tone would show up several times.
#[derive(Clone, Debug)]
pub struct PeakDetector {
    nyquist: f32,
    columns: usize,
    min_frequency: f32,
    low_band_split: f32,
    separation: f32,
    max_peaks: usize,
}

impl PeakDetector {
    pub fn new(config: &AnalysisConfig, sample_rate: u32) -> Self {
        Self {
            nyquist: sample_rate as f32 / 2.0,
            columns: config.columns.max(1),
            min_frequency: config.min_frequency,
            low_band_split: config.low_band_split,
            separation: config.separation,
            max_peaks: config.max_peaks,
        }
    }

    /// Frequency shown at `column` of the log axis.
    pub fn column_frequency(&self, column: usize) -> f32 {
        let log_min = self.min_frequency.log10();
        let log_max = self.nyquist.log10();
        let t = column as f32 / self.columns as f32;
        10f32.powf(log_min + t * (log_max - log_min))
    }

    /// Peaks of `frame` strictly above `threshold`, loudest first.
    pub fn detect(&self, frame: &[u8], threshold: u8) -> Vec<Peak> {
        if frame.is_empty() || self.nyquist <= self.min_frequency {
            return Vec::new();
        }

        let mut candidates: Vec<Peak> = Vec::new();
        for column in 0..self.columns {
            let frequency = self.column_frequency(column);
            let bin = ((frequency / self.nyquist) * frame.len() as f32) as usize;
            if bin >= frame.len() {
                continue;
            }
            let amplitude = frame[bin];
            if amplitude > threshold && frequency > self.min_frequency {
                candidates.push(Peak {
                    frequency,
                    amplitude,
                    position: column,
                    is_low_band: frequency < self.low_band_split,
                });
            }
        }

        // Stable sort: equal amplitudes keep low-to-high frequency order
        candidates.sort_by(|a, b| b.amplitude.cmp(&a.amplitude));

        let mut prominent: Vec<Peak> = Vec::with_capacity(self.max_peaks);
        for candidate in candidates {
            if prominent.len() >= self.max_peaks || candidate.amplitude < threshold {
                break;
            }
            let log_freq = candidate.frequency.log10();
            let too_close = prominent
                .iter()
                .any(|p| (log_freq - p.frequency.log10()).abs() < self.separation);
            if !too_close {
                prominent.push(candidate);
            }
        }

        log::trace!("{} prominent peaks above {}", prominent.len(), threshold);
        prominent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_RATE: u32 = 48_000;
    const BINS: usize = 2048;

    fn detector() -> PeakDetector {
        PeakDetector::new(&AnalysisConfig::default(), SAMPLE_RATE)
    }

    fn bin_for(freq: f32) -> usize {
        (freq / (SAMPLE_RATE as f32 / 2.0) * BINS as f32) as usize
    }

    /// Frame with a tone at `freq` smeared over a few neighbouring bins.
    fn frame_with_tones(tones: &[(f32, u8)]) -> Vec<u8> {
        let mut frame = vec![10u8; BINS];
        for &(freq, amp) in tones {
            let center = bin_for(freq);
            for offset in 0..=3usize {
                let shoulder = amp.saturating_sub(offset as u8 * 15);
                for bin in [center.saturating_sub(offset), (center + offset).min(BINS - 1)] {
                    frame[bin] = frame[bin].max(shoulder);
                }
            }
        }
        frame
    }

    /// xorshift, enough to scatter values across a frame
    fn noise_frame(seed: &mut u32) -> Vec<u8> {
        (0..BINS)
            .map(|_| {
                *seed ^= *seed << 13;
                *seed ^= *seed >> 17;
                *seed ^= *seed << 5;
                (*seed % 256) as u8
            })
            .collect()
    }

    #[test]
    fn empty_frame_has_no_peaks() {
        assert!(detector().detect(&[], 128).is_empty());
    }

    #[test]
    fn sub_threshold_frame_has_no_peaks() {
        let frame = vec![128u8; BINS];
        assert!(detector().detect(&frame, 128).is_empty());
        let silent = vec![0u8; BINS];
        assert!(detector().detect(&silent, 0).is_empty());
    }

    #[test]
    fn finds_single_tone_once() {
        let frame = frame_with_tones(&[(1000.0, 220)]);
        let peaks = detector().detect(&frame, 128);
        assert_eq!(peaks.len(), 1);
        let peak = &peaks[0];
        assert_eq!(peak.amplitude, 220);
        assert!((peak.frequency.log10() - 1000f32.log10()).abs() < 0.02, "{}", peak.frequency);
        assert!(!peak.is_low_band);
    }

    #[test]
    fn orders_tones_by_amplitude_and_flags_low_band() {
        let frame = frame_with_tones(&[(220.0, 180), (2500.0, 240)]);
        let peaks = detector().detect(&frame, 128);
        assert_eq!(peaks.len(), 2);
        assert_eq!(peaks[0].amplitude, 240);
        assert!(!peaks[0].is_low_band);
        assert_eq!(peaks[1].amplitude, 180);
        assert!(peaks[1].is_low_band);
    }

    #[test]
    fn threshold_is_exclusive() {
        let frame = frame_with_tones(&[(1000.0, 200)]);
        assert!(detector().detect(&frame, 200).is_empty());
        assert_eq!(detector().detect(&frame, 199).len(), 1);
    }

    #[test]
    fn random_frames_respect_count_and_separation() {
        let detector = detector();
        let mut seed = 0x9E37_79B9u32;
        for _ in 0..200 {
            let frame = noise_frame(&mut seed);
            let peaks = detector.detect(&frame, 100);
            assert!(peaks.len() <= 5);
            for (i, p) in peaks.iter().enumerate() {
                assert!(p.amplitude > 100);
                for q in &peaks[i + 1..] {
                    let gap = (p.frequency.log10() - q.frequency.log10()).abs();
                    assert!(gap >= 0.15, "peaks {} and {} too close", p.frequency, q.frequency);
                }
            }
        }
    }

    #[test]
    fn column_axis_spans_min_frequency_to_nyquist() {
        let detector = detector();
        assert!((detector.column_frequency(0) - 20.0).abs() < 1e-3);
        let last = detector.column_frequency(AnalysisConfig::default().columns);
        assert!((last - 24_000.0).abs() < 1.0);
    }
}
