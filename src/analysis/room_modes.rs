use serde::Serialize;
use std::collections::BTreeMap;

use super::peaks::Peak;
use super::tuning::Tuning;
use crate::config::RoomModeConfig;

/// A frequency that keeps recurring, most likely a standing wave of the room.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RoomMode {
    /// Mean frequency of the bucket's samples (Hz)
    pub frequency: f32,
    /// Mean amplitude of the bucket's samples
    pub strength: f32,
    /// Detections per second over the window
    pub consistency: f32,
    pub note: String,
}

#[derive(Clone, Copy, Debug)]
struct Detection {
    time: f64,
    amplitude: f32,
    frequency: f32,
}

/// Sliding-window history of peaks grouped into fixed-width frequency buckets.
///
/// Modes are recomputed from the retained history on every update rather
/// than decayed incrementally. Nothing qualifies before the warm-up period
/// has passed, which keeps the first burst of peaks from being promoted
/// before the room has been sampled.
#[derive(Debug)]
pub struct RoomModeTracker {
    config: RoomModeConfig,
    tuning: Tuning,
    started_at: f64,
    history: BTreeMap<i64, Vec<Detection>>,
    modes: Vec<RoomMode>,
}

impl RoomModeTracker {
    pub fn new(config: RoomModeConfig, tuning: Tuning, started_at: f64) -> Self {
        Self {
            config,
            tuning,
            started_at,
            history: BTreeMap::new(),
            modes: Vec::new(),
        }
    }

    /// Current modes, strongest first. Equal strengths keep the lower bucket first.
    pub fn modes(&self) -> &[RoomMode] {
        &self.modes
    }

    pub fn bucket_count(&self) -> usize {
        self.history.len()
    }

    fn bucket_key(&self, frequency: f32) -> i64 {
        (frequency / self.config.bucket_hz).round() as i64
    }

    /// Records this tick's peaks and recomputes the modes at `now` (seconds).
    pub fn update(&mut self, peaks: &[Peak], now: f64) -> &[RoomMode] {
        for peak in peaks {
            let key = self.bucket_key(peak.frequency);
            self.history.entry(key).or_default().push(Detection {
                time: now,
                amplitude: peak.amplitude as f32,
                frequency: peak.frequency,
            });
        }

        let window = self.config.window_secs;
        self.history.retain(|_, detections| {
            detections.retain(|d| now - d.time < window);
            !detections.is_empty()
        });

        let warmed_up = now - self.started_at > self.config.warmup_secs;
        let mut modes: Vec<RoomMode> = Vec::new();
        if warmed_up {
            for detections in self.history.values() {
                let count = detections.len();
                if count <= self.config.min_samples {
                    continue;
                }
                let mean_amplitude =
                    detections.iter().map(|d| d.amplitude).sum::<f32>() / count as f32;
                let consistency = (count as f64 / window) as f32;
                if mean_amplitude > self.config.min_amplitude
                    && consistency > self.config.min_consistency
                {
                    let frequency =
                        detections.iter().map(|d| d.frequency).sum::<f32>() / count as f32;
                    modes.push(RoomMode {
                        frequency,
                        strength: mean_amplitude,
                        consistency,
                        note: self.tuning.note_name(frequency),
                    });
                }
            }
        }

        // buckets iterate in key order and the sort is stable
        modes.sort_by(|a, b| b.strength.total_cmp(&a.strength));
        modes.truncate(self.config.max_modes);

        if modes.len() != self.modes.len() {
            log::debug!(
                "Room modes: {}",
                modes
                    .iter()
                    .map(|m| format!("{:.1}Hz ({})", m.frequency, m.note))
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }
        self.modes = modes;
        &self.modes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peak(frequency: f32, amplitude: u8) -> Peak {
        Peak {
            frequency,
            amplitude,
            position: 0,
            is_low_band: frequency < 500.0,
        }
    }

    fn tracker() -> RoomModeTracker {
        RoomModeTracker::new(RoomModeConfig::default(), Tuning::default(), 0.0)
    }

    #[test]
    fn steady_peak_becomes_one_mode_then_lapses() {
        let mut tracker = tracker();
        let mut now = 0.0;
        // 10 Hz ticks for 12 seconds
        for _ in 0..120 {
            now += 0.1;
            tracker.update(&[peak(123.0, 60)], now);
        }
        let modes = tracker.modes().to_vec();
        assert_eq!(modes.len(), 1);
        let mode = &modes[0];
        assert!((mode.frequency - 123.0).abs() < 2.5);
        assert!((mode.strength - 60.0).abs() < 1e-3);
        assert!(mode.consistency > 0.5);
        assert_eq!(mode.note, "B2");

        // Silence until the whole window has lapsed
        now += 30.5;
        assert!(tracker.update(&[], now).is_empty());
        assert_eq!(tracker.bucket_count(), 0);
    }

    #[test]
    fn nothing_qualifies_during_warm_up() {
        let mut tracker = tracker();
        let mut now = 0.0;
        for _ in 0..95 {
            now += 0.1;
            tracker.update(&[peak(440.0, 200)], now);
        }
        assert!(now < 10.0);
        assert!(tracker.modes().is_empty());
    }

    #[test]
    fn quiet_or_sparse_buckets_are_rejected() {
        let mut tracker = tracker();
        let mut now = 0.0;
        for i in 0..150 {
            now += 0.1;
            let mut peaks = vec![peak(300.0, 30)];
            if i % 10 == 0 {
                peaks.push(peak(2000.0, 250));
            }
            tracker.update(&peaks, now);
        }
        // 300 Hz is too quiet, 2 kHz only has 15 samples
        assert!(tracker.modes().is_empty());
    }

    #[test]
    fn keeps_three_strongest_in_order() {
        let mut tracker = tracker();
        let mut now = 0.0;
        let peaks = [
            peak(100.0, 50),
            peak(200.0, 90),
            peak(400.0, 70),
            peak(800.0, 120),
            peak(1600.0, 60),
        ];
        for _ in 0..150 {
            now += 0.1;
            tracker.update(&peaks, now);
        }
        let strengths: Vec<f32> = tracker.modes().iter().map(|m| m.strength).collect();
        assert_eq!(strengths, vec![120.0, 90.0, 70.0]);
    }

    #[test]
    fn equal_strengths_order_by_frequency() {
        let frequencies = [1600.0, 100.0, 800.0, 200.0, 400.0];
        for rotation in 0..frequencies.len() {
            let mut tracker = tracker();
            let mut now = 0.0;
            let mut order = frequencies;
            order.rotate_left(rotation);
            let peaks: Vec<Peak> = order.iter().map(|&f| peak(f, 80)).collect();
            for _ in 0..150 {
                now += 0.1;
                tracker.update(&peaks, now);
            }
            let modes: Vec<f32> = tracker.modes().iter().map(|m| m.frequency).collect();
            assert_eq!(modes, vec![100.0, 200.0, 400.0]);
        }
    }

    #[test]
    fn nearby_frequencies_share_a_bucket() {
        let mut tracker = tracker();
        let mut now = 0.0;
        for i in 0..150 {
            now += 0.1;
            let frequency = if i % 2 == 0 { 251.0 } else { 252.0 };
            tracker.update(&[peak(frequency, 80)], now);
        }
        let modes = tracker.modes();
        assert_eq!(modes.len(), 1);
        assert!((modes[0].frequency - 251.5).abs() < 0.01);
    }
}
