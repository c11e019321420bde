pub mod key;
pub mod peaks;
pub mod room_modes;
pub mod tuning;

pub use key::{Key, KeyHypothesis, KeyInference, KeyStrategy, ScaleMode};
pub use peaks::{Peak, PeakDetector};
pub use room_modes::{RoomMode, RoomModeTracker};
pub use tuning::{Note, PitchClass, Temperament, Tuning};

/// Blend of momentary peak energy and room-mode energy in [0, 1].
///
/// Room modes weigh 1.5x as they are confirmed over a much longer window.
pub fn resonance_strength(peaks: &[Peak], modes: &[RoomMode]) -> f32 {
    let peak_mean = if peaks.is_empty() {
        0.0
    } else {
        peaks.iter().map(|p| p.amplitude as f32).sum::<f32>() / peaks.len() as f32
    };
    let mode_mean = if modes.is_empty() {
        0.0
    } else {
        modes.iter().map(|m| m.strength).sum::<f32>() / modes.len() as f32
    };
    ((peak_mean + 1.5 * mode_mean) / 255.0).clamp(0.0, 1.0)
}
