pub mod graph;
pub mod recording;
pub mod offline;

use serde::Serialize;

pub use graph::NodeGraph;
pub use offline::OfflineSynth;
pub use recording::{RecordingSynth, SynthCommand};

/// Gain level treated as silence; exponential ramps cannot reach zero.
pub const SILENT_GAIN: f32 = 0.001;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId(pub(crate) u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Waveform {
    Sine,
    Triangle,
    Sawtooth,
    Square,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Destination {
    Node(NodeId),
    Output,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum SynthError {
    #[error("Synthesis backend unavailable")]
    Unavailable,

    #[error("Unknown node {0:?}")]
    UnknownNode(NodeId),

    #[error("Node {0:?} is not a {1}")]
    WrongKind(NodeId, &'static str),
}

/// Scheduling interface of an audio synthesis backend.
///
/// The backend runs its own clock; every time argument is relative to
/// `current_time()`. Sample generation happens entirely on the backend side.
pub trait SynthBackend {
    /// Backend clock, in seconds.
    fn current_time(&self) -> f64;

    fn create_oscillator(&mut self, waveform: Waveform, frequency: f32) -> Result<NodeId, SynthError>;

    fn create_gain(&mut self, initial: f32) -> Result<NodeId, SynthError>;

    fn connect(&mut self, source: NodeId, destination: Destination) -> Result<(), SynthError>;

    fn start(&mut self, oscillator: NodeId, in_secs: f64) -> Result<(), SynthError>;

    /// Ramp from the previous automation point to `target`, arriving
    /// `in_secs` from now.
    fn ramp_gain(&mut self, gain: NodeId, target: f32, in_secs: f64) -> Result<(), SynthError>;

    /// Cancel automation scheduled after now, holding the gain where it is.
    fn hold_gain(&mut self, gain: NodeId) -> Result<(), SynthError>;

    /// Stop an oscillator `in_secs` from now. Stopping an already stopped
    /// oscillator succeeds; the earliest stop time wins.
    fn stop(&mut self, oscillator: NodeId, in_secs: f64) -> Result<(), SynthError>;
}

/// Backends whose clock is advanced by the caller instead of an audio device.
pub trait ManualClock {
    fn set_time(&mut self, now: f64);
}

/// Oscillators and gains of one sounding generation, torn down together.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ToneHandle {
    pub oscillators: Vec<NodeId>,
    pub gains: Vec<NodeId>,
    /// Shared gain every voice feeds, when the tone has one
    pub bus: Option<NodeId>,
}

impl ToneHandle {
    pub fn is_empty(&self) -> bool {
        self.oscillators.is_empty()
    }

    /// Ramp every voice gain (and the bus) to silence over `in_secs`.
    pub fn fade_out(&self, synth: &mut dyn SynthBackend, in_secs: f64) -> Result<(), SynthError> {
        for &gain in self.gains.iter().chain(self.bus.iter()) {
            synth.hold_gain(gain)?;
            synth.ramp_gain(gain, SILENT_GAIN, in_secs)?;
        }
        Ok(())
    }

    /// Stop every oscillator `in_secs` from now. Keeps going past failures
    /// and reports the first one.
    pub fn stop(&self, synth: &mut dyn SynthBackend, in_secs: f64) -> Result<(), SynthError> {
        let mut first_error = None;
        for &osc in &self.oscillators {
            if let Err(err) = synth.stop(osc, in_secs) {
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
