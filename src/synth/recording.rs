use serde::Serialize;

use super::graph::NodeGraph;
use super::{Destination, ManualClock, NodeId, SynthBackend, SynthError, Waveform};

/// A backend command with its absolute backend time.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum SynthCommand {
    CreateOscillator {
        node: NodeId,
        waveform: Waveform,
        frequency: f32,
    },
    CreateGain {
        node: NodeId,
        initial: f32,
    },
    Connect {
        source: NodeId,
        destination: Destination,
    },
    Start {
        node: NodeId,
        at: f64,
    },
    RampGain {
        node: NodeId,
        target: f32,
        at: f64,
    },
    HoldGain {
        node: NodeId,
        at: f64,
    },
    Stop {
        node: NodeId,
        at: f64,
    },
}

/// Backend that produces no sound and remembers everything it was asked to do.
///
/// Node creation and oscillator starts can be made to fail, either entirely
/// (`set_available(false)`) or after a number of successful creations.
#[derive(Debug)]
pub struct RecordingSynth {
    graph: NodeGraph,
    commands: Vec<SynthCommand>,
    available: bool,
    creations_left: Option<usize>,
}

impl Default for RecordingSynth {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingSynth {
    pub fn new() -> Self {
        Self {
            graph: NodeGraph::new(),
            commands: Vec::new(),
            available: true,
            creations_left: None,
        }
    }

    pub fn set_time(&mut self, now: f64) {
        self.graph.set_time(now);
    }

    /// Switching the backend back on also lifts any creation limit.
    pub fn set_available(&mut self, available: bool) {
        self.available = available;
        if available {
            self.creations_left = None;
        }
    }

    /// Let `count` more nodes be created, then fail every creation.
    pub fn limit_creations(&mut self, count: usize) {
        self.creations_left = Some(count);
    }

    pub fn commands(&self) -> &[SynthCommand] {
        &self.commands
    }

    pub fn clear_commands(&mut self) {
        self.commands.clear();
    }

    pub fn graph(&self) -> &NodeGraph {
        &self.graph
    }

    pub fn live_oscillators(&self) -> usize {
        self.graph.live_oscillators()
    }

    /// Frequencies of every oscillator sounding right now, ascending.
    pub fn sounding_frequencies(&self) -> Vec<f32> {
        let mut frequencies: Vec<f32> = self
            .commands
            .iter()
            .filter_map(|command| match command {
                SynthCommand::CreateOscillator {
                    node, frequency, ..
                } if self.graph.is_sounding(*node) => Some(*frequency),
                _ => None,
            })
            .collect();
        frequencies.sort_by(f32::total_cmp);
        frequencies
    }

    fn check_creation(&mut self) -> Result<(), SynthError> {
        if !self.available {
            return Err(SynthError::Unavailable);
        }
        match self.creations_left.as_mut() {
            Some(0) => Err(SynthError::Unavailable),
            Some(left) => {
                *left -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }
}

impl ManualClock for RecordingSynth {
    fn set_time(&mut self, now: f64) {
        RecordingSynth::set_time(self, now);
    }
}

impl SynthBackend for RecordingSynth {
    fn current_time(&self) -> f64 {
        self.graph.current_time()
    }

    fn create_oscillator(&mut self, waveform: Waveform, frequency: f32) -> Result<NodeId, SynthError> {
        self.check_creation()?;
        let node = self.graph.create_oscillator(waveform, frequency)?;
        self.commands.push(SynthCommand::CreateOscillator {
            node,
            waveform,
            frequency,
        });
        Ok(node)
    }

    fn create_gain(&mut self, initial: f32) -> Result<NodeId, SynthError> {
        self.check_creation()?;
        let node = self.graph.create_gain(initial)?;
        self.commands.push(SynthCommand::CreateGain { node, initial });
        Ok(node)
    }

    fn connect(&mut self, source: NodeId, destination: Destination) -> Result<(), SynthError> {
        self.graph.connect(source, destination)?;
        self.commands.push(SynthCommand::Connect {
            source,
            destination,
        });
        Ok(())
    }

    fn start(&mut self, oscillator: NodeId, in_secs: f64) -> Result<(), SynthError> {
        if !self.available {
            return Err(SynthError::Unavailable);
        }
        self.graph.start(oscillator, in_secs)?;
        self.commands.push(SynthCommand::Start {
            node: oscillator,
            at: self.current_time() + in_secs,
        });
        Ok(())
    }

    fn ramp_gain(&mut self, gain: NodeId, target: f32, in_secs: f64) -> Result<(), SynthError> {
        self.graph.ramp_gain(gain, target, in_secs)?;
        self.commands.push(SynthCommand::RampGain {
            node: gain,
            target,
            at: self.current_time() + in_secs,
        });
        Ok(())
    }

    fn hold_gain(&mut self, gain: NodeId) -> Result<(), SynthError> {
        self.graph.hold_gain(gain)?;
        self.commands.push(SynthCommand::HoldGain {
            node: gain,
            at: self.current_time(),
        });
        Ok(())
    }

    fn stop(&mut self, oscillator: NodeId, in_secs: f64) -> Result<(), SynthError> {
        self.graph.stop(oscillator, in_secs)?;
        self.commands.push(SynthCommand::Stop {
            node: oscillator,
            at: self.current_time() + in_secs,
        });
        Ok(())
    }
}
