use anyhow::{Context, Result};
use rayon::prelude::*;
use std::f64::consts::TAU;
use std::path::Path;

use super::graph::{Node, NodeGraph};
use super::{Destination, ManualClock, NodeId, SynthBackend, SynthError, Waveform};

/// Longest gain chain followed from an oscillator to the output.
const MAX_CHAIN: usize = 16;

/// Backend that keeps the whole node graph so the session can be rendered
/// to a mono WAV file afterwards.
#[derive(Debug, Default)]
pub struct OfflineSynth {
    graph: NodeGraph,
}

impl OfflineSynth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_time(&mut self, now: f64) {
        self.graph.set_time(now);
    }

    pub fn graph(&self) -> &NodeGraph {
        &self.graph
    }

    pub fn live_oscillators(&self) -> usize {
        self.graph.live_oscillators()
    }

    /// Gain nodes between an oscillator and the output, or `None` when the
    /// chain never reaches the output.
    fn chain_to_output(&self, mut output: Option<Destination>) -> Option<Vec<NodeId>> {
        let mut gains = Vec::new();
        for _ in 0..MAX_CHAIN {
            match output? {
                Destination::Output => return Some(gains),
                Destination::Node(gain) => {
                    gains.push(gain);
                    output = match self.graph.node(gain)? {
                        Node::Gain { output, .. } => *output,
                        Node::Oscillator { .. } => return None,
                    };
                }
            }
        }
        None
    }

    /// Render `duration` seconds (the whole session when `None`) at `sample_rate`.
    pub fn render(&self, sample_rate: u32, duration: Option<f64>) -> Vec<f32> {
        let duration = duration.unwrap_or_else(|| self.graph.last_event_time());
        let total = (duration * sample_rate as f64).round().max(0.0) as usize;
        let rate = sample_rate as f64;

        let voices: Vec<_> = self
            .graph
            .nodes()
            .iter()
            .filter_map(|node| match node {
                Node::Oscillator {
                    waveform,
                    frequency,
                    output,
                    started_at: Some(start),
                    stop_at,
                } => {
                    let gains = self.chain_to_output(*output)?;
                    Some((*waveform, *frequency as f64, *start, *stop_at, gains))
                }
                _ => None,
            })
            .collect();

        let rendered: Vec<(usize, Vec<f32>)> = voices
            .par_iter()
            .filter_map(|(waveform, frequency, start, stop, gains)| {
                let first = (start * rate).ceil() as usize;
                let end = stop.map_or(total, |t| ((t * rate).ceil() as usize).min(total));
                if first >= end {
                    return None;
                }
                let samples = (first..end)
                    .map(|i| {
                        let t = i as f64 / rate;
                        let phase = (frequency * (t - start)).fract();
                        let level: f32 = gains
                            .iter()
                            .map(|&g| self.graph.gain_at(g, t).unwrap_or(0.0))
                            .product();
                        oscillate(*waveform, phase) * level
                    })
                    .collect();
                Some((first, samples))
            })
            .collect();

        let mut mix = vec![0.0f32; total];
        for (first, samples) in rendered {
            for (out, sample) in mix[first..].iter_mut().zip(samples) {
                *out += sample;
            }
        }
        for sample in &mut mix {
            *sample = sample.clamp(-1.0, 1.0);
        }
        mix
    }

    pub fn write_wav(&self, path: &Path, sample_rate: u32) -> Result<usize> {
        let samples = self.render(sample_rate, None);
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::create(path, spec)
            .with_context(|| format!("Failed to create WAV file: {}", path.display()))?;
        for &sample in &samples {
            writer.write_sample(sample)?;
        }
        writer.finalize().context("Failed to finalize WAV file")?;
        Ok(samples.len())
    }
}

fn oscillate(waveform: Waveform, phase: f64) -> f32 {
    let value = match waveform {
        Waveform::Sine => (TAU * phase).sin(),
        Waveform::Square => {
            if phase < 0.5 {
                1.0
            } else {
                -1.0
            }
        }
        Waveform::Sawtooth => 2.0 * phase - 1.0,
        Waveform::Triangle => 4.0 * (phase - 0.5).abs() - 1.0,
    };
    value as f32
}

impl ManualClock for OfflineSynth {
    fn set_time(&mut self, now: f64) {
        OfflineSynth::set_time(self, now);
    }
}

impl SynthBackend for OfflineSynth {
    fn current_time(&self) -> f64 {
        self.graph.current_time()
    }

    fn create_oscillator(&mut self, waveform: Waveform, frequency: f32) -> Result<NodeId, SynthError> {
        self.graph.create_oscillator(waveform, frequency)
    }

    fn create_gain(&mut self, initial: f32) -> Result<NodeId, SynthError> {
        self.graph.create_gain(initial)
    }

    fn connect(&mut self, source: NodeId, destination: Destination) -> Result<(), SynthError> {
        self.graph.connect(source, destination)
    }

    fn start(&mut self, oscillator: NodeId, in_secs: f64) -> Result<(), SynthError> {
        self.graph.start(oscillator, in_secs)
    }

    fn ramp_gain(&mut self, gain: NodeId, target: f32, in_secs: f64) -> Result<(), SynthError> {
        self.graph.ramp_gain(gain, target, in_secs)
    }

    fn hold_gain(&mut self, gain: NodeId) -> Result<(), SynthError> {
        self.graph.hold_gain(gain)
    }

    fn stop(&mut self, oscillator: NodeId, in_secs: f64) -> Result<(), SynthError> {
        self.graph.stop(oscillator, in_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peak(samples: &[f32]) -> f32 {
        samples.iter().fold(0.0f32, |m, s| m.max(s.abs()))
    }

    #[test]
    fn renders_a_gated_sine() {
        let mut synth = OfflineSynth::new();
        let osc = synth.create_oscillator(Waveform::Sine, 100.0).unwrap();
        let gain = synth.create_gain(0.5).unwrap();
        synth.connect(osc, Destination::Node(gain)).unwrap();
        synth.connect(gain, Destination::Output).unwrap();
        synth.start(osc, 0.0).unwrap();
        synth.stop(osc, 1.0).unwrap();

        let samples = synth.render(8000, Some(2.0));
        assert_eq!(samples.len(), 16000);
        assert!((peak(&samples[..8000]) - 0.5).abs() < 0.01);
        assert_eq!(peak(&samples[8000..]), 0.0);
    }

    #[test]
    fn unconnected_voices_are_silent() {
        let mut synth = OfflineSynth::new();
        let osc = synth.create_oscillator(Waveform::Square, 50.0).unwrap();
        synth.start(osc, 0.0).unwrap();
        let samples = synth.render(8000, Some(0.5));
        assert_eq!(peak(&samples), 0.0);
    }

    #[test]
    fn gain_chains_multiply() {
        let mut synth = OfflineSynth::new();
        let osc = synth.create_oscillator(Waveform::Square, 10.0).unwrap();
        let voice = synth.create_gain(0.5).unwrap();
        let bus = synth.create_gain(0.4).unwrap();
        synth.connect(osc, Destination::Node(voice)).unwrap();
        synth.connect(voice, Destination::Node(bus)).unwrap();
        synth.connect(bus, Destination::Output).unwrap();
        synth.start(osc, 0.0).unwrap();
        let samples = synth.render(1000, Some(0.2));
        assert!((peak(&samples) - 0.2).abs() < 1e-6);
    }

    #[test]
    fn session_length_follows_last_event() {
        let mut synth = OfflineSynth::new();
        let osc = synth.create_oscillator(Waveform::Sine, 100.0).unwrap();
        synth.start(osc, 0.0).unwrap();
        synth.stop(osc, 2.6).unwrap();
        assert_eq!(synth.render(1000, None).len(), 2600);
    }
}
