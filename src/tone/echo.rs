use crate::config::EchoConfig;
use crate::synth::{Destination, NodeId, SynthBackend, SynthError, Waveform, SILENT_GAIN};

use super::scheduler::DeadlineQueue;

/// Echoes are folded down by two octaves until they sit under this.
pub const ECHO_CEILING_HZ: f32 = 500.0;
const SWELL_SECS: f64 = 2.0;
const DECAY_END_SECS: f64 = 2.5;
const STOP_SECS: f64 = 2.6;
/// The echo reference is dropped once the voice has surely ended.
const FORGET_SECS: f64 = 2.7;
const FADE_SECS: f64 = 0.5;
const SILENCE_FADE_SECS: f64 = 0.02;
const SILENCE_STOP_SECS: f64 = 0.05;

pub fn echo_frequency(frequency: f32) -> f32 {
    let mut freq = frequency;
    while freq > ECHO_CEILING_HZ {
        freq /= 4.0;
    }
    freq
}

pub fn echo_volume(amplitude: u8) -> f32 {
    (amplitude as f32 / 255.0 * 0.15).min(0.1)
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct EchoVoice {
    oscillator: NodeId,
    gain: NodeId,
    fading: bool,
}

impl EchoVoice {
    fn fade(&mut self, synth: &mut dyn SynthBackend, in_secs: f64) -> Result<(), SynthError> {
        if self.fading {
            return Ok(());
        }
        synth.hold_gain(self.gain)?;
        synth.ramp_gain(self.gain, SILENT_GAIN, in_secs)?;
        self.fading = true;
        Ok(())
    }
}

/// Short swell echoing the selected peak, transposed into the bass range.
#[derive(Debug)]
pub struct PeakEcho {
    config: EchoConfig,
    current: Option<EchoVoice>,
    /// Replaced echoes still fading towards their own stop time
    replaced: Vec<EchoVoice>,
    forget: DeadlineQueue<NodeId>,
}

impl PeakEcho {
    pub fn new(config: EchoConfig) -> Self {
        Self {
            config,
            current: None,
            replaced: Vec::new(),
            forget: DeadlineQueue::new(),
        }
    }

    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn trigger_ratio(&self) -> f32 {
        self.config.trigger_ratio
    }

    pub fn is_sounding(&self) -> bool {
        self.current.is_some()
    }

    pub fn pending(&self) -> usize {
        self.forget.len()
    }

    /// Echo voices not yet past their stop time, the current one included.
    pub fn voices(&self) -> usize {
        self.replaced.len() + usize::from(self.current.is_some())
    }

    /// Drop the reference to echoes that have ended.
    pub fn poll(&mut self, now: f64) {
        for gain in self.forget.drain_due(now) {
            if self.current.is_some_and(|voice| voice.gain == gain) {
                self.current = None;
            }
            self.replaced.retain(|voice| voice.gain != gain);
        }
    }

    /// Start a new echo, fading out the running one. Returns the played frequency.
    pub fn play(
        &mut self,
        synth: &mut dyn SynthBackend,
        frequency: f32,
        amplitude: u8,
        now: f64,
    ) -> Result<f32, SynthError> {
        if let Some(mut voice) = self.current.take() {
            let faded = voice.fade(synth, FADE_SECS);
            self.replaced.push(voice);
            faded?;
        }

        let freq = echo_frequency(frequency);
        let oscillator = synth.create_oscillator(Waveform::Sine, freq)?;
        let gain = match self.voice_gain(synth, oscillator, amplitude) {
            Ok(gain) => gain,
            Err(err) => {
                synth.stop(oscillator, 0.0)?;
                return Err(err);
            }
        };

        self.current = Some(EchoVoice {
            oscillator,
            gain,
            fading: false,
        });
        self.forget.schedule(now + FORGET_SECS, gain);
        log::debug!("Echo {frequency:.1}Hz as {freq:.1}Hz");
        Ok(freq)
    }

    fn voice_gain(
        &self,
        synth: &mut dyn SynthBackend,
        oscillator: NodeId,
        amplitude: u8,
    ) -> Result<NodeId, SynthError> {
        let gain = synth.create_gain(SILENT_GAIN)?;
        synth.ramp_gain(gain, echo_volume(amplitude), SWELL_SECS)?;
        synth.ramp_gain(gain, SILENT_GAIN, DECAY_END_SECS)?;
        synth.connect(oscillator, Destination::Node(gain))?;
        synth.connect(gain, Destination::Output)?;
        synth.start(oscillator, 0.0)?;
        synth.stop(oscillator, STOP_SECS)?;
        Ok(gain)
    }

    /// Fade the running echo out; it keeps its scheduled stop.
    pub fn fade(&mut self, synth: &mut dyn SynthBackend) -> Result<(), SynthError> {
        match self.current.as_mut() {
            Some(voice) => voice.fade(synth, FADE_SECS),
            None => Ok(()),
        }
    }

    /// Quick fade of every echo, used when audio output is switched off.
    pub fn silence(&mut self, synth: &mut dyn SynthBackend) -> Result<(), SynthError> {
        self.end_all(synth, |synth, voice| {
            synth.hold_gain(voice.gain)?;
            synth.ramp_gain(voice.gain, SILENT_GAIN, SILENCE_FADE_SECS)?;
            synth.stop(voice.oscillator, SILENCE_STOP_SECS)
        })
    }

    pub fn stop_now(&mut self, synth: &mut dyn SynthBackend) -> Result<(), SynthError> {
        self.end_all(synth, |synth, voice| synth.stop(voice.oscillator, 0.0))
    }

    /// Apply `end` to every tracked voice and forget them all. Keeps going
    /// past failures and reports the first one.
    fn end_all(
        &mut self,
        synth: &mut dyn SynthBackend,
        end: impl Fn(&mut dyn SynthBackend, &EchoVoice) -> Result<(), SynthError>,
    ) -> Result<(), SynthError> {
        self.forget.clear();
        let mut first_error = None;
        for voice in self.replaced.drain(..).chain(self.current.take()) {
            if let Err(err) = end(synth, &voice) {
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
