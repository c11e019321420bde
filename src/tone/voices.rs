use std::collections::HashMap;

use crate::analysis::{Note, Tuning};
use crate::synth::{Destination, SynthBackend, SynthError, ToneHandle, Waveform, SILENT_GAIN};

use super::scheduler::DeadlineQueue;

/// Partials of a played note: waveform, frequency multiple, relative level.
const PARTIALS: [(Waveform, f32, f32); 3] = [
    (Waveform::Sawtooth, 1.0, 1.0),
    (Waveform::Triangle, 2.0, 0.3),
    (Waveform::Sine, 3.0, 0.1),
];
const BASE_LEVEL: f32 = 0.15;
const ATTACK_SECS: f64 = 0.02;
const RELEASE_SECS: f64 = 2.5;
const STOP_SECS: f64 = 2.6;

/// User-played notes, kept apart from the drone and the echo.
#[derive(Debug)]
pub struct ManualVoices {
    tuning: Tuning,
    held: HashMap<Note, ToneHandle>,
    releasing: DeadlineQueue<ToneHandle>,
}

impl ManualVoices {
    pub fn new(tuning: Tuning) -> Self {
        Self {
            tuning,
            held: HashMap::new(),
            releasing: DeadlineQueue::new(),
        }
    }

    pub fn held(&self) -> usize {
        self.held.len()
    }

    pub fn releasing(&self) -> usize {
        self.releasing.len()
    }

    /// Start a note at `velocity` (0 to 1). Returns false when it was already held.
    pub fn press(
        &mut self,
        synth: &mut dyn SynthBackend,
        note: Note,
        velocity: f32,
    ) -> Result<bool, SynthError> {
        if self.held.contains_key(&note) {
            return Ok(false);
        }
        let frequency = self.tuning.note_frequency(note);
        let velocity = velocity.clamp(0.0, 1.0);

        let mut handle = ToneHandle::default();
        if let Err(err) = build(synth, &mut handle, frequency, velocity) {
            if let Err(teardown) = handle.stop(synth, 0.0) {
                log::debug!("Partial voice teardown: {teardown}");
            }
            return Err(err);
        }
        self.held.insert(note, handle);
        Ok(true)
    }

    /// Let a held note ring out; it is stopped and dropped by `poll`.
    pub fn release(
        &mut self,
        synth: &mut dyn SynthBackend,
        note: Note,
        now: f64,
    ) -> Result<bool, SynthError> {
        let Some(handle) = self.held.remove(&note) else {
            return Ok(false);
        };
        let faded = handle.fade_out(synth, RELEASE_SECS);
        let stopped = handle.stop(synth, STOP_SECS);
        self.releasing.schedule(now + STOP_SECS, handle);
        faded.and(stopped).map(|()| true)
    }

    /// Forget released voices whose stop time has passed.
    pub fn poll(&mut self, now: f64) {
        self.releasing.drain_due(now);
    }

    /// Stop every held and releasing voice right away.
    pub fn stop_all(&mut self, synth: &mut dyn SynthBackend) {
        let handles = self
            .held
            .drain()
            .map(|(_, handle)| handle)
            .chain(self.releasing.drain_due(f64::INFINITY));
        for handle in handles {
            if let Err(err) = handle.stop(synth, 0.0) {
                log::warn!("Manual voice stop failed: {err}");
            }
        }
    }
}

fn build(
    synth: &mut dyn SynthBackend,
    handle: &mut ToneHandle,
    frequency: f32,
    velocity: f32,
) -> Result<(), SynthError> {
    for (waveform, multiple, level) in PARTIALS {
        let osc = synth.create_oscillator(waveform, frequency * multiple)?;
        handle.oscillators.push(osc);
        let gain = synth.create_gain(SILENT_GAIN)?;
        handle.gains.push(gain);
        synth.ramp_gain(gain, BASE_LEVEL * velocity * level, ATTACK_SECS)?;
        synth.connect(osc, Destination::Node(gain))?;
        synth.connect(gain, Destination::Output)?;
        synth.start(osc, 0.0)?;
    }
    Ok(())
}
