use serde::Serialize;
use std::ops::RangeInclusive;

use crate::analysis::{Key, PitchClass, Tuning};
use crate::config::ToneConfig;
use crate::synth::{Destination, SynthBackend, SynthError, ToneHandle, Waveform, SILENT_GAIN};

use super::scheduler::DeadlineQueue;

const DRONE_OCTAVES: RangeInclusive<i32> = 1..=3;
const ROOT_VOICE_GAIN: f32 = 0.3;
const VOICE_GAIN: f32 = 0.15;
/// Bus volume changes glide over this long.
const BUS_GLIDE_SECS: f64 = 0.1;
/// Smallest bus target change worth a new ramp.
const BUS_EPSILON: f32 = 1e-3;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TonePhase {
    #[default]
    Idle,
    Starting,
    Sustaining,
    FadingOut,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ToneEvent {
    Started { key: Key, frequencies: Vec<f32> },
    /// Ran for the full tone duration
    Expired,
    /// Key lost or resonance too weak
    Released,
    Failed { key: Key, reason: String },
}

/// Root in octaves 1 to 3, then its fifth, keeping voices under `ceiling`.
pub fn drone_frequencies(
    root: PitchClass,
    tuning: &Tuning,
    ceiling: f32,
    max_voices: usize,
) -> Vec<f32> {
    [root, root.transpose(7)]
        .into_iter()
        .flat_map(|pc| DRONE_OCTAVES.map(move |octave| tuning.frequency(pc, octave)))
        .filter(|&freq| freq < ceiling)
        .take(max_voices)
        .collect()
}

/// Drone state machine: Idle, Starting, Sustaining, FadingOut.
///
/// Every generation owns a bus gain feeding the output; voices ramp in on
/// their own gains and the bus follows resonance strength. A generation lives
/// at most `duration_secs`, fading over its last `fade_secs`.
#[derive(Debug)]
pub struct ToneController {
    config: ToneConfig,
    tuning: Tuning,
    phase: TonePhase,
    key: Option<Key>,
    started_at: f64,
    handle: ToneHandle,
    /// Released generations still ringing out, keyed by their stop time
    releasing: DeadlineQueue<ToneHandle>,
    bus_level: f32,
    failed_key: Option<Key>,
}

impl ToneController {
    pub fn new(config: ToneConfig, tuning: Tuning) -> Self {
        Self {
            config,
            tuning,
            phase: TonePhase::Idle,
            key: None,
            started_at: 0.0,
            handle: ToneHandle::default(),
            releasing: DeadlineQueue::new(),
            bus_level: 0.0,
            failed_key: None,
        }
    }

    pub fn phase(&self) -> TonePhase {
        self.phase
    }

    /// Key of the sounding drone.
    pub fn key(&self) -> Option<Key> {
        self.key
    }

    pub fn handle(&self) -> &ToneHandle {
        &self.handle
    }

    /// Released generations that have not reached their stop time.
    pub fn releasing(&self) -> usize {
        self.releasing.len()
    }

    pub fn is_active(&self) -> bool {
        self.phase != TonePhase::Idle
    }

    pub fn volume(&self, strength: f32) -> f32 {
        (strength * self.config.volume_scale).min(self.config.volume_ceiling)
    }

    /// Advance the state machine by one tick.
    pub fn update(
        &mut self,
        synth: &mut dyn SynthBackend,
        key: Option<Key>,
        strength: f32,
        now: f64,
    ) -> Option<ToneEvent> {
        if self.is_active() {
            let elapsed = now - self.started_at;
            let fade_start = self.config.duration_secs - self.config.fade_secs;
            if elapsed >= self.config.duration_secs {
                log::debug!("Drone {:?} ran its {:.1}s", self.key, elapsed);
                self.stop_now(synth);
                return Some(ToneEvent::Expired);
            }
            if elapsed >= fade_start {
                self.phase = TonePhase::FadingOut;
                let progress = if self.config.fade_secs > 0.0 {
                    ((elapsed - fade_start) / self.config.fade_secs) as f32
                } else {
                    1.0
                };
                let target = (self.volume(strength) * (1.0 - progress)).max(SILENT_GAIN);
                self.glide_bus(synth, target);
                return None;
            }
        }

        let key = match key {
            Some(key) if strength >= self.config.strength_gate => key,
            _ => {
                if self.is_active() {
                    self.release(synth, now);
                    return Some(ToneEvent::Released);
                }
                return None;
            }
        };

        if !self.is_active() || self.key != Some(key) {
            return self.begin(synth, key, strength, now);
        }

        if self.phase == TonePhase::Starting && now - self.started_at >= self.config.attack_secs {
            self.phase = TonePhase::Sustaining;
        }
        if self.phase == TonePhase::Sustaining {
            let target = self.volume(strength);
            if (target - self.bus_level).abs() >= BUS_EPSILON {
                self.glide_bus(synth, target);
            }
        }
        None
    }

    fn begin(
        &mut self,
        synth: &mut dyn SynthBackend,
        key: Key,
        strength: f32,
        now: f64,
    ) -> Option<ToneEvent> {
        if self.is_active() {
            self.stop_now(synth);
        }
        let frequencies = drone_frequencies(
            key.root,
            &self.tuning,
            self.config.drone_ceiling_hz,
            self.config.max_drone_voices,
        );
        if frequencies.is_empty() {
            log::debug!("No drone voice for {key} under {}Hz", self.config.drone_ceiling_hz);
            return None;
        }

        let volume = self.volume(strength);
        let mut handle = ToneHandle::default();
        if let Err(err) = self.build(synth, &mut handle, &frequencies, volume) {
            if let Err(teardown) = handle.stop(synth, 0.0) {
                log::debug!("Partial drone teardown: {teardown}");
            }
            if self.failed_key != Some(key) {
                log::warn!("Could not start drone for {key}: {err}");
                self.failed_key = Some(key);
            }
            return Some(ToneEvent::Failed {
                key,
                reason: err.to_string(),
            });
        }

        log::info!(
            "Drone {key}: {}",
            frequencies
                .iter()
                .map(|f| format!("{f:.1}Hz"))
                .collect::<Vec<_>>()
                .join(", ")
        );
        self.failed_key = None;
        self.handle = handle;
        self.key = Some(key);
        self.started_at = now;
        self.bus_level = volume;
        self.phase = TonePhase::Starting;
        Some(ToneEvent::Started { key, frequencies })
    }

    fn build(
        &self,
        synth: &mut dyn SynthBackend,
        handle: &mut ToneHandle,
        frequencies: &[f32],
        volume: f32,
    ) -> Result<(), SynthError> {
        let bus = synth.create_gain(volume)?;
        handle.bus = Some(bus);
        synth.connect(bus, Destination::Output)?;

        for (index, &frequency) in frequencies.iter().enumerate() {
            let level = if index == 0 { ROOT_VOICE_GAIN } else { VOICE_GAIN };
            let osc = synth.create_oscillator(Waveform::Sine, frequency)?;
            handle.oscillators.push(osc);
            let gain = synth.create_gain(SILENT_GAIN)?;
            handle.gains.push(gain);
            synth.connect(osc, Destination::Node(gain))?;
            synth.connect(gain, Destination::Node(bus))?;
            synth.ramp_gain(gain, level, self.config.attack_secs)?;
            synth.start(osc, 0.0)?;
        }
        Ok(())
    }

    fn glide_bus(&mut self, synth: &mut dyn SynthBackend, target: f32) {
        let Some(bus) = self.handle.bus else {
            return;
        };
        match synth.ramp_gain(bus, target, BUS_GLIDE_SECS) {
            Ok(()) => self.bus_level = target,
            Err(err) => log::warn!("Drone volume change failed: {err}"),
        }
    }

    /// Fade the bus out over the release time and stop the voices when it ends.
    /// The generation is kept until `poll` passes its stop time.
    pub fn release(&mut self, synth: &mut dyn SynthBackend, now: f64) {
        let handle = std::mem::take(&mut self.handle);
        let release = self.config.release_secs;
        if let Some(bus) = handle.bus {
            let faded = synth
                .hold_gain(bus)
                .and_then(|()| synth.ramp_gain(bus, SILENT_GAIN, release));
            if let Err(err) = faded {
                log::warn!("Drone release ramp failed: {err}");
            }
        }
        if let Err(err) = handle.stop(synth, release) {
            log::warn!("Drone release stop failed: {err}");
        }
        if let Some(key) = self.key {
            log::debug!("Drone {key} released");
        }
        if !handle.is_empty() {
            self.releasing.schedule(now + release, handle);
        }
        self.reset();
    }

    /// Forget released generations whose stop time has passed.
    pub fn poll(&mut self, now: f64) {
        self.releasing.drain_due(now);
    }

    /// Silence every voice right away, ringing-out generations included.
    pub fn stop_now(&mut self, synth: &mut dyn SynthBackend) {
        let current = std::mem::take(&mut self.handle);
        let handles = std::iter::once(current).chain(self.releasing.drain_due(f64::INFINITY));
        for handle in handles {
            if let Err(err) = handle.stop(synth, 0.0) {
                log::warn!("Drone stop failed: {err}");
            }
        }
        self.reset();
    }

    fn reset(&mut self) {
        self.phase = TonePhase::Idle;
        self.key = None;
        self.bus_level = 0.0;
    }
}
