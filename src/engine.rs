use serde::Serialize;

use crate::analysis::{
    resonance_strength, KeyHypothesis, KeyInference, Note, Peak, PeakDetector, RoomMode,
    RoomModeTracker, Tuning,
};
use crate::config::Config;
use crate::display::PeakDisplay;
use crate::synth::{SynthBackend, SynthError};
use crate::tone::{ManualVoices, PeakEcho, ToneController, ToneEvent, TonePeakSelector, TonePhase};

/// Everything one tick produced.
#[derive(Clone, Debug, Serialize)]
pub struct TickReport {
    pub time: f64,
    pub peaks: Vec<Peak>,
    pub room_modes: Vec<RoomMode>,
    pub key: Option<KeyHypothesis>,
    pub strength: f32,
    pub phase: TonePhase,
    pub tone_event: Option<ToneEvent>,
    pub tone_peak: Option<Peak>,
    /// Frequency of an echo started on this tick
    pub echo: Option<f32>,
}

/// Receives every tick's report, in order.
pub trait TickObserver {
    fn on_tick(&mut self, report: &TickReport);

    /// Called once when the session ends.
    fn on_finish(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Per-tick pipeline from spectrum frame to drone commands.
///
/// A tick drains deferred timers, detects peaks, updates the room modes,
/// infers a key when the spectrum is loud enough, then drives the drone and
/// the peak echo. Failures of the synthesis backend are logged and contained
/// within the tick.
pub struct Engine<B: SynthBackend> {
    synth: B,
    detector: PeakDetector,
    tracker: RoomModeTracker,
    inference: KeyInference,
    tone: ToneController,
    selector: TonePeakSelector,
    echo: PeakEcho,
    voices: ManualVoices,
    display: PeakDisplay,
    threshold: u8,
    significance_floor: u8,
    feedback_enabled: bool,
    observers: Vec<Box<dyn TickObserver>>,
}

impl<B: SynthBackend> Engine<B> {
    pub fn new(config: &Config, sample_rate: u32, synth: B) -> Self {
        let started_at = synth.current_time();
        let tuning = Tuning::new(config.key.temperament);
        Self {
            detector: PeakDetector::new(&config.analysis, sample_rate),
            tracker: RoomModeTracker::new(config.room_modes.clone(), tuning, started_at),
            inference: KeyInference::new(&config.key, &config.analysis),
            tone: ToneController::new(config.tone.clone(), tuning),
            selector: TonePeakSelector::new(),
            echo: PeakEcho::new(config.echo.clone()),
            voices: ManualVoices::new(tuning),
            display: PeakDisplay::new(tuning, started_at),
            threshold: config.analysis.threshold,
            significance_floor: config.analysis.significance_floor,
            feedback_enabled: true,
            observers: Vec::new(),
            synth,
        }
    }

    pub fn synth(&self) -> &B {
        &self.synth
    }

    pub fn synth_mut(&mut self) -> &mut B {
        &mut self.synth
    }

    pub fn into_synth(self) -> B {
        self.synth
    }

    pub fn threshold(&self) -> u8 {
        self.threshold
    }

    /// Takes effect on the next tick.
    pub fn set_threshold(&mut self, threshold: u8) {
        self.threshold = threshold;
    }

    pub fn feedback_enabled(&self) -> bool {
        self.feedback_enabled
    }

    /// Switching feedback off silences the drone and the echo; analysis goes on.
    pub fn set_feedback_enabled(&mut self, enabled: bool) {
        if self.feedback_enabled == enabled {
            return;
        }
        self.feedback_enabled = enabled;
        if !enabled {
            self.tone.stop_now(&mut self.synth);
            if let Err(err) = self.echo.silence(&mut self.synth) {
                log::warn!("Echo silence failed: {err}");
            }
            self.selector.clear();
        }
        log::info!("Audio feedback {}", if enabled { "on" } else { "off" });
    }

    pub fn add_observer(&mut self, observer: Box<dyn TickObserver>) {
        self.observers.push(observer);
    }

    pub fn tone(&self) -> &ToneController {
        &self.tone
    }

    pub fn echo(&self) -> &PeakEcho {
        &self.echo
    }

    pub fn voices(&self) -> &ManualVoices {
        &self.voices
    }

    pub fn display(&self) -> &PeakDisplay {
        &self.display
    }

    pub fn room_modes(&self) -> &[RoomMode] {
        self.tracker.modes()
    }

    pub fn press_key(&mut self, note: Note, velocity: f32) -> Result<bool, SynthError> {
        self.voices.press(&mut self.synth, note, velocity)
    }

    pub fn release_key(&mut self, note: Note, now: f64) -> Result<bool, SynthError> {
        self.voices.release(&mut self.synth, note, now)
    }

    pub fn tick(&mut self, frame: &[u8], now: f64) -> TickReport {
        self.tone.poll(now);
        self.echo.poll(now);
        self.voices.poll(now);

        let peaks = self.detector.detect(frame, self.threshold);
        let room_modes = self.tracker.update(&peaks, now).to_vec();

        let significant = peaks
            .first()
            .is_some_and(|p| p.amplitude >= self.significance_floor);
        let key = if significant {
            self.inference.infer(&peaks, &room_modes)
        } else {
            None
        };
        let strength = resonance_strength(&peaks, &room_modes);

        let tone_event = if self.feedback_enabled {
            self.tone
                .update(&mut self.synth, key.as_ref().map(|h| h.key), strength, now)
        } else {
            None
        };

        let mut tone_peak = None;
        let mut echo = None;
        if peaks.is_empty() {
            self.selector.clear();
        } else if significant {
            if let Some(selection) = self.selector.select(&peaks) {
                if self.feedback_enabled {
                    echo = self.update_echo(&peaks, selection.peak.clone(), selection.switched, now);
                }
                tone_peak = Some(selection.peak);
            }
        } else {
            self.selector.interrupt();
        }

        self.display.update(&peaks, significant, now);

        let report = TickReport {
            time: now,
            peaks,
            room_modes,
            key,
            strength,
            phase: self.tone.phase(),
            tone_event,
            tone_peak,
            echo,
        };
        for observer in &mut self.observers {
            observer.on_tick(&report);
        }
        report
    }

    fn update_echo(&mut self, peaks: &[Peak], selected: Peak, switched: bool, now: f64) -> Option<f32> {
        if !self.echo.enabled() {
            return None;
        }
        let trigger = self.threshold as f32 * self.echo.trigger_ratio();
        if peaks.len() > 1 && selected.amplitude as f32 > trigger {
            if switched || !self.echo.is_sounding() {
                match self
                    .echo
                    .play(&mut self.synth, selected.frequency, selected.amplitude, now)
                {
                    Ok(freq) => return Some(freq),
                    Err(err) => log::warn!("Echo failed: {err}"),
                }
            }
        } else if peaks.len() == 1 {
            if let Err(err) = self.echo.fade(&mut self.synth) {
                log::warn!("Echo fade failed: {err}");
            }
        }
        None
    }

    /// Stop all sound at once and cancel every deferred event.
    pub fn stop(&mut self) {
        self.tone.stop_now(&mut self.synth);
        if let Err(err) = self.echo.stop_now(&mut self.synth) {
            log::warn!("Echo stop failed: {err}");
        }
        self.voices.stop_all(&mut self.synth);
        self.selector.clear();
    }

    /// Stop the engine and let observers wrap up.
    pub fn finish(&mut self) -> anyhow::Result<()> {
        self.stop();
        for observer in &mut self.observers {
            observer.on_finish()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synth::RecordingSynth;
    use std::cell::RefCell;
    use std::rc::Rc;

    const SAMPLE_RATE: u32 = 44100;

    /// Frame with one lit bin per frequency.
    fn frame(tones: &[(f32, u8)]) -> Vec<u8> {
        let mut frame = vec![0u8; 2048];
        let nyquist = SAMPLE_RATE as f32 / 2.0;
        for &(freq, amplitude) in tones {
            let bin = (freq / nyquist * frame.len() as f32) as usize;
            frame[bin] = amplitude;
        }
        frame
    }

    fn engine() -> Engine<RecordingSynth> {
        Engine::new(&Config::default(), SAMPLE_RATE, RecordingSynth::new())
    }

    fn run(engine: &mut Engine<RecordingSynth>, frame: &[u8], from: f64, secs: f64) -> f64 {
        let mut now = from;
        while now < from + secs {
            now += 1.0 / 60.0;
            engine.synth_mut().set_time(now);
            engine.tick(frame, now);
        }
        now
    }

    struct Count(Rc<RefCell<usize>>);

    impl TickObserver for Count {
        fn on_tick(&mut self, _report: &TickReport) {
            *self.0.borrow_mut() += 1;
        }
    }

    #[test]
    fn silence_yields_nothing() {
        let mut engine = engine();
        let report = engine.tick(&[0u8; 2048], 0.1);
        assert!(report.peaks.is_empty());
        assert!(report.key.is_none());
        assert_eq!(report.phase, TonePhase::Idle);
        assert_eq!(engine.synth().live_oscillators(), 0);
    }

    #[test]
    fn triad_starts_a_drone_and_an_echo() {
        let mut engine = engine();
        let triad = frame(&[(261.6, 220), (329.6, 200), (392.0, 200)]);
        engine.synth_mut().set_time(0.1);
        let report = engine.tick(&triad, 0.1);
        let key = report.key.expect("key").key;
        assert_eq!(key.to_string(), "C major");
        assert!(matches!(report.tone_event, Some(ToneEvent::Started { .. })));
        assert!(report.echo.is_some());
        assert!(engine.synth().live_oscillators() >= 5);
    }

    #[test]
    fn quiet_peaks_do_not_infer_a_key() {
        let mut engine = engine();
        let quiet = frame(&[(261.6, 127), (329.6, 127), (392.0, 127)]);
        engine.set_threshold(100);
        let report = engine.tick(&quiet, 0.1);
        assert!(!report.peaks.is_empty());
        assert!(report.key.is_none());
    }

    #[test]
    fn disabling_feedback_silences_output() {
        let mut engine = engine();
        let triad = frame(&[(261.6, 220), (329.6, 200), (392.0, 200)]);
        let now = run(&mut engine, &triad, 0.0, 1.0);
        assert!(engine.tone().is_active());
        engine.set_feedback_enabled(false);
        assert!(!engine.tone().is_active());
        assert!(!engine.echo().is_sounding());
        let now = run(&mut engine, &triad, now, 0.1);
        engine.synth_mut().set_time(now);
        assert_eq!(engine.synth().live_oscillators(), 0);
    }

    #[test]
    fn stop_leaves_nothing_running() {
        let mut engine = engine();
        let triad = frame(&[(261.6, 220), (329.6, 200), (392.0, 200)]);
        let now = run(&mut engine, &triad, 0.0, 0.5);
        engine
            .press_key(Note::new(crate::analysis::PitchClass::E, 3), 0.7)
            .unwrap();
        engine.stop();
        assert_eq!(engine.synth().live_oscillators(), 0);
        assert!(engine.tone().handle().is_empty());
        assert!(!engine.echo().is_sounding());
        assert_eq!(engine.echo().pending(), 0);
        assert_eq!(engine.voices().held(), 0);
        assert!(now > 0.0);
    }

    #[test]
    fn stop_after_release_cuts_the_ringing_drone() {
        let mut engine = engine();
        let triad = frame(&[(261.6, 220), (329.6, 200), (392.0, 200)]);
        let now = run(&mut engine, &triad, 0.0, 0.5);
        let silent = [0u8; 2048];
        let now = now + 1.0 / 60.0;
        engine.synth_mut().set_time(now);
        let report = engine.tick(&silent, now);
        assert_eq!(report.tone_event, Some(ToneEvent::Released));
        assert!(engine.synth().live_oscillators() >= 4);

        engine.stop();
        assert_eq!(engine.synth().live_oscillators(), 0);
        assert_eq!(engine.tone().releasing(), 0);
        assert_eq!(engine.echo().voices(), 0);
    }

    #[test]
    fn feedback_off_cuts_the_ringing_drone() {
        let mut engine = engine();
        let triad = frame(&[(261.6, 220), (329.6, 200), (392.0, 200)]);
        let now = run(&mut engine, &triad, 0.0, 0.5);
        let now = now + 1.0 / 60.0;
        engine.synth_mut().set_time(now);
        engine.tick(&[0u8; 2048], now);
        assert_eq!(engine.tone().releasing(), 1);

        engine.set_feedback_enabled(false);
        assert_eq!(engine.tone().releasing(), 0);
        // echoes stop after their short silence fade
        engine.synth_mut().set_time(now + 0.1);
        assert_eq!(engine.synth().live_oscillators(), 0);
    }

    #[test]
    fn released_drone_is_forgotten_once_stopped() {
        let mut engine = engine();
        let triad = frame(&[(261.6, 220), (329.6, 200), (392.0, 200)]);
        let now = run(&mut engine, &triad, 0.0, 0.5);
        let now = run(&mut engine, &[0u8; 2048], now, 0.1);
        assert_eq!(engine.tone().releasing(), 1);
        run(&mut engine, &[0u8; 2048], now, 0.6);
        assert_eq!(engine.tone().releasing(), 0);
    }

    #[test]
    fn observers_see_every_tick() {
        let mut engine = engine();
        let count = Rc::new(RefCell::new(0));
        engine.add_observer(Box::new(Count(count.clone())));
        for i in 0..10 {
            engine.tick(&[0u8; 2048], i as f64 / 60.0);
        }
        assert_eq!(*count.borrow(), 10);
        engine.finish().unwrap();
    }
}
