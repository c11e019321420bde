use roomtone::analysis::{Note, PitchClass};
use roomtone::audio::{AudioData, SpectrumFrames};
use roomtone::report::SessionRecorder;
use roomtone::synth::RecordingSynth;
use roomtone::tone::{ToneEvent, TonePhase};
use roomtone::{Config, Engine, TickReport};

const SAMPLE_RATE: u32 = 44100;
const TICK: f64 = 1.0 / 60.0;

/// Analyser frame with one lit bin per (frequency, amplitude).
fn frame(tones: &[(f32, u8)]) -> Vec<u8> {
    let mut frame = vec![0u8; 2048];
    let nyquist = SAMPLE_RATE as f32 / 2.0;
    for &(freq, amplitude) in tones {
        let bin = (freq / nyquist * frame.len() as f32) as usize;
        frame[bin] = amplitude;
    }
    frame
}

fn triad() -> Vec<u8> {
    frame(&[(261.6, 220), (329.6, 200), (392.0, 200)])
}

fn drone_only() -> Config {
    let mut config = Config::default();
    config.echo.enabled = false;
    config
}

struct Session {
    engine: Engine<RecordingSynth>,
    tick: u64,
}

impl Session {
    fn new(config: &Config) -> Self {
        Self {
            engine: Engine::new(config, SAMPLE_RATE, RecordingSynth::new()),
            tick: 0,
        }
    }

    fn now(&self) -> f64 {
        self.tick as f64 * TICK
    }

    fn step(&mut self, frame: &[u8]) -> TickReport {
        self.tick += 1;
        let now = self.now();
        self.engine.synth_mut().set_time(now);
        self.engine.tick(frame, now)
    }

    fn run(&mut self, frame: &[u8], secs: f64) -> Vec<TickReport> {
        let ticks = (secs / TICK).round() as u64;
        (0..ticks).map(|_| self.step(frame)).collect()
    }

    fn live(&self) -> usize {
        self.engine.synth().live_oscillators()
    }
}

/// xorshift32, enough for reproducible jitter.
struct Jitter(u32);

impl Jitter {
    fn next(&mut self, span: u32) -> u32 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 17;
        self.0 ^= self.0 << 5;
        self.0 % span
    }
}

#[test]
fn drone_expires_after_its_duration() {
    let mut session = Session::new(&drone_only());
    let triad = triad();

    let first = session.step(&triad);
    assert!(matches!(first.tone_event, Some(ToneEvent::Started { .. })));
    let started_at = first.time;

    let reports = session.run(&triad, 11.0);
    let sustained = reports.iter().find(|r| (r.time - 5.0).abs() < TICK / 2.0).unwrap();
    assert_eq!(sustained.phase, TonePhase::Sustaining);
    assert!(reports.iter().any(|r| r.phase == TonePhase::FadingOut));

    let expired = reports
        .iter()
        .position(|r| r.tone_event == Some(ToneEvent::Expired))
        .expect("drone never expired");
    let elapsed = reports[expired].time - started_at;
    assert!(elapsed >= 10.0 - 1e-9, "expired early at {elapsed}");
    assert!(elapsed <= 10.0 + TICK + 1e-9, "expired late at {elapsed}");
    assert_eq!(reports[expired].phase, TonePhase::Idle);

    // the key is still there, so the next tick starts a fresh drone
    assert!(matches!(
        reports[expired + 1].tone_event,
        Some(ToneEvent::Started { .. })
    ));
}

#[test]
fn expiry_leaves_no_voice_running() {
    let mut session = Session::new(&drone_only());
    let triad = triad();
    session.run(&triad, 5.0);
    assert_eq!(session.live(), 4);
    assert_eq!(
        session.engine.synth().sounding_frequencies().len(),
        session.engine.tone().handle().oscillators.len()
    );

    loop {
        let report = session.step(&triad);
        if report.tone_event == Some(ToneEvent::Expired) {
            break;
        }
        assert!(session.now() < 12.0, "drone never expired");
    }
    assert_eq!(session.live(), 0);
    assert!(session.engine.tone().handle().is_empty());
}

#[test]
fn silence_releases_the_drone() {
    let mut session = Session::new(&drone_only());
    session.run(&triad(), 1.0);
    assert!(session.engine.tone().is_active());

    let silent = vec![0u8; 2048];
    let released = session.step(&silent);
    assert_eq!(released.tone_event, Some(ToneEvent::Released));
    assert_eq!(released.phase, TonePhase::Idle);
    assert!(released.key.is_none());

    let reports = session.run(&silent, 1.0);
    assert!(reports.iter().all(|r| r.tone_event.is_none() && r.phase == TonePhase::Idle));
    assert_eq!(session.live(), 0);
}

#[test]
fn small_fluctuations_keep_the_tone_peak() {
    let mut session = Session::new(&Config::default());
    let mut jitter = Jitter(0x2545_F491);

    let first = session.step(&frame(&[(261.6, 230), (440.0, 170)]));
    let selected = first.tone_peak.expect("tone peak").frequency;
    assert!(first.echo.is_some());

    for _ in 0..300 {
        let amplitude = 150 + jitter.next(41) as u8;
        let report = session.step(&frame(&[(261.6, 230), (440.0, amplitude)]));
        let peak = report.tone_peak.expect("tone peak");
        assert_eq!(peak.frequency, selected);
    }

    // a new second peak has to persist before it is taken
    let moved = frame(&[(261.6, 230), (880.0, 170)]);
    assert_eq!(session.step(&moved).tone_peak.unwrap().frequency, selected);
    assert_eq!(session.step(&moved).tone_peak.unwrap().frequency, selected);
    let switched = session.step(&moved);
    let peak = switched.tone_peak.unwrap();
    assert!(peak.frequency > selected * 1.5);
    assert!(switched.echo.is_some());
}

#[test]
fn unavailable_backend_is_contained() {
    let mut session = Session::new(&drone_only());
    session.engine.synth_mut().set_available(false);

    let reports = session.run(&triad(), 0.5);
    assert!(reports
        .iter()
        .all(|r| matches!(r.tone_event, Some(ToneEvent::Failed { .. }))));
    assert!(reports.iter().all(|r| r.phase == TonePhase::Idle));
    assert!(reports.iter().all(|r| r.key.is_some()));
    assert_eq!(session.live(), 0);

    session.engine.synth_mut().set_available(true);
    let recovered = session.step(&triad());
    assert!(matches!(recovered.tone_event, Some(ToneEvent::Started { .. })));
    assert_eq!(session.live(), 4);
}

#[test]
fn partial_build_is_torn_down() {
    let mut session = Session::new(&drone_only());
    // bus, first oscillator and its gain, then nothing
    session.engine.synth_mut().limit_creations(3);

    let report = session.step(&triad());
    assert!(matches!(report.tone_event, Some(ToneEvent::Failed { .. })));
    assert_eq!(report.phase, TonePhase::Idle);
    assert_eq!(session.live(), 0);
    assert!(session.engine.tone().handle().is_empty());
}

#[test]
fn finish_silences_everything_and_writes_the_report() {
    let path = std::env::temp_dir().join(format!("roomtone-session-{}.json", std::process::id()));
    let mut session = Session::new(&Config::default());
    session
        .engine
        .add_observer(Box::new(SessionRecorder::new(Some(path.clone()))));

    session.run(&triad(), 1.0);
    session
        .engine
        .press_key(Note::new(PitchClass::A, 3), 0.8)
        .unwrap();
    session
        .engine
        .press_key(Note::new(PitchClass::E, 3), 0.8)
        .unwrap();
    let now = session.now();
    session
        .engine
        .release_key(Note::new(PitchClass::E, 3), now)
        .unwrap();
    assert!(session.live() > 4);

    session.engine.finish().unwrap();
    assert_eq!(session.live(), 0);
    assert!(!session.engine.tone().is_active());
    assert!(!session.engine.echo().is_sounding());
    assert_eq!(session.engine.echo().pending(), 0);
    assert_eq!(session.engine.voices().held(), 0);
    assert_eq!(session.engine.voices().releasing(), 0);

    let json = std::fs::read_to_string(&path).unwrap();
    std::fs::remove_file(&path).ok();
    let report: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(report["ticks"], 60);
    assert_eq!(report["keys"][0]["key"], "C major");
    assert_eq!(report["drones"].as_array().unwrap().len(), 1);
}

#[test]
fn stop_right_after_release_leaves_nothing_live() {
    let mut session = Session::new(&Config::default());
    session.run(&triad(), 1.0);
    let released = session.step(&vec![0u8; 2048]);
    assert_eq!(released.tone_event, Some(ToneEvent::Released));
    assert!(session.live() > 0);

    session.engine.stop();
    assert_eq!(session.live(), 0);
    assert_eq!(session.engine.tone().releasing(), 0);
    assert_eq!(session.engine.echo().voices(), 0);
}

#[test]
fn stop_reaches_an_echo_that_was_replaced() {
    let mut session = Session::new(&Config::default());
    let first = session.step(&frame(&[(261.6, 230), (440.0, 170)]));
    assert!(first.echo.is_some());

    let moved = frame(&[(261.6, 230), (880.0, 170)]);
    let reports = session.run(&moved, 3.0 * TICK);
    assert!(reports.last().unwrap().echo.is_some());
    assert_eq!(session.engine.echo().voices(), 2);

    session.engine.stop();
    assert_eq!(session.live(), 0);
    assert_eq!(session.engine.echo().voices(), 0);
}

#[test]
fn feedback_off_while_the_drone_rings_out() {
    let mut session = Session::new(&Config::default());
    session.run(&triad(), 1.0);
    let released = session.step(&vec![0u8; 2048]);
    assert_eq!(released.tone_event, Some(ToneEvent::Released));

    session.engine.set_feedback_enabled(false);
    assert_eq!(session.engine.tone().releasing(), 0);
    session.run(&triad(), 0.1);
    assert_eq!(session.live(), 0);
    assert!(!session.engine.tone().is_active());
}

#[test]
fn decoded_fifth_drives_a_drone() {
    let seconds = 3.0;
    let len = (SAMPLE_RATE as f64 * seconds) as usize;
    let samples = (0..len)
        .map(|i| {
            let t = i as f64 / SAMPLE_RATE as f64;
            let c = (std::f64::consts::TAU * 261.6 * t).sin();
            let g = (std::f64::consts::TAU * 392.0 * t).sin();
            (0.05 * (c + g)) as f32
        })
        .collect();
    let audio = AudioData {
        samples,
        sample_rate: SAMPLE_RATE,
    };

    let config = drone_only();
    let mut engine = Engine::new(&config, audio.sample_rate, RecordingSynth::new());
    let mut started = false;
    let mut saw_c = false;
    for frame in SpectrumFrames::new(&audio, &config.frames) {
        engine.synth_mut().set_time(frame.time);
        let report = engine.tick(&frame.bins, frame.time);
        saw_c |= report
            .peaks
            .iter()
            .any(|p| (p.frequency / 261.6 - 1.0).abs() < 0.08);
        started |= matches!(report.tone_event, Some(ToneEvent::Started { .. }));
    }
    assert!(saw_c);
    assert!(started);
    engine.finish().unwrap();
    assert_eq!(engine.synth().live_oscillators(), 0);
}
