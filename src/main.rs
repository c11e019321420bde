mod cli;

use anyhow::{bail, Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};

use cli::{Cli, NoteCue};
use roomtone::analysis::Note;
use roomtone::audio::{decode_audio, AudioData, SpectrumFrames};
use roomtone::config::{find_config, load_config};
use roomtone::report::SessionRecorder;
use roomtone::synth::{ManualClock, OfflineSynth, RecordingSynth, SynthBackend};
use roomtone::tone::DeadlineQueue;
use roomtone::{Config, Engine};

/// Velocity used for notes given on the command line.
const CUE_VELOCITY: f32 = 0.7;

enum Cue {
    Press(Note),
    Release(Note),
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();

    let mut config = match find_config(cli.config.as_deref()) {
        Some(path) => {
            let config = load_config(&path)?;
            log::info!("Loaded config from {}", path.display());
            config
        }
        None => Config::default(),
    };
    cli.apply(&mut config);
    config.validate().context("Invalid settings")?;

    if !cli.input.exists() {
        bail!("Input file not found: {}", cli.input.display());
    }

    log::info!("roomtone - room resonance drone");
    log::info!("Input: {}", cli.input.display());
    log::info!(
        "Threshold {} @ {}fps, {:?} strategy, {:?} tuning",
        config.analysis.threshold,
        config.frames.fps,
        config.key.strategy,
        config.key.temperament
    );

    log::info!("Decoding audio...");
    let audio = decode_audio(&cli.input)?;

    match &cli.render {
        Some(path) => {
            let synth = run(&cli, &config, &audio, OfflineSynth::new())?;
            log::info!("Rendering tones...");
            let written = synth.write_wav(path, cli.sample_rate)?;
            log::info!(
                "Wrote {} ({:.1}s at {}Hz)",
                path.display(),
                written as f64 / cli.sample_rate as f64,
                cli.sample_rate
            );
        }
        None => {
            let synth = run(&cli, &config, &audio, RecordingSynth::new())?;
            log::info!(
                "Issued {} synth commands (use --render to hear them)",
                synth.commands().len()
            );
        }
    }

    Ok(())
}

fn schedule_cues(notes: &[NoteCue]) -> DeadlineQueue<Cue> {
    let mut cues = DeadlineQueue::new();
    for cue in notes {
        cues.schedule(cue.start, Cue::Press(cue.note));
        cues.schedule(cue.start + cue.length, Cue::Release(cue.note));
    }
    cues
}

fn run<B: SynthBackend + ManualClock>(
    cli: &Cli,
    config: &Config,
    audio: &AudioData,
    synth: B,
) -> Result<B> {
    let mut engine = Engine::new(config, audio.sample_rate, synth);
    engine.add_observer(Box::new(SessionRecorder::new(cli.report.clone())));
    engine.set_feedback_enabled(!cli.no_feedback);

    let mut cues = schedule_cues(&cli.notes);
    let frames = SpectrumFrames::new(audio, &config.frames);

    let pb = ProgressBar::new(frames.total() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} frames ({eta} remaining)")?
            .progress_chars("=>-"),
    );

    for frame in frames {
        engine.synth_mut().set_time(frame.time);
        for cue in cues.drain_due(frame.time) {
            let result = match cue {
                Cue::Press(note) => engine.press_key(note, CUE_VELOCITY),
                Cue::Release(note) => engine.release_key(note, frame.time),
            };
            if let Err(err) = result {
                log::warn!("Note cue failed: {err}");
            }
        }
        engine.tick(&frame.bins, frame.time);
        pb.inc(1);
    }
    pb.finish_with_message("done");

    engine.synth_mut().set_time(audio.duration_secs());
    engine.finish()?;
    Ok(engine.into_synth())
}
