use clap::Parser;
use std::path::PathBuf;

use roomtone::analysis::{KeyStrategy, Note, Temperament};
use roomtone::Config;

/// A note played into the session: `NOTE@START[+LENGTH]`, e.g. `A3@2.5+1`.
#[derive(Clone, Debug, PartialEq)]
pub struct NoteCue {
    pub note: Note,
    pub start: f64,
    pub length: f64,
}

fn parse_cue(value: &str) -> Result<NoteCue, String> {
    let (label, timing) = value
        .split_once('@')
        .ok_or_else(|| format!("expected NOTE@START, got '{value}'"))?;
    let note = Note::parse(label).ok_or_else(|| format!("unknown note '{label}'"))?;
    let (start, length) = match timing.split_once('+') {
        Some((start, length)) => (start, length),
        None => (timing, "1"),
    };
    let start: f64 = start.parse().map_err(|_| format!("bad start time '{start}'"))?;
    let length: f64 = length.parse().map_err(|_| format!("bad length '{length}'"))?;
    if start < 0.0 || length <= 0.0 {
        return Err(format!("cue times must be positive in '{value}'"));
    }
    Ok(NoteCue {
        note,
        start,
        length,
    })
}

#[derive(Parser, Debug)]
#[command(name = "roomtone", about = "Listens for room resonances and answers with a tuned drone")]
pub struct Cli {
    /// Input recording (WAV, MP3, FLAC, OGG)
    pub input: PathBuf,

    /// Config file (defaults to roomtone.toml, then the user config dir)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Peak detection threshold (0-255)
    #[arg(short, long)]
    pub threshold: Option<u8>,

    /// Analysis ticks per second
    #[arg(long)]
    pub fps: Option<u32>,

    /// Key inference strategy
    #[arg(long, value_enum)]
    pub strategy: Option<KeyStrategy>,

    /// Tuning used for note names and drone frequencies
    #[arg(long, value_enum)]
    pub temperament: Option<Temperament>,

    /// Analyse only, never schedule drone or echo tones
    #[arg(long)]
    pub no_feedback: bool,

    /// Render the generated tones to a WAV file
    #[arg(short, long)]
    pub render: Option<PathBuf>,

    /// Write a JSON session report
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// Sample rate of the rendered WAV
    #[arg(long, default_value_t = 44100)]
    pub sample_rate: u32,

    /// Play a note into the session (repeatable), e.g. A3@2.5+1
    #[arg(long = "note", value_parser = parse_cue)]
    pub notes: Vec<NoteCue>,
}

impl Cli {
    /// Command-line values win over the config file.
    pub fn apply(&self, config: &mut Config) {
        if let Some(threshold) = self.threshold {
            config.analysis.threshold = threshold;
        }
        if let Some(fps) = self.fps {
            config.frames.fps = fps;
        }
        if let Some(strategy) = self.strategy {
            config.key.strategy = strategy;
        }
        if let Some(temperament) = self.temperament {
            config.key.temperament = temperament;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roomtone::analysis::PitchClass;

    #[test]
    fn parses_note_cues() {
        let cue = parse_cue("A3@2.5+1.5").unwrap();
        assert_eq!(cue.note, Note::new(PitchClass::A, 3));
        assert_eq!(cue.start, 2.5);
        assert_eq!(cue.length, 1.5);
        assert_eq!(parse_cue("C#4@0").unwrap().length, 1.0);
        assert!(parse_cue("A3").is_err());
        assert!(parse_cue("H3@1").is_err());
        assert!(parse_cue("A3@-1").is_err());
    }

    #[test]
    fn flags_override_config() {
        let cli = Cli::parse_from([
            "roomtone",
            "room.wav",
            "--threshold",
            "90",
            "--strategy",
            "nearest",
            "--temperament",
            "equal",
        ]);
        let mut config = Config::default();
        cli.apply(&mut config);
        assert_eq!(config.analysis.threshold, 90);
        assert_eq!(config.key.strategy, KeyStrategy::Nearest);
        assert_eq!(config.key.temperament, Temperament::Equal);
        assert_eq!(config.frames.fps, 60);
    }
}
