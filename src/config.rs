use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::analysis::key::KeyStrategy;
use crate::analysis::tuning::Temperament;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("FFT size must be a power of two, got {0}")]
    FftSize(usize),

    #[error("fade ({fade}s) must not exceed tone duration ({duration}s)")]
    FadeLongerThanTone { fade: f64, duration: f64 },

    #[error("peak separation must be positive, got {0}")]
    Separation(f32),

    #[error("analysis needs at least one column")]
    NoColumns,

    #[error("{0} must be positive")]
    NonPositive(&'static str),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub room_modes: RoomModeConfig,
    #[serde(default)]
    pub key: KeyConfig,
    #[serde(default)]
    pub tone: ToneConfig,
    #[serde(default)]
    pub echo: EchoConfig,
    #[serde(default)]
    pub frames: FrameConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Minimum bin magnitude (exclusive) for a peak candidate
    pub threshold: u8,
    /// Points on the log-frequency axis
    pub columns: usize,
    pub min_frequency: f32,
    /// Peaks below this frequency share the band drones are generated in
    pub low_band_split: f32,
    /// Minimum distance between peaks, in decades
    pub separation: f32,
    pub max_peaks: usize,
    /// Loudest peak must reach this before a key is inferred
    pub significance_floor: u8,
    pub low_band_weight: f32,
    pub high_band_weight: f32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RoomModeConfig {
    pub bucket_hz: f32,
    pub window_secs: f64,
    pub warmup_secs: f64,
    pub min_samples: usize,
    pub min_amplitude: f32,
    /// Detections per second across the window
    pub min_consistency: f32,
    pub max_modes: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KeyConfig {
    pub strategy: KeyStrategy,
    pub temperament: Temperament,
    pub acceptance: f32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToneConfig {
    pub duration_secs: f64,
    pub fade_secs: f64,
    pub attack_secs: f64,
    pub release_secs: f64,
    pub strength_gate: f32,
    pub volume_scale: f32,
    pub volume_ceiling: f32,
    pub drone_ceiling_hz: f32,
    pub max_drone_voices: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EchoConfig {
    pub enabled: bool,
    /// Selected peak must exceed threshold times this ratio
    pub trigger_ratio: f32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FrameConfig {
    pub fft_size: usize,
    pub fps: u32,
    /// Analyser time constant, 0.0 disables smoothing
    pub smoothing: f32,
    pub min_db: f32,
    pub max_db: f32,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            threshold: 128,
            columns: 1024,
            min_frequency: 20.0,
            low_band_split: 500.0,
            separation: 0.15,
            max_peaks: 5,
            significance_floor: 128,
            low_band_weight: 0.3,
            high_band_weight: 1.5,
        }
    }
}

impl Default for RoomModeConfig {
    fn default() -> Self {
        Self {
            bucket_hz: 5.0,
            window_secs: 30.0,
            warmup_secs: 10.0,
            min_samples: 20,
            min_amplitude: 40.0,
            min_consistency: 0.5,
            max_modes: 3,
        }
    }
}

impl Default for KeyConfig {
    fn default() -> Self {
        Self {
            strategy: KeyStrategy::default(),
            temperament: Temperament::default(),
            acceptance: 50.0,
        }
    }
}

impl Default for ToneConfig {
    fn default() -> Self {
        Self {
            duration_secs: 10.0,
            fade_secs: 2.0,
            attack_secs: 2.0,
            release_secs: 0.5,
            strength_gate: 0.2,
            volume_scale: 0.3,
            volume_ceiling: 0.2,
            drone_ceiling_hz: 500.0,
            max_drone_voices: 4,
        }
    }
}

impl Default for EchoConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            trigger_ratio: 1.2,
        }
    }
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            fft_size: 4096,
            fps: 60,
            smoothing: 0.8,
            min_db: -100.0,
            max_db: -30.0,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.frames.fft_size.is_power_of_two() {
            return Err(ConfigError::FftSize(self.frames.fft_size));
        }
        if self.frames.fps == 0 {
            return Err(ConfigError::NonPositive("frames.fps"));
        }
        if self.analysis.columns == 0 {
            return Err(ConfigError::NoColumns);
        }
        if self.analysis.separation <= 0.0 {
            return Err(ConfigError::Separation(self.analysis.separation));
        }
        if self.room_modes.bucket_hz <= 0.0 {
            return Err(ConfigError::NonPositive("room_modes.bucket_hz"));
        }
        if self.room_modes.window_secs <= 0.0 {
            return Err(ConfigError::NonPositive("room_modes.window_secs"));
        }
        if self.tone.duration_secs <= 0.0 {
            return Err(ConfigError::NonPositive("tone.duration_secs"));
        }
        if self.tone.fade_secs > self.tone.duration_secs {
            return Err(ConfigError::FadeLongerThanTone {
                fade: self.tone.fade_secs,
                duration: self.tone.duration_secs,
            });
        }
        Ok(())
    }
}

/// Explicit path first, then `roomtone.toml` here, then the user config dirs.
pub fn find_config(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    let local = PathBuf::from("roomtone.toml");
    if local.exists() {
        return Some(local);
    }
    if let Some(home) = dirs::home_dir() {
        let xdg = home.join(".config").join("roomtone").join("config.toml");
        if xdg.exists() {
            return Some(xdg);
        }
    }
    if let Some(config_dir) = dirs::config_dir() {
        let platform = config_dir.join("roomtone").join("config.toml");
        if platform.exists() {
            return Some(platform);
        }
    }
    None
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content).with_context(|| format!("Invalid config file: {}", path.display()))
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).context("Failed to parse TOML")?;
    config.validate()?;
    Ok(config)
}
