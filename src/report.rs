use anyhow::{Context, Result};
use serde::Serialize;
use std::path::PathBuf;

use crate::analysis::RoomMode;
use crate::engine::{TickObserver, TickReport};
use crate::tone::ToneEvent;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct KeyChange {
    pub time: f64,
    /// `None` when the key was lost
    pub key: Option<String>,
    pub confidence: f32,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DroneStart {
    pub time: f64,
    pub key: String,
    pub frequencies: Vec<f32>,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct SessionReport {
    pub ticks: usize,
    pub duration_secs: f64,
    pub keys: Vec<KeyChange>,
    pub drones: Vec<DroneStart>,
    pub echoes: usize,
    pub failures: usize,
    pub room_modes: Vec<RoomMode>,
}

/// Accumulates a session summary and writes it as JSON when the session ends.
#[derive(Debug, Default)]
pub struct SessionRecorder {
    report: SessionReport,
    output: Option<PathBuf>,
    current_key: Option<String>,
}

impl SessionRecorder {
    pub fn new(output: Option<PathBuf>) -> Self {
        Self {
            output,
            ..Self::default()
        }
    }

    pub fn report(&self) -> &SessionReport {
        &self.report
    }
}

impl TickObserver for SessionRecorder {
    fn on_tick(&mut self, tick: &TickReport) {
        self.report.ticks += 1;
        self.report.duration_secs = tick.time;

        let key = tick.key.as_ref().map(|h| h.key.to_string());
        if key != self.current_key {
            match &key {
                Some(name) => log::info!("Key: {name} at {:.1}s", tick.time),
                None => log::debug!("Key lost at {:.1}s", tick.time),
            }
            self.report.keys.push(KeyChange {
                time: tick.time,
                key: key.clone(),
                confidence: tick.key.as_ref().map_or(0.0, |h| h.confidence),
            });
            self.current_key = key;
        }

        match &tick.tone_event {
            Some(ToneEvent::Started { key, frequencies }) => {
                self.report.drones.push(DroneStart {
                    time: tick.time,
                    key: key.to_string(),
                    frequencies: frequencies.clone(),
                });
            }
            Some(ToneEvent::Failed { .. }) => self.report.failures += 1,
            _ => {}
        }
        if tick.echo.is_some() {
            self.report.echoes += 1;
        }
        self.report.room_modes = tick.room_modes.clone();
    }

    fn on_finish(&mut self) -> Result<()> {
        log::info!(
            "Session: {} ticks, {} key changes, {} drones, {} echoes",
            self.report.ticks,
            self.report.keys.len(),
            self.report.drones.len(),
            self.report.echoes
        );
        let Some(path) = &self.output else {
            return Ok(());
        };
        let json = serde_json::to_string_pretty(&self.report)
            .context("Failed to serialize session report")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write report: {}", path.display()))?;
        log::info!("Wrote report to {}", path.display());
        Ok(())
    }
}
