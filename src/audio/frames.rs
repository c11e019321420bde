use rayon::prelude::*;
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::collections::VecDeque;
use std::f32::consts::PI;
use std::sync::Arc;

use super::decode::AudioData;
use crate::config::FrameConfig;

/// Frames transformed together on the thread pool before smoothing.
const CHUNK_FRAMES: usize = 256;

/// One analyser snapshot: byte magnitudes of `fft_size / 2` bins.
#[derive(Clone, Debug)]
pub struct Frame {
    pub index: usize,
    pub time: f64,
    pub bins: Vec<u8>,
}

fn blackman_window(size: usize) -> Vec<f32> {
    let n = size as f32;
    (0..size)
        .map(|i| {
            let x = i as f32 / n;
            0.42 - 0.5 * (2.0 * PI * x).cos() + 0.08 * (4.0 * PI * x).cos()
        })
        .collect()
}

/// Byte spectra at a fixed tick rate, produced the way a browser analyser does:
/// Blackman window, magnitude over FFT size, exponential smoothing across
/// frames, decibel range mapped onto 0-255.
///
/// FFTs run in parallel per chunk; smoothing is sequential since each frame
/// depends on the previous one.
pub struct SpectrumFrames<'a> {
    samples: &'a [f32],
    sample_rate: u32,
    fps: u32,
    fft_size: usize,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    smoothing: f32,
    min_db: f32,
    max_db: f32,
    smoothed: Vec<f32>,
    next: usize,
    total: usize,
    ready: VecDeque<Frame>,
}

impl<'a> SpectrumFrames<'a> {
    pub fn new(audio: &'a AudioData, config: &FrameConfig) -> Self {
        let fft_size = config.fft_size;
        let total = (audio.duration_secs() * config.fps as f64).ceil() as usize;
        Self {
            samples: &audio.samples,
            sample_rate: audio.sample_rate,
            fps: config.fps,
            fft_size,
            fft: FftPlanner::<f32>::new().plan_fft_forward(fft_size),
            window: blackman_window(fft_size),
            smoothing: config.smoothing.clamp(0.0, 1.0),
            min_db: config.min_db,
            max_db: config.max_db,
            smoothed: vec![0.0; fft_size / 2],
            next: 0,
            total,
            ready: VecDeque::new(),
        }
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn frame_time(&self, index: usize) -> f64 {
        index as f64 / self.fps as f64
    }

    /// Unsmoothed magnitudes of the `fft_size` samples ending at frame `index`.
    fn magnitudes(&self, index: usize) -> Vec<f32> {
        let end = (self.frame_time(index) * self.sample_rate as f64) as usize;
        let end = end.min(self.samples.len());
        let start = end.saturating_sub(self.fft_size);
        let offset = self.fft_size - (end - start);

        let mut buffer = vec![Complex::new(0.0f32, 0.0); self.fft_size];
        for (i, &sample) in self.samples[start..end].iter().enumerate() {
            buffer[offset + i] = Complex::new(sample * self.window[offset + i], 0.0);
        }
        self.fft.process(&mut buffer);

        let scale = 1.0 / self.fft_size as f32;
        buffer[..self.fft_size / 2]
            .iter()
            .map(|c| c.norm() * scale)
            .collect()
    }

    fn to_byte(&self, magnitude: f32) -> u8 {
        let db = 20.0 * magnitude.log10();
        let scaled = 255.0 * (db - self.min_db) / (self.max_db - self.min_db);
        scaled.floor().clamp(0.0, 255.0) as u8
    }

    fn fill(&mut self) {
        let end = (self.next + CHUNK_FRAMES).min(self.total);
        let raw: Vec<Vec<f32>> = (self.next..end)
            .into_par_iter()
            .map(|index| self.magnitudes(index))
            .collect();

        let tau = self.smoothing;
        for (offset, magnitudes) in raw.into_iter().enumerate() {
            for (smoothed, magnitude) in self.smoothed.iter_mut().zip(magnitudes) {
                *smoothed = tau * *smoothed + (1.0 - tau) * magnitude;
            }
            let index = self.next + offset;
            let bins = self.smoothed.iter().map(|&m| self.to_byte(m)).collect();
            self.ready.push_back(Frame {
                index,
                time: self.frame_time(index),
                bins,
            });
        }
        self.next = end;
    }
}

impl Iterator for SpectrumFrames<'_> {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        if self.ready.is_empty() && self.next < self.total {
            self.fill();
        }
        self.ready.pop_front()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.total - self.next + self.ready.len();
        (left, Some(left))
    }
}
