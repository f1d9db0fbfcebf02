//! Byte-scaled frequency analysis over a live capture stream
//!
//! Mirrors the classic analyser-node behaviour: Blackman-windowed FFT of the
//! newest `fft_size` samples, magnitudes smoothed over time, converted to dB
//! and mapped from `[MIN_DB, MAX_DB]` onto `0..=255`.

use super::capture::SharedCaptureState;
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::f32::consts::PI;
use std::sync::Arc;

const MIN_DB: f32 = -100.0;
const MAX_DB: f32 = -30.0;

/// Frequency-domain view of a capture stream
pub struct SpectrumAnalyser {
    source: SharedCaptureState,
    fft_size: usize,
    smoothing: f32,
    window: Vec<f32>,
    frame: Vec<f32>,
    magnitudes: Vec<f32>,
    fft: Arc<dyn Fft<f32>>,
    buffer: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
}

impl SpectrumAnalyser {
    pub fn new(source: SharedCaptureState, fft_size: usize, smoothing: f32) -> Self {
        let fft_size = fft_size.max(32);
        let window = blackman(fft_size);
        let fft = FftPlanner::new().plan_fft_forward(fft_size);
        let scratch = vec![Complex::default(); fft.get_inplace_scratch_len()];
        Self {
            source,
            fft_size,
            smoothing: smoothing.clamp(0.0, 1.0),
            window,
            frame: vec![0.0; fft_size],
            magnitudes: vec![0.0; fft_size / 2],
            fft,
            buffer: vec![Complex::default(); fft_size],
            scratch,
        }
    }

    /// Number of frequency bins produced per frame
    pub fn bin_count(&self) -> usize {
        self.fft_size / 2
    }

    /// Analyse the newest frame and write one byte per bin into `out`
    pub fn byte_frequency_data(&mut self, out: &mut [u8]) {
        self.source.latest(&mut self.frame);
        for ((slot, &sample), &w) in self.buffer.iter_mut().zip(&self.frame).zip(&self.window) {
            *slot = Complex::new(sample * w, 0.0);
        }
        self.fft.process_with_scratch(&mut self.buffer, &mut self.scratch);

        let scale = 1.0 / self.fft_size as f32;
        for (smoothed, bin) in self.magnitudes.iter_mut().zip(&self.buffer) {
            let magnitude = bin.norm() * scale;
            *smoothed = self.smoothing * *smoothed + (1.0 - self.smoothing) * magnitude;
        }

        for (byte, &magnitude) in out.iter_mut().zip(&self.magnitudes) {
            *byte = to_byte(magnitude);
        }
    }

    /// Average byte energy across all bins of the newest frame
    pub fn average_energy(&mut self) -> f32 {
        let mut bins = vec![0u8; self.bin_count()];
        self.byte_frequency_data(&mut bins);
        bins.iter().map(|&b| b as f32).sum::<f32>() / bins.len() as f32
    }
}

fn to_byte(magnitude: f32) -> u8 {
    if magnitude <= 0.0 {
        return 0;
    }
    let db = 20.0 * magnitude.log10();
    let scaled = 255.0 * (db - MIN_DB) / (MAX_DB - MIN_DB);
    scaled.clamp(0.0, 255.0) as u8
}

fn blackman(size: usize) -> Vec<f32> {
    let (a0, a1, a2) = (0.42, 0.5, 0.08);
    (0..size)
        .map(|i| {
            let x = i as f32 / size as f32;
            a0 - a1 * (2.0 * PI * x).cos() + a2 * (4.0 * PI * x).cos()
        })
        .collect()
}
