// Spectrum module - dB magnitude snapshots from time-domain frames
//
// The live trainer receives spectral snapshots from its audio host. The
// offline harness and the tests produce them here instead: Hann window,
// forward FFT, then 20·log10(|X| / N) per positive-frequency bin.

use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::sync::Arc;

use crate::analysis::types::{AudioFrame, SpectralSnapshot};

/// Floor applied to empty bins so the snapshot never holds -inf
pub const MIN_DB: f32 = -160.0;

/// Spectrum analyzer that computes dB snapshots from audio frames
pub struct SpectrumAnalyzer {
    fft: Arc<dyn Fft<f32>>,
    fft_size: usize,
    /// Hann window for FFT (pre-computed)
    window: Vec<f32>,
    buffer: Vec<Complex<f32>>,
}

impl SpectrumAnalyzer {
    /// Create a new spectrum analyzer
    ///
    /// # Arguments
    /// * `fft_size` - FFT window size (the frame size of the session)
    pub fn new(fft_size: usize) -> Self {
        // Pre-compute Hann window to reduce spectral leakage
        let window = (0..fft_size)
            .map(|i| {
                0.5 * (1.0
                    - ((2.0 * std::f32::consts::PI * i as f32) / (fft_size as f32 - 1.0)).cos())
            })
            .collect();

        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(fft_size);

        Self {
            fft,
            fft_size,
            window,
            buffer: Vec::with_capacity(fft_size),
        }
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    /// Compute the dB magnitude snapshot of a frame
    ///
    /// Frames shorter than the FFT size are zero padded; longer frames use
    /// their most recent `fft_size` samples.
    ///
    /// # Returns
    /// Snapshot with `fft_size / 2` bins spaced `sample_rate / fft_size` Hz apart
    pub fn analyze(&mut self, frame: &AudioFrame) -> SpectralSnapshot {
        let samples = if frame.samples.len() > self.fft_size {
            &frame.samples[frame.samples.len() - self.fft_size..]
        } else {
            &frame.samples[..]
        };

        self.buffer.clear();
        self.buffer.extend(
            samples
                .iter()
                .zip(&self.window)
                .map(|(&sample, &w)| Complex::new(sample * w, 0.0)),
        );
        self.buffer.resize(self.fft_size, Complex::new(0.0, 0.0));

        self.fft.process(&mut self.buffer);

        let scale = 1.0 / self.fft_size as f32;
        let magnitudes_db = self.buffer[..self.fft_size / 2]
            .iter()
            .map(|c| {
                let magnitude = c.norm() * scale;
                if magnitude > 0.0 {
                    (20.0 * magnitude.log10()).max(MIN_DB)
                } else {
                    MIN_DB
                }
            })
            .collect();

        SpectralSnapshot::new(
            magnitudes_db,
            frame.sample_rate as f32 / self.fft_size as f32,
        )
    }
}
