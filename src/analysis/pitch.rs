//! PitchEstimator - autocorrelation-style monophonic pitch estimation
//!
//! Implements the time-domain part of the YIN method (de Cheveigné &
//! Kawahara, 2002):
//!
//! 1. **Silence gate** - frames below the RMS floor return no pitch
//! 2. **Difference function** - d(τ) = Σ(x[i] - x[i+τ])² over the lag range
//! 3. **Cumulative mean normalized difference** - d'(τ) = d(τ)·τ / Σd(1..τ)
//! 4. **Absolute threshold** - first τ with d'(τ) below threshold, then the
//!    following local minimum
//! 5. **Parabolic interpolation** - sub-sample lag refinement
//!
//! The estimator never fails: any frame it cannot make sense of yields a null
//! frequency with zero confidence. Scratch buffers are kept between calls so a
//! steady stream of equally sized frames does not allocate.

use crate::analysis::signal::rms;
use crate::analysis::types::{AudioFrame, DetectionResult};
use crate::config::DetectionConfig;

/// Curvature below which parabolic refinement is skipped
const MIN_CURVATURE: f32 = 1e-10;

pub struct PitchEstimator {
    silence_floor_rms: f32,
    threshold: f32,
    min_frequency_hz: f32,
    max_frequency_hz: f32,

    // Scratch buffers reused across frames
    difference: Vec<f32>,
    cmndf: Vec<f32>,
}

impl PitchEstimator {
    pub fn new(config: &DetectionConfig) -> Self {
        Self {
            silence_floor_rms: config.silence_floor_rms,
            threshold: config.yin_threshold,
            min_frequency_hz: config.min_frequency_hz,
            max_frequency_hz: config.max_frequency_hz,
            difference: Vec::new(),
            cmndf: Vec::new(),
        }
    }

    /// Lag bounds (inclusive) for a sample rate
    ///
    /// The shortest lag corresponds to the highest detectable frequency.
    pub fn lag_range(&self, sample_rate: u32) -> (usize, usize) {
        let sample_rate = sample_rate as f32;
        let min_lag = (sample_rate / self.max_frequency_hz).floor() as usize;
        let max_lag = (sample_rate / self.min_frequency_hz).floor() as usize;
        (min_lag.max(1), max_lag)
    }

    /// Estimate the fundamental frequency of a frame
    ///
    /// # Returns
    /// `DetectionResult` with the refined frequency and `1 - d'(τ)` as
    /// confidence, or a null frequency when the frame is silent, too short,
    /// or aperiodic.
    pub fn estimate(&mut self, frame: &AudioFrame) -> DetectionResult {
        let samples = &frame.samples;
        let level = rms(samples);

        if !level.is_finite() || level < self.silence_floor_rms {
            return DetectionResult::silent(if level.is_finite() { level } else { 0.0 });
        }
        if frame.sample_rate == 0 {
            return DetectionResult::silent(level);
        }

        // At least two periods of the longest lag must fit in the frame
        let (min_lag, max_lag) = self.lag_range(frame.sample_rate);
        let max_lag = max_lag.min(samples.len() / 2);
        if max_lag <= min_lag {
            return DetectionResult::silent(level);
        }

        self.compute_difference(samples, min_lag, max_lag);
        self.compute_cmndf(max_lag);

        let Some(lag) = self.find_dip(min_lag, max_lag) else {
            return DetectionResult::silent(level);
        };

        let refined = self.parabolic_interpolation(lag, max_lag);
        if refined <= 0.0 {
            return DetectionResult::silent(level);
        }

        let frequency = frame.sample_rate as f32 / refined;
        let confidence = (1.0 - self.cmndf[lag]).clamp(0.0, 1.0);

        tracing::trace!(
            "[PitchEstimator] lag {} -> {:.3}, {:.2} Hz (confidence {:.3}, rms {:.4})",
            lag,
            refined,
            frequency,
            confidence,
            level
        );

        DetectionResult {
            frequency: Some(frequency),
            confidence,
            rms: level,
        }
    }

    /// Squared-difference function; lags below `min_lag` stay at zero
    fn compute_difference(&mut self, samples: &[f32], min_lag: usize, max_lag: usize) {
        self.difference.clear();
        self.difference.resize(max_lag + 1, 0.0);

        for tau in min_lag..=max_lag {
            let overlap = samples.len().saturating_sub(tau);
            self.difference[tau] = samples[..overlap]
                .iter()
                .zip(&samples[tau..tau + overlap])
                .map(|(a, b)| {
                    let delta = a - b;
                    delta * delta
                })
                .sum();
        }
    }

    fn compute_cmndf(&mut self, max_lag: usize) {
        self.cmndf.clear();
        self.cmndf.resize(max_lag + 1, 1.0);

        let mut running_sum = 0.0f32;
        for tau in 1..=max_lag {
            running_sum += self.difference[tau];
            self.cmndf[tau] = if running_sum == 0.0 {
                1.0
            } else {
                self.difference[tau] * tau as f32 / running_sum
            };
        }
    }

    /// First lag under the threshold, walked down to its local minimum
    fn find_dip(&self, min_lag: usize, max_lag: usize) -> Option<usize> {
        let mut tau = (min_lag..=max_lag).find(|&tau| self.cmndf[tau] < self.threshold)?;
        while tau < max_lag && self.cmndf[tau + 1] < self.cmndf[tau] {
            tau += 1;
        }
        Some(tau)
    }

    fn parabolic_interpolation(&self, tau: usize, max_lag: usize) -> f32 {
        let x0 = if tau > 1 { tau - 1 } else { tau };
        let x2 = if tau < max_lag { tau + 1 } else { tau };

        let s0 = self.cmndf[x0];
        let s1 = self.cmndf[tau];
        let s2 = self.cmndf[x2];

        let a = (s0 + s2 - 2.0 * s1) / 2.0;
        let b = (s2 - s0) / 2.0;

        if a.abs() > MIN_CURVATURE {
            tau as f32 - b / (2.0 * a)
        } else {
            tau as f32
        }
    }
}
