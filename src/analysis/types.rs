// Types module - Per-tick data structures for the detection pipeline
//
// Frames and snapshots are handed in by value for a single tick and never
// retained; results are plain values the caller may copy freely.

use serde::{Deserialize, Serialize};

use crate::error::DetectionError;

/// Fixed-length block of time-domain samples
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioFrame {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Per-bin magnitude spectrum in dB
///
/// `bin_width_hz` is the frequency spacing between consecutive bins
/// (sample rate divided by FFT size).
#[derive(Debug, Clone, PartialEq)]
pub struct SpectralSnapshot {
    pub magnitudes_db: Vec<f32>,
    pub bin_width_hz: f32,
}

impl SpectralSnapshot {
    pub fn new(magnitudes_db: Vec<f32>, bin_width_hz: f32) -> Self {
        Self {
            magnitudes_db,
            bin_width_hz,
        }
    }

    /// Check that the snapshot can be indexed by frequency
    pub fn validate(&self) -> Result<(), DetectionError> {
        if self.magnitudes_db.is_empty() {
            return Err(DetectionError::MalformedSpectrum {
                reason: "snapshot has no bins".to_string(),
            });
        }
        if !self.bin_width_hz.is_finite() || self.bin_width_hz <= 0.0 {
            return Err(DetectionError::MalformedSpectrum {
                reason: format!("bin width {} Hz is not positive", self.bin_width_hz),
            });
        }
        Ok(())
    }

    /// Loudest bin in dB, floored at -100 dB
    pub fn max_db(&self) -> f32 {
        self.magnitudes_db
            .iter()
            .copied()
            .filter(|db| db.is_finite())
            .fold(-100.0f32, f32::max)
    }
}

/// Outcome of a pitch estimate
///
/// `frequency` is `None` whenever no periodicity was found; confidence is
/// then 0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub frequency: Option<f32>,
    /// Detection confidence (0.0-1.0)
    pub confidence: f32,
    pub rms: f32,
}

impl DetectionResult {
    /// Null result carrying only the frame level
    pub fn silent(rms: f32) -> Self {
        Self {
            frequency: None,
            confidence: 0.0,
            rms,
        }
    }

    pub fn is_voiced(&self) -> bool {
        self.frequency.is_some()
    }
}
