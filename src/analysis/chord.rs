//! ChordEnergyDetector - harmonic-bin energy check for a known pitch set
//!
//! Given the pitches that are expected to sound, this detector looks at the
//! spectral snapshot around each pitch's fundamental bin and its first
//! harmonic (2×) bin. A pitch counts as present when either ±1-bin
//! neighborhood peaks above the energy threshold.
//!
//! Group success uses a majority rule: groups of one or two pitches need
//! full agreement, larger groups need `ceil(0.7·n)` pitches. The 0.7 ratio is
//! an empirical value kept exactly as tuned.

use serde::{Deserialize, Serialize};

use crate::analysis::signal::pitch_to_frequency;
use crate::analysis::types::SpectralSnapshot;
use crate::error::DetectionError;

/// Fraction of a larger group that must be present
pub const MAJORITY_RATIO: f32 = 0.7;
/// Groups up to this size require every pitch
pub const FULL_AGREEMENT_MAX: usize = 2;

/// Energy found for one target pitch
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NoteEnergy {
    pub pitch: i32,
    pub frequency: f32,
    /// Peak of the fundamental neighborhood (-inf when out of range)
    pub fundamental_db: f32,
    /// Peak of the first-harmonic neighborhood (-inf when out of range)
    pub harmonic_db: f32,
    pub detected: bool,
}

/// Outcome of a chord energy check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChordDetection {
    pub detected_count: usize,
    pub required_count: usize,
    /// Minimum number of present pitches for success
    pub majority_threshold: usize,
    pub notes: Vec<NoteEnergy>,
    pub success: bool,
    /// detected_count / required_count
    pub confidence: f32,
}

impl ChordDetection {
    /// Zero-confidence failure for an empty target set
    pub fn empty() -> Self {
        Self {
            detected_count: 0,
            required_count: 0,
            majority_threshold: 0,
            notes: Vec::new(),
            success: false,
            confidence: 0.0,
        }
    }

    /// Every target pitch was present
    pub fn is_strong(&self) -> bool {
        self.required_count > 0 && self.detected_count >= self.required_count
    }

    pub fn detected_pitches(&self) -> impl Iterator<Item = i32> + '_ {
        self.notes.iter().filter(|n| n.detected).map(|n| n.pitch)
    }
}

/// Minimum number of present pitches for a group of `required` pitches
pub fn majority_threshold(required: usize) -> usize {
    let threshold = if required <= FULL_AGREEMENT_MAX {
        required
    } else {
        (required as f32 * MAJORITY_RATIO).ceil() as usize
    };
    threshold.max(1)
}

/// Harmonic-bin energy detector
///
/// The detector holds only its margin; the threshold itself is supplied on
/// every call because calibration may refresh it between ticks.
#[derive(Debug, Clone)]
pub struct ChordEnergyDetector {
    margin_db: f32,
}

impl ChordEnergyDetector {
    /// # Arguments
    /// * `margin_db` - Amount subtracted from the supplied threshold (12 dB by default)
    pub fn new(margin_db: f32) -> Self {
        Self { margin_db }
    }

    /// Check which target pitches carry energy in the snapshot
    ///
    /// # Arguments
    /// * `snapshot` - dB magnitudes for this tick
    /// * `targets` - Expected pitches
    /// * `threshold_db` - Calibration threshold before the margin is applied
    ///
    /// # Returns
    /// * `Ok(ChordDetection)` - Including a zero-confidence failure when
    ///   `targets` is empty
    /// * `Err(DetectionError::MalformedSpectrum)` - The snapshot cannot be
    ///   indexed by frequency
    pub fn detect(
        &self,
        snapshot: &SpectralSnapshot,
        targets: &[i32],
        threshold_db: f32,
    ) -> Result<ChordDetection, DetectionError> {
        if targets.is_empty() {
            tracing::debug!("[ChordEnergyDetector] {}", DetectionError::InvalidTargetSet);
            return Ok(ChordDetection::empty());
        }
        snapshot.validate()?;

        let threshold = threshold_db - self.margin_db;

        let notes: Vec<NoteEnergy> = targets
            .iter()
            .map(|&pitch| {
                let frequency = pitch_to_frequency(pitch as f32);
                let fundamental_db = neighborhood_peak(snapshot, frequency);
                let harmonic_db = neighborhood_peak(snapshot, frequency * 2.0);
                NoteEnergy {
                    pitch,
                    frequency,
                    fundamental_db,
                    harmonic_db,
                    detected: fundamental_db > threshold || harmonic_db > threshold,
                }
            })
            .collect();

        let detected_count = notes.iter().filter(|n| n.detected).count();
        let required_count = targets.len();
        let majority_threshold = majority_threshold(required_count);

        Ok(ChordDetection {
            detected_count,
            required_count,
            majority_threshold,
            notes,
            success: detected_count >= majority_threshold,
            confidence: detected_count as f32 / required_count as f32,
        })
    }
}

/// Loudest bin within ±1 of the bin nearest `frequency`
fn neighborhood_peak(snapshot: &SpectralSnapshot, frequency: f32) -> f32 {
    let bins = &snapshot.magnitudes_db;
    let center = (frequency / snapshot.bin_width_hz).round();
    if !center.is_finite() || center < 0.0 || center >= bins.len() as f32 {
        return f32::NEG_INFINITY;
    }
    let center = center as usize;
    let low = center.saturating_sub(1);
    let high = (center + 1).min(bins.len() - 1);

    bins[low..=high]
        .iter()
        .copied()
        .fold(f32::NEG_INFINITY, f32::max)
}
