// CalibrationState - energy threshold storage for chord detection
//
// This module stores the dB threshold the chord energy detector compares bins
// against. Three sources may supply it, in priority order:
//
// 1. Hardware calibration: one ringing capture per open string
//    (threshold = mean string peak - 15 dB)
// 2. Adaptive calibration: noise floor and signal peak tracked during play
//    (threshold = floor + 40% of the dynamic range)
// 3. Manual threshold (-40 dB by default)

use serde::{Deserialize, Serialize};

use crate::analysis::signal::STANDARD_TUNING;
use crate::config::CalibrationConfig;
use crate::error::CalibrationError;

/// Hardware calibration is trusted above this quality
pub const MIN_HARDWARE_QUALITY: f32 = 0.3;
/// Adaptive calibration is trusted above this confidence
pub const MIN_ADAPTIVE_CONFIDENCE: f32 = 0.3;
/// Adaptive confidence above which the manual threshold follows it
pub const MANUAL_FOLLOW_CONFIDENCE: f32 = 0.5;

const INITIAL_NOISE_FLOOR_DB: f32 = -60.0;
const INITIAL_SIGNAL_PEAK_DB: f32 = -20.0;
const INITIAL_ADAPTIVE_THRESHOLD_DB: f32 = -40.0;
const MIN_DYNAMIC_RANGE_DB: f32 = 10.0;
const RANGE_FRACTION: f32 = 0.4;
const FULL_CONFIDENCE_SAMPLES: f32 = 500.0;
/// Floor for per-tick peak readings
const CAPTURE_FLOOR_DB: f32 = -100.0;

/// Which source the current threshold came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThresholdSource {
    Hardware,
    Adaptive,
    Manual,
}

/// Supplies the energy threshold consumed by chord detection
pub trait ThresholdProvider {
    /// Current threshold in dB (before the detector's margin)
    fn energy_threshold(&self) -> f32;

    fn energy_source(&self) -> ThresholdSource;
}

/// Summary of one open string left ringing
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StringCapture {
    pub avg_rms: f32,
    pub max_db: f32,
}

/// Folds per-tick readings of one ringing string into a `StringCapture`
#[derive(Debug, Clone, Default)]
pub struct StringCaptureAccumulator {
    rms_sum: f64,
    count: usize,
    max_db: Option<f32>,
}

impl StringCaptureAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, rms: f32, max_db: f32) {
        self.rms_sum += rms as f64;
        self.count += 1;
        let peak = self.max_db.unwrap_or(CAPTURE_FLOOR_DB);
        self.max_db = Some(if max_db.is_finite() {
            peak.max(max_db)
        } else {
            peak
        });
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Mean RMS and loudest peak of everything pushed so far
    pub fn finish(&self) -> Result<StringCapture, CalibrationError> {
        if self.count == 0 {
            return Err(CalibrationError::InvalidCapture {
                reason: "no readings were collected for this string".to_string(),
            });
        }
        Ok(StringCapture {
            avg_rms: (self.rms_sum / self.count as f64) as f32,
            max_db: self.max_db.unwrap_or(CAPTURE_FLOOR_DB),
        })
    }
}

/// Threshold derived from a full set of open-string captures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HardwareCalibration {
    pub captures: Vec<StringCapture>,
    pub average_signal_db: f32,
    pub optimal_threshold_db: f32,
    /// Calibration quality (0.0-1.0)
    pub quality: f32,
}

impl HardwareCalibration {
    /// Build from one capture per open string
    ///
    /// # Arguments
    /// * `captures` - Captures in tuning order, one per string
    /// * `margin_db` - Distance below the mean peak (15 dB by default)
    ///
    /// # Returns
    /// * `Ok(HardwareCalibration)` - Threshold at mean peak minus the margin
    /// * `Err(CalibrationError)` - Wrong capture count or non-finite values
    pub fn from_captures(
        captures: &[StringCapture],
        margin_db: f32,
    ) -> Result<Self, CalibrationError> {
        let required = STANDARD_TUNING.len();
        if captures.len() != required {
            return Err(CalibrationError::InsufficientSamples {
                required,
                collected: captures.len(),
            });
        }

        for (string, capture) in captures.iter().enumerate() {
            if !capture.avg_rms.is_finite() || capture.avg_rms < 0.0 {
                return Err(CalibrationError::InvalidCapture {
                    reason: format!("string {}: rms {} is not a level", string, capture.avg_rms),
                });
            }
            if !capture.max_db.is_finite() {
                return Err(CalibrationError::InvalidCapture {
                    reason: format!("string {}: peak {} dB is not finite", string, capture.max_db),
                });
            }
        }

        let average_signal_db =
            captures.iter().map(|c| c.max_db).sum::<f32>() / captures.len() as f32;

        Ok(Self {
            captures: captures.to_vec(),
            average_signal_db,
            optimal_threshold_db: average_signal_db - margin_db,
            quality: 1.0,
        })
    }
}

/// Noise-floor / signal-peak tracker running during practice
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaptiveCalibration {
    pub enabled: bool,
    pub noise_floor_db: f32,
    pub signal_peak_db: f32,
    pub threshold_db: f32,
    /// Confidence in `threshold_db` (0.0-1.0)
    pub confidence: f32,
    pub active_samples: u32,
    pub silent_samples: u32,
    pub min_active_samples: u32,
}

impl AdaptiveCalibration {
    pub fn new(enabled: bool, min_active_samples: u32) -> Self {
        Self {
            enabled,
            noise_floor_db: INITIAL_NOISE_FLOOR_DB,
            signal_peak_db: INITIAL_SIGNAL_PEAK_DB,
            threshold_db: INITIAL_ADAPTIVE_THRESHOLD_DB,
            confidence: 0.0,
            active_samples: 0,
            silent_samples: 0,
            min_active_samples,
        }
    }

    /// Fold one tick's spectral peak into the tracker
    ///
    /// # Returns
    /// `true` when the threshold was recomputed on this tick
    pub fn observe(&mut self, max_db: f32, note_active: bool) -> bool {
        if !max_db.is_finite() {
            return false;
        }

        if note_active {
            self.active_samples = self.active_samples.saturating_add(1);
            self.signal_peak_db = self.signal_peak_db * 0.95 + max_db * 0.05;
        } else {
            self.silent_samples = self.silent_samples.saturating_add(1);
            self.noise_floor_db = self.noise_floor_db * 0.99 + max_db * 0.01;
        }

        if self.active_samples <= self.min_active_samples {
            return false;
        }

        let range = self.signal_peak_db - self.noise_floor_db;
        if range <= MIN_DYNAMIC_RANGE_DB {
            return false;
        }

        self.threshold_db = self.noise_floor_db + range * RANGE_FRACTION;
        self.confidence = (self.active_samples as f32 / FULL_CONFIDENCE_SAMPLES).min(1.0);
        true
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.enabled, self.min_active_samples);
    }
}

/// Complete threshold state shared between the session and its host
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationState {
    pub manual_threshold_db: f32,
    pub hardware: Option<HardwareCalibration>,
    pub adaptive: AdaptiveCalibration,
}

impl CalibrationState {
    /// Manual -40 dB, adaptive tracking on, no hardware calibration
    pub fn new_default() -> Self {
        Self::from_config(&CalibrationConfig::default())
    }

    pub fn from_config(config: &CalibrationConfig) -> Self {
        Self {
            manual_threshold_db: config.default_threshold_db,
            hardware: None,
            adaptive: AdaptiveCalibration::new(
                config.adaptive_enabled,
                config.min_active_samples,
            ),
        }
    }

    /// Whether a usable hardware calibration is present
    pub fn is_calibrated(&self) -> bool {
        self.hardware
            .as_ref()
            .is_some_and(|hw| hw.quality > MIN_HARDWARE_QUALITY)
    }

    pub fn set_manual_threshold(&mut self, threshold_db: f32) -> Result<(), CalibrationError> {
        if !threshold_db.is_finite() || !(-160.0..=0.0).contains(&threshold_db) {
            return Err(CalibrationError::ThresholdOutOfRange { threshold_db });
        }
        self.manual_threshold_db = threshold_db;
        Ok(())
    }

    /// Install a hardware calibration; the manual threshold follows it
    pub fn apply_hardware(&mut self, calibration: HardwareCalibration) {
        tracing::info!(
            "[Calibration] Hardware calibration applied: threshold {:.1} dB (mean peak {:.1} dB)",
            calibration.optimal_threshold_db,
            calibration.average_signal_db
        );
        self.manual_threshold_db = calibration.optimal_threshold_db;
        self.hardware = Some(calibration);
    }

    pub fn clear_hardware(&mut self) {
        self.hardware = None;
    }

    /// Per-tick adaptive update
    ///
    /// No-op while a hardware calibration exists or tracking is disabled.
    pub fn observe(&mut self, max_db: f32, note_active: bool) {
        if !self.adaptive.enabled || self.hardware.is_some() {
            return;
        }
        if self.adaptive.observe(max_db, note_active)
            && self.adaptive.confidence > MANUAL_FOLLOW_CONFIDENCE
        {
            self.manual_threshold_db = self.adaptive.threshold_db;
            tracing::debug!(
                "[Calibration] Adaptive threshold {:.1} dB (confidence {:.2})",
                self.adaptive.threshold_db,
                self.adaptive.confidence
            );
        }
    }

    pub fn reset_adaptive(&mut self) {
        self.adaptive.reset();
    }
}

impl Default for CalibrationState {
    fn default() -> Self {
        Self::new_default()
    }
}

impl ThresholdProvider for CalibrationState {
    fn energy_threshold(&self) -> f32 {
        match self.energy_source() {
            ThresholdSource::Hardware => self
                .hardware
                .as_ref()
                .map_or(self.manual_threshold_db, |hw| hw.optimal_threshold_db),
            ThresholdSource::Adaptive => self.adaptive.threshold_db,
            ThresholdSource::Manual => self.manual_threshold_db,
        }
    }

    fn energy_source(&self) -> ThresholdSource {
        if self.is_calibrated() {
            ThresholdSource::Hardware
        } else if self.adaptive.enabled && self.adaptive.confidence > MIN_ADAPTIVE_CONFIDENCE {
            ThresholdSource::Adaptive
        } else {
            ThresholdSource::Manual
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_captures(peaks: [f32; 6]) -> Vec<StringCapture> {
        peaks
            .iter()
            .map(|&max_db| StringCapture {
                avg_rms: 0.05,
                max_db,
            })
            .collect()
    }

    /// Drive the adaptive tracker until its confidence exceeds the follow level
    fn settle_adaptive(state: &mut CalibrationState, ticks: u32) {
        for _ in 0..ticks {
            state.observe(-80.0, false);
            state.observe(-10.0, true);
        }
    }

    #[test]
    fn test_new_default() {
        let state = CalibrationState::new_default();

        assert_eq!(state.manual_threshold_db, -40.0);
        assert!(state.hardware.is_none());
        assert!(state.adaptive.enabled);
        assert_eq!(state.adaptive.noise_floor_db, -60.0);
        assert_eq!(state.adaptive.signal_peak_db, -20.0);
        assert_eq!(state.energy_source(), ThresholdSource::Manual);
        assert_eq!(state.energy_threshold(), -40.0);
    }

    #[test]
    fn test_hardware_from_captures() {
        let captures = create_test_captures([-20.0, -22.0, -24.0, -26.0, -28.0, -30.0]);
        let calibration = HardwareCalibration::from_captures(&captures, 15.0).unwrap();

        assert!((calibration.average_signal_db + 25.0).abs() < 1e-4);
        assert!((calibration.optimal_threshold_db + 40.0).abs() < 1e-4);
        assert_eq!(calibration.quality, 1.0);
    }

    #[test]
    fn test_hardware_wrong_capture_count() {
        let captures = create_test_captures([-20.0; 6]);
        match HardwareCalibration::from_captures(&captures[..4], 15.0) {
            Err(CalibrationError::InsufficientSamples {
                required: 6,
                collected: 4,
            }) => {}
            other => panic!("Expected InsufficientSamples error, got: {:?}", other),
        }
    }

    #[test]
    fn test_hardware_non_finite_capture() {
        let mut captures = create_test_captures([-20.0; 6]);
        captures[3].max_db = f32::NAN;
        match HardwareCalibration::from_captures(&captures, 15.0) {
            Err(CalibrationError::InvalidCapture { reason }) => {
                assert!(reason.contains("string 3"));
            }
            other => panic!("Expected InvalidCapture error, got: {:?}", other),
        }
    }

    #[test]
    fn test_hardware_takes_priority() {
        let mut state = CalibrationState::new_default();
        settle_adaptive(&mut state, 400);
        assert_eq!(state.energy_source(), ThresholdSource::Adaptive);

        let captures = create_test_captures([-30.0; 6]);
        state.apply_hardware(HardwareCalibration::from_captures(&captures, 15.0).unwrap());

        assert_eq!(state.energy_source(), ThresholdSource::Hardware);
        assert_eq!(state.energy_threshold(), -45.0);
    }

    #[test]
    fn test_low_quality_hardware_is_ignored() {
        let mut state = CalibrationState::new_default();
        let captures = create_test_captures([-30.0; 6]);
        let mut calibration = HardwareCalibration::from_captures(&captures, 15.0).unwrap();
        calibration.quality = 0.2;
        state.hardware = Some(calibration);
        state.manual_threshold_db = -35.0;

        assert!(!state.is_calibrated());
        assert_eq!(state.energy_source(), ThresholdSource::Manual);
        assert_eq!(state.energy_threshold(), -35.0);
    }

    #[test]
    fn test_adaptive_needs_enough_active_samples() {
        let mut state = CalibrationState::new_default();
        settle_adaptive(&mut state, 100);

        // Exactly min_active_samples active ticks: not yet trusted
        assert_eq!(state.adaptive.active_samples, 100);
        assert_eq!(state.adaptive.confidence, 0.0);
        assert_eq!(state.energy_source(), ThresholdSource::Manual);

        state.observe(-10.0, true);
        assert!(state.adaptive.confidence > 0.0);
    }

    #[test]
    fn test_adaptive_threshold_tracks_range() {
        let mut state = CalibrationState::new_default();
        settle_adaptive(&mut state, 400);

        let adaptive = &state.adaptive;
        let range = adaptive.signal_peak_db - adaptive.noise_floor_db;
        assert!(range > 10.0);
        assert!((adaptive.threshold_db - (adaptive.noise_floor_db + 0.4 * range)).abs() < 1e-3);
        assert!((adaptive.confidence - 0.8).abs() < 1e-6);

        // Confidence above 0.5 drags the manual threshold along
        assert_eq!(state.manual_threshold_db, state.adaptive.threshold_db);
        assert_eq!(state.energy_threshold(), state.adaptive.threshold_db);
    }

    #[test]
    fn test_adaptive_ignores_narrow_range() {
        let mut adaptive = AdaptiveCalibration::new(true, 100);
        for _ in 0..300 {
            adaptive.observe(-60.0, false);
            adaptive.observe(-55.0, true);
        }
        assert_eq!(adaptive.confidence, 0.0);
        assert_eq!(adaptive.threshold_db, -40.0);
    }

    #[test]
    fn test_adaptive_paused_by_hardware_or_disable() {
        let mut state = CalibrationState::new_default();
        let captures = create_test_captures([-30.0; 6]);
        state.apply_hardware(HardwareCalibration::from_captures(&captures, 15.0).unwrap());
        settle_adaptive(&mut state, 50);
        assert_eq!(state.adaptive.active_samples, 0);

        let mut state = CalibrationState::new_default();
        state.adaptive.enabled = false;
        settle_adaptive(&mut state, 50);
        assert_eq!(state.adaptive.active_samples, 0);
    }

    #[test]
    fn test_adaptive_reset() {
        let mut state = CalibrationState::new_default();
        settle_adaptive(&mut state, 300);
        state.reset_adaptive();

        assert_eq!(state.adaptive.noise_floor_db, -60.0);
        assert_eq!(state.adaptive.signal_peak_db, -20.0);
        assert_eq!(state.adaptive.confidence, 0.0);
        assert_eq!(state.adaptive.active_samples, 0);
        assert!(state.adaptive.enabled);
    }

    #[test]
    fn test_manual_threshold_range() {
        let mut state = CalibrationState::new_default();
        assert!(state.set_manual_threshold(-55.0).is_ok());
        assert_eq!(state.energy_threshold(), -55.0);

        assert_eq!(
            state.set_manual_threshold(6.0),
            Err(CalibrationError::ThresholdOutOfRange { threshold_db: 6.0 })
        );
        assert!(state.set_manual_threshold(f32::NAN).is_err());
        assert_eq!(state.manual_threshold_db, -55.0);
    }

    #[test]
    fn test_capture_accumulator() {
        let mut accumulator = StringCaptureAccumulator::new();
        assert!(accumulator.finish().is_err());

        accumulator.push(0.02, -40.0);
        accumulator.push(0.04, -25.0);
        accumulator.push(0.06, f32::NEG_INFINITY);

        let capture = accumulator.finish().unwrap();
        assert_eq!(accumulator.len(), 3);
        assert!((capture.avg_rms - 0.04).abs() < 1e-6);
        assert_eq!(capture.max_db, -25.0);

        let mut quiet = StringCaptureAccumulator::new();
        quiet.push(0.0, -130.0);
        assert_eq!(quiet.finish().unwrap().max_db, -100.0);
    }

    #[test]
    fn test_serde_roundtrip() {
        let mut state = CalibrationState::new_default();
        let captures = create_test_captures([-24.0; 6]);
        state.apply_hardware(HardwareCalibration::from_captures(&captures, 15.0).unwrap());

        let json = serde_json::to_string(&state).unwrap();
        let restored: CalibrationState = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.energy_source(), ThresholdSource::Hardware);
        assert_eq!(restored.energy_threshold(), -39.0);
    }
}
