//! HybridDetector - fusion of time-domain and spectral detection
//!
//! The time-domain estimator is the default source. It under-detects high
//! fundamentals and cannot see simultaneous notes, so when the next expected
//! event is known the spectral energy check is used as a targeted corrective.
//!
//! The policy is an ordered rule table. Rules are evaluated strictly by
//! priority and the first rule that returns a fusion wins:
//!
//! | # | Rule                | Label(s)                                   |
//! |---|---------------------|--------------------------------------------|
//! | a | `NoExpectationRule` | `yin`                                      |
//! | b | `HighRegisterRule`  | `fft-filtered`, `silence`, `fft-high-note` |
//! | c | `NoteOverrideRule`  | `fft-override`                             |
//! | d | `ChordRule`         | `fft`, `yin-fallback`                      |
//! | e | `RawYinRule`        | `yin`                                      |
//!
//! Any spectral fault inside a rule degrades to the raw estimate with the
//! `yin-fallback` label; faults never leave the detector.

use std::cell::OnceCell;

use serde::{Deserialize, Serialize};

use crate::analysis::chord::{ChordDetection, ChordEnergyDetector};
use crate::analysis::pitch::PitchEstimator;
use crate::analysis::signal::{frequency_to_pitch, pitch_to_frequency};
use crate::analysis::types::{AudioFrame, DetectionResult, SpectralSnapshot};
use crate::config::DetectionConfig;
use crate::error::{log_detection_error, DetectionError};

/// Expected fundamentals above this are treated as high register
pub const HIGH_REGISTER_HZ: f32 = 300.0;
/// Reads below this for a high-register note are implausible
pub const IMPLAUSIBLE_LOW_HZ: f32 = 250.0;
/// Confidence below which a high-register read is cross-checked
pub const HIGH_REGISTER_MIN_CONFIDENCE: f32 = 0.4;
/// Confidence below which any single-note read is cross-checked
pub const NOTE_MIN_CONFIDENCE: f32 = 0.5;
/// Semitone distance from the expected note that triggers a cross-check
pub const MAX_PITCH_DISTANCE: f32 = 1.5;

const FILTERED_CONFIDENCE: f32 = 0.9;
const HIGH_NOTE_CONFIDENCE: f32 = 0.85;
const OVERRIDE_CONFIDENCE: f32 = 0.9;

/// Which path produced a detection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DetectionMethod {
    Yin,
    FftFiltered,
    Silence,
    FftHighNote,
    FftOverride,
    Fft,
    YinFallback,
}

impl DetectionMethod {
    pub fn label(&self) -> &'static str {
        match self {
            DetectionMethod::Yin => "yin",
            DetectionMethod::FftFiltered => "fft-filtered",
            DetectionMethod::Silence => "silence",
            DetectionMethod::FftHighNote => "fft-high-note",
            DetectionMethod::FftOverride => "fft-override",
            DetectionMethod::Fft => "fft",
            DetectionMethod::YinFallback => "yin-fallback",
        }
    }
}

/// The single next expected event, as far as detection is concerned
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Expected<'a> {
    Note(i32),
    Chord(&'a [i32]),
}

/// Result of one fusion pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fusion {
    pub method: DetectionMethod,
    pub result: DetectionResult,
    /// Present for the `fft` method
    pub chord: Option<ChordDetection>,
}

impl Fusion {
    fn plain(method: DetectionMethod, result: DetectionResult) -> Self {
        Self {
            method,
            result,
            chord: None,
        }
    }

    /// Report the expected note's own frequency
    fn expected_note(method: DetectionMethod, pitch: i32, confidence: f32, rms: f32) -> Self {
        Self::plain(
            method,
            DetectionResult {
                frequency: Some(pitch_to_frequency(pitch as f32)),
                confidence,
                rms,
            },
        )
    }
}

/// Everything a rule may look at for one tick
pub struct FusionContext<'a> {
    pub yin: DetectionResult,
    pub expected: Option<Expected<'a>>,
    pub spectrum: &'a SpectralSnapshot,
    pub threshold_db: f32,
    chord_detector: &'a ChordEnergyDetector,
    // Single-note cross-check shared by rules b and c
    note_check: OnceCell<Result<ChordDetection, DetectionError>>,
}

impl<'a> FusionContext<'a> {
    pub fn new(
        yin: DetectionResult,
        expected: Option<Expected<'a>>,
        spectrum: &'a SpectralSnapshot,
        threshold_db: f32,
        chord_detector: &'a ChordEnergyDetector,
    ) -> Self {
        Self {
            yin,
            expected,
            spectrum,
            threshold_db,
            chord_detector,
            note_check: OnceCell::new(),
        }
    }

    /// Spectral check restricted to one expected note (computed at most once)
    fn cross_check_note(&self, pitch: i32) -> &Result<ChordDetection, DetectionError> {
        self.note_check.get_or_init(|| {
            self.chord_detector
                .detect(self.spectrum, &[pitch], self.threshold_db)
        })
    }

    fn cross_check_chord(&self, pitches: &[i32]) -> Result<ChordDetection, DetectionError> {
        self.chord_detector
            .detect(self.spectrum, pitches, self.threshold_db)
    }

    fn degrade(&self, err: &DetectionError, rule: &str) -> Fusion {
        log_detection_error(err, rule);
        Fusion::plain(DetectionMethod::YinFallback, self.yin)
    }
}

/// One entry of the fusion policy
pub trait FusionRule {
    fn name(&self) -> &'static str;

    /// `None` passes the decision to the next rule
    fn apply(&self, ctx: &FusionContext<'_>) -> Option<Fusion>;
}

/// a. Nothing expected: the raw estimate stands
pub struct NoExpectationRule;

impl FusionRule for NoExpectationRule {
    fn name(&self) -> &'static str {
        "no-expectation"
    }

    fn apply(&self, ctx: &FusionContext<'_>) -> Option<Fusion> {
        ctx.expected
            .is_none()
            .then(|| Fusion::plain(DetectionMethod::Yin, ctx.yin))
    }
}

/// b. Expected single note above 300 Hz
pub struct HighRegisterRule;

impl FusionRule for HighRegisterRule {
    fn name(&self) -> &'static str {
        "high-register"
    }

    fn apply(&self, ctx: &FusionContext<'_>) -> Option<Fusion> {
        let Some(Expected::Note(pitch)) = ctx.expected else {
            return None;
        };
        if pitch_to_frequency(pitch as f32) <= HIGH_REGISTER_HZ {
            return None;
        }
        let rms = ctx.yin.rms;

        match ctx.yin.frequency {
            Some(frequency) if frequency < IMPLAUSIBLE_LOW_HZ => {
                match ctx.cross_check_note(pitch) {
                    Ok(check) if check.success => Some(Fusion::expected_note(
                        DetectionMethod::FftFiltered,
                        pitch,
                        FILTERED_CONFIDENCE,
                        rms,
                    )),
                    Ok(_) => Some(Fusion::plain(
                        DetectionMethod::Silence,
                        DetectionResult::silent(rms),
                    )),
                    Err(err) => Some(ctx.degrade(err, self.name())),
                }
            }
            None => self.rescue_weak_read(ctx, pitch),
            Some(_) if ctx.yin.confidence < HIGH_REGISTER_MIN_CONFIDENCE => {
                self.rescue_weak_read(ctx, pitch)
            }
            Some(_) => None,
        }
    }
}

impl HighRegisterRule {
    fn rescue_weak_read(&self, ctx: &FusionContext<'_>, pitch: i32) -> Option<Fusion> {
        match ctx.cross_check_note(pitch) {
            Ok(check) if check.success => Some(Fusion::expected_note(
                DetectionMethod::FftHighNote,
                pitch,
                HIGH_NOTE_CONFIDENCE,
                ctx.yin.rms,
            )),
            Ok(_) => None,
            Err(err) => Some(ctx.degrade(err, self.name())),
        }
    }
}

/// c. Expected single note with a doubtful read
pub struct NoteOverrideRule;

impl FusionRule for NoteOverrideRule {
    fn name(&self) -> &'static str {
        "note-override"
    }

    fn apply(&self, ctx: &FusionContext<'_>) -> Option<Fusion> {
        let Some(Expected::Note(pitch)) = ctx.expected else {
            return None;
        };

        let doubtful = match ctx.yin.frequency {
            None => true,
            Some(_) if ctx.yin.confidence < NOTE_MIN_CONFIDENCE => true,
            Some(frequency) => {
                (frequency_to_pitch(frequency) - pitch as f32).abs() > MAX_PITCH_DISTANCE
            }
        };
        if !doubtful {
            return None;
        }

        match ctx.cross_check_note(pitch) {
            Ok(check) if check.success => Some(Fusion::expected_note(
                DetectionMethod::FftOverride,
                pitch,
                OVERRIDE_CONFIDENCE,
                ctx.yin.rms,
            )),
            Ok(_) => None,
            Err(err) => Some(ctx.degrade(err, self.name())),
        }
    }
}

/// d. Expected chord of more than one note: always spectral
pub struct ChordRule;

impl FusionRule for ChordRule {
    fn name(&self) -> &'static str {
        "chord"
    }

    fn apply(&self, ctx: &FusionContext<'_>) -> Option<Fusion> {
        let Some(Expected::Chord(pitches)) = ctx.expected else {
            return None;
        };
        if pitches.len() <= 1 {
            return None;
        }

        match ctx.cross_check_chord(pitches) {
            Ok(check) => Some(Fusion {
                method: DetectionMethod::Fft,
                result: DetectionResult {
                    frequency: None,
                    confidence: check.confidence,
                    rms: ctx.yin.rms,
                },
                chord: Some(check),
            }),
            Err(err) => Some(ctx.degrade(&err, self.name())),
        }
    }
}

/// e. Fallthrough: the raw estimate stands
pub struct RawYinRule;

impl FusionRule for RawYinRule {
    fn name(&self) -> &'static str {
        "raw-yin"
    }

    fn apply(&self, ctx: &FusionContext<'_>) -> Option<Fusion> {
        Some(Fusion::plain(DetectionMethod::Yin, ctx.yin))
    }
}

/// The default rule table, in priority order
pub fn default_rules() -> Vec<Box<dyn FusionRule>> {
    vec![
        Box::new(NoExpectationRule),
        Box::new(HighRegisterRule),
        Box::new(NoteOverrideRule),
        Box::new(ChordRule),
        Box::new(RawYinRule),
    ]
}

/// Time-domain estimator + spectral detector + fusion policy
pub struct HybridDetector {
    estimator: PitchEstimator,
    chord_detector: ChordEnergyDetector,
    rules: Vec<Box<dyn FusionRule>>,
}

impl HybridDetector {
    pub fn new(config: &DetectionConfig) -> Self {
        Self::with_rules(config, default_rules())
    }

    pub fn with_rules(config: &DetectionConfig, rules: Vec<Box<dyn FusionRule>>) -> Self {
        Self {
            estimator: PitchEstimator::new(config),
            chord_detector: ChordEnergyDetector::new(config.energy_margin_db),
            rules,
        }
    }

    pub fn rule_names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|rule| rule.name()).collect()
    }

    pub fn chord_detector(&self) -> &ChordEnergyDetector {
        &self.chord_detector
    }

    /// Run one detection pass
    ///
    /// # Arguments
    /// * `frame` - Time-domain samples for this tick
    /// * `spectrum` - dB snapshot for this tick
    /// * `expected` - The next expected event, if any
    /// * `threshold_db` - Current calibration energy threshold
    pub fn detect(
        &mut self,
        frame: &AudioFrame,
        spectrum: &SpectralSnapshot,
        expected: Option<Expected<'_>>,
        threshold_db: f32,
    ) -> Fusion {
        let yin = self.estimator.estimate(frame);
        let ctx = FusionContext::new(yin, expected, spectrum, threshold_db, &self.chord_detector);

        for rule in &self.rules {
            if let Some(fusion) = rule.apply(&ctx) {
                tracing::trace!(
                    "[HybridDetector] rule {} -> {} ({:?} Hz, confidence {:.2})",
                    rule.name(),
                    fusion.method.label(),
                    fusion.result.frequency,
                    fusion.result.confidence
                );
                return fusion;
            }
        }

        // Only reachable with a custom table lacking a fallthrough rule
        Fusion::plain(DetectionMethod::Yin, yin)
    }
}
