// Analysis module - per-tick pitch and chord detection
//
// Each tick the session hands a time-domain frame and a dB snapshot to the
// hybrid detector and receives one fused reading back.
//
// Pipeline:
// - PitchEstimator: monophonic YIN-style estimate from the time-domain frame
// - ChordEnergyDetector: energy check for a known pitch set in the snapshot
// - HybridDetector: ordered rule table choosing between the two
//
// Nothing in here keeps state between ticks apart from scratch buffers, and
// no detector failure leaves this module as a panic.

pub mod chord;
pub mod hybrid;
pub mod pitch;
pub mod signal;
pub mod spectrum;
pub mod types;

pub use chord::{majority_threshold, ChordDetection, ChordEnergyDetector, NoteEnergy};
pub use hybrid::{DetectionMethod, Expected, Fusion, FusionContext, FusionRule, HybridDetector};
pub use pitch::PitchEstimator;
pub use spectrum::SpectrumAnalyzer;
pub use types::{AudioFrame, DetectionResult, SpectralSnapshot};
