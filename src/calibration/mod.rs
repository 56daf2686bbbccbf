// Calibration module - energy threshold resolution
//
// The chord energy detector compares spectral bins against a dB threshold
// that is refreshed from outside the tick loop:
// 1. Hardware calibration: captures of each open string, finalized once
// 2. Adaptive calibration: EMA tracking of noise floor and signal peak
// 3. Manual threshold as the fallback
//
// The session shares a `CalibrationState` behind an `Arc<RwLock<_>>` and
// never blocks on it.

pub mod state;

pub use state::{
    AdaptiveCalibration, CalibrationState, HardwareCalibration, StringCapture,
    StringCaptureAccumulator, ThresholdProvider, ThresholdSource,
};
