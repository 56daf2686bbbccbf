// Error types for the fretboard trainer core
//
// This module defines the error enums for calibration, detection and session
// operations. Each enum carries a numeric code (see `ErrorCode`) so callers
// rendering feedback can react programmatically.

use std::fmt;

use tracing::error;

/// Error codes for structured error reporting
///
/// This trait provides a standard way to get error codes and messages
/// from custom error types.
pub trait ErrorCode {
    /// Get the numeric error code
    fn code(&self) -> i32;

    /// Get the human-readable error message
    fn message(&self) -> String;
}

/// Log a detection error with structured context
///
/// Detection errors never propagate past one tick, so this is usually the
/// only trace they leave.
pub fn log_detection_error(err: &DetectionError, context: &str) {
    error!(
        "Detection error in {}: code={}, component=HybridDetector, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Log a session error with structured context
pub fn log_session_error(err: &SessionError, context: &str) {
    error!(
        "Session error in {}: code={}, component=PracticeSession, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Log a calibration error with structured context
pub fn log_calibration_error(err: &CalibrationError, context: &str) {
    error!(
        "Calibration error in {}: code={}, component=Calibration, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Calibration-related errors
///
/// Error code range: 2001-2004
#[derive(Debug, Clone, PartialEq)]
pub enum CalibrationError {
    /// Not every open string has been captured
    InsufficientSamples { required: usize, collected: usize },

    /// A string capture holds non-finite or out-of-range values
    InvalidCapture { reason: String },

    /// A manually supplied threshold is not a usable dB value
    ThresholdOutOfRange { threshold_db: f32 },

    /// Calibration state RwLock was poisoned
    StatePoisoned,
}

impl ErrorCode for CalibrationError {
    fn code(&self) -> i32 {
        match self {
            CalibrationError::InsufficientSamples { .. } => 2001,
            CalibrationError::InvalidCapture { .. } => 2002,
            CalibrationError::ThresholdOutOfRange { .. } => 2003,
            CalibrationError::StatePoisoned => 2004,
        }
    }

    fn message(&self) -> String {
        match self {
            CalibrationError::InsufficientSamples {
                required,
                collected,
            } => {
                format!(
                    "Insufficient string captures: need {}, got {}",
                    required, collected
                )
            }
            CalibrationError::InvalidCapture { reason } => {
                format!("Invalid capture: {}", reason)
            }
            CalibrationError::ThresholdOutOfRange { threshold_db } => {
                format!("Threshold {} dB is outside [-160, 0]", threshold_db)
            }
            CalibrationError::StatePoisoned => "Calibration state lock poisoned".to_string(),
        }
    }
}

impl fmt::Display for CalibrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CalibrationError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for CalibrationError {}

/// Detection faults
///
/// None of these reach the caller of a tick: the hybrid detector degrades to
/// the time-domain estimate instead.
///
/// Error code range: 3001-3003
#[derive(Debug, Clone, PartialEq)]
pub enum DetectionError {
    /// Chord detection was asked for an empty target set
    InvalidTargetSet,

    /// Spectral snapshot is unusable (no bins, bad bin width)
    MalformedSpectrum { reason: String },

    /// Audio frame is unusable (bad sample rate)
    InvalidFrame { reason: String },
}

impl ErrorCode for DetectionError {
    fn code(&self) -> i32 {
        match self {
            DetectionError::InvalidTargetSet => 3001,
            DetectionError::MalformedSpectrum { .. } => 3002,
            DetectionError::InvalidFrame { .. } => 3003,
        }
    }

    fn message(&self) -> String {
        match self {
            DetectionError::InvalidTargetSet => "Target pitch set is empty".to_string(),
            DetectionError::MalformedSpectrum { reason } => {
                format!("Malformed spectral snapshot: {}", reason)
            }
            DetectionError::InvalidFrame { reason } => format!("Invalid audio frame: {}", reason),
        }
    }
}

impl fmt::Display for DetectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DetectionError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for DetectionError {}

/// Session and judging errors
///
/// Error code range: 4001-4006
#[derive(Debug, Clone, PartialEq)]
pub enum SessionError {
    /// BPM value is invalid (must be > 0)
    BpmInvalid { bpm: f64 },

    /// Session is already running
    AlreadyRunning,

    /// Session is not running
    NotRunning,

    /// Event beats must be non-decreasing
    UnsortedTimeline { index: usize },

    /// Loop region must satisfy start < end
    InvalidLoop { start: f64, end: f64 },

    /// Detected frequency is not a positive finite value
    InvalidFrequency { frequency: f32 },
}

impl ErrorCode for SessionError {
    fn code(&self) -> i32 {
        match self {
            SessionError::BpmInvalid { .. } => 4001,
            SessionError::AlreadyRunning => 4002,
            SessionError::NotRunning => 4003,
            SessionError::UnsortedTimeline { .. } => 4004,
            SessionError::InvalidLoop { .. } => 4005,
            SessionError::InvalidFrequency { .. } => 4006,
        }
    }

    fn message(&self) -> String {
        match self {
            SessionError::BpmInvalid { bpm } => {
                format!("BPM must be greater than 0 (got {})", bpm)
            }
            SessionError::AlreadyRunning => {
                "Session already running. Call stop() first.".to_string()
            }
            SessionError::NotRunning => "Session not running. Call start() first.".to_string(),
            SessionError::UnsortedTimeline { index } => {
                format!("Event {} is earlier than the event before it", index)
            }
            SessionError::InvalidLoop { start, end } => {
                format!("Loop start {} must be before loop end {}", start, end)
            }
            SessionError::InvalidFrequency { frequency } => {
                format!("Frequency must be positive and finite (got {})", frequency)
            }
        }
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SessionError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for SessionError {}
