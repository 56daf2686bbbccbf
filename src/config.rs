//! Configuration management for dynamic parameter tuning
//!
//! This module provides runtime configuration loading from JSON files,
//! enabling fast iteration without recompilation. Detection floors, judging
//! windows, calibration defaults and the offline audio framing can all be
//! adjusted via the config file.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Complete application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub judging: JudgingConfig,
    #[serde(default)]
    pub calibration: CalibrationConfig,
    #[serde(default)]
    pub audio: AudioConfig,
}

/// Pitch and chord detection parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    /// Frames with RMS below this floor are treated as silence
    pub silence_floor_rms: f32,
    /// Absolute CMNDF threshold for the periodicity search
    pub yin_threshold: f32,
    /// Lowest detectable fundamental in Hz
    pub min_frequency_hz: f32,
    /// Highest detectable fundamental in Hz
    pub max_frequency_hz: f32,
    /// Margin subtracted from the calibration threshold before bin comparison
    pub energy_margin_db: f32,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            silence_floor_rms: 0.0005,
            yin_threshold: 0.20,
            min_frequency_hz: 50.0,
            max_frequency_hz: 1000.0,
            energy_margin_db: 12.0,
        }
    }
}

/// Timeline judging and trigger gating parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgingConfig {
    /// Upper bound on the spacing between accepted note triggers
    pub cooldown_seconds: f64,
    /// Consecutive ticks a rounded pitch must persist before it triggers
    pub stable_frames: u32,
    /// How early (seconds) a detection may land before its event
    pub early_window_seconds: f64,
    /// How far ahead of the current beat the expected event is searched
    pub lookahead_beats: f64,
    /// Lead-in inserted before the loop start in wait mode
    pub lead_in_beats: f64,
    /// Grace period after the last judged event before stop is signalled
    pub completion_grace_beats: f64,
    /// RMS above which a frame counts as an onset
    pub onset_rms: f32,
    /// Count-in beats before beat 0 when a session starts
    pub count_in_beats: f64,
}

impl Default for JudgingConfig {
    fn default() -> Self {
        Self {
            cooldown_seconds: 0.25,
            stable_frames: 2,
            early_window_seconds: 0.25,
            lookahead_beats: 4.0,
            lead_in_beats: 4.0,
            completion_grace_beats: 4.0,
            onset_rms: 0.004,
            count_in_beats: 0.0,
        }
    }
}

/// Calibration threshold defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationConfig {
    /// Manual energy threshold used until a calibration takes over (dB)
    pub default_threshold_db: f32,
    /// Whether the adaptive noise-floor tracker runs during practice
    pub adaptive_enabled: bool,
    /// Active ticks required before the adaptive threshold is trusted
    pub min_active_samples: u32,
    /// Distance below the mean string peak for hardware calibration (dB)
    pub hardware_margin_db: f32,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            default_threshold_db: -40.0,
            adaptive_enabled: true,
            min_active_samples: 100,
            hardware_margin_db: 15.0,
        }
    }
}

/// Offline audio framing used by the fixture harness
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Sample rate assumed for synthesised fixtures
    pub sample_rate: u32,
    /// Size of each analysis frame in samples
    pub frame_size: usize,
    /// Tick rate of the judging loop
    pub tick_hz: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            frame_size: 2048,
            tick_hz: 60,
        }
    }
}

impl AppConfig {
    /// Load configuration from JSON file
    ///
    /// # Arguments
    /// * `path` - Path to JSON config file
    ///
    /// # Returns
    /// The loaded configuration, or the defaults when the file is missing or
    /// its JSON is invalid.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Self {
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    log::info!("[Config] Loaded configuration from {:?}", path.as_ref());
                    config
                }
                Err(err) => {
                    log::warn!(
                        "[Config] Failed to parse JSON from {:?}: {}. Using defaults.",
                        path.as_ref(),
                        err
                    );
                    Self::default()
                }
            },
            Err(err) => {
                log::warn!(
                    "[Config] Failed to read config file {:?}: {}. Using defaults.",
                    path.as_ref(),
                    err
                );
                Self::default()
            }
        }
    }

    /// Load configuration from the default asset location
    pub fn load() -> Self {
        Self::load_from_file("assets/trainer_config.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.detection.silence_floor_rms, 0.0005);
        assert_eq!(config.detection.yin_threshold, 0.20);
        assert_eq!(config.judging.stable_frames, 2);
        assert_eq!(config.calibration.default_threshold_db, -40.0);
        assert_eq!(config.audio.frame_size, 2048);
    }

    #[test]
    fn test_json_roundtrip() {
        let config = AppConfig::default();
        let json = serde_json::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = serde_json::from_str(&json).unwrap();

        assert_eq!(
            parsed.judging.cooldown_seconds,
            config.judging.cooldown_seconds
        );
        assert_eq!(
            parsed.detection.energy_margin_db,
            config.detection.energy_margin_db
        );
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let parsed: AppConfig =
            serde_json::from_str(r#"{"audio": {"sample_rate": 48000, "frame_size": 4096, "tick_hz": 60}}"#)
                .unwrap();
        assert_eq!(parsed.audio.sample_rate, 48000);
        assert_eq!(parsed.judging.lead_in_beats, 4.0);
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = AppConfig::load_from_file("does/not/exist.json");
        assert_eq!(config.audio.tick_hz, 60);
    }
}
