//! Fixture utilities for the offline practice harness.
//!
//! This module loads exercise JSON and PCM WAV audio, runs recorded (or
//! synthesised) audio through a `PracticeSession` tick by tick, and compares
//! the resulting summary against optional expectations. It is the desktop
//! counterpart of a live audio host and exists for CI and QA workflows.

pub mod synth;

use std::fs;
use std::path::Path;
use std::sync::{Arc, RwLock};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::analysis::hybrid::{DetectionMethod, Expected, HybridDetector};
use crate::analysis::signal::{frequency_to_pitch, pitch_name, rms};
use crate::analysis::spectrum::SpectrumAnalyzer;
use crate::analysis::types::AudioFrame;
use crate::calibration::{
    CalibrationState, StringCapture, StringCaptureAccumulator, ThresholdProvider,
};
use crate::config::AppConfig;
use crate::error::CalibrationError;
use crate::session::{
    EventKind, MusicalEvent, PracticeSession, SessionSummary, Timeline, Verdict,
};

/// One event as written in exercise JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ExerciseEvent {
    Note { beat: f64, pitch: i32 },
    Chord { beat: f64, notes: Vec<i32> },
}

impl ExerciseEvent {
    pub fn beat(&self) -> f64 {
        match self {
            ExerciseEvent::Note { beat, .. } | ExerciseEvent::Chord { beat, .. } => *beat,
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            ExerciseEvent::Note { pitch, .. } => EventKind::Note { pitch: *pitch },
            ExerciseEvent::Chord { notes, .. } => EventKind::Chord {
                notes: notes.clone(),
            },
        }
    }
}

/// Exercise fixture: tempo, events and optional expectations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exercise {
    pub name: String,
    pub bpm: f64,
    pub events: Vec<ExerciseEvent>,
    #[serde(default)]
    pub expectations: Option<FixtureExpectations>,
}

impl Exercise {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)
            .with_context(|| format!("reading exercise {}", path.display()))?;
        serde_json::from_str(&json).with_context(|| format!("parsing {}", path.display()))
    }

    /// Build the judged timeline (events must already be in beat order).
    pub fn timeline(&self) -> Result<Timeline> {
        let events = self
            .events
            .iter()
            .map(|event| MusicalEvent::new(event.beat(), event.kind()))
            .collect();
        Timeline::new(events).with_context(|| format!("exercise '{}'", self.name))
    }
}

/// Summary bounds a fixture run must respect.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FixtureExpectations {
    #[serde(default)]
    pub hits_min: Option<u32>,
    #[serde(default)]
    pub misses_max: Option<u32>,
    #[serde(default)]
    pub skips_max: Option<u32>,
}

impl FixtureExpectations {
    pub fn verify(&self, summary: &SessionSummary) -> std::result::Result<(), ExpectationDiff> {
        let mut failures = Vec::new();

        if let Some(min) = self.hits_min {
            if summary.hits < min {
                failures.push(ExpectationFailure {
                    field: "hits".to_string(),
                    bound: Bound::AtLeast(min),
                    actual: summary.hits,
                });
            }
        }
        for (field, max, actual) in [
            ("misses", self.misses_max, summary.misses),
            ("skips", self.skips_max, summary.skips),
        ] {
            if let Some(max) = max {
                if actual > max {
                    failures.push(ExpectationFailure {
                        field: field.to_string(),
                        bound: Bound::AtMost(max),
                        actual,
                    });
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(ExpectationDiff { failures })
        }
    }
}

/// Outcome of comparing a summary with expectations.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpectationDiff {
    pub failures: Vec<ExpectationFailure>,
}

impl ExpectationDiff {
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "failures": self.failures.iter().map(|failure| {
                let (kind, limit) = match failure.bound {
                    Bound::AtLeast(limit) => ("at_least", limit),
                    Bound::AtMost(limit) => ("at_most", limit),
                };
                serde_json::json!({
                    "field": failure.field,
                    "expected": { kind: limit },
                    "actual": failure.actual,
                })
            }).collect::<Vec<_>>()
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bound {
    AtLeast(u32),
    AtMost(u32),
}

/// Detailed diff entry for a single violated bound.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpectationFailure {
    pub field: String,
    pub bound: Bound,
    pub actual: u32,
}

/// A verdict together with the host time of its tick.
#[derive(Debug, Clone, Serialize)]
pub struct TimedVerdict {
    pub time: f64,
    pub beat: f64,
    pub method: Option<DetectionMethod>,
    pub verdict: Verdict,
}

/// Result of one offline session run.
#[derive(Debug, Clone, Serialize)]
pub struct FixtureReport {
    pub exercise: String,
    pub ticks: usize,
    pub verdicts: Vec<TimedVerdict>,
    pub summary: SessionSummary,
}

/// Per-tick detection line emitted by `FixtureRunner::detect`.
#[derive(Debug, Clone, Serialize)]
pub struct DetectionLine {
    pub time: f64,
    pub method: DetectionMethod,
    pub frequency: Option<f32>,
    pub note: Option<String>,
    pub confidence: f32,
    pub rms: f32,
}

/// Drives decoded PCM audio through the practice pipeline.
pub struct FixtureRunner {
    config: AppConfig,
    calibration: Arc<RwLock<CalibrationState>>,
}

impl FixtureRunner {
    pub fn new(config: AppConfig, calibration: Arc<RwLock<CalibrationState>>) -> Self {
        Self {
            config,
            calibration,
        }
    }

    pub fn with_default_calibration(config: AppConfig) -> Self {
        let calibration = CalibrationState::from_config(&config.calibration);
        Self::new(config, Arc::new(RwLock::new(calibration)))
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Play `samples` against `exercise`, one tick per `1 / tick_hz` seconds.
    ///
    /// Sample 0 is beat 0, so the configured count-in is ignored. The run
    /// ends when the audio runs out or the session signals stop-ready,
    /// whichever comes first.
    pub fn run(&self, exercise: &Exercise, samples: &[f32], sample_rate: u32) -> Result<FixtureReport> {
        let mut config = self.config.clone();
        config.judging.count_in_beats = 0.0;
        let mut session = PracticeSession::new(
            config,
            exercise.timeline()?,
            exercise.bpm,
            Arc::clone(&self.calibration),
        )
        .with_context(|| format!("creating session for '{}'", exercise.name))?;
        let mut framer = Framer::new(&self.config, samples, sample_rate)?;

        session.start(0.0)?;
        let mut verdicts = Vec::new();
        let mut ticks = 0usize;

        while let Some((now, frame)) = framer.next_frame() {
            let spectrum = framer.analyzer.analyze(&frame);
            let report = session.tick(now, &frame, &spectrum)?;
            ticks += 1;

            if let Some(verdict) = report.verdict {
                verdicts.push(TimedVerdict {
                    time: now,
                    beat: report.beat,
                    method: report.method,
                    verdict,
                });
            }
            if report.stop_ready {
                break;
            }
        }

        let summary = session.stop();
        tracing::info!(
            "[FixtureRunner] {}: {} ticks, {}/{} hits",
            exercise.name,
            ticks,
            summary.hits,
            summary.total
        );

        Ok(FixtureReport {
            exercise: exercise.name.clone(),
            ticks,
            verdicts,
            summary,
        })
    }

    /// Run detection only, optionally against a single expected note.
    pub fn detect(
        &self,
        samples: &[f32],
        sample_rate: u32,
        expected_pitch: Option<i32>,
    ) -> Result<Vec<DetectionLine>> {
        let mut detector = HybridDetector::new(&self.config.detection);
        let mut framer = Framer::new(&self.config, samples, sample_rate)?;
        let threshold_db = self
            .calibration
            .read()
            .map_err(|_| CalibrationError::StatePoisoned)?
            .energy_threshold();
        let expected = expected_pitch.map(Expected::Note);

        let mut lines = Vec::new();
        while let Some((now, frame)) = framer.next_frame() {
            let spectrum = framer.analyzer.analyze(&frame);
            let fusion = detector.detect(&frame, &spectrum, expected, threshold_db);
            lines.push(DetectionLine {
                time: now,
                method: fusion.method,
                frequency: fusion.result.frequency,
                note: fusion
                    .result
                    .frequency
                    .map(|f| pitch_name(frequency_to_pitch(f).round() as i32)),
                confidence: fusion.result.confidence,
                rms: fusion.result.rms,
            });
        }
        Ok(lines)
    }

    /// Fold a recording of one ringing open string into a capture.
    pub fn capture_string(&self, samples: &[f32], sample_rate: u32) -> Result<StringCapture> {
        let mut framer = Framer::new(&self.config, samples, sample_rate)?;
        let mut accumulator = StringCaptureAccumulator::new();

        while let Some((_, frame)) = framer.next_frame() {
            let spectrum = framer.analyzer.analyze(&frame);
            accumulator.push(rms(&frame.samples), spectrum.max_db());
        }
        Ok(accumulator.finish()?)
    }
}

/// Slices a sample buffer into trailing analysis frames at the tick rate.
struct Framer<'a> {
    samples: &'a [f32],
    sample_rate: u32,
    frame_size: usize,
    tick_period: f64,
    tick: usize,
    analyzer: SpectrumAnalyzer,
}

impl<'a> Framer<'a> {
    fn new(config: &AppConfig, samples: &'a [f32], sample_rate: u32) -> Result<Self> {
        if sample_rate == 0 {
            return Err(anyhow!("sample rate must be positive"));
        }
        if samples.is_empty() {
            return Err(anyhow!("no audio samples to analyze"));
        }
        if config.audio.tick_hz == 0 || config.audio.frame_size == 0 {
            return Err(anyhow!(
                "tick rate ({}) and frame size ({}) must be positive",
                config.audio.tick_hz,
                config.audio.frame_size
            ));
        }
        Ok(Self {
            samples,
            sample_rate,
            frame_size: config.audio.frame_size,
            tick_period: 1.0 / config.audio.tick_hz as f64,
            tick: 0,
            analyzer: SpectrumAnalyzer::new(config.audio.frame_size),
        })
    }

    /// Host time and the `frame_size` samples ending at it (zero padded at
    /// the start of the recording).
    fn next_frame(&mut self) -> Option<(f64, AudioFrame)> {
        let now = self.tick as f64 * self.tick_period;
        let end = (now * self.sample_rate as f64).round() as usize;
        if end > self.samples.len() {
            return None;
        }
        self.tick += 1;

        let start = end.saturating_sub(self.frame_size);
        let mut frame = vec![0.0f32; self.frame_size - (end - start)];
        frame.extend_from_slice(&self.samples[start..end]);
        Some((now, AudioFrame::new(frame, self.sample_rate)))
    }
}

/// Decode a WAV file to mono `f32` samples.
///
/// Multi-channel audio is downmixed by averaging; integer PCM is normalised
/// to [-1, 1].
pub fn read_wav<P: AsRef<Path>>(path: P) -> Result<(Vec<f32>, u32)> {
    let path = path.as_ref();
    let mut reader =
        hound::WavReader::open(path).with_context(|| format!("opening {}", path.display()))?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let interleaved = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .map(|sample| sample.map_err(|err| anyhow!(err)))
            .collect::<Result<Vec<f32>>>()?,
        hound::SampleFormat::Int => {
            let max = ((1i64 << (spec.bits_per_sample - 1)) - 1) as f32;
            match spec.bits_per_sample {
                8 | 16 | 24 | 32 => reader
                    .samples::<i32>()
                    .map(|sample| {
                        sample
                            .map(|value| value as f32 / max)
                            .map_err(|err| anyhow!(err))
                    })
                    .collect::<Result<Vec<f32>>>()?,
                other => {
                    return Err(anyhow!(
                        "Unsupported bits per sample {} in {}",
                        other,
                        path.display()
                    ))
                }
            }
        }
    };

    let samples = if channels == 1 {
        interleaved
    } else {
        interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    };

    Ok((samples, spec.sample_rate))
}

/// Write mono 16-bit PCM.
pub fn write_wav<P: AsRef<Path>>(path: P, samples: &[f32], sample_rate: u32) -> Result<()> {
    let path = path.as_ref();
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)
        .with_context(|| format!("creating {}", path.display()))?;
    for &sample in samples {
        let value = (sample.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16;
        writer.write_sample(value)?;
    }
    writer
        .finalize()
        .with_context(|| format!("finalizing {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::HardwareCalibration;
    use synth::{render_exercise, sine, RenderOptions};

    fn scale_exercise() -> Exercise {
        serde_json::from_str(
            r#"{
                "name": "a minor walk",
                "bpm": 120,
                "events": [
                    {"type": "note", "beat": 1, "pitch": 57},
                    {"type": "note", "beat": 2, "pitch": 60},
                    {"type": "note", "beat": 3, "pitch": 64},
                    {"type": "chord", "beat": 4, "notes": [45, 52, 57]}
                ],
                "expectations": {"hits_min": 4, "misses_max": 0}
            }"#,
        )
        .unwrap()
    }

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("fretboard_trainer_{}_{}", std::process::id(), name))
    }

    #[test]
    fn test_exercise_json() {
        let exercise = scale_exercise();
        assert_eq!(exercise.events.len(), 4);
        assert_eq!(
            exercise.events[3].kind(),
            EventKind::Chord {
                notes: vec![45, 52, 57]
            }
        );
        let timeline = exercise.timeline().unwrap();
        assert_eq!(timeline.len(), 4);
        assert_eq!(exercise.expectations.as_ref().unwrap().hits_min, Some(4));
    }

    #[test]
    fn test_unsorted_exercise_rejected() {
        let mut exercise = scale_exercise();
        exercise.events.swap(0, 1);
        assert!(exercise.timeline().is_err());
    }

    #[test]
    fn test_expectation_diff() {
        let expectations = FixtureExpectations {
            hits_min: Some(4),
            misses_max: Some(0),
            skips_max: None,
        };
        let summary = SessionSummary {
            bpm: 120,
            hits: 3,
            misses: 1,
            skips: 0,
            total: 4,
            accuracy_percent: 75,
        };

        let diff = expectations.verify(&summary).unwrap_err();
        assert_eq!(diff.failures.len(), 2);
        assert_eq!(diff.failures[0].bound, Bound::AtLeast(4));
        let json = diff.to_json();
        assert_eq!(json["failures"][1]["field"], "misses");
        assert_eq!(json["failures"][1]["expected"]["at_most"], 0);

        let perfect = SessionSummary {
            hits: 4,
            misses: 0,
            accuracy_percent: 100,
            ..summary
        };
        assert!(expectations.verify(&perfect).is_ok());
    }

    #[test]
    fn test_rendered_exercise_is_all_hits() {
        let exercise = scale_exercise();
        let samples = render_exercise(&exercise, &RenderOptions::default());
        let runner = FixtureRunner::with_default_calibration(AppConfig::default());

        let report = runner.run(&exercise, &samples, 44_100).unwrap();
        assert_eq!(report.summary.hits, 4, "report: {:?}", report);
        assert_eq!(report.summary.accuracy_percent, 100);
        assert!(report.verdicts.iter().any(|v| v.method == Some(DetectionMethod::Fft)));
        assert!(exercise
            .expectations
            .as_ref()
            .unwrap()
            .verify(&report.summary)
            .is_ok());
    }

    #[test]
    fn test_silent_recording_skips_everything() {
        let exercise = scale_exercise();
        let samples = vec![0.0f32; 44_100 * 5];
        let runner = FixtureRunner::with_default_calibration(AppConfig::default());

        let report = runner.run(&exercise, &samples, 44_100).unwrap();
        assert_eq!(report.summary.skips, 4);
        assert_eq!(report.summary.hits, 0);
        assert!(report.verdicts.is_empty());
    }

    #[test]
    fn test_detect_lines() {
        let samples = sine(220.0, 0.3, 0.5, 44_100);
        let runner = FixtureRunner::with_default_calibration(AppConfig::default());

        let lines = runner.detect(&samples, 44_100, None).unwrap();
        assert_eq!(lines.len(), 31);
        let last = lines.last().unwrap();
        assert_eq!(last.method, DetectionMethod::Yin);
        assert_eq!(last.note.as_deref(), Some("A3"));
    }

    #[test]
    fn test_capture_strings_into_hardware_calibration() {
        let runner = FixtureRunner::with_default_calibration(AppConfig::default());
        let captures: Vec<StringCapture> = crate::analysis::signal::STANDARD_TUNING
            .iter()
            .map(|&pitch| {
                let frequency = crate::analysis::signal::pitch_to_frequency(pitch as f32);
                runner
                    .capture_string(&sine(frequency, 0.3, 0.5, 44_100), 44_100)
                    .unwrap()
            })
            .collect();

        let calibration = HardwareCalibration::from_captures(&captures, 15.0).unwrap();
        assert!(calibration.average_signal_db > -40.0);
        assert!(calibration.optimal_threshold_db < calibration.average_signal_db);

        assert!(runner.capture_string(&[], 44_100).is_err());
    }

    #[test]
    fn test_wav_roundtrip() {
        let path = temp_path("roundtrip.wav");
        let samples = sine(440.0, 0.5, 0.1, 22_050);
        write_wav(&path, &samples, 22_050).unwrap();

        let (decoded, sample_rate) = read_wav(&path).unwrap();
        assert_eq!(sample_rate, 22_050);
        assert_eq!(decoded.len(), samples.len());
        let max_error = samples
            .iter()
            .zip(&decoded)
            .map(|(a, b)| (a - b).abs())
            .fold(0.0f32, f32::max);
        assert!(max_error < 1e-3);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_stereo_wav_is_downmixed() {
        let path = temp_path("stereo.wav");
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 8_000,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for _ in 0..100 {
            writer.write_sample(0.5f32).unwrap();
            writer.write_sample(-0.1f32).unwrap();
        }
        writer.finalize().unwrap();

        let (decoded, _) = read_wav(&path).unwrap();
        assert_eq!(decoded.len(), 100);
        assert!(decoded.iter().all(|&s| (s - 0.2).abs() < 1e-6));
        let _ = fs::remove_file(&path);
    }
}
