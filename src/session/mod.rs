// Session module - tick-driven practice session
//
// A `PracticeSession` owns the timeline (through the `Judge`), the clock and
// the hybrid detector. The host calls `tick(now, frame, spectrum)` about 60
// times a second; nothing in here schedules itself or blocks.
//
// Tick order:
// 1. Loop wrap (reset the loop region, rebase the clock)
// 2. Detection + trigger gating (skipped while input is muted)
// 3. Match attempt on trigger
// 4. Sweep of expired events
// 5. Completion / stop-ready check

pub mod clock;
pub mod judge;
pub mod timeline;

use std::sync::{Arc, RwLock, TryLockError};

use serde::{Deserialize, Serialize};

use crate::analysis::chord::ChordDetection;
use crate::analysis::hybrid::{DetectionMethod, Expected, Fusion, HybridDetector};
use crate::analysis::signal::frequency_to_pitch;
use crate::analysis::types::{AudioFrame, DetectionResult, SpectralSnapshot};
use crate::calibration::{CalibrationState, ThresholdProvider, ThresholdSource};
use crate::config::AppConfig;
use crate::error::{log_calibration_error, log_session_error, CalibrationError, SessionError};

pub use clock::SessionClock;
pub use judge::{JudgedEvent, Judge, LoopMode, LoopRegion, SessionStats, Verdict};
pub use timeline::{EventKind, EventState, HitRecord, MusicalEvent, Timeline};

/// Confidence above which a quiet but steady read may still trigger
const STRONG_SIGNAL_CONFIDENCE: f32 = 0.30;
/// Fraction of a beat used as the trigger cooldown at fast tempos
const COOLDOWN_BEAT_FRACTION: f64 = 0.3;
/// RMS above which an onset tick counts as an active note for calibration
const ACTIVE_NOTE_RMS: f32 = 0.001;
/// Onset when RMS jumps above this multiple of its running average
const ONSET_RATIO: f32 = 1.2;

/// Everything one tick produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickReport {
    /// Beat after any loop rebase
    pub beat: f64,
    /// `None` while input is muted
    pub method: Option<DetectionMethod>,
    pub detection: Option<DetectionResult>,
    pub chord: Option<ChordDetection>,
    pub verdict: Option<Verdict>,
    /// Events that expired on this tick
    pub judged: Vec<JudgedEvent>,
    pub looped: bool,
    pub threshold_db: f32,
    pub complete: bool,
    pub stop_ready: bool,
}

/// Final counts of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub bpm: u32,
    pub hits: u32,
    pub misses: u32,
    pub skips: u32,
    pub total: u32,
    pub accuracy_percent: u32,
}

impl SessionSummary {
    fn from_stats(bpm: f64, stats: SessionStats) -> Self {
        Self {
            bpm: bpm.round() as u32,
            hits: stats.hits,
            misses: stats.misses,
            skips: stats.skips,
            total: stats.total(),
            accuracy_percent: stats.accuracy_percent(),
        }
    }
}

/// Onset and trigger debounce state
#[derive(Debug, Clone, Default)]
struct TriggerGate {
    last_trigger_at: Option<f64>,
    stable_pitch: Option<i32>,
    stable_count: u32,
    rms_average: f32,
}

impl TriggerGate {
    /// Onset test against the running average, then fold `rms` into it
    fn onset(&mut self, rms: f32, onset_rms: f32) -> bool {
        let onset = rms > onset_rms || rms > self.rms_average * ONSET_RATIO;
        self.rms_average = 0.9 * self.rms_average + 0.1 * rms;
        onset
    }

    /// Count consecutive ticks with the same rounded pitch
    fn track_pitch(&mut self, frequency: Option<f32>) -> u32 {
        match frequency {
            Some(frequency) => {
                let rounded = frequency_to_pitch(frequency).round() as i32;
                if self.stable_pitch == Some(rounded) {
                    self.stable_count += 1;
                } else {
                    self.stable_pitch = Some(rounded);
                    self.stable_count = 1;
                }
            }
            None => {
                self.stable_pitch = None;
                self.stable_count = 0;
            }
        }
        self.stable_count
    }

    fn elapsed_since_trigger(&self, now: f64) -> f64 {
        self.last_trigger_at.map_or(f64::INFINITY, |last| now - last)
    }
}

pub struct PracticeSession {
    config: AppConfig,
    judge: Judge,
    clock: SessionClock,
    detector: HybridDetector,
    calibration: Arc<RwLock<CalibrationState>>,
    loop_region: Option<(LoopRegion, LoopMode)>,
    gate: TriggerGate,
    mute_until: f64,
    running: bool,
    completed: bool,
    end_beat: Option<f64>,
    summary: Option<SessionSummary>,
    poison_reported: bool,
}

impl PracticeSession {
    /// Create a stopped session
    ///
    /// # Arguments
    /// * `config` - Detection, judging and calibration parameters
    /// * `timeline` - Exercise events, sorted by beat
    /// * `bpm` - Tempo (must be > 0)
    /// * `calibration` - Threshold state shared with the host
    pub fn new(
        config: AppConfig,
        timeline: Timeline,
        bpm: f64,
        calibration: Arc<RwLock<CalibrationState>>,
    ) -> Result<Self, SessionError> {
        let clock = SessionClock::new(bpm)?;
        let judge = Judge::new(timeline, bpm, &config.judging)?;
        let detector = HybridDetector::new(&config.detection);

        Ok(Self {
            config,
            judge,
            clock,
            detector,
            calibration,
            loop_region: None,
            gate: TriggerGate::default(),
            mute_until: f64::NEG_INFINITY,
            running: false,
            completed: false,
            end_beat: None,
            summary: None,
            poison_reported: false,
        })
    }

    pub fn judge(&self) -> &Judge {
        &self.judge
    }

    pub fn timeline(&self) -> &Timeline {
        self.judge.timeline()
    }

    pub fn stats(&self) -> SessionStats {
        self.judge.stats()
    }

    pub fn calibration(&self) -> Arc<RwLock<CalibrationState>> {
        Arc::clone(&self.calibration)
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_complete(&self) -> bool {
        self.completed
    }

    pub fn beat_at(&self, now: f64) -> f64 {
        self.clock.beat_at(now)
    }

    pub fn loop_region(&self) -> Option<(LoopRegion, LoopMode)> {
        self.loop_region
    }

    /// Begin a fresh attempt at host time `now`
    ///
    /// Clears every event flag, the counters and the trigger state.
    pub fn start(&mut self, now: f64) -> Result<(), SessionError> {
        if self.running {
            let err = SessionError::AlreadyRunning;
            log_session_error(&err, "start");
            return Err(err);
        }

        self.judge.restart();
        self.gate = TriggerGate::default();
        self.mute_until = f64::NEG_INFINITY;
        self.completed = false;
        self.end_beat = None;
        self.summary = None;
        self.clock.start(now, self.config.judging.count_in_beats);
        self.running = true;

        tracing::info!(
            "[PracticeSession] Started: {} events at {} BPM",
            self.judge.timeline().len(),
            self.clock.bpm()
        );
        Ok(())
    }

    /// Enable looping over `[start, end)`
    pub fn set_loop(&mut self, start: f64, end: f64, mode: LoopMode) -> Result<(), SessionError> {
        let region = LoopRegion::new(start, end)?;
        tracing::info!(
            "[PracticeSession] Loop set to [{:.2}, {:.2}) ({:?})",
            start,
            end,
            mode
        );
        self.loop_region = Some((region, mode));
        Ok(())
    }

    pub fn clear_loop(&mut self) {
        self.loop_region = None;
    }

    /// Ignore input until host time `until` (metronome clicks)
    pub fn mute_input_until(&mut self, until: f64) {
        self.mute_until = self.mute_until.max(until);
    }

    /// Advance the session by one tick
    ///
    /// # Returns
    /// * `Ok(TickReport)` - What was detected and judged on this tick
    /// * `Err(SessionError::NotRunning)` - `start()` was not called, or the
    ///   session was stopped
    pub fn tick(
        &mut self,
        now: f64,
        frame: &AudioFrame,
        spectrum: &SpectralSnapshot,
    ) -> Result<TickReport, SessionError> {
        if !self.running {
            return Err(SessionError::NotRunning);
        }

        let mut beat = self.clock.beat_at(now);
        let looped = self.wrap_loop(&mut beat, now);
        let threshold_db = self.current_threshold();

        let mut report = TickReport {
            beat,
            method: None,
            detection: None,
            chord: None,
            verdict: None,
            judged: Vec::new(),
            looped,
            threshold_db,
            complete: self.completed,
            stop_ready: false,
        };

        if now >= self.mute_until {
            let fusion = self.detect(beat, frame, spectrum, threshold_db);
            let onset = self
                .gate
                .onset(fusion.result.rms, self.config.judging.onset_rms);
            self.observe_calibration(spectrum.max_db(), onset && fusion.result.rms > ACTIVE_NOTE_RMS);

            report.verdict = self.trigger(now, beat, &fusion, onset);
            report.method = Some(fusion.method);
            report.detection = Some(fusion.result);
            report.chord = fusion.chord;
        }

        report.judged = self.judge.sweep(beat);
        self.check_completion(beat);
        report.complete = self.completed;
        report.stop_ready = self.end_beat.is_some_and(|end| beat >= end);

        Ok(report)
    }

    /// Stop the session and return its summary
    ///
    /// Idempotent: later calls return the summary computed by the first one.
    pub fn stop(&mut self) -> SessionSummary {
        if let Some(summary) = self.summary {
            return summary;
        }

        self.running = false;
        let summary = SessionSummary::from_stats(self.clock.bpm(), self.judge.stats());
        tracing::info!(
            "[PracticeSession] Stopped: {} hits, {} misses, {} skips ({}%)",
            summary.hits,
            summary.misses,
            summary.skips,
            summary.accuracy_percent
        );
        self.summary = Some(summary);
        summary
    }

    /// Apply a loop reset when the beat crossed the loop end
    fn wrap_loop(&mut self, beat: &mut f64, now: f64) -> bool {
        let Some((region, mode)) = self.loop_region else {
            return false;
        };
        if *beat < region.end {
            return false;
        }

        self.judge.loop_reset(&region);
        let rebased = match mode {
            LoopMode::Wait => region.start - self.config.judging.lead_in_beats,
            LoopMode::Seamless => region.start + (*beat - region.end),
        };
        self.clock.rebase_to(rebased, now);
        tracing::info!(
            "[PracticeSession] Loop restart ({:?}): beat {:.3} -> {:.3}",
            mode,
            *beat,
            rebased
        );
        *beat = rebased;
        true
    }

    fn detect(
        &mut self,
        beat: f64,
        frame: &AudioFrame,
        spectrum: &SpectralSnapshot,
        threshold_db: f32,
    ) -> Fusion {
        let lookahead = self.config.judging.lookahead_beats;
        let expected: Option<Expected<'_>> = self
            .judge
            .expected_event(beat, lookahead)
            .map(|(_, event)| event.kind.expected());

        let fusion = self.detector.detect(frame, spectrum, expected, threshold_db);
        tracing::trace!(
            "[PracticeSession] beat {:.3}: {} {:?}",
            beat,
            fusion.method.label(),
            fusion.result
        );
        fusion
    }

    /// Gate the fused reading and hand it to the judge
    fn trigger(&mut self, now: f64, beat: f64, fusion: &Fusion, onset: bool) -> Option<Verdict> {
        let judging = &self.config.judging;
        let cooldown = judging
            .cooldown_seconds
            .min(self.clock.beat_duration() * COOLDOWN_BEAT_FRACTION);
        let elapsed = self.gate.elapsed_since_trigger(now);
        let stable = self.gate.track_pitch(fusion.result.frequency);

        if self.completed {
            return None;
        }

        if let Some(frequency) = fusion.result.frequency {
            let strong = fusion.result.rms > self.config.detection.silence_floor_rms
                && fusion.result.confidence > STRONG_SIGNAL_CONFIDENCE;
            if !(onset || strong) || stable < judging.stable_frames || elapsed <= cooldown {
                return None;
            }

            self.gate.last_trigger_at = Some(now);
            return match self.judge.match_attempt(beat, frequency) {
                Ok(verdict) => verdict,
                Err(err) => {
                    log_session_error(&err, "match_attempt");
                    None
                }
            };
        }

        let audible = onset || fusion.result.rms > self.config.detection.silence_floor_rms;
        match (&fusion.method, &fusion.chord) {
            (DetectionMethod::Fft, Some(chord)) if audible && elapsed > cooldown * 0.5 => {
                self.gate.last_trigger_at = Some(now);
                self.judge.match_chord_energy(beat, chord)
            }
            _ => None,
        }
    }

    fn check_completion(&mut self, beat: f64) {
        if self.completed || self.loop_region.is_some() || !self.judge.is_complete() {
            return;
        }
        let last_beat = self.judge.timeline().last_beat().unwrap_or(beat);
        let end_beat = last_beat + self.config.judging.completion_grace_beats;
        self.completed = true;
        self.end_beat = Some(end_beat);
        tracing::info!(
            "[PracticeSession] Exercise complete, stop-ready at beat {:.2}",
            end_beat
        );
    }

    /// Threshold from the shared calibration, or the configured default when
    /// the lock is busy or poisoned
    fn current_threshold(&mut self) -> f32 {
        let default_db = self.config.calibration.default_threshold_db;
        let (threshold, poisoned) = match self.calibration.try_read() {
            Ok(state) => (state.energy_threshold(), false),
            Err(TryLockError::WouldBlock) => {
                tracing::debug!("[PracticeSession] Calibration busy, using default threshold");
                (default_db, false)
            }
            Err(TryLockError::Poisoned(_)) => (default_db, true),
        };
        if poisoned {
            self.report_poison("threshold read");
        }
        threshold
    }

    fn observe_calibration(&mut self, max_db: f32, note_active: bool) {
        let poisoned = match self.calibration.try_write() {
            Ok(mut state) => {
                state.observe(max_db, note_active);
                false
            }
            Err(TryLockError::WouldBlock) => false,
            Err(TryLockError::Poisoned(_)) => true,
        };
        if poisoned {
            self.report_poison("adaptive update");
        }
    }

    fn report_poison(&mut self, context: &str) {
        if !self.poison_reported {
            log_calibration_error(&CalibrationError::StatePoisoned, context);
            self.poison_reported = true;
        }
    }

    /// Which calibration source the next tick would use, if readable
    pub fn threshold_source(&self) -> Option<ThresholdSource> {
        self.calibration
            .try_read()
            .ok()
            .map(|state| state.energy_source())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::signal::{beats_to_seconds, pitch_to_frequency};

    const SAMPLE_RATE: u32 = 44100;
    const BIN_WIDTH: f32 = 44100.0 / 8192.0;

    fn sine_frame(frequency: f32) -> AudioFrame {
        let samples = (0..2048)
            .map(|i| {
                0.3 * (2.0 * std::f32::consts::PI * frequency * i as f32 / SAMPLE_RATE as f32).sin()
            })
            .collect();
        AudioFrame::new(samples, SAMPLE_RATE)
    }

    fn chord_frame(pitches: &[i32]) -> AudioFrame {
        let samples = (0..2048)
            .map(|i| {
                pitches
                    .iter()
                    .map(|&pitch| {
                        let frequency = pitch_to_frequency(pitch as f32);
                        0.1 * (2.0 * std::f32::consts::PI * frequency * i as f32
                            / SAMPLE_RATE as f32)
                            .sin()
                    })
                    .sum::<f32>()
            })
            .collect();
        AudioFrame::new(samples, SAMPLE_RATE)
    }

    fn silence() -> AudioFrame {
        AudioFrame::new(vec![0.0; 2048], SAMPLE_RATE)
    }

    fn flat_spectrum() -> SpectralSnapshot {
        SpectralSnapshot::new(vec![-100.0; 4096], BIN_WIDTH)
    }

    fn chord_spectrum(pitches: &[i32]) -> SpectralSnapshot {
        let mut snapshot = flat_spectrum();
        for &pitch in pitches {
            let bin = (pitch_to_frequency(pitch as f32) / BIN_WIDTH).round() as usize;
            snapshot.magnitudes_db[bin] = -20.0;
        }
        snapshot
    }

    fn session(events: Vec<MusicalEvent>, bpm: f64) -> PracticeSession {
        let timeline = Timeline::new(events).unwrap();
        let calibration = Arc::new(RwLock::new(CalibrationState::new_default()));
        PracticeSession::new(AppConfig::default(), timeline, bpm, calibration).unwrap()
    }

    /// Feed `frame` at 60 Hz from beat `from` to beat `to`
    fn play(
        session: &mut PracticeSession,
        bpm: f64,
        from: f64,
        to: f64,
        frame: &AudioFrame,
        spectrum: &SpectralSnapshot,
    ) -> Vec<TickReport> {
        let mut reports = Vec::new();
        let mut now = beats_to_seconds(from, bpm);
        while session.beat_at(now) < to {
            reports.push(session.tick(now, frame, spectrum).unwrap());
            now += 1.0 / 60.0;
        }
        reports
    }

    #[test]
    fn test_tick_requires_running() {
        let mut session = session(vec![MusicalEvent::note(0.0, 57)], 120.0);
        assert_eq!(
            session.tick(0.0, &silence(), &flat_spectrum()),
            Err(SessionError::NotRunning)
        );
        session.start(0.0).unwrap();
        assert_eq!(session.start(0.0), Err(SessionError::AlreadyRunning));
    }

    #[test]
    fn test_played_note_is_hit() {
        let bpm = 120.0;
        let mut session = session(vec![MusicalEvent::note(1.0, 57)], bpm);
        session.start(0.0).unwrap();

        play(&mut session, bpm, 0.0, 0.8, &silence(), &flat_spectrum());
        let reports = play(
            &mut session,
            bpm,
            0.8,
            1.3,
            &sine_frame(220.0),
            &flat_spectrum(),
        );

        let verdict = reports
            .iter()
            .find_map(|r| r.verdict)
            .expect("the note should be judged");
        assert!(verdict.matched);
        assert!(session.timeline().events()[0].hit());
        assert_eq!(session.stats().hits, 1);
    }

    #[test]
    fn test_silence_skips_and_completes() {
        let bpm = 120.0;
        let mut session = session(
            vec![MusicalEvent::note(0.0, 57), MusicalEvent::note(1.0, 59)],
            bpm,
        );
        session.start(0.0).unwrap();

        let reports = play(&mut session, bpm, 0.0, 6.0, &silence(), &flat_spectrum());
        assert_eq!(session.stats().skips, 2);
        assert!(session.is_complete());

        let ready = reports.iter().position(|r| r.stop_ready).unwrap();
        assert!(reports[ready].beat >= 5.0);
        assert!(!reports[..ready].iter().any(|r| r.stop_ready));

        let summary = session.stop();
        assert_eq!(summary.total, 2);
        assert_eq!(summary.accuracy_percent, 0);
        assert_eq!(session.stop(), summary);
        assert!(session.tick(10.0, &silence(), &flat_spectrum()).is_err());
    }

    #[test]
    fn test_wrong_note_is_missed() {
        let bpm = 120.0;
        let mut session = session(vec![MusicalEvent::note(1.0, 57)], bpm);
        session.start(0.0).unwrap();

        // D#4: six semitones from A3 in either octave
        play(
            &mut session,
            bpm,
            0.8,
            1.2,
            &sine_frame(311.13),
            &flat_spectrum(),
        );
        play(&mut session, bpm, 1.2, 2.0, &silence(), &flat_spectrum());

        let event = &session.timeline().events()[0];
        assert!(event.missed());
        assert_eq!(session.stats().misses, 1);
    }

    #[test]
    fn test_chord_hit_from_spectrum() {
        let bpm = 100.0;
        let chord = vec![45, 52, 57];
        let mut session = session(vec![MusicalEvent::chord(1.0, chord.clone())], bpm);
        session.start(0.0).unwrap();

        let reports = play(
            &mut session,
            bpm,
            0.9,
            1.2,
            &chord_frame(&chord),
            &chord_spectrum(&chord),
        );
        assert!(reports
            .iter()
            .any(|r| r.method == Some(DetectionMethod::Fft)));
        assert!(session.timeline().events()[0].hit());
    }

    #[test]
    fn test_silent_chord_is_skipped() {
        let bpm = 120.0;
        let mut session = session(vec![MusicalEvent::chord(1.0, vec![45, 52, 57])], bpm);
        session.start(0.0).unwrap();

        let reports = play(&mut session, bpm, 0.0, 2.0, &silence(), &flat_spectrum());

        assert!(reports
            .iter()
            .any(|r| r.method == Some(DetectionMethod::Fft)));
        assert!(reports.iter().all(|r| r.verdict.is_none()));
        let event = &session.timeline().events()[0];
        assert!(event.skipped());
        assert!(!event.attempted());
        assert_eq!(
            session.stats(),
            SessionStats {
                hits: 0,
                misses: 0,
                skips: 1
            }
        );
    }

    #[test]
    fn test_note_cooldown_blocks_retrigger() {
        // 120 BPM: cooldown = min(0.25 s, 0.3 * 0.5 s) = 0.15 s
        let mut session = session(
            vec![MusicalEvent::note(1.0, 57), MusicalEvent::note(1.1, 57)],
            120.0,
        );
        session.start(0.0).unwrap();
        let frame = sine_frame(220.0);
        let spectrum = flat_spectrum();

        let first = session.tick(0.5, &frame, &spectrum).unwrap();
        assert!(first.verdict.is_none(), "one tick is not yet stable");
        let t1 = 0.5 + 1.0 / 60.0;
        let hit = session.tick(t1, &frame, &spectrum).unwrap();
        assert_eq!(hit.verdict.map(|v| (v.matched, v.event_index)), Some((true, 0)));

        let blocked = session.tick(t1 + 0.05, &frame, &spectrum).unwrap();
        assert!(blocked.verdict.is_none());
        assert!(session.timeline().events()[1].is_pending());
        assert!(!session.timeline().events()[1].attempted());

        let accepted = session.tick(t1 + 0.16, &frame, &spectrum).unwrap();
        assert_eq!(
            accepted.verdict.map(|v| (v.matched, v.event_index)),
            Some((true, 1))
        );
        assert_eq!(session.stats().hits, 2);
    }

    #[test]
    fn test_chord_cooldown_is_half_the_note_cooldown() {
        // Note cooldown 0.15 s at 120 BPM, chord checks every 0.075 s
        let chord = vec![45, 52, 57];
        let mut session = session(
            vec![
                MusicalEvent::chord(1.0, chord.clone()),
                MusicalEvent::chord(1.1, chord.clone()),
            ],
            120.0,
        );
        session.start(0.0).unwrap();
        let frame = chord_frame(&chord);
        let spectrum = chord_spectrum(&chord);

        let first = session.tick(0.5, &frame, &spectrum).unwrap();
        assert_eq!(first.method, Some(DetectionMethod::Fft));
        assert_eq!(first.verdict.map(|v| (v.matched, v.event_index)), Some((true, 0)));

        let early = session.tick(0.55, &frame, &spectrum).unwrap();
        assert!(early.verdict.is_none());
        assert!(session.timeline().events()[1].is_pending());

        // Past half the cooldown, still inside the full note cooldown
        let accepted = session.tick(0.6, &frame, &spectrum).unwrap();
        assert_eq!(
            accepted.verdict.map(|v| (v.matched, v.event_index)),
            Some((true, 1))
        );
    }

    #[test]
    fn test_single_tick_pitch_never_triggers() {
        let bpm = 120.0;
        let mut session = session(vec![MusicalEvent::note(1.0, 57)], bpm);
        session.start(0.0).unwrap();
        let note = sine_frame(220.0);
        let spectrum = flat_spectrum();

        let mut now = beats_to_seconds(0.8, bpm);
        let mut reports = Vec::new();
        let mut sounding = true;
        while session.beat_at(now) < 2.0 {
            let frame = if sounding { note.clone() } else { silence() };
            reports.push(session.tick(now, &frame, &spectrum).unwrap());
            sounding = !sounding;
            now += 1.0 / 60.0;
        }

        assert!(reports.iter().all(|r| r.verdict.is_none()));
        let event = &session.timeline().events()[0];
        assert!(event.skipped());
        assert!(!event.attempted());
    }

    #[test]
    fn test_muted_input_skips_detection() {
        let bpm = 120.0;
        let mut session = session(vec![MusicalEvent::note(1.0, 57)], bpm);
        session.start(0.0).unwrap();
        session.mute_input_until(10.0);

        let reports = play(
            &mut session,
            bpm,
            0.8,
            2.0,
            &sine_frame(220.0),
            &flat_spectrum(),
        );
        assert!(reports.iter().all(|r| r.method.is_none()));
        assert!(session.timeline().events()[0].skipped());
    }

    #[test]
    fn test_seamless_loop_keeps_overshoot() {
        let bpm = 60.0;
        let mut session = session(
            vec![MusicalEvent::note(0.0, 57), MusicalEvent::note(1.0, 59)],
            bpm,
        );
        session.set_loop(0.0, 2.0, LoopMode::Seamless).unwrap();
        session.start(0.0).unwrap();

        session.tick(1.5, &silence(), &flat_spectrum()).unwrap();
        let report = session.tick(2.25, &silence(), &flat_spectrum()).unwrap();

        assert!(report.looped);
        assert!((report.beat - 0.25).abs() < 1e-9);
        assert_eq!(session.stats().skips, 1);
        // Looping never completes
        assert!(!report.complete);
    }

    #[test]
    fn test_wait_loop_inserts_lead_in() {
        let bpm = 60.0;
        let mut session = session(vec![MusicalEvent::note(2.0, 57)], bpm);
        session.set_loop(2.0, 4.0, LoopMode::Wait).unwrap();
        session.start(0.0).unwrap();

        let report = session.tick(4.1, &silence(), &flat_spectrum()).unwrap();
        assert!(report.looped);
        assert!((report.beat + 2.0).abs() < 1e-9);
        assert!((session.beat_at(5.1) + 1.0).abs() < 1e-9);
        assert!(session.timeline().events()[0].is_pending());
    }

    #[test]
    fn test_invalid_loop_rejected() {
        let mut session = session(vec![MusicalEvent::note(0.0, 57)], 90.0);
        assert!(session.set_loop(4.0, 4.0, LoopMode::Wait).is_err());
        assert!(session.loop_region().is_none());
    }

    #[test]
    fn test_start_resets_previous_attempt() {
        let bpm = 120.0;
        let mut session = session(vec![MusicalEvent::note(0.0, 57)], bpm);
        session.start(0.0).unwrap();
        play(&mut session, bpm, 0.0, 2.0, &silence(), &flat_spectrum());
        assert_eq!(session.stop().skips, 1);

        session.start(100.0).unwrap();
        assert_eq!(session.stats(), SessionStats::default());
        assert!(session.timeline().events()[0].is_pending());
        assert!(!session.is_complete());
    }

    #[test]
    fn test_poisoned_calibration_falls_back() {
        let mut session = session(vec![MusicalEvent::note(0.0, 57)], 120.0);
        let calibration = session.calibration();
        let _ = std::thread::spawn(move || {
            let _guard = calibration.write().unwrap();
            panic!("poison the calibration lock");
        })
        .join();

        session.start(0.0).unwrap();
        let report = session.tick(0.1, &silence(), &flat_spectrum()).unwrap();
        assert_eq!(report.threshold_db, -40.0);
        assert!(session.threshold_source().is_none());
    }

    #[test]
    fn test_threshold_follows_calibration() {
        let mut session = session(vec![MusicalEvent::note(0.0, 57)], 120.0);
        session
            .calibration()
            .write()
            .unwrap()
            .set_manual_threshold(-55.0)
            .unwrap();

        session.start(0.0).unwrap();
        let report = session.tick(0.0, &silence(), &flat_spectrum()).unwrap();
        assert_eq!(report.threshold_db, -55.0);
        assert_eq!(session.threshold_source(), Some(ThresholdSource::Manual));
    }
}
