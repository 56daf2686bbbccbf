//! Judge - matches detections to timeline events
//!
//! Every event starts `Pending` and ends in exactly one of `Hit`, `Missed`
//! or `Skipped`:
//!
//! - **Match attempt**: the pending event closest to the current beat within
//!   `[-early_tolerance, match_window]` is the candidate. A pitch match turns
//!   it into a hit; a mismatch records an attempt and leaves it pending.
//! - **Sweep**: a pending event whose lateness exceeds the timing window
//!   expires as `Missed` (attempted) or `Skipped` (never attempted).
//! - **Loop reset**: events inside the loop region revert to pending.
//!
//! Statistics are bumped in the same step as the transition they count, and
//! every operation validates its input before touching any state.

use serde::{Deserialize, Serialize};

use crate::analysis::chord::ChordDetection;
use crate::analysis::signal::{
    cents_offset, early_tolerance_beats, frequency_to_pitch, timing_window_beats,
};
use crate::config::JudgingConfig;
use crate::error::SessionError;
use crate::session::timeline::{EventKind, EventState, HitRecord, MusicalEvent, Timeline};

/// Lower bound on the lateness accepted by match attempts (beats)
pub const MIN_MATCH_WINDOW: f64 = 0.30;
/// Semitone tolerance for pitch matches
pub const PITCH_TOLERANCE: i32 = 1;
/// Cents reported for a non-matching attempt
pub const MISMATCH_CENTS: f32 = 100.0;
/// Expected events must lie closer than this to the current beat
pub const EXPECTED_EVENT_RADIUS: f64 = 1.0;

/// Outcome of a match attempt against the candidate event
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub matched: bool,
    pub event_index: usize,
    pub expected_pitch: i32,
    /// Fractional pitch of the detection
    pub detected_pitch: f32,
    pub cents_offset: f32,
    /// Signed: negative is early
    pub timing_error_beats: f64,
}

/// An event that reached a terminal state during a sweep
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JudgedEvent {
    pub index: usize,
    pub beat: f64,
    pub state: EventState,
}

/// Aggregate counters, cumulative across loop passes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    pub hits: u32,
    pub misses: u32,
    pub skips: u32,
}

impl SessionStats {
    pub fn total(&self) -> u32 {
        self.hits + self.misses + self.skips
    }

    /// round(100 · hits / total), 0 when nothing was judged
    pub fn accuracy_percent(&self) -> u32 {
        let total = self.total();
        if total == 0 {
            return 0;
        }
        (100.0 * self.hits as f64 / total as f64).round() as u32
    }
}

/// Half-open beat range `[start, end)` replayed in loop mode
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoopRegion {
    pub start: f64,
    pub end: f64,
}

impl LoopRegion {
    pub fn new(start: f64, end: f64) -> Result<Self, SessionError> {
        if !start.is_finite() || !end.is_finite() || start >= end {
            return Err(SessionError::InvalidLoop { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, beat: f64) -> bool {
        beat >= self.start && beat < self.end
    }
}

/// How the clock continues after a loop pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopMode {
    /// Jump to a lead-in before the loop start
    #[default]
    Wait,
    /// Continue from the loop start, carrying the overshoot
    Seamless,
}

pub struct Judge {
    timeline: Timeline,
    bpm: f64,
    timing_window: f64,
    early_tolerance: f64,
    stats: SessionStats,
}

impl Judge {
    pub fn new(timeline: Timeline, bpm: f64, config: &JudgingConfig) -> Result<Self, SessionError> {
        if !bpm.is_finite() || bpm <= 0.0 {
            return Err(SessionError::BpmInvalid { bpm });
        }
        Ok(Self {
            timeline,
            bpm,
            timing_window: timing_window_beats(bpm),
            early_tolerance: early_tolerance_beats(bpm, config.early_window_seconds),
            stats: SessionStats::default(),
        })
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    pub fn bpm(&self) -> f64 {
        self.bpm
    }

    /// Lateness after which the sweep expires an event
    pub fn timing_window(&self) -> f64 {
        self.timing_window
    }

    /// Lateness still accepted by a match attempt
    pub fn match_window(&self) -> f64 {
        self.timing_window.max(MIN_MATCH_WINDOW)
    }

    pub fn early_tolerance(&self) -> f64 {
        self.early_tolerance
    }

    pub fn is_complete(&self) -> bool {
        !self.timeline.is_empty() && self.timeline.all_judged()
    }

    /// Pending event closest to `beat` inside the match window
    fn candidate(&self, beat: f64, accept: impl Fn(&MusicalEvent) -> bool) -> Option<usize> {
        let window = self.match_window();
        let mut best: Option<(usize, f64)> = None;

        for (index, event) in self.timeline.events().iter().enumerate() {
            if !event.is_pending() || !accept(event) {
                continue;
            }
            let diff = beat - event.beat;
            if diff < -self.early_tolerance || diff > window {
                continue;
            }
            if best.map_or(true, |(_, best_diff)| diff.abs() < best_diff) {
                best = Some((index, diff.abs()));
            }
        }

        best.map(|(index, _)| index)
    }

    /// Match a detected frequency against the candidate event
    ///
    /// # Returns
    /// * `Ok(None)` - No pending event inside the window
    /// * `Ok(Some(verdict))` - `matched` tells whether the event became a hit
    /// * `Err(SessionError::InvalidFrequency)` - Nothing was mutated
    pub fn match_attempt(
        &mut self,
        beat: f64,
        frequency: f32,
    ) -> Result<Option<Verdict>, SessionError> {
        if !frequency.is_finite() || frequency <= 0.0 {
            return Err(SessionError::InvalidFrequency { frequency });
        }

        let Some(index) = self.candidate(beat, |_| true) else {
            return Ok(None);
        };

        let detected_pitch = frequency_to_pitch(frequency);
        let rounded = detected_pitch.round() as i32;
        let event = &self.timeline.events()[index];
        let timing_error_beats = beat - event.beat;

        let (expected_pitch, matched_cents) = match &event.kind {
            EventKind::Note { pitch } => (
                *pitch,
                octave_target(rounded, *pitch).map(|target| cents_offset(detected_pitch, target)),
            ),
            EventKind::Chord { notes } => (
                notes.first().copied().unwrap_or_default(),
                chord_tone_matches(rounded, notes).then_some(0.0),
            ),
        };

        let verdict = Verdict {
            matched: matched_cents.is_some(),
            event_index: index,
            expected_pitch,
            detected_pitch,
            cents_offset: matched_cents.unwrap_or(MISMATCH_CENTS),
            timing_error_beats,
        };
        self.apply(index, &verdict);
        Ok(Some(verdict))
    }

    /// Judge a spectral chord check against the candidate chord event
    ///
    /// The candidate window is the same as for `match_attempt`, restricted
    /// to chord events. The event becomes a hit only when the check succeeded.
    pub fn match_chord_energy(&mut self, beat: f64, detection: &ChordDetection) -> Option<Verdict> {
        let index = self.candidate(beat, |event| event.kind.is_chord())?;
        let event = &self.timeline.events()[index];
        let expected_pitch = event.kind.reference_pitch().unwrap_or_default();

        let verdict = Verdict {
            matched: detection.success,
            event_index: index,
            expected_pitch,
            detected_pitch: expected_pitch as f32,
            cents_offset: if detection.success { 0.0 } else { MISMATCH_CENTS },
            timing_error_beats: beat - event.beat,
        };
        self.apply(index, &verdict);
        Some(verdict)
    }

    fn apply(&mut self, index: usize, verdict: &Verdict) {
        let Some(event) = self.timeline.event_mut(index) else {
            return;
        };

        if verdict.matched {
            event.mark_hit(HitRecord {
                cents_offset: verdict.cents_offset,
                timing_error_beats: verdict.timing_error_beats,
            });
            self.stats.hits += 1;
            tracing::info!(
                "[Judge] HIT {} at beat {:.2} (timing {:+.3} beats, {:+.0} cents)",
                event.kind.label(),
                event.beat,
                verdict.timing_error_beats,
                verdict.cents_offset
            );
            self.timeline.advance_cursor();
        } else {
            event.record_attempt();
            tracing::debug!(
                "[Judge] Mismatch on {} at beat {:.2}: detected pitch {:.2}",
                event.kind.label(),
                event.beat,
                verdict.detected_pitch
            );
        }
    }

    /// Expire pending events whose window has closed
    ///
    /// Terminal events are never touched, so repeated sweeps at the same beat
    /// return nothing new and leave the counters unchanged.
    pub fn sweep(&mut self, beat: f64) -> Vec<JudgedEvent> {
        let window = self.timing_window;
        let cursor = self.timeline.cursor();
        let mut judged = Vec::new();

        for (index, event) in self.timeline.events_mut().skip(cursor) {
            if !event.is_pending() || beat <= event.beat + window {
                continue;
            }
            let state = event.expire();
            match state {
                EventState::Missed => self.stats.misses += 1,
                _ => self.stats.skips += 1,
            }
            tracing::info!(
                "[Judge] {:?}: expected {} at beat {:.2}",
                state,
                event.kind.label(),
                event.beat
            );
            judged.push(JudgedEvent {
                index,
                beat: event.beat,
                state,
            });
        }

        self.timeline.advance_cursor();
        judged
    }

    /// Revert every event inside the region to pending
    ///
    /// # Returns
    /// Number of events reverted
    pub fn loop_reset(&mut self, region: &LoopRegion) -> usize {
        let mut reverted = 0;
        for (_, event) in self.timeline.events_mut() {
            if region.contains(event.beat) {
                event.reset();
                reverted += 1;
            }
        }
        self.timeline.rewind_cursor(region.start);
        tracing::info!(
            "[Judge] Loop reset [{:.2}, {:.2}): {} events pending again",
            region.start,
            region.end,
            reverted
        );
        reverted
    }

    /// The single next expected event near `beat`
    ///
    /// Scans from the cursor up to `lookahead` beats ahead for the first
    /// pending event less than one beat away.
    pub fn expected_event(&self, beat: f64, lookahead: f64) -> Option<(usize, &MusicalEvent)> {
        self.timeline
            .events()
            .iter()
            .enumerate()
            .skip(self.timeline.cursor())
            .take_while(|(_, event)| event.beat <= beat + lookahead)
            .find(|(_, event)| event.is_pending() && (event.beat - beat).abs() < EXPECTED_EVENT_RADIUS)
    }

    /// Fresh attempt: every event pending, counters zeroed
    pub fn restart(&mut self) {
        self.timeline.reset_all();
        self.stats = SessionStats::default();
    }
}

/// Octave-equivalent target within tolerance of a rounded pitch
///
/// Prefers the expected pitch itself, then the octave below and above.
fn octave_target(rounded: i32, expected: i32) -> Option<i32> {
    [expected, expected - 12, expected + 12]
        .into_iter()
        .find(|target| (rounded - target).abs() <= PITCH_TOLERANCE)
}

/// Pitch-class match against any chord tone, ±1 semitone
fn chord_tone_matches(rounded: i32, notes: &[i32]) -> bool {
    notes.iter().any(|&tone| {
        let class_distance = (rounded - tone).abs() % 12;
        class_distance <= PITCH_TOLERANCE || class_distance >= 12 - PITCH_TOLERANCE
    })
}
