// Timeline - ordered musical events with per-event judgment state
//
// Events are a closed variant {Note, Chord} with their full flag set present
// from construction. Beats are non-decreasing; the cursor marks the first
// event that has not been judged yet.

use serde::{Deserialize, Serialize};

use crate::analysis::hybrid::Expected;
use crate::analysis::signal::pitch_name;
use crate::error::SessionError;

/// What is to be played at an event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EventKind {
    Note { pitch: i32 },
    Chord { notes: Vec<i32> },
}

impl EventKind {
    /// View used by the hybrid detector
    pub fn expected(&self) -> Expected<'_> {
        match self {
            EventKind::Note { pitch } => Expected::Note(*pitch),
            EventKind::Chord { notes } => Expected::Chord(notes),
        }
    }

    /// Pitch reported as "expected" in verdicts (first tone for chords)
    pub fn reference_pitch(&self) -> Option<i32> {
        match self {
            EventKind::Note { pitch } => Some(*pitch),
            EventKind::Chord { notes } => notes.first().copied(),
        }
    }

    pub fn is_chord(&self) -> bool {
        matches!(self, EventKind::Chord { .. })
    }

    pub fn label(&self) -> String {
        match self {
            EventKind::Note { pitch } => pitch_name(*pitch),
            EventKind::Chord { notes } => {
                let names: Vec<String> = notes.iter().map(|&p| pitch_name(p)).collect();
                format!("chord [{}]", names.join("+"))
            }
        }
    }
}

/// Judgment state of one event
///
/// `Pending` is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventState {
    Pending,
    Hit,
    Missed,
    Skipped,
}

/// Accuracy recorded on a hit
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HitRecord {
    pub cents_offset: f32,
    /// Signed: negative is early
    pub timing_error_beats: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MusicalEvent {
    pub beat: f64,
    pub kind: EventKind,
    state: EventState,
    /// A match attempt landed on this event while it was pending
    attempted: bool,
    hit_record: Option<HitRecord>,
}

impl MusicalEvent {
    pub fn new(beat: f64, kind: EventKind) -> Self {
        Self {
            beat,
            kind,
            state: EventState::Pending,
            attempted: false,
            hit_record: None,
        }
    }

    pub fn note(beat: f64, pitch: i32) -> Self {
        Self::new(beat, EventKind::Note { pitch })
    }

    pub fn chord(beat: f64, notes: Vec<i32>) -> Self {
        Self::new(beat, EventKind::Chord { notes })
    }

    pub fn state(&self) -> EventState {
        self.state
    }

    pub fn is_pending(&self) -> bool {
        self.state == EventState::Pending
    }

    pub fn judged(&self) -> bool {
        !self.is_pending()
    }

    pub fn hit(&self) -> bool {
        self.state == EventState::Hit
    }

    pub fn missed(&self) -> bool {
        self.state == EventState::Missed
    }

    pub fn skipped(&self) -> bool {
        self.state == EventState::Skipped
    }

    pub fn attempted(&self) -> bool {
        self.attempted
    }

    pub fn hit_record(&self) -> Option<HitRecord> {
        self.hit_record
    }

    pub(crate) fn record_attempt(&mut self) {
        if self.is_pending() {
            self.attempted = true;
        }
    }

    pub(crate) fn mark_hit(&mut self, record: HitRecord) {
        self.attempted = true;
        self.state = EventState::Hit;
        self.hit_record = Some(record);
    }

    /// Expire a pending event: Missed if attempted, else Skipped
    pub(crate) fn expire(&mut self) -> EventState {
        self.state = if self.attempted {
            EventState::Missed
        } else {
            EventState::Skipped
        };
        self.state
    }

    pub(crate) fn reset(&mut self) {
        self.state = EventState::Pending;
        self.attempted = false;
        self.hit_record = None;
    }
}

/// Ordered event sequence with a first-unjudged cursor
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Timeline {
    events: Vec<MusicalEvent>,
    cursor: usize,
}

impl Timeline {
    /// # Returns
    /// * `Err(SessionError::UnsortedTimeline)` - A beat is not finite or is
    ///   earlier than the one before it
    pub fn new(events: Vec<MusicalEvent>) -> Result<Self, SessionError> {
        for (index, event) in events.iter().enumerate() {
            if !event.beat.is_finite() {
                return Err(SessionError::UnsortedTimeline { index });
            }
            if index > 0 && event.beat < events[index - 1].beat {
                return Err(SessionError::UnsortedTimeline { index });
            }
        }
        let mut timeline = Self { events, cursor: 0 };
        timeline.advance_cursor();
        Ok(timeline)
    }

    pub fn events(&self) -> &[MusicalEvent] {
        &self.events
    }

    pub fn get(&self, index: usize) -> Option<&MusicalEvent> {
        self.events.get(index)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Index of the first non-judged event (`len()` when all are judged)
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn all_judged(&self) -> bool {
        self.cursor >= self.events.len()
    }

    pub fn last_beat(&self) -> Option<f64> {
        self.events.iter().map(|e| e.beat).reduce(f64::max)
    }

    pub(crate) fn event_mut(&mut self, index: usize) -> Option<&mut MusicalEvent> {
        self.events.get_mut(index)
    }

    pub(crate) fn events_mut(&mut self) -> impl Iterator<Item = (usize, &mut MusicalEvent)> {
        self.events.iter_mut().enumerate()
    }

    /// Move the cursor past judged events; never moves backwards
    pub(crate) fn advance_cursor(&mut self) {
        while self
            .events
            .get(self.cursor)
            .is_some_and(MusicalEvent::judged)
        {
            self.cursor += 1;
        }
    }

    /// Place the cursor at the first event at or after `beat` (0 if none)
    pub(crate) fn rewind_cursor(&mut self, beat: f64) {
        self.cursor = self
            .events
            .iter()
            .position(|e| e.beat >= beat)
            .unwrap_or(0);
        self.advance_cursor();
    }

    /// Clear every event back to Pending
    pub(crate) fn reset_all(&mut self) {
        self.events.iter_mut().for_each(MusicalEvent::reset);
        self.cursor = 0;
    }
}
