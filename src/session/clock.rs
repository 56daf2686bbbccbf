// SessionClock - maps host time (seconds) to beats
//
// beat = (now - start) * bpm / 60. Beat 0 may be placed after `now` to give a
// count-in, during which beats are negative.

use crate::analysis::signal::{beats_to_seconds, seconds_to_beats};
use crate::error::SessionError;

#[derive(Debug, Clone, PartialEq)]
pub struct SessionClock {
    bpm: f64,
    /// Host time of beat 0; `None` until started
    start_time: Option<f64>,
}

impl SessionClock {
    pub fn new(bpm: f64) -> Result<Self, SessionError> {
        if !bpm.is_finite() || bpm <= 0.0 {
            return Err(SessionError::BpmInvalid { bpm });
        }
        Ok(Self {
            bpm,
            start_time: None,
        })
    }

    pub fn bpm(&self) -> f64 {
        self.bpm
    }

    /// Seconds per beat
    pub fn beat_duration(&self) -> f64 {
        60.0 / self.bpm
    }

    pub fn is_started(&self) -> bool {
        self.start_time.is_some()
    }

    /// Place beat 0 `count_in_beats` after `now`
    pub fn start(&mut self, now: f64, count_in_beats: f64) {
        self.start_time = Some(now + beats_to_seconds(count_in_beats.max(0.0), self.bpm));
    }

    pub fn stop(&mut self) {
        self.start_time = None;
    }

    /// Current beat, 0 when the clock has not been started
    pub fn beat_at(&self, now: f64) -> f64 {
        self.start_time
            .map_or(0.0, |start| seconds_to_beats(now - start, self.bpm))
    }

    /// Move beat 0 so that `now` maps to `beat`
    pub fn rebase_to(&mut self, beat: f64, now: f64) {
        self.start_time = Some(now - beats_to_seconds(beat, self.bpm));
    }
}
