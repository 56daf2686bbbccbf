//! Signal primitives - level, pitch and beat conversions
//!
//! Pure helper functions shared by the detectors and the judge:
//! - RMS level of a sample block
//! - Frequency <-> pitch (MIDI semitone index, A4 = 69 = 440 Hz)
//! - Seconds <-> beats at a given tempo
//! - Tempo-dependent timing windows
//! - The fixed open-string tuning table used to place pitches on the fretboard

/// Concert pitch reference
pub const A4_FREQUENCY: f32 = 440.0;
/// Pitch index of A4
pub const A4_PITCH: f32 = 69.0;

/// Open-string pitches, low E to high E
pub const STANDARD_TUNING: [i32; 6] = [40, 45, 50, 55, 59, 64];
/// String names in tuning order
pub const STRING_NAMES: [&str; 6] = ["E", "A", "D", "G", "B", "E"];
/// Highest fret considered playable
pub const MAX_FRET: i32 = 12;

const PITCH_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Root-mean-square level of a sample block (0.0 for an empty block)
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f64 = samples
        .iter()
        .map(|&sample| (sample as f64) * (sample as f64))
        .sum();
    (sum_squares / samples.len() as f64).sqrt() as f32
}

/// Fractional pitch index for a frequency in Hz
pub fn frequency_to_pitch(frequency: f32) -> f32 {
    A4_PITCH + 12.0 * (frequency / A4_FREQUENCY).log2()
}

/// Frequency in Hz for a (possibly fractional) pitch index
pub fn pitch_to_frequency(pitch: f32) -> f32 {
    A4_FREQUENCY * 2.0f32.powf((pitch - A4_PITCH) / 12.0)
}

/// Deviation of a fractional pitch from a target, in cents
pub fn cents_offset(pitch: f32, target: i32) -> f32 {
    (pitch - target as f32) * 100.0
}

pub fn seconds_to_beats(seconds: f64, bpm: f64) -> f64 {
    seconds * bpm / 60.0
}

pub fn beats_to_seconds(beats: f64, bpm: f64) -> f64 {
    beats * 60.0 / bpm
}

/// Allowed lateness after an event's beat, in beats
///
/// `clamp((120 / bpm) * 0.35, 0.25, 0.80)`
pub fn timing_window_beats(bpm: f64) -> f64 {
    ((120.0 / bpm) * 0.35).clamp(0.25, 0.80)
}

/// Allowed earliness before an event's beat, in beats
///
/// `early_seconds` converted to beats, clamped to [0.15, 0.4].
pub fn early_tolerance_beats(bpm: f64, early_seconds: f64) -> f64 {
    seconds_to_beats(early_seconds, bpm).clamp(0.15, 0.4)
}

/// Note name with octave, e.g. 69 -> "A4"
pub fn pitch_name(pitch: i32) -> String {
    let name = PITCH_NAMES[pitch.rem_euclid(12) as usize];
    let octave = pitch.div_euclid(12) - 1;
    format!("{}{}", name, octave)
}

/// Fretboard placement of a pitch
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct FretPosition {
    /// String index into `STANDARD_TUNING` (0 = low E)
    pub string: usize,
    pub fret: i32,
}

/// Lowest-fret placement of a pitch on the standard tuning, if playable
pub fn fret_position(pitch: i32) -> Option<FretPosition> {
    STANDARD_TUNING
        .iter()
        .enumerate()
        .filter_map(|(string, &open)| {
            let fret = pitch - open;
            (0..=MAX_FRET)
                .contains(&fret)
                .then_some(FretPosition { string, fret })
        })
        .min_by_key(|position| position.fret)
}
