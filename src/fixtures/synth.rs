//! Deterministic signal generators for fixtures and tests.
//!
//! Everything here is reproducible: noise comes from a `StdRng` seeded with
//! a fixed value unless the caller passes its own seed.

use std::f32::consts::PI;

use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::analysis::signal::{beats_to_seconds, pitch_to_frequency};
use crate::session::EventKind;

use super::Exercise;

/// Seed used when the caller does not supply one.
pub const DEFAULT_SEED: u64 = 42;

/// Attack ramp at the start of every rendered note (seconds).
const ATTACK_SECONDS: f32 = 0.005;
/// Release ramp at the end of every rendered note (seconds).
const RELEASE_SECONDS: f32 = 0.010;
/// Exponential decay constant of a plucked note (seconds).
const DECAY_SECONDS: f32 = 0.8;

/// Rendering parameters for `render_exercise`.
#[derive(Debug, Clone)]
pub struct RenderOptions {
    pub sample_rate: u32,
    /// Peak amplitude of each tone (chords sum their tones).
    pub amplitude: f32,
    /// How long each event rings, in beats.
    pub note_beats: f64,
    /// Silence appended after the last event, in beats.
    pub tail_beats: f64,
    /// Peak amplitude of uniform background noise (0 disables it).
    pub noise_amplitude: f32,
    pub seed: u64,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            amplitude: 0.25,
            note_beats: 0.4,
            tail_beats: 5.0,
            noise_amplitude: 0.0,
            seed: DEFAULT_SEED,
        }
    }
}

/// Steady sine tone.
pub fn sine(frequency: f32, amplitude: f32, seconds: f32, sample_rate: u32) -> Vec<f32> {
    let len = (seconds * sample_rate as f32).round() as usize;
    (0..len)
        .map(|i| amplitude * (2.0 * PI * frequency * i as f32 / sample_rate as f32).sin())
        .collect()
}

/// Sum of steady sines, one per pitch.
pub fn chord(pitches: &[i32], amplitude: f32, seconds: f32, sample_rate: u32) -> Vec<f32> {
    let len = (seconds * sample_rate as f32).round() as usize;
    let mut samples = vec![0.0f32; len];
    for &pitch in pitches {
        let frequency = pitch_to_frequency(pitch as f32);
        for (i, sample) in samples.iter_mut().enumerate() {
            *sample += amplitude * (2.0 * PI * frequency * i as f32 / sample_rate as f32).sin();
        }
    }
    samples
}

/// Uniform white noise in `[-amplitude, amplitude)`.
pub fn noise(amplitude: f32, len: usize, seed: u64) -> Vec<f32> {
    if amplitude <= 0.0 {
        return vec![0.0; len];
    }
    let mut rng = StdRng::seed_from_u64(seed);
    (0..len).map(|_| rng.gen_range(-amplitude..amplitude)).collect()
}

/// Render every event of an exercise as a plucked tone at its beat.
///
/// Beat 0 lands on sample 0. The output is clamped to [-1, 1].
pub fn render_exercise(exercise: &Exercise, options: &RenderOptions) -> Vec<f32> {
    let sample_rate = options.sample_rate as f64;
    let last_beat = exercise
        .events
        .iter()
        .map(|event| event.beat())
        .fold(0.0f64, f64::max);
    let total_seconds = beats_to_seconds(last_beat + options.tail_beats, exercise.bpm);
    let total_len = (total_seconds * sample_rate).ceil().max(0.0) as usize;

    let mut samples = noise(options.noise_amplitude, total_len, options.seed);
    let note_len =
        (beats_to_seconds(options.note_beats, exercise.bpm) * sample_rate).round() as usize;

    for event in &exercise.events {
        let start = (beats_to_seconds(event.beat(), exercise.bpm) * sample_rate).round();
        if start < 0.0 {
            continue;
        }
        let start = start as usize;
        let pitches = match event.kind() {
            EventKind::Note { pitch } => vec![pitch],
            EventKind::Chord { notes } => notes,
        };
        let frequencies: Vec<f32> = pitches
            .iter()
            .map(|&pitch| pitch_to_frequency(pitch as f32))
            .collect();

        let end = (start + note_len).min(total_len);
        for (offset, sample) in samples[start..end].iter_mut().enumerate() {
            let t = offset as f32 / options.sample_rate as f32;
            let remaining = (end - start - offset) as f32 / options.sample_rate as f32;
            let gain = options.amplitude * envelope(t, remaining);
            *sample += frequencies
                .iter()
                .map(|&frequency| gain * (2.0 * PI * frequency * t).sin())
                .sum::<f32>();
        }
    }

    samples.iter_mut().for_each(|s| *s = s.clamp(-1.0, 1.0));
    samples
}

/// Pluck envelope: linear attack, exponential decay, short linear release.
fn envelope(t: f32, remaining: f32) -> f32 {
    let attack = (t / ATTACK_SECONDS).min(1.0);
    let release = (remaining / RELEASE_SECONDS).min(1.0);
    attack * release * (-t / DECAY_SECONDS).exp()
}
