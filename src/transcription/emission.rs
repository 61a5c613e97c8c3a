// Emission model
// Per-state, per-frame potentials from voicing, onset evidence and pitch

use serde::{Deserialize, Serialize};

use crate::transcription::types::{hz_to_midi, NoteState, PitchContour, PitchRange};

/// Accuracy constants used to turn observations into state potentials
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmissionConfig {
    /// Confidence that the estimated pitch is right [0.0, 1.0]
    pub pitch_acc: f64,

    /// Confidence in the voicing decision [0.0, 1.0]
    pub voiced_acc: f64,

    /// Confidence in the onset detector [0.0, 1.0]
    pub onset_acc: f64,

    /// Fraction of `pitch_acc` granted to a neighbouring semitone
    pub spread: f64,
}

impl Default for EmissionConfig {
    fn default() -> Self {
        EmissionConfig {
            pitch_acc: 0.9,
            voiced_acc: 0.9,
            onset_acc: 0.9,
            spread: 0.2,
        }
    }
}

/// `(2N + 1) x F` matrix of multiplicative potentials in [0, 1]
///
/// Columns are not normalized; values weight paths, they are not a distribution.
#[derive(Debug, Clone)]
pub struct EmissionPotentials {
    n_states: usize,
    n_frames: usize,

    /// Frame-major storage: `frame * n_states + state`
    values: Vec<f64>,
}

impl EmissionPotentials {
    /// Create a matrix filled with a constant potential
    pub fn filled(n_states: usize, n_frames: usize, value: f64) -> Self {
        EmissionPotentials {
            n_states,
            n_frames,
            values: vec![value; n_states * n_frames],
        }
    }

    pub fn n_states(&self) -> usize {
        self.n_states
    }

    pub fn n_frames(&self) -> usize {
        self.n_frames
    }

    /// Potential of `state` at `frame`
    pub fn get(&self, state: usize, frame: usize) -> f64 {
        self.values[frame * self.n_states + state]
    }

    pub fn set(&mut self, state: usize, frame: usize, value: f64) {
        self.values[frame * self.n_states + state] = value;
    }

    /// All state potentials for one frame
    pub fn frame(&self, frame: usize) -> &[f64] {
        &self.values[frame * self.n_states..(frame + 1) * self.n_states]
    }
}

/// Build emission potentials for every frame of a contour
///
/// - Silence: `voiced_acc` on unvoiced frames, `1 - voiced_acc` otherwise
/// - Onset(k): `onset_acc` on detected onset frames, `1 - onset_acc` otherwise (pitch-agnostic)
/// - Sustain(k): `pitch_acc` on the estimated semitone, `pitch_acc * spread` one
///   semitone away, `1 - pitch_acc` elsewhere
pub fn build_emissions(
    contour: &PitchContour,
    onsets: &[usize],
    config: &EmissionConfig,
) -> EmissionPotentials {
    let n_frames = contour.len();
    let mut potentials = EmissionPotentials::filled(PitchRange::STATE_COUNT, n_frames, 0.0);

    let mut is_onset = vec![false; n_frames];
    for &frame in onsets {
        if frame < n_frames {
            is_onset[frame] = true;
        }
    }

    let onset_potential = |flagged: bool| {
        if flagged {
            config.onset_acc
        } else {
            1.0 - config.onset_acc
        }
    };

    for (i, frame) in contour.frames.iter().enumerate() {
        let silence = if frame.voiced {
            1.0 - config.voiced_acc
        } else {
            config.voiced_acc
        };
        potentials.set(NoteState::Silence.index(), i, silence);

        let estimated = estimated_midi(frame.frequency_hz, contour.tuning_offset);

        for k in 0..PitchRange::COUNT {
            potentials.set(NoteState::Onset(k).index(), i, onset_potential(is_onset[i]));

            let sustain = match estimated {
                Some(midi) => {
                    let distance = (PitchRange::midi(k) as i64 - midi).abs();
                    match distance {
                        0 => config.pitch_acc,
                        1 => config.pitch_acc * config.spread,
                        _ => 1.0 - config.pitch_acc,
                    }
                }
                None => 1.0 - config.pitch_acc,
            };
            potentials.set(NoteState::Sustain(k).index(), i, sustain);
        }
    }

    potentials
}

/// Nearest MIDI number for a frequency after removing the clip's tuning deviation
fn estimated_midi(frequency_hz: Option<f64>, tuning_offset: f64) -> Option<i64> {
    let f = frequency_hz.filter(|f| f.is_finite() && *f > 0.0)?;
    let midi = (hz_to_midi(f) - tuning_offset).round();
    if midi.is_finite() {
        Some(midi as i64)
    } else {
        None
    }
}
