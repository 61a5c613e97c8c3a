// State path to pianoroll
// Walks the decoded note-state path and emits discrete notes plus a
// frame-aligned melody contour

use serde::{Deserialize, Serialize};

use crate::transcription::engine::TranscriptionError;
use crate::transcription::types::{Note, NoteState, PitchRange};

/// Velocity used when the clip's RMS range is degenerate
pub const FALLBACK_VELOCITY: u8 = 100;

/// Smallest RMS range treated as non-degenerate
const MIN_RMS_RANGE: f64 = 1e-12;

/// Notes and per-frame melody decoded from a state path
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Pianoroll {
    /// Time-ordered, non-overlapping notes
    pub notes: Vec<Note>,

    /// One frequency per frame: the active note's pitch in Hz, 0 during silence
    pub melody: Vec<f64>,
}

/// Per-note phase of the path walker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Silence,
    Onset,
    Sustain,
}

/// Note being accumulated while walking the path
#[derive(Debug, Clone, Copy)]
struct OpenNote {
    start_frame: usize,
    pitch_index: usize,
    rms_sum: f64,
    rms_frames: usize,
}

impl OpenNote {
    fn start(frame: usize, pitch_index: usize, rms: f64) -> Self {
        OpenNote {
            start_frame: frame,
            pitch_index,
            rms_sum: rms,
            rms_frames: 1,
        }
    }

    fn mean_rms(&self) -> f64 {
        self.rms_sum / self.rms_frames as f64
    }
}

/// Clip-wide min-max mapping from mean RMS to MIDI velocity
#[derive(Debug, Clone, Copy)]
struct VelocityScale {
    min: f64,
    range: Option<f64>,
    fallback: u8,
}

impl VelocityScale {
    fn from_rms(rms: &[f64], fallback: u8) -> Self {
        let finite = rms.iter().copied().filter(|v| v.is_finite());
        let min = finite.clone().fold(f64::INFINITY, f64::min);
        let max = finite.fold(f64::NEG_INFINITY, f64::max);

        let range = max - min;
        let range = if range.is_finite() && range > MIN_RMS_RANGE {
            Some(range)
        } else {
            None
        };

        VelocityScale { min, range, fallback }
    }

    fn velocity(&self, mean_rms: f64) -> u8 {
        match self.range {
            Some(range) if mean_rms.is_finite() => {
                let scaled = (mean_rms - self.min) * 127.0 / range;
                scaled.clamp(0.0, 127.0) as u8
            }
            _ => self.fallback,
        }
    }
}

/// Convert a decoded state path into notes and a melody contour
///
/// A trailing Silence frame is implied after the path so a note still
/// sounding at the end closes at `path.len() * hop_secs`.
pub fn states_to_pianoroll(
    path: &[NoteState],
    rms: &[f64],
    hop_secs: f64,
    fallback_velocity: u8,
) -> Result<Pianoroll, TranscriptionError> {
    if rms.len() != path.len() {
        return Err(TranscriptionError::FrameCountMismatch {
            pitch_frames: path.len(),
            energy_frames: rms.len(),
        });
    }

    let scale = VelocityScale::from_rms(rms, fallback_velocity);
    if scale.range.is_none() && !path.is_empty() {
        log::debug!("Degenerate RMS range, using fallback velocity {}", fallback_velocity);
    }

    let mut notes = Vec::new();
    let mut melody = Vec::with_capacity(path.len());
    let mut phase = Phase::Silence;
    let mut open: Option<OpenNote> = None;

    let close = |note: OpenNote, frame: usize, notes: &mut Vec<Note>| {
        notes.push(Note {
            onset_secs: note.start_frame as f64 * hop_secs,
            offset_secs: frame as f64 * hop_secs,
            pitch: PitchRange::midi(note.pitch_index),
            velocity: scale.velocity(note.mean_rms()),
        });
    };

    for i in 0..=path.len() {
        let state = path.get(i).copied().unwrap_or(NoteState::Silence);
        let frame_rms = rms.get(i).copied().unwrap_or(0.0);

        match (phase, state) {
            (Phase::Silence, NoteState::Onset(k)) => {
                open = Some(OpenNote::start(i, k, frame_rms));
                phase = Phase::Onset;
            }
            (Phase::Silence, _) => {}
            (Phase::Onset | Phase::Sustain, NoteState::Onset(k)) => {
                if let Some(note) = open.take() {
                    close(note, i, &mut notes);
                }
                open = Some(OpenNote::start(i, k, frame_rms));
                phase = Phase::Onset;
            }
            (Phase::Onset | Phase::Sustain, NoteState::Silence) => {
                if let Some(note) = open.take() {
                    close(note, i, &mut notes);
                }
                phase = Phase::Silence;
            }
            (Phase::Onset | Phase::Sustain, NoteState::Sustain(_)) => {
                if let Some(note) = open.as_mut() {
                    note.rms_sum += frame_rms;
                    note.rms_frames += 1;
                }
                phase = Phase::Sustain;
            }
        }

        if i < path.len() {
            let value = open
                .map(|note| PitchRange::frequency(note.pitch_index))
                .unwrap_or(0.0);
            melody.push(if value.is_finite() { value } else { 0.0 });
        }
    }

    Ok(Pianoroll { notes, melody })
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOP: f64 = 512.0 / 22050.0;

    fn single_note_path(lead: usize, k: usize, sustain: usize, tail: usize) -> Vec<NoteState> {
        let mut path = vec![NoteState::Silence; lead];
        path.push(NoteState::Onset(k));
        path.extend(std::iter::repeat(NoteState::Sustain(k)).take(sustain));
        path.extend(std::iter::repeat(NoteState::Silence).take(tail));
        path
    }

    #[test]
    fn test_single_note_round_trip() {
        let k = 20;
        let path = single_note_path(10, k, 15, 5);
        let rms: Vec<f64> = (0..path.len()).map(|i| i as f64 * 0.01).collect();

        let roll = states_to_pianoroll(&path, &rms, HOP, FALLBACK_VELOCITY).unwrap();

        assert_eq!(roll.notes.len(), 1);
        let note = &roll.notes[0];
        assert!((note.onset_secs - 10.0 * HOP).abs() < 1e-12);
        assert!((note.offset_secs - 26.0 * HOP).abs() < 1e-12);
        assert_eq!(note.pitch_index(), Some(k));
        assert_eq!(note.pitch, PitchRange::midi(k));
    }

    #[test]
    fn test_melody_contour_alignment() {
        let k = 33;
        let path = single_note_path(3, k, 2, 2);
        let rms = vec![0.1; path.len()];

        let roll = states_to_pianoroll(&path, &rms, HOP, FALLBACK_VELOCITY).unwrap();

        assert_eq!(roll.melody.len(), path.len());
        assert_eq!(&roll.melody[..3], &[0.0, 0.0, 0.0]);
        assert!(roll.melody[3..6].iter().all(|&f| (f - 440.0).abs() < 1e-9));
        assert_eq!(&roll.melody[6..], &[0.0, 0.0]);
    }

    #[test]
    fn test_note_open_at_end_closes_at_clip_end() {
        let path = single_note_path(2, 5, 4, 0);
        let rms = vec![0.2; path.len()];

        let roll = states_to_pianoroll(&path, &rms, HOP, FALLBACK_VELOCITY).unwrap();

        assert_eq!(roll.notes.len(), 1);
        assert!((roll.notes[0].offset_secs - path.len() as f64 * HOP).abs() < 1e-12);
    }

    #[test]
    fn test_back_to_back_notes_have_no_gap() {
        let mut path = single_note_path(2, 10, 3, 0);
        path.push(NoteState::Onset(12));
        path.extend(std::iter::repeat(NoteState::Sustain(12)).take(3));
        path.push(NoteState::Silence);
        let rms = vec![0.3; path.len()];

        let roll = states_to_pianoroll(&path, &rms, HOP, FALLBACK_VELOCITY).unwrap();

        assert_eq!(roll.notes.len(), 2);
        assert_eq!(roll.notes[0].offset_secs, roll.notes[1].onset_secs);
        assert_eq!(roll.notes[1].pitch, PitchRange::midi(12));
    }

    #[test]
    fn test_notes_are_ordered_and_non_overlapping() {
        let mut path = Vec::new();
        for k in [3, 7, 7, 20, 48, 0] {
            path.push(NoteState::Onset(k));
            path.extend(std::iter::repeat(NoteState::Sustain(k)).take(k % 4 + 1));
            if k % 2 == 0 {
                path.push(NoteState::Silence);
            }
        }
        let rms: Vec<f64> = (0..path.len()).map(|i| ((i * 7) % 11) as f64).collect();

        let roll = states_to_pianoroll(&path, &rms, HOP, FALLBACK_VELOCITY).unwrap();

        assert_eq!(roll.notes.len(), 6);
        for note in &roll.notes {
            assert!(note.offset_secs > note.onset_secs);
            assert!(note.velocity <= 127);
        }
        for pair in roll.notes.windows(2) {
            assert!(pair[0].offset_secs <= pair[1].onset_secs);
        }
    }

    #[test]
    fn test_velocity_uses_whole_note_energy() {
        // Clip RMS spans [0, 1]; the note covers frames with RMS 0.5 and 1.0
        let path = vec![
            NoteState::Silence,
            NoteState::Onset(4),
            NoteState::Sustain(4),
            NoteState::Silence,
        ];
        let rms = vec![0.0, 0.5, 1.0, 0.0];

        let roll = states_to_pianoroll(&path, &rms, HOP, FALLBACK_VELOCITY).unwrap();

        // mean 0.75 -> 95.25 -> 95
        assert_eq!(roll.notes[0].velocity, 95);
    }

    #[test]
    fn test_degenerate_rms_uses_fallback_velocity() {
        let path = single_note_path(1, 2, 3, 1);
        let rms = vec![0.4; path.len()];

        let roll = states_to_pianoroll(&path, &rms, HOP, FALLBACK_VELOCITY).unwrap();
        assert_eq!(roll.notes[0].velocity, 100);
    }

    #[test]
    fn test_orphan_sustain_is_ignored() {
        let path = vec![NoteState::Silence, NoteState::Sustain(3), NoteState::Silence];
        let rms = vec![0.0, 1.0, 0.0];

        let roll = states_to_pianoroll(&path, &rms, HOP, FALLBACK_VELOCITY).unwrap();
        assert!(roll.notes.is_empty());
        assert_eq!(roll.melody, vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_frame_count_mismatch_is_rejected() {
        let path = vec![NoteState::Silence; 4];
        let rms = vec![0.0; 3];

        assert!(matches!(
            states_to_pianoroll(&path, &rms, HOP, FALLBACK_VELOCITY),
            Err(TranscriptionError::FrameCountMismatch { .. })
        ));
    }
}
