// Note to event conversion
// Expresses note timing in quarter-note units at a fixed tempo

use serde::{Deserialize, Serialize};

use crate::transcription::types::Note;

/// Tempo used when none is supplied or the supplied one is unusable
pub const DEFAULT_BPM: f64 = 120.0;

/// Tempo change at a position in quarter notes
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TempoMarker {
    /// Position in quarter notes
    pub position: f64,
    pub bpm: f64,
}

/// A note placed in musical time
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NoteEvent {
    /// Start, in quarter notes from the beginning
    pub position: f64,

    /// Length in quarter notes
    pub duration: f64,

    /// MIDI note number
    pub pitch: u8,

    /// MIDI velocity [0, 127]
    pub velocity: u8,
}

/// One monophonic track: a tempo marker at 0 and the notes in order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventTrack {
    pub tempo: TempoMarker,
    pub notes: Vec<NoteEvent>,
}

impl EventTrack {
    pub fn bpm(&self) -> f64 {
        self.tempo.bpm
    }

    /// End of the last note, in quarter notes
    pub fn length_quarters(&self) -> f64 {
        self.notes
            .iter()
            .map(|n| n.position + n.duration)
            .fold(0.0, f64::max)
    }
}

/// Replace a non-positive or non-finite tempo with `fallback`
pub fn resolve_bpm(bpm: f64, fallback: f64) -> f64 {
    if bpm.is_finite() && bpm > 0.0 {
        bpm
    } else {
        log::warn!("Unusable tempo {} BPM, falling back to {}", bpm, fallback);
        fallback
    }
}

/// Convert notes in seconds to events in quarter notes
///
/// One event per note, order preserved. An unusable `bpm` is replaced by
/// `DEFAULT_BPM`.
pub fn quantize_notes(notes: &[Note], bpm: f64) -> EventTrack {
    quantize_notes_with_fallback(notes, bpm, DEFAULT_BPM)
}

/// As `quantize_notes`, with the tempo used when `bpm` is unusable
pub fn quantize_notes_with_fallback(notes: &[Note], bpm: f64, fallback_bpm: f64) -> EventTrack {
    let bpm = resolve_bpm(bpm, fallback_bpm);
    let quarter = 60.0 / bpm;

    let events = notes
        .iter()
        .map(|note| NoteEvent {
            position: note.onset_secs / quarter,
            duration: (note.offset_secs - note.onset_secs) / quarter,
            pitch: note.pitch,
            velocity: note.velocity,
        })
        .collect();

    EventTrack {
        tempo: TempoMarker { position: 0.0, bpm },
        notes: events,
    }
}
