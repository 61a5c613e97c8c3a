// Melody result payload
// JSON document written next to the MIDI file: status, notes, contour, tempo

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::export::midi::ExportError;
use crate::transcription::engine::Transcription;
use crate::transcription::types::Note;

/// A note as it appears in the result payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteSummary {
    pub onset: f64,
    pub offset: f64,
    pub pitch: u8,
    /// Scientific pitch name, e.g. "A4"
    pub name: String,
    pub velocity: u8,
}

impl From<&Note> for NoteSummary {
    fn from(note: &Note) -> Self {
        NoteSummary {
            onset: note.onset_secs,
            offset: note.offset_secs,
            pitch: note.pitch,
            name: note.name(),
            velocity: note.velocity,
        }
    }
}

/// Result payload for one transcription run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MelodyDump {
    pub status: String,

    /// Where the MIDI file was written, if it was
    pub midi_path: Option<String>,

    /// Per-frame melody contour in Hz
    pub melody: Vec<f64>,

    pub notes: Vec<NoteSummary>,

    /// Tempo the events were quantized at
    pub bpm: f64,

    /// Seconds between melody frames
    pub hop_secs: f64,
}

impl MelodyDump {
    pub fn success(transcription: &Transcription, bpm: f64, midi_path: Option<&Path>) -> Self {
        MelodyDump {
            status: "success".to_string(),
            midi_path: midi_path.map(|p| p.display().to_string()),
            melody: transcription.melody.clone(),
            notes: transcription.notes.iter().map(NoteSummary::from).collect(),
            bpm,
            hop_secs: transcription.hop_secs,
        }
    }

    pub fn to_json(&self) -> Result<String, ExportError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, ExportError> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Payload written in place of `MelodyDump` when a run fails
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailurePayload {
    pub status: String,
    pub message: String,
}

impl FailurePayload {
    pub fn new(message: impl Into<String>) -> Self {
        FailurePayload {
            status: "error".to_string(),
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> Result<String, ExportError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
