// Groove module
// Audio tempo estimation and conversion of notes into musical time

pub mod quantize;
pub mod tempo;

pub use quantize::{
    quantize_notes, quantize_notes_with_fallback, resolve_bpm, EventTrack, NoteEvent, TempoMarker,
    DEFAULT_BPM,
};
pub use tempo::{IoiTempoEstimator, TempoConfig, TempoEstimate, TempoEstimator};
