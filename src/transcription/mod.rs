// Melody transcription module
// HMM note model over a pitch contour: onsets, transition and emission
// models, Viterbi decoding and note extraction

pub mod emission;
pub mod engine;
pub mod onset;
pub mod pianoroll;
pub mod transition;
pub mod types;
pub mod viterbi;

pub use emission::{build_emissions, EmissionConfig, EmissionPotentials};
pub use engine::{transcribe_contour, Transcriber, Transcription, TranscriptionError};
pub use onset::{detect_onsets, OnsetConfig};
pub use pianoroll::{states_to_pianoroll, Pianoroll, FALLBACK_VELOCITY};
pub use transition::TransitionMatrix;
pub use types::{hz_to_midi, note_name, Note, NoteState, PitchContour, PitchFrame, PitchRange};
pub use viterbi::decode;
