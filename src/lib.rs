// Melodia - Vocal melody to MIDI transcriber
// Module declarations

pub mod audio;
pub mod commands;
pub mod config;
pub mod export;
pub mod groove;
pub mod pipeline;
pub mod state;
pub mod transcription;

pub use audio::{ingest_wav, ingest_wav_file, AudioClip, AudioError};
pub use config::{ConfigError, TranscriptionConfig};
pub use export::{read_event_track, ExportError, MelodyDump, NoteEventWriter, SmfWriter};
pub use groove::{quantize_notes, EventTrack, NoteEvent, TempoEstimator};
pub use pipeline::{JobError, JobRunner, TranscriptionPool, TranscriptionRequest};
pub use transcription::{Note, NoteState, PitchContour, Transcriber, Transcription, TranscriptionError};
