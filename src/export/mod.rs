// Export module
// MIDI file writing and the JSON result payload

pub mod contour;
pub mod midi;

pub use contour::{FailurePayload, MelodyDump, NoteSummary};
pub use midi::{read_event_track, ExportError, MidiExportOptions, NoteEventWriter, SmfWriter};
