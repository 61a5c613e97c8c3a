// Pipeline module
// Job execution, bounded concurrency and per-run tracing

pub mod jobs;
pub mod trace;

pub use jobs::{BpmSource, JobError, JobRunner, TranscriptionOutput, TranscriptionPool, TranscriptionRequest};
pub use trace::{read_trace_file, Stage, TraceEntry, TraceError, TraceWriter};
