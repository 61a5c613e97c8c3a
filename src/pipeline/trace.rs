// Transcription run tracing
// Append-only JSONL record of each stage a transcription run passes through

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum TraceError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// Stages of a single transcription run, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    PitchTracking,
    Energy,
    OnsetDetection,
    TransitionModel,
    EmissionModel,
    Decoding,
    Pianoroll,
    Tempo,
    Quantization,
    Export,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::PitchTracking => "pitch_tracking",
            Stage::Energy => "energy",
            Stage::OnsetDetection => "onset_detection",
            Stage::TransitionModel => "transition_model",
            Stage::EmissionModel => "emission_model",
            Stage::Decoding => "decoding",
            Stage::Pianoroll => "pianoroll",
            Stage::Tempo => "tempo",
            Stage::Quantization => "quantization",
            Stage::Export => "export",
        }
    }
}

/// One line of the trace file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEntry {
    /// RFC 3339 timestamp
    pub timestamp: String,

    /// Run this entry belongs to
    pub run_id: Uuid,

    pub stage: Stage,

    /// Progress through the stage [0.0, 1.0]
    pub progress: f32,

    pub message: String,

    /// Stage counters such as frame or note counts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl TraceEntry {
    pub fn new(run_id: Uuid, stage: Stage, progress: f32, message: String) -> Self {
        TraceEntry {
            timestamp: Utc::now().to_rfc3339(),
            run_id,
            stage,
            progress: progress.clamp(0.0, 1.0),
            message,
            data: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Serialize as a single JSON line, newline included
    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        let json = serde_json::to_string(self)?;
        Ok(format!("{}\n", json))
    }
}

/// Appends entries for one run to a JSONL file
///
/// Every entry is also mirrored to the `log` facade at debug level, so a run
/// without a trace file still shows its stages under `-vv`.
#[derive(Debug, Clone)]
pub struct TraceWriter {
    run_id: Uuid,
    file_path: PathBuf,
}

impl TraceWriter {
    pub fn new(run_id: Uuid, file_path: PathBuf) -> Self {
        TraceWriter { run_id, file_path }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }

    /// Append an entry, creating the file on first write
    pub fn write(&self, entry: &TraceEntry) -> Result<(), TraceError> {
        log::debug!(
            "[{}] {} {:.0}%: {}",
            entry.run_id,
            entry.stage.as_str(),
            entry.progress * 100.0,
            entry.message
        );

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.file_path)?;

        let json_line = entry.to_json_line()?;
        file.write_all(json_line.as_bytes())?;
        file.flush()?;

        Ok(())
    }

    /// Record that a stage finished, with optional counters
    ///
    /// Trace failures never abort a run; they are logged and dropped.
    pub fn complete(&self, stage: Stage, message: impl Into<String>, data: Option<serde_json::Value>) {
        let mut entry = TraceEntry::new(self.run_id, stage, 1.0, message.into());
        entry.data = data;

        if let Err(e) = self.write(&entry) {
            log::warn!("Failed to write trace entry to {}: {}", self.file_path.display(), e);
        }
    }
}

/// Read every entry back from a JSONL trace file
pub fn read_trace_file(path: &Path) -> Result<Vec<TraceEntry>, TraceError> {
    let contents = std::fs::read_to_string(path)?;
    let mut entries = Vec::new();

    for line in contents.lines() {
        if line.trim().is_empty() {
            continue;
        }
        entries.push(serde_json::from_str(line)?);
    }

    Ok(entries)
}
