// Run records for the artifact store
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Complete,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Midi,
    Melody,
    Trace,
}

/// A file written for a run, fingerprinted at write time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub kind: ArtifactKind,
    pub path: PathBuf,
    pub sha256: String,
    pub bytes: u64,
}

/// `manifest.json` kept in every run directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunManifest {
    pub run_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub status: RunStatus,

    /// Input file the run transcribed
    pub input_path: String,
    pub input_sha256: String,

    /// Tempo the MIDI file was written at
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bpm: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub artifacts: Vec<Artifact>,
}

impl RunManifest {
    pub fn new(run_id: Uuid, input_path: impl Into<String>, input_sha256: String) -> Self {
        RunManifest {
            run_id,
            created_at: Utc::now(),
            status: RunStatus::Complete,
            input_path: input_path.into(),
            input_sha256,
            bpm: None,
            error: None,
            artifacts: Vec::new(),
        }
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = RunStatus::Failed;
        self.error = Some(error.into());
    }

    pub fn artifact(&self, kind: ArtifactKind) -> Option<&Artifact> {
        self.artifacts.iter().find(|a| a.kind == kind)
    }
}
