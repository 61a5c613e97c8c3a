// Artifact store
// Per-run output directories holding MIDI files, result payloads and traces
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

use super::models::{Artifact, ArtifactKind, RunManifest};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Failed to get app data directory")]
    NoAppDataDir,
}

pub type StorageResult<T> = Result<T, StorageError>;

const MANIFEST_FILE: &str = "manifest.json";

/// Default output root under the platform data directory
pub fn default_root() -> StorageResult<PathBuf> {
    let data_dir = dirs::data_dir().ok_or(StorageError::NoAppDataDir)?;
    Ok(data_dir.join("melodia"))
}

/// File stem for a run's outputs
///
/// `"{title}_{artist}"` lowercased with spaces replaced by `_`; just the
/// title when there is no artist; `"transcribed"` without a title.
pub fn artifact_stem(title: Option<&str>, artist: Option<&str>) -> String {
    let title = title.map(str::trim).filter(|t| !t.is_empty());
    let artist = artist.map(str::trim).filter(|a| !a.is_empty());

    let raw = match (title, artist) {
        (Some(title), Some(artist)) => format!("{}_{}", title, artist),
        (Some(title), None) => title.to_string(),
        _ => return "transcribed".to_string(),
    };

    raw.chars()
        .map(|c| match c {
            ' ' | '/' | '\\' => '_',
            c => c,
        })
        .collect::<String>()
        .to_lowercase()
}

pub fn calculate_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Directory tree of `runs/<run id>/` folders under a root
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        ArtifactStore { root: root.into() }
    }

    /// Store rooted at the platform data directory
    pub fn open_default() -> StorageResult<Self> {
        Ok(Self::new(default_root()?))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn runs_dir(&self) -> PathBuf {
        self.root.join("runs")
    }

    /// Directory for a run, created on demand
    pub fn run_dir(&self, run_id: &Uuid) -> StorageResult<PathBuf> {
        let run_dir = self.runs_dir().join(run_id.to_string());
        fs::create_dir_all(&run_dir)?;
        Ok(run_dir)
    }

    /// Write bytes into a run directory and fingerprint them
    pub fn store(
        &self,
        run_id: &Uuid,
        kind: ArtifactKind,
        filename: &str,
        data: &[u8],
    ) -> StorageResult<Artifact> {
        let path = self.run_dir(run_id)?.join(filename);
        let mut file = fs::File::create(&path)?;
        file.write_all(data)?;

        log::debug!("Stored {:?} artifact {} ({} bytes)", kind, path.display(), data.len());

        Ok(Artifact {
            kind,
            path,
            sha256: calculate_sha256(data),
            bytes: data.len() as u64,
        })
    }

    pub fn write_manifest(&self, manifest: &RunManifest) -> StorageResult<PathBuf> {
        let path = self.run_dir(&manifest.run_id)?.join(MANIFEST_FILE);
        fs::write(&path, serde_json::to_vec_pretty(manifest)?)?;
        Ok(path)
    }

    pub fn read_manifest(&self, run_id: &Uuid) -> StorageResult<RunManifest> {
        let path = self.runs_dir().join(run_id.to_string()).join(MANIFEST_FILE);
        Ok(serde_json::from_slice(&fs::read(path)?)?)
    }

    /// Every run that has a readable manifest, oldest first
    pub fn list_runs(&self) -> StorageResult<Vec<RunManifest>> {
        let runs_dir = self.runs_dir();
        if !runs_dir.exists() {
            return Ok(Vec::new());
        }

        let mut manifests = Vec::new();
        for entry in fs::read_dir(&runs_dir)? {
            let path = entry?.path().join(MANIFEST_FILE);
            match fs::read(&path) {
                Ok(bytes) => match serde_json::from_slice::<RunManifest>(&bytes) {
                    Ok(manifest) => manifests.push(manifest),
                    Err(e) => log::warn!("Skipping unreadable manifest {}: {}", path.display(), e),
                },
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        manifests.sort_by_key(|m| m.created_at);
        Ok(manifests)
    }

    /// Remove every run directory, returning how many were removed
    pub fn cleanup(&self) -> StorageResult<usize> {
        let runs_dir = self.runs_dir();
        if !runs_dir.exists() {
            return Ok(0);
        }

        let mut removed = 0;
        for entry in fs::read_dir(&runs_dir)? {
            let path = entry?.path();
            if path.is_dir() {
                fs::remove_dir_all(&path)?;
            } else {
                fs::remove_file(&path)?;
            }
            removed += 1;
        }

        log::info!("Removed {} runs from {}", removed, runs_dir.display());
        Ok(removed)
    }
}
