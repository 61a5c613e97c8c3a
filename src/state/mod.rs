// State module
// Run directories, artifact fingerprints and run manifests on disk

pub mod models;
pub mod storage;

pub use models::{Artifact, ArtifactKind, RunManifest, RunStatus};
pub use storage::{artifact_stem, calculate_sha256, default_root, ArtifactStore, StorageError, StorageResult};
