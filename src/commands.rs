// Application commands
// File-level operations behind the CLI: transcribe into the artifact store,
// list past runs, clean up
use serde::Serialize;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::audio;
use crate::export::{FailurePayload, MelodyDump};
use crate::pipeline::{BpmSource, TraceWriter, TranscriptionPool, TranscriptionRequest};
use crate::state::{self, ArtifactKind, ArtifactStore, RunManifest};

#[derive(Debug, Serialize)]
pub struct CommandError {
    message: String,
}

impl<E: std::fmt::Display> From<E> for CommandError {
    fn from(error: E) -> Self {
        CommandError {
            message: error.to_string(),
        }
    }
}

impl CommandError {
    pub fn message(&self) -> &str {
        &self.message
    }
}

pub type CommandResult<T> = Result<T, CommandError>;

#[derive(Debug, Clone, Default)]
pub struct TranscribeFileInput {
    pub path: PathBuf,

    /// Tempo for the MIDI file; estimated when absent
    pub bpm: Option<f64>,

    pub title: Option<String>,
    pub artist: Option<String>,

    /// Write a JSONL trace into the run directory
    pub trace: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct TranscribeFileResult {
    pub run_id: Uuid,
    pub midi_path: PathBuf,
    pub melody_path: PathBuf,
    pub manifest_path: PathBuf,
    pub notes: usize,
    pub bpm: f64,
    pub bpm_source: BpmSource,
}

/// Transcribe one WAV file and store its MIDI, melody payload and manifest
///
/// A failed run still leaves a manifest and an error payload behind.
pub async fn transcribe_file(
    pool: &TranscriptionPool,
    store: &ArtifactStore,
    input: TranscribeFileInput,
) -> CommandResult<TranscribeFileResult> {
    let bytes = tokio::fs::read(&input.path).await.map_err(|e| CommandError {
        message: format!("Failed to read {}: {}", input.path.display(), e),
    })?;

    let request_id = Uuid::new_v4();
    let mut manifest = RunManifest::new(
        request_id,
        input.path.display().to_string(),
        state::calculate_sha256(&bytes),
    );
    let stem = state::artifact_stem(input.title.as_deref(), input.artist.as_deref());

    match run_transcription(pool, store, &input, &bytes, request_id, &stem, &mut manifest).await {
        Ok(result) => Ok(result),
        Err(e) => {
            log::error!("Transcription of {} failed: {}", input.path.display(), e.message());
            manifest.fail(e.message());
            let payload = FailurePayload::new(e.message()).to_json()?;
            let artifact = store.store(
                &request_id,
                ArtifactKind::Melody,
                &format!("{}.json", stem),
                payload.as_bytes(),
            )?;
            manifest.artifacts.push(artifact);
            store.write_manifest(&manifest)?;
            Err(e)
        }
    }
}

async fn run_transcription(
    pool: &TranscriptionPool,
    store: &ArtifactStore,
    input: &TranscribeFileInput,
    bytes: &[u8],
    run_id: Uuid,
    stem: &str,
    manifest: &mut RunManifest,
) -> CommandResult<TranscribeFileResult> {
    let clip = audio::ingest_wav(bytes).map_err(|e| CommandError {
        message: format!("Failed to process audio file: {}", e),
    })?;

    log::info!(
        "Loaded {}: {} Hz, {} channels, {} bit, {:.2}s",
        input.path.display(),
        clip.sample_rate,
        clip.source_channels,
        clip.bit_depth,
        clip.duration_secs()
    );

    let trace = if input.trace {
        let path = store.run_dir(&run_id)?.join("trace.jsonl");
        Some(TraceWriter::new(run_id, path))
    } else {
        None
    };
    let trace_path = trace.as_ref().map(|t| t.path().to_path_buf());

    let mut request = TranscriptionRequest::new(clip).with_bpm(input.bpm);
    request.id = run_id;

    let output = pool.submit(request, trace).await?;

    let extension = pool.runner().writer().extension();
    let midi = store.store(
        &run_id,
        ArtifactKind::Midi,
        &format!("{}.{}", stem, extension),
        &output.midi,
    )?;

    let dump = MelodyDump::success(&output.transcription, output.bpm(), Some(&midi.path));
    let melody = store.store(
        &run_id,
        ArtifactKind::Melody,
        &format!("{}.json", stem),
        dump.to_json()?.as_bytes(),
    )?;

    let midi_path = midi.path.clone();
    let melody_path = melody.path.clone();
    manifest.bpm = Some(output.bpm());
    manifest.artifacts.push(midi);
    manifest.artifacts.push(melody);
    if let Some(path) = trace_path.filter(|p| p.exists()) {
        manifest.artifacts.push(fingerprint(ArtifactKind::Trace, &path)?);
    }
    let manifest_path = store.write_manifest(manifest)?;

    Ok(TranscribeFileResult {
        run_id,
        midi_path,
        melody_path,
        manifest_path,
        notes: output.track.notes.len(),
        bpm: output.bpm(),
        bpm_source: output.bpm_source,
    })
}

/// Record a file already written into a run directory
fn fingerprint(kind: ArtifactKind, path: &Path) -> CommandResult<state::Artifact> {
    let data = std::fs::read(path)?;
    Ok(state::Artifact {
        kind,
        path: path.to_path_buf(),
        sha256: state::calculate_sha256(&data),
        bytes: data.len() as u64,
    })
}

pub fn list_runs(store: &ArtifactStore) -> CommandResult<Vec<RunManifest>> {
    Ok(store.list_runs()?)
}

pub fn get_run(store: &ArtifactStore, id: &str) -> CommandResult<RunManifest> {
    let uuid = Uuid::parse_str(id)?;
    Ok(store.read_manifest(&uuid)?)
}

/// Delete every stored run
pub fn cleanup(store: &ArtifactStore) -> CommandResult<usize> {
    Ok(store.cleanup()?)
}
