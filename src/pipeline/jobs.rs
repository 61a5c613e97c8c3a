// Transcription jobs
// One clip in, quantized events and MIDI bytes out; a tokio pool bounds how
// many run at once

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::audio::AudioClip;
use crate::export::midi::{ExportError, NoteEventWriter, SmfWriter};
use crate::groove::quantize::{quantize_notes_with_fallback, EventTrack};
use crate::groove::tempo::{IoiTempoEstimator, TempoEstimator};
use crate::pipeline::trace::{Stage, TraceWriter};
use crate::transcription::engine::{Transcriber, Transcription, TranscriptionError};

#[derive(Debug, Error)]
pub enum JobError {
    #[error("Transcription failed: {0}")]
    Transcription(#[from] TranscriptionError),

    #[error("Export failed: {0}")]
    Export(#[from] ExportError),

    #[error("Job timed out after {0:?}")]
    TimedOut(Duration),

    #[error("Job panicked: {0}")]
    Panicked(String),

    #[error("Transcription pool is closed")]
    PoolClosed,
}

/// Where the tempo of a job's events came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BpmSource {
    Requested,
    Estimated,
    Default,
}

#[derive(Debug, Clone)]
pub struct TranscriptionRequest {
    pub id: Uuid,
    pub clip: AudioClip,

    /// Caller tempo; estimated from the audio when absent
    pub bpm: Option<f64>,
}

impl TranscriptionRequest {
    pub fn new(clip: AudioClip) -> Self {
        TranscriptionRequest {
            id: Uuid::new_v4(),
            clip,
            bpm: None,
        }
    }

    pub fn with_bpm(mut self, bpm: Option<f64>) -> Self {
        self.bpm = bpm;
        self
    }
}

#[derive(Debug, Clone)]
pub struct TranscriptionOutput {
    pub id: Uuid,
    pub transcription: Transcription,
    pub track: EventTrack,
    pub bpm_source: BpmSource,

    /// Encoded track, produced by the job's `NoteEventWriter`
    pub midi: Vec<u8>,
}

impl TranscriptionOutput {
    pub fn bpm(&self) -> f64 {
        self.track.bpm()
    }
}

/// Runs one request end to end on the calling thread
#[derive(Clone)]
pub struct JobRunner {
    transcriber: Transcriber,
    tempo: Arc<dyn TempoEstimator>,
    writer: Arc<dyn NoteEventWriter>,
}

impl JobRunner {
    /// Runner with audio tempo estimation and the default MIDI writer
    pub fn new(transcriber: Transcriber) -> Self {
        JobRunner {
            transcriber,
            tempo: Arc::new(IoiTempoEstimator::default()),
            writer: Arc::new(SmfWriter::default()),
        }
    }

    pub fn with_tempo_estimator(mut self, tempo: Arc<dyn TempoEstimator>) -> Self {
        self.tempo = tempo;
        self
    }

    pub fn with_writer(mut self, writer: Arc<dyn NoteEventWriter>) -> Self {
        self.writer = writer;
        self
    }

    pub fn transcriber(&self) -> &Transcriber {
        &self.transcriber
    }

    pub fn writer(&self) -> &dyn NoteEventWriter {
        self.writer.as_ref()
    }

    /// Caller tempo wins; otherwise estimate; otherwise the configured default
    fn choose_bpm(&self, requested: Option<f64>, clip: &AudioClip) -> (f64, BpmSource) {
        let default_bpm = self.transcriber.config().default_bpm;
        let usable = |bpm: f64| bpm.is_finite() && bpm > 0.0;

        match requested {
            Some(bpm) if usable(bpm) => (bpm, BpmSource::Requested),
            Some(bpm) => {
                log::warn!("Requested tempo {} BPM is unusable, using {}", bpm, default_bpm);
                (default_bpm, BpmSource::Default)
            }
            None => match self.tempo.estimate(&clip.samples, clip.sample_rate) {
                Some(bpm) if usable(bpm) => (bpm, BpmSource::Estimated),
                _ => {
                    log::info!("No tempo estimate for the clip, using {} BPM", default_bpm);
                    (default_bpm, BpmSource::Default)
                }
            },
        }
    }

    pub fn run(
        &self,
        request: &TranscriptionRequest,
        trace: Option<&TraceWriter>,
    ) -> Result<TranscriptionOutput, JobError> {
        let transcription = self.transcriber.transcribe(&request.clip, trace)?;

        let (bpm, bpm_source) = self.choose_bpm(request.bpm, &request.clip);
        if let Some(writer) = trace {
            writer.complete(
                Stage::Tempo,
                format!("Using {:.1} BPM", bpm),
                Some(serde_json::json!({ "bpm": bpm, "source": bpm_source })),
            );
        }

        let track =
            quantize_notes_with_fallback(&transcription.notes, bpm, self.transcriber.config().default_bpm);
        if let Some(writer) = trace {
            writer.complete(
                Stage::Quantization,
                format!("Placed {} note events", track.notes.len()),
                Some(serde_json::json!({ "events": track.notes.len() })),
            );
        }

        let midi = self.writer.write(&track)?;
        if let Some(writer) = trace {
            writer.complete(
                Stage::Export,
                "Encoded MIDI",
                Some(serde_json::json!({ "bytes": midi.len() })),
            );
        }

        log::info!(
            "Job {} finished: {} notes at {:.1} BPM ({:?})",
            request.id,
            track.notes.len(),
            bpm,
            bpm_source
        );

        Ok(TranscriptionOutput {
            id: request.id,
            transcription,
            track,
            bpm_source,
            midi,
        })
    }
}

/// Runs jobs on tokio's blocking pool, at most `max_concurrent` at a time
///
/// A timed-out job is reported as failed; its blocking task keeps its permit
/// until the computation actually returns, and the result is discarded.
#[derive(Clone)]
pub struct TranscriptionPool {
    runner: Arc<JobRunner>,
    permits: Arc<Semaphore>,
    max_concurrent: usize,
    timeout: Option<Duration>,
}

impl TranscriptionPool {
    pub fn new(runner: JobRunner, max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        TranscriptionPool {
            runner: Arc::new(runner),
            permits: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Available hardware parallelism, 1 when unknown
    pub fn default_parallelism() -> usize {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    pub fn runner(&self) -> &JobRunner {
        &self.runner
    }

    pub async fn submit(
        &self,
        request: TranscriptionRequest,
        trace: Option<TraceWriter>,
    ) -> Result<TranscriptionOutput, JobError> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| JobError::PoolClosed)?;

        let runner = Arc::clone(&self.runner);
        let handle = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            runner.run(&request, trace.as_ref())
        });

        let joined = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    log::warn!("Transcription job exceeded {:?}", limit);
                    return Err(JobError::TimedOut(limit));
                }
            },
            None => handle.await,
        };

        joined.map_err(|e| JobError::Panicked(e.to_string()))?
    }

    /// Submit every request concurrently; results come back in request order
    pub async fn run_all(
        &self,
        requests: Vec<(TranscriptionRequest, Option<TraceWriter>)>,
    ) -> Vec<Result<TranscriptionOutput, JobError>> {
        let handles: Vec<_> = requests
            .into_iter()
            .map(|(request, trace)| {
                let pool = self.clone();
                tokio::spawn(async move { pool.submit(request, trace).await })
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            results.push(match handle.await {
                Ok(result) => result,
                Err(e) => Err(JobError::Panicked(e.to_string())),
            });
        }
        results
    }

    /// Stop accepting jobs; queued submissions fail with `PoolClosed`
    pub fn close(&self) {
        self.permits.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{EnergyProfileSource, PitchContourSource, RmsEnergySource, SourceError};
    use crate::config::TranscriptionConfig;
    use crate::export::midi::read_event_track;
    use crate::transcription::types::{PitchContour, PitchFrame};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// A4 between frames 50 and 100, optionally slow, counting concurrent calls
    struct StepSource {
        delay: Duration,
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    impl StepSource {
        fn new(delay: Duration) -> Self {
            StepSource {
                delay,
                active: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }
    }

    impl PitchContourSource for StepSource {
        fn contour(&self, samples: &[f32], _: u32, _: usize, hop: usize) -> Result<PitchContour, SourceError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            self.active.fetch_sub(1, Ordering::SeqCst);

            let n_frames = 1 + samples.len() / hop;
            Ok(PitchContour::new(
                (0..n_frames)
                    .map(|i| {
                        if (50..100).contains(&i) {
                            PitchFrame::voiced(440.0)
                        } else {
                            PitchFrame::unvoiced()
                        }
                    })
                    .collect(),
            ))
        }
    }

    struct StepEnergy;

    impl EnergyProfileSource for StepEnergy {
        fn rms(&self, samples: &[f32], _: usize, hop: usize) -> Result<Vec<f64>, SourceError> {
            let n_frames = 1 + samples.len() / hop;
            Ok((0..n_frames)
                .map(|i| if (50..100).contains(&i) { 0.3 } else { 0.0 })
                .collect())
        }
    }

    struct FixedTempo(Option<f64>);

    impl TempoEstimator for FixedTempo {
        fn estimate(&self, _: &[f32], _: u32) -> Option<f64> {
            self.0
        }
    }

    fn runner(source: Arc<StepSource>) -> JobRunner {
        let transcriber =
            Transcriber::with_sources(TranscriptionConfig::default(), source, Arc::new(StepEnergy)).unwrap();
        JobRunner::new(transcriber)
    }

    fn clip() -> AudioClip {
        AudioClip::from_mono(vec![0.0; 150 * 512], 22050)
    }

    #[test]
    fn test_run_with_requested_bpm() {
        let runner = runner(Arc::new(StepSource::new(Duration::ZERO)));
        let request = TranscriptionRequest::new(clip()).with_bpm(Some(90.0));

        let output = runner.run(&request, None).unwrap();
        assert_eq!(output.id, request.id);
        assert_eq!(output.bpm_source, BpmSource::Requested);
        assert_eq!(output.bpm(), 90.0);
        assert_eq!(output.track.notes.len(), 1);
        assert_eq!(output.track.notes[0].pitch, 69);

        let parsed = read_event_track(&output.midi).unwrap();
        assert_eq!(parsed.notes.len(), 1);
        assert!((parsed.bpm() - 90.0).abs() < 1e-3);
    }

    #[test]
    fn test_bpm_fallbacks() {
        let source = Arc::new(StepSource::new(Duration::ZERO));

        let output = runner(source.clone())
            .run(&TranscriptionRequest::new(clip()).with_bpm(Some(-5.0)), None)
            .unwrap();
        assert_eq!(output.bpm_source, BpmSource::Default);
        assert_eq!(output.bpm(), 120.0);

        // A silent clip has no spectral flux onsets
        let output = runner(source.clone())
            .run(&TranscriptionRequest::new(clip()), None)
            .unwrap();
        assert_eq!(output.bpm_source, BpmSource::Default);

        let output = runner(source)
            .with_tempo_estimator(Arc::new(FixedTempo(Some(100.0))))
            .run(&TranscriptionRequest::new(clip()), None)
            .unwrap();
        assert_eq!(output.bpm_source, BpmSource::Estimated);
        assert_eq!(output.bpm(), 100.0);
    }

    #[test]
    fn test_configured_default_bpm() {
        let config = TranscriptionConfig {
            default_bpm: 90.0,
            ..TranscriptionConfig::default()
        };
        let transcriber = Transcriber::with_sources(
            config,
            Arc::new(StepSource::new(Duration::ZERO)),
            Arc::new(StepEnergy),
        )
        .unwrap();

        let output = JobRunner::new(transcriber)
            .run(&TranscriptionRequest::new(clip()), None)
            .unwrap();
        assert_eq!(output.bpm_source, BpmSource::Default);
        assert_eq!(output.bpm(), 90.0);
        assert_eq!(output.track.tempo.bpm, 90.0);
    }

    #[test]
    fn test_upstream_error_fails_job() {
        let transcriber = Transcriber::with_sources(
            TranscriptionConfig::default(),
            Arc::new(StepSource::new(Duration::ZERO)),
            Arc::new(RmsEnergySource),
        )
        .unwrap();
        // RMS source rejects an empty buffer
        let result = JobRunner::new(transcriber).run(
            &TranscriptionRequest::new(AudioClip::from_mono(Vec::new(), 22050)),
            None,
        );
        assert!(matches!(result, Err(JobError::Transcription(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_pool_bounds_concurrency() {
        let source = Arc::new(StepSource::new(Duration::from_millis(40)));
        let pool = TranscriptionPool::new(runner(source.clone()), 2);

        let requests = (0..6)
            .map(|_| (TranscriptionRequest::new(clip()).with_bpm(Some(120.0)), None))
            .collect();
        let results = pool.run_all(requests).await;

        assert_eq!(results.len(), 6);
        assert!(results.iter().all(|r| r.is_ok()));
        assert!(source.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_pool_timeout() {
        let source = Arc::new(StepSource::new(Duration::from_millis(300)));
        let pool = TranscriptionPool::new(runner(source), 1)
            .with_timeout(Some(Duration::from_millis(20)));

        let result = pool.submit(TranscriptionRequest::new(clip()), None).await;
        assert!(matches!(result, Err(JobError::TimedOut(_))));
    }

    #[tokio::test]
    async fn test_closed_pool_rejects_jobs() {
        let pool = TranscriptionPool::new(runner(Arc::new(StepSource::new(Duration::ZERO))), 1);
        pool.close();

        let result = pool.submit(TranscriptionRequest::new(clip()), None).await;
        assert!(matches!(result, Err(JobError::PoolClosed)));
    }

    #[test]
    fn test_zero_concurrency_is_raised_to_one() {
        let pool = TranscriptionPool::new(runner(Arc::new(StepSource::new(Duration::ZERO))), 0);
        assert_eq!(pool.max_concurrent(), 1);
        assert!(TranscriptionPool::default_parallelism() >= 1);
    }
}
