// Transcription engine
// Runs pitch tracking, onset detection, HMM decoding and note extraction
// for one clip

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::audio::frames::SourceError;
use crate::audio::{AudioClip, EnergyProfileSource, PitchContourSource, RmsEnergySource, YinPitchSource};
use crate::config::{ConfigError, TranscriptionConfig};
use crate::pipeline::trace::{Stage, TraceWriter};
use crate::transcription::emission::build_emissions;
use crate::transcription::onset::detect_onsets;
use crate::transcription::pianoroll::states_to_pianoroll;
use crate::transcription::transition::TransitionMatrix;
use crate::transcription::types::{Note, PitchContour};
use crate::transcription::viterbi::decode;

#[derive(Debug, Error)]
pub enum TranscriptionError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("{collaborator} failed: {cause}")]
    Upstream {
        collaborator: &'static str,
        #[source]
        cause: SourceError,
    },

    #[error("Pitch contour has {pitch_frames} frames but energy profile has {energy_frames}")]
    FrameCountMismatch {
        pitch_frames: usize,
        energy_frames: usize,
    },

    #[error("Transition model has {transition_states} states but emissions have {emission_states}")]
    DimensionMismatch {
        transition_states: usize,
        emission_states: usize,
    },
}

/// Result of transcribing one clip
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transcription {
    /// Time-ordered, non-overlapping notes
    pub notes: Vec<Note>,

    /// Per-frame frequency of the active note, 0 during silence
    pub melody: Vec<f64>,

    /// Frames flagged by the onset detector
    pub onsets: Vec<usize>,

    /// Tuning deviation reported by the pitch source, in semitones
    pub tuning_offset: f64,

    /// Seconds between frames
    pub hop_secs: f64,
}

impl Transcription {
    pub fn frame_count(&self) -> usize {
        self.melody.len()
    }

    /// Note onset times, as fed to tempo estimation
    pub fn onset_times(&self) -> Vec<f64> {
        self.notes.iter().map(|n| n.onset_secs).collect()
    }
}

/// Decode notes from an already-computed contour and energy profile
///
/// This is the pure core of the engine; `Transcriber` wraps it with the
/// audio collaborators.
pub fn transcribe_contour(
    contour: &PitchContour,
    rms: &[f64],
    hop_secs: f64,
    config: &TranscriptionConfig,
    trace: Option<&TraceWriter>,
) -> Result<Transcription, TranscriptionError> {
    if contour.len() != rms.len() {
        return Err(TranscriptionError::FrameCountMismatch {
            pitch_frames: contour.len(),
            energy_frames: rms.len(),
        });
    }

    let onsets = detect_onsets(&contour.frequencies_or_zero(), &config.onset);
    log::debug!("Detected {} onsets over {} frames", onsets.len(), contour.len());
    stage_done(
        trace,
        Stage::OnsetDetection,
        format!("Detected {} onsets", onsets.len()),
        serde_json::json!({ "onsets": onsets.len() }),
    );

    let transitions = TransitionMatrix::build(config.p_stay_note, config.p_stay_silence);
    stage_done(
        trace,
        Stage::TransitionModel,
        "Built transition model",
        serde_json::json!({
            "states": transitions.n_states(),
            "nonzero": transitions.nonzero_count(),
        }),
    );

    let emissions = build_emissions(contour, &onsets, &config.emission);
    stage_done(
        trace,
        Stage::EmissionModel,
        "Built emission model",
        serde_json::json!({ "frames": emissions.n_frames() }),
    );

    let path = decode(&transitions, &emissions)?;
    stage_done(
        trace,
        Stage::Decoding,
        "Decoded state path",
        serde_json::json!({ "frames": path.len() }),
    );

    let pianoroll = states_to_pianoroll(&path, rms, hop_secs, config.fallback_velocity)?;
    stage_done(
        trace,
        Stage::Pianoroll,
        format!("Extracted {} notes", pianoroll.notes.len()),
        serde_json::json!({ "notes": pianoroll.notes.len() }),
    );

    Ok(Transcription {
        notes: pianoroll.notes,
        melody: pianoroll.melody,
        onsets,
        tuning_offset: contour.tuning_offset,
        hop_secs,
    })
}

/// Transcription engine bound to its pitch and energy collaborators
#[derive(Clone)]
pub struct Transcriber {
    config: TranscriptionConfig,
    pitch: Arc<dyn PitchContourSource>,
    energy: Arc<dyn EnergyProfileSource>,
}

impl std::fmt::Debug for Transcriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transcriber")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Transcriber {
    /// Engine using the built-in YIN and RMS sources
    pub fn new(config: TranscriptionConfig) -> Result<Self, TranscriptionError> {
        let pitch = Arc::new(YinPitchSource::with_config(config.yin.clone()));
        Self::with_sources(config, pitch, Arc::new(RmsEnergySource))
    }

    /// Engine using caller-supplied collaborators
    pub fn with_sources(
        config: TranscriptionConfig,
        pitch: Arc<dyn PitchContourSource>,
        energy: Arc<dyn EnergyProfileSource>,
    ) -> Result<Self, TranscriptionError> {
        config.validate()?;
        Ok(Transcriber { config, pitch, energy })
    }

    pub fn config(&self) -> &TranscriptionConfig {
        &self.config
    }

    /// Transcribe a mono clip into notes and a melody contour
    pub fn transcribe(
        &self,
        clip: &AudioClip,
        trace: Option<&TraceWriter>,
    ) -> Result<Transcription, TranscriptionError> {
        let frame_length = self.config.frame_length;
        let hop_length = self.config.hop_length;

        log::info!(
            "Transcribing {:.2}s of audio at {} Hz",
            clip.duration_secs(),
            clip.sample_rate
        );

        let contour = self
            .pitch
            .contour(&clip.samples, clip.sample_rate, frame_length, hop_length)
            .map_err(|cause| TranscriptionError::Upstream {
                collaborator: "pitch contour source",
                cause,
            })?;
        let voiced = contour.frames.iter().filter(|f| f.voiced).count();
        stage_done(
            trace,
            Stage::PitchTracking,
            format!("Tracked pitch over {} frames", contour.len()),
            serde_json::json!({
                "frames": contour.len(),
                "voiced": voiced,
                "tuning_offset": contour.tuning_offset,
            }),
        );

        let rms = self
            .energy
            .rms(&clip.samples, frame_length, hop_length)
            .map_err(|cause| TranscriptionError::Upstream {
                collaborator: "energy profile source",
                cause,
            })?;
        stage_done(
            trace,
            Stage::Energy,
            "Computed frame energy",
            serde_json::json!({ "frames": rms.len() }),
        );

        let transcription = transcribe_contour(
            &contour,
            &rms,
            self.config.hop_secs(clip.sample_rate),
            &self.config,
            trace,
        )?;

        log::info!(
            "Transcribed {} notes from {} frames ({} voiced)",
            transcription.notes.len(),
            transcription.frame_count(),
            voiced
        );

        Ok(transcription)
    }
}

fn stage_done(
    trace: Option<&TraceWriter>,
    stage: Stage,
    message: impl Into<String>,
    data: serde_json::Value,
) {
    if let Some(writer) = trace {
        writer.complete(stage, message, Some(data));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::trace::read_trace_file;
    use crate::transcription::types::PitchFrame;
    use tempfile::TempDir;
    use uuid::Uuid;

    /// Unvoiced except frames 50..100, which hold A4
    fn a4_step(n_frames: usize) -> (PitchContour, Vec<f64>) {
        let frames = (0..n_frames)
            .map(|i| {
                if (50..100).contains(&i) {
                    PitchFrame::voiced(440.0)
                } else {
                    PitchFrame::unvoiced()
                }
            })
            .collect();
        let rms = (0..n_frames)
            .map(|i| if (50..100).contains(&i) { 0.5 } else { 0.0 })
            .collect();
        (PitchContour::new(frames), rms)
    }

    struct FixedPitch(PitchContour);

    impl PitchContourSource for FixedPitch {
        fn contour(&self, _: &[f32], _: u32, _: usize, _: usize) -> Result<PitchContour, SourceError> {
            Ok(self.0.clone())
        }
    }

    struct FixedEnergy(Vec<f64>);

    impl EnergyProfileSource for FixedEnergy {
        fn rms(&self, _: &[f32], _: usize, _: usize) -> Result<Vec<f64>, SourceError> {
            Ok(self.0.clone())
        }
    }

    struct BrokenPitch;

    impl PitchContourSource for BrokenPitch {
        fn contour(&self, _: &[f32], _: u32, _: usize, _: usize) -> Result<PitchContour, SourceError> {
            Err(SourceError::Failed("tracker crashed".to_string()))
        }
    }

    #[test]
    fn test_a4_step_yields_single_note() {
        let (contour, rms) = a4_step(150);
        let hop = 512.0 / 22050.0;

        let result =
            transcribe_contour(&contour, &rms, hop, &TranscriptionConfig::default(), None).unwrap();

        assert_eq!(result.onsets, vec![50]);
        assert_eq!(result.notes.len(), 1);

        let note = &result.notes[0];
        assert_eq!(note.pitch, 69);
        assert!((note.onset_secs - 50.0 * hop).abs() < 1e-9);
        assert!((note.offset_secs - 100.0 * hop).abs() < 1e-9);
        assert_eq!(note.velocity, 127);

        assert_eq!(result.melody.len(), 150);
        assert_eq!(result.melody[49], 0.0);
        assert!((result.melody[50] - 440.0).abs() < 1e-6);
        assert_eq!(result.melody[100], 0.0);
    }

    #[test]
    fn test_unvoiced_clip_has_no_notes() {
        let contour = PitchContour::new(vec![PitchFrame::unvoiced(); 216]);
        let rms = vec![0.0; 216];

        let result = transcribe_contour(
            &contour,
            &rms,
            512.0 / 22050.0,
            &TranscriptionConfig::default(),
            None,
        )
        .unwrap();

        assert!(result.notes.is_empty());
        assert_eq!(result.melody.len(), 216);
        assert!(result.melody.iter().all(|&f| f == 0.0));
    }

    #[test]
    fn test_frame_count_mismatch() {
        let (contour, _) = a4_step(150);
        let result = transcribe_contour(
            &contour,
            &[0.0; 149],
            0.01,
            &TranscriptionConfig::default(),
            None,
        );

        assert!(matches!(
            result,
            Err(TranscriptionError::FrameCountMismatch {
                pitch_frames: 150,
                energy_frames: 149
            })
        ));
    }

    #[test]
    fn test_transcriber_with_fixed_sources() {
        let (contour, rms) = a4_step(150);
        let transcriber = Transcriber::with_sources(
            TranscriptionConfig::default(),
            Arc::new(FixedPitch(contour)),
            Arc::new(FixedEnergy(rms)),
        )
        .unwrap();

        let clip = AudioClip::from_mono(vec![0.0; 150 * 512], 22050);
        let result = transcriber.transcribe(&clip, None).unwrap();

        assert_eq!(result.notes.len(), 1);
        assert_eq!(result.onset_times().len(), 1);
    }

    #[test]
    fn test_upstream_failure_is_fatal() {
        let transcriber = Transcriber::with_sources(
            TranscriptionConfig::default(),
            Arc::new(BrokenPitch),
            Arc::new(RmsEnergySource),
        )
        .unwrap();

        let clip = AudioClip::from_mono(vec![0.0; 4096], 22050);
        let err = transcriber.transcribe(&clip, None).unwrap_err();

        assert!(matches!(
            err,
            TranscriptionError::Upstream {
                collaborator: "pitch contour source",
                ..
            }
        ));
        assert!(err.to_string().contains("tracker crashed"));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = TranscriptionConfig {
            p_stay_note: -0.1,
            ..Default::default()
        };
        assert!(matches!(
            Transcriber::new(config),
            Err(TranscriptionError::Config(_))
        ));
    }

    #[test]
    fn test_stages_are_traced() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("trace.jsonl");
        let writer = TraceWriter::new(Uuid::new_v4(), path.clone());

        let (contour, rms) = a4_step(150);
        let transcriber = Transcriber::with_sources(
            TranscriptionConfig::default(),
            Arc::new(FixedPitch(contour)),
            Arc::new(FixedEnergy(rms)),
        )
        .unwrap();
        let clip = AudioClip::from_mono(vec![0.0; 150 * 512], 22050);
        transcriber.transcribe(&clip, Some(&writer)).unwrap();

        let stages: Vec<Stage> = read_trace_file(&path)
            .unwrap()
            .into_iter()
            .map(|e| e.stage)
            .collect();
        assert_eq!(
            stages,
            vec![
                Stage::PitchTracking,
                Stage::Energy,
                Stage::OnsetDetection,
                Stage::TransitionModel,
                Stage::EmissionModel,
                Stage::Decoding,
                Stage::Pianoroll,
            ]
        );
    }
}
