// Transcription configuration
// Model constants, framing, and fallbacks passed explicitly into the engine

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::audio::pitch::YinConfig;
use crate::transcription::emission::EmissionConfig;
use crate::transcription::onset::OnsetConfig;
use crate::transcription::pianoroll::FALLBACK_VELOCITY;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("{name} must be within [0, 1], got {value}")]
    ProbabilityOutOfRange { name: &'static str, value: f64 },

    #[error("{name} must be greater than zero")]
    ZeroSize { name: &'static str },

    #[error("Onset window must cover at least 2 frames, got {0}")]
    OnsetWindowTooSmall(usize),

    #[error("Pitch search range must satisfy 0 < fmin < fmax, got {fmin}..{fmax}")]
    InvalidPitchRange { fmin: f64, fmax: f64 },

    #[error("Default BPM must be positive, got {0}")]
    InvalidDefaultBpm(f64),

    #[error("Fallback velocity must be at most 127, got {0}")]
    VelocityOutOfRange(u8),
}

/// Everything the transcription engine needs besides the audio itself
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptionConfig {
    /// Analysis window in samples
    pub frame_length: usize,

    /// Samples between consecutive frames
    pub hop_length: usize,

    /// Probability of a sustained note continuing into the next frame
    pub p_stay_note: f64,

    /// Probability of silence continuing into the next frame
    pub p_stay_silence: f64,

    /// Emission accuracy constants
    pub emission: EmissionConfig,

    /// Onset detector settings
    pub onset: OnsetConfig,

    /// Settings for the built-in YIN pitch tracker
    pub yin: YinConfig,

    /// Velocity assigned when the clip has no loudness variation
    pub fallback_velocity: u8,

    /// Tempo substituted when the caller supplies an unusable BPM
    pub default_bpm: f64,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        TranscriptionConfig {
            frame_length: 2048,
            hop_length: 512,
            p_stay_note: 0.9,
            p_stay_silence: 0.7,
            emission: EmissionConfig::default(),
            onset: OnsetConfig::default(),
            yin: YinConfig::default(),
            fallback_velocity: FALLBACK_VELOCITY,
            default_bpm: 120.0,
        }
    }
}

impl TranscriptionConfig {
    /// Parse a JSON config; missing fields keep their defaults
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: TranscriptionConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON config file
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Seconds between consecutive frames at a sample rate
    pub fn hop_secs(&self, sample_rate: u32) -> f64 {
        self.hop_length as f64 / sample_rate as f64
    }

    /// Reject values the model cannot use
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.frame_length == 0 {
            return Err(ConfigError::ZeroSize { name: "frame_length" });
        }
        if self.hop_length == 0 {
            return Err(ConfigError::ZeroSize { name: "hop_length" });
        }

        let probabilities = [
            ("p_stay_note", self.p_stay_note),
            ("p_stay_silence", self.p_stay_silence),
            ("pitch_acc", self.emission.pitch_acc),
            ("voiced_acc", self.emission.voiced_acc),
            ("onset_acc", self.emission.onset_acc),
            ("spread", self.emission.spread),
            ("yin.clarity_threshold", self.yin.clarity_threshold),
        ];
        for (name, value) in probabilities {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::ProbabilityOutOfRange { name, value });
            }
        }

        if !(self.yin.fmin > 0.0 && self.yin.fmin < self.yin.fmax) {
            return Err(ConfigError::InvalidPitchRange {
                fmin: self.yin.fmin,
                fmax: self.yin.fmax,
            });
        }

        if self.onset.window < 2 {
            return Err(ConfigError::OnsetWindowTooSmall(self.onset.window));
        }
        if !(self.default_bpm.is_finite() && self.default_bpm > 0.0) {
            return Err(ConfigError::InvalidDefaultBpm(self.default_bpm));
        }
        if self.fallback_velocity > 127 {
            return Err(ConfigError::VelocityOutOfRange(self.fallback_velocity));
        }

        Ok(())
    }
}
