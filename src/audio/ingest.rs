// Audio ingestion module
// Decodes WAV data into a normalized mono clip ready for pitch and energy analysis

use hound::{SampleFormat, WavReader};
use std::io::{Cursor, Read};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("Failed to read WAV data: {0}")]
    WavReadError(#[from] hound::Error),

    #[error("Failed to open audio file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),

    #[error("Audio contains no samples")]
    Empty,
}

/// A decoded, mono audio clip
#[derive(Debug, Clone)]
pub struct AudioClip {
    /// Mono samples normalized to f32 in range [-1.0, 1.0]
    pub samples: Vec<f32>,

    /// Sample rate in Hz (e.g., 22050, 44100)
    pub sample_rate: u32,

    /// Channel count of the source before downmixing
    pub source_channels: u16,

    /// Bit depth of the source (8, 16, 24, 32)
    pub bit_depth: u16,
}

impl AudioClip {
    /// Build a clip directly from mono samples
    pub fn from_mono(samples: Vec<f32>, sample_rate: u32) -> Self {
        AudioClip {
            samples,
            sample_rate,
            source_channels: 1,
            bit_depth: 32,
        }
    }

    /// Duration in seconds
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Ingest a WAV file from disk
pub fn ingest_wav_file(path: &Path) -> Result<AudioClip, AudioError> {
    let bytes = std::fs::read(path)?;
    ingest_wav(&bytes)
}

/// Ingest WAV data from raw bytes
/// Interleaved channels are averaged down to mono
pub fn ingest_wav(data: &[u8]) -> Result<AudioClip, AudioError> {
    let mut reader = WavReader::new(Cursor::new(data))?;

    let spec = reader.spec();
    let channels = spec.channels.max(1);
    let interleaved = read_normalized(&mut reader, spec.sample_format, spec.bits_per_sample)?;

    if interleaved.is_empty() {
        return Err(AudioError::Empty);
    }

    let samples = downmix(&interleaved, channels as usize);

    log::debug!(
        "Ingested WAV: {} Hz, {} channel(s), {}-bit, {} mono samples",
        spec.sample_rate,
        channels,
        spec.bits_per_sample,
        samples.len()
    );

    Ok(AudioClip {
        samples,
        sample_rate: spec.sample_rate,
        source_channels: channels,
        bit_depth: spec.bits_per_sample,
    })
}

/// Read every sample and scale it to [-1.0, 1.0]
fn read_normalized<R: Read>(
    reader: &mut WavReader<R>,
    format: SampleFormat,
    bit_depth: u16,
) -> Result<Vec<f32>, AudioError> {
    let samples = match (format, bit_depth) {
        // hound already re-centres unsigned 8-bit PCM around zero
        (SampleFormat::Int, 8) => reader
            .samples::<i8>()
            .map(|s| s.map(|v| v as f32 / 128.0))
            .collect::<Result<Vec<_>, _>>()?,
        (SampleFormat::Int, 16) => reader
            .samples::<i16>()
            .map(|s| s.map(|v| v as f32 / 32768.0))
            .collect::<Result<Vec<_>, _>>()?,
        (SampleFormat::Int, 24) => reader
            .samples::<i32>()
            .map(|s| s.map(|v| v as f32 / 8388608.0))
            .collect::<Result<Vec<_>, _>>()?,
        (SampleFormat::Int, 32) => reader
            .samples::<i32>()
            .map(|s| s.map(|v| v as f32 / 2147483648.0))
            .collect::<Result<Vec<_>, _>>()?,
        (SampleFormat::Float, 32) => reader.samples::<f32>().collect::<Result<Vec<_>, _>>()?,
        _ => {
            return Err(AudioError::UnsupportedFormat(format!(
                "{:?} {}-bit audio",
                format, bit_depth
            )));
        }
    };

    Ok(samples)
}

/// Average interleaved channels into one
fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }

    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}
