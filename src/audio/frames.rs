// Analysis framing shared by the pitch and energy sources
// Frames are centred on `index * hop` and zero padded at the clip edges

use thiserror::Error;

/// Errors raised by the per-frame signal collaborators
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Audio buffer is empty")]
    EmptyAudio,

    #[error("Invalid framing: frame length {frame_length}, hop length {hop_length}")]
    InvalidFraming {
        frame_length: usize,
        hop_length: usize,
    },

    #[error("Invalid sample rate: {0}")]
    InvalidSampleRate(u32),

    #[error("Signal analysis failed: {0}")]
    Failed(String),
}

/// Validate framing parameters against a buffer
pub fn check_framing(
    samples: &[f32],
    frame_length: usize,
    hop_length: usize,
) -> Result<(), SourceError> {
    if samples.is_empty() {
        return Err(SourceError::EmptyAudio);
    }
    if frame_length == 0 || hop_length == 0 {
        return Err(SourceError::InvalidFraming {
            frame_length,
            hop_length,
        });
    }
    Ok(())
}

/// Number of centred frames for a buffer: `1 + len / hop`
pub fn frame_count(sample_count: usize, hop_length: usize) -> usize {
    1 + sample_count / hop_length
}

/// Copy the centred frame `index` into `out`, zero padding outside the buffer
pub fn centred_frame(samples: &[f32], index: usize, hop_length: usize, out: &mut [f32]) {
    let frame_length = out.len();
    let centre = (index * hop_length) as isize;
    let start = centre - (frame_length / 2) as isize;

    for (j, value) in out.iter_mut().enumerate() {
        let pos = start + j as isize;
        *value = if pos >= 0 && (pos as usize) < samples.len() {
            samples[pos as usize]
        } else {
            0.0
        };
    }
}
