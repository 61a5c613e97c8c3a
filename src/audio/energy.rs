// Frame energy profile
// Root-mean-square loudness per analysis frame, used for note velocities

use crate::audio::frames::{centred_frame, check_framing, frame_count, SourceError};

/// Produces one loudness value per analysis frame
pub trait EnergyProfileSource: Send + Sync {
    /// RMS per frame; must yield the same frame count as the pitch contour
    fn rms(
        &self,
        samples: &[f32],
        frame_length: usize,
        hop_length: usize,
    ) -> Result<Vec<f64>, SourceError>;
}

/// RMS over centred, zero-padded frames
#[derive(Debug, Clone, Copy, Default)]
pub struct RmsEnergySource;

impl EnergyProfileSource for RmsEnergySource {
    fn rms(
        &self,
        samples: &[f32],
        frame_length: usize,
        hop_length: usize,
    ) -> Result<Vec<f64>, SourceError> {
        check_framing(samples, frame_length, hop_length)?;

        let n_frames = frame_count(samples.len(), hop_length);
        let mut frame = vec![0.0f32; frame_length];
        let mut rms = Vec::with_capacity(n_frames);

        for index in 0..n_frames {
            centred_frame(samples, index, hop_length, &mut frame);
            let energy: f64 = frame.iter().map(|&s| (s as f64) * (s as f64)).sum();
            rms.push((energy / frame_length as f64).sqrt());
        }

        Ok(rms)
    }
}
