// Fundamental frequency tracking
// YIN-based f0 and voicing per analysis frame, plus clip-wide tuning estimation

use pitch_detection::detector::yin::YINDetector;
use pitch_detection::detector::PitchDetector;
use serde::{Deserialize, Serialize};

use crate::audio::frames::{centred_frame, check_framing, frame_count, SourceError};
use crate::transcription::types::{hz_to_midi, PitchContour, PitchFrame, PitchRange};

/// Produces a per-frame f0 estimate, voicing flag and tuning offset
pub trait PitchContourSource: Send + Sync {
    fn contour(
        &self,
        samples: &[f32],
        sample_rate: u32,
        frame_length: usize,
        hop_length: usize,
    ) -> Result<PitchContour, SourceError>;
}

/// Configuration for the YIN pitch tracker
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct YinConfig {
    /// Lowest frequency accepted as voiced, in Hz
    pub fmin: f64,

    /// Highest frequency accepted as voiced, in Hz
    pub fmax: f64,

    /// Minimum clarity of the YIN dip, `1 - threshold` on the normalized difference
    /// Frames below it are unvoiced
    pub clarity_threshold: f64,

    /// Frames quieter than this RMS are unvoiced without analysis
    pub silence_rms: f64,

    /// Histogram resolution for tuning estimation, in semitones
    pub tuning_resolution: f64,
}

impl Default for YinConfig {
    fn default() -> Self {
        YinConfig {
            fmin: PitchRange::lowest_frequency() * 0.9,
            fmax: PitchRange::highest_frequency() * 1.1,
            clarity_threshold: 0.9,
            silence_rms: 1e-4,
            tuning_resolution: 0.01,
        }
    }
}

/// YIN pitch tracker over centred frames
#[derive(Debug, Clone, Default)]
pub struct YinPitchSource {
    config: YinConfig,
}

impl YinPitchSource {
    pub fn new() -> Self {
        YinPitchSource {
            config: YinConfig::default(),
        }
    }

    pub fn with_config(config: YinConfig) -> Self {
        YinPitchSource { config }
    }

    /// Power threshold for one frame; the detector compares against the sum of squares
    fn power_threshold(&self, frame_length: usize) -> f64 {
        self.config.silence_rms.powi(2) * frame_length as f64
    }

    /// f0 of one frame when the detector finds a clear period inside the voiced range
    fn frame_f0(
        &self,
        detector: &mut YINDetector<f64>,
        frame: &[f64],
        sample_rate: u32,
    ) -> Option<f64> {
        let pitch = detector.get_pitch(
            frame,
            sample_rate as usize,
            self.power_threshold(frame.len()),
            self.config.clarity_threshold,
        )?;

        let f0 = pitch.frequency;
        if f0.is_finite() && f0 >= self.config.fmin && f0 <= self.config.fmax {
            Some(f0)
        } else {
            None
        }
    }
}

impl PitchContourSource for YinPitchSource {
    fn contour(
        &self,
        samples: &[f32],
        sample_rate: u32,
        frame_length: usize,
        hop_length: usize,
    ) -> Result<PitchContour, SourceError> {
        check_framing(samples, frame_length, hop_length)?;
        if sample_rate == 0 {
            return Err(SourceError::InvalidSampleRate(sample_rate));
        }

        let n_frames = frame_count(samples.len(), hop_length);
        let mut detector = YINDetector::new(frame_length, frame_length / 2);
        let mut frame = vec![0.0f32; frame_length];
        let mut signal = vec![0.0f64; frame_length];
        let mut frames = Vec::with_capacity(n_frames);

        for index in 0..n_frames {
            centred_frame(samples, index, hop_length, &mut frame);
            for (out, &sample) in signal.iter_mut().zip(frame.iter()) {
                *out = sample as f64;
            }
            frames.push(match self.frame_f0(&mut detector, &signal, sample_rate) {
                Some(f0) => PitchFrame::voiced(f0),
                None => PitchFrame::unvoiced(),
            });
        }

        let voiced: Vec<f64> = frames.iter().filter_map(|f| f.frequency_hz).collect();
        let tuning_offset = estimate_tuning(&voiced, self.config.tuning_resolution);

        log::debug!(
            "YIN: {} frames, {} voiced, tuning offset {:+.2} semitones",
            n_frames,
            voiced.len(),
            tuning_offset
        );

        Ok(PitchContour {
            frames,
            tuning_offset,
        })
    }
}

/// Estimate the clip's deviation from A440 equal temperament
///
/// Builds a histogram of each frequency's fractional distance from the nearest
/// semitone (wrapped into [-0.5, 0.5)) and returns the most populated bin.
pub fn estimate_tuning(frequencies: &[f64], resolution: f64) -> f64 {
    let residuals: Vec<f64> = frequencies
        .iter()
        .filter(|f| f.is_finite() && **f > 0.0)
        .map(|&f| {
            let midi = hz_to_midi(f);
            let mut residual = midi - midi.floor();
            if residual >= 0.5 {
                residual -= 1.0;
            }
            residual
        })
        .collect();

    if residuals.is_empty() || resolution <= 0.0 {
        return 0.0;
    }

    let n_bins = (1.0 / resolution).ceil() as usize;
    let mut histogram = vec![0usize; n_bins];
    for r in residuals {
        let bin = (((r + 0.5) / resolution).floor() as usize).min(n_bins - 1);
        histogram[bin] += 1;
    }

    // First (lowest) bin wins ties
    let mut best = 0;
    for (i, &count) in histogram.iter().enumerate() {
        if count > histogram[best] {
            best = i;
        }
    }

    -0.5 + best as f64 * resolution
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f64, sample_rate: u32, seconds: f64) -> Vec<f32> {
        let n = (sample_rate as f64 * seconds) as usize;
        (0..n)
            .map(|i| (0.5 * (2.0 * std::f64::consts::PI * freq * i as f64 / sample_rate as f64).sin()) as f32)
            .collect()
    }

    #[test]
    fn test_yin_tracks_a4() {
        let samples = sine(440.0, 22050, 0.5);
        let contour = YinPitchSource::new().contour(&samples, 22050, 2048, 512).unwrap();

        assert_eq!(contour.len(), 1 + samples.len() / 512);

        // Interior frames are fully inside the tone
        let interior = &contour.frames[3..contour.len() - 3];
        for frame in interior {
            assert!(frame.voiced);
            let f0 = frame.frequency_hz.unwrap();
            assert!((f0 - 440.0).abs() < 5.0, "estimated {}", f0);
        }
    }

    #[test]
    fn test_yin_silence_is_unvoiced() {
        let samples = vec![0.0f32; 22050];
        let contour = YinPitchSource::new().contour(&samples, 22050, 2048, 512).unwrap();

        assert!(contour.frames.iter().all(|f| !f.voiced && f.frequency_hz.is_none()));
        assert_eq!(contour.tuning_offset, 0.0);
    }

    #[test]
    fn test_yin_out_of_range_tone_is_unvoiced() {
        // Well above 1.1 x C6
        let samples = sine(2000.0, 22050, 0.5);
        let contour = YinPitchSource::new().contour(&samples, 22050, 2048, 512).unwrap();
        assert!(contour.frames.iter().all(|f| !f.voiced));
    }

    #[test]
    fn test_yin_quiet_tone_is_unvoiced() {
        let samples: Vec<f32> = sine(440.0, 22050, 0.5).iter().map(|s| s * 1e-4).collect();
        let contour = YinPitchSource::new().contour(&samples, 22050, 2048, 512).unwrap();
        assert!(contour.frames.iter().all(|f| !f.voiced));
    }

    #[test]
    fn test_yin_rejects_bad_input() {
        let source = YinPitchSource::new();
        assert!(matches!(source.contour(&[], 22050, 2048, 512), Err(SourceError::EmptyAudio)));
        assert!(matches!(
            source.contour(&[0.0; 100], 0, 2048, 512),
            Err(SourceError::InvalidSampleRate(0))
        ));
    }

    #[test]
    fn test_estimate_tuning() {
        // Everything 0.25 semitones sharp
        let sharp: Vec<f64> = [60.25, 64.25, 67.25]
            .iter()
            .map(|m| 440.0 * 2f64.powf((m - 69.0) / 12.0))
            .collect();
        let tuning = estimate_tuning(&sharp, 0.01);
        assert!((tuning - 0.25).abs() < 0.011, "tuning {}", tuning);

        assert_eq!(estimate_tuning(&[], 0.01), 0.0);
        assert!(estimate_tuning(&[440.0], 0.01).abs() < 0.011);
    }
}
