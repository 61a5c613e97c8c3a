// Spectral flux onset detection
// Rhythmic onsets straight from the audio, used for tempo estimation

use realfft::RealFftPlanner;
use serde::{Deserialize, Serialize};

use crate::audio::frames::SourceError;

/// Configuration for spectral flux onset detection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FluxConfig {
    /// FFT window size in samples (power of 2)
    pub window_size: usize,

    /// Hop size in samples (advance between frames)
    pub hop_size: usize,

    /// Threshold multiplier for adaptive peak picking
    /// Threshold = mean(flux) + threshold_factor * std(flux)
    pub threshold_factor: f32,

    /// Minimum time between onsets in milliseconds
    pub min_onset_gap_ms: f64,
}

impl Default for FluxConfig {
    fn default() -> Self {
        FluxConfig {
            window_size: 2048,
            hop_size: 512,
            threshold_factor: 1.5,
            min_onset_gap_ms: 30.0,
        }
    }
}

/// Detect onsets as peaks of spectral flux; returns onset times in seconds
pub fn detect_flux_onsets(
    samples: &[f32],
    sample_rate: u32,
    config: &FluxConfig,
) -> Result<Vec<f64>, SourceError> {
    if sample_rate == 0 {
        return Err(SourceError::InvalidSampleRate(sample_rate));
    }
    if config.window_size == 0 || config.hop_size == 0 {
        return Err(SourceError::InvalidFraming {
            frame_length: config.window_size,
            hop_length: config.hop_size,
        });
    }

    let flux = spectral_flux(samples, config)?;
    let peaks = pick_flux_peaks(&flux, sample_rate, config);

    log::debug!(
        "Spectral flux: {} frames, {} onsets",
        flux.len(),
        peaks.len()
    );

    Ok(peaks
        .into_iter()
        .map(|frame| (frame * config.hop_size) as f64 / sample_rate as f64)
        .collect())
}

/// Sum of positive magnitude differences between consecutive Hann-windowed frames
fn spectral_flux(samples: &[f32], config: &FluxConfig) -> Result<Vec<f32>, SourceError> {
    let window_size = config.window_size;
    if samples.len() < window_size {
        return Ok(Vec::new());
    }

    let num_frames = (samples.len() - window_size) / config.hop_size + 1;

    let mut planner = RealFftPlanner::<f32>::new();
    let fft = planner.plan_fft_forward(window_size);
    let window = hann_window(window_size);

    let mut input = fft.make_input_vec();
    let mut spectrum = fft.make_output_vec();
    let mut previous: Option<Vec<f32>> = None;
    let mut flux = Vec::with_capacity(num_frames);

    for frame_idx in 0..num_frames {
        let start = frame_idx * config.hop_size;
        for ((out, &sample), &w) in input
            .iter_mut()
            .zip(&samples[start..start + window_size])
            .zip(window.iter())
        {
            *out = sample * w;
        }

        fft.process(&mut input, &mut spectrum)
            .map_err(|e| SourceError::Failed(e.to_string()))?;
        let magnitudes: Vec<f32> = spectrum.iter().map(|c| c.norm()).collect();

        // First frame has no flux
        let frame_flux = match &previous {
            Some(prev) => magnitudes
                .iter()
                .zip(prev.iter())
                .map(|(curr, prev)| (curr - prev).max(0.0))
                .sum(),
            None => 0.0,
        };

        flux.push(frame_flux);
        previous = Some(magnitudes);
    }

    Ok(flux)
}

fn hann_window(n: usize) -> Vec<f32> {
    (0..n)
        .map(|i| 0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / n as f32).cos()))
        .collect()
}

/// Local maxima above a global mean + k * std threshold, at least `min_onset_gap_ms` apart
fn pick_flux_peaks(flux: &[f32], sample_rate: u32, config: &FluxConfig) -> Vec<usize> {
    if flux.len() < 3 {
        return Vec::new();
    }

    let mean = flux.iter().sum::<f32>() / flux.len() as f32;
    let variance = flux.iter().map(|x| (x - mean).powi(2)).sum::<f32>() / flux.len() as f32;
    let threshold = mean + config.threshold_factor * variance.sqrt();

    let min_gap_samples = (config.min_onset_gap_ms * sample_rate as f64 / 1000.0) as usize;
    let min_gap_frames = min_gap_samples / config.hop_size;

    let mut peaks = Vec::new();
    let mut last_peak: Option<usize> = None;

    for i in 1..flux.len() - 1 {
        let is_peak = flux[i] > flux[i - 1] && flux[i] > flux[i + 1];
        let gap_ok = last_peak.map_or(true, |last| i - last >= min_gap_frames);

        if is_peak && flux[i] > threshold && gap_ok {
            peaks.push(i);
            last_peak = Some(i);
        }
    }

    peaks
}
