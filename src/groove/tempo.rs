// Tempo estimation
// Spectral flux onsets from the audio, then an inter-onset-interval histogram;
// used when no BPM is given

use serde::{Deserialize, Serialize};

use crate::audio::flux::{detect_flux_onsets, FluxConfig};

/// Supplies a tempo when the caller does not
pub trait TempoEstimator: Send + Sync {
    /// Estimate BPM from the clip's samples, `None` when unsure
    fn estimate(&self, samples: &[f32], sample_rate: u32) -> Option<f64>;
}

/// Tempo estimate with the strength of its histogram peak
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TempoEstimate {
    pub bpm: f64,

    /// Peak strength relative to the histogram mean [0.0, 1.0]
    pub confidence: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TempoConfig {
    /// Slowest tempo considered
    pub min_bpm: f64,

    /// Fastest tempo considered
    pub max_bpm: f64,

    /// Histogram resolution across the interval range
    pub histogram_bins: usize,

    /// Fewer onsets than this yield no estimate
    pub min_onsets: usize,
}

impl Default for TempoConfig {
    fn default() -> Self {
        TempoConfig {
            min_bpm: 60.0,
            max_bpm: 180.0,
            histogram_bins: 300,
            min_onsets: 4,
        }
    }
}

/// Histogram of inter-onset intervals with half and double interval votes
#[derive(Debug, Clone, Default)]
pub struct IoiTempoEstimator {
    config: TempoConfig,
    flux: FluxConfig,
}

impl IoiTempoEstimator {
    pub fn new(config: TempoConfig) -> Self {
        IoiTempoEstimator {
            config,
            flux: FluxConfig::default(),
        }
    }

    pub fn with_flux_config(mut self, flux: FluxConfig) -> Self {
        self.flux = flux;
        self
    }

    /// Estimate tempo and confidence from onset times in seconds
    pub fn estimate_with_confidence(&self, onsets_secs: &[f64]) -> Option<TempoEstimate> {
        let config = &self.config;
        if onsets_secs.len() < config.min_onsets || config.histogram_bins < 3 {
            return None;
        }
        if !(config.min_bpm > 0.0 && config.max_bpm > config.min_bpm) {
            return None;
        }

        let iois: Vec<f64> = onsets_secs
            .windows(2)
            .map(|pair| pair[1] - pair[0])
            .filter(|&interval| interval > 0.0 && interval.is_finite())
            .collect();
        if iois.is_empty() {
            return None;
        }

        let range = IntervalRange::new(config);
        let histogram = smooth_histogram(&range.histogram(&iois));

        let (best_bin, peak_strength) = strongest_peak(&histogram)?;
        let interval = range.refine(&iois, best_bin);
        let bpm = (60.0 / interval).clamp(config.min_bpm, config.max_bpm);

        let mean = histogram.iter().sum::<f32>() / histogram.len() as f32;
        let confidence = if mean > 0.0 {
            (peak_strength / (mean * 3.0)).min(1.0)
        } else {
            0.0
        };

        log::debug!(
            "Tempo estimate {:.1} BPM from {} intervals (confidence {:.2})",
            bpm,
            iois.len(),
            confidence
        );

        Some(TempoEstimate { bpm, confidence })
    }
}

impl TempoEstimator for IoiTempoEstimator {
    fn estimate(&self, samples: &[f32], sample_rate: u32) -> Option<f64> {
        let onsets = match detect_flux_onsets(samples, sample_rate, &self.flux) {
            Ok(onsets) => onsets,
            Err(e) => {
                log::warn!("Onset detection for tempo failed: {}", e);
                return None;
            }
        };
        self.estimate_with_confidence(&onsets).map(|e| e.bpm)
    }
}

/// Linear binning of beat intervals between the tempo bounds
struct IntervalRange {
    min_interval: f64,
    bin_width: f64,
    bins: usize,
}

impl IntervalRange {
    fn new(config: &TempoConfig) -> Self {
        let min_interval = 60.0 / config.max_bpm;
        let max_interval = 60.0 / config.min_bpm;
        IntervalRange {
            min_interval,
            bin_width: (max_interval - min_interval) / config.histogram_bins as f64,
            bins: config.histogram_bins,
        }
    }

    /// Direct interval, then 2:1 and 1:2 relationships at lower weight
    fn votes(ioi: f64) -> [(f64, f32); 3] {
        [(ioi, 1.0), (ioi / 2.0, 0.5), (ioi * 2.0, 0.5)]
    }

    /// Bin of an interval; both range bounds are inclusive
    fn bin_of(&self, interval: f64) -> Option<usize> {
        let position = (interval - self.min_interval) / self.bin_width;
        let tolerance = 1e-6;
        if position < -tolerance || position > self.bins as f64 + tolerance {
            return None;
        }
        Some((position.max(0.0) as usize).min(self.bins - 1))
    }

    fn histogram(&self, iois: &[f64]) -> Vec<f32> {
        let mut histogram = vec![0.0f32; self.bins];

        for &ioi in iois {
            for (interval, weight) in Self::votes(ioi) {
                if let Some(bin) = self.bin_of(interval) {
                    histogram[bin] += weight;
                }
            }
        }

        histogram
    }

    /// Weighted mean of the votes that landed within one bin of the peak
    fn refine(&self, iois: &[f64], peak: usize) -> f64 {
        let mut sum = 0.0;
        let mut weight_sum = 0.0;

        for &ioi in iois {
            for (interval, weight) in Self::votes(ioi) {
                if let Some(bin) = self.bin_of(interval) {
                    if bin.abs_diff(peak) <= 1 {
                        sum += interval * weight as f64;
                        weight_sum += weight as f64;
                    }
                }
            }
        }

        if weight_sum > 0.0 {
            sum / weight_sum
        } else {
            self.min_interval + (peak as f64 + 0.5) * self.bin_width
        }
    }
}

/// Triangular [1, 2, 1] smoothing; a single-bin spike keeps a strict peak
fn smooth_histogram(histogram: &[f32]) -> Vec<f32> {
    let n = histogram.len();

    (0..n)
        .map(|i| {
            let left = if i > 0 { histogram[i - 1] } else { 0.0 };
            let right = if i + 1 < n { histogram[i + 1] } else { 0.0 };
            0.25 * left + 0.5 * histogram[i] + 0.25 * right
        })
        .collect()
}

/// Strongest local maximum, edge bins included; earliest bin wins ties
///
/// A two-bin plateau counts once, at its right edge.
fn strongest_peak(histogram: &[f32]) -> Option<(usize, f32)> {
    let mut best: Option<(usize, f32)> = None;
    let n = histogram.len();

    for i in 0..n {
        let value = histogram[i];
        let above_left = i == 0 || value >= histogram[i - 1];
        let above_right = i + 1 == n || value > histogram[i + 1];

        if value > 0.0 && above_left && above_right {
            match best {
                Some((_, strength)) if strength >= value => {}
                _ => best = Some((i, value)),
            }
        }
    }

    best
}
