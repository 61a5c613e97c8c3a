// Vocal onset detection
// Finds note starts from the raw f0 contour using merged slope runs
// and an adaptive rolling threshold

use serde::{Deserialize, Serialize};

use crate::transcription::types::PitchRange;

/// Configuration for contour-based onset detection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OnsetConfig {
    /// Number of trailing slopes used for the rolling mean / std-dev.
    /// Frames before the first full window are never flagged.
    pub window: usize,

    /// Threshold multiplier for adaptive peak picking
    /// Threshold = mean(slopes) + sensitivity * std(slopes)
    pub sensitivity: f64,
}

impl Default for OnsetConfig {
    fn default() -> Self {
        OnsetConfig {
            window: 20,
            sensitivity: 1.0,
        }
    }
}

/// A run of consecutive slopes sharing the same strict sign
#[derive(Debug, Clone, Copy, PartialEq)]
struct SlopeRun {
    /// Sum of every slope in the run
    total: f64,

    /// Slope index where the run ends (inclusive)
    end: usize,
}

/// Detect onset frames in a frequency contour (Hz, unvoiced = 0)
///
/// Algorithm:
/// 1. Rescale by the running maximum onto the range of the highest supported pitch
/// 2. Differentiate into per-frame slopes
/// 3. Merge each slope with the following same-sign slopes into one run
/// 4. Compare the run total against a trailing mean + sensitivity * std threshold
/// 5. Flag the frame where the run completes and skip past the run
///
/// The flagged frame is `run end + 1`, the first frame at the new pitch once the
/// rise has finished; a rise spread over several frames is flagged at its top.
/// Returns ascending, unique frame indices.
pub fn detect_onsets(frequencies: &[f64], config: &OnsetConfig) -> Vec<usize> {
    let scaled = rescale_by_running_max(frequencies, PitchRange::highest_frequency());

    if scaled.len() < 2 {
        return Vec::new();
    }

    let slopes: Vec<f64> = scaled.windows(2).map(|w| w[1] - w[0]).collect();

    // Not enough history for a single eligible frame
    if slopes.len() <= config.window {
        log::debug!(
            "Contour of {} frames is shorter than the onset window ({}), no onsets",
            frequencies.len(),
            config.window
        );
        return Vec::new();
    }

    let runs = merge_slope_runs(&slopes);
    let stats = rolling_stats(&slopes, config.window);

    let mut onsets = Vec::new();
    let mut i = 0;

    while i < slopes.len() {
        if i >= config.window {
            let (mean, std_dev) = stats[i];
            let threshold = mean + config.sensitivity * std_dev;

            if runs[i].total > threshold {
                // The new pitch is reached on the frame after the last slope of the run
                onsets.push(runs[i].end + 1);
                i = runs[i].end + 1;
                continue;
            }
        }
        i += 1;
    }

    onsets
}

/// Rescale a contour by its running maximum so every value sits on [0, ceiling]
/// Non-finite or negative values count as silence (0 Hz)
fn rescale_by_running_max(frequencies: &[f64], ceiling: f64) -> Vec<f64> {
    let mut maximum = 0.0f64;

    frequencies
        .iter()
        .map(|&f| {
            let f = if f.is_finite() && f > 0.0 { f } else { 0.0 };
            if f > maximum {
                maximum = f;
            }

            // Leading silence has no maximum yet
            if maximum > 0.0 {
                f * ceiling / maximum
            } else {
                0.0
            }
        })
        .collect()
}

/// For every slope, sum it with all immediately following slopes of the same sign
/// Computed right-to-left so each run is visited once
fn merge_slope_runs(slopes: &[f64]) -> Vec<SlopeRun> {
    let mut runs = vec![SlopeRun { total: 0.0, end: 0 }; slopes.len()];

    for i in (0..slopes.len()).rev() {
        let continues = i + 1 < slopes.len() && same_strict_sign(slopes[i], slopes[i + 1]);

        runs[i] = if continues {
            SlopeRun {
                total: slopes[i] + runs[i + 1].total,
                end: runs[i + 1].end,
            }
        } else {
            SlopeRun {
                total: slopes[i],
                end: i,
            }
        };
    }

    runs
}

fn same_strict_sign(a: f64, b: f64) -> bool {
    (a > 0.0 && b > 0.0) || (a < 0.0 && b < 0.0)
}

/// Trailing rolling (mean, sample std-dev) over `window` slopes ending at each index.
/// Indices without a full window report the raw slope as mean and zero spread.
fn rolling_stats(slopes: &[f64], window: usize) -> Vec<(f64, f64)> {
    let mut stats = Vec::with_capacity(slopes.len());

    for i in 0..slopes.len() {
        if i < window || window < 2 {
            stats.push((slopes[i], 0.0));
            continue;
        }

        let values = &slopes[i + 1 - window..=i];
        let mean = values.iter().sum::<f64>() / window as f64;
        let variance =
            values.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (window - 1) as f64;

        stats.push((mean, variance.sqrt()));
    }

    stats
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step_contour(frames: usize, start: usize, end: usize, hz: f64) -> Vec<f64> {
        (0..frames)
            .map(|i| if i >= start && i < end { hz } else { 0.0 })
            .collect()
    }

    #[test]
    fn test_rescale_leading_silence_is_zero() {
        let scaled = rescale_by_running_max(&[0.0, 0.0, 220.0, 110.0, f64::NAN], 1000.0);
        assert_eq!(scaled, vec![0.0, 0.0, 1000.0, 500.0, 0.0]);
    }

    #[test]
    fn test_merge_slope_runs() {
        let slopes = [1.0, 2.0, 0.0, -1.0, -3.0, 4.0];
        let runs = merge_slope_runs(&slopes);

        assert_eq!(runs[0], SlopeRun { total: 3.0, end: 1 });
        assert_eq!(runs[1], SlopeRun { total: 2.0, end: 1 });
        // Zero slopes never extend a run
        assert_eq!(runs[2], SlopeRun { total: 0.0, end: 2 });
        assert_eq!(runs[3], SlopeRun { total: -4.0, end: 4 });
        assert_eq!(runs[5], SlopeRun { total: 4.0, end: 5 });
    }

    #[test]
    fn test_rolling_stats_window() {
        let slopes: Vec<f64> = (0..6).map(|i| i as f64).collect();
        let stats = rolling_stats(&slopes, 3);

        // Before a full window: raw slope, no spread
        assert_eq!(stats[1], (1.0, 0.0));

        // Window [1, 2, 3]: mean 2, sample std 1
        let (mean, std_dev) = stats[3];
        assert!((mean - 2.0).abs() < 1e-12);
        assert!((std_dev - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_single_step_yields_single_onset() {
        let contour = step_contour(150, 50, 100, 440.0);
        let onsets = detect_onsets(&contour, &OnsetConfig::default());
        assert_eq!(onsets, vec![50]);
    }

    #[test]
    fn test_two_frame_rise_is_flagged_where_it_completes() {
        // Loud reference first so the later rise is not rescaled flat
        let mut contour = vec![0.0; 25];
        contour.extend(std::iter::repeat(880.0).take(5));
        contour.extend(std::iter::repeat(0.0).take(30));
        contour.push(220.0);
        contour.extend(std::iter::repeat(440.0).take(40));
        contour.extend(std::iter::repeat(0.0).take(49));

        let onsets = detect_onsets(&contour, &OnsetConfig::default());
        assert_eq!(onsets, vec![25, 61]);
    }

    #[test]
    fn test_monotonic_glide_yields_at_most_one_onset() {
        // A loud reference note first, so later lower notes are not rescaled flat
        let mut contour = vec![0.0; 30];
        contour.extend(std::iter::repeat(800.0).take(10));
        contour.extend(std::iter::repeat(0.0).take(20));
        let glide_start = contour.len();
        for i in 0..30 {
            contour.push(200.0 + i as f64 * 10.0);
        }
        let glide_end = contour.len();
        contour.extend(std::iter::repeat(0.0).take(30));

        let onsets = detect_onsets(&contour, &OnsetConfig::default());
        let in_glide = onsets
            .iter()
            .filter(|&&frame| frame >= glide_start && frame <= glide_end)
            .count();

        assert!(in_glide <= 1, "glide produced {} onsets: {:?}", in_glide, onsets);
    }

    #[test]
    fn test_onsets_are_ascending_and_unique() {
        let mut contour = step_contour(200, 40, 70, 440.0);
        for (i, value) in contour.iter_mut().enumerate().skip(100).take(40) {
            *value = if i % 10 < 5 { 300.0 } else { 500.0 };
        }

        let onsets = detect_onsets(&contour, &OnsetConfig::default());
        assert!(onsets.windows(2).all(|w| w[0] < w[1]));
        assert!(onsets.iter().all(|&frame| frame < contour.len()));
    }

    #[test]
    fn test_short_contour_has_no_onsets() {
        let contour = step_contour(20, 10, 15, 440.0);
        assert!(detect_onsets(&contour, &OnsetConfig::default()).is_empty());
        assert!(detect_onsets(&[], &OnsetConfig::default()).is_empty());
    }

    #[test]
    fn test_rise_inside_first_window_is_ignored() {
        let contour = step_contour(100, 10, 60, 440.0);
        let onsets = detect_onsets(&contour, &OnsetConfig::default());
        assert!(onsets.is_empty());
    }

    #[test]
    fn test_window_is_configurable() {
        let contour = step_contour(100, 10, 60, 440.0);
        let config = OnsetConfig {
            window: 5,
            sensitivity: 1.0,
        };
        assert_eq!(detect_onsets(&contour, &config), vec![10]);
    }

    #[test]
    fn test_fully_unvoiced_contour() {
        let contour = vec![0.0; 500];
        assert!(detect_onsets(&contour, &OnsetConfig::default()).is_empty());
    }
}
