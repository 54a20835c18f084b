//! Dynamic-range statistics: a peak-normalised per-time-slice energy
//! envelope, reduced to `1 - mean` and `1 - rms` so that larger values
//! mean a wider dynamic range. The trailing 20 s of tracks over 120 s are
//! excluded to avoid fade-outs skewing the estimate low.

use crate::config::DynamicsConfig;
use crate::cqt::CqtResult;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct DynamicRange {
    pub mean: f64,
    pub mean_variance: f64,
    pub rms: f64,
    pub rms_variance: f64,
}

const SLICE_SECONDS: f64 = 0.1;

/// Compute the dynamic-range statistics of `result`.
#[must_use]
pub fn dynamic_range(result: &CqtResult, config: &DynamicsConfig) -> DynamicRange {
    let duration = result.original_duration;
    if duration <= 0.0 {
        return DynamicRange::default();
    }

    let usable_duration = if duration > config.min_track_length_for_trim_seconds {
        (duration - config.tail_exclusion_seconds).max(0.0)
    } else {
        duration
    };
    let slice_count = (usable_duration / SLICE_SECONDS).ceil().max(1.0) as usize;

    let sums: Vec<f64> = (0..slice_count)
        .map(|i| {
            let t = i as f64 * SLICE_SECONDS;
            let mut sum = 0.0;
            for o in 0..result.octave_count {
                for b in 0..result.bins_per_octave {
                    sum += result.note_value_mean(t, o, b, SLICE_SECONDS);
                }
            }
            sum
        })
        .collect();

    let peak = sums.iter().cloned().fold(0.0f64, f64::max).max(1e-12);
    let normalised: Vec<f64> = sums.iter().map(|s| s / peak).collect();

    let n = normalised.len() as f64;
    let mean = normalised.iter().sum::<f64>() / n;
    let mean_variance = normalised.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;

    let mean_square = normalised.iter().map(|v| v * v).sum::<f64>() / n;
    let rms = mean_square.sqrt();
    let rms_variance = normalised
        .iter()
        .map(|v| (v * v - mean_square).powi(2))
        .sum::<f64>()
        / n;

    DynamicRange {
        mean: 1.0 - mean,
        mean_variance,
        rms: 1.0 - rms,
        rms_variance,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cqt::{ConstantQTransform, CqtParams};

    fn build(duration_samples: usize) -> CqtResult {
        let fs = 22050.0;
        let cqt = ConstantQTransform::build(CqtParams {
            f_min: 110.0,
            f_max: 1760.0,
            fs,
            bins_per_octave: 12,
            q: 1.0,
            threshold: 0.0005,
            atom_hop_factor: 0.25,
            transpose_cents: 0.0,
        })
        .unwrap();
        let signal: Vec<f64> = (0..duration_samples)
            .map(|i| (2.0 * std::f64::consts::PI * 440.0 * i as f64 / fs).sin())
            .collect();
        cqt.apply(&signal).unwrap()
    }

    #[test]
    fn constant_amplitude_signal_has_low_reported_dynamic_range() {
        let result = build(2 * 22050);
        let config = DynamicsConfig {
            tail_exclusion_seconds: 20.0,
            min_track_length_for_trim_seconds: 120.0,
        };
        let dr = dynamic_range(&result, &config);
        assert!(dr.mean < 0.5);
        assert!(dr.rms < 0.5);
    }

    #[test]
    fn silence_yields_default_statistics() {
        let cqt = ConstantQTransform::build(CqtParams {
            f_min: 110.0,
            f_max: 1760.0,
            fs: 22050.0,
            bins_per_octave: 12,
            q: 1.0,
            threshold: 0.0005,
            atom_hop_factor: 0.25,
            transpose_cents: 0.0,
        })
        .unwrap();
        let result = cqt.apply(&vec![0.0; 22050]).unwrap();
        let config = DynamicsConfig {
            tail_exclusion_seconds: 20.0,
            min_track_length_for_trim_seconds: 120.0,
        };
        let dr = dynamic_range(&result, &config);
        assert!(dr.mean.is_finite());
        assert!(dr.rms.is_finite());
    }
}
