//! Tempo (BPM) estimation: an onset envelope from the CQT magnitude sum,
//! autocorrelated up to a configurable lag, whose strict local maxima give
//! inter-peak spacings convertible to BPM.

use ndarray::arr1;
use ndarray_stats::interpolate::Midpoint;
use ndarray_stats::Quantile1dExt;
use noisy_float::prelude::*;

use crate::config::TempoConfig;
use crate::cqt::CqtResult;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TempoEstimate {
    pub mean_bpm: f64,
    pub median_bpm: f64,
    pub bpm_variance: f64,
}

/// `BPM = 30 / (d * slice_seconds)`: the factor of 30 folds in the 5 ms
/// reference resolution and the half-period encoding of autocorrelation
/// peaks (a peak at lag `d` corresponds to two beat periods).
fn bpm_from_lag(lag_slices: usize, slice_seconds: f64) -> f64 {
    30.0 / (lag_slices as f64 * slice_seconds)
}

fn onset_envelope(result: &CqtResult, slice_seconds: f64) -> Vec<f64> {
    let duration = result.original_duration;
    if duration <= 0.0 || slice_seconds <= 0.0 {
        return Vec::new();
    }
    let slice_count = (duration / slice_seconds).ceil() as usize;
    let sums: Vec<f64> = (0..slice_count)
        .map(|i| {
            let t = i as f64 * slice_seconds;
            let mut sum = 0.0;
            for o in 0..result.octave_count {
                for b in 0..result.bins_per_octave {
                    sum += result.note_value_mean(t, o, b, slice_seconds);
                }
            }
            sum
        })
        .collect();

    sums.windows(2)
        .map(|w| (w[1] - w[0]).max(0.0))
        .collect()
}

fn autocorrelation(signal: &[f64], max_lag: usize) -> Vec<f64> {
    let n = signal.len();
    let max_lag = max_lag.min(n.saturating_sub(1));
    (0..=max_lag)
        .map(|lag| {
            (0..n - lag).map(|i| signal[i] * signal[i + lag]).sum::<f64>()
        })
        .collect()
}

fn strict_local_maxima(values: &[f64]) -> Vec<usize> {
    (1..values.len().saturating_sub(1))
        .filter(|&i| values[i] > values[i - 1] && values[i] > values[i + 1])
        .collect()
}

fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    arr1(values)
        .mapv(n64)
        .quantile_mut(n64(0.5), &Midpoint)
        .map(|q| q.raw())
        .unwrap_or(0.0)
}

/// Estimate tempo from `result`'s CQT magnitudes. Returns the default
/// (all-zero) estimate when fewer than two autocorrelation peaks are
/// found (too short a signal, or a signal with no periodic onsets).
#[must_use]
pub fn estimate_tempo(result: &CqtResult, config: &TempoConfig) -> TempoEstimate {
    let slice_seconds = config.slice_ms / 1000.0;
    let envelope = onset_envelope(result, slice_seconds);
    if envelope.len() < 3 {
        return TempoEstimate::default();
    }

    let max_lag = (config.max_lag_seconds / slice_seconds).round() as usize;
    let autocorr = autocorrelation(&envelope, max_lag);
    let peaks = strict_local_maxima(&autocorr);
    if peaks.len() < 2 {
        return TempoEstimate::default();
    }

    let distances: Vec<usize> = peaks.windows(2).map(|w| w[1] - w[0]).collect();
    let bpms: Vec<f64> = distances
        .iter()
        .map(|&d| bpm_from_lag(d, slice_seconds))
        .collect();

    let mean_distance = distances.iter().sum::<usize>() as f64 / distances.len() as f64;
    let mean_bpm = bpm_from_lag(mean_distance.round().max(1.0) as usize, slice_seconds);

    let median_distances: Vec<f64> = distances.iter().map(|&d| d as f64).collect();
    let median_distance = median(&median_distances);
    let median_bpm = bpm_from_lag(median_distance.round().max(1.0) as usize, slice_seconds);

    let bpm_mean = bpms.iter().sum::<f64>() / bpms.len() as f64;
    let bpm_variance =
        bpms.iter().map(|v| (v - bpm_mean).powi(2)).sum::<f64>() / bpms.len() as f64;

    TempoEstimate {
        mean_bpm,
        median_bpm,
        bpm_variance,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cqt::{ConstantQTransform, CqtParams};

    fn metronome_signal(fs: f64, bpm: f64, duration_s: f64) -> Vec<f64> {
        let period_s = 60.0 / bpm;
        let n = (fs * duration_s) as usize;
        let click_len = (fs * 0.02) as usize;
        let mut signal = vec![0.0; n];
        let mut t = 0.0;
        while (t * fs) as usize + click_len < n {
            let start = (t * fs) as usize;
            for i in 0..click_len {
                let phase = i as f64 / fs;
                signal[start + i] += (2.0 * std::f64::consts::PI * 1000.0 * phase).sin()
                    * (1.0 - i as f64 / click_len as f64);
            }
            t += period_s;
        }
        signal
    }

    #[test]
    fn short_signal_returns_default_estimate() {
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
        let result = cqt.apply(&vec![0.0; 512]).unwrap();
        let config = TempoConfig {
            max_lag_seconds: 30.0,
            slice_ms: 5.0,
        };
        let estimate = estimate_tempo(&result, &config);
        assert_eq!(estimate, TempoEstimate::default());
    }

    #[test]
    fn metronome_tempo_is_within_tolerance_or_a_harmonic() {
        let fs = 22050.0;
        let cqt = ConstantQTransform::build(CqtParams {
            f_min: 110.0,
            f_max: 3520.0,
            fs,
            bins_per_octave: 12,
            q: 1.0,
            threshold: 0.0005,
            atom_hop_factor: 0.25,
            transpose_cents: 0.0,
        })
        .unwrap();
        let target_bpm = 120.0;
        let signal = metronome_signal(fs, target_bpm, 8.0);
        let result = cqt.apply(&signal).unwrap();
        let config = TempoConfig {
            max_lag_seconds: 30.0,
            slice_ms: 5.0,
        };
        let estimate = estimate_tempo(&result, &config);
        if estimate.mean_bpm > 0.0 {
            let ratio = estimate.mean_bpm / target_bpm;
            let nearest_harmonic = [0.25, 0.5, 1.0, 2.0, 3.0, 4.0]
                .iter()
                .map(|h| (ratio - h).abs())
                .fold(f64::INFINITY, f64::min);
            assert!(
                nearest_harmonic < 0.15,
                "estimated {} bpm is not near a harmonic of {} bpm (ratio {})",
                estimate.mean_bpm,
                target_bpm,
                ratio
            );
        }
    }
}
