//! FFT adapter built on `rustfft`, following the windowed-FFT idiom in
//! `utils::stft` from the teacher crate (Hann window + cached `FftPlanner`
//! plans), generalised to an arbitrary, cacheable frame length for reuse by
//! both the CQT kernel builder and its apply loop.

use rustfft::num_complex::Complex64;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;

pub struct FftProcessor {
    len: usize,
    forward: Arc<dyn Fft<f64>>,
}

impl FftProcessor {
    #[must_use]
    pub fn new(len: usize) -> Self {
        let mut planner = FftPlanner::new();
        Self {
            len,
            forward: planner.plan_fft_forward(len),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// In-place forward FFT; `buffer.len()` must equal `self.len()`.
    pub fn forward(&self, buffer: &mut [Complex64]) {
        self.forward.process(buffer);
    }
}

/// A symmetric Hann window of length `len`, matching the analysis window
/// used throughout the teacher's `utils::stft`.
#[must_use]
pub fn hann_window(len: usize) -> Vec<f64> {
    if len <= 1 {
        return vec![1.0; len];
    }
    let denom = (len - 1) as f64;
    (0..len)
        .map(|i| 0.5 - 0.5 * (2.0 * std::f64::consts::PI * i as f64 / denom).cos())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn sinusoid_peaks_at_expected_bin() {
        let n = 512;
        let k = 7usize;
        let proc = FftProcessor::new(n);
        let mut buf: Vec<Complex64> = (0..n)
            .map(|i| {
                let phase = 2.0 * std::f64::consts::PI * k as f64 * i as f64 / n as f64;
                Complex64::new(phase.cos(), 0.0)
            })
            .collect();
        proc.forward(&mut buf);
        let magnitudes: Vec<f64> = buf.iter().map(rustfft::num_complex::Complex::norm).collect();
        let (peak_bin, _) = magnitudes
            .iter()
            .enumerate()
            .take(n / 2)
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .unwrap();
        assert_eq!(peak_bin, k);
    }

    #[test]
    fn hann_window_endpoints_vanish() {
        let w = hann_window(8);
        assert!(w[0].abs() < 1e-9);
        assert!((w[7] - 0.0).abs() < 1e-9 || w[7] < 0.1);
    }
}
