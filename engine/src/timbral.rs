//! Timbre vectors: a DCT-II of the log-magnitude constant-Q spectrum per
//! time slice, discarding the DC coefficient so the vector reflects
//! spectral shape rather than overall loudness. A `TimbreModel` is a GMM
//! trained over those vectors for one recording.

use ndarray::Array2;
use rand::rngs::StdRng;

use crate::cancel::CancellationToken;
use crate::config::{GmmConfig, TimbreConfig};
use crate::cqt::CqtResult;
use crate::dct::dct2;
use crate::errors::{EngineError, EngineResult};
use crate::gmm::{self, CovarianceKind, Gmm};
use crate::progress::ProgressSink;

/// `vector[i]` is `dct2(log-magnitude spectrum)[i + 1]`, i.e. the DC term
/// is always dropped. `None` when the slice's total energy is below the
/// silence floor (see [`timbre_vectors`]).
pub type TimbreVector = Vec<f64>;

const SILENCE_FLOOR: f64 = 1e-9;

/// Compute one timbre vector per time slice of `slice_ms` width, covering
/// `[0, result.original_duration)`. Slices whose total magnitude is below
/// [`SILENCE_FLOOR`] are skipped rather than padded with a sentinel, since
/// a log of near-zero magnitude would otherwise dominate the DCT. Each
/// vector is truncated to `config.dimension` coefficients after the DC
/// term is dropped.
#[must_use]
pub fn timbre_vectors(result: &CqtResult, config: &TimbreConfig) -> Vec<TimbreVector> {
    let slice_seconds = config.slice_ms / 1000.0;
    if slice_seconds <= 0.0 || result.original_duration <= 0.0 {
        return Vec::new();
    }
    let slice_count = (result.original_duration / slice_seconds).ceil() as usize;
    let total_bins = result.octave_count * result.bins_per_octave;

    (0..slice_count)
        .filter_map(|i| {
            let t = i as f64 * slice_seconds;
            let mut spectrum = Vec::with_capacity(total_bins);
            let mut energy = 0.0;
            for o in 0..result.octave_count {
                for b in 0..result.bins_per_octave {
                    let mag = result.note_value_mean(t, o, b, slice_seconds);
                    energy += mag;
                    spectrum.push(mag);
                }
            }
            if energy < SILENCE_FLOOR {
                return None;
            }
            let log_spectrum: Vec<f64> =
                spectrum.iter().map(|&m| (m.max(SILENCE_FLOOR)).ln()).collect();
            let coeffs = dct2(&log_spectrum);
            let without_dc = &coeffs[1..];
            let truncated = without_dc.len().min(config.dimension);
            Some(without_dc[..truncated].to_vec())
        })
        .collect()
}

/// A GMM trained over a recording's timbre vectors. Diagonal covariance by
/// default: `§4.1`'s timbre space is high-dimensional enough (`bins - 1`)
/// that a full covariance would need prohibitively many samples per
/// component.
#[derive(Clone, Debug)]
pub struct TimbreModel {
    pub gmm: Gmm,
}

impl TimbreModel {
    /// Train from precomputed timbre vectors. Fails with `EmptyInput` if
    /// `vectors` is empty, or propagates a `BadParameters` if the model
    /// size exceeds the sample count.
    pub fn train(
        vectors: &[TimbreVector],
        config: &TimbreConfig,
        gmm_config: &GmmConfig,
        rng: &mut StdRng,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> EngineResult<Self> {
        if vectors.is_empty() {
            return Err(EngineError::EmptyInput(
                "no timbre vectors to train on".into(),
            ));
        }
        let dim = vectors[0].len();
        let data = Array2::from_shape_fn((vectors.len(), dim), |(i, j)| vectors[i][j]);

        let k = config.model_size.min(vectors.len());
        let gmm = gmm::train(
            &data,
            k,
            CovarianceKind::Diagonal,
            1.0,
            gmm_config,
            rng,
            progress,
            cancel,
        )?;
        Ok(Self { gmm })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cqt::{ConstantQTransform, CqtParams};
    use rand::SeedableRng;

    fn build_result() -> CqtResult {
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
        let freq = 440.0;
        let fs = 22050.0;
        let signal: Vec<f64> = (0..(2.0 * fs) as usize)
            .map(|i| (2.0 * std::f64::consts::PI * freq * i as f64 / fs).sin())
            .collect();
        cqt.apply(&signal).unwrap()
    }

    #[test]
    fn silent_audio_yields_no_vectors() {
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
        let config = TimbreConfig {
            dimension: 20,
            slice_ms: 10.0,
            model_size: 10,
        };
        assert!(timbre_vectors(&result, &config).is_empty());
    }

    #[test]
    fn sinusoid_yields_nonempty_vectors_with_dc_dropped() {
        let result = build_result();
        let config = TimbreConfig {
            dimension: 20,
            slice_ms: 10.0,
            model_size: 10,
        };
        let vectors = timbre_vectors(&result, &config);
        assert!(!vectors.is_empty());
        let available = result.octave_count * result.bins_per_octave - 1;
        let expected_len = available.min(config.dimension);
        assert_eq!(vectors[0].len(), expected_len);
    }

    #[test]
    fn vectors_are_truncated_to_configured_dimension() {
        let result = build_result();
        let config = TimbreConfig {
            dimension: 5,
            slice_ms: 10.0,
            model_size: 10,
        };
        let vectors = timbre_vectors(&result, &config);
        assert!(!vectors.is_empty());
        assert_eq!(vectors[0].len(), 5);
    }

    #[test]
    fn model_trains_on_extracted_vectors() {
        let result = build_result();
        let timbre_config = TimbreConfig {
            dimension: 20,
            slice_ms: 10.0,
            model_size: 4,
        };
        let gmm_config = GmmConfig {
            max_iterations: 5,
            convergence_tolerance: 1e-6,
            min_variance: 1e-2,
            weight_sum_tolerance: 5e-2,
        };
        let vectors = timbre_vectors(&result, &timbre_config);
        let mut rng = StdRng::seed_from_u64(9);
        let model = TimbreModel::train(
            &vectors,
            &timbre_config,
            &gmm_config,
            &mut rng,
            &crate::progress::NoopProgressSink,
            &CancellationToken::new(),
        )
        .unwrap();
        assert!(model.gmm.len() <= 4);
    }
}
