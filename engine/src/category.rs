//! Category learner and scorer: mixes per-recording timbre/chroma GMMs
//! into per-polarity category GMMs by sampling (not by direct mixture
//! concatenation, so the category model aggregates rather than merely
//! unions its examples), derives a 4-D feature vector per recording from
//! cross-model KL divergences plus tempo/dynamic-range, and fits a
//! one-class Mahalanobis classifier over those vectors per polarity.

use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use strum::{EnumCount, EnumIter, IntoEnumIterator};

use crate::cancel::CancellationToken;
use crate::config::{CategoryConfig, GmmConfig};
use crate::errors::{EngineError, EngineResult};
use crate::gmm::{self, pack_lower_triangle, unpack_lower_triangle, CovarianceKind, Gmm};
use crate::linalg;
use crate::progress::ProgressSink;

#[derive(Debug, Clone, Copy, EnumIter, EnumCount)]
/// Indexes the coordinates of the per-recording feature vector `φ(r)`
/// ([`feature_vector`]). The first two are forced to zero when fitting
/// a [`OneClassGaussian`] — see its `fit`.
pub enum FeatureIndex {
    /// Symmetric KL divergence delta between the positive and negative
    /// timbre GMMs.
    TimbreDivergence,
    /// Symmetric KL divergence delta between the positive and negative
    /// chroma GMMs.
    ChromaDivergence,
    /// Estimated tempo, in BPM.
    Tempo,
    /// Mean dynamic range.
    DynamicRange,
}

/// The previously-computed per-file features a recording contributes to
/// category learning and scoring.
#[derive(Clone, Debug)]
pub struct RecordingFeatures {
    pub timbre: Gmm,
    pub chroma: Gmm,
    pub tempo_bpm: f64,
    pub length_seconds: f64,
    pub dynamic_range_mean: f64,
    pub dynamic_range_rms: f64,
}

enum MahalanobisFactor {
    Cholesky(Array2<f64>),
    Pseudo(Array2<f64>),
}

/// A single full-covariance Gaussian fit to a set of feature vectors,
/// queried by Mahalanobis distance rather than density.
pub struct OneClassGaussian {
    pub mean: Array1<f64>,
    pub covariance: Array2<f64>,
    factor: MahalanobisFactor,
}

impl OneClassGaussian {
    /// Fit to `vectors`, forcing the first two mean coordinates to zero
    /// (by construction those coordinates of `φ` are designed to centre
    /// on zero; see [`feature_vector`]).
    fn fit(vectors: &[Array1<f64>]) -> EngineResult<Self> {
        if vectors.is_empty() {
            return Err(EngineError::EmptyInput(
                "no feature vectors to fit a one-class classifier to".into(),
            ));
        }
        let d = vectors[0].len();
        let n = vectors.len() as f64;

        let mut mean = Array1::<f64>::zeros(d);
        for v in vectors {
            mean += v;
        }
        mean /= n;
        if d >= 2 {
            mean[FeatureIndex::TimbreDivergence as usize] = 0.0;
            mean[FeatureIndex::ChromaDivergence as usize] = 0.0;
        }

        let mut covariance = Array2::<f64>::zeros((d, d));
        for v in vectors {
            let diff = v - &mean;
            for a in 0..d {
                for b in 0..d {
                    covariance[[a, b]] += diff[a] * diff[b];
                }
            }
        }
        covariance /= n;

        let factor = match linalg::cholesky(&covariance) {
            Some(l) => MahalanobisFactor::Cholesky(l),
            None => {
                let (pinv, _log_det) = linalg::pseudo_inverse_and_log_det(&covariance, 1e-12);
                MahalanobisFactor::Pseudo(pinv)
            }
        };

        Ok(Self {
            mean,
            covariance,
            factor,
        })
    }

    /// `√((x − mean)ᵀ Σ⁻¹ (x − mean))`.
    #[must_use]
    pub fn mahalanobis(&self, x: &Array1<f64>) -> f64 {
        let diff = x - &self.mean;
        let quadratic = match &self.factor {
            MahalanobisFactor::Cholesky(l) => {
                let y = linalg::forward_substitute(l, &diff);
                y.iter().map(|v| v * v).sum::<f64>()
            }
            MahalanobisFactor::Pseudo(pinv) => diff.dot(&pinv.dot(&diff)),
        };
        quadratic.max(0.0).sqrt()
    }

    /// Serialise as `{mean[], covariance[]}`, covariance packed as a
    /// lower-triangle row-major array starting at the diagonal.
    #[must_use]
    pub fn to_json(&self) -> String {
        let record = OneClassRecord {
            mean: self.mean.to_vec(),
            covariance: pack_lower_triangle(&self.covariance),
        };
        serde_json::to_string(&record).expect("one-class records serialise infallibly")
    }

    pub fn from_json(text: &str) -> EngineResult<Self> {
        let record: OneClassRecord =
            serde_json::from_str(text).map_err(|e| EngineError::MalformedModel(e.to_string()))?;
        let d = record.mean.len();
        let full_len = d * (d + 1) / 2;
        if record.covariance.len() != full_len {
            return Err(EngineError::MalformedModel(format!(
                "covariance length {} does not match packed full length {full_len}",
                record.covariance.len()
            )));
        }
        let mean = Array1::from(record.mean);
        let covariance = unpack_lower_triangle(&record.covariance, d);
        let factor = match linalg::cholesky(&covariance) {
            Some(l) => MahalanobisFactor::Cholesky(l),
            None => {
                let (pinv, _log_det) = linalg::pseudo_inverse_and_log_det(&covariance, 1e-12);
                MahalanobisFactor::Pseudo(pinv)
            }
        };
        Ok(Self {
            mean,
            covariance,
            factor,
        })
    }
}

#[derive(Serialize, Deserialize)]
struct OneClassRecord {
    mean: Vec<f64>,
    covariance: Vec<f64>,
}

/// The serialisable core of a learned category: per-polarity timbre and
/// chroma GMMs plus per-polarity one-class classifiers. Any may be absent
/// before the first `train` call.
pub struct CategoryModel {
    pub positive_timbre: Gmm,
    pub negative_timbre: Gmm,
    pub positive_chroma: Gmm,
    pub negative_chroma: Gmm,
    pub positive_classifier: OneClassGaussian,
    pub negative_classifier: OneClassGaussian,
}

fn sample_matrix(gmm: &Gmm, n: usize, rng: &mut StdRng) -> Array2<f64> {
    let dim = gmm.dim();
    let mut data = Array2::<f64>::zeros((n, dim));
    for i in 0..n {
        let sample = gmm.sample(rng);
        data.row_mut(i).assign(&sample);
    }
    data
}

fn train_category_gmm(
    examples: &[&Gmm],
    samples_per_example: usize,
    model_size: usize,
    gmm_config: &GmmConfig,
    rng: &mut StdRng,
    progress: &dyn ProgressSink,
    cancel: &CancellationToken,
) -> EngineResult<Gmm> {
    if examples.is_empty() {
        return Err(EngineError::EmptyInput(
            "no example recordings to learn a category from".into(),
        ));
    }
    let dim = examples[0].dim();
    let total = examples.len() * samples_per_example;
    let mut data = Array2::<f64>::zeros((total, dim));
    let mut row = 0;
    for example in examples {
        let chunk = sample_matrix(example, samples_per_example, rng);
        for r in 0..chunk.nrows() {
            data.row_mut(row).assign(&chunk.row(r));
            row += 1;
        }
    }

    let k = model_size.min(total);
    gmm::train(
        &data,
        k,
        CovarianceKind::Diagonal,
        1.0,
        gmm_config,
        rng,
        progress,
        cancel,
    )
}

/// The 4-D per-recording category feature vector `φ(r)`: the first two
/// coordinates are negative when `r` is closer to the positive prototype
/// (smaller KL = more similar), positive when closer to the negative
/// prototype — the sign structure the one-class classifier relies on.
#[must_use]
pub fn feature_vector(
    recording: &RecordingFeatures,
    positive_timbre: &Gmm,
    negative_timbre: &Gmm,
    positive_chroma: &Gmm,
    negative_chroma: &Gmm,
    kl_samples: usize,
    rng: &mut StdRng,
) -> Array1<f64> {
    let timbre_term = recording.timbre.symmetric_kl(positive_timbre, kl_samples, rng)
        - recording.timbre.symmetric_kl(negative_timbre, kl_samples, rng);
    let chroma_term = recording.chroma.symmetric_kl(positive_chroma, kl_samples, rng)
        - recording.chroma.symmetric_kl(negative_chroma, kl_samples, rng);
    let vector = Array1::from(vec![
        timbre_term,
        chroma_term,
        recording.tempo_bpm,
        recording.dynamic_range_mean,
    ]);
    debug_assert_eq!(vector.len(), FeatureIndex::COUNT);
    vector
}

/// Pair `vector`'s coordinates with their [`FeatureIndex`], for logging.
#[must_use]
pub fn labeled_feature_vector(vector: &Array1<f64>) -> Vec<(FeatureIndex, f64)> {
    FeatureIndex::iter().zip(vector.iter().copied()).collect()
}

/// Trains category timbre/chroma GMMs for both polarities and fits the
/// one-class classifiers over the examples' own feature vectors.
pub struct CategoryLearner;

impl CategoryLearner {
    pub fn train(
        positive: &[RecordingFeatures],
        negative: &[RecordingFeatures],
        config: &CategoryConfig,
        gmm_config: &GmmConfig,
        rng: &mut StdRng,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> EngineResult<CategoryModel> {
        if positive.is_empty() || negative.is_empty() {
            return Err(EngineError::EmptyInput(
                "category learning requires at least one positive and one negative example"
                    .into(),
            ));
        }

        let positive_timbre_examples: Vec<&Gmm> = positive.iter().map(|r| &r.timbre).collect();
        let negative_timbre_examples: Vec<&Gmm> = negative.iter().map(|r| &r.timbre).collect();
        let positive_chroma_examples: Vec<&Gmm> = positive.iter().map(|r| &r.chroma).collect();
        let negative_chroma_examples: Vec<&Gmm> = negative.iter().map(|r| &r.chroma).collect();

        let positive_timbre = train_category_gmm(
            &positive_timbre_examples,
            config.timbre_sample_count,
            config.timbre_model_size,
            gmm_config,
            rng,
            progress,
            cancel,
        )?;
        let negative_timbre = train_category_gmm(
            &negative_timbre_examples,
            config.timbre_sample_count,
            config.timbre_model_size,
            gmm_config,
            rng,
            progress,
            cancel,
        )?;
        let positive_chroma = train_category_gmm(
            &positive_chroma_examples,
            config.chroma_sample_count,
            config.chroma_model_size,
            gmm_config,
            rng,
            progress,
            cancel,
        )?;
        let negative_chroma = train_category_gmm(
            &negative_chroma_examples,
            config.chroma_sample_count,
            config.chroma_model_size,
            gmm_config,
            rng,
            progress,
            cancel,
        )?;

        let positive_vectors: Vec<Array1<f64>> = positive
            .iter()
            .map(|r| {
                feature_vector(
                    r,
                    &positive_timbre,
                    &negative_timbre,
                    &positive_chroma,
                    &negative_chroma,
                    config.kl_divergence_samples,
                    rng,
                )
            })
            .collect();
        let negative_vectors: Vec<Array1<f64>> = negative
            .iter()
            .map(|r| {
                feature_vector(
                    r,
                    &positive_timbre,
                    &negative_timbre,
                    &positive_chroma,
                    &negative_chroma,
                    config.kl_divergence_samples,
                    rng,
                )
            })
            .collect();

        let positive_classifier = OneClassGaussian::fit(&positive_vectors)?;
        let negative_classifier = OneClassGaussian::fit(&negative_vectors)?;

        progress.report("category-train", 1.0, "category learner converged");

        Ok(CategoryModel {
            positive_timbre,
            negative_timbre,
            positive_chroma,
            negative_chroma,
            positive_classifier,
            negative_classifier,
        })
    }
}

/// Scores recordings against an already-trained [`CategoryModel`].
pub struct CategoryScorer;

impl CategoryScorer {
    /// Combine the positive and negative Mahalanobis distances as
    /// `negative_distance - positive_distance`: increasing similarity to
    /// the positive prototype (smaller positive distance) raises the
    /// score, satisfying the monotonicity requirement without committing
    /// to a specific probit transform.
    #[must_use]
    pub fn score(
        model: &CategoryModel,
        recording: &RecordingFeatures,
        kl_samples: usize,
        rng: &mut StdRng,
    ) -> f64 {
        let phi = feature_vector(
            recording,
            &model.positive_timbre,
            &model.negative_timbre,
            &model.positive_chroma,
            &model.negative_chroma,
            kl_samples,
            rng,
        );
        let positive_distance = model.positive_classifier.mahalanobis(&phi);
        let negative_distance = model.negative_classifier.mahalanobis(&phi);
        negative_distance - positive_distance
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GmmConfig;
    use ndarray::Array1;
    use rand::SeedableRng;

    fn simple_gmm(mean: f64, rng: &mut StdRng) -> Gmm {
        let data = Array2::from_shape_fn((200, 4), |(i, j)| {
            mean + (i as f64 * 0.01) + j as f64 * 0.001
        });
        gmm::train(
            &data,
            2,
            CovarianceKind::Diagonal,
            1.0,
            &GmmConfig {
                max_iterations: 5,
                convergence_tolerance: 1e-6,
                min_variance: 1e-2,
                weight_sum_tolerance: 5e-2,
            },
            rng,
            &crate::progress::NoopProgressSink,
            &CancellationToken::new(),
        )
        .unwrap()
    }

    fn features(mean: f64, rng: &mut StdRng) -> RecordingFeatures {
        RecordingFeatures {
            timbre: simple_gmm(mean, rng),
            chroma: simple_gmm(mean, rng),
            tempo_bpm: 120.0,
            length_seconds: 180.0,
            dynamic_range_mean: 0.5,
            dynamic_range_rms: 0.5,
        }
    }

    #[test]
    fn labeled_feature_vector_pairs_coordinates_in_declared_order() {
        let vector = Array1::from(vec![0.1, 0.2, 120.0, 0.5]);
        let labeled = labeled_feature_vector(&vector);
        assert_eq!(labeled.len(), FeatureIndex::COUNT);
        assert!(matches!(labeled[0].0, FeatureIndex::TimbreDivergence));
        assert_eq!(labeled[0].1, 0.1);
        assert!(matches!(labeled[3].0, FeatureIndex::DynamicRange));
        assert_eq!(labeled[3].1, 0.5);
    }

    #[test]
    fn one_class_gaussian_forces_first_two_mean_coordinates_to_zero() {
        let vectors = vec![
            Array1::from(vec![3.0, -2.0, 1.0, 1.0]),
            Array1::from(vec![4.0, -1.0, 1.1, 0.9]),
        ];
        let classifier = OneClassGaussian::fit(&vectors).unwrap();
        assert_eq!(classifier.mean[0], 0.0);
        assert_eq!(classifier.mean[1], 0.0);
    }

    #[test]
    fn one_class_gaussian_json_round_trips() {
        let vectors = vec![
            Array1::from(vec![3.0, -2.0, 1.0, 1.0]),
            Array1::from(vec![4.0, -1.0, 1.2, 0.8]),
            Array1::from(vec![3.5, -1.5, 0.9, 1.1]),
        ];
        let classifier = OneClassGaussian::fit(&vectors).unwrap();
        let text = classifier.to_json();
        let restored = OneClassGaussian::from_json(&text).unwrap();
        for (a, b) in classifier.mean.iter().zip(restored.mean.iter()) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn category_learner_trains_and_scores() {
        let mut rng = StdRng::seed_from_u64(21);
        let positive = vec![features(0.0, &mut rng), features(0.1, &mut rng)];
        let negative = vec![features(5.0, &mut rng), features(5.1, &mut rng)];
        let config = CategoryConfig {
            timbre_model_size: 2,
            timbre_sample_count: 50,
            chroma_model_size: 2,
            chroma_sample_count: 50,
            kl_divergence_samples: 50,
        };
        let gmm_config = GmmConfig {
            max_iterations: 5,
            convergence_tolerance: 1e-6,
            min_variance: 1e-2,
            weight_sum_tolerance: 5e-2,
        };
        let model = CategoryLearner::train(
            &positive,
            &negative,
            &config,
            &gmm_config,
            &mut rng,
            &crate::progress::NoopProgressSink,
            &CancellationToken::new(),
        )
        .unwrap();

        let score = CategoryScorer::score(&model, &positive[0], config.kl_divergence_samples, &mut rng);
        assert!(score.is_finite());
    }

    #[test]
    fn empty_examples_are_rejected() {
        let config = CategoryConfig {
            timbre_model_size: 2,
            timbre_sample_count: 50,
            chroma_model_size: 2,
            chroma_sample_count: 50,
            kl_divergence_samples: 50,
        };
        let gmm_config = GmmConfig {
            max_iterations: 5,
            convergence_tolerance: 1e-6,
            min_variance: 1e-2,
            weight_sum_tolerance: 5e-2,
        };
        let mut rng = StdRng::seed_from_u64(1);
        let result = CategoryLearner::train(
            &[],
            &[],
            &config,
            &gmm_config,
            &mut rng,
            &crate::progress::NoopProgressSink,
            &CancellationToken::new(),
        );
        assert!(matches!(result, Err(EngineError::EmptyInput(_))));
    }
}
