//! Chroma vectors: pitch-class energy aggregated across octaves, with
//! exponential smoothing, a mild power-law nonlinearity, and mode (key)
//! detection. A `ChromaModel` is the best of three independently-trained
//! full-covariance GMMs over a recording's chroma vectors.
//!
//! Mode detection and the chord-label rotation follow
//! `feature_extraction/chords.cpp`'s `ChordEstimator`/`ChordHypothesis`:
//! note names there are indexed starting at pitch class "F" rather than
//! "C" (see [`pitch_class_name`]), an idiosyncrasy with no effect on
//! correctness that this module preserves rather than "fixes" silently.

use ndarray::Array2;
use rand::rngs::StdRng;

use crate::cancel::CancellationToken;
use crate::config::{ChromaConfig, GmmConfig};
use crate::cqt::CqtResult;
use crate::errors::{EngineError, EngineResult};
use crate::gmm::{self, CovarianceKind, Gmm};
use crate::progress::ProgressSink;

pub type ChromaVector = Vec<f64>;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ModeFamily {
    Major,
    NaturalMinor,
    HarmonicMinor,
}

/// The detected tonal centre of a recording: a pitch class in
/// `0..bins_per_octave` plus a mode family.
#[derive(Clone, Copy, Debug)]
pub struct Mode {
    pub tonic: usize,
    pub family: ModeFamily,
}

/// A single slice's dominant triad, named in the source's idiosyncratic
/// "starts at F" convention.
#[derive(Clone, Debug)]
pub struct ChordEstimate {
    pub tonic: usize,
    pub is_minor: bool,
}

impl ChordEstimate {
    #[must_use]
    pub fn label(&self) -> String {
        let name = pitch_class_name(self.tonic);
        if self.is_minor {
            name.to_lowercase()
        } else {
            name
        }
    }
}

/// Pitch-class name using the source's rotation: index 0 is "F", not "C".
#[must_use]
pub fn pitch_class_name(pitch_class: usize) -> String {
    const NAMES: [&str; 12] = [
        "F", "F#", "G", "G#", "A", "A#", "B", "C", "C#", "D", "D#", "E",
    ];
    NAMES[pitch_class % 12].to_string()
}

struct ChromaExtraction {
    vectors: Vec<ChromaVector>,
    chords: Vec<ChordEstimate>,
    mode: Mode,
}

/// Compute chroma vectors, per-slice chord estimates, and the detected
/// mode. `transpose_invariant` rotates every chroma vector so the
/// detected tonic sits at index 0.
fn extract(result: &CqtResult, config: &ChromaConfig, transpose_invariant: bool) -> ChromaExtraction {
    let bins = result.bins_per_octave;
    let slice_seconds = config.slice_ms / 1000.0;
    let mut vectors = Vec::new();
    let mut chords = Vec::new();
    let mut tally_major = vec![0usize; bins];
    let mut tally_minor = vec![0usize; bins];
    let mut overall = vec![0.0f64; bins];

    if slice_seconds <= 0.0 || result.original_duration <= 0.0 {
        return ChromaExtraction {
            vectors,
            chords,
            mode: Mode {
                tonic: 0,
                family: ModeFamily::Major,
            },
        };
    }

    let slice_count = (result.original_duration / slice_seconds).ceil() as usize;
    let alpha = (slice_seconds / 0.125).min(1.0);
    let mut smoothed = vec![0.0f64; bins];

    for i in 0..slice_count {
        let t = i as f64 * slice_seconds;

        let mut raw = vec![0.0f64; bins];
        for o in 0..result.octave_count {
            for b in 0..bins {
                raw[b] += result.note_value_mean(t, o, b, slice_seconds);
            }
        }
        let peak = raw.iter().cloned().fold(0.0f64, f64::max).max(1e-12);
        for v in &mut raw {
            *v = (*v / peak).powf(1.2) * peak;
        }

        for b in 0..bins {
            smoothed[b] += alpha * (raw[b] - smoothed[b]);
        }
        let vector = smoothed.clone();

        for (b, v) in vector.iter().enumerate() {
            overall[b] += v;
        }

        let mut best_major = (0usize, f64::NEG_INFINITY);
        let mut best_minor = (0usize, f64::NEG_INFINITY);
        for j in 0..bins {
            let major_score = (vector[j] + vector[(j + 4) % bins] + vector[(j + 7) % bins]) / 3.0;
            let minor_score = (vector[j] + vector[(j + 3) % bins] + vector[(j + 7) % bins]) / 3.0;
            if major_score > best_major.1 {
                best_major = (j, major_score);
            }
            if minor_score > best_minor.1 {
                best_minor = (j, minor_score);
            }
        }
        if best_major.1 >= best_minor.1 {
            tally_major[best_major.0] += 1;
            chords.push(ChordEstimate {
                tonic: best_major.0,
                is_minor: false,
            });
        } else {
            tally_minor[best_minor.0] += 1;
            chords.push(ChordEstimate {
                tonic: best_minor.0,
                is_minor: true,
            });
        }

        vectors.push(vector);
    }

    let mode = detect_mode(&tally_major, &tally_minor, bins);

    if transpose_invariant {
        for vector in &mut vectors {
            vector.rotate_left(mode.tonic % bins);
        }
    }

    for vector in &mut vectors {
        let norm = vector.iter().map(|v| v * v).sum::<f64>().sqrt();
        if norm > 1e-12 {
            for v in vector.iter_mut() {
                *v /= norm;
            }
        }
    }

    ChromaExtraction {
        vectors,
        chords,
        mode,
    }
}

/// Score every `(tonic, family)` candidate by weighting tonic `×3` and
/// dominant (`tonic + 7`) `×1.5` against the sum of the remaining
/// pitch classes, and return the argmax. Harmonic minor draws its
/// dominant weight from the major tally (its raised leading tone makes
/// the dominant triad major, unlike natural minor's).
fn detect_mode(tally_major: &[usize], tally_minor: &[usize], bins: usize) -> Mode {
    let total_major: f64 = tally_major.iter().sum::<usize>() as f64;
    let total_minor: f64 = tally_minor.iter().sum::<usize>() as f64;

    let score = |tonic: usize, family: ModeFamily| -> f64 {
        let dominant = (tonic + 7) % bins;
        match family {
            ModeFamily::Major => {
                let remainder = total_major - tally_major[tonic] as f64 - tally_major[dominant] as f64;
                3.0 * tally_major[tonic] as f64 + 1.5 * tally_major[dominant] as f64 - remainder
            }
            ModeFamily::NaturalMinor => {
                let remainder = total_minor - tally_minor[tonic] as f64 - tally_minor[dominant] as f64;
                3.0 * tally_minor[tonic] as f64 + 1.5 * tally_minor[dominant] as f64 - remainder
            }
            ModeFamily::HarmonicMinor => {
                let remainder = total_minor - tally_minor[tonic] as f64 - tally_major[dominant] as f64;
                3.0 * tally_minor[tonic] as f64 + 1.5 * tally_major[dominant] as f64 - remainder
            }
        }
    };

    let mut best = Mode {
        tonic: 0,
        family: ModeFamily::Major,
    };
    let mut best_score = f64::NEG_INFINITY;
    for tonic in 0..bins {
        for &family in &[
            ModeFamily::Major,
            ModeFamily::NaturalMinor,
            ModeFamily::HarmonicMinor,
        ] {
            let s = score(tonic, family);
            if s > best_score {
                best_score = s;
                best = Mode { tonic, family };
            }
        }
    }
    best
}

/// Chroma vectors (already transpose-normalised) for training, plus the
/// per-slice chord estimates and detected mode for external reporting.
#[must_use]
pub fn chroma_vectors(
    result: &CqtResult,
    config: &ChromaConfig,
    transpose_invariant: bool,
) -> (Vec<ChromaVector>, Vec<ChordEstimate>, Mode) {
    let extraction = extract(result, config, transpose_invariant);
    (extraction.vectors, extraction.chords, extraction.mode)
}

/// A full-covariance GMM over a recording's chroma vectors, chosen as the
/// best of three independent training runs by log-likelihood — EM's
/// sensitivity to initialisation makes a single run unreliable.
#[derive(Clone, Debug)]
pub struct ChromaModel {
    pub gmm: Gmm,
}

impl ChromaModel {
    pub fn train(
        vectors: &[ChromaVector],
        config: &ChromaConfig,
        gmm_config: &GmmConfig,
        rng: &mut StdRng,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> EngineResult<Self> {
        if vectors.is_empty() {
            return Err(EngineError::EmptyInput(
                "no chroma vectors to train on".into(),
            ));
        }
        let dim = vectors[0].len();
        let data = Array2::from_shape_fn((vectors.len(), dim), |(i, j)| vectors[i][j]);
        let k = config.model_size.min(vectors.len());

        let mut best: Option<Gmm> = None;
        for attempt in 0..3 {
            cancel.check()?;
            let gmm = gmm::train(
                &data,
                k,
                CovarianceKind::Full,
                1.0,
                gmm_config,
                rng,
                progress,
                cancel,
            )?;
            progress.report(
                "chroma-train",
                (attempt + 1) as f64 / 3.0,
                &format!("attempt {attempt}: log-likelihood {}", gmm.log_likelihood),
            );
            let replace = match &best {
                Some(b) => gmm.log_likelihood > b.log_likelihood,
                None => true,
            };
            if replace {
                best = Some(gmm);
            }
        }
        Ok(Self {
            gmm: best.expect("three training attempts always produce a model"),
        })
    }
}
