//! Subcommand definitions and their handlers. Every recording is a raw
//! little-endian `f32` PCM file, mono, pre-resampled to the configured
//! sample rate — decoding and resampling are an external collaborator's
//! job (see `SPEC_FULL.md`'s Non-goals), not this crate's.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use cadence_engine::cancel::CancellationToken;
use cadence_engine::category::{CategoryLearner, CategoryScorer, RecordingFeatures};
use cadence_engine::chroma::{self, ChromaModel};
use cadence_engine::config::EngineConfig;
use cadence_engine::cqt::{ConstantQTransform, CqtParams};
use cadence_engine::dynamics;
use cadence_engine::progress::ProgressSink;
use cadence_engine::tempo;
use cadence_engine::timbral::{self, TimbreModel};
use clap::Subcommand;
use log::info;
use rand::rngs::StdRng;
use rand::SeedableRng;

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Extract timbre/chroma/tempo/dynamic-range features from a raw PCM
    /// recording and write them as JSON.
    Extract {
        /// Path to a raw little-endian f32 PCM file, mono.
        input: PathBuf,
        /// Where to write the extracted `RecordingFeatures` JSON.
        output: PathBuf,
        /// Sample rate of `input`, in Hz.
        #[arg(long, default_value_t = 22050.0)]
        sample_rate: f64,
        /// Optional config file layered on top of the embedded defaults.
        #[arg(long)]
        config: Option<PathBuf>,
        /// RNG seed for GMM initialisation, for reproducible extraction.
        #[arg(long, default_value_t = 0)]
        seed: u64,
    },
    /// Learn a category from positive/negative example feature files.
    TrainCategory {
        /// Feature JSON files (from `extract`) for positive examples.
        #[arg(long, num_args = 1.., required = true)]
        positive: Vec<PathBuf>,
        /// Feature JSON files (from `extract`) for negative examples.
        #[arg(long, num_args = 1.., required = true)]
        negative: Vec<PathBuf>,
        /// Where to write the learned `CategoryDescription` JSON.
        output: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long, default_value_t = 0)]
        seed: u64,
    },
    /// Score a recording's features against a learned category.
    Score {
        /// Feature JSON file (from `extract`) of the recording to score.
        features: PathBuf,
        /// Category description JSON (from `train-category`).
        category: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long, default_value_t = 0)]
        seed: u64,
    },
}

fn read_pcm_f32(path: &Path) -> Result<Vec<f64>> {
    let bytes = fs::read(path)
        .with_context(|| format!("reading PCM file {}", path.display()))?;
    if bytes.len() % 4 != 0 {
        bail!(
            "{} has {} bytes, not a whole number of f32 samples",
            path.display(),
            bytes.len()
        );
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) as f64)
        .collect())
}

struct LoggingProgress;

impl ProgressSink for LoggingProgress {
    fn report(&self, id: &str, progress: f64, message: &str) {
        info!("[{id}] ({progress:.2}) {message}");
    }
}

fn extract_features(
    signal: &[f64],
    fs: f64,
    config: &EngineConfig,
    rng: &mut StdRng,
) -> Result<RecordingFeatures> {
    let cancel = CancellationToken::new();
    let progress = LoggingProgress;

    let cqt_params = CqtParams::from_config(&config.cqt, fs);
    let cqt = ConstantQTransform::build(cqt_params).context("building constant-Q kernel")?;
    let result = cqt
        .apply_cancellable(signal, &cancel)
        .context("applying constant-Q transform")?;

    let timbre_vectors = timbral::timbre_vectors(&result, &config.timbre);
    let timbre_model = TimbreModel::train(
        &timbre_vectors,
        &config.timbre,
        &config.gmm,
        rng,
        &progress,
        &cancel,
    )
    .context("training timbre model")?;

    let (chroma_vectors, _chords, _mode) = chroma::chroma_vectors(&result, &config.chroma, true);
    let chroma_model = ChromaModel::train(
        &chroma_vectors,
        &config.chroma,
        &config.gmm,
        rng,
        &progress,
        &cancel,
    )
    .context("training chroma model")?;

    let dynamic_range = dynamics::dynamic_range(&result, &config.dynamics);
    let tempo_estimate = tempo::estimate_tempo(&result, &config.tempo);

    Ok(RecordingFeatures {
        timbre: timbre_model.gmm,
        chroma: chroma_model.gmm,
        tempo_bpm: tempo_estimate.mean_bpm,
        length_seconds: result.original_duration,
        dynamic_range_mean: dynamic_range.mean,
        dynamic_range_rms: dynamic_range.rms,
    })
}

fn load_features(path: &Path) -> Result<RecordingFeatures> {
    let stored: cadence_store::StoredRecordingFeatures = serde_json::from_str(
        &fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?,
    )
    .with_context(|| format!("parsing features in {}", path.display()))?;
    cadence_store::category::from_stored_features(&stored)
        .map_err(|e| anyhow::anyhow!("malformed features in {}: {e}", path.display()))
}

impl Command {
    pub fn handle(&self) -> Result<()> {
        match self {
            Command::Extract {
                input,
                output,
                sample_rate,
                config,
                seed,
            } => {
                let engine_config =
                    EngineConfig::load(config.as_deref()).context("loading engine config")?;
                let mut rng = StdRng::seed_from_u64(*seed);
                let signal = read_pcm_f32(input)?;
                let features = extract_features(&signal, *sample_rate, &engine_config, &mut rng)?;
                let stored = cadence_store::category::to_stored_features(&features);
                fs::write(output, serde_json::to_string_pretty(&stored)?)
                    .with_context(|| format!("writing {}", output.display()))?;
                info!("extracted features for {} -> {}", input.display(), output.display());
                Ok(())
            }
            Command::TrainCategory {
                positive,
                negative,
                output,
                config,
                seed,
            } => {
                let engine_config =
                    EngineConfig::load(config.as_deref()).context("loading engine config")?;
                let mut rng = StdRng::seed_from_u64(*seed);
                let positive_features: Vec<RecordingFeatures> = positive
                    .iter()
                    .map(|p| load_features(p))
                    .collect::<Result<_>>()?;
                let negative_features: Vec<RecordingFeatures> = negative
                    .iter()
                    .map(|p| load_features(p))
                    .collect::<Result<_>>()?;

                let model = CategoryLearner::train(
                    &positive_features,
                    &negative_features,
                    &engine_config.category,
                    &engine_config.gmm,
                    &mut rng,
                    &LoggingProgress,
                    &CancellationToken::new(),
                )
                .context("training category model")?;

                let description = cadence_store::category::to_description(&model);
                fs::write(output, serde_json::to_string_pretty(&description)?)
                    .with_context(|| format!("writing {}", output.display()))?;
                info!("trained category -> {}", output.display());
                Ok(())
            }
            Command::Score {
                features,
                category,
                config,
                seed,
            } => {
                let engine_config =
                    EngineConfig::load(config.as_deref()).context("loading engine config")?;
                let mut rng = StdRng::seed_from_u64(*seed);
                let recording = load_features(features)?;
                let description: cadence_store::CategoryDescription = serde_json::from_str(
                    &fs::read_to_string(category)
                        .with_context(|| format!("reading {}", category.display()))?,
                )
                .with_context(|| format!("parsing {}", category.display()))?;
                let model = cadence_store::category::from_description(&description)
                    .map_err(|e| anyhow::anyhow!("malformed category description: {e}"))?;

                let score = CategoryScorer::score(
                    &model,
                    &recording,
                    engine_config.category.kl_divergence_samples,
                    &mut rng,
                );
                println!("{score}");
                Ok(())
            }
        }
    }
}
