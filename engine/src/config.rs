//! Tunable parameters for every stage of the pipeline, collected into one
//! config tree following `mecomp_core::config::Settings`: a `config`-crate
//! layered source (embedded default TOML + optional file + environment
//! overrides) deserialised with `serde`.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;

/// The default configuration, embedded at compile time so the engine is
/// usable with no external file at all.
pub static DEFAULT_CONFIG: &str = include_str!("../Cadence.toml");

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct EngineConfig {
    #[serde(default)]
    pub cqt: CqtConfig,
    #[serde(default)]
    pub gmm: GmmConfig,
    #[serde(default)]
    pub kmeans: KMeansConfig,
    #[serde(default)]
    pub timbre: TimbreConfig,
    #[serde(default)]
    pub chroma: ChromaConfig,
    #[serde(default)]
    pub dynamics: DynamicsConfig,
    #[serde(default)]
    pub tempo: TempoConfig,
    #[serde(default)]
    pub category: CategoryConfig,
}

impl EngineConfig {
    /// Load the embedded defaults, optionally layering a caller-supplied
    /// file and `CADENCE_`-prefixed environment variables on top.
    ///
    /// # Errors
    ///
    /// Returns an error if `path` is set but unreadable, or if the merged
    /// configuration fails to deserialise into `EngineConfig`.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder().add_source(File::from_str(
            DEFAULT_CONFIG,
            config::FileFormat::Toml,
        ));
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }
        builder
            .add_source(Environment::with_prefix("CADENCE").separator("__"))
            .build()?
            .try_deserialize()
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::load(None).expect("embedded default configuration must parse")
    }
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq)]
pub struct CqtConfig {
    pub f_min: f64,
    pub f_max: f64,
    pub bins_per_octave: usize,
    pub q: f64,
    pub threshold: f64,
    pub atom_hop_factor: f64,
    pub transpose_cents: f64,
}

impl Default for CqtConfig {
    fn default() -> Self {
        EngineConfig::default().cqt
    }
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq)]
pub struct GmmConfig {
    pub max_iterations: usize,
    pub convergence_tolerance: f64,
    pub min_variance: f64,
    pub weight_sum_tolerance: f64,
}

impl Default for GmmConfig {
    fn default() -> Self {
        EngineConfig::default().gmm
    }
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq)]
pub struct KMeansConfig {
    pub max_iterations: usize,
    pub reassignment_threshold: f64,
    pub use_kmeans_plus_plus: bool,
}

impl Default for KMeansConfig {
    fn default() -> Self {
        EngineConfig::default().kmeans
    }
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq)]
pub struct TimbreConfig {
    pub dimension: usize,
    pub slice_ms: f64,
    pub model_size: usize,
}

impl Default for TimbreConfig {
    fn default() -> Self {
        EngineConfig::default().timbre
    }
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq)]
pub struct ChromaConfig {
    pub model_size: usize,
    pub smoothing_reference_seconds: f64,
    pub slice_ms: f64,
}

impl Default for ChromaConfig {
    fn default() -> Self {
        EngineConfig::default().chroma
    }
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq)]
pub struct DynamicsConfig {
    pub tail_exclusion_seconds: f64,
    pub min_track_length_for_trim_seconds: f64,
}

impl Default for DynamicsConfig {
    fn default() -> Self {
        EngineConfig::default().dynamics
    }
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq)]
pub struct TempoConfig {
    pub max_lag_seconds: f64,
    pub slice_ms: f64,
}

impl Default for TempoConfig {
    fn default() -> Self {
        EngineConfig::default().tempo
    }
}

/// The single, consistently-applied default table for category-learning
/// parameters; the original implementation defaulted these inconsistently
/// between two call sites (see `DESIGN.md`).
#[derive(Clone, Copy, Debug, Deserialize, PartialEq)]
pub struct CategoryConfig {
    pub timbre_model_size: usize,
    pub timbre_sample_count: usize,
    pub chroma_model_size: usize,
    pub chroma_sample_count: usize,
    pub kl_divergence_samples: usize,
}

impl Default for CategoryConfig {
    fn default() -> Self {
        EngineConfig::default().category
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn embedded_default_parses() {
        let cfg = EngineConfig::load(None).unwrap();
        assert_eq!(cfg.cqt.bins_per_octave, 12);
        assert_eq!(cfg.category.timbre_model_size, 60);
        assert_eq!(cfg.category.chroma_model_size, 8);
    }

    #[test]
    fn file_override_layers_on_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cadence.toml");
        std::fs::write(&path, "[cqt]\nbins_per_octave = 24\n").unwrap();

        let cfg = EngineConfig::load(Some(&path)).unwrap();
        assert_eq!(cfg.cqt.bins_per_octave, 24);
        // untouched sections keep their embedded defaults
        assert_eq!(cfg.gmm.max_iterations, 10);
    }
}
