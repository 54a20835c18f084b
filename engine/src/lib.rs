//! Feature-extraction and probabilistic-modelling core for
//! acoustic-content recording classification: a constant-Q transform, a
//! Gaussian Mixture Model engine, timbre/chroma/tempo/dynamic-range
//! extractors built on it, and a category learner/scorer built on those.
//!
//! Audio decoding, the persistent store, the CLI surface, and
//! thread/process management are external collaborators; this crate owns
//! only the numerical core and the interfaces (cancellation, progress,
//! configuration, errors) it needs to stay embeddable in any of them.

pub mod cancel;
pub mod category;
pub mod chroma;
pub mod config;
pub mod cqt;
pub mod dct;
pub mod dynamics;
pub mod errors;
pub mod fft;
pub mod gmm;
pub mod kmeans;
pub mod linalg;
pub mod progress;
pub mod stats;
pub mod tempo;
pub mod timbral;

pub use cancel::CancellationToken;
pub use config::EngineConfig;
pub use errors::{EngineError, EngineResult};
pub use progress::{NoopProgressSink, ProgressSink};
