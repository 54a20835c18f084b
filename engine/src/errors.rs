use thiserror::Error;

/// Error kinds produced by the feature-extraction and modelling core.
///
/// `SingularCovariance` and zero-energy slices are deliberately absent: both
/// are numerical degeneracies recovered locally (pseudoinverse fallback,
/// sentinel-vector discard) and are never surfaced to callers.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("invalid parameters: {0}")]
    BadParameters(String),
    #[error("empty input: {0}")]
    EmptyInput(String),
    #[error("malformed model: {0}")]
    MalformedModel(String),
    #[error("operation cancelled")]
    Cancelled,
}

pub type EngineResult<T> = Result<T, EngineError>;
