//! Progress reporting is a capability the caller passes in; the core never
//! owns an ambient sink (see `ClusterAlgorithm`-style config injection in the
//! teacher's `core::config`, generalised here to a runtime callback instead
//! of a compile-time choice).

/// A sink invoked at meaningful stages (E-step boundary, octave boundary,
/// per-file completion). `progress` is in `[0, 1]` for determinate
/// operations, or negative for purely informational messages.
///
/// Implementations must be safe to call from worker threads; a UI-bound sink
/// should marshal to its own thread internally.
pub trait ProgressSink: Send + Sync {
    fn report(&self, id: &str, progress: f64, message: &str);
}

/// A sink that discards every report; the default when the caller does not
/// care to observe progress.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopProgressSink;

impl ProgressSink for NoopProgressSink {
    fn report(&self, _id: &str, _progress: f64, _message: &str) {}
}

impl<F> ProgressSink for F
where
    F: Fn(&str, f64, &str) + Send + Sync,
{
    fn report(&self, id: &str, progress: f64, message: &str) {
        self(id, progress, message);
    }
}
