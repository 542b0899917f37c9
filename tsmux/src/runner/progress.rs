use std::fmt;
use std::sync::Arc;

type ProgressFn = dyn Fn(f64) + Send + Sync;

/// Receives percentage reports from a running conversion.
///
/// The sink runs on the reporting task, so it must not block.
#[derive(Clone)]
pub struct ProgressReporter {
    sink: Arc<ProgressFn>,
}

impl ProgressReporter {
    pub fn new(sink: impl Fn(f64) + Send + Sync + 'static) -> Self {
        Self {
            sink: Arc::new(sink),
        }
    }

    pub fn noop() -> Self {
        Self::new(|_| {})
    }

    pub fn report(&self, percent: f64) {
        (self.sink)(percent);
    }
}

impl fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressReporter").finish_non_exhaustive()
    }
}
