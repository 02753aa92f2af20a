use tokio::time::Instant;
use tracing::trace;

use crate::metrics::OPERATION_DURATION;

/// Records how long a status store operation took.
///
/// On drop the latency is observed in `dss_operation_duration_ms{op}` and
/// traced under the `timing` target.
pub(crate) struct ScopedTimer {
    start: Instant,
    op: &'static str,
}

impl ScopedTimer {
    pub(crate) fn new(op: &'static str) -> Self {
        Self {
            start: Instant::now(),
            op,
        }
    }
}

impl Drop for ScopedTimer {
    fn drop(&mut self) {
        let elapsed_ms = self.start.elapsed().as_secs_f64() * 1000.0;
        OPERATION_DURATION.with_label_values(&[self.op]).observe(elapsed_ms);
        trace!(target: "timing", op = self.op, elapsed_ms, "dss operation finished");
    }
}
