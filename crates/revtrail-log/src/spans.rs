//! Span helpers for audit units.

use std::future::Future;
use tracing::{debug_span, info_span, Instrument, Span};

/// Span covering one unit of mutation, from capture to the final emission.
pub fn unit_span(context: &str, policy: &str) -> Span {
    info_span!(
        "audit_unit",
        context = %context,
        policy = %policy,
        entries = tracing::field::Empty,
        error = tracing::field::Empty,
    )
}

/// Span covering one call into the event sink.
pub fn emission_span(operation: &'static str, event_type: &str) -> Span {
    debug_span!("audit_emit", op = operation, event_type = %event_type)
}

/// Instrument a future with a span.
pub fn instrument_future<F: Future>(future: F, span: Span) -> impl Future<Output = F::Output> {
    future.instrument(span)
}

/// Record an error on the current span.
pub fn record_error(error: &dyn std::error::Error) {
    Span::current().record("error", tracing::field::display(error));
}

/// Measures how long an operation takes.
pub struct Timer {
    start: std::time::Instant,
    operation: &'static str,
}

impl Timer {
    /// Start a new timer.
    pub fn start(operation: &'static str) -> Self {
        Self {
            start: std::time::Instant::now(),
            operation,
        }
    }

    /// Log the elapsed time.
    pub fn finish(self) {
        tracing::debug!(
            operation = %self.operation,
            duration_ms = %self.start.elapsed().as_millis(),
            "operation completed"
        );
    }
}

/// Time a block and log its duration at debug level.
#[macro_export]
macro_rules! timed {
    ($name:expr, $body:expr) => {{
        let _timer = $crate::spans::Timer::start($name);
        let result = $body;
        _timer.finish();
        result
    }};
}
