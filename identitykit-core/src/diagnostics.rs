//! Correlation context threaded through broker calls.

use std::fmt;

use uuid::Uuid;

/// Per-request diagnostic context.
///
/// Passed by reference into every IPC entry point so each log line of one
/// logical request carries the same correlation id, independent of which
/// thread ends up running it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticContext {
    correlation_id: Uuid,
}

impl DiagnosticContext {
    /// Creates a context with a fresh random correlation id.
    #[must_use]
    pub fn new() -> Self {
        Self {
            correlation_id: Uuid::new_v4(),
        }
    }

    /// Creates a context that continues an existing correlation id.
    #[must_use]
    pub const fn with_correlation_id(correlation_id: Uuid) -> Self {
        Self { correlation_id }
    }

    /// The correlation id of this request.
    #[must_use]
    pub const fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    /// A span for `operation`, tagged with the correlation id. The
    /// `target_package` field is left for the caller to record.
    #[must_use]
    pub fn span(&self, operation: &str) -> tracing::Span {
        tracing::info_span!(
            "broker_operation",
            correlation_id = %self.correlation_id,
            operation = operation,
            target_package = tracing::field::Empty,
        )
    }
}

impl Default for DiagnosticContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DiagnosticContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.correlation_id)
    }
}
