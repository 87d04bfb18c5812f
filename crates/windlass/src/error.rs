use thiserror::Error;

/// Dynamic error currency for forward actions, compensations and runners.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A failure the durable runner must not retry.
///
/// Raising one from a forward action, or classifying an error into one,
/// finishes the invocation as failed and triggers unwind of the owning saga.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct TerminalError {
    /// Why the saga cannot continue.
    pub message: String,
    /// The error that was classified terminal, when there was one.
    #[source]
    pub source: Option<BoxError>,
}

impl TerminalError {
    /// Create a terminal failure with a bare message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Create a terminal failure wrapping the error that caused it.
    #[must_use]
    pub fn with_source(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self {
            message: message.into(),
            source: Some(source.into()),
        }
    }
}

/// Error from a failed compensation during unwind.
#[derive(Debug, Error)]
#[error("compensation for step '{step}' failed")]
pub struct CompensationError {
    /// Name of the step whose compensation failed.
    pub step: String,
    /// The underlying error.
    #[source]
    pub source: BoxError,
}

/// Error from a saga invocation.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SagaError {
    /// A step failed terminally; every registered compensation ran cleanly.
    #[error("step '{step}' failed terminally")]
    Terminal {
        /// Name of the step that failed.
        step: String,
        /// The terminal failure itself.
        #[source]
        source: TerminalError,
    },

    /// A step failed without being classified terminal.
    ///
    /// The saga state is untouched; the durable runner's own retry policy
    /// decides what happens next.
    #[error("step '{step}' failed")]
    Retryable {
        /// Name of the step that failed.
        step: String,
        /// The unclassified error, propagated unchanged.
        #[source]
        source: BoxError,
    },

    /// A step failed terminally and one or more compensations failed too.
    ///
    /// The remaining compensations still ran; unwind is best-effort.
    #[error("step '{step}' failed terminally, and {} compensation(s) also failed", compensation_errors.len())]
    CompensationFailed {
        /// Name of the step that originally failed.
        step: String,
        /// The terminal failure that triggered the unwind.
        source: TerminalError,
        /// Errors collected from failed compensations, in unwind order.
        compensation_errors: Vec<CompensationError>,
    },
}

impl SagaError {
    /// Whether this failure finished the saga for good.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Terminal { .. } | Self::CompensationFailed { .. }
        )
    }

    /// Whether this failure was left for the runner's retry policy.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable { .. })
    }

    /// Name of the step the failure is attributed to.
    #[must_use]
    pub fn step(&self) -> &str {
        match self {
            Self::Terminal { step, .. }
            | Self::Retryable { step, .. }
            | Self::CompensationFailed { step, .. } => step,
        }
    }
}
