use std::any::Any;
use std::time::Duration;

use tracing::debug;

use crate::error::{BoxError, TerminalError};

/// Type-erased step value moved across the durable runner boundary.
///
/// Runners see every value the same way; the typed surface in
/// [`SagaContext::run`](crate::SagaContext::run) erases on the way in and
/// downcasts on the way out.
pub trait ErasedValue: Any + Send {
    /// Clone into a new boxed trait object.
    fn clone_value(&self) -> Box<dyn ErasedValue>;

    /// Convert into a boxed `Any` for downcasting.
    fn into_any(self: Box<Self>) -> Box<dyn Any + Send>;
}

impl<T> ErasedValue for T
where
    T: Clone + Send + 'static,
{
    fn clone_value(&self) -> Box<dyn ErasedValue> {
        Box::new(self.clone())
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send> {
        self
    }
}

/// Unit of work handed to a runner. Re-invoked on internal retries, so it
/// must be repeatable.
pub type ErasedAction<'a> = dyn FnMut() -> Result<Box<dyn ErasedValue>, BoxError> + 'a;

/// Retry configuration passed through to the durable runner untouched.
///
/// The orchestration core never interprets these fields; they exist so call
/// sites can describe a policy in the runner's terms.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetryPolicy {
    /// Give up after this many invocations of the action.
    pub max_attempts: Option<u32>,
    /// Delay before the first re-invocation.
    pub initial_delay: Option<Duration>,
    /// Multiplier applied to the delay between subsequent attempts.
    pub backoff_factor: Option<f64>,
}

impl RetryPolicy {
    /// Policy bounded to `max_attempts` invocations.
    #[must_use]
    pub fn limited(max_attempts: u32) -> Self {
        Self {
            max_attempts: Some(max_attempts),
            ..Self::default()
        }
    }

    /// Set the delay before the first re-invocation.
    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = Some(delay);
        self
    }

    /// Set the backoff multiplier between attempts.
    #[must_use]
    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = Some(factor);
        self
    }
}

/// External capability that executes a named unit of work.
///
/// Implementors guarantee at-most-once durable recording of the result per
/// name within one invocation's journal, retrying internally per the policy
/// until either success or a terminal signal. Persistence, scheduling and
/// transport all live behind this trait; the orchestration core only
/// delegates to it. A runner that journals results keeps a copy via
/// [`ErasedValue::clone_value`] before handing the value back to the caller.
pub trait DurableRunner: Send + Sync {
    /// Execute `action` under `name`.
    ///
    /// # Errors
    ///
    /// Returns the action's error once retries are exhausted or a terminal
    /// signal is observed.
    fn run(
        &self,
        name: &str,
        retry: Option<&RetryPolicy>,
        action: &mut ErasedAction<'_>,
    ) -> Result<Box<dyn ErasedValue>, BoxError>;
}

/// In-process runner with no durability.
///
/// Invokes the action directly, honouring `max_attempts` by immediate
/// re-invocation and stopping early when the action fails with a
/// [`TerminalError`]. Delays and backoff are ignored. Intended for tests and
/// single-process use; production deployments supply their own
/// [`DurableRunner`].
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineRunner;

impl DurableRunner for InlineRunner {
    fn run(
        &self,
        name: &str,
        retry: Option<&RetryPolicy>,
        action: &mut ErasedAction<'_>,
    ) -> Result<Box<dyn ErasedValue>, BoxError> {
        let max_attempts = retry
            .and_then(|policy| policy.max_attempts)
            .unwrap_or(1)
            .max(1);
        let mut attempt = 1;
        loop {
            match action() {
                Ok(value) => return Ok(value),
                Err(error) if error.is::<TerminalError>() => {
                    debug!(name, attempt, "unit signalled terminal failure");
                    return Err(error);
                }
                Err(error) if attempt >= max_attempts => return Err(error),
                Err(error) => {
                    debug!(name, attempt, error = %error, "unit failed; retrying");
                    attempt += 1;
                }
            }
        }
    }
}
