use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::error::{BoxError, SagaError};

type CreateFn<S, I> = Arc<dyn Fn(&I) -> Result<S, BoxError> + Send + Sync>;
type DisposeFn<S> = Arc<dyn Fn(S, Option<&SagaError>) + Send + Sync>;

/// Decision function for [`DisposalPolicy::Custom`].
pub type DisposalDecisionFn = Arc<dyn Fn(Option<&SagaError>) -> bool + Send + Sync>;

/// When the scoped service set is torn down after an invocation settles.
#[derive(Clone)]
pub enum DisposalPolicy {
    /// Dispose after every invocation.
    Always,
    /// Never dispose; the caller keeps ownership of cleanup.
    Never,
    /// Dispose only when the invocation succeeded.
    OnSuccess,
    /// Ask a function, passing the failure when there was one.
    Custom(DisposalDecisionFn),
}

impl DisposalPolicy {
    fn should_dispose(&self, failure: Option<&SagaError>) -> bool {
        match self {
            Self::Always => true,
            Self::Never => false,
            Self::OnSuccess => failure.is_none(),
            Self::Custom(decide) => decide(failure),
        }
    }
}

impl fmt::Debug for DisposalPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Always => "Always",
            Self::Never => "Never",
            Self::OnSuccess => "OnSuccess",
            Self::Custom(_) => "Custom",
        };
        f.write_str(name)
    }
}

/// Request-scoped service set configuration for a workflow.
///
/// The creation function runs once per top-level invocation, never for an
/// embedded one, and builds the service set from the invocation's input. The
/// disposal hook runs exactly once after the invocation settles, receiving
/// the failure (if any) so the policy can decide. Cloneable, so one scope
/// definition can back several workflows.
pub struct Scope<S, I> {
    create: CreateFn<S, I>,
    dispose: Option<DisposeFn<S>>,
    policy: DisposalPolicy,
}

impl<S, I> Clone for Scope<S, I> {
    fn clone(&self) -> Self {
        Self {
            create: Arc::clone(&self.create),
            dispose: self.dispose.as_ref().map(Arc::clone),
            policy: self.policy.clone(),
        }
    }
}

impl<S, I> Scope<S, I> {
    /// Scope built from a service-set creation function. Disposal defaults
    /// to [`DisposalPolicy::Always`], with no hook attached.
    #[must_use]
    pub fn new(create: impl Fn(&I) -> Result<S, BoxError> + Send + Sync + 'static) -> Self {
        Self {
            create: Arc::new(create),
            dispose: None,
            policy: DisposalPolicy::Always,
        }
    }

    /// Attach the disposal hook.
    #[must_use]
    pub fn on_dispose(mut self, dispose: impl Fn(S, Option<&SagaError>) + Send + Sync + 'static) -> Self {
        self.dispose = Some(Arc::new(dispose));
        self
    }

    /// Set the disposal policy.
    #[must_use]
    pub fn disposal_policy(mut self, policy: DisposalPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub(crate) fn create(&self, input: &I) -> Result<S, BoxError> {
        (self.create)(input)
    }

    /// Decide and perform disposal, exactly once per settled invocation.
    pub(crate) fn settle(&self, services: S, failure: Option<&SagaError>) {
        if !self.policy.should_dispose(failure) {
            debug!(policy = ?self.policy, "scope retained");
            return;
        }
        if let Some(dispose) = &self.dispose {
            debug!(failed = failure.is_some(), "disposing scope");
            dispose(services, failure);
        }
    }
}

impl<I> Scope<(), I> {
    /// Scope for workflows that carry no services.
    pub(crate) fn unscoped() -> Self {
        Self::new(|_| Ok(())).disposal_policy(DisposalPolicy::Never)
    }
}
