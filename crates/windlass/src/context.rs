use std::cell::RefCell;
use std::sync::Arc;

use crate::audit::SagaAuditLog;
use crate::classify::TerminalErrorRegistry;
use crate::error::BoxError;
use crate::runner::{DurableRunner, ErasedValue, RetryPolicy};
use crate::stack::{CompensationEntry, CompensationStack};

/// Ambient capabilities for one top-level saga invocation.
///
/// Owns exactly one compensation stack, the durable runner handle, the
/// terminal-error registry in effect, and the scoped service set `S`. A
/// nested invocation reached through
/// [`Workflow::run_as_step`](crate::Workflow::run_as_step) reuses the
/// caller's context verbatim; it never constructs its own.
pub struct SagaContext<S = ()> {
    runner: Arc<dyn DurableRunner>,
    registry: Arc<TerminalErrorRegistry>,
    services: S,
    stack: CompensationStack<S>,
    audit: RefCell<SagaAuditLog>,
}

impl<S> SagaContext<S> {
    pub(crate) fn new(
        runner: Arc<dyn DurableRunner>,
        registry: Arc<TerminalErrorRegistry>,
        services: S,
    ) -> Self {
        Self {
            runner,
            registry,
            services,
            stack: CompensationStack::new(),
            audit: RefCell::new(SagaAuditLog::new()),
        }
    }

    /// The request-scoped service set attached to this invocation.
    #[must_use]
    pub fn services(&self) -> &S {
        &self.services
    }

    /// Execute `action` through the durable runner under `name`.
    ///
    /// This is the typed face of the runner seam: the value is erased on the
    /// way in and downcast back on the way out. The action may be re-invoked
    /// by the runner's retry machinery, so it must be repeatable.
    ///
    /// # Errors
    ///
    /// Returns the action's error once the runner gives up on it.
    pub fn run<T: Clone + Send + 'static>(
        &self,
        name: &str,
        retry: Option<&RetryPolicy>,
        mut action: impl FnMut() -> Result<T, BoxError>,
    ) -> Result<T, BoxError> {
        let mut erased = || action().map(|value| Box::new(value) as Box<dyn ErasedValue>);
        let value = self.runner.run(name, retry, &mut erased)?;
        let value = value
            .into_any()
            .downcast::<T>()
            .expect("durable runner must return the value produced by the action");
        Ok(*value)
    }

    pub(crate) fn registry(&self) -> &TerminalErrorRegistry {
        &self.registry
    }

    pub(crate) fn push_compensation(&self, entry: CompensationEntry<S>) {
        self.stack.push(entry);
    }

    pub(crate) fn take_compensations(&self) -> Vec<CompensationEntry<S>> {
        self.stack.take()
    }

    pub(crate) fn registered_compensations(&self) -> usize {
        self.stack.len()
    }

    pub(crate) fn record_step_start(&self, name: &str) {
        self.audit.borrow_mut().record_start(name);
    }

    pub(crate) fn record_step_completed(&self) {
        self.audit.borrow_mut().record_completed();
    }

    pub(crate) fn record_step_failed(&self) {
        self.audit.borrow_mut().record_failed();
    }

    pub(crate) fn record_compensated(&self, name: &str) {
        self.audit.borrow_mut().record_compensated(name);
    }

    pub(crate) fn record_compensation_failed(&self, name: &str) {
        self.audit.borrow_mut().record_compensation_failed(name);
    }

    /// Tear the context down into its service set and audit trail.
    pub(crate) fn finish(self) -> (S, SagaAuditLog) {
        (self.services, self.audit.into_inner())
    }
}
