use std::sync::Arc;

use tracing::{debug, warn};

use crate::audit::SagaAuditLog;
use crate::classify::{TerminalErrorRegistry, global_registry};
use crate::context::SagaContext;
use crate::error::{CompensationError, SagaError, TerminalError};
use crate::runner::DurableRunner;
use crate::scope::Scope;
use crate::stack::CompensationEntry;

type HandlerFn<I, O, S> =
    Box<dyn Fn(&SagaContext<S>, I) -> Result<O, SagaError> + Send + Sync>;

/// Top-level entry point for one saga.
///
/// A workflow owns a handler built from [`Step`](crate::Step) invocations.
/// Invoked standalone it creates a fresh [`SagaContext`] and carries sole
/// responsibility for unwinding the compensation stack; invoked through
/// [`run_as_step`](Workflow::run_as_step) it runs against the caller's
/// context and its steps' compensations join the caller's stack.
pub struct Workflow<I, O, S = ()> {
    name: String,
    handler: HandlerFn<I, O, S>,
    scope: Scope<S, I>,
    registry: Option<Arc<TerminalErrorRegistry>>,
}

impl<I, O> Workflow<I, O>
where
    I: 'static,
    O: 'static,
{
    /// Workflow with no scoped services.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        handler: impl Fn(&SagaContext, I) -> Result<O, SagaError> + Send + Sync + 'static,
    ) -> Self {
        Self::scoped(name, Scope::unscoped(), handler)
    }
}

impl<I, O, S> Workflow<I, O, S>
where
    I: 'static,
    O: 'static,
    S: 'static,
{
    /// Workflow whose invocations carry a request-scoped service set.
    ///
    /// The scope's creation function runs once per [`invoke`](Self::invoke),
    /// never for an embedded invocation.
    #[must_use]
    pub fn scoped(
        name: impl Into<String>,
        scope: Scope<S, I>,
        handler: impl Fn(&SagaContext<S>, I) -> Result<O, SagaError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            handler: Box::new(handler),
            scope,
            registry: None,
        }
    }

    /// Use `registry` instead of the process-wide one for classification.
    #[must_use]
    pub fn with_registry(mut self, registry: Arc<TerminalErrorRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Workflow name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Standalone invocation.
    ///
    /// Creates a fresh context, runs the handler, and on terminal failure
    /// unwinds every registered compensation in reverse registration order
    /// before re-raising the failure.
    ///
    /// # Errors
    ///
    /// [`SagaError::Terminal`] (or [`SagaError::CompensationFailed`] when
    /// compensations also failed) after a full unwind;
    /// [`SagaError::Retryable`] immediately and with zero compensations run,
    /// leaving the retry decision to the durable runner.
    pub fn invoke(&self, runner: Arc<dyn DurableRunner>, input: I) -> Result<O, SagaError> {
        self.invoke_internal(runner, input).0
    }

    /// Standalone invocation that also returns the audit trail.
    pub fn invoke_with_audit(
        &self,
        runner: Arc<dyn DurableRunner>,
        input: I,
    ) -> (Result<O, SagaError>, SagaAuditLog) {
        self.invoke_internal(runner, input)
    }

    /// Embedded invocation: run this workflow's handler against the
    /// caller's context.
    ///
    /// No new compensation stack, no scope creation, no unwind: the steps'
    /// compensations interleave into the caller's stack in call order, and
    /// unwinding stays the sole responsibility of the outermost runner that
    /// owns the stack.
    ///
    /// # Errors
    ///
    /// Whatever the handler raises, unchanged.
    pub fn run_as_step(&self, ctx: &SagaContext<S>, input: I) -> Result<O, SagaError> {
        debug!(workflow = %self.name, "running embedded in caller's context");
        (self.handler)(ctx, input)
    }

    fn invoke_internal(
        &self,
        runner: Arc<dyn DurableRunner>,
        input: I,
    ) -> (Result<O, SagaError>, SagaAuditLog) {
        let registry = self
            .registry
            .clone()
            .unwrap_or_else(global_registry);
        let services = match self.scope.create(&input) {
            Ok(services) => services,
            Err(error) => {
                warn!(workflow = %self.name, error = %error, "scope creation failed");
                let failure = SagaError::Terminal {
                    step: "scope".to_string(),
                    source: TerminalError::with_source("scope creation failed", error),
                };
                return (Err(failure), SagaAuditLog::new());
            }
        };

        let ctx = SagaContext::new(runner, registry, services);
        debug!(workflow = %self.name, "saga running");
        let result = match (self.handler)(&ctx, input) {
            Ok(output) => {
                let discarded = ctx.registered_compensations();
                if discarded > 0 {
                    debug!(
                        workflow = %self.name,
                        discarded,
                        "saga succeeded; compensations discarded"
                    );
                }
                Ok(output)
            }
            Err(failure) if failure.is_terminal() => Err(self.unwind(&ctx, failure)),
            Err(failure) => {
                // Left for the runner's retry policy: the handler will be
                // replayed from the top, so the stack dies with this
                // context, untouched.
                debug!(
                    workflow = %self.name,
                    error = %failure,
                    "retryable failure; no unwind"
                );
                Err(failure)
            }
        };

        let (services, audit) = ctx.finish();
        self.scope.settle(services, result.as_ref().err());
        (result, audit)
    }

    /// Pop and run every compensation, newest first, through the durable
    /// runner. Failures are collected and the unwind continues best-effort.
    fn unwind(&self, ctx: &SagaContext<S>, failure: SagaError) -> SagaError {
        let entries = ctx.take_compensations();
        debug!(
            workflow = %self.name,
            compensations = entries.len(),
            "unwinding saga"
        );

        let mut compensation_failures = Vec::new();
        for entry in entries.into_iter().rev() {
            let CompensationEntry {
                step,
                failed,
                invoke,
            } = entry;
            debug!(
                workflow = %self.name,
                step = %step,
                step_failed = failed.get(),
                "running compensation"
            );
            match invoke(ctx) {
                Ok(()) => ctx.record_compensated(&step),
                Err(error) => {
                    warn!(
                        workflow = %self.name,
                        step = %step,
                        error = %error,
                        "compensation failed; continuing unwind"
                    );
                    ctx.record_compensation_failed(&step);
                    compensation_failures.push(CompensationError {
                        step,
                        source: error,
                    });
                }
            }
        }

        if compensation_failures.is_empty() {
            return failure;
        }
        match failure {
            SagaError::Terminal { step, source } => SagaError::CompensationFailed {
                step,
                source,
                compensation_errors: compensation_failures,
            },
            SagaError::CompensationFailed {
                step,
                source,
                mut compensation_errors,
            } => {
                compensation_errors.extend(compensation_failures);
                SagaError::CompensationFailed {
                    step,
                    source,
                    compensation_errors,
                }
            }
            // Retryable failures never reach the unwind path.
            retryable @ SagaError::Retryable { .. } => retryable,
        }
    }
}
