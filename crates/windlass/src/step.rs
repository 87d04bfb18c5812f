use std::cell::{Cell, RefCell};
use std::error::Error;
use std::rc::Rc;
use std::sync::Arc;

use tracing::debug;

use crate::classify::Classification;
use crate::context::SagaContext;
use crate::error::{BoxError, SagaError, TerminalError};
use crate::outcome::{CompensationData, StepOutcome};
use crate::runner::RetryPolicy;
use crate::stack::CompensationEntry;

/// When a step registers its compensation relative to the forward action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepMode {
    /// Register before the forward action runs.
    ///
    /// A forward action that partially mutates external state and then
    /// throws still gets a best-effort undo, with the original input
    /// standing in when no richer data was produced.
    Hybrid,
    /// Register only after the forward action fully commits.
    ///
    /// Some undo logic is only meaningful once the operation exists to be
    /// undone; strict mode refuses to pretend otherwise.
    Strict,
}

type ForwardFn<I, O, D, S> =
    Arc<dyn Fn(&SagaContext<S>, I) -> Result<StepOutcome<O, D>, BoxError> + Send + Sync>;
type CompensateFn<I, D, S> =
    Arc<dyn Fn(&SagaContext<S>, CompensationData<I, D>) -> Result<(), BoxError> + Send + Sync>;
type StepClassifierFn =
    Arc<dyn Fn(&(dyn Error + 'static)) -> Classification + Send + Sync>;

/// A named unit of work with an optional undo, executed through the durable
/// runner and participating in the owning saga's compensation stack.
///
/// Names are used for runner bookkeeping and log correlation; keep them
/// unique within one saga handler.
pub struct Step<I, O, D = (), S = ()> {
    name: String,
    mode: StepMode,
    forward: ForwardFn<I, O, D, S>,
    compensation: Option<CompensateFn<I, D, S>>,
    classifier: Option<StepClassifierFn>,
    retry: Option<RetryPolicy>,
}

impl<I, O, D, S> Step<I, O, D, S>
where
    I: Clone + Send + 'static,
    O: Clone + Send + 'static,
    D: Clone + Send + 'static,
    S: 'static,
{
    /// Step that registers its compensation before the forward action runs.
    #[must_use]
    pub fn hybrid(
        name: impl Into<String>,
        forward: impl Fn(&SagaContext<S>, I) -> Result<StepOutcome<O, D>, BoxError>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        Self::with_mode(StepMode::Hybrid, name, forward)
    }

    /// Step that registers its compensation only after the forward action
    /// fully commits.
    #[must_use]
    pub fn strict(
        name: impl Into<String>,
        forward: impl Fn(&SagaContext<S>, I) -> Result<StepOutcome<O, D>, BoxError>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        Self::with_mode(StepMode::Strict, name, forward)
    }

    fn with_mode(
        mode: StepMode,
        name: impl Into<String>,
        forward: impl Fn(&SagaContext<S>, I) -> Result<StepOutcome<O, D>, BoxError>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            mode,
            forward: Arc::new(forward),
            compensation: None,
            classifier: None,
            retry: None,
        }
    }

    /// Attach the undo action.
    ///
    /// Hybrid steps may receive [`CompensationData::Fallback`] when the
    /// forward action never settled; strict steps always receive
    /// [`CompensationData::Rich`].
    #[must_use]
    pub fn compensate(
        mut self,
        action: impl Fn(&SagaContext<S>, CompensationData<I, D>) -> Result<(), BoxError>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        self.compensation = Some(Arc::new(action));
        self
    }

    /// Attach a step-level classifier, consulted before the registry.
    ///
    /// Returning [`Classification::Unclassified`] defers to workflow-wide
    /// policy rather than forcing the error retryable.
    #[must_use]
    pub fn classify_with(
        mut self,
        classifier: impl Fn(&(dyn Error + 'static)) -> Classification + Send + Sync + 'static,
    ) -> Self {
        self.classifier = Some(Arc::new(classifier));
        self
    }

    /// Retry policy handed through to the durable runner for this step.
    #[must_use]
    pub fn retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Step name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registration mode.
    #[must_use]
    pub fn mode(&self) -> StepMode {
        self.mode
    }

    /// Execute the forward action through the durable runner, maintaining
    /// this saga's compensation stack along the way.
    ///
    /// # Errors
    ///
    /// [`SagaError::Terminal`] when the outcome was a permanent failure or
    /// the error classified terminal; [`SagaError::Retryable`] when the
    /// error was left for the runner's retry policy.
    pub fn run(&self, ctx: &SagaContext<S>, input: I) -> Result<O, SagaError> {
        let resolved: Rc<RefCell<Option<D>>> = Rc::new(RefCell::new(None));
        let failed = Rc::new(Cell::new(true));

        if self.mode == StepMode::Hybrid {
            self.register_compensation(ctx, &resolved, &failed, &input);
        }

        ctx.record_step_start(&self.name);
        debug!(step = %self.name, mode = ?self.mode, "running step");
        let outcome = ctx.run(&self.name, self.retry.as_ref(), || {
            (self.forward)(ctx, input.clone())
        });

        match outcome {
            Ok(StepOutcome::Success {
                output,
                compensation,
            }) => {
                *resolved.borrow_mut() = Some(compensation);
                failed.set(false);
                if self.mode == StepMode::Strict {
                    self.register_compensation(ctx, &resolved, &failed, &input);
                }
                ctx.record_step_completed();
                Ok(output)
            }
            Ok(StepOutcome::PermanentFailure {
                message,
                compensation,
            }) => {
                // The pre-registered entry (hybrid) now has rich data to
                // work with. Strict steps registered nothing.
                *resolved.borrow_mut() = Some(compensation);
                ctx.record_step_failed();
                debug!(step = %self.name, %message, "step reported permanent failure");
                Err(SagaError::Terminal {
                    step: self.name.clone(),
                    source: TerminalError::new(message),
                })
            }
            Err(error) => {
                ctx.record_step_failed();
                match self.classify(ctx, error.as_ref()) {
                    Classification::Terminal(message) => {
                        debug!(step = %self.name, %message, "error classified terminal");
                        Err(SagaError::Terminal {
                            step: self.name.clone(),
                            source: TerminalError::with_source(message, error),
                        })
                    }
                    Classification::Unclassified => Err(SagaError::Retryable {
                        step: self.name.clone(),
                        source: error,
                    }),
                }
            }
        }
    }

    /// Step-level classifier first; a terminal result is final and an
    /// unclassified one defers to the registry layering.
    fn classify(
        &self,
        ctx: &SagaContext<S>,
        error: &(dyn Error + Send + Sync + 'static),
    ) -> Classification {
        let error: &(dyn Error + 'static) = error;
        if let Some(classifier) = &self.classifier {
            if let Classification::Terminal(message) = classifier(error) {
                return Classification::Terminal(message);
            }
        }
        ctx.registry().classify(error)
    }

    fn register_compensation(
        &self,
        ctx: &SagaContext<S>,
        resolved: &Rc<RefCell<Option<D>>>,
        failed: &Rc<Cell<bool>>,
        input: &I,
    ) {
        let Some(action) = &self.compensation else {
            return;
        };
        let action = Arc::clone(action);
        let resolved = Rc::clone(resolved);
        let fallback = input.clone();
        let undo_name = format!("undo:{}", self.name);
        debug!(step = %self.name, mode = ?self.mode, "registered compensation");
        ctx.push_compensation(CompensationEntry {
            step: self.name.clone(),
            failed: Rc::clone(failed),
            invoke: Box::new(move |ctx: &SagaContext<S>| {
                let data = match resolved.borrow_mut().take() {
                    Some(data) => CompensationData::Rich(data),
                    None => CompensationData::Fallback(fallback.clone()),
                };
                ctx.run(&undo_name, None, || action(ctx, data.clone()))
            }),
        });
    }
}
