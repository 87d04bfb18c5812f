//! Compensation-based saga orchestration over a durable step runner.
//!
//! A saga is a sequence of steps, each with an optional undo action. Steps
//! execute through an external [`DurableRunner`], the capability that runs
//! a named unit of work with retry semantics and at-most-once durable
//! recording, while this crate maintains the per-execution compensation
//! stack: a permanent failure at any point unwinds everything that already
//! succeeded, in strict reverse registration order.
//!
//! Steps come in two flavours. A [hybrid](Step::hybrid) step registers its
//! compensation *before* the forward action runs, so even a partial failure
//! gets a best-effort undo (with the original input as fallback data). A
//! [strict](Step::strict) step registers only after the forward action fully
//! commits, for undo logic that cannot run against something that never
//! existed.
//!
//! Errors are classified at the step boundary: a step-level classifier takes
//! precedence over the process-wide [`TerminalErrorRegistry`], which takes
//! precedence over an optional global fallback classifier. Terminal failures
//! unwind the saga; everything else propagates unchanged for the runner's
//! own retry policy.
//!
//! Sagas compose: [`Workflow::run_as_step`] runs one workflow's handler
//! against the caller's [`SagaContext`], so the nested steps' compensations
//! interleave into the caller's stack and unwinding stays with the outermost
//! runner.

mod audit;
mod classify;
mod context;
mod error;
mod outcome;
mod runner;
mod scope;
mod stack;
mod step;
mod workflow;

pub use audit::{SagaAuditLog, StepRecord, StepStatus};
pub use classify::{
    Classification, ClassifierFn, TerminalErrorRegistry, clear_terminal_errors, global_registry,
    register_terminal_error, register_terminal_predicate, set_global_error_classifier,
    unregister_terminal_error, unregister_terminal_predicate,
};
pub use context::SagaContext;
pub use error::{BoxError, CompensationError, SagaError, TerminalError};
pub use outcome::{CompensationData, StepOutcome};
pub use runner::{DurableRunner, ErasedAction, ErasedValue, InlineRunner, RetryPolicy};
pub use scope::{DisposalDecisionFn, DisposalPolicy, Scope};
pub use step::{Step, StepMode};
pub use workflow::Workflow;
