use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::context::SagaContext;
use crate::error::BoxError;

/// One registered undo action, owned exclusively by the stack it was pushed
/// onto.
///
/// The thunk is closed over the compensation action, a shared data cell the
/// step wrapper resolves once the forward action settles, and the original
/// input as fallback. The `failed` flag records whether the step ultimately
/// succeeded; it stays `true` until the forward action commits.
pub(crate) struct CompensationEntry<S> {
    pub(crate) step: String,
    pub(crate) failed: Rc<Cell<bool>>,
    pub(crate) invoke: Box<dyn FnOnce(&SagaContext<S>) -> Result<(), BoxError>>,
}

/// Ordered undo stack for one saga execution.
///
/// Append-only until unwind: entries are pushed in registration order and
/// consumed exactly once, in strict reverse, by the owning workflow runner.
pub(crate) struct CompensationStack<S> {
    entries: RefCell<Vec<CompensationEntry<S>>>,
}

impl<S> CompensationStack<S> {
    pub(crate) fn new() -> Self {
        Self {
            entries: RefCell::new(Vec::new()),
        }
    }

    pub(crate) fn push(&self, entry: CompensationEntry<S>) {
        self.entries.borrow_mut().push(entry);
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    /// Consume every entry, in registration order. The stack is spent
    /// afterwards; later pushes land in a stack nobody will unwind.
    pub(crate) fn take(&self) -> Vec<CompensationEntry<S>> {
        self.entries.take()
    }
}
