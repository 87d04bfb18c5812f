use std::any::TypeId;
use std::error::Error;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use tracing::debug;

use crate::error::TerminalError;

/// Outcome of classifying an error at a step boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// Non-retryable; unwinds the owning saga with this message.
    Terminal(String),
    /// Leave the error as-is for the durable runner's retry policy.
    Unclassified,
}

/// Fallback classifier consulted when no registered matcher applies.
pub type ClassifierFn =
    Arc<dyn Fn(&(dyn Error + 'static)) -> Classification + Send + Sync>;

type PredicateFn = Box<dyn Fn(&(dyn Error + 'static)) -> bool + Send + Sync>;

#[derive(PartialEq, Eq)]
enum MatcherKey {
    Type(TypeId),
    Named(String),
}

struct TerminalMatcher {
    key: MatcherKey,
    matches: PredicateFn,
}

#[derive(Default)]
struct RegistryInner {
    matchers: Vec<TerminalMatcher>,
    fallback: Option<ClassifierFn>,
}

/// Process-wide set of errors that always classify as terminal, plus at most
/// one fallback classifier.
///
/// This is startup-time configuration, not per-request state: concurrent
/// `register`/`unregister`/`clear` calls from different executions race with
/// each other by design. Tests should build their own registry and attach it
/// with [`Workflow::with_registry`](crate::Workflow::with_registry) instead of
/// mutating the global one.
#[derive(Default)]
pub struct TerminalErrorRegistry {
    inner: RwLock<RegistryInner>,
}

impl TerminalErrorRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Treat every error of type `E` as terminal.
    ///
    /// Registering the same type twice has no additional effect.
    pub fn register<E: Error + 'static>(&self) {
        let key = MatcherKey::Type(TypeId::of::<E>());
        let mut inner = self.write();
        if inner.matchers.iter().any(|m| m.key == key) {
            return;
        }
        debug!(error_type = std::any::type_name::<E>(), "registered terminal error type");
        inner.matchers.push(TerminalMatcher {
            key,
            matches: Box::new(|error| error.is::<E>()),
        });
    }

    /// Stop treating errors of type `E` as terminal.
    pub fn unregister<E: Error + 'static>(&self) {
        let key = MatcherKey::Type(TypeId::of::<E>());
        self.write().matchers.retain(|m| m.key != key);
    }

    /// Register a named predicate marking matching errors terminal.
    ///
    /// The name is the unregistration handle; registering under an existing
    /// name replaces the previous predicate.
    pub fn register_predicate(
        &self,
        name: impl Into<String>,
        predicate: impl Fn(&(dyn Error + 'static)) -> bool + Send + Sync + 'static,
    ) {
        let name = name.into();
        let key = MatcherKey::Named(name.clone());
        let mut inner = self.write();
        inner.matchers.retain(|m| m.key != key);
        debug!(predicate = %name, "registered terminal error predicate");
        inner.matchers.push(TerminalMatcher {
            key,
            matches: Box::new(predicate),
        });
    }

    /// Remove a predicate registered under `name`.
    pub fn unregister_predicate(&self, name: &str) {
        self.write()
            .matchers
            .retain(|m| m.key != MatcherKey::Named(name.to_string()));
    }

    /// Remove every registered type and predicate. The fallback classifier
    /// is left in place.
    pub fn clear(&self) {
        self.write().matchers.clear();
    }

    /// Install (or with `None`, remove) the fallback classifier consulted
    /// when no registered matcher applies.
    pub fn set_fallback(&self, classifier: Option<ClassifierFn>) {
        self.write().fallback = classifier;
    }

    /// Classify an error.
    ///
    /// A thrown [`TerminalError`] is terminal by definition; otherwise the
    /// registered matchers are consulted (terminal with the error's own
    /// message), then the fallback classifier, and finally the error is left
    /// unclassified for the runner's retry policy.
    #[must_use]
    pub fn classify(&self, error: &(dyn Error + 'static)) -> Classification {
        if let Some(terminal) = error.downcast_ref::<TerminalError>() {
            return Classification::Terminal(terminal.message.clone());
        }
        let inner = self.read();
        if inner.matchers.iter().any(|m| (m.matches)(error)) {
            return Classification::Terminal(error.to_string());
        }
        if let Some(fallback) = &inner.fallback {
            return fallback(error);
        }
        Classification::Unclassified
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, RegistryInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, RegistryInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

static GLOBAL: OnceLock<Arc<TerminalErrorRegistry>> = OnceLock::new();

/// The process-wide registry used by workflows that were not given their own.
#[must_use]
pub fn global_registry() -> Arc<TerminalErrorRegistry> {
    Arc::clone(GLOBAL.get_or_init(|| Arc::new(TerminalErrorRegistry::new())))
}

/// Treat every error of type `E` as terminal, process-wide.
pub fn register_terminal_error<E: Error + 'static>() {
    global_registry().register::<E>();
}

/// Undo [`register_terminal_error`] for type `E`.
pub fn unregister_terminal_error<E: Error + 'static>() {
    global_registry().unregister::<E>();
}

/// Register a named terminal-error predicate, process-wide.
pub fn register_terminal_predicate(
    name: impl Into<String>,
    predicate: impl Fn(&(dyn Error + 'static)) -> bool + Send + Sync + 'static,
) {
    global_registry().register_predicate(name, predicate);
}

/// Remove a process-wide predicate registered under `name`.
pub fn unregister_terminal_predicate(name: &str) {
    global_registry().unregister_predicate(name);
}

/// Remove every process-wide registered type and predicate.
pub fn clear_terminal_errors() {
    global_registry().clear();
}

/// Install (or with `None`, remove) the process-wide fallback classifier.
pub fn set_global_error_classifier(classifier: Option<ClassifierFn>) {
    global_registry().set_fallback(classifier);
}
