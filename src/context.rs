//! Execution-context state.
//!
//! The original thread-bound "current transaction" lookup is modeled as an
//! explicit [`ExecutionContextState`] keyed by a caller-supplied
//! [`ContextId`]. Each context tracks at most one current physical
//! transaction plus a LIFO stack of suspended ones; the stack depth equals
//! the number of `REQUIRES_NEW`/`NOT_SUPPORTED` nestings currently open.
//!
//! Confinement rule: a context (and any `TransactionStatus` obtained in it)
//! belongs to exactly one thread or task. Accessing it from another context
//! is forbidden and undefined; the manager does not guard against it.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::resource::ResourceAdapter;
use crate::status::PhysicalTransaction;

/// Identity of a logical execution context (a thread or a task).
///
/// Supplied by the caller on every `get_transaction` call; the manager keys
/// all per-context state by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(u64);

impl ContextId {
    /// Create a context id from a caller-chosen value.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Derive a context id from the calling thread's identity.
    ///
    /// Convenient for thread-per-request callers; task-based callers should
    /// mint explicit ids instead.
    pub fn for_current_thread() -> Self {
        let mut hasher = DefaultHasher::new();
        std::thread::current().id().hash(&mut hasher);
        Self(hasher.finish())
    }
}

impl From<u64> for ContextId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx-{:x}", self.0)
    }
}

/// A physical transaction parked on the suspension stack, paired with the
/// resource's suspend token that redeems it.
pub(crate) struct SuspendedTransaction<R: ResourceAdapter> {
    pub(crate) physical: Arc<PhysicalTransaction<R>>,
    pub(crate) token: R::SuspendToken,
}

/// Per-context transaction state.
///
/// Created lazily on first use, dropped once the outermost physical
/// transaction completes. A resume failure leaves the state in place but
/// poisoned: all further operations on the context are rejected.
pub(crate) struct ExecutionContextState<R: ResourceAdapter> {
    /// The currently active physical transaction, if any. At most one per
    /// context at any instant.
    pub(crate) current: Option<Arc<PhysicalTransaction<R>>>,
    /// Suspended transactions, innermost last.
    pub(crate) suspended: Vec<SuspendedTransaction<R>>,
    /// Set when a resume failed; the context is unusable from then on.
    pub(crate) poisoned: bool,
}

impl<R: ResourceAdapter> ExecutionContextState<R> {
    pub(crate) fn new() -> Self {
        Self {
            current: None,
            suspended: Vec::new(),
            poisoned: false,
        }
    }

    /// Whether this state carries nothing worth keeping.
    pub(crate) fn is_empty(&self) -> bool {
        self.current.is_none() && self.suspended.is_empty() && !self.poisoned
    }

    pub(crate) fn suspended_depth(&self) -> usize {
        self.suspended.len()
    }
}

impl<R: ResourceAdapter> fmt::Debug for ExecutionContextState<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContextState")
            .field("active", &self.current.is_some())
            .field("suspended_depth", &self.suspended.len())
            .field("poisoned", &self.poisoned)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_id_equality() {
        assert_eq!(ContextId::new(7), ContextId::from(7));
        assert_ne!(ContextId::new(7), ContextId::new(8));
    }

    #[test]
    fn test_context_id_for_current_thread_is_stable() {
        assert_eq!(ContextId::for_current_thread(), ContextId::for_current_thread());
    }

    #[test]
    fn test_context_id_differs_across_threads() {
        let here = ContextId::for_current_thread();
        let there = std::thread::spawn(ContextId::for_current_thread)
            .join()
            .unwrap();
        assert_ne!(here, there);
    }

    #[test]
    fn test_display() {
        assert_eq!(ContextId::new(255).to_string(), "ctx-ff");
    }
}
