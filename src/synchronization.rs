//! Transaction synchronization callbacks.
//!
//! A [`SynchronizationRegistry`] is scoped one-to-one with a physical
//! transaction and fires callbacks at four strictly ordered phases:
//!
//! ```text
//! before_commit(read_only)   commit path only
//! before_completion          both paths
//! after_commit               commit path only
//! after_completion(status)   both paths, exactly once
//! ```
//!
//! Callbacks run in registration order. The after-phases fire exactly once
//! per physical transaction no matter how many logical transactions
//! participated in it.

use std::fmt;

/// Error type synchronization callbacks may report.
pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;

/// Final outcome handed to `after_completion`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionStatus {
    /// The physical transaction committed.
    Committed,
    /// The physical transaction rolled back.
    RolledBack,
    /// The resource failed mid-completion; the actual outcome is unknown.
    Unknown,
}

impl fmt::Display for CompletionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompletionStatus::Committed => write!(f, "committed"),
            CompletionStatus::RolledBack => write!(f, "rolled back"),
            CompletionStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// Lifecycle phases, in firing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SyncPhase {
    BeforeCommit,
    BeforeCompletion,
    AfterCommit,
    AfterCompletion,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncPhase::BeforeCommit => write!(f, "before_commit"),
            SyncPhase::BeforeCompletion => write!(f, "before_completion"),
            SyncPhase::AfterCommit => write!(f, "after_commit"),
            SyncPhase::AfterCompletion => write!(f, "after_completion"),
        }
    }
}

/// Interface for components that want transaction lifecycle notifications.
///
/// All methods default to no-ops so implementors only override the phases
/// they care about.
///
/// Callbacks run inside the completing transaction's locks. They must not
/// call back into the manager for the same execution context; see the
/// confinement rule in the crate docs.
pub trait TransactionSynchronization: Send {
    /// Called before the resource commit. An error here aborts the commit
    /// and rolls the transaction back.
    fn before_commit(&mut self, _read_only: bool) -> Result<(), CallbackError> {
        Ok(())
    }

    /// Called before completion on both the commit and rollback paths.
    /// Errors are logged and swallowed.
    fn before_completion(&mut self) -> Result<(), CallbackError> {
        Ok(())
    }

    /// Called after a successful resource commit. Errors are collected into
    /// the completion report, never propagated.
    fn after_commit(&mut self) -> Result<(), CallbackError> {
        Ok(())
    }

    /// Called after completion with the final outcome. Errors are collected
    /// into the completion report, never propagated.
    fn after_completion(&mut self, _status: CompletionStatus) -> Result<(), CallbackError> {
        Ok(())
    }
}

/// A swallowed callback error, reported alongside the primary outcome.
#[derive(Debug)]
pub struct CallbackFailure {
    /// Phase in which the callback failed.
    pub phase: SyncPhase,
    /// The callback's error.
    pub error: CallbackError,
}

impl fmt::Display for CallbackFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} callback failed: {}", self.phase, self.error)
    }
}

/// Outcome of a completed `commit`/`rollback` call.
///
/// Callback errors from the after-phases never mask the primary outcome;
/// they are collected here (and logged at `warn`).
#[derive(Debug)]
pub struct CompletionReport {
    /// What actually happened to the physical transaction. For a
    /// transactionless status this reports the logical outcome only
    /// (`RolledBack` when it was marked rollback-only).
    pub status: CompletionStatus,
    /// Swallowed synchronization-callback errors, in firing order.
    pub callback_failures: Vec<CallbackFailure>,
}

impl CompletionReport {
    pub(crate) fn clean(status: CompletionStatus) -> Self {
        Self {
            status,
            callback_failures: Vec::new(),
        }
    }
}

/// Ordered callback list scoped to one physical transaction.
pub struct SynchronizationRegistry {
    synchronizations: Vec<Box<dyn TransactionSynchronization>>,
    /// Highest phase that has already fired, if any. Registration is
    /// rejected once completion has begun.
    fired: Option<SyncPhase>,
}

impl SynchronizationRegistry {
    pub(crate) fn new() -> Self {
        Self {
            synchronizations: Vec::new(),
            fired: None,
        }
    }

    /// Register a callback. Fails once any completion phase has run.
    pub fn register(
        &mut self,
        synchronization: Box<dyn TransactionSynchronization>,
    ) -> Result<(), SyncPhase> {
        if let Some(phase) = self.fired {
            return Err(phase);
        }
        self.synchronizations.push(synchronization);
        Ok(())
    }

    /// Number of registered callbacks.
    pub fn len(&self) -> usize {
        self.synchronizations.len()
    }

    /// Whether no callbacks are registered.
    pub fn is_empty(&self) -> bool {
        self.synchronizations.is_empty()
    }

    /// Fire `before_commit` in registration order. The first error stops
    /// iteration and is returned so the manager can abort the commit.
    pub(crate) fn trigger_before_commit(
        &mut self,
        read_only: bool,
    ) -> Result<(), CallbackError> {
        self.fired = Some(SyncPhase::BeforeCommit);
        for sync in &mut self.synchronizations {
            sync.before_commit(read_only)?;
        }
        Ok(())
    }

    /// Fire `before_completion` in registration order, swallowing errors.
    pub(crate) fn trigger_before_completion(&mut self) {
        self.fired = Some(SyncPhase::BeforeCompletion);
        for sync in &mut self.synchronizations {
            if let Err(err) = sync.before_completion() {
                log::warn!("before_completion callback failed: {}", err);
            }
        }
    }

    /// Fire `after_commit` in registration order, collecting errors.
    pub(crate) fn trigger_after_commit(&mut self, failures: &mut Vec<CallbackFailure>) {
        self.fired = Some(SyncPhase::AfterCommit);
        for sync in &mut self.synchronizations {
            if let Err(error) = sync.after_commit() {
                log::warn!("after_commit callback failed: {}", error);
                failures.push(CallbackFailure {
                    phase: SyncPhase::AfterCommit,
                    error,
                });
            }
        }
    }

    /// Fire `after_completion` in registration order, collecting errors.
    pub(crate) fn trigger_after_completion(
        &mut self,
        status: CompletionStatus,
        failures: &mut Vec<CallbackFailure>,
    ) {
        self.fired = Some(SyncPhase::AfterCompletion);
        for sync in &mut self.synchronizations {
            if let Err(error) = sync.after_completion(status) {
                log::warn!("after_completion callback failed: {}", error);
                failures.push(CallbackFailure {
                    phase: SyncPhase::AfterCompletion,
                    error,
                });
            }
        }
    }
}

impl fmt::Debug for SynchronizationRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SynchronizationRegistry")
            .field("registered", &self.synchronizations.len())
            .field("fired", &self.fired)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct Recorder {
        tag: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        fail_after_commit: bool,
    }

    impl TransactionSynchronization for Recorder {
        fn before_commit(&mut self, read_only: bool) -> Result<(), CallbackError> {
            self.log
                .lock()
                .unwrap()
                .push(format!("{}:before_commit({})", self.tag, read_only));
            Ok(())
        }

        fn before_completion(&mut self) -> Result<(), CallbackError> {
            self.log
                .lock()
                .unwrap()
                .push(format!("{}:before_completion", self.tag));
            Ok(())
        }

        fn after_commit(&mut self) -> Result<(), CallbackError> {
            self.log.lock().unwrap().push(format!("{}:after_commit", self.tag));
            if self.fail_after_commit {
                return Err("cache refresh failed".into());
            }
            Ok(())
        }

        fn after_completion(&mut self, status: CompletionStatus) -> Result<(), CallbackError> {
            self.log
                .lock()
                .unwrap()
                .push(format!("{}:after_completion({})", self.tag, status));
            Ok(())
        }
    }

    fn recorder(tag: &'static str, log: &Arc<Mutex<Vec<String>>>) -> Box<Recorder> {
        Box::new(Recorder {
            tag,
            log: log.clone(),
            fail_after_commit: false,
        })
    }

    #[test]
    fn test_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = SynchronizationRegistry::new();
        registry.register(recorder("a", &log)).unwrap();
        registry.register(recorder("b", &log)).unwrap();

        registry.trigger_before_commit(false).unwrap();
        registry.trigger_before_completion();
        let mut failures = Vec::new();
        registry.trigger_after_commit(&mut failures);
        registry.trigger_after_completion(CompletionStatus::Committed, &mut failures);

        assert!(failures.is_empty());
        let entries = log.lock().unwrap();
        assert_eq!(
            entries.as_slice(),
            [
                "a:before_commit(false)",
                "b:before_commit(false)",
                "a:before_completion",
                "b:before_completion",
                "a:after_commit",
                "b:after_commit",
                "a:after_completion(committed)",
                "b:after_completion(committed)",
            ]
        );
    }

    #[test]
    fn test_late_registration_rejected() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = SynchronizationRegistry::new();
        registry.trigger_before_completion();

        let result = registry.register(recorder("late", &log));
        assert_eq!(result.unwrap_err(), SyncPhase::BeforeCompletion);
    }

    #[test]
    fn test_after_commit_errors_collected() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = SynchronizationRegistry::new();
        registry
            .register(Box::new(Recorder {
                tag: "bad",
                log: log.clone(),
                fail_after_commit: true,
            }))
            .unwrap();
        registry.register(recorder("good", &log)).unwrap();

        let mut failures = Vec::new();
        registry.trigger_after_commit(&mut failures);

        // The failing callback does not stop the others.
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].phase, SyncPhase::AfterCommit);
        let entries = log.lock().unwrap();
        assert_eq!(entries.as_slice(), ["bad:after_commit", "good:after_commit"]);
    }
}
