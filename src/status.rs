//! Transaction status handles.
//!
//! [`TransactionStatus`] is what a caller holds between `get_transaction`
//! and `commit`/`rollback`: one per logical transaction. Several statuses
//! may share one [`PhysicalTransaction`] (participation); a status may also
//! carry no physical transaction at all (`SUPPORTS`/`NOT_SUPPORTED`/`NEVER`
//! running transactionless).
//!
//! A status is confined to the execution context it was created in; see the
//! crate docs for the confinement rule.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use ulid::Ulid;

use crate::context::ContextId;
use crate::definition::Isolation;
use crate::error::{TransactionError, TransactionResult};
use crate::resource::ResourceAdapter;
use crate::synchronization::{SynchronizationRegistry, TransactionSynchronization};

/// The resource-bound transactional unit.
///
/// Owns the resource session and the synchronization registry scoped to it.
/// Shared via `Arc` between every logical transaction participating in it;
/// the flags use interior mutability because siblings must see rollback-only
/// escalation before any of them completes.
pub(crate) struct PhysicalTransaction<R: ResourceAdapter> {
    /// Unique id, used in errors and debug output.
    id: String,
    /// Name from the definition that began this transaction, if any.
    name: Option<String>,
    /// Isolation actually applied at begin.
    isolation: Isolation,
    read_only: bool,
    started_at: DateTime<Utc>,
    /// Advisory deadline derived from the definition timeout. Enforcement
    /// is the resource's job.
    deadline: Option<DateTime<Utc>>,
    /// The open resource session. Taken out on completion and suspension.
    session: Mutex<Option<R::Session>>,
    /// Monotonic: once set, never cleared.
    rollback_only: AtomicBool,
    /// Set exactly once, when completion (or an unrecoverable resource
    /// failure) finishes this transaction.
    completed: AtomicBool,
    registry: Mutex<SynchronizationRegistry>,
}

impl<R: ResourceAdapter> PhysicalTransaction<R> {
    pub(crate) fn new(
        session: R::Session,
        isolation: Isolation,
        read_only: bool,
        timeout: Option<Duration>,
        name: Option<String>,
    ) -> Self {
        let started_at = Utc::now();
        let deadline = timeout.and_then(|t| {
            chrono::TimeDelta::from_std(t)
                .ok()
                .map(|delta| started_at + delta)
        });
        Self {
            id: Ulid::new().to_string().to_lowercase(),
            name,
            isolation,
            read_only,
            started_at,
            deadline,
            session: Mutex::new(Some(session)),
            rollback_only: AtomicBool::new(false),
            completed: AtomicBool::new(false),
            registry: Mutex::new(SynchronizationRegistry::new()),
        }
    }

    pub(crate) fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn isolation(&self) -> Isolation {
        self.isolation
    }

    pub(crate) fn read_only(&self) -> bool {
        self.read_only
    }

    pub(crate) fn deadline(&self) -> Option<DateTime<Utc>> {
        self.deadline
    }

    pub(crate) fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub(crate) fn mark_rollback_only(&self) {
        self.rollback_only.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_rollback_only(&self) -> bool {
        self.rollback_only.load(Ordering::SeqCst)
    }

    /// Mark completed. Returns an error if already completed, enforcing the
    /// set-exactly-once rule.
    pub(crate) fn mark_completed(&self) -> TransactionResult<()> {
        if self.completed.swap(true, Ordering::SeqCst) {
            return Err(TransactionError::IllegalState(format!(
                "physical transaction {} already completed",
                self.id
            )));
        }
        Ok(())
    }

    pub(crate) fn is_completed(&self) -> bool {
        self.completed.load(Ordering::SeqCst)
    }

    /// Take the session out for completion or suspension. `None` means it
    /// was already taken (completed or suspended).
    pub(crate) fn take_session(&self) -> Option<R::Session> {
        self.session.lock().take()
    }

    /// Put a session back after a resume.
    pub(crate) fn restore_session(&self, session: R::Session) {
        *self.session.lock() = Some(session);
    }

    /// Run `f` with mutable access to the open session. Errors with
    /// `IllegalState` if the session is gone.
    pub(crate) fn with_session_mut<T>(
        &self,
        f: impl FnOnce(&mut R::Session) -> TransactionResult<T>,
    ) -> TransactionResult<T> {
        let mut guard = self.session.lock();
        match guard.as_mut() {
            Some(session) => f(session),
            None => Err(TransactionError::IllegalState(format!(
                "physical transaction {} has no open session",
                self.id
            ))),
        }
    }

    pub(crate) fn with_registry<T>(&self, f: impl FnOnce(&mut SynchronizationRegistry) -> T) -> T {
        f(&mut self.registry.lock())
    }
}

impl<R: ResourceAdapter> fmt::Debug for PhysicalTransaction<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhysicalTransaction")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("isolation", &self.isolation)
            .field("read_only", &self.read_only)
            .field("rollback_only", &self.is_rollback_only())
            .field("completed", &self.is_completed())
            .finish()
    }
}

/// Handle for one logical transaction, returned by `get_transaction`.
///
/// Pass it back to the manager's `commit` or `rollback` exactly once.
pub struct TransactionStatus<R: ResourceAdapter> {
    pub(crate) context: ContextId,
    /// Shared physical transaction; `None` when running transactionless.
    pub(crate) physical: Option<Arc<PhysicalTransaction<R>>>,
    pub(crate) is_new: bool,
    /// Savepoint held by a `NESTED` participant, consumed at completion.
    pub(crate) savepoint: Option<R::Savepoint>,
    /// Whether creating this status suspended an outer transaction that
    /// must be resumed when it completes.
    pub(crate) suspended_outer: bool,
    /// Rollback-only for statuses without a physical transaction.
    pub(crate) local_rollback_only: bool,
    pub(crate) completed: bool,
    /// Name from the definition, for debug output.
    pub(crate) name: Option<String>,
}

impl<R: ResourceAdapter> TransactionStatus<R> {
    /// Whether this status owns a newly begun physical transaction (as
    /// opposed to participating in an outer one or running transactionless).
    pub fn is_new_transaction(&self) -> bool {
        self.is_new
    }

    /// Whether this status represents a savepoint-backed nested transaction.
    pub fn has_savepoint(&self) -> bool {
        self.savepoint.is_some()
    }

    /// Whether any transaction is associated at all.
    pub fn has_transaction(&self) -> bool {
        self.physical.is_some()
    }

    /// Whether this status (or, for participants, the shared physical
    /// transaction) is marked rollback-only.
    pub fn is_rollback_only(&self) -> bool {
        if self.local_rollback_only {
            return true;
        }
        self.physical
            .as_ref()
            .is_some_and(|p| p.is_rollback_only())
    }

    /// Mark rollback-only. Monotonic: there is no way to clear it.
    ///
    /// For a participating status this writes through to the shared
    /// physical transaction immediately, so sibling participants observe it
    /// before any of them completes. A nested (savepoint) participant only
    /// dooms itself: its rollback goes to the savepoint, not the outer
    /// transaction.
    pub fn set_rollback_only(&mut self) {
        self.local_rollback_only = true;
        if self.savepoint.is_none() {
            if let Some(physical) = &self.physical {
                physical.mark_rollback_only();
            }
        }
    }

    /// Whether `commit` or `rollback` has already been called.
    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// Id of the underlying physical transaction, if any.
    pub fn transaction_id(&self) -> Option<&str> {
        self.physical.as_deref().map(PhysicalTransaction::id)
    }

    /// Advisory deadline of the underlying physical transaction, if any.
    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        self.physical.as_deref().and_then(PhysicalTransaction::deadline)
    }

    /// Register a synchronization callback on the underlying physical
    /// transaction.
    ///
    /// Fails with `IllegalState` when the status is transactionless,
    /// completed, or completion has already begun.
    pub fn register_synchronization(
        &mut self,
        synchronization: Box<dyn TransactionSynchronization>,
    ) -> TransactionResult<()> {
        if self.completed {
            return Err(TransactionError::IllegalState(
                "cannot register synchronization on a completed transaction".into(),
            ));
        }
        let physical = self.physical.as_ref().ok_or_else(|| {
            TransactionError::IllegalState(
                "cannot register synchronization without an active transaction".into(),
            )
        })?;
        physical.with_registry(|registry| {
            registry.register(synchronization).map_err(|phase| {
                TransactionError::IllegalState(format!(
                    "synchronization registered after {} already ran",
                    phase
                ))
            })
        })
    }

    pub(crate) fn physical(&self) -> Option<&Arc<PhysicalTransaction<R>>> {
        self.physical.as_ref()
    }
}

impl<R: ResourceAdapter> fmt::Debug for TransactionStatus<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionStatus")
            .field("context", &self.context)
            .field("name", &self.name)
            .field("transaction_id", &self.transaction_id())
            .field("is_new", &self.is_new)
            .field("has_savepoint", &self.savepoint.is_some())
            .field("rollback_only", &self.is_rollback_only())
            .field("completed", &self.completed)
            .finish()
    }
}
