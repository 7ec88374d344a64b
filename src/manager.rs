//! Transaction manager - the propagation and lifecycle core.
//!
//! The TransactionManager is the main entry point. It handles:
//! - Propagation decisions (join, begin new, suspend, savepoint, refuse)
//! - Driving begin/commit/rollback against the resource adapter
//! - Suspension and resumption of outer transactions
//! - Rollback-only escalation across participating statuses
//! - Firing synchronization callbacks at the defined points
//!
//! Thread-safe: can be shared across threads via Clone (uses Arc
//! internally). The per-context transaction state it manages is confined to
//! one thread or task each; the manager only locks the shared context map,
//! never a transaction against its own context.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::context::{ContextId, ExecutionContextState, SuspendedTransaction};
use crate::definition::{Propagation, TransactionDefinition};
use crate::error::{TransactionError, TransactionResult};
use crate::resource::{ResourceAdapter, ResourceError};
use crate::status::{PhysicalTransaction, TransactionStatus};
use crate::synchronization::{CompletionReport, CompletionStatus};

/// Manager configuration.
#[derive(Debug, Clone, Default)]
pub struct ManagerConfig {
    /// When true, a definition that joins an existing transaction with a
    /// different (non-default) isolation level fails with
    /// `IllegalTransactionState` instead of being accepted silently.
    pub strict_isolation: bool,
}

impl ManagerConfig {
    /// Create a lenient configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set strict isolation validation on join.
    pub fn strict_isolation(mut self, value: bool) -> Self {
        self.strict_isolation = value;
        self
    }
}

/// Transaction manager - coordinates propagation and lifecycle over one
/// resource adapter.
pub struct TransactionManager<R: ResourceAdapter> {
    inner: Arc<ManagerInner<R>>,
}

impl<R: ResourceAdapter> Clone for TransactionManager<R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct ManagerInner<R: ResourceAdapter> {
    /// The underlying transactional resource.
    resource: R,
    /// Per-context transaction state. The map is shared; each entry is only
    /// ever touched from its own context.
    contexts: RwLock<HashMap<ContextId, Arc<Mutex<ExecutionContextState<R>>>>>,
    config: ManagerConfig,
}

impl<R: ResourceAdapter> TransactionManager<R> {
    /// Create a manager with the default (lenient) configuration.
    pub fn new(resource: R) -> Self {
        Self::with_config(resource, ManagerConfig::default())
    }

    /// Create a manager with an explicit configuration.
    pub fn with_config(resource: R, config: ManagerConfig) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                resource,
                contexts: RwLock::new(HashMap::new()),
                config,
            }),
        }
    }

    /// Get a reference to the underlying resource adapter.
    pub fn resource(&self) -> &R {
        &self.inner.resource
    }

    // ==================== Introspection ====================

    /// Whether the given context currently has an active (non-suspended)
    /// physical transaction.
    pub fn is_transaction_active(&self, ctx: ContextId) -> bool {
        self.inner
            .contexts
            .read()
            .get(&ctx)
            .is_some_and(|state| state.lock().current.is_some())
    }

    /// Number of transactions currently suspended in the given context.
    pub fn suspended_depth(&self, ctx: ContextId) -> usize {
        self.inner
            .contexts
            .read()
            .get(&ctx)
            .map_or(0, |state| state.lock().suspended_depth())
    }

    /// Number of contexts with live transaction state.
    pub fn active_context_count(&self) -> usize {
        self.inner.contexts.read().len()
    }

    // ==================== getTransaction ====================

    /// Apply the propagation rules of `definition` against the context's
    /// current transaction and return a status for the resulting logical
    /// transaction.
    pub fn get_transaction(
        &self,
        ctx: ContextId,
        definition: &TransactionDefinition,
    ) -> TransactionResult<TransactionStatus<R>> {
        let state_arc = self.context_state(ctx);
        let result = {
            let mut state = state_arc.lock();
            if state.poisoned {
                return Err(TransactionError::ContextUnusable);
            }
            self.apply_propagation(ctx, definition, &mut state)
        };
        // A refusal or a transactionless outcome may leave a freshly created,
        // empty entry behind; drop it rather than let it accumulate.
        self.release_context_if_empty(ctx);
        result
    }

    fn apply_propagation(
        &self,
        ctx: ContextId,
        definition: &TransactionDefinition,
        state: &mut ExecutionContextState<R>,
    ) -> TransactionResult<TransactionStatus<R>> {
        let current = state.current.clone();
        match definition.propagation {
            Propagation::Required => match current {
                Some(physical) => self.join(ctx, definition, physical),
                None => self.begin_new(ctx, definition, state, false),
            },
            Propagation::Supports => match current {
                Some(physical) => self.join(ctx, definition, physical),
                None => Ok(self.transactionless(ctx, definition, false)),
            },
            Propagation::Mandatory => match current {
                Some(physical) => self.join(ctx, definition, physical),
                None => Err(TransactionError::IllegalTransactionState(
                    "MANDATORY propagation requested but no transaction is active".into(),
                )),
            },
            Propagation::RequiresNew => {
                let suspended = match current {
                    Some(physical) => {
                        self.suspend_current(state, physical)?;
                        true
                    }
                    None => false,
                };
                match self.begin_new(ctx, definition, state, suspended) {
                    Ok(status) => Ok(status),
                    Err(err) => {
                        // Symmetry: a suspend with no transaction to show
                        // for it must be undone before the error surfaces.
                        if suspended {
                            if let Err(resume_err) = self.resume_latest(state) {
                                log::warn!(
                                    "resume after failed begin also failed: {}",
                                    resume_err
                                );
                            }
                        }
                        Err(err)
                    }
                }
            }
            Propagation::NotSupported => {
                let suspended = match current {
                    Some(physical) => {
                        self.suspend_current(state, physical)?;
                        true
                    }
                    None => false,
                };
                Ok(self.transactionless(ctx, definition, suspended))
            }
            Propagation::Never => match current {
                Some(physical) => Err(TransactionError::IllegalTransactionState(format!(
                    "NEVER propagation requested but transaction {} is active",
                    physical.id()
                ))),
                None => Ok(self.transactionless(ctx, definition, false)),
            },
            Propagation::Nested => match current {
                Some(physical) => self.create_nested(ctx, definition, physical),
                None => self.begin_new(ctx, definition, state, false),
            },
        }
    }

    /// Begin a new physical transaction and install it as current.
    fn begin_new(
        &self,
        ctx: ContextId,
        definition: &TransactionDefinition,
        state: &mut ExecutionContextState<R>,
        suspended_outer: bool,
    ) -> TransactionResult<TransactionStatus<R>> {
        let session = self
            .inner
            .resource
            .begin(definition.isolation, definition.read_only, definition.timeout)
            .map_err(|source| TransactionError::System {
                operation: "begin",
                source,
            })?;
        let physical = Arc::new(PhysicalTransaction::new(
            session,
            definition.isolation,
            definition.read_only,
            definition.timeout,
            definition.name.clone(),
        ));
        log::debug!("{}: began transaction {}", ctx, physical.id());
        state.current = Some(physical.clone());
        Ok(TransactionStatus {
            context: ctx,
            physical: Some(physical),
            is_new: true,
            savepoint: None,
            suspended_outer,
            local_rollback_only: false,
            completed: false,
            name: definition.name.clone(),
        })
    }

    /// Join the existing physical transaction without creating resource
    /// state. Isolation/timeout from the definition are not applied; in
    /// strict mode a non-default isolation mismatch is rejected.
    fn join(
        &self,
        ctx: ContextId,
        definition: &TransactionDefinition,
        physical: Arc<PhysicalTransaction<R>>,
    ) -> TransactionResult<TransactionStatus<R>> {
        if self.inner.config.strict_isolation
            && !definition.isolation.is_default()
            && definition.isolation != physical.isolation()
        {
            return Err(TransactionError::IllegalTransactionState(format!(
                "definition requests {} isolation but transaction {} runs at {}",
                definition.isolation,
                physical.id(),
                physical.isolation()
            )));
        }
        log::debug!("{}: joining transaction {}", ctx, physical.id());
        Ok(TransactionStatus {
            context: ctx,
            physical: Some(physical),
            is_new: false,
            savepoint: None,
            suspended_outer: false,
            local_rollback_only: false,
            completed: false,
            name: definition.name.clone(),
        })
    }

    /// Create a savepoint on the current transaction for NESTED
    /// participation.
    fn create_nested(
        &self,
        ctx: ContextId,
        definition: &TransactionDefinition,
        physical: Arc<PhysicalTransaction<R>>,
    ) -> TransactionResult<TransactionStatus<R>> {
        if !self.inner.resource.supports_savepoints() {
            return Err(TransactionError::NestedTransactionNotSupported(
                "resource has no savepoint capability".into(),
            ));
        }
        let savepoint = physical.with_session_mut(|session| {
            self.inner
                .resource
                .create_savepoint(session)
                .map_err(|source| match source {
                    ResourceError::Unsupported { capability } => {
                        TransactionError::NestedTransactionNotSupported(format!(
                            "resource does not support {}",
                            capability
                        ))
                    }
                    source => TransactionError::System {
                        operation: "create_savepoint",
                        source,
                    },
                })
        })?;
        log::debug!("{}: created savepoint in transaction {}", ctx, physical.id());
        Ok(TransactionStatus {
            context: ctx,
            physical: Some(physical),
            is_new: false,
            savepoint: Some(savepoint),
            suspended_outer: false,
            local_rollback_only: false,
            completed: false,
            name: definition.name.clone(),
        })
    }

    /// Status for running without any physical transaction.
    fn transactionless(
        &self,
        ctx: ContextId,
        definition: &TransactionDefinition,
        suspended_outer: bool,
    ) -> TransactionStatus<R> {
        TransactionStatus {
            context: ctx,
            physical: None,
            is_new: false,
            savepoint: None,
            suspended_outer,
            local_rollback_only: false,
            completed: false,
            name: definition.name.clone(),
        }
    }

    // ==================== Suspension ====================

    /// Suspend the current transaction onto the context's LIFO stack.
    ///
    /// A suspend failure poisons the context: the session is no longer in a
    /// known state, so refusing further use beats pretending otherwise.
    fn suspend_current(
        &self,
        state: &mut ExecutionContextState<R>,
        physical: Arc<PhysicalTransaction<R>>,
    ) -> TransactionResult<()> {
        let session = physical.take_session().ok_or_else(|| {
            TransactionError::IllegalState(format!(
                "transaction {} has no session to suspend",
                physical.id()
            ))
        })?;
        match self.inner.resource.suspend(session) {
            Ok(token) => {
                log::debug!("suspended transaction {}", physical.id());
                state.current = None;
                state.suspended.push(SuspendedTransaction { physical, token });
                Ok(())
            }
            Err(source) => {
                state.poisoned = true;
                Err(TransactionError::Suspension {
                    operation: "suspend",
                    source,
                })
            }
        }
    }

    /// Pop the suspension stack and reinstate the suspended transaction as
    /// current. A resume failure poisons the context.
    fn resume_latest(&self, state: &mut ExecutionContextState<R>) -> TransactionResult<()> {
        let Some(entry) = state.suspended.pop() else {
            return Ok(());
        };
        match self.inner.resource.resume(entry.token) {
            Ok(session) => {
                log::debug!("resumed transaction {}", entry.physical.id());
                entry.physical.restore_session(session);
                state.current = Some(entry.physical);
                Ok(())
            }
            Err(source) => {
                state.poisoned = true;
                Err(TransactionError::Suspension {
                    operation: "resume",
                    source,
                })
            }
        }
    }

    // ==================== commit / rollback ====================

    /// Commit the logical transaction behind `status`.
    ///
    /// For a participating status this only marks completion. For a nested
    /// status it releases the savepoint. For a new transaction it runs the
    /// synchronization phases, drives the resource commit (or rollback, if
    /// anything beneath marked rollback-only - surfaced as
    /// [`TransactionError::UnexpectedRollback`]), and resumes a suspended
    /// outer transaction on the way out regardless of the outcome.
    pub fn commit(&self, status: &mut TransactionStatus<R>) -> TransactionResult<CompletionReport> {
        self.complete(status, true)
    }

    /// Roll back the logical transaction behind `status`.
    ///
    /// A participating status marks the shared transaction rollback-only
    /// (escalation); a nested status rolls back to its savepoint leaving the
    /// outer transaction untouched; a new transaction rolls back at the
    /// resource.
    pub fn rollback(
        &self,
        status: &mut TransactionStatus<R>,
    ) -> TransactionResult<CompletionReport> {
        self.complete(status, false)
    }

    fn complete(
        &self,
        status: &mut TransactionStatus<R>,
        commit_requested: bool,
    ) -> TransactionResult<CompletionReport> {
        if status.completed {
            return Err(TransactionError::IllegalState(format!(
                "{} called on an already-completed transaction",
                if commit_requested { "commit" } else { "rollback" }
            )));
        }
        let state_arc = self.context_state(status.context);
        let mut state = state_arc.lock();
        if state.poisoned {
            return Err(TransactionError::ContextUnusable);
        }

        let result = if commit_requested {
            self.do_commit(&mut state, status)
        } else {
            self.do_rollback(&mut state, status)
        };
        status.completed = true;

        // Guaranteed-cleanup path: every suspend is paired with exactly one
        // resume, even when completion itself failed.
        let resume_result = if status.suspended_outer {
            self.resume_latest(&mut state)
        } else {
            Ok(())
        };
        drop(state);
        self.release_context_if_empty(status.context);

        match (result, resume_result) {
            (Ok(report), Ok(())) => Ok(report),
            (Ok(_), Err(resume_err)) => Err(resume_err),
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(resume_err)) => {
                log::warn!("resume after failed completion also failed: {}", resume_err);
                Err(err)
            }
        }
    }

    fn do_commit(
        &self,
        state: &mut ExecutionContextState<R>,
        status: &mut TransactionStatus<R>,
    ) -> TransactionResult<CompletionReport> {
        if status.savepoint.is_some() {
            let own_veto = status.local_rollback_only;
            return self.complete_savepoint(status, own_veto);
        }
        let Some(physical) = status.physical().cloned() else {
            // Transactionless: nothing to drive at the resource, but a
            // rollback-only mark still decides the reported outcome.
            let outcome = if status.local_rollback_only {
                CompletionStatus::RolledBack
            } else {
                CompletionStatus::Committed
            };
            return Ok(CompletionReport::clean(outcome));
        };
        if !status.is_new {
            // Pure participation: the outcome belongs to the owner of the
            // physical transaction. Rollback-only escalation was already
            // recorded on it via set_rollback_only.
            return Ok(CompletionReport::clean(CompletionStatus::Committed));
        }

        let mut failures = Vec::new();
        if !physical.is_rollback_only() {
            let before = physical.with_registry(|r| r.trigger_before_commit(physical.read_only()));
            if let Err(callback_err) = before {
                // The phases stay strictly ordered even when the commit is
                // vetoed: before_completion fires on both paths.
                physical.with_registry(|r| r.trigger_before_completion());
                self.rollback_physical(state, &physical, &mut failures)?;
                return Err(TransactionError::Synchronization(callback_err.to_string()));
            }
        }
        physical.with_registry(|r| r.trigger_before_completion());

        if physical.is_rollback_only() {
            // Someone beneath us vetoed the commit.
            let own_veto = status.local_rollback_only;
            self.rollback_physical(state, &physical, &mut failures)?;
            if own_veto {
                // The owner asked for it: a silent rollback, not a surprise.
                return Ok(CompletionReport {
                    status: CompletionStatus::RolledBack,
                    callback_failures: failures,
                });
            }
            return Err(TransactionError::UnexpectedRollback {
                tx_id: physical.id().to_string(),
            });
        }

        let session = self.finish_physical(state, &physical)?;
        match self.inner.resource.commit(session) {
            Ok(()) => {
                physical.with_registry(|r| r.trigger_after_commit(&mut failures));
                physical.with_registry(|r| {
                    r.trigger_after_completion(CompletionStatus::Committed, &mut failures)
                });
                log::debug!("committed transaction {}", physical.id());
                Ok(CompletionReport {
                    status: CompletionStatus::Committed,
                    callback_failures: failures,
                })
            }
            Err(source) => {
                physical.with_registry(|r| {
                    r.trigger_after_completion(CompletionStatus::Unknown, &mut failures)
                });
                Err(TransactionError::System {
                    operation: "commit",
                    source,
                })
            }
        }
    }

    fn do_rollback(
        &self,
        state: &mut ExecutionContextState<R>,
        status: &mut TransactionStatus<R>,
    ) -> TransactionResult<CompletionReport> {
        if status.savepoint.is_some() {
            return self.complete_savepoint(status, true);
        }
        let Some(physical) = status.physical().cloned() else {
            return Ok(CompletionReport::clean(CompletionStatus::RolledBack));
        };
        if !status.is_new {
            // Participation: escalate outward. The owner's commit attempt
            // will observe this and roll back.
            physical.mark_rollback_only();
            return Ok(CompletionReport::clean(CompletionStatus::RolledBack));
        }

        let mut failures = Vec::new();
        physical.with_registry(|r| r.trigger_before_completion());
        self.rollback_physical(state, &physical, &mut failures)?;
        Ok(CompletionReport {
            status: CompletionStatus::RolledBack,
            callback_failures: failures,
        })
    }

    /// Release or roll back to the held savepoint. The outer transaction
    /// stays open and untouched either way.
    fn complete_savepoint(
        &self,
        status: &mut TransactionStatus<R>,
        roll_back: bool,
    ) -> TransactionResult<CompletionReport> {
        let physical = status.physical().cloned().ok_or_else(|| {
            TransactionError::IllegalState("savepoint status without a transaction".into())
        })?;
        let savepoint = status.savepoint.take().ok_or_else(|| {
            TransactionError::IllegalState("savepoint already consumed".into())
        })?;
        if roll_back {
            physical.with_session_mut(|session| {
                self.inner
                    .resource
                    .rollback_to_savepoint(session, savepoint)
                    .map_err(|source| TransactionError::System {
                        operation: "rollback_to_savepoint",
                        source,
                    })
            })?;
            log::debug!("rolled back to savepoint in transaction {}", physical.id());
            Ok(CompletionReport::clean(CompletionStatus::RolledBack))
        } else {
            physical.with_session_mut(|session| {
                self.inner
                    .resource
                    .release_savepoint(session, savepoint)
                    .map_err(|source| TransactionError::System {
                        operation: "release_savepoint",
                        source,
                    })
            })?;
            Ok(CompletionReport::clean(CompletionStatus::Committed))
        }
    }

    /// Take the session out, mark the physical transaction completed and
    /// clear it from the context. The transaction is unusable afterwards
    /// even if the resource call that follows fails.
    fn finish_physical(
        &self,
        state: &mut ExecutionContextState<R>,
        physical: &Arc<PhysicalTransaction<R>>,
    ) -> TransactionResult<R::Session> {
        let session = physical.take_session().ok_or_else(|| {
            TransactionError::IllegalState(format!(
                "transaction {} has no open session",
                physical.id()
            ))
        })?;
        physical.mark_completed()?;
        state.current = None;
        Ok(session)
    }

    /// Roll the physical transaction back at the resource and fire the
    /// after-completion phase.
    fn rollback_physical(
        &self,
        state: &mut ExecutionContextState<R>,
        physical: &Arc<PhysicalTransaction<R>>,
        failures: &mut Vec<crate::synchronization::CallbackFailure>,
    ) -> TransactionResult<()> {
        let session = self.finish_physical(state, physical)?;
        match self.inner.resource.rollback(session) {
            Ok(()) => {
                physical.with_registry(|r| {
                    r.trigger_after_completion(CompletionStatus::RolledBack, failures)
                });
                log::debug!("rolled back transaction {}", physical.id());
                Ok(())
            }
            Err(source) => {
                physical.with_registry(|r| {
                    r.trigger_after_completion(CompletionStatus::Unknown, failures)
                });
                Err(TransactionError::System {
                    operation: "rollback",
                    source,
                })
            }
        }
    }

    // ==================== Convenience ====================

    /// Execute a closure within a transaction, committing on `Ok` and
    /// rolling back on `Err`.
    pub fn execute<F, T>(
        &self,
        ctx: ContextId,
        definition: &TransactionDefinition,
        f: F,
    ) -> TransactionResult<T>
    where
        F: FnOnce(&mut TransactionStatus<R>) -> TransactionResult<T>,
    {
        let mut status = self.get_transaction(ctx, definition)?;
        match f(&mut status) {
            Ok(value) => {
                self.commit(&mut status)?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = self.rollback(&mut status) {
                    log::warn!("rollback after failed closure also failed: {}", rollback_err);
                }
                Err(err)
            }
        }
    }

    // ==================== Context bookkeeping ====================

    fn context_state(&self, ctx: ContextId) -> Arc<Mutex<ExecutionContextState<R>>> {
        if let Some(state) = self.inner.contexts.read().get(&ctx) {
            return state.clone();
        }
        self.inner
            .contexts
            .write()
            .entry(ctx)
            .or_insert_with(|| Arc::new(Mutex::new(ExecutionContextState::new())))
            .clone()
    }

    /// Drop the context entry once nothing is active, suspended, or
    /// poisoned in it.
    fn release_context_if_empty(&self, ctx: ContextId) {
        let mut contexts = self.inner.contexts.write();
        if let Some(state) = contexts.get(&ctx) {
            if state.lock().is_empty() {
                contexts.remove(&ctx);
            }
        }
    }
}

impl<R: ResourceAdapter> std::fmt::Debug for TransactionManager<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("active_context_count", &self.active_context_count())
            .field("strict_isolation", &self.inner.config.strict_isolation)
            .finish()
    }
}
