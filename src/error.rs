//! Transaction error types.
//!
//! All errors surfaced by the manager are defined here. We use `thiserror`
//! for ergonomic error definition and better error messages. None of these
//! are retried internally; every failure is reported straight to the caller
//! of `get_transaction`/`commit`/`rollback`.

use thiserror::Error;

use crate::resource::ResourceError;

/// Result type for transaction operations.
pub type TransactionResult<T> = Result<T, TransactionError>;

/// Errors that can occur during transaction operations.
#[derive(Debug, Error)]
pub enum TransactionError {
    /// The requested propagation behavior is incompatible with the current
    /// context state: `MANDATORY` with no active transaction, `NEVER` with
    /// one active, or a strict-mode isolation mismatch on join.
    #[error("illegal transaction state: {0}")]
    IllegalTransactionState(String),

    /// `NESTED` was requested but the resource lacks savepoint capability.
    #[error("nested transactions not supported: {0}")]
    NestedTransactionNotSupported(String),

    /// A commit was silently converted into a rollback because an inner
    /// participant marked the shared transaction rollback-only.
    #[error("transaction {tx_id} was marked rollback-only and has been rolled back")]
    UnexpectedRollback { tx_id: String },

    /// The resource failed to suspend or resume a transaction. On a resume
    /// failure the execution context is marked unusable rather than
    /// silently dropped.
    #[error("transaction suspension failed during {operation}: {source}")]
    Suspension {
        operation: &'static str,
        #[source]
        source: ResourceError,
    },

    /// The execution context was poisoned by an earlier resume failure and
    /// can no longer be used.
    #[error("execution context is unusable after a failed resume")]
    ContextUnusable,

    /// A resource begin/commit/rollback/savepoint operation failed.
    #[error("resource {operation} failed: {source}")]
    System {
        operation: &'static str,
        #[source]
        source: ResourceError,
    },

    /// The status was already completed: commit/rollback called twice, or
    /// an operation attempted on a completed status.
    #[error("transaction already completed: {0}")]
    IllegalState(String),

    /// A `before_commit` synchronization callback failed; the transaction
    /// has been rolled back.
    #[error("before-commit synchronization failed: {0}")]
    Synchronization(String),
}

impl TransactionError {
    /// Check whether this error reports a propagation-rule violation
    /// (as opposed to a resource or lifecycle failure).
    pub fn is_propagation_violation(&self) -> bool {
        matches!(
            self,
            TransactionError::IllegalTransactionState(_)
                | TransactionError::NestedTransactionNotSupported(_)
        )
    }

    /// Check whether the underlying resource failed, as opposed to this
    /// component rejecting the operation.
    pub fn is_resource_failure(&self) -> bool {
        matches!(
            self,
            TransactionError::Suspension { .. } | TransactionError::System { .. }
        )
    }
}
