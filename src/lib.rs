//! txflow - transaction propagation and lifecycle management.
//!
//! Given a declarative [`TransactionDefinition`] and a per-context record of
//! "is a transaction already active here", the [`TransactionManager`]
//! decides whether to join the existing transaction, begin a new physical
//! one, suspend and later resume an outer one, create a savepoint-backed
//! nested scope, or refuse - then drives begin/commit/rollback against a
//! pluggable [`ResourceAdapter`] and fires [`TransactionSynchronization`]
//! callbacks at well-defined points.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     TransactionManager                      │
//! │  (propagation decisions, lifecycle, suspension, savepoints) │
//! └─────────────────────────────────────────────────────────────┘
//!          │                    │                    │
//!          ▼                    ▼                    ▼
//!  ┌──────────────┐     ┌──────────────┐     ┌──────────────────┐
//!  │ Execution    │     │ Resource     │     │ Synchronization  │
//!  │ ContextState │     │ Adapter      │     │ Registry         │
//!  └──────────────┘     └──────────────┘     └──────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use txflow::{ContextId, Propagation, TransactionDefinition, TransactionManager};
//!
//! let manager = TransactionManager::new(adapter);
//! let ctx = ContextId::for_current_thread();
//!
//! let def = TransactionDefinition::with_propagation(Propagation::Required);
//! let mut status = manager.get_transaction(ctx, &def)?;
//!
//! // ... work against the resource ...
//!
//! manager.commit(&mut status)?; // or manager.rollback(&mut status)?
//! ```
//!
//! # Confinement
//!
//! A physical transaction and its context state belong to exactly one
//! logical execution context (thread or task). Accessing a
//! [`TransactionStatus`] from a different context is forbidden and
//! undefined; the manager does not guard against it.
//!
//! The same rule covers synchronization callbacks: they run while the
//! manager holds the locks for the completing transaction and its context,
//! so a callback must not call back into the manager for that context
//! (no `get_transaction`, `commit`, `rollback`, or registration). Doing so
//! deadlocks. Callbacks may freely drive transactions on *other* contexts.

#![allow(dead_code)] // Some accessors exist for public API extensibility

pub mod context;
pub mod definition;
pub mod error;
pub mod manager;
pub mod resource;
pub mod status;
pub mod synchronization;

#[cfg(test)]
pub(crate) mod test_support;

pub use context::ContextId;
pub use definition::{Isolation, Propagation, TransactionDefinition};
pub use error::{TransactionError, TransactionResult};
pub use manager::{ManagerConfig, TransactionManager};
pub use resource::{ResourceAdapter, ResourceError, ResourceResult};
pub use status::TransactionStatus;
pub use synchronization::{
    CallbackError, CallbackFailure, CompletionReport, CompletionStatus, SyncPhase,
    SynchronizationRegistry, TransactionSynchronization,
};
