//! The resource capability interface.
//!
//! A [`ResourceAdapter`] is the single seam between the manager and the
//! actual transactional resource (a database connection, a message-queue
//! session, ...). One adapter implementation exists per resource type and is
//! composed into the manager, not inherited from.
//!
//! Ownership follows the lifecycle: `begin` hands out an owned session,
//! `commit`/`rollback` consume it, `suspend` trades it for a token and
//! `resume` trades the token back. Savepoint operations borrow the session
//! mutably because the transaction stays open around them.

use std::time::Duration;

use thiserror::Error;

use crate::definition::Isolation;

/// Result type for resource operations.
pub type ResourceResult<T> = Result<T, ResourceError>;

/// Errors reported by a resource adapter.
#[derive(Debug, Error)]
pub enum ResourceError {
    /// The resource does not implement the named capability
    /// (e.g. savepoints on a resource without partial-rollback support).
    #[error("resource does not support {capability}")]
    Unsupported { capability: &'static str },

    /// Any other resource-level failure, including resource-side timeouts.
    #[error("{0}")]
    Failed(String),

    /// A failure carrying the adapter's own error as source.
    #[error("resource failure")]
    Source(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl ResourceError {
    /// Shorthand for a message-only failure.
    pub fn msg(message: impl Into<String>) -> Self {
        ResourceError::Failed(message.into())
    }

    /// Shorthand for an unsupported-capability report.
    pub fn unsupported(capability: &'static str) -> Self {
        ResourceError::Unsupported { capability }
    }
}

/// Capability interface over a transactional resource.
///
/// The manager never retries a failed operation and never calls the adapter
/// concurrently for one execution context. Timeouts passed to [`begin`] are
/// advisory: enforcement belongs to the resource, and an expired deadline
/// surfaces as an ordinary [`ResourceError`] from a later call.
///
/// [`begin`]: ResourceAdapter::begin
pub trait ResourceAdapter {
    /// An open resource-level transaction.
    type Session;
    /// Opaque handle to a suspended session, redeemable via [`resume`].
    ///
    /// [`resume`]: ResourceAdapter::resume
    type SuspendToken;
    /// Opaque savepoint marker within an open session.
    type Savepoint;

    /// Start a resource transaction. `Isolation::Default` leaves the level
    /// to the resource; `timeout` of `None` means the resource default.
    fn begin(
        &self,
        isolation: Isolation,
        read_only: bool,
        timeout: Option<Duration>,
    ) -> ResourceResult<Self::Session>;

    /// Commit and release the session.
    fn commit(&self, session: Self::Session) -> ResourceResult<()>;

    /// Roll back and release the session.
    fn rollback(&self, session: Self::Session) -> ResourceResult<()>;

    /// Park the session, returning a token that can later redeem it.
    fn suspend(&self, session: Self::Session) -> ResourceResult<Self::SuspendToken>;

    /// Redeem a suspend token for the parked session.
    fn resume(&self, token: Self::SuspendToken) -> ResourceResult<Self::Session>;

    /// Whether this resource can create savepoints. Resources answering
    /// `false` cause `NESTED` propagation inside an active transaction to
    /// be rejected.
    fn supports_savepoints(&self) -> bool;

    /// Create a savepoint in the open session.
    ///
    /// May report [`ResourceError::Unsupported`] even when
    /// [`supports_savepoints`](ResourceAdapter::supports_savepoints)
    /// answered `true`, e.g. for driver-version reasons.
    fn create_savepoint(&self, session: &mut Self::Session) -> ResourceResult<Self::Savepoint>;

    /// Roll back to the savepoint, keeping the session open.
    fn rollback_to_savepoint(
        &self,
        session: &mut Self::Session,
        savepoint: Self::Savepoint,
    ) -> ResourceResult<()>;

    /// Release the savepoint, keeping its changes pending in the session.
    fn release_savepoint(
        &self,
        session: &mut Self::Session,
        savepoint: Self::Savepoint,
    ) -> ResourceResult<()>;
}
