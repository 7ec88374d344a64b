//! Transaction definitions - the declarative configuration for a transaction.
//!
//! A [`TransactionDefinition`] bundles the propagation behavior, isolation
//! level, timeout, read-only hint, and an optional name. It is an immutable
//! value object: construct one (usually via the builder methods), then share
//! it freely across callers. How a definition is discovered and attached to a
//! unit of work is an external collaborator's job - the manager only consumes
//! the resolved value.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Propagation behavior - how a requested transaction relates to an
/// already-active one in the same execution context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Propagation {
    /// Join the current transaction; begin a new one if none exists.
    ///
    /// This is the default and by far the most common choice.
    #[default]
    Required,

    /// Join the current transaction; run without one if none exists.
    Supports,

    /// Join the current transaction; fail if none exists.
    Mandatory,

    /// Always begin a new transaction, suspending the current one if present.
    RequiresNew,

    /// Always run without a transaction, suspending the current one if present.
    NotSupported,

    /// Run without a transaction; fail if one is active.
    Never,

    /// Run inside a savepoint-backed nested transaction if one is active,
    /// otherwise behave like [`Propagation::Required`].
    ///
    /// Requires savepoint support from the resource.
    Nested,
}

impl fmt::Display for Propagation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Propagation::Required => "REQUIRED",
            Propagation::Supports => "SUPPORTS",
            Propagation::Mandatory => "MANDATORY",
            Propagation::RequiresNew => "REQUIRES_NEW",
            Propagation::NotSupported => "NOT_SUPPORTED",
            Propagation::Never => "NEVER",
            Propagation::Nested => "NESTED",
        };
        write!(f, "{}", name)
    }
}

impl std::str::FromStr for Propagation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "REQUIRED" => Ok(Propagation::Required),
            "SUPPORTS" => Ok(Propagation::Supports),
            "MANDATORY" => Ok(Propagation::Mandatory),
            "REQUIRES_NEW" | "REQUIRESNEW" => Ok(Propagation::RequiresNew),
            "NOT_SUPPORTED" | "NOTSUPPORTED" => Ok(Propagation::NotSupported),
            "NEVER" => Ok(Propagation::Never),
            "NESTED" => Ok(Propagation::Nested),
            _ => Err(format!("unknown propagation behavior: {}", s)),
        }
    }
}

/// Transaction isolation level.
///
/// Only applied when a new physical transaction actually begins; a definition
/// that joins an existing transaction does not change its isolation (see the
/// manager's strict/lenient validation modes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Isolation {
    /// Use whatever the resource considers its default level.
    #[default]
    Default,

    /// Dirty reads, non-repeatable reads and phantom reads can occur.
    ReadUncommitted,

    /// Dirty reads are prevented; non-repeatable and phantom reads can occur.
    ReadCommitted,

    /// Dirty and non-repeatable reads are prevented; phantom reads can occur.
    RepeatableRead,

    /// Dirty reads, non-repeatable reads and phantom reads are all prevented.
    Serializable,
}

impl Isolation {
    /// Check whether this is the resource-default placeholder.
    pub fn is_default(&self) -> bool {
        matches!(self, Isolation::Default)
    }
}

impl fmt::Display for Isolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Isolation::Default => "DEFAULT",
            Isolation::ReadUncommitted => "READ UNCOMMITTED",
            Isolation::ReadCommitted => "READ COMMITTED",
            Isolation::RepeatableRead => "REPEATABLE READ",
            Isolation::Serializable => "SERIALIZABLE",
        };
        write!(f, "{}", name)
    }
}

impl std::str::FromStr for Isolation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "DEFAULT" => Ok(Isolation::Default),
            "READ UNCOMMITTED" | "READ_UNCOMMITTED" => Ok(Isolation::ReadUncommitted),
            "READ COMMITTED" | "READ_COMMITTED" => Ok(Isolation::ReadCommitted),
            "REPEATABLE READ" | "REPEATABLE_READ" => Ok(Isolation::RepeatableRead),
            "SERIALIZABLE" => Ok(Isolation::Serializable),
            _ => Err(format!("unknown isolation level: {}", s)),
        }
    }
}

/// Declarative transaction configuration.
///
/// Defaults: `REQUIRED` propagation, resource-default isolation, no timeout
/// (resource default), read-write, unnamed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionDefinition {
    /// Propagation behavior.
    pub propagation: Propagation,
    /// Isolation level, applied only to newly begun physical transactions.
    pub isolation: Isolation,
    /// Advisory timeout; `None` means "use the resource default".
    pub timeout: Option<Duration>,
    /// Read-only optimization hint for the resource.
    pub read_only: bool,
    /// Optional name, surfaced in debug output and monitoring.
    pub name: Option<String>,
}

impl Default for TransactionDefinition {
    fn default() -> Self {
        Self {
            propagation: Propagation::Required,
            isolation: Isolation::Default,
            timeout: None,
            read_only: false,
            name: None,
        }
    }
}

impl TransactionDefinition {
    /// Create a definition with all defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a definition with the given propagation and all other defaults.
    pub fn with_propagation(propagation: Propagation) -> Self {
        Self {
            propagation,
            ..Default::default()
        }
    }

    /// Set the propagation behavior.
    pub fn propagation(mut self, propagation: Propagation) -> Self {
        self.propagation = propagation;
        self
    }

    /// Set the isolation level.
    pub fn isolation(mut self, isolation: Isolation) -> Self {
        self.isolation = isolation;
        self
    }

    /// Set the advisory timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the read-only hint.
    pub fn read_only(mut self, value: bool) -> Self {
        self.read_only = value;
        self
    }

    /// Set the transaction name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let def = TransactionDefinition::new();
        assert_eq!(def.propagation, Propagation::Required);
        assert_eq!(def.isolation, Isolation::Default);
        assert_eq!(def.timeout, None);
        assert!(!def.read_only);
        assert!(def.name.is_none());
    }

    #[test]
    fn test_builder() {
        let def = TransactionDefinition::new()
            .propagation(Propagation::RequiresNew)
            .isolation(Isolation::Serializable)
            .timeout(Duration::from_secs(30))
            .read_only(true)
            .name("billing.charge");

        assert_eq!(def.propagation, Propagation::RequiresNew);
        assert_eq!(def.isolation, Isolation::Serializable);
        assert_eq!(def.timeout, Some(Duration::from_secs(30)));
        assert!(def.read_only);
        assert_eq!(def.name.as_deref(), Some("billing.charge"));
    }

    #[test]
    fn test_parse_propagation() {
        assert_eq!(
            "requires_new".parse::<Propagation>().unwrap(),
            Propagation::RequiresNew
        );
        assert_eq!("NESTED".parse::<Propagation>().unwrap(), Propagation::Nested);
        assert!("SOMETIMES".parse::<Propagation>().is_err());
    }

    #[test]
    fn test_parse_isolation() {
        assert_eq!(
            "READ COMMITTED".parse::<Isolation>().unwrap(),
            Isolation::ReadCommitted
        );
        assert_eq!(
            "repeatable_read".parse::<Isolation>().unwrap(),
            Isolation::RepeatableRead
        );
        assert!("CHAOS".parse::<Isolation>().is_err());
    }

    #[test]
    fn test_display_round_trip() {
        for p in [
            Propagation::Required,
            Propagation::Supports,
            Propagation::Mandatory,
            Propagation::RequiresNew,
            Propagation::NotSupported,
            Propagation::Never,
            Propagation::Nested,
        ] {
            assert_eq!(p.to_string().parse::<Propagation>().unwrap(), p);
        }
    }
}
