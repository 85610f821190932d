//! Transaction-manager contract.
//!
//! The ambient transaction is explicit: each exchange carries a
//! [`TransactionContext`] naming the transaction currently associated with
//! it, and every [`TransactionManager`] call receives that context. There is
//! no thread-local state.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Status of the transaction associated with a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Active,
    MarkedRollback,
    Prepared,
    Committed,
    RolledBack,
    Unknown,
    NoTransaction,
    Preparing,
    Committing,
    RollingBack,
}

impl TransactionStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::MarkedRollback => "MARKED_ROLLBACK",
            Self::Prepared => "PREPARED",
            Self::Committed => "COMMITTED",
            Self::RolledBack => "ROLLED_BACK",
            Self::Unknown => "UNKNOWN",
            Self::NoTransaction => "NO_TRANSACTION",
            Self::Preparing => "PREPARING",
            Self::Committing => "COMMITTING",
            Self::RollingBack => "ROLLING_BACK",
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque transaction identifier issued by a [`TransactionManager`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(String);

impl TransactionId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Transaction association of one exchange.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionContext {
    current: Option<TransactionId>,
}

impl TransactionContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Context already associated with `id`, as when a caller propagates its
    /// transaction into the bus.
    #[must_use]
    pub fn with_transaction(id: TransactionId) -> Self {
        Self { current: Some(id) }
    }

    #[must_use]
    pub fn current(&self) -> Option<&TransactionId> {
        self.current.as_ref()
    }

    /// Associates `id`, returning the previous association.
    pub fn associate(&mut self, id: TransactionId) -> Option<TransactionId> {
        self.current.replace(id)
    }

    pub fn disassociate(&mut self) -> Option<TransactionId> {
        self.current.take()
    }
}

/// Errors reported by a [`TransactionManager`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransactionManagerError {
    #[error("no transaction is associated with the context")]
    NoTransaction,
    #[error("a transaction is already associated with the context")]
    AlreadyAssociated,
    #[error("unknown transaction: {0}")]
    UnknownTransaction(TransactionId),
    #[error("transaction {id} has status {status}")]
    IllegalState {
        id: TransactionId,
        status: TransactionStatus,
    },
    #[error("transaction {0} was marked rollback-only and has been rolled back")]
    RolledBackOnCommit(TransactionId),
    #[error("transaction system error: {0}")]
    System(String),
}

/// Begin/commit/rollback/suspend/resume against an explicit context.
///
/// Implementations are shared across exchanges and must keep all
/// per-transaction state keyed by [`TransactionId`].
pub trait TransactionManager: Send + Sync {
    /// Starts a transaction and associates it with `ctx`.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyAssociated` if `ctx` already has a transaction.
    fn begin(&self, ctx: &mut TransactionContext) -> Result<TransactionId, TransactionManagerError>;

    /// Commits and disassociates the current transaction.
    ///
    /// # Errors
    ///
    /// Returns `NoTransaction` when nothing is associated, or
    /// `RolledBackOnCommit` when the transaction was marked rollback-only.
    fn commit(&self, ctx: &mut TransactionContext) -> Result<(), TransactionManagerError>;

    /// Rolls back and disassociates the current transaction.
    ///
    /// # Errors
    ///
    /// Returns `NoTransaction` when nothing is associated.
    fn rollback(&self, ctx: &mut TransactionContext) -> Result<(), TransactionManagerError>;

    /// Marks the current transaction so that its only outcome is rollback.
    ///
    /// # Errors
    ///
    /// Returns `NoTransaction` when nothing is associated.
    fn set_rollback_only(&self, ctx: &TransactionContext) -> Result<(), TransactionManagerError>;

    /// Status of the current transaction, `NoTransaction` if none.
    ///
    /// # Errors
    ///
    /// Returns `System` when the status cannot be determined.
    fn status(&self, ctx: &TransactionContext) -> Result<TransactionStatus, TransactionManagerError>;

    /// Disassociates the current transaction without completing it.
    ///
    /// # Errors
    ///
    /// Returns `System` when the manager cannot suspend.
    fn suspend(&self, ctx: &mut TransactionContext) -> Result<Option<TransactionId>, TransactionManagerError>;

    /// Re-associates a previously suspended transaction.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyAssociated` if `ctx` has a transaction, or
    /// `UnknownTransaction` if `id` is not live.
    fn resume(&self, ctx: &mut TransactionContext, id: TransactionId) -> Result<(), TransactionManagerError>;
}
