//! Error taxonomy for the exchange bus.
//!
//! Three families, kept apart on purpose:
//! - [`HandlerError`]: a handler or the provider failed. Becomes the cause of
//!   an exchange fault and travels back to the consumer.
//! - [`ExchangeError`]: the caller broke the exchange contract (sent twice,
//!   replied to an `IN_ONLY` exchange). Reported directly, never as a fault.
//! - [`FaultCause`]: what a fault carries, either the service's declared
//!   error or a handler error.

use std::collections::BTreeSet;
use std::fmt;

use crate::policy::{Policy, TransactionPolicy};
use crate::transaction::{TransactionManagerError, TransactionStatus};

// ---------------------------------------------------------------------------
// TransactionFailure
// ---------------------------------------------------------------------------

/// Failure raised by the transaction policy handler.
#[derive(Debug, thiserror::Error)]
pub enum TransactionFailure {
    #[error("invalid transaction policy: {first} and {second} cannot be requested simultaneously")]
    InvalidPolicy {
        first: TransactionPolicy,
        second: TransactionPolicy,
    },

    #[error("invalid transaction policy: {policy} cannot be requested with {first} nor {second}")]
    InvalidPolicyCombination {
        policy: TransactionPolicy,
        first: TransactionPolicy,
        second: TransactionPolicy,
    },

    #[error("transaction policy {0} requires a propagated transaction but none is active")]
    NoTransactionPropagated(TransactionPolicy),

    #[error("transaction has invalid status {0}: it must be ACTIVE on propagation")]
    InvalidPropagatedStatus(TransactionStatus),

    #[error("failed to create a new transaction: {0}")]
    Begin(#[source] TransactionManagerError),

    #[error("a transaction already exists on the exchange")]
    AlreadyExists,

    #[error("failed to commit transaction: {0}")]
    Commit(#[source] TransactionManagerError),

    #[error("failed to roll back transaction: {0}")]
    Rollback(#[source] TransactionManagerError),

    #[error("transaction was already rolled back")]
    AlreadyRolledBack,

    #[error("transaction cannot be completed with status {0}")]
    InvalidCompletionStatus(TransactionStatus),

    #[error("failed to complete transaction: {0}")]
    CompleteFailed(#[source] Box<TransactionFailure>),

    #[error("failed to retrieve transaction status: {0}")]
    StatusUnavailable(#[source] TransactionManagerError),
}

// ---------------------------------------------------------------------------
// HandlerError
// ---------------------------------------------------------------------------

/// Failure of a handler or provider while processing an exchange.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// Generic failure, optionally wrapping the error that caused it.
    #[error("{message}")]
    Handler {
        message: String,
        #[source]
        cause: Option<anyhow::Error>,
    },

    #[error(transparent)]
    Transaction(#[from] TransactionFailure),

    #[error("security failure: {0}")]
    Security(String),

    #[error("required policies have not been provided: {}", PolicyList(violated))]
    PolicyViolation { violated: BTreeSet<Policy> },

    #[error("transformation failed in {transformer}: {message}")]
    Transformation {
        transformer: String,
        message: String,
        #[source]
        cause: Option<anyhow::Error>,
    },

    #[error("validation failed in {validator}: {detail}")]
    Validation { validator: String, detail: String },

    /// Deployment or wiring problem. Retrying the same exchange cannot help.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl HandlerError {
    /// Generic failure without a cause.
    #[must_use]
    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler {
            message: message.into(),
            cause: None,
        }
    }

    /// Generic failure wrapping `cause`.
    #[must_use]
    pub fn wrap(cause: anyhow::Error) -> Self {
        Self::Handler {
            message: format!("handler failed: {cause}"),
            cause: Some(cause),
        }
    }

    /// Wrapped cause of a generic handler failure, if any.
    #[must_use]
    pub fn cause(&self) -> Option<&anyhow::Error> {
        match self {
            Self::Handler { cause, .. } | Self::Transformation { cause, .. } => cause.as_ref(),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}

struct PolicyList<'a>(&'a BTreeSet<Policy>);

impl fmt::Display for PolicyList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, policy) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{policy}")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FaultCause
// ---------------------------------------------------------------------------

/// Cause carried by an exchange fault.
#[derive(Debug)]
pub enum FaultCause {
    /// Error the service declared for the operation, passed through as-is.
    Declared(anyhow::Error),
    /// Anything else, including undeclared service errors.
    Handler(HandlerError),
}

impl FaultCause {
    #[must_use]
    pub fn as_handler_error(&self) -> Option<&HandlerError> {
        match self {
            Self::Handler(e) => Some(e),
            Self::Declared(_) => None,
        }
    }

    /// Declared error downcast to `E`.
    #[must_use]
    pub fn downcast_declared<E>(&self) -> Option<&E>
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        match self {
            Self::Declared(e) => e.downcast_ref::<E>(),
            Self::Handler(_) => None,
        }
    }
}

impl fmt::Display for FaultCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Declared(e) => write!(f, "{e}"),
            Self::Handler(e) => write!(f, "{e}"),
        }
    }
}

impl From<HandlerError> for FaultCause {
    fn from(e: HandlerError) -> Self {
        Self::Handler(e)
    }
}

// ---------------------------------------------------------------------------
// ExchangeError
// ---------------------------------------------------------------------------

/// Programming-contract violation on an exchange.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExchangeError {
    #[error("exchange has already been sent")]
    AlreadySent,

    #[error("reply not allowed on IN_ONLY exchange")]
    ReplyNotAllowed,

    #[error("reply can only be set in the IN phase, exchange is in {0}")]
    ReplyPhase(String),

    #[error("send fault not allowed on new exchanges")]
    SendFaultNotAllowed,

    #[error("exchange is already in FAULT, no further reply or fault may be set")]
    AlreadyFaulted,

    #[error("contract cannot be changed after the exchange was sent")]
    ContractFrozen,

    #[error("operation name required: service {0} has multiple operations")]
    OperationNameRequired(String),

    #[error("operation {operation} does not exist for service {service}")]
    UnknownOperation { service: String, operation: String },

    #[error("service {0} has no operations")]
    NoOperations(String),

    #[error("service {0} is not registered")]
    UnknownService(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::SecurityPolicy;

    #[derive(Debug, thiserror::Error)]
    #[error("out of stock")]
    struct OutOfStock;

    #[test]
    fn policy_violation_lists_unmet_policies() {
        let violated: BTreeSet<Policy> = [
            Policy::from(TransactionPolicy::ManagedTransactionGlobal),
            Policy::from(SecurityPolicy::Authorization),
        ]
        .into_iter()
        .collect();
        let err = HandlerError::PolicyViolation { violated };
        assert_eq!(
            err.to_string(),
            "required policies have not been provided: managedTransaction.Global authorization"
        );
    }

    #[test]
    fn wrapped_cause_is_reachable() {
        let err = HandlerError::wrap(anyhow::Error::new(OutOfStock));
        assert!(err.cause().unwrap().is::<OutOfStock>());
        assert!(err.to_string().contains("out of stock"));
    }

    #[test]
    fn declared_cause_downcasts() {
        let cause = FaultCause::Declared(anyhow::Error::new(OutOfStock));
        assert!(cause.downcast_declared::<OutOfStock>().is_some());
        assert!(cause.as_handler_error().is_none());
    }

    #[test]
    fn complete_failed_keeps_source() {
        let err = TransactionFailure::CompleteFailed(Box::new(TransactionFailure::AlreadyRolledBack));
        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), "transaction was already rolled back");
    }
}
