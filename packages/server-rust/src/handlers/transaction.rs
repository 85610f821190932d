//! Transaction policy handler.
//!
//! Runs twice per exchange. The first `handle_message` ("before") validates
//! the required transaction policies, suspends or begins transactions as
//! they demand, and provides the policies it satisfied. The second call
//! ("after", either the `OUT` pass or the `IN_ONLY` completion pass) ends the
//! transaction this handler began and resumes the one it suspended.
//!
//! State between the two calls lives in transient exchange properties; the
//! handler itself is shared and stateless.

use std::sync::Arc;

use async_trait::async_trait;
use esb_core::policy::check_transaction_policies;
use esb_core::{
    labels, Context, Exchange, HandlerError, Property, TransactionContext, TransactionFailure, TransactionId,
    TransactionManager, TransactionPolicy, TransactionStatus, ROLLBACK_ON_FAULT,
};
use tracing::{debug, error, warn};

use crate::bus::handler::ExchangeHandler;

/// Prefix of every property the handler keeps its per-exchange state in.
/// Inbound endpoints must not let callers set these.
pub const STATE_PREFIX: &str = "transaction.";
/// Marker set by the first call on an exchange.
pub const BEFORE_INVOKED: &str = "transaction.beforeInvoked";
/// Id of the transaction this handler began.
pub const INITIATED: &str = "transaction.initiated";
/// Id of the transaction this handler suspended.
pub const SUSPENDED: &str = "transaction.suspended";

pub struct TransactionHandler {
    manager: Option<Arc<dyn TransactionManager>>,
}

impl TransactionHandler {
    pub const NAME: &'static str = "transaction";

    #[must_use]
    pub fn new(manager: Arc<dyn TransactionManager>) -> Self {
        Self { manager: Some(manager) }
    }

    /// Handler with no transaction manager: every call is a no-op.
    #[must_use]
    pub fn disabled() -> Self {
        Self { manager: None }
    }
}

#[async_trait]
impl ExchangeHandler for TransactionHandler {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn handle_message(&self, exchange: &mut Exchange) -> Result<(), HandlerError> {
        let Some(tm) = self.manager.as_deref() else {
            return Ok(());
        };

        let before_invoked = exchange
            .context()
            .property(BEFORE_INVOKED)
            .is_some_and(Property::is_truthy);
        if before_invoked {
            after(tm, exchange)?;
        } else {
            let ctx = exchange.context_mut();
            ctx.remove_property(INITIATED);
            ctx.remove_property(SUSPENDED);
            mark(ctx, BEFORE_INVOKED, true);
            before(tm, exchange)?;
        }
        Ok(())
    }

    async fn handle_fault(&self, exchange: &mut Exchange) -> Result<(), HandlerError> {
        let Some(tm) = self.manager.as_deref() else {
            return Ok(());
        };

        let rollback_on_fault = exchange
            .context()
            .property(ROLLBACK_ON_FAULT)
            .is_some_and(Property::is_truthy);
        if rollback_on_fault && exchange.transaction().current().is_some() {
            if let Err(e) = tm.set_rollback_only(exchange.transaction()) {
                error!(exchange_id = %exchange.id(), error = %e, "failed to mark transaction rollback-only");
            }
        }
        if let Err(e) = after(tm, exchange) {
            error!(exchange_id = %exchange.id(), error = %e, "failed to complete transaction on fault");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Before / after
// ---------------------------------------------------------------------------

fn mark(ctx: &mut Context, name: &str, value: impl Into<serde_json::Value>) {
    ctx.set_property(name, value).add_label(labels::TRANSIENT);
}

fn take_id(ctx: &mut Context, name: &str) -> Option<TransactionId> {
    ctx.remove_property(name)
        .and_then(|p| p.value().as_str().map(TransactionId::new))
}

fn current_status(tm: &dyn TransactionManager, ctx: &TransactionContext) -> Result<TransactionStatus, TransactionFailure> {
    tm.status(ctx).map_err(TransactionFailure::StatusUnavailable)
}

fn before(tm: &dyn TransactionManager, exchange: &mut Exchange) -> Result<(), TransactionFailure> {
    use TransactionPolicy::{
        ManagedTransactionGlobal, ManagedTransactionLocal, NoManagedTransaction, PropagatesTransaction,
        SuspendsTransaction,
    };

    let policies = exchange.policies();
    if !policies.requires_transaction_policy() {
        return Ok(());
    }
    check_transaction_policies(policies.required())?;

    let propagates = policies.is_required(PropagatesTransaction);
    let suspends = policies.is_required(SuspendsTransaction);
    let global = policies.is_required(ManagedTransactionGlobal);
    let local = policies.is_required(ManagedTransactionLocal);
    let no_managed = policies.is_required(NoManagedTransaction);

    let mut status = current_status(tm, exchange.transaction())?;

    if propagates {
        if status == TransactionStatus::NoTransaction {
            // A global transaction is started below instead.
            if !global {
                return Err(TransactionFailure::NoTransactionPropagated(PropagatesTransaction));
            }
        } else if status != TransactionStatus::Active {
            return Err(TransactionFailure::InvalidPropagatedStatus(status));
        }
    } else if global
        && !suspends
        && status != TransactionStatus::NoTransaction
        && status != TransactionStatus::Active
    {
        return Err(TransactionFailure::InvalidPropagatedStatus(status));
    }

    if (local || no_managed || suspends) && status != TransactionStatus::NoTransaction {
        debug!(exchange_id = %exchange.id(), "suspending active transaction");
        match tm.suspend(exchange.transaction_mut()) {
            Ok(Some(id)) => mark(exchange.context_mut(), SUSPENDED, id.as_str()),
            Ok(None) => {}
            Err(e) => warn!(exchange_id = %exchange.id(), error = %e, "failed to suspend transaction"),
        }
        status = current_status(tm, exchange.transaction())?;
    }

    if local || (global && status == TransactionStatus::NoTransaction) {
        begin(tm, exchange)?;
    }

    let policies = exchange.policies_mut();
    if suspends {
        policies.provide(SuspendsTransaction);
    } else if propagates {
        policies.provide(PropagatesTransaction);
    }
    if global {
        policies.provide(ManagedTransactionGlobal);
    } else if local {
        policies.provide(ManagedTransactionLocal);
    } else if no_managed {
        policies.provide(NoManagedTransaction);
    }
    Ok(())
}

fn begin(tm: &dyn TransactionManager, exchange: &mut Exchange) -> Result<(), TransactionFailure> {
    if current_status(tm, exchange.transaction())? != TransactionStatus::NoTransaction {
        return Err(TransactionFailure::AlreadyExists);
    }
    let id = tm
        .begin(exchange.transaction_mut())
        .map_err(TransactionFailure::Begin)?;
    debug!(exchange_id = %exchange.id(), transaction = %id, "created new transaction");
    mark(exchange.context_mut(), INITIATED, id.as_str());
    Ok(())
}

fn after(tm: &dyn TransactionManager, exchange: &mut Exchange) -> Result<(), TransactionFailure> {
    let completed = match take_id(exchange.context_mut(), INITIATED) {
        Some(id) => {
            debug!(exchange_id = %exchange.id(), transaction = %id, "completing transaction");
            end(tm, exchange.transaction_mut()).map_err(|e| TransactionFailure::CompleteFailed(Box::new(e)))
        }
        None => Ok(()),
    };

    if let Some(id) = take_id(exchange.context_mut(), SUSPENDED) {
        debug!(exchange_id = %exchange.id(), transaction = %id, "resuming suspended transaction");
        if let Err(e) = tm.resume(exchange.transaction_mut(), id) {
            warn!(exchange_id = %exchange.id(), error = %e, "failed to resume transaction");
        }
    }
    completed
}

fn end(tm: &dyn TransactionManager, ctx: &mut TransactionContext) -> Result<(), TransactionFailure> {
    match current_status(tm, ctx)? {
        TransactionStatus::MarkedRollback => {
            tm.rollback(ctx).map_err(TransactionFailure::Rollback)?;
            debug!("transaction rolled back as it was marked rollback-only");
        }
        TransactionStatus::Active => {
            tm.commit(ctx).map_err(TransactionFailure::Commit)?;
            debug!("transaction committed");
        }
        TransactionStatus::RolledBack => {
            // Still associated after a timeout; rollback releases it.
            if let Err(e) = tm.rollback(ctx) {
                warn!(error = %e, "failed to release rolled back transaction");
            }
            return Err(TransactionFailure::AlreadyRolledBack);
        }
        TransactionStatus::Unknown => {
            tm.rollback(ctx).map_err(TransactionFailure::Rollback)?;
            debug!("transaction rolled back due to its UNKNOWN status");
        }
        other => {
            if let Err(e) = tm.suspend(ctx) {
                warn!(error = %e, "failed to disassociate transaction");
            }
            return Err(TransactionFailure::InvalidCompletionStatus(other));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
