//! In-process transaction manager.
//!
//! Keeps one status entry per live transaction. Associations live on the
//! caller's [`TransactionContext`]; the manager itself holds no notion of a
//! "current" transaction.

use dashmap::DashMap;
use esb_core::{TransactionContext, TransactionId, TransactionManager, TransactionManagerError, TransactionStatus};
use tracing::debug;
use uuid::Uuid;

/// Local, non-XA transaction manager backed by a concurrent status table.
#[derive(Debug, Default)]
pub struct LocalTransactionManager {
    transactions: DashMap<TransactionId, TransactionStatus>,
}

impl LocalTransactionManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of transactions begun but not yet completed.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.transactions.len()
    }

    /// Marks a live transaction as rolled back by the system, the way a
    /// transaction timeout would. Returns `false` for unknown ids.
    pub fn expire(&self, id: &TransactionId) -> bool {
        match self.transactions.get_mut(id) {
            Some(mut status) => {
                *status = TransactionStatus::RolledBack;
                true
            }
            None => false,
        }
    }

    fn current(ctx: &TransactionContext) -> Result<TransactionId, TransactionManagerError> {
        ctx.current().cloned().ok_or(TransactionManagerError::NoTransaction)
    }
}

impl TransactionManager for LocalTransactionManager {
    fn begin(&self, ctx: &mut TransactionContext) -> Result<TransactionId, TransactionManagerError> {
        if ctx.current().is_some() {
            return Err(TransactionManagerError::AlreadyAssociated);
        }
        let id = TransactionId::new(Uuid::new_v4().to_string());
        self.transactions.insert(id.clone(), TransactionStatus::Active);
        ctx.associate(id.clone());
        debug!(transaction = %id, "transaction begun");
        Ok(id)
    }

    fn commit(&self, ctx: &mut TransactionContext) -> Result<(), TransactionManagerError> {
        let id = Self::current(ctx)?;
        let status = self
            .transactions
            .get(&id)
            .map(|s| *s)
            .ok_or_else(|| TransactionManagerError::UnknownTransaction(id.clone()))?;
        match status {
            TransactionStatus::Active => {
                self.transactions.remove(&id);
                ctx.disassociate();
                debug!(transaction = %id, "transaction committed");
                Ok(())
            }
            TransactionStatus::MarkedRollback => {
                self.transactions.remove(&id);
                ctx.disassociate();
                Err(TransactionManagerError::RolledBackOnCommit(id))
            }
            status => Err(TransactionManagerError::IllegalState { id, status }),
        }
    }

    fn rollback(&self, ctx: &mut TransactionContext) -> Result<(), TransactionManagerError> {
        let id = Self::current(ctx)?;
        ctx.disassociate();
        if self.transactions.remove(&id).is_none() {
            return Err(TransactionManagerError::UnknownTransaction(id));
        }
        debug!(transaction = %id, "transaction rolled back");
        Ok(())
    }

    fn set_rollback_only(&self, ctx: &TransactionContext) -> Result<(), TransactionManagerError> {
        let id = Self::current(ctx)?;
        let mut status = self
            .transactions
            .get_mut(&id)
            .ok_or_else(|| TransactionManagerError::UnknownTransaction(id.clone()))?;
        match *status {
            TransactionStatus::Active | TransactionStatus::MarkedRollback => {
                *status = TransactionStatus::MarkedRollback;
                Ok(())
            }
            other => Err(TransactionManagerError::IllegalState { id, status: other }),
        }
    }

    fn status(&self, ctx: &TransactionContext) -> Result<TransactionStatus, TransactionManagerError> {
        match ctx.current() {
            None => Ok(TransactionStatus::NoTransaction),
            Some(id) => self
                .transactions
                .get(id)
                .map(|s| *s)
                .ok_or_else(|| TransactionManagerError::UnknownTransaction(id.clone())),
        }
    }

    fn suspend(&self, ctx: &mut TransactionContext) -> Result<Option<TransactionId>, TransactionManagerError> {
        Ok(ctx.disassociate())
    }

    fn resume(&self, ctx: &mut TransactionContext, id: TransactionId) -> Result<(), TransactionManagerError> {
        if ctx.current().is_some() {
            return Err(TransactionManagerError::AlreadyAssociated);
        }
        if !self.transactions.contains_key(&id) {
            return Err(TransactionManagerError::UnknownTransaction(id));
        }
        ctx.associate(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_commit_cycle() {
        let tm = LocalTransactionManager::new();
        let mut ctx = TransactionContext::new();
        assert_eq!(tm.status(&ctx).unwrap(), TransactionStatus::NoTransaction);

        let id = tm.begin(&mut ctx).unwrap();
        assert_eq!(ctx.current(), Some(&id));
        assert_eq!(tm.status(&ctx).unwrap(), TransactionStatus::Active);
        assert_eq!(tm.begin(&mut ctx).unwrap_err(), TransactionManagerError::AlreadyAssociated);

        tm.commit(&mut ctx).unwrap();
        assert!(ctx.current().is_none());
        assert_eq!(tm.live_count(), 0);
    }

    #[test]
    fn rollback_only_fails_commit() {
        let tm = LocalTransactionManager::new();
        let mut ctx = TransactionContext::new();
        let id = tm.begin(&mut ctx).unwrap();
        tm.set_rollback_only(&ctx).unwrap();
        assert_eq!(tm.status(&ctx).unwrap(), TransactionStatus::MarkedRollback);

        assert_eq!(
            tm.commit(&mut ctx).unwrap_err(),
            TransactionManagerError::RolledBackOnCommit(id)
        );
        assert_eq!(tm.live_count(), 0);
    }

    #[test]
    fn suspend_and_resume() {
        let tm = LocalTransactionManager::new();
        let mut ctx = TransactionContext::new();
        let id = tm.begin(&mut ctx).unwrap();

        let suspended = tm.suspend(&mut ctx).unwrap().unwrap();
        assert_eq!(suspended, id);
        assert_eq!(tm.status(&ctx).unwrap(), TransactionStatus::NoTransaction);

        let other = tm.begin(&mut ctx).unwrap();
        assert_eq!(
            tm.resume(&mut ctx, id.clone()).unwrap_err(),
            TransactionManagerError::AlreadyAssociated
        );
        tm.rollback(&mut ctx).unwrap();
        assert!(tm.resume(&mut ctx, other).is_err());

        tm.resume(&mut ctx, id.clone()).unwrap();
        assert_eq!(ctx.current(), Some(&id));
    }

    #[test]
    fn expired_transaction_reports_rolled_back() {
        let tm = LocalTransactionManager::new();
        let mut ctx = TransactionContext::new();
        let id = tm.begin(&mut ctx).unwrap();
        assert!(tm.expire(&id));
        assert_eq!(tm.status(&ctx).unwrap(), TransactionStatus::RolledBack);
        assert!(matches!(
            tm.commit(&mut ctx),
            Err(TransactionManagerError::IllegalState { status: TransactionStatus::RolledBack, .. })
        ));
        tm.rollback(&mut ctx).unwrap();
        assert!(ctx.current().is_none());
    }
}
