use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use parking_lot::Mutex;

use crate::common::types::TxnId;
use crate::transaction::concurrency::lock_manager::LockManager;
use crate::transaction::concurrency::transaction::{
    IsolationLevel, Transaction, TransactionError, TransactionState,
};

/// Creates and tracks transactions. Commit and abort both release every
/// lock the transaction still holds; for a wounded (aborted) transaction
/// this is where its locks finally leave the lock table.
pub struct TransactionManager {
    next_txn_id: AtomicI32,
    lock_manager: Arc<LockManager>,
    active_transactions: Mutex<HashMap<TxnId, Arc<Transaction>>>,
}

impl TransactionManager {
    pub fn new(lock_manager: Arc<LockManager>) -> Self {
        Self {
            next_txn_id: AtomicI32::new(0),
            lock_manager,
            active_transactions: Mutex::new(HashMap::new()),
        }
    }

    /// Begin a new transaction. Ids are monotone, which is what gives
    /// wound-wait its age order.
    pub fn begin(&self, isolation_level: IsolationLevel) -> Arc<Transaction> {
        let txn_id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        let txn = Arc::new(Transaction::new(txn_id, isolation_level));
        self.active_transactions.lock().insert(txn_id, txn.clone());
        txn
    }

    pub fn commit(&self, txn: &Arc<Transaction>) -> Result<(), TransactionError> {
        if !self.active_transactions.lock().contains_key(&txn.id()) {
            return Err(TransactionError::NotFound(txn.id()));
        }
        self.release_all_locks(txn);
        txn.set_state(TransactionState::Committed);
        self.active_transactions.lock().remove(&txn.id());
        Ok(())
    }

    pub fn abort(&self, txn: &Arc<Transaction>) -> Result<(), TransactionError> {
        if !self.active_transactions.lock().contains_key(&txn.id()) {
            return Err(TransactionError::NotFound(txn.id()));
        }
        txn.set_state(TransactionState::Aborted);
        self.release_all_locks(txn);
        self.active_transactions.lock().remove(&txn.id());
        Ok(())
    }

    pub fn get_transaction(&self, txn_id: TxnId) -> Option<Arc<Transaction>> {
        self.active_transactions.lock().get(&txn_id).cloned()
    }

    pub fn active_transaction_ids(&self) -> Vec<TxnId> {
        self.active_transactions.lock().keys().copied().collect()
    }

    fn release_all_locks(&self, txn: &Arc<Transaction>) {
        for rid in txn.held_locks() {
            self.lock_manager.unlock(txn, rid);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_assigns_monotone_ids() {
        let tm = TransactionManager::new(Arc::new(LockManager::new()));
        let a = tm.begin(IsolationLevel::ReadCommitted);
        let b = tm.begin(IsolationLevel::RepeatableRead);
        assert!(a.id() < b.id());
        assert_eq!(tm.active_transaction_ids().len(), 2);
    }

    #[test]
    fn test_commit_removes_from_registry() {
        let tm = TransactionManager::new(Arc::new(LockManager::new()));
        let txn = tm.begin(IsolationLevel::ReadCommitted);

        tm.commit(&txn).unwrap();
        assert_eq!(txn.state(), TransactionState::Committed);
        assert!(tm.get_transaction(txn.id()).is_none());

        assert!(matches!(
            tm.commit(&txn),
            Err(TransactionError::NotFound(_))
        ));
    }

    #[test]
    fn test_abort_removes_from_registry() {
        let tm = TransactionManager::new(Arc::new(LockManager::new()));
        let txn = tm.begin(IsolationLevel::RepeatableRead);

        tm.abort(&txn).unwrap();
        assert_eq!(txn.state(), TransactionState::Aborted);
        assert!(tm.get_transaction(txn.id()).is_none());
    }
}
