use std::collections::HashSet;
use std::fmt;
use parking_lot::{Mutex, RwLock};
use thiserror::Error;

use crate::common::types::{Rid, TxnId};

/// Transaction isolation levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
}

/// Transaction states under strict two-phase locking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Growing,
    Shrinking,
    Committed,
    Aborted,
}

/// Why a transaction was aborted by the lock manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    LockOnShrinking,
    LockSharedOnReadUncommitted,
    UpgradeConflict,
    Deadlock,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            AbortReason::LockOnShrinking => "lock requested in the shrinking phase",
            AbortReason::LockSharedOnReadUncommitted => {
                "shared lock requested under READ UNCOMMITTED"
            }
            AbortReason::UpgradeConflict => "another upgrade is already in progress",
            AbortReason::Deadlock => "wounded by an older transaction",
        };
        f.write_str(message)
    }
}

/// Errors raised by the concurrency layer
#[derive(Error, Debug)]
pub enum TransactionError {
    #[error("transaction {txn_id} aborted: {reason}")]
    Aborted { txn_id: TxnId, reason: AbortReason },

    #[error("transaction {0} not found")]
    NotFound(TxnId),
}

/// An active transaction: its 2PL state plus the record locks it holds.
/// The lock sets are updated by the lock manager on grant and by `unlock`;
/// a wounded transaction keeps its sets until the executor releases them.
pub struct Transaction {
    id: TxnId,
    isolation_level: IsolationLevel,
    state: RwLock<TransactionState>,
    shared_lock_set: Mutex<HashSet<Rid>>,
    exclusive_lock_set: Mutex<HashSet<Rid>>,
}

impl Transaction {
    pub fn new(id: TxnId, isolation_level: IsolationLevel) -> Self {
        Self {
            id,
            isolation_level,
            state: RwLock::new(TransactionState::Growing),
            shared_lock_set: Mutex::new(HashSet::new()),
            exclusive_lock_set: Mutex::new(HashSet::new()),
        }
    }

    pub fn id(&self) -> TxnId {
        self.id
    }

    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation_level
    }

    pub fn state(&self) -> TransactionState {
        *self.state.read()
    }

    pub fn set_state(&self, state: TransactionState) {
        *self.state.write() = state;
    }

    pub fn is_shared_locked(&self, rid: Rid) -> bool {
        self.shared_lock_set.lock().contains(&rid)
    }

    pub fn is_exclusive_locked(&self, rid: Rid) -> bool {
        self.exclusive_lock_set.lock().contains(&rid)
    }

    pub fn add_shared_lock(&self, rid: Rid) {
        self.shared_lock_set.lock().insert(rid);
    }

    pub fn add_exclusive_lock(&self, rid: Rid) {
        self.exclusive_lock_set.lock().insert(rid);
    }

    pub fn remove_shared_lock(&self, rid: Rid) {
        self.shared_lock_set.lock().remove(&rid);
    }

    pub fn remove_exclusive_lock(&self, rid: Rid) {
        self.exclusive_lock_set.lock().remove(&rid);
    }

    /// Every record this transaction currently holds a lock on.
    pub fn held_locks(&self) -> Vec<Rid> {
        let mut rids: Vec<Rid> = self.exclusive_lock_set.lock().iter().copied().collect();
        rids.extend(self.shared_lock_set.lock().iter().copied());
        rids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_transaction_is_growing() {
        let txn = Transaction::new(1, IsolationLevel::ReadCommitted);
        assert_eq!(txn.id(), 1);
        assert_eq!(txn.state(), TransactionState::Growing);
        assert_eq!(txn.isolation_level(), IsolationLevel::ReadCommitted);
        assert!(txn.held_locks().is_empty());
    }

    #[test]
    fn test_lock_set_bookkeeping() {
        let txn = Transaction::new(2, IsolationLevel::RepeatableRead);
        let a = Rid::new(1, 0);
        let b = Rid::new(1, 1);

        txn.add_shared_lock(a);
        txn.add_exclusive_lock(b);
        assert!(txn.is_shared_locked(a));
        assert!(txn.is_exclusive_locked(b));
        assert_eq!(txn.held_locks().len(), 2);

        txn.remove_shared_lock(a);
        txn.remove_exclusive_lock(b);
        assert!(txn.held_locks().is_empty());
    }
}
