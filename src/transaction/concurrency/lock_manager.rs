use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use log::debug;
use parking_lot::{Condvar, Mutex};

use crate::common::types::{Rid, TxnId, INVALID_TXN_ID};
use crate::transaction::concurrency::transaction::{
    AbortReason, IsolationLevel, Transaction, TransactionError, TransactionState,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

struct LockRequest {
    txn: Arc<Transaction>,
    mode: LockMode,
}

/// Per-record lock state. Holders keep a reference to their transaction so
/// wound-wait can abort them in place; the condition variable is shared via
/// `Arc` so waiters can sleep on it while the table mutex is released.
struct LockEntry {
    mode: Option<LockMode>,
    holders: HashMap<TxnId, Arc<Transaction>>,
    request_queue: VecDeque<LockRequest>,
    pending: HashSet<TxnId>,
    upgrading: TxnId,
    cv: Arc<Condvar>,
}

impl LockEntry {
    fn new() -> Self {
        Self {
            mode: None,
            holders: HashMap::new(),
            request_queue: VecDeque::new(),
            pending: HashSet::new(),
            upgrading: INVALID_TXN_ID,
            cv: Arc::new(Condvar::new()),
        }
    }
}

type LockTable = HashMap<Rid, LockEntry>;

/// Strict two-phase locking over record ids with wound-wait deadlock
/// prevention: an older transaction aborts any younger holder in its way;
/// a younger one waits. Wounded victims keep their held locks in their own
/// sets until the executor releases them.
///
/// One mutex guards the whole table; each record carries its own condition
/// variable for wakeups.
pub struct LockManager {
    table: Mutex<LockTable>,
}

impl LockManager {
    pub fn new() -> Self {
        Self {
            table: Mutex::new(HashMap::new()),
        }
    }

    fn entry(table: &mut LockTable, rid: Rid) -> &mut LockEntry {
        table.entry(rid).or_insert_with(LockEntry::new)
    }

    /// Abort-side bookkeeping of a wound: drop the victim from every queue
    /// and pending set, clear its upgrade claim, and wake every sleeper so
    /// the victim observes its own ABORTED state. Its held locks are left
    /// in place for the executor to release.
    fn remove_from_everywhere(table: &mut LockTable, victim_id: TxnId) {
        for entry in table.values_mut() {
            if let Some(pos) = entry
                .request_queue
                .iter()
                .position(|request| request.txn.id() == victim_id)
            {
                entry.request_queue.remove(pos);
                entry.pending.remove(&victim_id);
                entry.cv.notify_all();
            }
            if entry.upgrading == victim_id {
                entry.upgrading = INVALID_TXN_ID;
                entry.cv.notify_all();
            }
        }
    }

    /// Wound every holder of `rid` whose txn id is greater than `txn_id`.
    fn wound_younger_holders(table: &mut LockTable, rid: Rid, txn_id: TxnId) {
        let victims: Vec<Arc<Transaction>> = match table.get(&rid) {
            Some(entry) => entry
                .holders
                .values()
                .filter(|holder| holder.id() > txn_id)
                .cloned()
                .collect(),
            None => return,
        };
        for victim in victims {
            debug!("lock manager: txn {} wounds txn {}", txn_id, victim.id());
            victim.set_state(TransactionState::Aborted);
            Self::remove_from_everywhere(table, victim.id());
        }
    }

    /// Acquire a shared lock on `rid`, blocking while the record is held
    /// exclusively by a transaction we cannot wound.
    pub fn lock_shared(
        &self,
        txn: &Arc<Transaction>,
        rid: Rid,
    ) -> Result<bool, TransactionError> {
        let mut table = self.table.lock();

        if txn.state() == TransactionState::Aborted {
            return Ok(false);
        }
        if txn.state() == TransactionState::Shrinking {
            txn.set_state(TransactionState::Aborted);
            return Err(TransactionError::Aborted {
                txn_id: txn.id(),
                reason: AbortReason::LockOnShrinking,
            });
        }
        if txn.isolation_level() == IsolationLevel::ReadUncommitted {
            txn.set_state(TransactionState::Aborted);
            return Err(TransactionError::Aborted {
                txn_id: txn.id(),
                reason: AbortReason::LockSharedOnReadUncommitted,
            });
        }
        txn.set_state(TransactionState::Growing);

        let txn_id = txn.id();

        if matches!(
            table.get(&rid).and_then(|entry| entry.mode),
            Some(LockMode::Exclusive)
        ) {
            Self::wound_younger_holders(&mut table, rid, txn_id);
        }

        // a surviving exclusive holder keeps its lock until it unlocks, so
        // queue up behind it
        if matches!(
            table.get(&rid).and_then(|entry| entry.mode),
            Some(LockMode::Exclusive)
        ) {
            let entry = Self::entry(&mut table, rid);
            entry.request_queue.push_back(LockRequest {
                txn: txn.clone(),
                mode: LockMode::Shared,
            });
            entry.pending.insert(txn_id);
        }

        let cv = Self::entry(&mut table, rid).cv.clone();
        while Self::entry(&mut table, rid).pending.contains(&txn_id)
            && txn.state() != TransactionState::Aborted
        {
            cv.wait(&mut table);
        }
        if txn.state() == TransactionState::Aborted {
            return Err(TransactionError::Aborted {
                txn_id,
                reason: AbortReason::Deadlock,
            });
        }

        let entry = Self::entry(&mut table, rid);
        if entry.mode.is_none() {
            entry.mode = Some(LockMode::Shared);
        }
        entry.holders.insert(txn_id, txn.clone());
        txn.add_shared_lock(rid);

        Ok(true)
    }

    /// Acquire an exclusive lock on `rid`, blocking while any holder we
    /// cannot wound remains.
    pub fn lock_exclusive(
        &self,
        txn: &Arc<Transaction>,
        rid: Rid,
    ) -> Result<bool, TransactionError> {
        let mut table = self.table.lock();

        if txn.state() == TransactionState::Aborted {
            return Ok(false);
        }
        if txn.state() == TransactionState::Shrinking {
            txn.set_state(TransactionState::Aborted);
            return Err(TransactionError::Aborted {
                txn_id: txn.id(),
                reason: AbortReason::LockOnShrinking,
            });
        }
        txn.set_state(TransactionState::Growing);

        let txn_id = txn.id();

        if table.get(&rid).and_then(|entry| entry.mode).is_some() {
            Self::wound_younger_holders(&mut table, rid, txn_id);
        }

        // an exclusive request passes directly only on a free record
        if table.get(&rid).and_then(|entry| entry.mode).is_some() {
            let entry = Self::entry(&mut table, rid);
            entry.request_queue.push_back(LockRequest {
                txn: txn.clone(),
                mode: LockMode::Exclusive,
            });
            entry.pending.insert(txn_id);
        }

        let cv = Self::entry(&mut table, rid).cv.clone();
        while Self::entry(&mut table, rid).pending.contains(&txn_id)
            && txn.state() != TransactionState::Aborted
        {
            cv.wait(&mut table);
        }
        if txn.state() == TransactionState::Aborted {
            return Err(TransactionError::Aborted {
                txn_id,
                reason: AbortReason::Deadlock,
            });
        }

        let entry = Self::entry(&mut table, rid);
        entry.mode = Some(LockMode::Exclusive);
        entry.holders.insert(txn_id, txn.clone());
        txn.add_exclusive_lock(rid);

        Ok(true)
    }

    /// Upgrade a held shared lock to exclusive. Only one upgrade may be in
    /// flight per record; the upgrader bypasses the request queue once it
    /// is the sole remaining holder.
    pub fn lock_upgrade(
        &self,
        txn: &Arc<Transaction>,
        rid: Rid,
    ) -> Result<bool, TransactionError> {
        let mut table = self.table.lock();

        if txn.state() == TransactionState::Aborted {
            return Ok(false);
        }
        if txn.state() == TransactionState::Shrinking {
            txn.set_state(TransactionState::Aborted);
            return Err(TransactionError::Aborted {
                txn_id: txn.id(),
                reason: AbortReason::LockOnShrinking,
            });
        }

        let txn_id = txn.id();

        let holds_shared = matches!(
            table.get(&rid),
            Some(entry)
                if entry.mode == Some(LockMode::Shared) && entry.holders.contains_key(&txn_id)
        );
        if !holds_shared {
            txn.set_state(TransactionState::Aborted);
            return Ok(false);
        }
        if Self::entry(&mut table, rid).upgrading != INVALID_TXN_ID {
            txn.set_state(TransactionState::Aborted);
            return Err(TransactionError::Aborted {
                txn_id,
                reason: AbortReason::UpgradeConflict,
            });
        }
        Self::entry(&mut table, rid).upgrading = txn_id;

        Self::wound_younger_holders(&mut table, rid, txn_id);

        if Self::entry(&mut table, rid).holders.len() == 1 {
            Self::entry(&mut table, rid).mode = Some(LockMode::Exclusive);
        } else {
            let cv = Self::entry(&mut table, rid).cv.clone();
            while Self::entry(&mut table, rid).mode != Some(LockMode::Exclusive)
                && txn.state() != TransactionState::Aborted
            {
                cv.wait(&mut table);
            }
            if txn.state() == TransactionState::Aborted {
                return Err(TransactionError::Aborted {
                    txn_id,
                    reason: AbortReason::Deadlock,
                });
            }
        }

        Self::entry(&mut table, rid).upgrading = INVALID_TXN_ID;
        txn.remove_shared_lock(rid);
        txn.add_exclusive_lock(rid);

        Ok(true)
    }

    /// Release a held lock. Under strict 2PL this moves a GROWING
    /// transaction to SHRINKING, except for a shared release under READ
    /// COMMITTED. Returns false when the transaction holds no lock on the
    /// record.
    pub fn unlock(&self, txn: &Arc<Transaction>, rid: Rid) -> bool {
        let mut table = self.table.lock();

        let txn_id = txn.id();
        let Some(entry) = table.get_mut(&rid) else {
            return false;
        };
        if !entry.holders.contains_key(&txn_id) {
            return false;
        }
        let mode = entry.mode;

        let read_committed_shared_release = mode == Some(LockMode::Shared)
            && txn.isolation_level() == IsolationLevel::ReadCommitted;
        if !read_committed_shared_release && txn.state() == TransactionState::Growing {
            txn.set_state(TransactionState::Shrinking);
        }

        txn.remove_shared_lock(rid);
        txn.remove_exclusive_lock(rid);
        entry.holders.remove(&txn_id);

        if mode == Some(LockMode::Shared) {
            if entry.holders.len() == 1 && entry.upgrading != INVALID_TXN_ID {
                // the waiting upgrader is now the sole holder: promote it
                entry.mode = Some(LockMode::Exclusive);
                entry.cv.notify_all();
                return true;
            }
            if !entry.holders.is_empty() {
                return true;
            }
        }

        // the record is free: grant from the front of the queue
        entry.mode = None;
        match entry.request_queue.front().map(|request| request.mode) {
            Some(LockMode::Exclusive) => {
                if let Some(request) = entry.request_queue.pop_front() {
                    entry.pending.remove(&request.txn.id());
                }
            }
            Some(LockMode::Shared) => {
                // shared requests are granted as a group, but only the
                // contiguous prefix: a shared request queued behind an
                // exclusive one is not promoted past it
                while let Some(request) = entry.request_queue.pop_front() {
                    if request.mode != LockMode::Shared {
                        entry.request_queue.push_front(request);
                        break;
                    }
                    entry.pending.remove(&request.txn.id());
                }
            }
            None => {}
        }
        entry.cv.notify_all();

        true
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}
