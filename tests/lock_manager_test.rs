use std::sync::Arc;
use std::thread;
use std::time::Duration;

use stratusdb::common::types::Rid;
use stratusdb::transaction::{
    AbortReason, IsolationLevel, LockManager, Transaction, TransactionError, TransactionManager,
    TransactionState,
};

fn txn(id: i32, isolation_level: IsolationLevel) -> Arc<Transaction> {
    Arc::new(Transaction::new(id, isolation_level))
}

// Give a spawned thread time to reach its blocking wait.
fn settle() {
    thread::sleep(Duration::from_millis(100));
}

#[test]
fn test_shared_unlock_under_read_committed_keeps_growing() {
    let lm = LockManager::new();
    let t = txn(0, IsolationLevel::ReadCommitted);
    let rid = Rid::new(1, 0);

    assert!(lm.lock_shared(&t, rid).unwrap());
    assert_eq!(t.state(), TransactionState::Growing);
    assert!(t.is_shared_locked(rid));

    assert!(lm.unlock(&t, rid));
    assert_eq!(t.state(), TransactionState::Growing);
    assert!(!t.is_shared_locked(rid));
}

#[test]
fn test_shared_unlock_under_repeatable_read_starts_shrinking() {
    let lm = LockManager::new();
    let t = txn(0, IsolationLevel::RepeatableRead);
    let rid = Rid::new(1, 0);

    assert!(lm.lock_shared(&t, rid).unwrap());
    assert!(lm.unlock(&t, rid));
    assert_eq!(t.state(), TransactionState::Shrinking);
}

#[test]
fn test_lock_during_shrinking_aborts() {
    let lm = LockManager::new();
    let t = txn(0, IsolationLevel::RepeatableRead);
    let a = Rid::new(1, 0);
    let b = Rid::new(1, 1);

    assert!(lm.lock_shared(&t, a).unwrap());
    assert!(lm.unlock(&t, a));
    assert_eq!(t.state(), TransactionState::Shrinking);

    match lm.lock_shared(&t, b) {
        Err(TransactionError::Aborted { reason, .. }) => {
            assert_eq!(reason, AbortReason::LockOnShrinking);
        }
        other => panic!("expected abort, got {:?}", other.map(|_| ())),
    }
    assert_eq!(t.state(), TransactionState::Aborted);
}

#[test]
fn test_shared_lock_under_read_uncommitted_aborts() {
    let lm = LockManager::new();
    let t = txn(0, IsolationLevel::ReadUncommitted);
    let rid = Rid::new(1, 0);

    match lm.lock_shared(&t, rid) {
        Err(TransactionError::Aborted { reason, .. }) => {
            assert_eq!(reason, AbortReason::LockSharedOnReadUncommitted);
        }
        other => panic!("expected abort, got {:?}", other.map(|_| ())),
    }
    assert_eq!(t.state(), TransactionState::Aborted);
}

#[test]
fn test_already_aborted_caller_is_a_noop() {
    let lm = LockManager::new();
    let t = txn(0, IsolationLevel::ReadCommitted);
    t.set_state(TransactionState::Aborted);

    let rid = Rid::new(1, 0);
    assert!(!lm.lock_shared(&t, rid).unwrap());
    assert!(!lm.lock_exclusive(&t, rid).unwrap());
    assert!(!lm.lock_upgrade(&t, rid).unwrap());
}

#[test]
fn test_unlock_without_holding_returns_false() {
    let lm = LockManager::new();
    let t = txn(0, IsolationLevel::ReadCommitted);

    assert!(!lm.unlock(&t, Rid::new(9, 9)));
}

#[test]
fn test_shared_locks_coexist() {
    let lm = LockManager::new();
    let t1 = txn(1, IsolationLevel::ReadCommitted);
    let t2 = txn(2, IsolationLevel::ReadCommitted);
    let rid = Rid::new(1, 0);

    assert!(lm.lock_shared(&t1, rid).unwrap());
    assert!(lm.lock_shared(&t2, rid).unwrap());
    assert!(t1.is_shared_locked(rid));
    assert!(t2.is_shared_locked(rid));

    assert!(lm.unlock(&t1, rid));
    assert!(lm.unlock(&t2, rid));
}

#[test]
fn test_younger_exclusive_waits_for_older() {
    let lm = Arc::new(LockManager::new());
    let older = txn(1, IsolationLevel::ReadCommitted);
    let younger = txn(2, IsolationLevel::ReadCommitted);
    let rid = Rid::new(1, 0);

    assert!(lm.lock_exclusive(&older, rid).unwrap());

    let lm_clone = lm.clone();
    let younger_clone = younger.clone();
    let waiter = thread::spawn(move || lm_clone.lock_exclusive(&younger_clone, rid));

    settle();
    // the younger transaction must not wound the older one
    assert_eq!(older.state(), TransactionState::Growing);
    assert!(!waiter.is_finished());

    assert!(lm.unlock(&older, rid));
    assert!(waiter.join().unwrap().unwrap());
    assert!(younger.is_exclusive_locked(rid));
}

#[test]
fn test_wound_wait_aborts_younger_holder() {
    let lm = Arc::new(LockManager::new());
    let young = txn(10, IsolationLevel::ReadCommitted);
    let old = txn(5, IsolationLevel::ReadCommitted);
    let rid = Rid::new(2, 0);

    assert!(lm.lock_exclusive(&young, rid).unwrap());

    let lm_clone = lm.clone();
    let old_clone = old.clone();
    let waiter = thread::spawn(move || lm_clone.lock_exclusive(&old_clone, rid));

    settle();
    // the older requester wounded the younger holder on sight; the lock
    // itself is only released when the victim's locks are given back
    assert_eq!(young.state(), TransactionState::Aborted);
    assert!(!waiter.is_finished());

    for held in young.held_locks() {
        lm.unlock(&young, held);
    }
    assert!(waiter.join().unwrap().unwrap());
    assert!(old.is_exclusive_locked(rid));

    // a later transaction queues behind the new holder
    let later = txn(20, IsolationLevel::ReadCommitted);
    let lm_clone = lm.clone();
    let later_clone = later.clone();
    let waiter = thread::spawn(move || lm_clone.lock_exclusive(&later_clone, rid));

    settle();
    assert!(!waiter.is_finished());
    assert!(lm.unlock(&old, rid));
    assert!(waiter.join().unwrap().unwrap());
    assert!(later.is_exclusive_locked(rid));
}

#[test]
fn test_wounded_waiter_raises_deadlock() {
    let lm = Arc::new(LockManager::new());
    let holder = txn(5, IsolationLevel::ReadCommitted);
    let victim = txn(10, IsolationLevel::ReadCommitted);
    let old = txn(1, IsolationLevel::ReadCommitted);
    let r1 = Rid::new(2, 1);
    let r2 = Rid::new(2, 2);

    // the victim holds a shared lock on r1 and sleeps waiting for r2
    assert!(lm.lock_shared(&victim, r1).unwrap());
    assert!(lm.lock_exclusive(&holder, r2).unwrap());

    let lm_clone = lm.clone();
    let victim_clone = victim.clone();
    let waiter = thread::spawn(move || lm_clone.lock_exclusive(&victim_clone, r2));
    settle();
    assert!(!waiter.is_finished());

    // an older transaction wounds the victim through r1; the broadcast
    // reaches the victim sleeping on r2's queue, which observes its own
    // ABORTED state and raises a deadlock error
    let lm_clone = lm.clone();
    let old_clone = old.clone();
    let old_waiter = thread::spawn(move || lm_clone.lock_exclusive(&old_clone, r1));
    settle();
    assert_eq!(victim.state(), TransactionState::Aborted);

    match waiter.join().unwrap() {
        Err(TransactionError::Aborted { reason, .. }) => {
            assert_eq!(reason, AbortReason::Deadlock)
        }
        other => panic!("expected deadlock abort, got {:?}", other.map(|_| ())),
    }

    // the wounded victim still holds r1 until its locks are given back
    for held in victim.held_locks() {
        lm.unlock(&victim, held);
    }
    assert!(old_waiter.join().unwrap().unwrap());

    assert!(lm.unlock(&old, r1));
    assert!(lm.unlock(&holder, r2));
}

#[test]
fn test_contiguous_shared_requests_granted_together() {
    let lm = Arc::new(LockManager::new());
    let writer = txn(1, IsolationLevel::ReadCommitted);
    let reader_a = txn(2, IsolationLevel::ReadCommitted);
    let reader_b = txn(3, IsolationLevel::ReadCommitted);
    let rid = Rid::new(3, 0);

    assert!(lm.lock_exclusive(&writer, rid).unwrap());

    let mut waiters = Vec::new();
    for reader in [&reader_a, &reader_b] {
        let lm_clone = lm.clone();
        let reader_clone = reader.clone();
        waiters.push(thread::spawn(move || {
            lm_clone.lock_shared(&reader_clone, rid)
        }));
    }
    settle();
    for waiter in &waiters {
        assert!(!waiter.is_finished());
    }

    // one release grants the whole shared prefix
    assert!(lm.unlock(&writer, rid));
    for waiter in waiters {
        assert!(waiter.join().unwrap().unwrap());
    }
    assert!(reader_a.is_shared_locked(rid));
    assert!(reader_b.is_shared_locked(rid));

    assert!(lm.unlock(&reader_a, rid));
    assert!(lm.unlock(&reader_b, rid));
}

#[test]
fn test_upgrade_when_sole_holder() {
    let lm = LockManager::new();
    let t = txn(0, IsolationLevel::RepeatableRead);
    let rid = Rid::new(4, 0);

    assert!(lm.lock_shared(&t, rid).unwrap());
    assert!(lm.lock_upgrade(&t, rid).unwrap());
    assert!(t.is_exclusive_locked(rid));
    assert!(!t.is_shared_locked(rid));

    assert!(lm.unlock(&t, rid));
    assert_eq!(t.state(), TransactionState::Shrinking);
}

#[test]
fn test_upgrade_without_shared_lock_fails() {
    let lm = LockManager::new();
    let t = txn(0, IsolationLevel::ReadCommitted);

    assert!(!lm.lock_upgrade(&t, Rid::new(4, 1)).unwrap());
    assert_eq!(t.state(), TransactionState::Aborted);
}

#[test]
fn test_concurrent_upgrades_conflict() {
    let lm = Arc::new(LockManager::new());
    // the upgrader is the younger of the two so the wound pass does not
    // remove its rival before the conflict can be observed
    let first = txn(2, IsolationLevel::RepeatableRead);
    let second = txn(1, IsolationLevel::RepeatableRead);
    let rid = Rid::new(4, 2);

    assert!(lm.lock_shared(&first, rid).unwrap());
    assert!(lm.lock_shared(&second, rid).unwrap());

    let lm_clone = lm.clone();
    let first_clone = first.clone();
    let upgrader = thread::spawn(move || lm_clone.lock_upgrade(&first_clone, rid));
    settle();
    assert!(!upgrader.is_finished());

    // a second upgrade on the same record aborts immediately
    match lm.lock_upgrade(&second, rid) {
        Err(TransactionError::Aborted { reason, .. }) => {
            assert_eq!(reason, AbortReason::UpgradeConflict)
        }
        other => panic!("expected upgrade conflict, got {:?}", other.map(|_| ())),
    }
    assert_eq!(second.state(), TransactionState::Aborted);

    // once the rival's shared lock is given back, the upgrader proceeds
    assert!(lm.unlock(&second, rid));
    assert!(upgrader.join().unwrap().unwrap());
    assert!(first.is_exclusive_locked(rid));

    assert!(lm.unlock(&first, rid));
}

#[test]
fn test_commit_releases_locks_for_waiters() {
    let lm = Arc::new(LockManager::new());
    let tm = Arc::new(TransactionManager::new(lm.clone()));
    let first = tm.begin(IsolationLevel::ReadCommitted);
    let second = tm.begin(IsolationLevel::ReadCommitted);
    let rid = Rid::new(5, 0);

    assert!(lm.lock_exclusive(&first, rid).unwrap());

    let lm_clone = lm.clone();
    let second_clone = second.clone();
    let waiter = thread::spawn(move || lm_clone.lock_exclusive(&second_clone, rid));
    settle();
    assert!(!waiter.is_finished());

    tm.commit(&first).unwrap();
    assert_eq!(first.state(), TransactionState::Committed);
    assert!(first.held_locks().is_empty());

    assert!(waiter.join().unwrap().unwrap());
    assert!(second.is_exclusive_locked(rid));
    tm.commit(&second).unwrap();
}

#[test]
fn test_abort_releases_locks() {
    let lm = Arc::new(LockManager::new());
    let tm = Arc::new(TransactionManager::new(lm.clone()));
    let first = tm.begin(IsolationLevel::RepeatableRead);
    let second = tm.begin(IsolationLevel::RepeatableRead);
    let rid = Rid::new(5, 1);

    assert!(lm.lock_shared(&first, rid).unwrap());
    assert!(lm.lock_shared(&second, rid).unwrap());

    tm.abort(&first).unwrap();
    assert_eq!(first.state(), TransactionState::Aborted);
    assert!(first.held_locks().is_empty());

    // the survivor can still upgrade: it is the sole holder now
    assert!(lm.lock_upgrade(&second, rid).unwrap());
    tm.commit(&second).unwrap();
}
