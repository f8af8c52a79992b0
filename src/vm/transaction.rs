//! In-memory transaction context.
//!
//! Holds the isolation level, the snapshot of transactions active at begin
//! (repeatable read only), and the error/auto-abort state used by the
//! concurrency-conflict paths.

use hashbrown::{HashMap, HashSet};
use parking_lot::Mutex;

use crate::error::EngineError;
use crate::tm::SUPER_XID;
use crate::Xid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadCommitted,
    RepeatableRead,
}

#[derive(Default)]
struct TxnState {
    err: Option<EngineError>,
    auto_aborted: bool,
}

pub struct Transaction {
    pub xid: Xid,
    pub level: IsolationLevel,
    /// XIDs active when this transaction began. Frozen at begin; only
    /// repeatable read consults it.
    snapshot: Option<HashSet<Xid>>,
    state: Mutex<TxnState>,
}

impl Transaction {
    /// Builds the context; for repeatable read the snapshot captures the
    /// keys of the active-transaction table as of now.
    pub fn new<V>(xid: Xid, level: IsolationLevel, active: &HashMap<Xid, V>) -> Self {
        let snapshot = match level {
            IsolationLevel::ReadCommitted => None,
            IsolationLevel::RepeatableRead => Some(active.keys().copied().collect()),
        };
        Self {
            xid,
            level,
            snapshot,
            state: Mutex::new(TxnState::default()),
        }
    }

    /// Whether `xid` was active when this transaction began. The super
    /// transaction is never in a snapshot.
    pub fn in_snapshot(&self, xid: Xid) -> bool {
        if xid == SUPER_XID {
            return false;
        }
        self.snapshot
            .as_ref()
            .map_or(false, |snap| snap.contains(&xid))
    }

    pub fn err(&self) -> Option<EngineError> {
        self.state.lock().err
    }

    pub fn set_err(&self, err: EngineError) {
        self.state.lock().err = Some(err);
    }

    pub fn is_auto_aborted(&self) -> bool {
        self.state.lock().auto_aborted
    }

    pub fn set_auto_aborted(&self) {
        self.state.lock().auto_aborted = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_committed_takes_no_snapshot() {
        let active: HashMap<Xid, ()> = [(3, ()), (4, ())].into_iter().collect();
        let txn = Transaction::new(5, IsolationLevel::ReadCommitted, &active);
        assert!(!txn.in_snapshot(3));
    }

    #[test]
    fn repeatable_read_freezes_active_set() {
        let active: HashMap<Xid, ()> = [(3, ()), (4, ())].into_iter().collect();
        let txn = Transaction::new(5, IsolationLevel::RepeatableRead, &active);
        assert!(txn.in_snapshot(3));
        assert!(txn.in_snapshot(4));
        assert!(!txn.in_snapshot(6));
        assert!(!txn.in_snapshot(SUPER_XID));
    }
}
