//! # Lock Table
//!
//! Arbitrates concurrent writers of a UID and breaks deadlocks. State:
//!
//! - `held`: UIDs each transaction currently owns
//! - `holder`: owning transaction per UID
//! - `waiters`: FIFO queue of transactions blocked per UID
//! - `wait_latch`: the one-shot latch each blocked transaction parks on
//! - `waited_on`: the single UID a blocked transaction is waiting for
//!
//! `xid` holds `uid` iff `holder[uid] == xid` and `uid ∈ held[xid]`; a
//! waiter holds nothing new while queued.
//!
//! ## Deadlock Detection
//!
//! The wait-for graph follows `waited_on` then `holder` (xid → uid → holding
//! xid). `add` runs a stamped DFS over the graph before letting a new edge
//! stand: revisiting a node carrying the current stamp is a back edge, so
//! the edge that would complete the cycle is rolled back and the caller
//! fails with `Deadlock`. The offending edge is never committed, which keeps
//! the standing graph acyclic at all times.
//!
//! ## Hand-Off
//!
//! On `remove`, each UID the departing transaction held is offered to the
//! first queued waiter that still has a live latch; opening that latch wakes
//! exactly that waiter, which by then is already recorded as the new holder.

use std::collections::VecDeque;
use std::sync::Arc;

use eyre::Result;
use hashbrown::HashMap;
use parking_lot::{Condvar, Mutex};

use crate::error::EngineError;
use crate::{Uid, Xid};

/// One-shot waitable: created closed, opened exactly once by the hand-off.
#[derive(Debug)]
pub struct WaitLatch {
    open: Mutex<bool>,
    cv: Condvar,
}

impl WaitLatch {
    fn new() -> Self {
        Self {
            open: Mutex::new(false),
            cv: Condvar::new(),
        }
    }

    /// Blocks until the latch has been opened.
    pub fn wait(&self) {
        let mut open = self.open.lock();
        while !*open {
            self.cv.wait(&mut open);
        }
    }

    fn release(&self) {
        *self.open.lock() = true;
        self.cv.notify_all();
    }
}

#[derive(Default)]
struct LockState {
    held: HashMap<Xid, Vec<Uid>>,
    holder: HashMap<Uid, Xid>,
    waiters: HashMap<Uid, VecDeque<Xid>>,
    wait_latch: HashMap<Xid, Arc<WaitLatch>>,
    waited_on: HashMap<Xid, Uid>,
}

#[derive(Default)]
pub struct LockTable {
    state: Mutex<LockState>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests `uid` for `xid`.
    ///
    /// - Already held: `Ok(None)`.
    /// - Free: granted immediately, `Ok(None)`.
    /// - Held by another transaction: `xid` is queued and a latch returned
    ///   for the caller to block on - unless the new wait edge would close a
    ///   cycle, in which case the edge is rolled back and `Deadlock` raised.
    pub fn add(&self, xid: Xid, uid: Uid) -> Result<Option<Arc<WaitLatch>>> {
        let mut s = self.state.lock();

        if s.held.get(&xid).is_some_and(|uids| uids.contains(&uid)) {
            return Ok(None);
        }

        if !s.holder.contains_key(&uid) {
            s.holder.insert(uid, xid);
            s.held.entry(xid).or_default().push(uid);
            return Ok(None);
        }

        s.waited_on.insert(xid, uid);
        s.waiters.entry(uid).or_default().push_back(xid);

        if has_deadlock(&s) {
            s.waited_on.remove(&xid);
            if let Some(queue) = s.waiters.get_mut(&uid) {
                queue.retain(|&w| w != xid);
                if queue.is_empty() {
                    s.waiters.remove(&uid);
                }
            }
            tracing::warn!(xid, uid, "lock request would deadlock");
            return Err(EngineError::Deadlock.into());
        }

        let latch = Arc::new(WaitLatch::new());
        s.wait_latch.insert(xid, Arc::clone(&latch));
        Ok(Some(latch))
    }

    /// Releases everything `xid` holds, handing each UID to its first
    /// still-waiting queued transaction, and clears `xid`'s wait state.
    pub fn remove(&self, xid: Xid) {
        let mut s = self.state.lock();

        if let Some(uids) = s.held.remove(&xid) {
            for uid in uids {
                hand_off(&mut s, uid);
            }
        }
        s.waited_on.remove(&xid);
        s.wait_latch.remove(&xid);
    }
}

/// Picks the next holder of `uid` from the FIFO queue and wakes it.
fn hand_off(s: &mut LockState, uid: Uid) {
    s.holder.remove(&uid);
    if let Some(queue) = s.waiters.get_mut(&uid) {
        while let Some(next) = queue.pop_front() {
            if let Some(latch) = s.wait_latch.remove(&next) {
                s.holder.insert(uid, next);
                s.held.entry(next).or_default().push(uid);
                s.waited_on.remove(&next);
                latch.release();
                break;
            }
        }
        if queue.is_empty() {
            s.waiters.remove(&uid);
        }
    }
}

/// Stamped DFS over `waited_on ∘ holder`. A node revisited under the
/// current stamp closes a cycle; a node stamped by an earlier pass is
/// already known cycle-free.
fn has_deadlock(s: &LockState) -> bool {
    let mut stamps: HashMap<Xid, u32> = HashMap::new();
    let mut stamp = 1u32;

    for &root in s.held.keys() {
        if stamps.get(&root).copied().unwrap_or(0) > 0 {
            continue;
        }
        stamp += 1;
        if walk(s, root, stamp, &mut stamps) {
            return true;
        }
    }
    false
}

fn walk(s: &LockState, mut xid: Xid, stamp: u32, stamps: &mut HashMap<Xid, u32>) -> bool {
    loop {
        match stamps.get(&xid) {
            Some(&seen) if seen == stamp => return true,
            Some(&seen) if seen < stamp => return false,
            _ => {}
        }
        stamps.insert(xid, stamp);

        let Some(&uid) = s.waited_on.get(&xid) else {
            return false;
        };
        let Some(&next) = s.holder.get(&uid) else {
            return false;
        };
        xid = next;
    }
}
