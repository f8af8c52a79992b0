//! Version visibility rules.
//!
//! Let `xid` be the reading transaction, `xmin` the entry's creator and
//! `xmax` its deleter (0 while live).
//!
//! **Read committed**:
//!
//! ```text
//! xmin == xid && xmax == 0
//! || committed(xmin) && ( xmax == 0
//!                      || (xmax != xid && !committed(xmax)) )
//! ```
//!
//! **Repeatable read** (S = snapshot at begin):
//!
//! ```text
//! xmin == xid && xmax == 0
//! || committed(xmin) && xmin < xid && xmin not in S
//!    && ( xmax == 0
//!       || (xmax != xid && (!committed(xmax) || xmax > xid || xmax in S)) )
//! ```
//!
//! **Version skip** (repeatable read only): a committed deleter newer than
//! the reader's snapshot. Writing over it would silently lose that committed
//! delete, so the writer must abort instead.

use eyre::Result;

use crate::tm::TransactionManager;

use super::entry::Entry;
use super::transaction::{IsolationLevel, Transaction};

pub fn is_visible(tm: &TransactionManager, txn: &Transaction, entry: &Entry) -> Result<bool> {
    match txn.level {
        IsolationLevel::ReadCommitted => read_committed(tm, txn, entry),
        IsolationLevel::RepeatableRead => repeatable_read(tm, txn, entry),
    }
}

/// True when overwriting `entry` under repeatable read would lose a
/// committed delete this transaction cannot see.
pub fn is_version_skip(tm: &TransactionManager, txn: &Transaction, entry: &Entry) -> Result<bool> {
    if txn.level == IsolationLevel::ReadCommitted {
        return Ok(false);
    }
    let xmax = entry.xmax();
    Ok(tm.is_committed(xmax)? && (xmax > txn.xid || txn.in_snapshot(xmax)))
}

fn read_committed(tm: &TransactionManager, txn: &Transaction, entry: &Entry) -> Result<bool> {
    let xid = txn.xid;
    let xmin = entry.xmin();
    let xmax = entry.xmax();

    if xmin == xid && xmax == 0 {
        return Ok(true);
    }
    if tm.is_committed(xmin)? {
        if xmax == 0 {
            return Ok(true);
        }
        if xmax != xid && !tm.is_committed(xmax)? {
            return Ok(true);
        }
    }
    Ok(false)
}

fn repeatable_read(tm: &TransactionManager, txn: &Transaction, entry: &Entry) -> Result<bool> {
    let xid = txn.xid;
    let xmin = entry.xmin();
    let xmax = entry.xmax();

    if xmin == xid && xmax == 0 {
        return Ok(true);
    }
    if tm.is_committed(xmin)? && xmin < xid && !txn.in_snapshot(xmin) {
        if xmax == 0 {
            return Ok(true);
        }
        if xmax != xid && (!tm.is_committed(xmax)? || xmax > xid || txn.in_snapshot(xmax)) {
            return Ok(true);
        }
    }
    Ok(false)
}
