//! # Version Manager (MVCC)
//!
//! Multi-version concurrency control layered on the data manager. Every row
//! version is an [`Entry`] (`[xmin][xmax][data]`); a delete stamps `xmax`
//! rather than removing bytes, and an update is a delete plus a fresh
//! insert. Two isolation levels are supported, with visibility decided per
//! read by the rules in [`visibility`].
//!
//! Concurrent writers of one UID are serialized through the [`LockTable`]:
//! the loser either parks on a hand-off latch or, when its wait edge would
//! close a cycle, is auto-aborted with `ConcurrentUpdate`. Repeatable-read
//! writers additionally abort on version skip (overwriting a committed
//! delete they cannot see).
//!
//! Entries are memoized per UID in the reference-counted cache; a resident
//! entry pins its data item, which pins its page.

pub mod entry;
pub mod lock_table;
pub mod transaction;
pub mod visibility;

use std::sync::Arc;

use eyre::Result;
use hashbrown::HashMap;
use parking_lot::Mutex;
use tracing::warn;

use crate::cache::RefCache;
use crate::dm::DataManager;
use crate::error::EngineError;
use crate::tm::{TransactionManager, SUPER_XID};
use crate::{Uid, Xid};

pub use entry::Entry;
pub use lock_table::LockTable;
pub use transaction::{IsolationLevel, Transaction};

pub struct VersionManager {
    tm: Arc<TransactionManager>,
    dm: Arc<DataManager>,
    active: Mutex<HashMap<Xid, Arc<Transaction>>>,
    lock_table: LockTable,
    cache: RefCache<Entry>,
}

impl VersionManager {
    pub fn new(tm: Arc<TransactionManager>, dm: Arc<DataManager>) -> Self {
        let mut active = HashMap::new();
        active.insert(
            SUPER_XID,
            Arc::new(Transaction::new(
                SUPER_XID,
                IsolationLevel::ReadCommitted,
                &HashMap::<Xid, ()>::new(),
            )),
        );
        Self {
            tm,
            dm,
            active: Mutex::new(active),
            lock_table: LockTable::new(),
            cache: RefCache::with_capacity(0),
        }
    }

    /// Starts a transaction at the given level. A repeatable-read snapshot
    /// freezes the set of XIDs active right now.
    pub fn begin(&self, level: IsolationLevel) -> Xid {
        let mut active = self.active.lock();
        let xid = self.tm.begin();
        let txn = Arc::new(Transaction::new(xid, level, &*active));
        active.insert(xid, txn);
        xid
    }

    /// Reads the entry at `uid` as seen by `xid`; `None` when no visible
    /// version exists.
    pub fn read(&self, xid: Xid, uid: Uid) -> Result<Option<Vec<u8>>> {
        let txn = self.transaction(xid)?;
        if let Some(err) = txn.err() {
            return Err(err.into());
        }

        let entry = match self.entry(uid) {
            Ok(entry) => entry,
            Err(e) if EngineError::of(&e) == Some(EngineError::NullEntry) => return Ok(None),
            Err(e) => return Err(e),
        };

        let result = visibility::is_visible(&self.tm, &txn, &entry)
            .map(|visible| visible.then(|| entry.data()));
        self.release_entry(&entry);
        result
    }

    /// Inserts a fresh version created by `xid`.
    pub fn insert(&self, xid: Xid, data: &[u8]) -> Result<Uid> {
        let txn = self.transaction(xid)?;
        if let Some(err) = txn.err() {
            return Err(err.into());
        }
        self.dm.insert(xid, &Entry::wrap_raw(xid, data))
    }

    /// Deletes the version at `uid` on behalf of `xid`.
    ///
    /// Returns false when the version is not visible or already deleted by
    /// this transaction. Deadlock and version skip auto-abort the
    /// transaction and surface as `ConcurrentUpdate`.
    pub fn delete(&self, xid: Xid, uid: Uid) -> Result<bool> {
        let txn = self.transaction(xid)?;
        if let Some(err) = txn.err() {
            return Err(err.into());
        }

        let entry = match self.entry(uid) {
            Ok(entry) => entry,
            Err(e) if EngineError::of(&e) == Some(EngineError::NullEntry) => return Ok(false),
            Err(e) => return Err(e),
        };

        let result = self.delete_entry(&txn, &entry);
        self.release_entry(&entry);
        result
    }

    fn delete_entry(&self, txn: &Transaction, entry: &Entry) -> Result<bool> {
        let xid = txn.xid;
        if !visibility::is_visible(&self.tm, txn, entry)? {
            return Ok(false);
        }

        match self.lock_table.add(xid, entry.uid()) {
            Ok(None) => {}
            Ok(Some(latch)) => latch.wait(),
            Err(e) if EngineError::of(&e) == Some(EngineError::Deadlock) => {
                return Err(self.auto_abort(txn));
            }
            Err(e) => return Err(e),
        }

        if entry.xmax() == xid {
            return Ok(false);
        }

        if visibility::is_version_skip(&self.tm, txn, entry)? {
            return Err(self.auto_abort(txn));
        }

        entry.set_xmax(xid, &self.dm)?;
        Ok(true)
    }

    /// Aborts `txn` in place after a concurrency conflict and returns the
    /// error the caller must propagate.
    fn auto_abort(&self, txn: &Transaction) -> eyre::Report {
        warn!(xid = txn.xid, "auto-aborting after concurrency conflict");
        txn.set_err(EngineError::ConcurrentUpdate);
        self.intern_abort(txn.xid, true);
        txn.set_auto_aborted();
        EngineError::ConcurrentUpdate.into()
    }

    /// Commits `xid`. Fails (leaving the transaction aborted) when a
    /// concurrency conflict already poisoned it.
    pub fn commit(&self, xid: Xid) -> Result<()> {
        let txn = self.transaction(xid)?;
        if let Some(err) = txn.err() {
            return Err(err.into());
        }
        self.active.lock().remove(&xid);
        self.lock_table.remove(xid);
        self.tm.commit(xid);
        Ok(())
    }

    /// Rolls back `xid`. A no-op on transactions already auto-aborted.
    pub fn abort(&self, xid: Xid) {
        self.intern_abort(xid, false);
    }

    fn intern_abort(&self, xid: Xid, auto: bool) {
        let txn = {
            let mut active = self.active.lock();
            let txn = active.get(&xid).cloned();
            if !auto {
                active.remove(&xid);
            }
            txn
        };
        let Some(txn) = txn else { return };
        if txn.is_auto_aborted() {
            return;
        }
        self.lock_table.remove(xid);
        self.tm.abort(xid);
    }

    fn transaction(&self, xid: Xid) -> Result<Arc<Transaction>> {
        self.active
            .lock()
            .get(&xid)
            .cloned()
            .ok_or_else(|| EngineError::NoTransaction.into())
    }

    fn entry(&self, uid: Uid) -> Result<Arc<Entry>> {
        self.cache.acquire(uid, || match self.dm.read(uid)? {
            Some(item) => Ok(Entry::new(uid, item)),
            None => Err(EngineError::NullEntry.into()),
        })
    }

    fn release_entry(&self, entry: &Entry) {
        if let Some(evicted) = self.cache.release(entry.uid()) {
            self.dm.release(evicted.item());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tm::TransactionManager;
    use tempfile::TempDir;

    fn new_vm(dir: &TempDir) -> VersionManager {
        let prefix = dir.path().join("t");
        let tm = Arc::new(TransactionManager::create(&prefix).unwrap());
        let dm = Arc::new(DataManager::create(&prefix, 16, Arc::clone(&tm)).unwrap());
        VersionManager::new(tm, dm)
    }

    #[test]
    fn transaction_reads_its_own_writes() {
        let dir = tempfile::tempdir().unwrap();
        let vm = new_vm(&dir);
        let xid = vm.begin(IsolationLevel::ReadCommitted);
        let uid = vm.insert(xid, b"mine").unwrap();
        assert_eq!(vm.read(xid, uid).unwrap().unwrap(), b"mine");
        vm.commit(xid).unwrap();
    }

    #[test]
    fn uncommitted_write_is_invisible_to_others() {
        let dir = tempfile::tempdir().unwrap();
        let vm = new_vm(&dir);
        let writer = vm.begin(IsolationLevel::ReadCommitted);
        let uid = vm.insert(writer, b"secret").unwrap();

        let reader = vm.begin(IsolationLevel::ReadCommitted);
        assert!(vm.read(reader, uid).unwrap().is_none());

        vm.commit(writer).unwrap();
        assert_eq!(vm.read(reader, uid).unwrap().unwrap(), b"secret");
        vm.commit(reader).unwrap();
    }

    #[test]
    fn repeatable_read_ignores_later_commits() {
        let dir = tempfile::tempdir().unwrap();
        let vm = new_vm(&dir);
        let setup = vm.begin(IsolationLevel::ReadCommitted);
        let uid = vm.insert(setup, b"v1").unwrap();
        vm.commit(setup).unwrap();

        let rr = vm.begin(IsolationLevel::RepeatableRead);
        assert_eq!(vm.read(rr, uid).unwrap().unwrap(), b"v1");

        let writer = vm.begin(IsolationLevel::ReadCommitted);
        assert!(vm.delete(writer, uid).unwrap());
        let uid2 = vm.insert(writer, b"v2").unwrap();
        vm.commit(writer).unwrap();

        // Old version still visible, replacement not.
        assert_eq!(vm.read(rr, uid).unwrap().unwrap(), b"v1");
        assert!(vm.read(rr, uid2).unwrap().is_none());
        vm.commit(rr).unwrap();

        let after = vm.begin(IsolationLevel::ReadCommitted);
        assert!(vm.read(after, uid).unwrap().is_none());
        assert_eq!(vm.read(after, uid2).unwrap().unwrap(), b"v2");
        vm.commit(after).unwrap();
    }

    #[test]
    fn delete_is_idempotent_within_a_transaction() {
        let dir = tempfile::tempdir().unwrap();
        let vm = new_vm(&dir);
        let setup = vm.begin(IsolationLevel::ReadCommitted);
        let uid = vm.insert(setup, b"x").unwrap();
        vm.commit(setup).unwrap();

        let xid = vm.begin(IsolationLevel::ReadCommitted);
        assert!(vm.delete(xid, uid).unwrap());
        assert!(!vm.delete(xid, uid).unwrap());
        vm.commit(xid).unwrap();
    }

    #[test]
    fn aborted_delete_leaves_version_visible() {
        let dir = tempfile::tempdir().unwrap();
        let vm = new_vm(&dir);
        let setup = vm.begin(IsolationLevel::ReadCommitted);
        let uid = vm.insert(setup, b"kept").unwrap();
        vm.commit(setup).unwrap();

        let xid = vm.begin(IsolationLevel::ReadCommitted);
        assert!(vm.delete(xid, uid).unwrap());
        vm.abort(xid);

        let reader = vm.begin(IsolationLevel::ReadCommitted);
        assert_eq!(vm.read(reader, uid).unwrap().unwrap(), b"kept");
        vm.commit(reader).unwrap();
    }

    #[test]
    fn version_skip_auto_aborts_repeatable_reader() {
        let dir = tempfile::tempdir().unwrap();
        let vm = new_vm(&dir);
        let setup = vm.begin(IsolationLevel::ReadCommitted);
        let uid = vm.insert(setup, b"row").unwrap();
        vm.commit(setup).unwrap();

        let rr = vm.begin(IsolationLevel::RepeatableRead);
        assert_eq!(vm.read(rr, uid).unwrap().unwrap(), b"row");

        let rc = vm.begin(IsolationLevel::ReadCommitted);
        assert!(vm.delete(rc, uid).unwrap());
        vm.insert(rc, b"row2").unwrap();
        vm.commit(rc).unwrap();

        let err = vm.delete(rr, uid).unwrap_err();
        assert_eq!(EngineError::of(&err), Some(EngineError::ConcurrentUpdate));

        // The transaction is poisoned: commit surfaces the conflict, a
        // second abort is a no-op.
        let err = vm.commit(rr).unwrap_err();
        assert_eq!(EngineError::of(&err), Some(EngineError::ConcurrentUpdate));
        vm.abort(rr);
    }
}
