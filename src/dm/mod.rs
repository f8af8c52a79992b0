//! # Data Manager
//!
//! Allocates and reads typed records ([`DataItem`]s) inside pages, journals
//! every mutation to the WAL, and owns the open/close lifecycle of the
//! underlying store: on open it validates the page-one marker and runs
//! recovery when the previous shutdown was unclean; on close it stamps the
//! marker and flushes everything.
//!
//! Items are cached by UID through the reference-counted cache; a resident
//! item pins its page, so a page can only be evicted once no item on it is
//! in use.

pub mod data_item;
pub mod recovery;

use std::path::Path;
use std::sync::Arc;

use eyre::{ensure, Result};
use parking_lot::Mutex;
use smallvec::SmallVec;
use tracing::info;

use crate::cache::RefCache;
use crate::config::MAX_DATA_PAGE_FREE;
use crate::encoding::{uid_from_parts, uid_to_parts};
use crate::error::EngineError;
use crate::storage::{data_page, page_one, Page, PageCache, PageIndex, PageSpace, Wal};
use crate::tm::TransactionManager;
use crate::{Uid, Xid};

pub use data_item::{DataItem, ItemHandle, Mutation};

/// Attempts to find a page with room before giving up with `DatabaseBusy`.
const INSERT_RETRIES: usize = 5;

pub struct DataManager {
    tm: Arc<TransactionManager>,
    page_cache: PageCache,
    wal: Wal,
    page_index: PageIndex,
    cache: RefCache<DataItem>,
    page_one: Mutex<Option<Arc<Page>>>,
}

impl DataManager {
    /// Creates a fresh store: data file with the reserved first page, empty
    /// WAL.
    pub fn create(
        prefix: &Path,
        cache_pages: usize,
        tm: Arc<TransactionManager>,
    ) -> Result<Self> {
        let page_cache = PageCache::create(prefix, cache_pages)?;
        let wal = Wal::create(prefix)?;
        let dm = Self::assemble(tm, page_cache, wal);

        let pgno = dm.page_cache.new_page(page_one::init_raw());
        debug_assert_eq!(pgno, 1);
        let first = dm.page_cache.get_page(pgno)?;
        dm.page_cache.flush_page(&first);
        *dm.page_one.lock() = Some(first);

        Ok(dm)
    }

    /// Opens an existing store, recovering first if the validity marker says
    /// the last shutdown was unclean.
    pub fn open(prefix: &Path, cache_pages: usize, tm: Arc<TransactionManager>) -> Result<Self> {
        let page_cache = PageCache::open(prefix, cache_pages)?;
        let wal = Wal::open(prefix)?;
        let dm = Self::assemble(tm, page_cache, wal);

        let first = dm.page_cache.get_page(1)?;
        if !page_one::check(&first) {
            info!("validity marker mismatch, replaying log");
            recovery::recover(&dm.tm, &dm.wal, &dm.page_cache)?;
        }
        dm.fill_page_index()?;
        page_one::set_open(&first);
        dm.page_cache.flush_page(&first);
        *dm.page_one.lock() = Some(first);

        Ok(dm)
    }

    fn assemble(tm: Arc<TransactionManager>, page_cache: PageCache, wal: Wal) -> Self {
        Self {
            tm,
            page_cache,
            wal,
            page_index: PageIndex::new(),
            cache: RefCache::with_capacity(0),
            page_one: Mutex::new(None),
        }
    }

    /// Registers every data page's free space. Page one is never a data
    /// page.
    fn fill_page_index(&self) -> Result<()> {
        for pgno in 2..=self.page_cache.page_count() {
            let page = self.page_cache.get_page(pgno)?;
            self.page_index.add(pgno, data_page::free_space(&page));
            self.page_cache.release(&page);
        }
        Ok(())
    }

    /// Reads the item at `uid`; `None` when the item is a tombstone.
    pub fn read(&self, uid: Uid) -> Result<Option<Arc<DataItem>>> {
        let item = self.cache.acquire(uid, || {
            let (pgno, offset) = uid_to_parts(uid);
            let page = self.page_cache.get_page(pgno)?;
            Ok(DataItem::parse(page, offset))
        })?;
        if !item.is_valid() {
            self.release(&item);
            return Ok(None);
        }
        Ok(Some(item))
    }

    /// Inserts a record under `xid`: picks a page with room (creating pages
    /// on demand), journals the insert, then mutates the page.
    pub fn insert(&self, xid: Xid, data: &[u8]) -> Result<Uid> {
        let raw = DataItem::wrap(data);
        ensure!(raw.len() <= MAX_DATA_PAGE_FREE, EngineError::DataTooLarge);

        // The histogram works in whole buckets, so a page from the top
        // bucket can still be a few bytes short for a near-maximal record;
        // such pages are parked aside and re-registered once a fitting page
        // is found.
        let mut selected: Option<PageSpace> = None;
        let mut skipped: SmallVec<[PageSpace; 4]> = SmallVec::new();
        for _ in 0..INSERT_RETRIES {
            match self.page_index.select(raw.len()) {
                Some(ps) if ps.free < raw.len() => skipped.push(ps),
                Some(ps) => {
                    selected = Some(ps);
                    break;
                }
                None => {
                    let pgno = self.page_cache.new_page(data_page::init_raw());
                    self.page_index.add(pgno, MAX_DATA_PAGE_FREE);
                }
            }
        }
        for ps in skipped {
            self.page_index.add(ps.pgno, ps.free);
        }
        let ps = selected.ok_or(EngineError::DatabaseBusy)?;

        let page = self.page_cache.get_page(ps.pgno)?;

        let log = recovery::insert_log(xid, ps.pgno, data_page::fso(&page), &raw);
        self.wal.log(&log);
        let offset = data_page::insert(&page, &raw);

        let free = data_page::free_space(&page);
        self.page_cache.release(&page);
        self.page_index.add(ps.pgno, free);

        Ok(uid_from_parts(ps.pgno, offset))
    }

    /// Journals an in-place item update. Called by [`DataItem::update`] once
    /// a mutation has been applied; the record is durable before the item's
    /// write lock is released.
    pub fn log_update(&self, xid: Xid, uid: Uid, old_raw: &[u8], new_raw: &[u8]) {
        let log = recovery::update_log(xid, uid, old_raw, new_raw);
        self.wal.log(&log);
    }

    /// Drops one reference to a cached item; eviction releases its page.
    pub fn release(&self, item: &DataItem) {
        if let Some(evicted) = self.cache.release(item.uid()) {
            self.page_cache.release(evicted.page());
        }
    }

    /// Clean shutdown: evict all items, stamp the close marker, flush every
    /// dirty page.
    pub fn close(&self) {
        for item in self.cache.drain() {
            self.page_cache.release(item.page());
        }
        if let Some(first) = self.page_one.lock().take() {
            page_one::set_close(&first);
            self.page_cache.release(&first);
        }
        self.page_cache.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn new_store(dir: &TempDir) -> (std::path::PathBuf, Arc<TransactionManager>) {
        let prefix = dir.path().join("t");
        let tm = Arc::new(TransactionManager::create(&prefix).unwrap());
        (prefix, tm)
    }

    #[test]
    fn insert_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let (prefix, tm) = new_store(&dir);
        let dm = DataManager::create(&prefix, 16, tm).unwrap();

        let xid = dm.tm.begin();
        let uid = dm.insert(xid, b"hello dm").unwrap();
        let item = dm.read(uid).unwrap().unwrap();
        item.read_with(|payload| assert_eq!(payload, b"hello dm"));
        dm.release(&item);
        dm.tm.commit(xid);
        dm.close();
    }

    #[test]
    fn oversized_record_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (prefix, tm) = new_store(&dir);
        let dm = DataManager::create(&prefix, 16, tm).unwrap();
        let err = dm.insert(1, &vec![0u8; MAX_DATA_PAGE_FREE]).unwrap_err();
        assert_eq!(EngineError::of(&err), Some(EngineError::DataTooLarge));
        dm.close();
    }

    #[test]
    fn committed_data_survives_clean_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let (prefix, tm) = new_store(&dir);
        let uid;
        {
            let dm = DataManager::create(&prefix, 16, Arc::clone(&tm)).unwrap();
            let xid = tm.begin();
            uid = dm.insert(xid, b"durable").unwrap();
            tm.commit(xid);
            dm.close();
        }
        let dm = DataManager::open(&prefix, 16, tm).unwrap();
        let item = dm.read(uid).unwrap().unwrap();
        item.read_with(|payload| assert_eq!(payload, b"durable"));
        dm.release(&item);
        dm.close();
    }

    #[test]
    fn committed_update_survives_crash() {
        let dir = tempfile::tempdir().unwrap();
        let (prefix, tm) = new_store(&dir);
        let uid;
        {
            let dm = DataManager::create(&prefix, 16, Arc::clone(&tm)).unwrap();
            let xid = tm.begin();
            uid = dm.insert(xid, b"aaaaaaaa").unwrap();
            let item = dm.read(uid).unwrap().unwrap();
            item.update(xid, &dm, |handle| {
                handle.write(|payload| payload.copy_from_slice(b"bbbbbbbb"));
                Ok(Mutation::Applied(()))
            })
            .unwrap();
            dm.release(&item);
            tm.commit(xid);
            // No clean close: the validity marker stays open, so the next
            // open must replay the log.
        }
        let dm = DataManager::open(&prefix, 16, tm).unwrap();
        let item = dm.read(uid).unwrap().unwrap();
        item.read_with(|payload| assert_eq!(payload, b"bbbbbbbb"));
        dm.release(&item);
        dm.close();
    }

    #[test]
    fn uncommitted_insert_is_tombstoned_by_recovery() {
        let dir = tempfile::tempdir().unwrap();
        let (prefix, tm) = new_store(&dir);
        let uid;
        let xid;
        {
            let dm = DataManager::create(&prefix, 16, Arc::clone(&tm)).unwrap();
            xid = tm.begin();
            uid = dm.insert(xid, b"ghost").unwrap();
            // Crash with the transaction still active.
        }
        let dm = DataManager::open(&prefix, 16, Arc::clone(&tm)).unwrap();
        assert!(dm.read(uid).unwrap().is_none());
        assert!(tm.is_aborted(xid).unwrap());
        dm.close();
    }

    #[test]
    fn declined_update_restores_payload() {
        let dir = tempfile::tempdir().unwrap();
        let (prefix, tm) = new_store(&dir);
        let dm = DataManager::create(&prefix, 16, tm).unwrap();
        let xid = dm.tm.begin();
        let uid = dm.insert(xid, b"keep").unwrap();
        let item = dm.read(uid).unwrap().unwrap();
        item.update(xid, &dm, |handle| {
            handle.write(|payload| payload.copy_from_slice(b"lose"));
            Ok(Mutation::Declined(()))
        })
        .unwrap();
        item.read_with(|payload| assert_eq!(payload, b"keep"));
        dm.release(&item);
        dm.close();
    }
}
