//! File-backed page cache.
//!
//! Pages are fetched through the generic reference-counted cache; at most
//! one thread reads a given page from disk at a time, and a page whose
//! reference count drops to zero is written back iff dirty. New pages are
//! flushed immediately at allocation so the file length always covers every
//! allocated page number.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use eyre::{ensure, Result, WrapErr};
use parking_lot::Mutex;
use tracing::debug;

use crate::cache::RefCache;
use crate::config::{MIN_CACHE_PAGES, PAGE_SIZE};
use crate::error::{fatal, EngineError};
use crate::storage::page::Page;

pub const DB_SUFFIX: &str = ".db";

#[derive(Debug)]
pub struct PageCache {
    file: Mutex<File>,
    cache: RefCache<Page>,
    page_count: AtomicU32,
}

impl PageCache {
    /// Creates the `.db` file. `capacity` is the cache bound in pages.
    pub fn create(prefix: &Path, capacity: usize) -> Result<Self> {
        ensure!(capacity >= MIN_CACHE_PAGES, EngineError::MemTooSmall);
        let path = db_path(prefix);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
            .wrap_err_with(|| format!("failed to create data file at {:?}", path))?;
        Ok(Self::from_file(file, capacity, 0))
    }

    /// Opens an existing `.db` file.
    pub fn open(prefix: &Path, capacity: usize) -> Result<Self> {
        ensure!(capacity >= MIN_CACHE_PAGES, EngineError::MemTooSmall);
        let path = db_path(prefix);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .wrap_err_with(|| format!("failed to open data file at {:?}", path))?;
        let len = file.metadata().wrap_err("failed to stat data file")?.len();
        Ok(Self::from_file(file, capacity, (len / PAGE_SIZE as u64) as u32))
    }

    fn from_file(file: File, capacity: usize, pages: u32) -> Self {
        Self {
            file: Mutex::new(file),
            cache: RefCache::with_capacity(capacity),
            page_count: AtomicU32::new(pages),
        }
    }

    /// Appends a new page holding `init` and flushes it immediately.
    /// Returns its page number.
    pub fn new_page(&self, init: Box<[u8]>) -> u32 {
        let pgno = self.page_count.fetch_add(1, Ordering::SeqCst) + 1;
        let page = Page::new(pgno, init);
        self.flush_page(&page);
        debug!(pgno, "allocated page");
        pgno
    }

    /// Fetches a page through the cache, bumping its reference count.
    pub fn get_page(&self, pgno: u32) -> Result<Arc<Page>> {
        self.cache.acquire(pgno as u64, || {
            let mut buf = vec![0u8; PAGE_SIZE];
            let mut file = self.file.lock();
            file.seek(SeekFrom::Start(page_offset(pgno)))
                .wrap_err_with(|| format!("failed to seek page {pgno}"))?;
            file.read_exact(&mut buf)
                .wrap_err_with(|| format!("failed to read page {pgno}"))?;
            Ok(Page::new(pgno, buf.into_boxed_slice()))
        })
    }

    /// Drops one reference; write-back happens iff this was the last one and
    /// the page is dirty.
    pub fn release(&self, page: &Page) {
        if let Some(evicted) = self.cache.release(page.pgno() as u64) {
            if evicted.is_dirty() {
                self.flush_page(&evicted);
                evicted.clear_dirty();
            }
        }
    }

    /// Writes the page image to disk and fsyncs. An IO failure here leaves
    /// disk and memory out of step, which the engine cannot survive.
    pub fn flush_page(&self, page: &Page) {
        let data = page.data();
        let mut file = self.file.lock();
        let res = file
            .seek(SeekFrom::Start(page_offset(page.pgno())))
            .and_then(|_| file.write_all(&data))
            .and_then(|_| file.sync_data());
        if let Err(e) = res {
            fatal(format!("page {} write-back failed: {e}", page.pgno()));
        }
    }

    /// Shrinks the file to exactly `pages` pages and resets the counter.
    /// Only recovery calls this, before any page is cached.
    pub fn truncate_by_pgno(&self, pages: u32) {
        let file = self.file.lock();
        if let Err(e) = file.set_len(pages as u64 * PAGE_SIZE as u64) {
            fatal(format!("data file truncation failed: {e}"));
        }
        self.page_count.store(pages, Ordering::SeqCst);
    }

    pub fn page_count(&self) -> u32 {
        self.page_count.load(Ordering::SeqCst)
    }

    /// Flushes every resident dirty page and empties the cache.
    pub fn close(&self) {
        for page in self.cache.drain() {
            if page.is_dirty() {
                self.flush_page(&page);
                page.clear_dirty();
            }
        }
    }
}

fn db_path(prefix: &Path) -> PathBuf {
    let mut os = prefix.as_os_str().to_owned();
    os.push(DB_SUFFIX);
    os.into()
}

fn page_offset(pgno: u32) -> u64 {
    (pgno as u64 - 1) * PAGE_SIZE as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::data_page;
    use crate::storage::page::blank_page;

    #[test]
    fn new_pages_number_from_one() {
        let dir = tempfile::tempdir().unwrap();
        let pc = PageCache::create(&dir.path().join("t"), MIN_CACHE_PAGES).unwrap();
        assert_eq!(pc.new_page(blank_page()), 1);
        assert_eq!(pc.new_page(blank_page()), 2);
        assert_eq!(pc.page_count(), 2);
    }

    #[test]
    fn dirty_pages_survive_release_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("t");
        {
            let pc = PageCache::create(&prefix, MIN_CACHE_PAGES).unwrap();
            let pgno = pc.new_page(data_page::init_raw());
            let page = pc.get_page(pgno).unwrap();
            data_page::insert(&page, b"persist me");
            pc.release(&page);
            pc.close();
        }
        let pc = PageCache::open(&prefix, MIN_CACHE_PAGES).unwrap();
        assert_eq!(pc.page_count(), 1);
        let page = pc.get_page(1).unwrap();
        assert_eq!(&page.data()[2..12], b"persist me");
        pc.release(&page);
    }

    #[test]
    fn release_without_flush_loses_uncommitted_image() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("t");
        {
            let pc = PageCache::create(&prefix, MIN_CACHE_PAGES).unwrap();
            let pgno = pc.new_page(data_page::init_raw());
            let page = pc.get_page(pgno).unwrap();
            data_page::insert(&page, b"zzz");
            // Dropped without release/close: simulates a crash.
            let _ = page;
        }
        let pc = PageCache::open(&prefix, MIN_CACHE_PAGES).unwrap();
        let page = pc.get_page(1).unwrap();
        assert_eq!(data_page::fso(&page), 2);
        pc.release(&page);
    }

    #[test]
    fn truncate_resets_counter_and_length() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("t");
        let pc = PageCache::create(&prefix, MIN_CACHE_PAGES).unwrap();
        for _ in 0..4 {
            pc.new_page(blank_page());
        }
        pc.truncate_by_pgno(2);
        assert_eq!(pc.page_count(), 2);
        drop(pc);
        let len = std::fs::metadata(db_path(&prefix)).unwrap().len();
        assert_eq!(len, 2 * PAGE_SIZE as u64);
    }

    #[test]
    fn undersized_cache_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = PageCache::create(&dir.path().join("t"), 2).unwrap_err();
        assert_eq!(EngineError::of(&err), Some(EngineError::MemTooSmall));
    }
}
