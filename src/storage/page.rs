//! In-memory page handle.
//!
//! A `Page` is the cache-resident image of one 8 KiB slot of the data file.
//! The buffer sits behind a `RwLock` so data items on the same page can be
//! read concurrently while a mutator holds the write guard; the dirty flag
//! tells the page cache whether eviction must write the image back.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::config::PAGE_SIZE;

#[derive(Debug)]
pub struct Page {
    pgno: u32,
    dirty: AtomicBool,
    data: RwLock<Box<[u8]>>,
}

impl Page {
    pub fn new(pgno: u32, data: Box<[u8]>) -> Self {
        debug_assert_eq!(data.len(), PAGE_SIZE);
        Self {
            pgno,
            dirty: AtomicBool::new(false),
            data: RwLock::new(data),
        }
    }

    pub fn pgno(&self) -> u32 {
        self.pgno
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    pub fn clear_dirty(&self) {
        self.dirty.store(false, Ordering::Release);
    }

    pub fn data(&self) -> RwLockReadGuard<'_, Box<[u8]>> {
        self.data.read()
    }

    pub fn data_mut(&self) -> RwLockWriteGuard<'_, Box<[u8]>> {
        self.data.write()
    }
}

/// A zeroed page image.
pub fn blank_page() -> Box<[u8]> {
    vec![0u8; PAGE_SIZE].into_boxed_slice()
}
