//! Data items: the smallest unit of storage handed to upper layers.
//!
//! On-page layout:
//!
//! ```text
//! [valid:1] [size:2] [data:size]
//! ```
//!
//! `valid` is 0 for a live item and 1 for a tombstone (an insert undone by
//! recovery). The UID is `(pgno << 32) | offset` of the wrapped record.
//!
//! ## Update Protocol
//!
//! A mutator edits an item through [`DataItem::update`], which implements
//! the before/after discipline: take the item's write lock, mark the page
//! dirty, snapshot the wrapped bytes, run the mutation on the payload, and
//! then either journal the update to the WAL (mutation applied) or restore
//! the snapshot (mutation declined or failed). Readers hold the item's read
//! lock for the duration of their view, so an update is atomic against
//! concurrent readers.

use std::sync::Arc;

use eyre::Result;
use parking_lot::RwLock;

use crate::encoding::{read_u16, uid_from_parts, write_u16};
use crate::storage::Page;
use crate::{Uid, Xid};

use super::DataManager;

pub const OF_VALID: usize = 0;
pub const OF_SIZE: usize = 1;
pub const OF_DATA: usize = 3;

/// Outcome of an update closure: whether the payload mutation should be
/// journaled or rolled back.
pub enum Mutation<R> {
    /// The payload was changed; log it and keep it.
    Applied(R),
    /// Nothing (observable) was changed; restore the snapshot, skip the log.
    Declined(R),
}

pub struct DataItem {
    uid: Uid,
    offset: u16,
    len: usize,
    page: Arc<Page>,
    lock: RwLock<()>,
}

impl DataItem {
    /// Wraps a payload into the on-page record format.
    pub fn wrap(data: &[u8]) -> Vec<u8> {
        let mut raw = vec![0u8; OF_DATA + data.len()];
        write_u16(&mut raw[OF_SIZE..], data.len() as u16);
        raw[OF_DATA..].copy_from_slice(data);
        raw
    }

    /// Marks a wrapped record as a tombstone (recovery-undo of an insert).
    pub fn set_raw_invalid(raw: &mut [u8]) {
        raw[OF_VALID] = 1;
    }

    /// Materializes the item residing at `offset` of `page`, reading its
    /// size from the page image.
    pub fn parse(page: Arc<Page>, offset: u16) -> Self {
        let size = read_u16(&page.data()[offset as usize + OF_SIZE..]) as usize;
        Self {
            uid: uid_from_parts(page.pgno(), offset),
            offset,
            len: OF_DATA + size,
            page,
            lock: RwLock::new(()),
        }
    }

    pub fn uid(&self) -> Uid {
        self.uid
    }

    pub fn page(&self) -> &Arc<Page> {
        &self.page
    }

    /// False once the item has been tombstoned.
    pub fn is_valid(&self) -> bool {
        self.page.data()[self.offset as usize + OF_VALID] == 0
    }

    /// Runs `f` over the payload under the item's read lock.
    pub fn read_with<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        let _guard = self.lock.read();
        let data = self.page.data();
        let start = self.offset as usize;
        f(&data[start + OF_DATA..start + self.len])
    }

    /// Mutates the payload under the before/after protocol. The closure
    /// works through an [`ItemHandle`] whose accessors take the page guard
    /// transiently, so nested data-manager calls (for instance allocating a
    /// new item mid-mutation) stay legal while the item's own write lock is
    /// held throughout. On `Mutation::Applied` the update is journaled under
    /// `xid`; on `Mutation::Declined` or error the snapshot is restored and
    /// nothing is logged.
    pub fn update<R>(
        &self,
        xid: Xid,
        dm: &DataManager,
        f: impl FnOnce(&ItemHandle<'_>) -> Result<Mutation<R>>,
    ) -> Result<R> {
        let _guard = self.lock.write();
        self.page.mark_dirty();
        let start = self.offset as usize;

        let old_raw = self.page.data()[start..start + self.len].to_vec();

        let outcome = f(&ItemHandle { item: self });

        match outcome {
            Ok(Mutation::Applied(r)) => {
                let new_raw = self.page.data()[start..start + self.len].to_vec();
                dm.log_update(xid, self.uid, &old_raw, &new_raw);
                Ok(r)
            }
            Ok(Mutation::Declined(r)) => {
                self.page.data_mut()[start..start + self.len].copy_from_slice(&old_raw);
                Ok(r)
            }
            Err(e) => {
                self.page.data_mut()[start..start + self.len].copy_from_slice(&old_raw);
                Err(e)
            }
        }
    }
}

/// Payload accessor handed to [`DataItem::update`] closures. Each call takes
/// the page guard only for its own duration; the item write lock held by the
/// enclosing `update` is what makes the whole mutation atomic.
pub struct ItemHandle<'a> {
    item: &'a DataItem,
}

impl ItemHandle<'_> {
    pub fn read<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        let data = self.item.page.data();
        let start = self.item.offset as usize;
        f(&data[start + OF_DATA..start + self.item.len])
    }

    pub fn write<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let mut data = self.item.page.data_mut();
        let start = self.item.offset as usize;
        f(&mut data[start + OF_DATA..start + self.item.len])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::page::blank_page;

    #[test]
    fn wrap_round_trips_through_parse() {
        let raw = DataItem::wrap(b"payload");
        assert_eq!(raw[OF_VALID], 0);
        assert_eq!(read_u16(&raw[OF_SIZE..]), 7);

        let page = Arc::new(Page::new(4, blank_page()));
        let start = 2usize;
        page.data_mut()[start..start + raw.len()].copy_from_slice(&raw);

        let item = DataItem::parse(Arc::clone(&page), start as u16);
        assert_eq!(item.uid(), (4u64 << 32) | 2);
        assert!(item.is_valid());
        item.read_with(|payload| assert_eq!(payload, b"payload"));
    }

    #[test]
    fn tombstoned_item_reports_invalid() {
        let mut raw = DataItem::wrap(b"x");
        DataItem::set_raw_invalid(&mut raw);
        let page = Arc::new(Page::new(4, blank_page()));
        page.data_mut()[2..2 + raw.len()].copy_from_slice(&raw);
        let item = DataItem::parse(page, 2);
        assert!(!item.is_valid());
    }
}
