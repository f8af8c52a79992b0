//! MVCC entry: a data item tagged with creator and deleter transactions.
//!
//! Payload layout inside the data item:
//!
//! ```text
//! [xmin:8] [xmax:8] [data:*]
//! ```
//!
//! `xmin` is written once at insert; `xmax` is written once by the deleting
//! transaction (0 while the version is live). Visibility decisions read both
//! under the item's read lock; `set_xmax` goes through the item's update
//! protocol so the change is journaled.

use std::sync::Arc;

use eyre::Result;

use crate::dm::{DataItem, DataManager, Mutation};
use crate::encoding::{read_u64, write_u64};
use crate::{Uid, Xid};

const OF_XMIN: usize = 0;
const OF_XMAX: usize = 8;
const OF_DATA: usize = 16;

pub struct Entry {
    uid: Uid,
    item: Arc<DataItem>,
}

impl Entry {
    pub fn new(uid: Uid, item: Arc<DataItem>) -> Self {
        Self { uid, item }
    }

    /// Wraps user data into entry form for a fresh insert by `xid`.
    pub fn wrap_raw(xid: Xid, data: &[u8]) -> Vec<u8> {
        let mut raw = vec![0u8; OF_DATA + data.len()];
        write_u64(&mut raw[OF_XMIN..], xid);
        raw[OF_DATA..].copy_from_slice(data);
        raw
    }

    pub fn uid(&self) -> Uid {
        self.uid
    }

    pub fn item(&self) -> &Arc<DataItem> {
        &self.item
    }

    pub fn xmin(&self) -> Xid {
        self.item.read_with(|payload| read_u64(&payload[OF_XMIN..]))
    }

    pub fn xmax(&self) -> Xid {
        self.item.read_with(|payload| read_u64(&payload[OF_XMAX..]))
    }

    /// Copy of the user data.
    pub fn data(&self) -> Vec<u8> {
        self.item.read_with(|payload| payload[OF_DATA..].to_vec())
    }

    /// Stamps the deleting transaction, journaling the mutation.
    pub fn set_xmax(&self, xid: Xid, dm: &DataManager) -> Result<()> {
        self.item.update(xid, dm, |handle| {
            handle.write(|payload| write_u64(&mut payload[OF_XMAX..], xid));
            Ok(Mutation::Applied(()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_raw_stamps_creator_and_clears_deleter() {
        let raw = Entry::wrap_raw(42, b"row");
        assert_eq!(read_u64(&raw[OF_XMIN..]), 42);
        assert_eq!(read_u64(&raw[OF_XMAX..]), 0);
        assert_eq!(&raw[OF_DATA..], b"row");
    }
}
