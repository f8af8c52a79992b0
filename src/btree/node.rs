//! B+ tree node: a typed view over one data item's payload.
//!
//! Serialized layout (fixed size, so every node fits in exactly one item):
//!
//! ```text
//! [is_leaf:1] [no_keys:2] [sibling:8]  ([son:8] [key:8]) * (2*BALANCE + 2)
//! ```
//!
//! Keys are signed 64-bit. Interior nodes carry a trailing sentinel key of
//! `i64::MAX` so a descent always finds a strictly greater key; on a split
//! the separator pushed to the parent is the new right node's first key,
//! keeping the parent separator equal to its child's minimum.
//!
//! Leaves chain left-to-right through `sibling`; an interior node's sibling
//! doubles as the safety net when a concurrent split moved keys right
//! between a parent read and the child visit.

use std::sync::Arc;

use eyre::{bail, Result};

use crate::config::{BTREE_BALANCE, BTREE_NODE_SIZE};
use crate::dm::{DataItem, DataManager, Mutation};
use crate::encoding::{read_u16, read_u64, write_u16, write_u64};
use crate::tm::SUPER_XID;
use crate::Uid;

const OF_IS_LEAF: usize = 0;
const OF_NO_KEYS: usize = 1;
const OF_SIBLING: usize = 3;
const HEADER_SIZE: usize = 11;
const SLOT_SIZE: usize = 16;
const MAX_SLOTS: usize = BTREE_BALANCE * 2 + 2;

// ---- raw accessors -------------------------------------------------------

pub fn is_leaf_raw(raw: &[u8]) -> bool {
    raw[OF_IS_LEAF] == 1
}

fn set_is_leaf(raw: &mut [u8], leaf: bool) {
    raw[OF_IS_LEAF] = leaf as u8;
}

pub fn no_keys_raw(raw: &[u8]) -> usize {
    read_u16(&raw[OF_NO_KEYS..]) as usize
}

fn set_no_keys(raw: &mut [u8], n: usize) {
    write_u16(&mut raw[OF_NO_KEYS..], n as u16);
}

pub fn sibling_raw(raw: &[u8]) -> Uid {
    read_u64(&raw[OF_SIBLING..])
}

fn set_sibling(raw: &mut [u8], sibling: Uid) {
    write_u64(&mut raw[OF_SIBLING..], sibling);
}

fn slot(kth: usize) -> usize {
    assert!(kth < MAX_SLOTS, "node slot {kth} out of range");
    HEADER_SIZE + kth * SLOT_SIZE
}

pub fn son_raw(raw: &[u8], kth: usize) -> Uid {
    read_u64(&raw[slot(kth)..])
}

fn set_son(raw: &mut [u8], kth: usize, uid: Uid) {
    write_u64(&mut raw[slot(kth)..], uid);
}

pub fn key_raw(raw: &[u8], kth: usize) -> i64 {
    read_u64(&raw[slot(kth) + 8..]) as i64
}

fn set_key(raw: &mut [u8], kth: usize, key: i64) {
    write_u64(&mut raw[slot(kth) + 8..], key as u64);
}

/// Shifts the slots at `kth..` one position right, opening slot `kth`.
fn shift_slots(raw: &mut [u8], kth: usize) {
    let src = HEADER_SIZE + kth * SLOT_SIZE;
    raw.copy_within(src..BTREE_NODE_SIZE - SLOT_SIZE, src + SLOT_SIZE);
}

/// Image of an empty leaf root.
pub fn nil_root_raw() -> Vec<u8> {
    let mut raw = vec![0u8; BTREE_NODE_SIZE];
    set_is_leaf(&mut raw, true);
    set_no_keys(&mut raw, 0);
    set_sibling(&mut raw, 0);
    raw
}

/// Image of a fresh interior root over two children, with the sentinel max
/// key closing the right child.
pub fn root_raw(left: Uid, right: Uid, key: i64) -> Vec<u8> {
    let mut raw = vec![0u8; BTREE_NODE_SIZE];
    set_is_leaf(&mut raw, false);
    set_no_keys(&mut raw, 2);
    set_sibling(&mut raw, 0);
    set_son(&mut raw, 0, left);
    set_key(&mut raw, 0, key);
    set_son(&mut raw, 1, right);
    set_key(&mut raw, 1, i64::MAX);
    raw
}

// ---- loaded node ---------------------------------------------------------

/// Result of a within-node descent step: either the son to follow or, when
/// every key is smaller, the sibling to retry on.
pub struct SearchNext {
    pub uid: Uid,
    pub sibling: Uid,
}

/// Result of a leaf range scan: collected row UIDs plus the sibling to
/// continue on (0 when the scan is complete).
pub struct LeafRange {
    pub uids: Vec<Uid>,
    pub sibling: Uid,
}

/// Result of `insert_and_split`: `defer_to` asks the caller to retry on the
/// sibling; otherwise `new_son`/`new_key` describe a split to propagate
/// upward (0 when the node absorbed the key without splitting).
pub struct InsertAndSplit {
    pub defer_to: Uid,
    pub new_son: Uid,
    pub new_key: i64,
}

/// A node materialized from the data-item layer. Transient: load, use,
/// release.
pub struct Node {
    uid: Uid,
    item: Arc<DataItem>,
}

impl Node {
    pub fn load(dm: &DataManager, uid: Uid) -> Result<Self> {
        match dm.read(uid)? {
            Some(item) => Ok(Self { uid, item }),
            None => bail!("B+ tree node {uid} is missing"),
        }
    }

    pub fn release(&self, dm: &DataManager) {
        dm.release(&self.item);
    }

    pub fn uid(&self) -> Uid {
        self.uid
    }

    pub fn is_leaf(&self) -> bool {
        self.item.read_with(is_leaf_raw)
    }

    /// Within-node descent: the son owning the first key `> key`, or the
    /// sibling when the key lies beyond this node.
    pub fn search_next(&self, key: i64) -> SearchNext {
        self.item.read_with(|raw| {
            let n = no_keys_raw(raw);
            for kth in 0..n {
                if key < key_raw(raw, kth) {
                    return SearchNext {
                        uid: son_raw(raw, kth),
                        sibling: sibling_raw(raw),
                    };
                }
            }
            SearchNext {
                uid: 0,
                sibling: sibling_raw(raw),
            }
        })
    }

    /// Collects the row UIDs of every key in `[lo, hi]` present in this
    /// leaf. When the scan ran off the end of the node the sibling is
    /// returned so the caller continues there.
    pub fn leaf_search_range(&self, lo: i64, hi: i64) -> LeafRange {
        self.item.read_with(|raw| {
            let n = no_keys_raw(raw);
            let mut kth = 0;
            while kth < n && key_raw(raw, kth) < lo {
                kth += 1;
            }
            let mut uids = Vec::new();
            while kth < n && key_raw(raw, kth) <= hi {
                uids.push(son_raw(raw, kth));
                kth += 1;
            }
            let sibling = if kth == n { sibling_raw(raw) } else { 0 };
            LeafRange { uids, sibling }
        })
    }

    /// Inserts `(uid, key)` into this node, splitting when it fills up.
    ///
    /// The whole step runs under the item's update protocol: the node bytes
    /// mutate atomically, the WAL gets the pre/post images under the super
    /// XID, and a decline (key belongs to the sibling) restores the node
    /// untouched.
    pub fn insert_and_split(&self, dm: &DataManager, uid: Uid, key: i64) -> Result<InsertAndSplit> {
        self.item.update(SUPER_XID, dm, |handle| {
            let inserted = handle.write(|raw| insert_slot(raw, uid, key));
            if !inserted {
                let sibling = handle.read(sibling_raw);
                return Ok(Mutation::Declined(InsertAndSplit {
                    defer_to: sibling,
                    new_son: 0,
                    new_key: 0,
                }));
            }

            if handle.read(no_keys_raw) == BTREE_BALANCE * 2 {
                // Copy-on-split: the right half moves to a fresh node that
                // inherits the sibling link; this node then points at it.
                let new_raw = handle.read(|raw| {
                    let mut new_raw = vec![0u8; BTREE_NODE_SIZE];
                    set_is_leaf(&mut new_raw, is_leaf_raw(raw));
                    set_no_keys(&mut new_raw, BTREE_BALANCE);
                    set_sibling(&mut new_raw, sibling_raw(raw));
                    let src = HEADER_SIZE + BTREE_BALANCE * SLOT_SIZE;
                    new_raw[HEADER_SIZE..HEADER_SIZE + (BTREE_NODE_SIZE - src)]
                        .copy_from_slice(&raw[src..]);
                    new_raw
                });
                let new_key = key_raw(&new_raw, 0);
                let new_son = dm.insert(SUPER_XID, &new_raw)?;
                handle.write(|raw| {
                    set_no_keys(raw, BTREE_BALANCE);
                    set_sibling(raw, new_son);
                });
                return Ok(Mutation::Applied(InsertAndSplit {
                    defer_to: 0,
                    new_son,
                    new_key,
                }));
            }

            Ok(Mutation::Applied(InsertAndSplit {
                defer_to: 0,
                new_son: 0,
                new_key: 0,
            }))
        })
    }
}

/// Sorted insert of `(uid, key)`. Returns false when the key is greater
/// than every key here and a sibling exists - the insert belongs there.
fn insert_slot(raw: &mut [u8], uid: Uid, key: i64) -> bool {
    let n = no_keys_raw(raw);
    let mut kth = 0;
    while kth < n && key_raw(raw, kth) < key {
        kth += 1;
    }

    if kth == n && sibling_raw(raw) != 0 {
        return false;
    }

    if is_leaf_raw(raw) {
        shift_slots(raw, kth);
        set_key(raw, kth, key);
        set_son(raw, kth, uid);
    } else {
        // Interior insert after a child split: the separator that covered
        // the child stays in place under the new key, and the new son lands
        // one slot right under the old separator.
        let old_key = key_raw(raw, kth);
        set_key(raw, kth, key);
        shift_slots(raw, kth + 1);
        set_key(raw, kth + 1, old_key);
        set_son(raw, kth + 1, uid);
    }
    set_no_keys(raw, n + 1);
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nil_root_is_an_empty_leaf() {
        let raw = nil_root_raw();
        assert_eq!(raw.len(), BTREE_NODE_SIZE);
        assert!(is_leaf_raw(&raw));
        assert_eq!(no_keys_raw(&raw), 0);
        assert_eq!(sibling_raw(&raw), 0);
    }

    #[test]
    fn root_raw_carries_sentinel_max_key() {
        let raw = root_raw(11, 22, 5);
        assert!(!is_leaf_raw(&raw));
        assert_eq!(no_keys_raw(&raw), 2);
        assert_eq!(son_raw(&raw, 0), 11);
        assert_eq!(key_raw(&raw, 0), 5);
        assert_eq!(son_raw(&raw, 1), 22);
        assert_eq!(key_raw(&raw, 1), i64::MAX);
    }

    #[test]
    fn leaf_insert_keeps_keys_sorted() {
        let mut raw = nil_root_raw();
        for key in [5i64, 1, 3, 2, 4] {
            assert!(insert_slot(&mut raw, key as u64 * 10, key));
        }
        assert_eq!(no_keys_raw(&raw), 5);
        for (kth, want) in (1..=5).enumerate() {
            assert_eq!(key_raw(&raw, kth), want);
            assert_eq!(son_raw(&raw, kth), want as u64 * 10);
        }
    }

    #[test]
    fn insert_past_end_defers_to_sibling() {
        let mut raw = nil_root_raw();
        set_sibling(&mut raw, 99);
        insert_slot(&mut raw, 10, 1);
        assert!(!insert_slot(&mut raw, 20, 2));
        assert_eq!(no_keys_raw(&raw), 1);
    }

    #[test]
    fn negative_keys_sort_before_positive() {
        let mut raw = nil_root_raw();
        assert!(insert_slot(&mut raw, 1, 7));
        assert!(insert_slot(&mut raw, 2, -7));
        assert_eq!(key_raw(&raw, 0), -7);
        assert_eq!(key_raw(&raw, 1), 7);
    }
}
