//! # B+ Tree Index
//!
//! On-disk B+ tree of signed 64-bit key to row UID, with every node stored
//! in exactly one data item. Supports point and range search plus
//! copy-on-split insert; deletion is not supported (the engine tombstones
//! rows instead, leaving index entries to dangle harmlessly).
//!
//! The root pointer lives in its own small data item (the *boot* item) so a
//! root split can swing the tree atomically: build the new root, then
//! rewrite the boot item under the boot latch through the journaled item
//! update protocol.
//!
//! All structural mutations run under the super XID: index shape is not
//! versioned, so it never interacts with MVCC visibility. Per-node atomicity
//! and durability come from the data-item layer.

pub mod node;

use std::sync::Arc;

use eyre::{eyre, Result};
use parking_lot::Mutex;

use crate::dm::{DataItem, DataManager, Mutation};
use crate::encoding::{read_u64, write_u64};
use crate::tm::SUPER_XID;
use crate::Uid;

use node::Node;

#[derive(Default)]
struct InsertResult {
    new_node: Uid,
    new_key: i64,
}

pub struct BPlusTree {
    dm: Arc<DataManager>,
    boot_uid: Uid,
    boot_item: Arc<DataItem>,
    boot_latch: Mutex<()>,
}

impl BPlusTree {
    /// Allocates an empty tree (a bare leaf root) and returns the UID of its
    /// boot item.
    pub fn create(dm: &DataManager) -> Result<Uid> {
        let root_uid = dm.insert(SUPER_XID, &node::nil_root_raw())?;
        let mut boot_raw = [0u8; 8];
        write_u64(&mut boot_raw, root_uid);
        dm.insert(SUPER_XID, &boot_raw)
    }

    /// Loads a tree from its boot item.
    pub fn load(dm: Arc<DataManager>, boot_uid: Uid) -> Result<Self> {
        let boot_item = dm
            .read(boot_uid)?
            .ok_or_else(|| eyre!("index boot item {boot_uid} is missing"))?;
        Ok(Self {
            dm,
            boot_uid,
            boot_item,
            boot_latch: Mutex::new(()),
        })
    }

    pub fn boot_uid(&self) -> Uid {
        self.boot_uid
    }

    fn root_uid(&self) -> Uid {
        let _guard = self.boot_latch.lock();
        self.boot_item.read_with(read_u64)
    }

    /// Swings the root pointer to a fresh interior node over the split
    /// halves.
    fn update_root(&self, left: Uid, right: Uid, right_key: i64) -> Result<()> {
        let _guard = self.boot_latch.lock();
        let new_root = self
            .dm
            .insert(SUPER_XID, &node::root_raw(left, right, right_key))?;
        self.boot_item.update(SUPER_XID, &self.dm, |handle| {
            handle.write(|payload| write_u64(payload, new_root));
            Ok(Mutation::Applied(()))
        })
    }

    /// All row UIDs whose key equals `key`.
    pub fn search(&self, key: i64) -> Result<Vec<Uid>> {
        self.search_range(key, key)
    }

    /// All row UIDs with keys in `[lo, hi]`, in ascending key order.
    pub fn search_range(&self, lo: i64, hi: i64) -> Result<Vec<Uid>> {
        let mut leaf_uid = self.search_leaf(self.root_uid(), lo)?;
        let mut uids = Vec::new();
        loop {
            let leaf = Node::load(&self.dm, leaf_uid)?;
            let range = leaf.leaf_search_range(lo, hi);
            leaf.release(&self.dm);
            uids.extend(range.uids);
            if range.sibling == 0 {
                return Ok(uids);
            }
            leaf_uid = range.sibling;
        }
    }

    /// Inserts `(key, uid)`, splitting up the path as needed and growing a
    /// new root when the old one split.
    pub fn insert(&self, key: i64, uid: Uid) -> Result<()> {
        let root = self.root_uid();
        let result = self.insert_node(root, uid, key)?;
        if result.new_node != 0 {
            self.update_root(root, result.new_node, result.new_key)?;
        }
        Ok(())
    }

    fn search_leaf(&self, mut node_uid: Uid, key: i64) -> Result<Uid> {
        loop {
            let node = Node::load(&self.dm, node_uid)?;
            let leaf = node.is_leaf();
            node.release(&self.dm);
            if leaf {
                return Ok(node_uid);
            }
            node_uid = self.search_next(node_uid, key)?;
        }
    }

    /// One descent step, walking right siblings until a node claims the
    /// key.
    fn search_next(&self, mut node_uid: Uid, key: i64) -> Result<Uid> {
        loop {
            let node = Node::load(&self.dm, node_uid)?;
            let next = node.search_next(key);
            node.release(&self.dm);
            if next.uid != 0 {
                return Ok(next.uid);
            }
            node_uid = next.sibling;
        }
    }

    fn insert_node(&self, node_uid: Uid, uid: Uid, key: i64) -> Result<InsertResult> {
        let node = Node::load(&self.dm, node_uid)?;
        let leaf = node.is_leaf();
        node.release(&self.dm);

        if leaf {
            self.insert_and_split(node_uid, uid, key)
        } else {
            let next = self.search_next(node_uid, key)?;
            let child = self.insert_node(next, uid, key)?;
            if child.new_node != 0 {
                self.insert_and_split(node_uid, child.new_node, child.new_key)
            } else {
                Ok(InsertResult::default())
            }
        }
    }

    fn insert_and_split(&self, mut node_uid: Uid, uid: Uid, key: i64) -> Result<InsertResult> {
        loop {
            let node = Node::load(&self.dm, node_uid)?;
            let outcome = node.insert_and_split(&self.dm, uid, key);
            node.release(&self.dm);
            let outcome = outcome?;
            if outcome.defer_to != 0 {
                node_uid = outcome.defer_to;
                continue;
            }
            return Ok(InsertResult {
                new_node: outcome.new_son,
                new_key: outcome.new_key,
            });
        }
    }
}

impl Drop for BPlusTree {
    fn drop(&mut self) {
        self.dm.release(&self.boot_item);
    }
}
