//! # Engine Configuration Constants
//!
//! All on-disk layout constants are format-defining: changing any of them
//! makes existing database files unreadable.
//!
//! ## Dependency Graph
//!
//! ```text
//! PAGE_SIZE (8192 bytes)
//!       │
//!       ├─> DATA_PAGE_HEADER_SIZE (2 bytes: free-space offset)
//!       │
//!       ├─> MAX_DATA_PAGE_FREE (derived: PAGE_SIZE - DATA_PAGE_HEADER_SIZE)
//!       │     Upper bound on a single wrapped data item.
//!       │
//!       └─> PAGE_INDEX_INTERVALS (40 buckets)
//!             PAGE_INDEX_THRESHOLD (derived: PAGE_SIZE / 40)
//!
//! BTREE_BALANCE (32)
//!       │
//!       └─> BTREE_NODE_SIZE (derived)
//!             Must fit in one data item: BTREE_NODE_SIZE + 3 <= MAX_DATA_PAGE_FREE
//! ```

/// Size of every page in the data file.
pub const PAGE_SIZE: usize = 8192;

/// Bytes reserved at the head of an ordinary data page for the free-space
/// offset.
pub const DATA_PAGE_HEADER_SIZE: usize = 2;

/// Largest payload an ordinary data page can hold.
pub const MAX_DATA_PAGE_FREE: usize = PAGE_SIZE - DATA_PAGE_HEADER_SIZE;

/// Offset of the 8-byte open marker inside page one.
pub const VC_OFFSET: usize = 100;

/// Length of each validity-marker window.
pub const VC_LEN: usize = 8;

/// Seed of the multiplicative fold used for WAL checksums and string key
/// hashing.
pub const CHECKSUM_SEED: i32 = 13331;

/// Number of free-space buckets maintained by the page index.
pub const PAGE_INDEX_INTERVALS: usize = 40;

/// Free-space quantum of one page-index bucket.
pub const PAGE_INDEX_THRESHOLD: usize = PAGE_SIZE / PAGE_INDEX_INTERVALS;

/// B+ tree fan-out parameter. Nodes split when they reach `2 * BTREE_BALANCE`
/// keys; both halves keep exactly `BTREE_BALANCE`.
pub const BTREE_BALANCE: usize = 32;

/// Fixed size of a serialized B+ tree node:
/// `[is_leaf:1][no_keys:2][sibling:8]` followed by `2 * BALANCE + 2` slots of
/// `[son:8][key:8]`.
pub const BTREE_NODE_SIZE: usize = 11 + (2 * 8) * (BTREE_BALANCE * 2 + 2);

/// Minimum page-cache capacity, in pages.
pub const MIN_CACHE_PAGES: usize = 10;

/// Default page-cache capacity, in pages (64 MiB of 8 KiB pages).
pub const DEFAULT_CACHE_PAGES: usize = 8192;

const _: () = assert!(BTREE_NODE_SIZE + 3 <= MAX_DATA_PAGE_FREE);
const _: () = assert!(PAGE_INDEX_THRESHOLD * PAGE_INDEX_INTERVALS <= PAGE_SIZE);
