//! # Storage Layer
//!
//! Fixed-size 8 KiB pages persisted in the `.db` file through a bounded,
//! reference-counted page cache, plus the write-ahead log that makes page
//! mutations recoverable.
//!
//! ## Module Organization
//!
//! - [`page`]: the in-memory page handle (data buffer, dirty flag)
//! - [`page_cache`]: file-backed cache; dirty write-back on eviction
//! - [`page_one`]: validity marker on the reserved first page
//! - [`data_page`]: ordinary page format (free-space offset + payload)
//! - [`page_index`]: free-space histogram guiding insert placement
//! - [`wal`]: checksummed append-only log with bad-tail repair
//!
//! Page numbering starts at 1; page 1 is reserved for the validity marker
//! and never holds data items.

pub mod data_page;
pub mod page;
pub mod page_cache;
pub mod page_index;
pub mod page_one;
pub mod wal;

pub use page::Page;
pub use page_cache::PageCache;
pub use page_index::{PageIndex, PageSpace};
pub use wal::Wal;
