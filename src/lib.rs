//! # shaledb - Embedded Relational Storage Engine
//!
//! shaledb is a small transactional storage engine: typed tables with
//! secondary B+ tree indexes, multi-version concurrency control, and
//! write-ahead-log crash recovery, packaged as an embeddable library.
//!
//! ## Architecture
//!
//! The engine is a layered pipeline; each layer only talks to the one below:
//!
//! ```text
//! ┌──────────────────────────────────────┐
//! │        Public API (Database)         │
//! ├──────────────────────────────────────┤
//! │   SQL Layer (Tokenizer / Parser)     │
//! ├──────────────────────────────────────┤
//! │  Catalog (tables, fields, booter)    │
//! ├───────────────────┬──────────────────┤
//! │   B+ Tree Index   │  MVCC (entries,  │
//! │                   │  lock table)     │
//! ├───────────────────┴──────────────────┤
//! │    Data Items (DataManager, WAL)     │
//! ├──────────────────────────────────────┤
//! │   Page Cache (8 KiB pages, fsync)    │
//! └──────────────────────────────────────┘
//! ```
//!
//! ## File Layout
//!
//! One database uses a common path prefix `P`:
//!
//! ```text
//! P.db      # data file, 8 KiB pages, page 1 reserved for the validity marker
//! P.log     # write-ahead log
//! P.xid     # transaction status file
//! P.bt      # catalog boot anchor (first table UID), replaced atomically
//! P.bt_tmp  # scratch file for the atomic boot replacement
//! ```
//!
//! ## Durability Model
//!
//! Every mutating page write appends a log record to the WAL (fsynced) before
//! the dirtied page becomes eligible for write-back. On reopen after an
//! unclean shutdown (detected through the page-one validity marker), the WAL
//! is replayed: committed transactions are redone, transactions still active
//! at the crash are undone and marked aborted.
//!
//! ## Module Overview
//!
//! - [`cache`]: generic reference-counted cache shared by pages, data items
//!   and MVCC entries
//! - [`tm`]: transaction ID allocation and status persistence
//! - [`storage`]: page cache, page formats, free-space index, WAL
//! - [`dm`]: data items and crash recovery
//! - [`vm`]: MVCC version manager, visibility rules, deadlock detection
//! - [`btree`]: on-disk B+ tree over data items
//! - [`catalog`]: table and field metadata, DDL/DML execution
//! - [`sql`]: statement records, tokenizer and parser
//! - [`executor`]: per-session statement dispatch with implicit transactions
//! - [`transport`]: flag-prefixed response packet codec

pub mod btree;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod database;
pub mod dm;
pub mod encoding;
pub mod error;
pub mod executor;
pub mod sql;
pub mod storage;
pub mod tm;
pub mod transport;
pub mod vm;

pub use database::{Database, Session};
pub use error::EngineError;

/// Transaction identifier. XID 0 is the super transaction: it is never
/// recorded in the status file and is treated as always committed.
pub type Xid = u64;

/// Identifier of a data item: `(page_number << 32) | offset`.
pub type Uid = u64;
