//! # Crash Recovery
//!
//! Replays the WAL after an unclean shutdown. Two record kinds:
//!
//! ```text
//! insert: [type=0:1] [xid:8] [pgno:4] [offset:2] [raw:*]
//! update: [type=1:1] [xid:8] [uid:8]  [old_raw:N] [new_raw:N]
//! ```
//!
//! where `N = (record_len - 17) / 2`. The algorithm:
//!
//! 1. Truncate the data file to the highest page any record references
//!    (at least one page, for the validity marker).
//! 2. **Redo**: forward scan; re-apply every record whose transaction is no
//!    longer active. A committed transaction's writes may have reached the
//!    log but not the pages.
//! 3. **Undo**: forward scan bucketing records of still-active transactions,
//!    then reverse-apply each bucket (inserts become tombstones, updates
//!    restore the pre-image) and mark the transaction aborted.
//!
//! Re-running recovery over an already-recovered store is a no-op on page
//! contents: redo rewrites bytes already present and undo re-tombstones.

use eyre::{ensure, eyre, Result};
use hashbrown::HashMap;
use tracing::info;
use zerocopy::byteorder::big_endian::{U16, U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::encoding::uid_to_parts;
use crate::storage::{data_page, PageCache, Wal};
use crate::tm::TransactionManager;
use crate::{Uid, Xid};

use super::data_item::DataItem;

pub const LOG_TYPE_INSERT: u8 = 0;
pub const LOG_TYPE_UPDATE: u8 = 1;

#[repr(C)]
#[derive(FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
struct InsertLogHeader {
    ty: u8,
    xid: U64,
    pgno: U32,
    offset: U16,
}

#[repr(C)]
#[derive(FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
struct UpdateLogHeader {
    ty: u8,
    xid: U64,
    uid: U64,
}

pub struct InsertRecord {
    pub xid: Xid,
    pub pgno: u32,
    pub offset: u16,
    pub raw: Vec<u8>,
}

pub struct UpdateRecord {
    pub xid: Xid,
    pub pgno: u32,
    pub offset: u16,
    pub old_raw: Vec<u8>,
    pub new_raw: Vec<u8>,
}

/// Builds the WAL record for a fresh insert at the page's current free-space
/// offset.
pub fn insert_log(xid: Xid, pgno: u32, offset: u16, raw: &[u8]) -> Vec<u8> {
    let header = InsertLogHeader {
        ty: LOG_TYPE_INSERT,
        xid: U64::new(xid),
        pgno: U32::new(pgno),
        offset: U16::new(offset),
    };
    let mut log = header.as_bytes().to_vec();
    log.extend_from_slice(raw);
    log
}

/// Builds the WAL record for an in-place update (pre- and post-image).
pub fn update_log(xid: Xid, uid: Uid, old_raw: &[u8], new_raw: &[u8]) -> Vec<u8> {
    debug_assert_eq!(old_raw.len(), new_raw.len());
    let header = UpdateLogHeader {
        ty: LOG_TYPE_UPDATE,
        xid: U64::new(xid),
        uid: U64::new(uid),
    };
    let mut log = header.as_bytes().to_vec();
    log.extend_from_slice(old_raw);
    log.extend_from_slice(new_raw);
    log
}

pub fn is_insert_log(log: &[u8]) -> bool {
    log.first() == Some(&LOG_TYPE_INSERT)
}

pub fn parse_insert_log(log: &[u8]) -> Result<InsertRecord> {
    let (header, raw) = InsertLogHeader::read_from_prefix(log)
        .map_err(|_| eyre!("truncated insert log record"))?;
    Ok(InsertRecord {
        xid: header.xid.get(),
        pgno: header.pgno.get(),
        offset: header.offset.get(),
        raw: raw.to_vec(),
    })
}

pub fn parse_update_log(log: &[u8]) -> Result<UpdateRecord> {
    let (header, images) = UpdateLogHeader::read_from_prefix(log)
        .map_err(|_| eyre!("truncated update log record"))?;
    ensure!(
        images.len() % 2 == 0,
        "update log images have odd length {}",
        images.len()
    );
    let half = images.len() / 2;
    let (pgno, offset) = uid_to_parts(header.uid.get());
    Ok(UpdateRecord {
        xid: header.xid.get(),
        pgno,
        offset,
        old_raw: images[..half].to_vec(),
        new_raw: images[half..].to_vec(),
    })
}

/// Page number a record touches.
fn record_pgno(log: &[u8]) -> Result<u32> {
    if is_insert_log(log) {
        Ok(parse_insert_log(log)?.pgno)
    } else {
        Ok(parse_update_log(log)?.pgno)
    }
}

/// Full redo/undo pass. Runs when the page-one validity check fails.
pub fn recover(tm: &TransactionManager, wal: &Wal, page_cache: &PageCache) -> Result<()> {
    info!("recovering from unclean shutdown");

    wal.rewind();
    let mut max_pgno = 0u32;
    while let Some(log) = wal.next()? {
        max_pgno = max_pgno.max(record_pgno(&log)?);
    }
    let max_pgno = max_pgno.max(1);
    page_cache.truncate_by_pgno(max_pgno);
    info!(pages = max_pgno, "data file truncated for replay");

    redo(tm, wal, page_cache)?;
    undo(tm, wal, page_cache)?;

    info!("recovery complete");
    Ok(())
}

/// Re-applies every record of a settled (committed or aborted) transaction.
fn redo(tm: &TransactionManager, wal: &Wal, page_cache: &PageCache) -> Result<()> {
    wal.rewind();
    while let Some(log) = wal.next()? {
        if is_insert_log(&log) {
            let rec = parse_insert_log(&log)?;
            if !tm.is_active(rec.xid)? {
                apply_insert(page_cache, &rec)?;
            }
        } else {
            let rec = parse_update_log(&log)?;
            if !tm.is_active(rec.xid)? {
                apply_raw(page_cache, rec.pgno, rec.offset, &rec.new_raw)?;
            }
        }
    }
    Ok(())
}

/// Reverse-applies, per still-active transaction, everything it logged, then
/// marks it aborted.
fn undo(tm: &TransactionManager, wal: &Wal, page_cache: &PageCache) -> Result<()> {
    let mut buckets: HashMap<Xid, Vec<Vec<u8>>> = HashMap::new();

    wal.rewind();
    while let Some(log) = wal.next()? {
        let xid = if is_insert_log(&log) {
            parse_insert_log(&log)?.xid
        } else {
            parse_update_log(&log)?.xid
        };
        if tm.is_active(xid)? {
            buckets.entry(xid).or_default().push(log);
        }
    }

    for (xid, logs) in buckets {
        for log in logs.iter().rev() {
            if is_insert_log(log) {
                let mut rec = parse_insert_log(log)?;
                DataItem::set_raw_invalid(&mut rec.raw);
                apply_insert(page_cache, &rec)?;
            } else {
                let rec = parse_update_log(log)?;
                apply_raw(page_cache, rec.pgno, rec.offset, &rec.old_raw)?;
            }
        }
        tm.abort(xid);
        info!(xid, "undid and aborted in-flight transaction");
    }
    Ok(())
}

fn apply_insert(page_cache: &PageCache, rec: &InsertRecord) -> Result<()> {
    let page = page_cache.get_page(rec.pgno)?;
    data_page::recover_insert(&page, &rec.raw, rec.offset);
    page_cache.release(&page);
    Ok(())
}

fn apply_raw(page_cache: &PageCache, pgno: u32, offset: u16, raw: &[u8]) -> Result<()> {
    let page = page_cache.get_page(pgno)?;
    data_page::recover_update(&page, raw, offset);
    page_cache.release(&page);
    Ok(())
}
