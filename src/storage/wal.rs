//! # Write-Ahead Log
//!
//! Append-only log backing crash recovery. File layout:
//!
//! ```text
//! [xchecksum:4] [record]*
//! record = [size:4] [checksum:4] [data:size]
//! ```
//!
//! Both checksums are the multiplicative fold with seed 13331: the
//! per-record checksum folds over `data` alone, the global `xchecksum`
//! folds over every complete record (header included) in order. The global
//! value is rewritten in place and fsynced on every append, so a torn final
//! record is detectable on open.
//!
//! ## Bad-Tail Repair
//!
//! A crash can leave a half-written record at the end of the file. On open
//! the log is scanned: records are consumed while their per-record checksum
//! verifies, the running fold is compared against the stored `xchecksum`,
//! and any trailing bytes past the last valid record are truncated. A fold
//! mismatch over the *valid* records means corruption the engine cannot
//! repair, and open fails.
//!
//! Appends are serialized by the internal latch; scans (`rewind`/`next`)
//! share it, so recovery runs single-threaded by construction.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use eyre::{ensure, Result, WrapErr};
use parking_lot::Mutex;
use tracing::warn;

use crate::config::CHECKSUM_SEED;
use crate::error::{fatal, EngineError};

pub const LOG_SUFFIX: &str = ".log";

/// `[size:4][checksum:4]` prefix of every record.
const REC_HEADER_LEN: u64 = 8;

/// Offset of the first record, right past the global checksum.
const FIRST_RECORD: u64 = 4;

#[derive(Debug)]
struct WalInner {
    file: File,
    position: u64,
    file_size: u64,
    xchecksum: i32,
}

#[derive(Debug)]
pub struct Wal {
    inner: Mutex<WalInner>,
}

/// Seed-13331 fold, byte-signed to keep the on-disk value stable across
/// implementations.
fn fold(init: i32, data: &[u8]) -> i32 {
    data.iter().fold(init, |acc, &b| {
        acc.wrapping_mul(CHECKSUM_SEED).wrapping_add(b as i8 as i32)
    })
}

impl Wal {
    /// Creates an empty `.log` file holding only a zero global checksum.
    pub fn create(prefix: &Path) -> Result<Self> {
        let path = log_path(prefix);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
            .wrap_err_with(|| format!("failed to create log file at {:?}", path))?;
        file.write_all(&0i32.to_be_bytes())
            .wrap_err("failed to write log checksum header")?;
        file.sync_all().wrap_err("failed to sync new log file")?;
        Ok(Self {
            inner: Mutex::new(WalInner {
                file,
                position: FIRST_RECORD,
                file_size: FIRST_RECORD,
                xchecksum: 0,
            }),
        })
    }

    /// Opens an existing log, verifies the global checksum over every valid
    /// record and truncates any bad tail.
    pub fn open(prefix: &Path) -> Result<Self> {
        let path = log_path(prefix);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .wrap_err_with(|| format!("failed to open log file at {:?}", path))?;

        let file_size = file.metadata().wrap_err("failed to stat log file")?.len();
        ensure!(file_size >= FIRST_RECORD, EngineError::BadLogFile);

        let mut header = [0u8; 4];
        file.seek(SeekFrom::Start(0))
            .wrap_err("failed to seek log header")?;
        file.read_exact(&mut header)
            .wrap_err("failed to read log checksum")?;
        let xchecksum = i32::from_be_bytes(header);

        let mut inner = WalInner {
            file,
            position: FIRST_RECORD,
            file_size,
            xchecksum,
        };

        let mut running = 0i32;
        while let Some(record) = intern_next(&mut inner)? {
            running = fold(running, &record);
        }
        ensure!(running == xchecksum, EngineError::BadLogFile);

        if inner.position < inner.file_size {
            warn!(
                dropped = inner.file_size - inner.position,
                "truncating bad log tail"
            );
            inner
                .file
                .set_len(inner.position)
                .wrap_err("failed to truncate bad log tail")?;
            inner.file_size = inner.position;
        }
        inner.position = FIRST_RECORD;

        Ok(Self {
            inner: Mutex::new(inner),
        })
    }

    /// Appends one record and durably updates the global checksum before
    /// returning.
    pub fn log(&self, data: &[u8]) {
        let mut inner = self.inner.lock();

        let mut record = Vec::with_capacity(REC_HEADER_LEN as usize + data.len());
        record.extend_from_slice(&(data.len() as u32).to_be_bytes());
        record.extend_from_slice(&fold(0, data).to_be_bytes());
        record.extend_from_slice(data);

        inner.xchecksum = fold(inner.xchecksum, &record);
        let end = inner.file_size;
        let xchecksum = inner.xchecksum;
        let res = inner
            .file
            .seek(SeekFrom::Start(end))
            .and_then(|_| inner.file.write_all(&record))
            .and_then(|_| inner.file.seek(SeekFrom::Start(0)))
            .and_then(|_| inner.file.write_all(&xchecksum.to_be_bytes()))
            .and_then(|_| inner.file.sync_data());
        if let Err(e) = res {
            fatal(format!("log append failed: {e}"));
        }
        inner.file_size += record.len() as u64;
    }

    /// Resets the scan cursor to the first record.
    pub fn rewind(&self) {
        self.inner.lock().position = FIRST_RECORD;
    }

    /// Returns the next record payload, or `None` at end of log (including
    /// a record whose checksum does not verify).
    pub fn next(&self) -> Result<Option<Vec<u8>>> {
        let mut inner = self.inner.lock();
        Ok(intern_next(&mut inner)?.map(|rec| rec[REC_HEADER_LEN as usize..].to_vec()))
    }

    /// Shrinks the log to `size` bytes. Recovery-only.
    pub fn truncate(&self, size: u64) -> Result<()> {
        let mut inner = self.inner.lock();
        inner
            .file
            .set_len(size)
            .wrap_err("failed to truncate log file")?;
        inner.file_size = size;
        Ok(())
    }
}

/// Reads the complete record at the cursor, verifying its checksum.
/// Returns `None` at end of log or on a record that fails verification.
fn intern_next(inner: &mut WalInner) -> Result<Option<Vec<u8>>> {
    if inner.position + REC_HEADER_LEN >= inner.file_size {
        return Ok(None);
    }
    let mut size_buf = [0u8; 4];
    inner
        .file
        .seek(SeekFrom::Start(inner.position))
        .wrap_err("failed to seek log record")?;
    inner
        .file
        .read_exact(&mut size_buf)
        .wrap_err("failed to read log record size")?;
    let size = u32::from_be_bytes(size_buf) as u64;

    if inner.position + REC_HEADER_LEN + size > inner.file_size {
        return Ok(None);
    }

    let mut record = vec![0u8; (REC_HEADER_LEN + size) as usize];
    inner
        .file
        .seek(SeekFrom::Start(inner.position))
        .wrap_err("failed to seek log record")?;
    inner
        .file
        .read_exact(&mut record)
        .wrap_err("failed to read log record")?;

    let stored = i32::from_be_bytes([record[4], record[5], record[6], record[7]]);
    if fold(0, &record[REC_HEADER_LEN as usize..]) != stored {
        return Ok(None);
    }

    inner.position += record.len() as u64;
    Ok(Some(record))
}

fn log_path(prefix: &Path) -> PathBuf {
    let mut os = prefix.as_os_str().to_owned();
    os.push(LOG_SUFFIX);
    os.into()
}
