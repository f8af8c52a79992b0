//! # Transaction Manager
//!
//! Allocates monotonically increasing transaction IDs (XIDs) and persists a
//! one-byte status per XID in the `.xid` file:
//!
//! ```text
//! [xid_counter:8] [status(xid=1):1] [status(xid=2):1] ...
//! ```
//!
//! Valid transitions are `active -> committed` and `active -> aborted`; a
//! status byte is written exactly twice over a transaction's life (once at
//! begin, once at the final state). Every mutation is fsynced before the call
//! returns, so TM state is durable before a commit or abort is acknowledged.
//!
//! XID 0 is the super transaction: never recorded in the file, treated as
//! always committed by the visibility rules, and used by DDL and B+ tree
//! structure mutations.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use eyre::{ensure, Result, WrapErr};
use parking_lot::Mutex;

use crate::error::{fatal, EngineError};
use crate::Xid;

/// The always-committed system transaction.
pub const SUPER_XID: Xid = 0;

pub const XID_SUFFIX: &str = ".xid";

const XID_HEADER_LEN: u64 = 8;

const STATUS_ACTIVE: u8 = 0;
const STATUS_COMMITTED: u8 = 1;
const STATUS_ABORTED: u8 = 2;

#[derive(Debug)]
struct TmInner {
    file: File,
    xid_counter: u64,
}

#[derive(Debug)]
pub struct TransactionManager {
    inner: Mutex<TmInner>,
}

impl TransactionManager {
    /// Creates a fresh `.xid` file with a zero counter.
    pub fn create(prefix: &Path) -> Result<Self> {
        let path = xid_path(prefix);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::AlreadyExists => eyre::Report::new(EngineError::FileExists),
                _ => eyre::Report::new(e),
            })
            .wrap_err_with(|| format!("failed to create XID file at {:?}", path))?;
        file.write_all(&0u64.to_be_bytes())
            .wrap_err("failed to write XID header")?;
        file.sync_all().wrap_err("failed to sync new XID file")?;
        Ok(Self {
            inner: Mutex::new(TmInner {
                file,
                xid_counter: 0,
            }),
        })
    }

    /// Opens an existing `.xid` file, validating that its length matches the
    /// recorded counter exactly.
    pub fn open(prefix: &Path) -> Result<Self> {
        let path = xid_path(prefix);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => eyre::Report::new(EngineError::FileNotExists),
                _ => eyre::Report::new(e),
            })
            .wrap_err_with(|| format!("failed to open XID file at {:?}", path))?;

        let file_len = file
            .metadata()
            .wrap_err("failed to stat XID file")?
            .len();
        ensure!(file_len >= XID_HEADER_LEN, EngineError::BadXidFile);

        let mut header = [0u8; 8];
        file.seek(SeekFrom::Start(0))
            .wrap_err("failed to seek XID header")?;
        file.read_exact(&mut header)
            .wrap_err("failed to read XID header")?;
        let xid_counter = u64::from_be_bytes(header);

        ensure!(
            file_len == XID_HEADER_LEN + xid_counter,
            EngineError::BadXidFile
        );

        Ok(Self {
            inner: Mutex::new(TmInner { file, xid_counter }),
        })
    }

    /// Starts a new transaction: allocates the next XID, records it as
    /// active, persists the bumped counter.
    pub fn begin(&self) -> Xid {
        let mut inner = self.inner.lock();
        let xid = inner.xid_counter + 1;
        write_status(&mut inner.file, xid, STATUS_ACTIVE);
        inner.xid_counter = xid;
        let counter = inner.xid_counter;
        if let Err(e) = inner
            .file
            .seek(SeekFrom::Start(0))
            .and_then(|_| inner.file.write_all(&counter.to_be_bytes()))
            .and_then(|_| inner.file.sync_data())
        {
            fatal(format!("XID counter update failed: {e}"));
        }
        xid
    }

    pub fn commit(&self, xid: Xid) {
        let mut inner = self.inner.lock();
        write_status(&mut inner.file, xid, STATUS_COMMITTED);
    }

    pub fn abort(&self, xid: Xid) {
        let mut inner = self.inner.lock();
        write_status(&mut inner.file, xid, STATUS_ABORTED);
    }

    pub fn is_active(&self, xid: Xid) -> Result<bool> {
        self.has_status(xid, STATUS_ACTIVE)
    }

    pub fn is_committed(&self, xid: Xid) -> Result<bool> {
        self.has_status(xid, STATUS_COMMITTED)
    }

    pub fn is_aborted(&self, xid: Xid) -> Result<bool> {
        self.has_status(xid, STATUS_ABORTED)
    }

    fn has_status(&self, xid: Xid, status: u8) -> Result<bool> {
        if xid == SUPER_XID {
            return Ok(false);
        }
        let mut inner = self.inner.lock();
        let mut byte = [0u8; 1];
        inner
            .file
            .seek(SeekFrom::Start(status_offset(xid)))
            .wrap_err("failed to seek XID status")?;
        inner
            .file
            .read_exact(&mut byte)
            .wrap_err_with(|| format!("failed to read status of xid {xid}"))?;
        Ok(byte[0] == status)
    }
}

fn xid_path(prefix: &Path) -> std::path::PathBuf {
    let mut os = prefix.as_os_str().to_owned();
    os.push(XID_SUFFIX);
    os.into()
}

fn status_offset(xid: Xid) -> u64 {
    XID_HEADER_LEN + (xid - 1)
}

fn write_status(file: &mut File, xid: Xid, status: u8) {
    if let Err(e) = file
        .seek(SeekFrom::Start(status_offset(xid)))
        .and_then(|_| file.write_all(&[status]))
        .and_then(|_| file.sync_data())
    {
        fatal(format!("XID status update failed for xid {xid}: {e}"));
    }
}
