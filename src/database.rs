//! # Database Facade
//!
//! Wires the full pipeline together behind two entry points:
//!
//! ```ignore
//! let db = Database::create("/path/prefix")?;
//! let session = db.session();
//! session.execute("create table t id int32, name string (index id)")?;
//! session.execute("insert into t values 1 alice")?;
//! let rows = session.execute("select * from t where id = 1")?;
//! db.close();
//! ```
//!
//! All engine state (XID counter, caches, lock table, catalog) is owned by
//! the `Database` instance, so several databases can coexist in one
//! process.
//!
//! `close` performs the clean shutdown: it stamps the page-one close marker
//! and flushes every dirty page. Dropping a `Database` without `close` is
//! equivalent to a crash - on the next open the validity marker mismatches
//! and WAL recovery reconstructs the committed state.

use std::path::Path;
use std::sync::Arc;

use eyre::Result;
use tracing::info;

use crate::catalog::TableManager;
use crate::config::DEFAULT_CACHE_PAGES;
use crate::dm::DataManager;
use crate::executor::Executor;
use crate::tm::TransactionManager;
use crate::vm::VersionManager;

pub struct Database {
    dm: Arc<DataManager>,
    tbm: Arc<TableManager>,
}

impl Database {
    /// Creates a fresh database at the path prefix (files `P.db`, `P.log`,
    /// `P.xid`, `P.bt`).
    pub fn create(prefix: impl AsRef<Path>) -> Result<Self> {
        Self::create_with_cache(prefix, DEFAULT_CACHE_PAGES)
    }

    pub fn create_with_cache(prefix: impl AsRef<Path>, cache_pages: usize) -> Result<Self> {
        let prefix = prefix.as_ref();
        let tm = Arc::new(TransactionManager::create(prefix)?);
        let dm = Arc::new(DataManager::create(prefix, cache_pages, Arc::clone(&tm))?);
        let vm = Arc::new(VersionManager::new(tm, Arc::clone(&dm)));
        let tbm = Arc::new(TableManager::create(prefix, vm, Arc::clone(&dm))?);
        info!(?prefix, "database created");
        Ok(Self { dm, tbm })
    }

    /// Opens an existing database, running crash recovery when needed.
    pub fn open(prefix: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_cache(prefix, DEFAULT_CACHE_PAGES)
    }

    pub fn open_with_cache(prefix: impl AsRef<Path>, cache_pages: usize) -> Result<Self> {
        let prefix = prefix.as_ref();
        let tm = Arc::new(TransactionManager::open(prefix)?);
        let dm = Arc::new(DataManager::open(prefix, cache_pages, Arc::clone(&tm))?);
        let vm = Arc::new(VersionManager::new(tm, Arc::clone(&dm)));
        let tbm = Arc::new(TableManager::open(prefix, vm, Arc::clone(&dm))?);
        info!(?prefix, "database opened");
        Ok(Self { dm, tbm })
    }

    /// Opens a new session. Each session carries its own (at most one)
    /// transaction; sessions are independent and may run on separate
    /// threads.
    pub fn session(&self) -> Session {
        Session {
            executor: Executor::new(Arc::clone(&self.tbm)),
        }
    }

    /// Clean shutdown: stamps the validity marker and flushes dirty state.
    pub fn close(&self) {
        self.dm.close();
        info!("database closed");
    }
}

/// One client session: a statement executor plus its transaction slot.
pub struct Session {
    executor: Executor,
}

impl Session {
    /// Parses and executes one statement, returning the reply payload.
    pub fn execute(&self, statement: &str) -> Result<Vec<u8>> {
        self.executor.execute(statement)
    }

    /// Like [`execute`](Self::execute), with the reply decoded as UTF-8 for
    /// convenience in tests and tooling.
    pub fn execute_str(&self, statement: &str) -> Result<String> {
        let reply = self.executor.execute(statement)?;
        Ok(String::from_utf8_lossy(&reply).into_owned())
    }
}
