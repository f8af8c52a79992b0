//! # Catalog
//!
//! Table and field metadata, persisted through the version manager and
//! anchored by the boot file. The table manager is the single entry point
//! the executor talks to: it owns the loaded-table cache and translates
//! statement records into VM and B+ tree operations.
//!
//! Metadata records are written under the transaction that issued the DDL
//! and read back under the super XID, so a table becomes visible to other
//! sessions exactly when its creating transaction commits.

pub mod booter;
pub mod field;
pub mod table;

use std::path::Path;
use std::sync::Arc;

use eyre::{Result, WrapErr};
use hashbrown::HashMap;
use parking_lot::Mutex;
use tracing::info;

use crate::dm::DataManager;
use crate::encoding::read_u64;
use crate::error::EngineError;
use crate::sql;
use crate::vm::{IsolationLevel, VersionManager};
use crate::{Uid, Xid};

pub use booter::Booter;
pub use field::{Field, FieldType, Value};
pub use table::Table;

pub struct TableManager {
    vm: Arc<VersionManager>,
    dm: Arc<DataManager>,
    booter: Booter,
    tables: Mutex<HashMap<String, Arc<Table>>>,
}

impl TableManager {
    /// Creates an empty catalog with a zero boot anchor.
    pub fn create(prefix: &Path, vm: Arc<VersionManager>, dm: Arc<DataManager>) -> Result<Self> {
        let booter = Booter::create(prefix)?;
        booter.update(&0u64.to_be_bytes())?;
        Ok(Self {
            vm,
            dm,
            booter,
            tables: Mutex::new(HashMap::new()),
        })
    }

    /// Opens an existing catalog, materializing every table on the chain.
    pub fn open(prefix: &Path, vm: Arc<VersionManager>, dm: Arc<DataManager>) -> Result<Self> {
        let booter = Booter::open(prefix)?;
        let tm = Self {
            vm,
            dm,
            booter,
            tables: Mutex::new(HashMap::new()),
        };

        let mut uid = tm.first_table_uid()?;
        while uid != 0 {
            let table = Table::load(&tm.vm, &tm.dm, uid)?;
            uid = table.next_uid;
            info!(table = %table.name, "loaded table");
            tm.tables.lock().insert(table.name.clone(), Arc::new(table));
        }
        Ok(tm)
    }

    fn first_table_uid(&self) -> Result<Uid> {
        let raw = self.booter.load()?;
        Ok(read_u64(&raw))
    }

    fn update_first_table_uid(&self, uid: Uid) -> Result<()> {
        self.booter.update(&uid.to_be_bytes())
    }

    fn table(&self, name: &str) -> Result<Arc<Table>> {
        self.tables
            .lock()
            .get(name)
            .cloned()
            .ok_or(EngineError::TableNotFound)
            .wrap_err_with(|| format!("no table named {name:?}"))
    }

    /// Starts a transaction at the statement's isolation level.
    pub fn begin(&self, stmt: &sql::Begin) -> (Xid, Vec<u8>) {
        let level = if stmt.repeatable_read {
            IsolationLevel::RepeatableRead
        } else {
            IsolationLevel::ReadCommitted
        };
        (self.vm.begin(level), b"begin".to_vec())
    }

    pub fn commit(&self, xid: Xid) -> Result<Vec<u8>> {
        self.vm.commit(xid)?;
        Ok(b"commit".to_vec())
    }

    pub fn abort(&self, xid: Xid) -> Vec<u8> {
        self.vm.abort(xid);
        b"abort".to_vec()
    }

    /// Lists every loaded table, one description per line.
    pub fn show(&self, _xid: Xid) -> Vec<u8> {
        let tables = self.tables.lock();
        let mut out = String::new();
        for table in tables.values() {
            out.push_str(&table.describe());
            out.push('\n');
        }
        out.into_bytes()
    }

    pub fn create_table(&self, xid: Xid, stmt: &sql::Create) -> Result<Vec<u8>> {
        let mut tables = self.tables.lock();
        if tables.contains_key(&stmt.table) {
            return Err(EngineError::DuplicatedTable)
                .wrap_err_with(|| format!("table {:?} already exists", stmt.table));
        }

        let table = Table::create(&self.vm, &self.dm, xid, self.first_table_uid()?, stmt)?;
        self.update_first_table_uid(table.uid)?;
        let reply = format!("create {}", table.name).into_bytes();
        tables.insert(table.name.clone(), Arc::new(table));
        Ok(reply)
    }

    /// `drop table` is parsed but has no storage-level implementation; the
    /// catalog refuses it rather than silently ignoring the statement.
    pub fn drop_table(&self, _xid: Xid, stmt: &sql::Drop) -> Result<Vec<u8>> {
        Err(EngineError::InvalidCommand)
            .wrap_err_with(|| format!("drop table is not supported (table {:?})", stmt.table))
    }

    pub fn insert(&self, xid: Xid, stmt: &sql::Insert) -> Result<Vec<u8>> {
        let table = self.table(&stmt.table)?;
        table.insert(&self.vm, xid, stmt)?;
        Ok(b"insert".to_vec())
    }

    pub fn select(&self, xid: Xid, stmt: &sql::Select) -> Result<Vec<u8>> {
        let table = self.table(&stmt.table)?;
        Ok(table.select(&self.vm, xid, stmt)?.into_bytes())
    }

    pub fn update(&self, xid: Xid, stmt: &sql::Update) -> Result<Vec<u8>> {
        let table = self.table(&stmt.table)?;
        let count = table.update(&self.vm, xid, stmt)?;
        Ok(format!("update {count}").into_bytes())
    }

    pub fn delete(&self, xid: Xid, stmt: &sql::Delete) -> Result<Vec<u8>> {
        let table = self.table(&stmt.table)?;
        let count = table.delete(&self.vm, xid, stmt)?;
        Ok(format!("delete {count}").into_bytes())
    }
}
