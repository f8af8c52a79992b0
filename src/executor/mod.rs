//! # Statement Executor
//!
//! Per-session dispatch of parsed statements onto the catalog. A session
//! carries at most one open transaction: `begin` opens it (nested begins
//! fail), `commit`/`abort` close it, and every other statement either runs
//! inside the open transaction or inside an implicit one that is committed
//! on success and aborted on error.

use std::sync::Arc;

use eyre::Result;
use tracing::debug;

use crate::catalog::TableManager;
use crate::error::EngineError;
use crate::sql::{self, Statement};
use crate::Xid;

/// Sentinel for "no transaction open"; the super XID is never a session
/// transaction.
const NO_XID: Xid = 0;

pub struct Executor {
    tbm: Arc<TableManager>,
    xid: parking_lot::Mutex<Xid>,
}

impl Executor {
    pub fn new(tbm: Arc<TableManager>) -> Self {
        Self {
            tbm,
            xid: parking_lot::Mutex::new(NO_XID),
        }
    }

    /// Parses and runs one statement, returning the reply payload.
    pub fn execute(&self, input: &str) -> Result<Vec<u8>> {
        debug!(statement = input, "execute");
        let stmt = sql::parse(input)?;

        match stmt {
            Statement::Begin(begin) => {
                let mut current = self.xid.lock();
                if *current != NO_XID {
                    return Err(EngineError::NestedTransaction.into());
                }
                let (xid, reply) = self.tbm.begin(&begin);
                *current = xid;
                Ok(reply)
            }
            Statement::Commit => {
                let mut current = self.xid.lock();
                if *current == NO_XID {
                    return Err(EngineError::NoTransaction.into());
                }
                let reply = self.tbm.commit(*current)?;
                *current = NO_XID;
                Ok(reply)
            }
            Statement::Abort => {
                let mut current = self.xid.lock();
                if *current == NO_XID {
                    return Err(EngineError::NoTransaction.into());
                }
                let reply = self.tbm.abort(*current);
                *current = NO_XID;
                Ok(reply)
            }
            other => self.execute_within_transaction(other),
        }
    }

    /// Runs a non-transaction-control statement, wrapping it in an implicit
    /// auto-commit transaction when the session has none open.
    fn execute_within_transaction(&self, stmt: Statement) -> Result<Vec<u8>> {
        let mut current = self.xid.lock();
        let implicit = *current == NO_XID;
        if implicit {
            let (xid, _) = self.tbm.begin(&sql::Begin::default());
            *current = xid;
        }
        let xid = *current;

        let result = self.dispatch(xid, &stmt);

        if implicit {
            *current = NO_XID;
            match result {
                Ok(reply) => {
                    self.tbm.commit(xid)?;
                    Ok(reply)
                }
                Err(e) => {
                    self.tbm.abort(xid);
                    Err(e)
                }
            }
        } else {
            result
        }
    }

    fn dispatch(&self, xid: Xid, stmt: &Statement) -> Result<Vec<u8>> {
        match stmt {
            Statement::Show => Ok(self.tbm.show(xid)),
            Statement::Create(create) => self.tbm.create_table(xid, create),
            Statement::Drop(drop) => self.tbm.drop_table(xid, drop),
            Statement::Select(select) => self.tbm.select(xid, select),
            Statement::Insert(insert) => self.tbm.insert(xid, insert),
            Statement::Update(update) => self.tbm.update(xid, update),
            Statement::Delete(delete) => self.tbm.delete(xid, delete),
            Statement::Begin(_) | Statement::Commit | Statement::Abort => {
                unreachable!("transaction control handled by execute")
            }
        }
    }

    /// Rolls back any transaction the session left open.
    pub fn close(&self) {
        let mut current = self.xid.lock();
        if *current != NO_XID {
            debug!(xid = *current, "aborting transaction left open by session");
            self.tbm.abort(*current);
            *current = NO_XID;
        }
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        self.close();
    }
}
