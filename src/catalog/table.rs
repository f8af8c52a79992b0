//! Table metadata and DML execution.
//!
//! Persisted table record (one data item):
//!
//! ```text
//! [name: len-prefixed string] [next_table_uid:8] [field_uid:8]*
//! ```
//!
//! Tables form a singly-linked chain through `next_table_uid`; the chain
//! head lives in the boot anchor. Rows are the concatenated binary
//! encodings of the field values in declaration order.
//!
//! A WHERE clause filters on exactly one field, which must be indexed: row
//! lookup is always a key-range search over that field's B+ tree, followed
//! by a versioned read of each candidate row (which also screens out index
//! entries left behind by updates and hash-collided string keys).

use std::sync::Arc;

use eyre::{ensure, Result, WrapErr};
use smallvec::SmallVec;

use crate::dm::DataManager;
use crate::encoding::{encode_string, parse_string, read_u64};
use crate::error::EngineError;
use crate::sql::{self, LogicOp, Where};
use crate::vm::VersionManager;
use crate::{Uid, Xid};

use super::field::{Field, Value};

pub struct Table {
    pub uid: Uid,
    pub name: String,
    pub next_uid: Uid,
    pub fields: Vec<Field>,
}

impl Table {
    /// Materializes a persisted table and all of its fields.
    pub fn load(vm: &VersionManager, dm: &Arc<DataManager>, uid: Uid) -> Result<Self> {
        let raw = vm
            .read(crate::tm::SUPER_XID, uid)?
            .ok_or(EngineError::TableNotFound)
            .wrap_err_with(|| format!("table record {uid} is unreadable"))?;

        let (name, mut pos) = parse_string(&raw)?;
        let next_uid = read_u64(&raw[pos..]);
        pos += 8;

        let mut fields = Vec::new();
        while pos < raw.len() {
            let field_uid = read_u64(&raw[pos..]);
            pos += 8;
            fields.push(Field::load(vm, dm, field_uid)?);
        }

        Ok(Self {
            uid,
            name,
            next_uid,
            fields,
        })
    }

    /// Creates a table under `xid`: persists each field (building indexes
    /// for the ones listed), then the table record chained before
    /// `next_uid`.
    pub fn create(
        vm: &VersionManager,
        dm: &Arc<DataManager>,
        xid: Xid,
        next_uid: Uid,
        stmt: &sql::Create,
    ) -> Result<Self> {
        let mut fields = Vec::with_capacity(stmt.fields.len());
        for def in &stmt.fields {
            let indexed = stmt.indexed.iter().any(|n| n == &def.name);
            fields.push(Field::create(vm, dm, xid, &def.name, &def.type_name, indexed)?);
        }

        let mut raw = encode_string(&stmt.table);
        raw.extend_from_slice(&next_uid.to_be_bytes());
        for field in &fields {
            raw.extend_from_slice(&field.uid.to_be_bytes());
        }
        let uid = vm.insert(xid, &raw)?;

        Ok(Self {
            uid,
            name: stmt.table.clone(),
            next_uid,
            fields,
        })
    }

    /// Inserts one row, maintaining every field index.
    pub fn insert(&self, vm: &VersionManager, xid: Xid, stmt: &sql::Insert) -> Result<()> {
        let row = self.row_from_literals(&stmt.values)?;
        let raw = self.row_to_raw(&row)?;
        let uid = vm.insert(xid, &raw)?;

        for (field, value) in self.fields.iter().zip(&row) {
            if field.is_indexed() {
                field.index_insert(value, uid)?;
            }
        }
        Ok(())
    }

    /// Reads every visible row selected by the WHERE clause, formatted one
    /// `[v1, v2, ...]` line each.
    pub fn select(&self, vm: &VersionManager, xid: Xid, stmt: &sql::Select) -> Result<String> {
        let projection = self.projection(&stmt.fields)?;
        let uids = self.resolve_where(stmt.where_clause.as_ref())?;

        let mut out = String::new();
        for uid in uids {
            let Some(raw) = vm.read(xid, uid)? else {
                continue;
            };
            let row = self.parse_row(&raw)?;
            out.push_str(&self.format_row(&row, &projection));
            out.push('\n');
        }
        Ok(out)
    }

    /// Rewrites the selected rows with `field = value`. Each row is deleted
    /// and re-inserted; index entries pointing at the tombstoned version
    /// stay behind and are screened out on read.
    pub fn update(&self, vm: &VersionManager, xid: Xid, stmt: &sql::Update) -> Result<usize> {
        let target = self
            .fields
            .iter()
            .position(|f| f.name == stmt.field)
            .ok_or(EngineError::FieldNotFound)
            .wrap_err_with(|| format!("no field {:?} in table {}", stmt.field, self.name))?;
        let new_value = self.fields[target].value_from_literal(&stmt.value)?;

        let uids = self.resolve_where(stmt.where_clause.as_ref())?;
        let mut count = 0;
        for uid in uids {
            let Some(raw) = vm.read(xid, uid)? else {
                continue;
            };
            vm.delete(xid, uid)?;

            let mut row = self.parse_row(&raw)?;
            row[target] = new_value.clone();
            let new_uid = vm.insert(xid, &self.row_to_raw(&row)?)?;
            count += 1;

            for (field, value) in self.fields.iter().zip(&row) {
                if field.is_indexed() {
                    field.index_insert(value, new_uid)?;
                }
            }
        }
        Ok(count)
    }

    /// Deletes the selected rows; returns how many versions this
    /// transaction actually deleted.
    pub fn delete(&self, vm: &VersionManager, xid: Xid, stmt: &sql::Delete) -> Result<usize> {
        let uids = self.resolve_where(stmt.where_clause.as_ref())?;
        let mut count = 0;
        for uid in uids {
            if vm.delete(xid, uid)? {
                count += 1;
            }
        }
        Ok(count)
    }

    /// `{name: (field, type, Index), ...}` - the `show` rendering.
    pub fn describe(&self) -> String {
        let mut out = format!("{{{}: ", self.name);
        for (i, field) in self.fields.iter().enumerate() {
            out.push_str(&field.describe());
            out.push_str(if i + 1 == self.fields.len() { "}" } else { ", " });
        }
        out
    }

    /// Maps the statement's field list to column positions; `*` selects all.
    fn projection(&self, names: &[String]) -> Result<SmallVec<[usize; 8]>> {
        if names.len() == 1 && names[0] == "*" {
            return Ok((0..self.fields.len()).collect());
        }
        names
            .iter()
            .map(|name| {
                self.fields
                    .iter()
                    .position(|f| &f.name == name)
                    .ok_or(EngineError::FieldNotFound)
                    .wrap_err_with(|| format!("no field {name:?} in table {}", self.name))
            })
            .collect()
    }

    /// Resolves a WHERE clause to candidate row UIDs through the B+ tree of
    /// the referenced field. With no clause, scans the first indexed field
    /// over its full range.
    fn resolve_where(&self, clause: Option<&Where>) -> Result<Vec<Uid>> {
        let Some(clause) = clause else {
            let field = self
                .fields
                .iter()
                .find(|f| f.is_indexed())
                .ok_or(EngineError::TableNoIndex)
                .wrap_err_with(|| format!("table {} has no indexed field", self.name))?;
            return field.index_search(0, i64::MAX);
        };

        let field = self
            .fields
            .iter()
            .find(|f| f.name == clause.first.field)
            .ok_or(EngineError::FieldNotFound)
            .wrap_err_with(|| format!("no field {:?} in table {}", clause.first.field, self.name))?;
        ensure!(field.is_indexed(), EngineError::FieldNotIndexed);

        let (l0, r0) = field.range_for(&clause.first)?;
        match &clause.rest {
            None => field.index_search(l0, r0),
            Some((LogicOp::And, second)) => {
                let (l1, r1) = field.range_for(second)?;
                field.index_search(l0.max(l1), r0.min(r1))
            }
            Some((LogicOp::Or, second)) => {
                let (l1, r1) = field.range_for(second)?;
                let mut uids = field.index_search(l0, r0)?;
                uids.extend(field.index_search(l1, r1)?);
                Ok(uids)
            }
        }
    }

    fn row_from_literals(&self, literals: &[String]) -> Result<Vec<Value>> {
        ensure!(literals.len() == self.fields.len(), EngineError::InvalidValues);
        self.fields
            .iter()
            .zip(literals)
            .map(|(field, literal)| field.value_from_literal(literal))
            .collect()
    }

    fn row_to_raw(&self, row: &[Value]) -> Result<Vec<u8>> {
        let mut raw = Vec::new();
        for (field, value) in self.fields.iter().zip(row) {
            raw.extend_from_slice(&field.value_to_raw(value)?);
        }
        Ok(raw)
    }

    fn parse_row(&self, raw: &[u8]) -> Result<Vec<Value>> {
        let mut pos = 0;
        let mut row = Vec::with_capacity(self.fields.len());
        for field in &self.fields {
            let (value, consumed) = field.parse_value(&raw[pos..])?;
            row.push(value);
            pos += consumed;
        }
        Ok(row)
    }

    fn format_row(&self, row: &[Value], projection: &[usize]) -> String {
        let mut out = String::from("[");
        for (i, &col) in projection.iter().enumerate() {
            out.push_str(&row[col].to_string());
            if i + 1 < projection.len() {
                out.push_str(", ");
            }
        }
        out.push(']');
        out
    }
}
