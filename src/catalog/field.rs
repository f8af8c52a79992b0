//! Field metadata and typed value handling.
//!
//! Persisted field record (one data item, read under the super XID):
//!
//! ```text
//! [name: len-prefixed string] [type: len-prefixed string] [index_root:8]
//! ```
//!
//! `index_root` is the boot-item UID of the field's B+ tree, 0 when the
//! field is not indexed. Index keys are the field value folded to a signed
//! 64-bit key: int32 sign-extends, int64 is identity, strings hash through
//! the deterministic fold (collisions over-approximate a range search; the
//! row read behind it keeps results correct).

use std::fmt;
use std::sync::Arc;

use eyre::{Result, WrapErr};

use crate::btree::BPlusTree;
use crate::dm::DataManager;
use crate::encoding::{encode_string, parse_string, read_i32, read_i64, read_u64, str_to_key};
use crate::error::EngineError;
use crate::sql::{CompareOp, Condition};
use crate::tm::SUPER_XID;
use crate::vm::VersionManager;
use crate::{Uid, Xid};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Int32,
    Int64,
    Str,
}

impl FieldType {
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "int32" => Ok(Self::Int32),
            "int64" => Ok(Self::Int64),
            "string" => Ok(Self::Str),
            _ => Err(EngineError::InvalidField)
                .wrap_err_with(|| format!("unknown field type {name:?}")),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::Str => "string",
        }
    }
}

/// A typed field value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Int32(i32),
    Int64(i64),
    Str(String),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int32(v) => write!(f, "{v}"),
            Value::Int64(v) => write!(f, "{v}"),
            Value::Str(s) => write!(f, "{s}"),
        }
    }
}

pub struct Field {
    pub uid: Uid,
    pub name: String,
    pub field_type: FieldType,
    index_root: Uid,
    index: Option<BPlusTree>,
}

impl Field {
    /// Materializes a persisted field, loading its index when one exists.
    pub fn load(vm: &VersionManager, dm: &Arc<DataManager>, uid: Uid) -> Result<Self> {
        let raw = vm
            .read(SUPER_XID, uid)?
            .ok_or(EngineError::FieldNotFound)
            .wrap_err_with(|| format!("field record {uid} is unreadable"))?;

        let (name, consumed) = parse_string(&raw)?;
        let (type_name, type_len) = parse_string(&raw[consumed..])?;
        let field_type = FieldType::parse(&type_name)?;
        let index_root = read_u64(&raw[consumed + type_len..]);

        let index = if index_root != 0 {
            Some(BPlusTree::load(Arc::clone(dm), index_root)?)
        } else {
            None
        };

        Ok(Self {
            uid,
            name,
            field_type,
            index_root,
            index,
        })
    }

    /// Creates and persists a field under `xid`, building its B+ tree when
    /// `indexed`.
    pub fn create(
        vm: &VersionManager,
        dm: &Arc<DataManager>,
        xid: Xid,
        name: &str,
        type_name: &str,
        indexed: bool,
    ) -> Result<Self> {
        let field_type = FieldType::parse(type_name)?;

        let (index_root, index) = if indexed {
            let root = BPlusTree::create(dm)?;
            (root, Some(BPlusTree::load(Arc::clone(dm), root)?))
        } else {
            (0, None)
        };

        let mut raw = encode_string(name);
        raw.extend_from_slice(&encode_string(field_type.name()));
        raw.extend_from_slice(&index_root.to_be_bytes());
        let uid = vm.insert(xid, &raw)?;

        Ok(Self {
            uid,
            name: name.to_owned(),
            field_type,
            index_root,
            index,
        })
    }

    pub fn is_indexed(&self) -> bool {
        self.index.is_some()
    }

    /// Converts a statement literal into this field's value type.
    pub fn value_from_literal(&self, literal: &str) -> Result<Value> {
        match self.field_type {
            FieldType::Int32 => literal
                .parse::<i32>()
                .map(Value::Int32)
                .map_err(|_| EngineError::InvalidValues)
                .wrap_err_with(|| format!("{literal:?} is not an int32")),
            FieldType::Int64 => literal
                .parse::<i64>()
                .map(Value::Int64)
                .map_err(|_| EngineError::InvalidValues)
                .wrap_err_with(|| format!("{literal:?} is not an int64")),
            FieldType::Str => Ok(Value::Str(literal.to_owned())),
        }
    }

    /// Binary encoding of a value of this field's type.
    pub fn value_to_raw(&self, value: &Value) -> Result<Vec<u8>> {
        match (self.field_type, value) {
            (FieldType::Int32, Value::Int32(v)) => Ok(v.to_be_bytes().to_vec()),
            (FieldType::Int64, Value::Int64(v)) => Ok(v.to_be_bytes().to_vec()),
            (FieldType::Str, Value::Str(s)) => Ok(encode_string(s)),
            _ => Err(EngineError::InvalidValues)
                .wrap_err_with(|| format!("value {value} does not match field {}", self.name)),
        }
    }

    /// Decodes one value of this field's type, returning the bytes consumed.
    pub fn parse_value(&self, raw: &[u8]) -> Result<(Value, usize)> {
        match self.field_type {
            FieldType::Int32 => Ok((Value::Int32(read_i32(raw)), 4)),
            FieldType::Int64 => Ok((Value::Int64(read_i64(raw)), 8)),
            FieldType::Str => {
                let (s, consumed) = parse_string(raw)?;
                Ok((Value::Str(s), consumed))
            }
        }
    }

    /// Folds a value into its index key.
    pub fn value_to_key(value: &Value) -> i64 {
        match value {
            Value::Int32(v) => *v as i64,
            Value::Int64(v) => *v,
            Value::Str(s) => str_to_key(s),
        }
    }

    /// Adds `(value, uid)` to this field's index.
    pub fn index_insert(&self, value: &Value, uid: Uid) -> Result<()> {
        let index = self
            .index
            .as_ref()
            .ok_or(EngineError::FieldNotIndexed)
            .wrap_err_with(|| format!("field {} has no index", self.name))?;
        index.insert(Self::value_to_key(value), uid)
    }

    /// Row UIDs whose key falls in `[lo, hi]`.
    pub fn index_search(&self, lo: i64, hi: i64) -> Result<Vec<Uid>> {
        let index = self
            .index
            .as_ref()
            .ok_or(EngineError::FieldNotIndexed)
            .wrap_err_with(|| format!("field {} has no index", self.name))?;
        index.search_range(lo, hi)
    }

    /// Key range selected by one WHERE condition on this field.
    pub fn range_for(&self, cond: &Condition) -> Result<(i64, i64)> {
        let key = Self::value_to_key(&self.value_from_literal(&cond.value)?);
        Ok(match cond.op {
            CompareOp::Eq => (key, key),
            CompareOp::Lt => (0, 0.max(key.saturating_sub(1))),
            CompareOp::Gt => (key.saturating_add(1), i64::MAX),
        })
    }

    /// `(name, type, Index|NoIndex)` - the `show` rendering.
    pub fn describe(&self) -> String {
        format!(
            "({}, {}, {})",
            self.name,
            self.field_type.name(),
            if self.is_indexed() { "Index" } else { "NoIndex" }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_type_names_round_trip() {
        for name in ["int32", "int64", "string"] {
            assert_eq!(FieldType::parse(name).unwrap().name(), name);
        }
        assert!(FieldType::parse("float").is_err());
    }

    #[test]
    fn int32_keys_sign_extend() {
        assert_eq!(Field::value_to_key(&Value::Int32(-5)), -5i64);
        assert_eq!(Field::value_to_key(&Value::Int32(i32::MAX)), i32::MAX as i64);
    }

    #[test]
    fn string_keys_use_the_fold() {
        assert_eq!(
            Field::value_to_key(&Value::Str("abc".into())),
            str_to_key("abc")
        );
    }

    #[test]
    fn display_matches_literal_forms() {
        assert_eq!(Value::Int32(7).to_string(), "7");
        assert_eq!(Value::Int64(-9).to_string(), "-9");
        assert_eq!(Value::Str("x y".into()).to_string(), "x y");
    }
}
