//! Parsed statement records.
//!
//! The parser reduces the line-oriented SQL surface to these plain records;
//! the executor and catalog consume them without ever re-examining source
//! text. Values stay as raw token strings here - the catalog converts them
//! against the field types of the target table.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    Begin(Begin),
    Commit,
    Abort,
    Show,
    Create(Create),
    Drop(Drop),
    Select(Select),
    Insert(Insert),
    Update(Update),
    Delete(Delete),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Begin {
    pub repeatable_read: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    pub name: String,
    pub type_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Create {
    pub table: String,
    pub fields: Vec<FieldDef>,
    /// Field names listed in the `(index ...)` clause.
    pub indexed: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Drop {
    pub table: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Select {
    pub table: String,
    /// Either `["*"]` or explicit field names.
    pub fields: Vec<String>,
    pub where_clause: Option<Where>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Insert {
    pub table: String,
    pub values: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Update {
    pub table: String,
    pub field: String,
    pub value: String,
    pub where_clause: Option<Where>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delete {
    pub table: String,
    pub where_clause: Option<Where>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Lt,
    Eq,
    Gt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicOp {
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    pub field: String,
    pub op: CompareOp,
    pub value: String,
}

/// A WHERE clause: one condition, optionally joined with a second. Both
/// conditions must name the same (indexed) field; the catalog enforces
/// that.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Where {
    pub first: Condition,
    pub rest: Option<(LogicOp, Condition)>,
}
