//! Engine error taxonomy.
//!
//! Every fallible operation returns `eyre::Result`; the typed variants below
//! are raised into the report chain so callers that branch on a specific kind
//! (concurrency conflicts, missing entries, cache pressure) can recover them
//! with `EngineError::of`. IO failures keep their `eyre` context chain and
//! are never matched on.

use std::fmt::Display;

use thiserror::Error;

/// Classified engine failures. Storage variants describe unusable files,
/// logical variants map user mistakes, concurrency variants drive the
/// transaction abort paths.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum EngineError {
    #[error("file already exists")]
    FileExists,
    #[error("file does not exist")]
    FileNotExists,
    #[error("file cannot be read or written")]
    FileCannotRw,
    #[error("bad transaction status file")]
    BadXidFile,
    #[error("bad log file")]
    BadLogFile,
    #[error("cache capacity too small")]
    MemTooSmall,
    #[error("data item exceeds page capacity")]
    DataTooLarge,
    #[error("database is busy")]
    DatabaseBusy,
    #[error("cache is full")]
    CacheFull,

    #[error("invalid command")]
    InvalidCommand,
    #[error("invalid field type")]
    InvalidField,
    #[error("invalid values")]
    InvalidValues,
    #[error("invalid logic operator")]
    InvalidLogOp,
    #[error("field not found")]
    FieldNotFound,
    #[error("field is not indexed")]
    FieldNotIndexed,
    #[error("table not found")]
    TableNotFound,
    #[error("table has no index")]
    TableNoIndex,
    #[error("table already exists")]
    DuplicatedTable,
    #[error("entry does not exist")]
    NullEntry,
    #[error("invalid packet data")]
    InvalidPacket,

    #[error("concurrent update conflict")]
    ConcurrentUpdate,
    #[error("deadlock detected")]
    Deadlock,
    #[error("nested transaction not supported")]
    NestedTransaction,
    #[error("no transaction in progress")]
    NoTransaction,
}

impl EngineError {
    /// Recovers the typed error from a report chain, if one is there.
    pub fn of(report: &eyre::Report) -> Option<EngineError> {
        report.downcast_ref::<EngineError>().copied()
    }
}

/// Terminates the process after an unrecoverable storage failure.
///
/// Used where the on-disk state may no longer match the in-memory state
/// (failed fsync mid-mutation, page write-back failure): unwinding past such
/// a point would let the engine keep serving from a store it can no longer
/// trust.
pub fn fatal(err: impl Display) -> ! {
    tracing::error!("fatal storage error: {err}");
    eprintln!("shaledb: fatal storage error: {err}");
    std::process::exit(1);
}
