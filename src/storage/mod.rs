//! Storage row model and the bulk-insert contract of the columnar store.

pub mod memory;

pub use memory::{MemTable, MemTableStore};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Cell value in a storage row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int64(i64),
    UInt64(u64),
    Float64(f64),
    String(String),
    /// Nanoseconds since the Unix epoch.
    Timestamp(i64),
    Bytes(Vec<u8>),
    StringArray(Vec<String>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::UInt64(v) => Some(*v),
            Value::Int64(v) => u64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }
}

/// One row addressed by column name.
pub type Row = HashMap<String, Value>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("table {0:?} not found")]
    TableNotFound(String),

    #[error("bulk insert failed: {0}")]
    Insert(String),
}

/// Bulk insertion into the columnar store.
///
/// The call blocks until the rows are accepted or rejected as a whole; the
/// flusher logs failures and drops the rows, it never retries.
pub trait BulkInserter: Send + Sync {
    fn insert(&self, table: &str, rows: Vec<Row>) -> Result<(), StorageError>;
}
