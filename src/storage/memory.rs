//! In-memory table store standing in for the columnar backend.

use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;

use super::{BulkInserter, Row, StorageError};

/// Append-only table of rows.
#[derive(Debug, Default)]
pub struct MemTable {
    rows: RwLock<Vec<Row>>,
}

impl MemTable {
    pub fn row_count(&self) -> usize {
        self.rows.read().len()
    }

    /// Snapshot of all rows, in insertion order.
    pub fn rows(&self) -> Vec<Row> {
        self.rows.read().clone()
    }

    fn append(&self, rows: Vec<Row>) {
        self.rows.write().extend(rows);
    }
}

/// Table store keyed by name; tables are created on first insert.
#[derive(Debug, Default)]
pub struct MemTableStore {
    tables: DashMap<String, Arc<MemTable>>,
}

impl MemTableStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create_table(&self, name: &str) -> Arc<MemTable> {
        if let Some(table) = self.tables.get(name) {
            return Arc::clone(&table);
        }
        let table = Arc::new(MemTable::default());
        self.tables.insert(name.to_string(), Arc::clone(&table));
        table
    }

    pub fn get_table(&self, name: &str) -> Option<Arc<MemTable>> {
        self.tables.get(name).map(|t| Arc::clone(&t))
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables.iter().map(|e| e.key().clone()).collect()
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.get_table(table).map(|t| t.row_count()).unwrap_or(0)
    }
}

impl BulkInserter for MemTableStore {
    fn insert(&self, table: &str, rows: Vec<Row>) -> Result<(), StorageError> {
        self.get_or_create_table(table).append(rows);
        Ok(())
    }
}
