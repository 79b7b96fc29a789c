//! Storage Ports (Trait Interface)
//!
//! Port/Adapter pattern for backend flexibility:
//! - Durable: SQLite (single file, WAL)
//! - Testing: InMemory (copy-on-write state)
//!
//! The three component ports are only reachable through a [`Transaction`],
//! so a record write and its index rows always commit or roll back together.

use super::models::{EmittedValues, IndexRow, IndexValue, IndexedField, MessageId, Predicate, Record};
use crate::error::Result;

/// Record Store: message id → serialized record
pub trait RecordStore {
    /// Insert or replace the record stored under `id`
    fn put(&mut self, id: MessageId, record: &Record) -> Result<()>;

    /// Stored record, or `None` when absent
    fn get(&self, id: MessageId) -> Result<Option<Record>>;

    /// Remove the record; returns whether one existed
    fn delete(&mut self, id: MessageId) -> Result<bool>;

    /// Up to `limit` records with id > `after`, ordered by id
    fn records_after(&self, after: Option<MessageId>, limit: usize) -> Result<Vec<Record>>;

    /// All stored ids, ascending
    fn record_ids(&self) -> Result<Vec<MessageId>>;

    fn count_records(&self) -> Result<usize>;
}

/// Secondary Index: denormalized (field, value, id) rows
pub trait SecondaryIndex {
    /// Delete every row for `id`, then insert `values`
    fn replace_rows(&mut self, id: MessageId, values: &EmittedValues) -> Result<()>;

    /// Delete the rows for (`id`, `field`), then insert `values`
    fn replace_field_rows(&mut self, id: MessageId, field: &str, values: &[IndexValue]) -> Result<()>;

    fn delete_rows(&mut self, id: MessageId) -> Result<()>;

    /// Rows of `field` whose value satisfies `predicate`, ordered by (value, id)
    fn scan(&self, field: &str, predicate: &Predicate) -> Result<Vec<IndexRow>>;

    /// Every row for `id`, ordered by (field, value)
    fn rows_for(&self, id: MessageId) -> Result<Vec<IndexRow>>;

    /// Distinct ids referenced by any row, ascending
    fn indexed_ids(&self) -> Result<Vec<MessageId>>;

    fn count_rows(&self) -> Result<usize>;
}

/// Index Field Registry: which fields are indexed, and which await backfill
pub trait FieldRegistry {
    /// Register unknown names with `needs_backfill = true`; returns the full list
    fn ensure_indexed(&mut self, fields: &[String]) -> Result<Vec<IndexedField>>;

    /// Registered fields ordered by name
    fn indexed_fields(&self) -> Result<Vec<IndexedField>>;

    /// Mark fields as fully backfilled (never sets the flag)
    fn clear_backfill(&mut self, fields: &[String]) -> Result<()>;
}

/// One open transaction over all three components
pub trait Transaction: RecordStore + SecondaryIndex + FieldRegistry {}

impl<T: RecordStore + SecondaryIndex + FieldRegistry> Transaction for T {}

/// Storage backend
///
/// `write` commits only when the closure returns `Ok`; any error rolls back
/// every change made inside it.
pub trait Backend: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &'static str;

    fn read<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&dyn Transaction) -> Result<T>;

    fn write<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut dyn Transaction) -> Result<T>;

    /// Approximate size of the persisted data
    fn storage_size_bytes(&self) -> Result<u64>;
}

/// Storage Statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreStats {
    /// Total number of stored records
    pub total_records: usize,

    /// Total number of secondary index rows
    pub total_index_rows: usize,

    /// Registered fields
    pub indexed_fields: Vec<IndexedField>,

    /// Total storage size (bytes)
    pub storage_size_bytes: u64,
}

impl StoreStats {
    pub fn pending_fields(&self) -> Vec<&str> {
        self.indexed_fields
            .iter()
            .filter(|f| f.needs_backfill)
            .map(|f| f.name.as_str())
            .collect()
    }
}

/// Backfill Result
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackfillReport {
    /// Fields whose backfill completed in this run
    pub fields: Vec<String>,

    /// Number of records re-derived
    pub records_scanned: usize,

    /// Number of index rows written
    pub rows_written: usize,

    /// Number of batch transactions committed
    pub batches: usize,
}

impl BackfillReport {
    pub fn is_noop(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Index Verification Result
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyReport {
    /// Number of records compared against their rows
    pub records_checked: usize,

    /// Number of index rows compared
    pub rows_checked: usize,

    /// Fields skipped because their backfill is pending
    pub skipped_fields: Vec<String>,
}
