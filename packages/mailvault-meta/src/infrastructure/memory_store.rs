//! In-Memory Backend (for testing)
//!
//! BTreeMap/BTreeSet implementation with the same ordering and atomicity
//! semantics as the SQLite backend. Writes run against a copy of the state
//! that replaces the shared state only on success, so readers never see a
//! half-applied write. NOT for production use: every write copies the state.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;
use std::sync::{Arc, RwLock};

use crate::domain::models::{
    EmittedValues, IndexRow, IndexValue, IndexedField, MessageId, Predicate, Record,
};
use crate::domain::ports::{Backend, FieldRegistry, RecordStore, SecondaryIndex, Transaction};
use crate::error::{Result, StorageError};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    /// id → serialized record envelope
    records: BTreeMap<MessageId, String>,
    /// (field, value, id), mirrors the SQLite primary key
    rows: BTreeSet<(String, IndexValue, MessageId)>,
    /// id → (field, value), mirrors idx_message_index_id
    rows_by_id: BTreeMap<MessageId, BTreeSet<(String, IndexValue)>>,
    /// field → needs_backfill
    registry: BTreeMap<String, bool>,
}

impl MemoryState {
    fn remove_rows_where(&mut self, id: MessageId, keep: impl Fn(&str) -> bool) {
        let Some(entries) = self.rows_by_id.get_mut(&id) else {
            return;
        };
        let removed: Vec<(String, IndexValue)> = entries
            .iter()
            .filter(|(field, _)| !keep(field.as_str()))
            .cloned()
            .collect();
        for (field, value) in removed {
            entries.remove(&(field.clone(), value.clone()));
            self.rows.remove(&(field, value, id));
        }
        if entries.is_empty() {
            self.rows_by_id.remove(&id);
        }
    }

    fn insert_rows(&mut self, id: MessageId, field: &str, values: &[IndexValue]) {
        if values.is_empty() {
            return;
        }
        let entries = self.rows_by_id.entry(id).or_default();
        for value in values {
            entries.insert((field.to_string(), value.clone()));
            self.rows.insert((field.to_string(), value.clone(), id));
        }
    }
}

impl RecordStore for MemoryState {
    fn put(&mut self, id: MessageId, record: &Record) -> Result<()> {
        self.records.insert(id, record.to_blob()?);
        Ok(())
    }

    fn get(&self, id: MessageId) -> Result<Option<Record>> {
        self.records
            .get(&id)
            .map(|blob| Record::from_blob(blob))
            .transpose()
    }

    fn delete(&mut self, id: MessageId) -> Result<bool> {
        Ok(self.records.remove(&id).is_some())
    }

    fn records_after(&self, after: Option<MessageId>, limit: usize) -> Result<Vec<Record>> {
        let lower = after.map_or(Bound::Unbounded, Bound::Excluded);
        self.records
            .range((lower, Bound::Unbounded))
            .take(limit)
            .map(|(_, blob)| Record::from_blob(blob))
            .collect()
    }

    fn record_ids(&self) -> Result<Vec<MessageId>> {
        Ok(self.records.keys().copied().collect())
    }

    fn count_records(&self) -> Result<usize> {
        Ok(self.records.len())
    }
}

impl SecondaryIndex for MemoryState {
    fn replace_rows(&mut self, id: MessageId, values: &EmittedValues) -> Result<()> {
        self.remove_rows_where(id, |_| false);
        for (field, field_values) in values {
            self.insert_rows(id, field, field_values);
        }
        Ok(())
    }

    fn replace_field_rows(&mut self, id: MessageId, field: &str, values: &[IndexValue]) -> Result<()> {
        self.remove_rows_where(id, |f| f != field);
        self.insert_rows(id, field, values);
        Ok(())
    }

    fn delete_rows(&mut self, id: MessageId) -> Result<()> {
        self.remove_rows_where(id, |_| false);
        Ok(())
    }

    fn scan(&self, field: &str, predicate: &Predicate) -> Result<Vec<IndexRow>> {
        let start = (field.to_string(), IndexValue::Integer(i64::MIN), MessageId(i64::MIN));
        Ok(self
            .rows
            .range(start..)
            .take_while(|(f, _, _)| f == field)
            .filter(|(_, value, _)| predicate.matches(value))
            .map(|(f, value, id)| IndexRow {
                id: *id,
                field: f.clone(),
                value: value.clone(),
            })
            .collect())
    }

    fn rows_for(&self, id: MessageId) -> Result<Vec<IndexRow>> {
        Ok(self
            .rows_by_id
            .get(&id)
            .into_iter()
            .flatten()
            .map(|(field, value)| IndexRow {
                id,
                field: field.clone(),
                value: value.clone(),
            })
            .collect())
    }

    fn indexed_ids(&self) -> Result<Vec<MessageId>> {
        Ok(self.rows_by_id.keys().copied().collect())
    }

    fn count_rows(&self) -> Result<usize> {
        Ok(self.rows.len())
    }
}

impl FieldRegistry for MemoryState {
    fn ensure_indexed(&mut self, fields: &[String]) -> Result<Vec<IndexedField>> {
        for field in fields {
            self.registry.entry(field.clone()).or_insert(true);
        }
        self.indexed_fields()
    }

    fn indexed_fields(&self) -> Result<Vec<IndexedField>> {
        Ok(self
            .registry
            .iter()
            .map(|(name, needs_backfill)| IndexedField {
                name: name.clone(),
                needs_backfill: *needs_backfill,
            })
            .collect())
    }

    fn clear_backfill(&mut self, fields: &[String]) -> Result<()> {
        for field in fields {
            if let Some(flag) = self.registry.get_mut(field) {
                *flag = false;
            }
        }
        Ok(())
    }
}

/// In-memory backend
#[derive(Clone, Default)]
pub struct InMemoryBackend {
    state: Arc<RwLock<MemoryState>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Backend for InMemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn read<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&dyn Transaction) -> Result<T>,
    {
        let state = self
            .state
            .read()
            .map_err(|_| StorageError::transaction("In-memory store lock poisoned"))?;
        f(&*state)
    }

    fn write<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut dyn Transaction) -> Result<T>,
    {
        let mut state = self
            .state
            .write()
            .map_err(|_| StorageError::transaction("In-memory store lock poisoned"))?;
        let mut staged = state.clone();
        let out = f(&mut staged)?;
        *state = staged;
        Ok(out)
    }

    fn storage_size_bytes(&self) -> Result<u64> {
        let state = self
            .state
            .read()
            .map_err(|_| StorageError::transaction("In-memory store lock poisoned"))?;
        let records: usize = state.records.values().map(String::len).sum();
        Ok(records as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::FieldValue;

    fn labels(id: i64, items: &[&str]) -> (MessageId, EmittedValues) {
        let mut values = EmittedValues::new();
        values.insert(
            "labels".to_string(),
            items.iter().map(|s| IndexValue::Text(s.to_string())).collect(),
        );
        (MessageId(id), values)
    }

    #[test]
    fn test_replace_rows_drops_previous_version() {
        let backend = InMemoryBackend::new();
        backend
            .write(|txn| {
                let (id, v1) = labels(1, &["a", "b", "c"]);
                txn.replace_rows(id, &v1)?;
                let (id, v2) = labels(1, &["c", "d"]);
                txn.replace_rows(id, &v2)
            })
            .unwrap();

        let rows = backend.read(|txn| txn.rows_for(MessageId(1))).unwrap();
        let values: Vec<_> = rows.into_iter().map(|r| r.value).collect();
        assert_eq!(
            values,
            vec![IndexValue::Text("c".into()), IndexValue::Text("d".into())]
        );
    }

    #[test]
    fn test_failed_write_leaves_state_untouched() {
        let backend = InMemoryBackend::new();
        let result: Result<()> = backend.write(|txn| {
            txn.put(MessageId(9), &Record::new(MessageId(9)))?;
            let (id, values) = labels(9, &["x"]);
            txn.replace_rows(id, &values)?;
            Err(StorageError::database("simulated failure"))
        });
        assert!(result.is_err());

        assert_eq!(backend.read(|txn| txn.count_records()).unwrap(), 0);
        assert_eq!(backend.read(|txn| txn.count_rows()).unwrap(), 0);
    }

    #[test]
    fn test_scan_is_scoped_to_field() {
        let backend = InMemoryBackend::new();
        backend
            .write(|txn| {
                let (id, mut values) = labels(1, &["x"]);
                values.insert("flags".to_string(), vec![IndexValue::Text("x".into())]);
                txn.replace_rows(id, &values)
            })
            .unwrap();

        let rows = backend
            .read(|txn| txn.scan("labels", &Predicate::equals("x")))
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].field, "labels");
    }

    #[test]
    fn test_records_after_pages_by_id() {
        let backend = InMemoryBackend::new();
        backend
            .write(|txn| {
                for id in [5, 1, 3] {
                    let record = Record::new(MessageId(id)).with("n", FieldValue::integer(id));
                    txn.put(MessageId(id), &record)?;
                }
                Ok(())
            })
            .unwrap();

        let first = backend.read(|txn| txn.records_after(None, 2)).unwrap();
        let ids: Vec<_> = first.iter().map(|r| r.id().unwrap()).collect();
        assert_eq!(ids, vec![MessageId(1), MessageId(3)]);

        let rest = backend
            .read(|txn| txn.records_after(Some(MessageId(3)), 2))
            .unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].id().unwrap(), MessageId(5));
    }

    #[test]
    fn test_registry_flag_is_monotone() {
        let backend = InMemoryBackend::new();
        let fields = backend
            .write(|txn| txn.ensure_indexed(&["labels".to_string()]))
            .unwrap();
        assert!(fields[0].needs_backfill);

        backend
            .write(|txn| txn.clear_backfill(&["labels".to_string()]))
            .unwrap();
        let fields = backend
            .write(|txn| txn.ensure_indexed(&["labels".to_string()]))
            .unwrap();
        assert!(!fields[0].needs_backfill);
    }
}
