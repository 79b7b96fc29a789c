//! MetadataStore - indexing pipeline
//!
//! Owns a [`Backend`] and keeps the secondary index in lockstep with the
//! record store:
//! 1. `bury` / `bury_many`: derive placement, store record, replace rows
//! 2. `remove`: delete record and rows
//! 3. `ensure_indexed` + `backfill_pending`: index a field retroactively
//! 4. `verify_index` / `rebuild_index`: detect and repair divergence
//!
//! Every mutation of one logical record runs in a single write transaction.

use std::collections::BTreeSet;
use tracing::{debug, error, info, warn};

use crate::config::StoreConfig;
use crate::domain::extraction::{extract, extract_field};
use crate::domain::models::{
    IndexRow, IndexValue, IndexedField, MailMetadata, MessageId, Placement, Predicate, Record,
};
use crate::domain::placement;
use crate::domain::ports::{Backend, BackfillReport, StoreStats, Transaction, VerifyReport};
use crate::error::{Result, StorageError};
use crate::infrastructure::InMemoryBackend;
#[cfg(feature = "sqlite")]
use crate::infrastructure::SqliteBackend;

/// Metadata store handle
///
/// Opened once and passed explicitly; dropping it closes the backend.
///
/// # Examples
///
/// ```rust
/// use mailvault_meta::{MetadataStore, Placement, Predicate};
/// use mailvault_meta::domain::{FieldValue, MessageId, Record};
///
/// let store = MetadataStore::in_memory().unwrap();
/// let record = Record::new(MessageId(1412679471642059988))
///     .with("labels", FieldValue::text_list(["\\Inbox", "Perso/Foo"]));
///
/// store.bury(record, &Placement::new("2012-09")).unwrap();
///
/// let rows = store.scan("labels", &Predicate::equals("Perso/Foo")).unwrap();
/// assert_eq!(rows.len(), 1);
/// ```
pub struct MetadataStore<B: Backend> {
    pub(super) backend: B,
    pub(super) config: StoreConfig,
}

impl MetadataStore<InMemoryBackend> {
    /// Ephemeral store with default configuration
    pub fn in_memory() -> Result<Self> {
        Self::with_backend(InMemoryBackend::new(), StoreConfig::default())
    }
}

#[cfg(feature = "sqlite")]
impl MetadataStore<SqliteBackend> {
    /// Open the SQLite store described by `config`
    pub fn open(config: StoreConfig) -> Result<Self> {
        config.validate()?;
        let backend = SqliteBackend::open(&config.database)?;
        Self::with_backend(backend, config)
    }

    /// Open the SQLite file at `path` with default settings
    pub fn open_path(path: impl Into<std::path::PathBuf>) -> Result<Self> {
        Self::open(StoreConfig::at_path(path))
    }
}

impl<B: Backend> MetadataStore<B> {
    /// Wrap an opened backend
    ///
    /// Registers `index.fields` and, with `index.backfill_on_open`, completes
    /// any pending backfill before returning.
    pub fn with_backend(backend: B, config: StoreConfig) -> Result<Self> {
        config.validate()?;
        let store = Self { backend, config };

        if !store.config.index.fields.is_empty() {
            store.ensure_indexed(store.config.index.fields.clone())?;
        }
        if store.config.index.backfill_on_open {
            store.backfill_pending()?;
        }

        debug!(backend = store.backend.name(), "Metadata store ready");
        Ok(store)
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Ingestion
    // ═══════════════════════════════════════════════════════════════════════

    /// Store `record` under its `id`, replacing any previous version
    ///
    /// `category` and `location` are derived from `placement` and overwrite
    /// any caller-supplied values. A malformed record leaves the store
    /// unchanged.
    pub fn bury(&self, record: Record, placement: &Placement) -> Result<MessageId> {
        let (id, record) = self.prepare(record, placement)?;
        let rows = self
            .backend
            .write(|txn| store_prepared(txn, id, &record))?;

        debug!(
            id = %id,
            location = record.location().unwrap_or_default(),
            rows,
            "Buried message"
        );
        Ok(id)
    }

    pub fn bury_metadata(&self, metadata: MailMetadata, placement: &Placement) -> Result<MessageId> {
        self.bury(metadata.into_record()?, placement)
    }

    /// Store several records in one transaction
    ///
    /// Every record is validated first; if any is malformed nothing is
    /// written.
    pub fn bury_many<I>(&self, items: I) -> Result<Vec<MessageId>>
    where
        I: IntoIterator<Item = (Record, Placement)>,
    {
        let prepared = items
            .into_iter()
            .map(|(record, placement)| self.prepare(record, &placement))
            .collect::<Result<Vec<_>>>()?;

        let rows = self.backend.write(|txn| {
            let mut rows = 0;
            for (id, record) in &prepared {
                rows += store_prepared(txn, *id, record)?;
            }
            Ok(rows)
        })?;

        info!(records = prepared.len(), rows, "Buried batch");
        Ok(prepared.into_iter().map(|(id, _)| id).collect())
    }

    fn prepare(&self, mut record: Record, placement: &Placement) -> Result<(MessageId, Record)> {
        let id = record.id()?;
        let derived = placement::derive(&record, placement, &self.config.placement.chat_area)?;
        placement::apply(&mut record, &derived);
        Ok((id, record))
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Retrieval & removal
    // ═══════════════════════════════════════════════════════════════════════

    /// Stored record for `id`; `NotFound` when absent
    pub fn unbury(&self, id: MessageId) -> Result<Record> {
        self.backend
            .read(|txn| txn.get(id))?
            .ok_or_else(|| StorageError::not_found(id))
    }

    pub fn contains(&self, id: MessageId) -> Result<bool> {
        Ok(self.backend.read(|txn| txn.get(id))?.is_some())
    }

    /// Storage-area path of a stored message; `NotFound` when absent
    pub fn location_of(&self, id: MessageId) -> Result<String> {
        let record = self.unbury(id)?;
        record
            .location()
            .map(str::to_string)
            .ok_or_else(|| StorageError::malformed(format!("Message {} has no location", id)))
    }

    /// Delete a record and all its index rows; returns whether it existed
    pub fn remove(&self, id: MessageId) -> Result<bool> {
        let existed = self.backend.write(|txn| {
            let existed = txn.delete(id)?;
            txn.delete_rows(id)?;
            Ok(existed)
        })?;

        if existed {
            debug!(id = %id, "Removed message");
        } else {
            debug!(id = %id, "Remove of absent message");
        }
        Ok(existed)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Field registry
    // ═══════════════════════════════════════════════════════════════════════

    /// Register fields for indexing
    ///
    /// New names start with `needs_backfill = true` and become queryable once
    /// `backfill_pending` completes. Already-registered names are untouched.
    pub fn ensure_indexed<I, S>(&self, fields: I) -> Result<Vec<IndexedField>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = fields.into_iter().map(Into::into).collect();
        if let Some(bad) = names.iter().find(|n| n.trim().is_empty()) {
            return Err(StorageError::malformed(format!(
                "Invalid index field name {:?}",
                bad
            )));
        }

        let registry = self.backend.write(|txn| txn.ensure_indexed(&names))?;
        let pending: Vec<&str> = registry
            .iter()
            .filter(|f| f.needs_backfill && names.contains(&f.name))
            .map(|f| f.name.as_str())
            .collect();
        if !pending.is_empty() {
            info!(fields = ?pending, "Fields registered, awaiting backfill");
        }
        Ok(registry)
    }

    pub fn indexed_fields(&self) -> Result<Vec<IndexedField>> {
        self.backend.read(|txn| txn.indexed_fields())
    }

    /// Raw index rows of `field` matching `predicate`, ordered by (value, id)
    pub fn scan(&self, field: &str, predicate: &Predicate) -> Result<Vec<IndexRow>> {
        self.backend.read(|txn| {
            ensure_queryable(txn, field)?;
            txn.scan(field, predicate)
        })
    }

    /// Index pending fields for every stored record
    ///
    /// Processes records in id order, `index.backfill_batch_size` per
    /// transaction. Rows for each (record, field) are replaced rather than
    /// appended, so an interrupted run can simply be restarted. Flags are
    /// cleared only after the last batch commits.
    pub fn backfill_pending(&self) -> Result<BackfillReport> {
        let pending: Vec<String> = self
            .indexed_fields()?
            .into_iter()
            .filter(|f| f.needs_backfill)
            .map(|f| f.name)
            .collect();

        if pending.is_empty() {
            debug!("No pending backfill");
            return Ok(BackfillReport::default());
        }

        info!(fields = ?pending, "Starting backfill");
        let batch_size = self.config.index.backfill_batch_size;
        let mut report = BackfillReport::default();
        let mut cursor: Option<MessageId> = None;

        loop {
            let (last, scanned, written) = self.backend.write(|txn| {
                let records = txn.records_after(cursor, batch_size)?;
                let mut written = 0;
                for record in &records {
                    let id = record.id()?;
                    for field in &pending {
                        let values = extract_field(record, field).unwrap_or_default();
                        written += values.len();
                        txn.replace_field_rows(id, field, &values)?;
                    }
                }
                let last = records.last().map(Record::id).transpose()?;
                Ok((last, records.len(), written))
            })?;

            if scanned == 0 {
                break;
            }
            report.batches += 1;
            report.records_scanned += scanned;
            report.rows_written += written;
            debug!(
                batch = report.batches,
                records = report.records_scanned,
                "Backfill batch committed"
            );

            cursor = last;
            if scanned < batch_size {
                break;
            }
        }

        self.backend.write(|txn| txn.clear_backfill(&pending))?;
        report.fields = pending;

        info!(
            fields = ?report.fields,
            records = report.records_scanned,
            rows = report.rows_written,
            batches = report.batches,
            "Backfill complete"
        );
        Ok(report)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Consistency
    // ═══════════════════════════════════════════════════════════════════════

    /// Compare every stored record against its index rows
    ///
    /// Fields still awaiting backfill are skipped. Any difference, including
    /// rows that reference a missing record, is an `IndexInconsistency`
    /// error; nothing is repaired.
    pub fn verify_index(&self) -> Result<VerifyReport> {
        let registry = self.indexed_fields()?;
        let (active, skipped): (Vec<IndexedField>, Vec<IndexedField>) =
            registry.into_iter().partition(|f| !f.needs_backfill);

        let mut report = VerifyReport {
            skipped_fields: skipped.into_iter().map(|f| f.name).collect(),
            ..Default::default()
        };
        if !report.skipped_fields.is_empty() {
            warn!(fields = ?report.skipped_fields, "Skipping fields awaiting backfill");
        }

        let batch_size = self.config.index.backfill_batch_size;
        let mut cursor: Option<MessageId> = None;

        loop {
            let skipped_fields = &report.skipped_fields;
            let (last, scanned, rows) = self.backend.read(|txn| {
                let records = txn.records_after(cursor, batch_size)?;
                let mut rows = 0;
                for record in &records {
                    rows += verify_record(txn, record, &active, skipped_fields)?;
                }
                let last = records.last().map(Record::id).transpose()?;
                Ok((last, records.len(), rows))
            })?;

            report.records_checked += scanned;
            report.rows_checked += rows;
            cursor = last;
            if scanned < batch_size {
                break;
            }
        }

        self.backend.read(|txn| {
            let stored: BTreeSet<MessageId> = txn.record_ids()?.into_iter().collect();
            match txn.indexed_ids()?.into_iter().find(|id| !stored.contains(id)) {
                Some(orphan) => {
                    error!(id = %orphan, "Index rows reference a missing message");
                    Err(StorageError::inconsistency(format!(
                        "Index rows reference missing message {}",
                        orphan
                    )))
                }
                None => Ok(()),
            }
        })?;

        info!(
            records = report.records_checked,
            rows = report.rows_checked,
            "Index verified"
        );
        Ok(report)
    }

    /// Rebuild every index row from the record store
    ///
    /// Operator action after an `IndexInconsistency`. Runs in batches like
    /// backfill, then drops rows of missing records and clears the backfill
    /// flags of the fields it covered. Returns the number of records
    /// re-indexed.
    pub fn rebuild_index(&self) -> Result<usize> {
        let registry = self.indexed_fields()?;
        warn!(fields = registry.len(), "Rebuilding secondary index");

        let batch_size = self.config.index.backfill_batch_size;
        let mut cursor: Option<MessageId> = None;
        let mut reindexed = 0;

        loop {
            let (last, scanned) = self.backend.write(|txn| {
                let records = txn.records_after(cursor, batch_size)?;
                for record in &records {
                    txn.replace_rows(record.id()?, &extract(record, &registry))?;
                }
                let last = records.last().map(Record::id).transpose()?;
                Ok((last, records.len()))
            })?;

            reindexed += scanned;
            cursor = last;
            if scanned < batch_size {
                break;
            }
        }

        let covered: Vec<String> = registry
            .iter()
            .filter(|f| f.needs_backfill)
            .map(|f| f.name.clone())
            .collect();
        let orphans = self.backend.write(|txn| {
            let stored: BTreeSet<MessageId> = txn.record_ids()?.into_iter().collect();
            let mut orphans = 0;
            for id in txn.indexed_ids()? {
                if !stored.contains(&id) {
                    txn.delete_rows(id)?;
                    orphans += 1;
                }
            }
            txn.clear_backfill(&covered)?;
            Ok(orphans)
        })?;

        info!(records = reindexed, orphans, "Secondary index rebuilt");
        Ok(reindexed)
    }

    pub fn stats(&self) -> Result<StoreStats> {
        let (total_records, total_index_rows, indexed_fields) = self.backend.read(|txn| {
            Ok((txn.count_records()?, txn.count_rows()?, txn.indexed_fields()?))
        })?;

        Ok(StoreStats {
            total_records,
            total_index_rows,
            indexed_fields,
            storage_size_bytes: self.backend.storage_size_bytes()?,
        })
    }
}

/// Put a prepared record and replace its rows; returns the row count
fn store_prepared(txn: &mut dyn Transaction, id: MessageId, record: &Record) -> Result<usize> {
    let registry = txn.indexed_fields()?;
    let values = extract(record, &registry);
    txn.put(id, record)?;
    txn.replace_rows(id, &values)?;
    Ok(values.values().map(Vec::len).sum())
}

/// Fail unless `field` is registered and fully backfilled
pub(super) fn ensure_queryable(txn: &dyn Transaction, field: &str) -> Result<()> {
    match txn.indexed_fields()?.into_iter().find(|f| f.name == field) {
        None => Err(StorageError::unindexed_field(field)),
        Some(f) if f.needs_backfill => Err(StorageError::backfill_pending(field)),
        Some(_) => Ok(()),
    }
}

/// Check one record's rows; returns the number of rows compared
fn verify_record(
    txn: &dyn Transaction,
    record: &Record,
    active: &[IndexedField],
    skipped: &[String],
) -> Result<usize> {
    let id = record.id()?;

    let expected: BTreeSet<(String, IndexValue)> = extract(record, active)
        .into_iter()
        .flat_map(|(field, values)| values.into_iter().map(move |v| (field.clone(), v)))
        .collect();
    let stored: BTreeSet<(String, IndexValue)> = txn
        .rows_for(id)?
        .into_iter()
        .filter(|row| !skipped.contains(&row.field))
        .map(|row| (row.field, row.value))
        .collect();

    if expected != stored {
        let missing = expected.difference(&stored).count();
        let unexpected = stored.difference(&expected).count();
        error!(id = %id, missing, unexpected, "Index diverged from record");
        return Err(StorageError::inconsistency(format!(
            "Message {}: {} index rows missing, {} unexpected",
            id, missing, unexpected
        )));
    }
    Ok(stored.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{fields, FieldValue};
    use crate::error::ErrorKind;
    use chrono::DateTime;

    fn store() -> MetadataStore<InMemoryBackend> {
        MetadataStore::in_memory().unwrap()
    }

    fn message(id: i64, labels: &[&str]) -> Record {
        Record::new(MessageId(id))
            .with(fields::LABELS, FieldValue::text_list(labels.iter().copied()))
            .with(
                fields::INTERNAL_DATE,
                FieldValue::timestamp(DateTime::from_timestamp(1347243329, 0).unwrap()),
            )
    }

    #[test]
    fn test_bury_derives_placement() {
        let store = store();
        let id = store.bury(message(1, &["a"]), &Placement::new("chats")).unwrap();

        let record = store.unbury(id).unwrap();
        assert_eq!(record.text(fields::CATEGORY), Some("chat"));
        assert_eq!(store.location_of(id).unwrap(), "chats/2012-09");
    }

    #[test]
    fn test_malformed_record_leaves_store_unchanged() {
        let store = store();
        let err = store
            .bury(Record::default(), &Placement::new("2012-09"))
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::MalformedRecord);
        assert_eq!(store.stats().unwrap().total_records, 0);
    }

    #[test]
    fn test_bury_many_is_all_or_nothing() {
        let store = store();
        let items = vec![
            (message(1, &["a"]), Placement::new("2012-09")),
            (Record::new(MessageId(2)), Placement::new("")),
        ];
        let err = store.bury_many(items).unwrap_err();
        assert_eq!(err.kind, ErrorKind::MalformedRecord);
        assert!(!store.contains(MessageId(1)).unwrap());
    }

    #[test]
    fn test_remove_absent_is_not_an_error() {
        let store = store();
        assert!(!store.remove(MessageId(404)).unwrap());
        assert!(store.unbury(MessageId(404)).unwrap_err().is_not_found());
        assert!(store.location_of(MessageId(404)).unwrap_err().is_not_found());
    }

    #[test]
    fn test_ensure_indexed_rejects_blank_names() {
        let store = store();
        let err = store.ensure_indexed(["  "]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::MalformedRecord);
    }

    #[test]
    fn test_scan_requires_registered_field() {
        let store = store();
        let err = store.scan("subject", &Predicate::any()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnindexedField);
    }

    #[test]
    fn test_verify_detects_missing_rows() {
        let store = store();
        store.bury(message(1, &["a", "b"]), &Placement::new("2012-09")).unwrap();
        store.verify_index().unwrap();

        store
            .backend()
            .write(|txn| {
                txn.replace_field_rows(MessageId(1), fields::LABELS, &[IndexValue::Text("a".into())])
            })
            .unwrap();

        let err = store.verify_index().unwrap_err();
        assert_eq!(err.kind, ErrorKind::IndexInconsistency);
        assert!(err.kind.is_fatal());

        assert_eq!(store.rebuild_index().unwrap(), 1);
        store.verify_index().unwrap();
    }

    #[test]
    fn test_verify_detects_orphan_rows() {
        let store = store();
        store.bury(message(1, &["a"]), &Placement::new("2012-09")).unwrap();
        store
            .backend()
            .write(|txn| txn.delete(MessageId(1)))
            .unwrap();

        let err = store.verify_index().unwrap_err();
        assert_eq!(err.kind, ErrorKind::IndexInconsistency);

        store.rebuild_index().unwrap();
        assert_eq!(store.stats().unwrap().total_index_rows, 0);
    }
}
