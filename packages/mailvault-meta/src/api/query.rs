//! Query Engine
//!
//! Conjunctive queries over the secondary index. Each predicate is a scan of
//! one field; the id sets are intersected smallest-first. `find` then
//! hydrates the matching records lazily, one page per read transaction.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

use super::metadata_store::{ensure_queryable, MetadataStore};
use crate::domain::extraction::record_matches;
use crate::domain::models::{
    fields, Category, Direction, FieldPredicate, FindOptions, IndexValue, MessageId, OrderBy,
    Predicate, Record,
};
use crate::domain::ports::{Backend, Transaction};
use crate::error::Result;

impl<B: Backend> MetadataStore<B> {
    /// Ids of the records matching every predicate
    ///
    /// No predicates selects every stored record. Each predicate field (and
    /// the `OrderBy::Field` field) must be registered and backfilled.
    pub fn find_ids(
        &self,
        predicates: &[FieldPredicate],
        options: &FindOptions,
    ) -> Result<Vec<MessageId>> {
        self.backend
            .read(|txn| resolve_ids(txn, predicates, options))
    }

    /// Lazy cursor over the records matching every predicate
    ///
    /// Ids are resolved when this is called; records are loaded as the
    /// cursor advances. A record removed, or changed so that it no longer
    /// matches, in between is skipped.
    pub fn find(
        &self,
        predicates: &[FieldPredicate],
        options: &FindOptions,
    ) -> Result<RecordCursor<'_, B>> {
        let ids = self.find_ids(predicates, options)?;
        Ok(RecordCursor::new(self, ids, predicates.to_vec()))
    }

    /// Records stored under `location`, by id
    pub fn find_by_location(&self, location: &str) -> Result<RecordCursor<'_, B>> {
        self.find(
            &[FieldPredicate::new(fields::LOCATION, Predicate::equals(location))],
            &FindOptions::default(),
        )
    }

    /// Records of `category` with `internal_date >= since`, oldest first
    pub fn find_by_category_since(
        &self,
        category: Category,
        since: DateTime<Utc>,
    ) -> Result<RecordCursor<'_, B>> {
        self.find(
            &[
                FieldPredicate::new(fields::CATEGORY, Predicate::equals(category.as_str())),
                FieldPredicate::new(fields::INTERNAL_DATE, Predicate::at_least(since)),
            ],
            &FindOptions::default().order_by(OrderBy::Field {
                field: fields::INTERNAL_DATE.to_string(),
                direction: Direction::Asc,
            }),
        )
    }

    /// Records carrying `label`, by id
    pub fn find_by_label(&self, label: &str) -> Result<RecordCursor<'_, B>> {
        self.find(
            &[FieldPredicate::new(fields::LABELS, Predicate::equals(label))],
            &FindOptions::default(),
        )
    }
}

fn resolve_ids(
    txn: &dyn Transaction,
    predicates: &[FieldPredicate],
    options: &FindOptions,
) -> Result<Vec<MessageId>> {
    for p in predicates {
        ensure_queryable(txn, &p.field)?;
    }
    if let OrderBy::Field { field, .. } = &options.order_by {
        ensure_queryable(txn, field)?;
    }

    let matched: BTreeSet<MessageId> = if predicates.is_empty() {
        txn.record_ids()?.into_iter().collect()
    } else {
        let mut sets = predicates
            .iter()
            .map(|p| {
                txn.scan(&p.field, &p.predicate)
                    .map(|rows| rows.into_iter().map(|r| r.id).collect::<BTreeSet<_>>())
            })
            .collect::<Result<Vec<_>>>()?;
        sets.sort_by_key(BTreeSet::len);

        let mut sets = sets.into_iter();
        let first = sets.next().unwrap_or_default();
        sets.fold(first, |acc, set| acc.intersection(&set).copied().collect())
    };

    let mut ids: Vec<MessageId> = match &options.order_by {
        OrderBy::Id(Direction::Asc) => matched.into_iter().collect(),
        OrderBy::Id(Direction::Desc) => matched.into_iter().rev().collect(),
        OrderBy::Field { field, direction } => order_by_field(txn, matched, field, *direction)?,
    };

    if let Some(limit) = options.limit {
        ids.truncate(limit);
    }
    Ok(ids)
}

/// Sort by each record's smallest value of `field`; records without one go
/// last, ties by id ascending
fn order_by_field(
    txn: &dyn Transaction,
    ids: BTreeSet<MessageId>,
    field: &str,
    direction: Direction,
) -> Result<Vec<MessageId>> {
    // Rows arrive ordered by value, so the first row seen per id is its minimum.
    let mut keys: BTreeMap<MessageId, IndexValue> = BTreeMap::new();
    for row in txn.scan(field, &Predicate::any())? {
        if ids.contains(&row.id) {
            keys.entry(row.id).or_insert(row.value);
        }
    }

    let (mut keyed, unkeyed): (Vec<MessageId>, Vec<MessageId>) =
        ids.into_iter().partition(|id| keys.contains_key(id));

    keyed.sort_by(|a, b| {
        let order = keys[a].cmp(&keys[b]);
        let order = match direction {
            Direction::Asc => order,
            Direction::Desc => order.reverse(),
        };
        order.then(a.cmp(b))
    });
    keyed.extend(unkeyed);
    Ok(keyed)
}

/// Lazy, single-pass iterator over query results
///
/// Yields `Err` once if a page fails to load, then ends.
pub struct RecordCursor<'a, B: Backend> {
    store: &'a MetadataStore<B>,
    ids: Vec<MessageId>,
    position: usize,
    page: VecDeque<Record>,
    predicates: Vec<FieldPredicate>,
    failed: bool,
}

impl<'a, B: Backend> RecordCursor<'a, B> {
    fn new(store: &'a MetadataStore<B>, ids: Vec<MessageId>, predicates: Vec<FieldPredicate>) -> Self {
        Self {
            store,
            ids,
            position: 0,
            page: VecDeque::new(),
            predicates,
            failed: false,
        }
    }

    /// Ids resolved when the query ran, in result order
    pub fn ids(&self) -> &[MessageId] {
        &self.ids
    }

    fn load_page(&mut self) -> Result<()> {
        let end = (self.position + self.store.config.query.page_size).min(self.ids.len());
        let chunk = &self.ids[self.position..end];
        let predicates = &self.predicates;

        let records = self.store.backend.read(|txn| {
            let mut records = Vec::with_capacity(chunk.len());
            for id in chunk {
                if let Some(record) = txn.get(*id)? {
                    if record_matches(&record, predicates) {
                        records.push(record);
                    }
                }
            }
            Ok(records)
        })?;

        self.position = end;
        self.page.extend(records);
        Ok(())
    }
}

impl<B: Backend> Iterator for RecordCursor<'_, B> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(record) = self.page.pop_front() {
                return Some(Ok(record));
            }
            if self.failed || self.position >= self.ids.len() {
                return None;
            }
            if let Err(e) = self.load_page() {
                self.failed = true;
                return Some(Err(e));
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let upper = if self.failed {
            self.page.len()
        } else {
            self.page.len() + self.ids.len() - self.position
        };
        (0, Some(upper))
    }
}
