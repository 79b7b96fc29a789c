//! Index value extraction
//!
//! Turns a record's field values into the scalars the secondary index stores.
//! A `Scalar` emits exactly one value (strings are emitted whole); a `List`
//! emits one value per distinct element, in first-seen order.

use std::collections::HashSet;

use super::models::{
    EmittedValues, FieldPredicate, FieldValue, IndexValue, IndexedField, Record,
};

/// Emitted index values for one field value
pub fn emit_values(value: &FieldValue) -> Vec<IndexValue> {
    match value {
        FieldValue::Scalar(scalar) => vec![scalar.index_value()],
        FieldValue::List(items) => {
            let mut seen = HashSet::with_capacity(items.len());
            items
                .iter()
                .map(|item| item.index_value())
                .filter(|value| seen.insert(value.clone()))
                .collect()
        }
    }
}

/// Emitted values for `field`, or `None` when the record does not define it
pub fn extract_field(record: &Record, field: &str) -> Option<Vec<IndexValue>> {
    record.get(field).map(emit_values)
}

/// Emitted values for every registered field the record defines
pub fn extract(record: &Record, registry: &[IndexedField]) -> EmittedValues {
    registry
        .iter()
        .filter_map(|field| {
            extract_field(record, &field.name).map(|values| (field.name.clone(), values))
        })
        .collect()
}

/// Whether the record satisfies every predicate (conjunction)
pub fn record_matches(record: &Record, predicates: &[FieldPredicate]) -> bool {
    predicates.iter().all(|p| {
        extract_field(record, &p.field)
            .map_or(false, |values| values.iter().any(|v| p.predicate.matches(v)))
    })
}
