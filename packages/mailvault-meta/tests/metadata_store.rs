//! Pipeline and query behaviour, run against every backend

mod common;

use chrono::DateTime;
use common::*;
use mailvault_meta::domain::fields;
use mailvault_meta::{
    Backend, Category, ErrorKind, FieldPredicate, FieldValue, FindOptions, IndexValue, MessageId,
    MetadataStore, Placement, Predicate, Record, Scalar, StorageError,
};
use pretty_assertions::assert_eq;

fn label_rows<B: Backend>(store: &MetadataStore<B>, id: MessageId) -> Vec<IndexValue> {
    store
        .backend()
        .read(|txn| txn.rows_for(id))
        .unwrap()
        .into_iter()
        .filter(|row| row.field == fields::LABELS)
        .map(|row| row.value)
        .collect()
}

fn roundtrip<B: Backend>(store: MetadataStore<B>) {
    let expected = first_message().into_record().unwrap();
    let id = store
        .bury_metadata(first_message(), &Placement::new(""))
        .unwrap();
    assert_eq!(id, MessageId(FIRST_ID));

    let stored = store.unbury(id).unwrap();
    assert_eq!(stored.without_derived(), expected);
    assert_eq!(stored.category(), Some(Category::Email));
    assert_eq!(store.location_of(id).unwrap(), "2012-09");

    // An unburied record can be buried again unchanged.
    store.bury(stored.clone(), &Placement::new("2012-09")).unwrap();
    assert_eq!(store.unbury(id).unwrap(), stored);
}

fn sub_second_dates_roundtrip<B: Backend>(store: MetadataStore<B>) {
    let precise = DateTime::from_timestamp(1347243329, 500_000_000).unwrap();
    let record = Record::new(MessageId(1))
        .with(fields::INTERNAL_DATE, FieldValue::timestamp(precise))
        .with("seen_at", FieldValue::Scalar(Scalar::Timestamp(precise)));

    store.bury(record.clone(), &Placement::new("2012-09")).unwrap();

    let stored = store.unbury(MessageId(1)).unwrap();
    assert_eq!(stored.without_derived(), record);
    assert_eq!(
        stored.timestamp(fields::INTERNAL_DATE),
        DateTime::from_timestamp(1347243329, 0)
    );
    store.verify_index().unwrap();
}

fn index_completeness<B: Backend>(store: MetadataStore<B>) {
    let id = store
        .bury_metadata(first_message(), &Placement::new("2012-09"))
        .unwrap();

    for label in ["\\Inbox", "\\Important", "Perso/Foo"] {
        assert_eq!(ids_where(&store, fields::LABELS, label), vec![id], "{}", label);
    }
    assert!(ids_where(&store, fields::LABELS, "Test").is_empty());

    let by_thread = store
        .scan(fields::THREAD_ID, &Predicate::equals(1412630003922319997_i64))
        .unwrap();
    assert_eq!(by_thread.len(), 1);

    let date = DateTime::from_timestamp(1347243329, 0).unwrap();
    let by_date = store
        .scan(fields::INTERNAL_DATE, &Predicate::equals(date))
        .unwrap();
    assert_eq!(by_date[0].id, id);

    // Exactly the emitted values, nothing else.
    let mut labels = label_rows(&store, id);
    labels.sort();
    assert_eq!(
        labels,
        vec![
            IndexValue::Text("Perso/Foo".into()),
            IndexValue::Text("\\Important".into()),
            IndexValue::Text("\\Inbox".into()),
        ]
    );
    store.verify_index().unwrap();
}

fn exclusivity_on_replace<B: Backend>(store: MetadataStore<B>) {
    let id = store
        .bury_metadata(first_message(), &Placement::new("2012-09"))
        .unwrap();
    store
        .bury_metadata(first_message_updated(), &Placement::new("2012-09"))
        .unwrap();

    assert_eq!(ids_where(&store, fields::LABELS, "Added"), vec![id]);
    assert_eq!(ids_where(&store, fields::LABELS, "Perso/Foo"), vec![id]);
    assert_eq!(label_rows(&store, id).len(), 4);

    // Shrinking the label set drops the stale rows.
    let mut shrunk = first_message();
    shrunk.labels = vec!["Test".to_string()];
    store.bury_metadata(shrunk, &Placement::new("2012-09")).unwrap();

    assert!(ids_where(&store, fields::LABELS, "Added").is_empty());
    assert_eq!(label_rows(&store, id), vec![IndexValue::Text("Test".into())]);
    assert_eq!(store.stats().unwrap().total_records, 1);
}

fn deletion_completeness<B: Backend>(store: MetadataStore<B>) {
    let first = store
        .bury_metadata(first_message(), &Placement::new("2012-09"))
        .unwrap();
    let second = store
        .bury_metadata(second_message(), &Placement::new("2012-09"))
        .unwrap();

    assert!(store.remove(first).unwrap());
    assert!(store.unbury(first).unwrap_err().is_not_found());
    assert!(!store.contains(first).unwrap());
    assert!(store.backend().read(|txn| txn.rows_for(first)).unwrap().is_empty());

    for field in [fields::LABELS, fields::LOCATION, fields::CATEGORY] {
        let rows = store.scan(field, &Predicate::any()).unwrap();
        assert!(rows.iter().all(|row| row.id == second), "{}", field);
    }
    assert_eq!(ids_where(&store, fields::LABELS, "\\Inbox"), vec![second]);
    store.verify_index().unwrap();
}

fn failed_write_is_atomic<B: Backend>(store: MetadataStore<B>) {
    let id = store
        .bury_metadata(first_message(), &Placement::new("2012-09"))
        .unwrap();
    let before = store.stats().unwrap();

    let replacement = Record::new(id).with(fields::LABELS, FieldValue::text_list(["Other"]));
    let result: mailvault_meta::Result<()> = store.backend().write(|txn| {
        txn.put(id, &replacement)?;
        txn.delete_rows(id)?;
        Err(StorageError::database("disk full"))
    });
    assert_eq!(result.unwrap_err().kind, ErrorKind::Database);

    let after = store.stats().unwrap();
    assert_eq!(after.total_records, before.total_records);
    assert_eq!(after.total_index_rows, before.total_index_rows);
    assert_eq!(label_rows(&store, id).len(), 3);
    assert!(store.unbury(id).unwrap().text(fields::SUBJECT).is_some());
    store.verify_index().unwrap();
}

fn strings_are_never_decomposed<B: Backend>(store: MetadataStore<B>) {
    let id = store
        .bury_metadata(first_message(), &Placement::new("2012-09"))
        .unwrap();
    store.ensure_indexed([fields::SUBJECT]).unwrap();
    store.backfill_pending().unwrap();

    let rows = store.scan(fields::SUBJECT, &Predicate::any()).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(ids_where(&store, fields::SUBJECT, "Re: some subject\r"), vec![id]);
    assert!(ids_where(&store, fields::SUBJECT, "R").is_empty());
}

fn category_and_location_queries<B: Backend>(store: MetadataStore<B>) {
    store
        .bury_metadata(first_message(), &Placement::new("chats"))
        .unwrap();
    store
        .bury_metadata(second_message(), &Placement::new("2012-09"))
        .unwrap();

    let since = DateTime::from_timestamp(1347243000, 0).unwrap();
    let chats: Vec<Record> = store
        .find_by_category_since(Category::Chat, since)
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(chats.len(), 1);
    assert_eq!(chats[0].location(), Some("chats/2012-09"));

    let emails: Vec<Record> = store
        .find_by_location("2012-09")
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(emails.len(), 1);
    assert_eq!(emails[0].id().unwrap(), MessageId(SECOND_ID));

    let later = DateTime::from_timestamp(1347243329, 0).unwrap();
    assert_eq!(
        store
            .find_by_category_since(Category::Email, later)
            .unwrap()
            .count(),
        0
    );
}

fn ids_in<B: Backend>(store: &MetadataStore<B>, predicate: Predicate) -> Vec<MessageId> {
    store
        .find_ids(&[FieldPredicate::new("size", predicate)], &FindOptions::default())
        .unwrap()
}

fn ids(raw: &[i64]) -> Vec<MessageId> {
    raw.iter().copied().map(MessageId).collect()
}

fn range_bounds_are_inclusive<B: Backend>(store: MetadataStore<B>) {
    store.ensure_indexed(["size"]).unwrap();
    store.backfill_pending().unwrap();

    let sized = [
        (1, FieldValue::integer(100)),
        (2, FieldValue::integer(150)),
        (3, FieldValue::integer(200)),
        (4, FieldValue::text("150")),
        (5, FieldValue::List(vec![Scalar::Integer(50), Scalar::Text("z".into())])),
    ];
    for (id, size) in sized {
        let record = Record::new(MessageId(id)).with("size", size);
        store.bury(record, &Placement::new("2012-09")).unwrap();
    }

    // Both endpoints match; text values never fall inside integer bounds.
    assert_eq!(ids_in(&store, Predicate::range(100_i64, 200_i64)), ids(&[1, 2, 3]));
    assert_eq!(ids_in(&store, Predicate::range(150_i64, 150_i64)), ids(&[2]));
    assert_eq!(ids_in(&store, Predicate::at_most(100_i64)), ids(&[1, 5]));
    assert_eq!(ids_in(&store, Predicate::at_least(200_i64)), ids(&[3]));
    assert!(ids_in(&store, Predicate::range(201_i64, 300_i64)).is_empty());

    assert_eq!(ids_in(&store, Predicate::range("150", "z")), ids(&[4, 5]));
    assert_eq!(ids_in(&store, Predicate::at_most("150")), ids(&[4]));
    assert!(ids_in(&store, Predicate::range(100_i64, "z")).is_empty());

    assert_eq!(ids_in(&store, Predicate::equals(150_i64)), ids(&[2]));
    assert_eq!(ids_in(&store, Predicate::equals("150")), ids(&[4]));

    let values: Vec<IndexValue> = store
        .scan("size", &Predicate::range(100_i64, 200_i64))
        .unwrap()
        .into_iter()
        .map(|row| row.value)
        .collect();
    assert_eq!(
        values,
        vec![
            IndexValue::Integer(100),
            IndexValue::Integer(150),
            IndexValue::Integer(200),
        ]
    );
}

fn bury_many_and_stats<B: Backend>(store: MetadataStore<B>) {
    let ids = store
        .bury_many(vec![
            (first_message().into_record().unwrap(), Placement::new("2012-09")),
            (second_message().into_record().unwrap(), Placement::new("2012-09")),
        ])
        .unwrap();
    assert_eq!(ids, vec![MessageId(FIRST_ID), MessageId(SECOND_ID)]);

    let stats = store.stats().unwrap();
    assert_eq!(stats.total_records, 2);
    assert!(stats.pending_fields().is_empty());
    assert_eq!(stats.indexed_fields.len(), 7);
    // labels 3+2, flags 1+0, thread_id, internal_date, message_id,
    // category, location: 5 each
    assert_eq!(stats.total_index_rows, 5 + 1 + 2 * 5);
    assert_eq!(
        ids_where(&store, fields::LABELS, "\\Inbox"),
        vec![MessageId(SECOND_ID), MessageId(FIRST_ID)]
    );
}

fn malformed_records_change_nothing<B: Backend>(store: MetadataStore<B>) {
    store
        .bury_metadata(first_message(), &Placement::new("2012-09"))
        .unwrap();
    let before = store.stats().unwrap();

    let no_date = Record::new(MessageId(7)).with(fields::LABELS, FieldValue::text_list(["x"]));
    let err = store.bury(no_date, &Placement::new("chats")).unwrap_err();
    assert_eq!(err.kind, ErrorKind::MalformedRecord);

    let escaping = Record::new(MessageId(8));
    let err = store
        .bury(escaping, &Placement::new("../2012-09"))
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::MalformedRecord);

    let after = store.stats().unwrap();
    assert_eq!(after.total_records, before.total_records);
    assert_eq!(after.total_index_rows, before.total_index_rows);
}

macro_rules! on_every_backend {
    ($($check:ident),* $(,)?) => {
        mod memory {
            use super::*;
            $(
                #[test]
                fn $check() {
                    super::$check(memory_store());
                }
            )*
        }

        #[cfg(feature = "sqlite")]
        mod sqlite {
            use super::*;
            $(
                #[test]
                fn $check() {
                    super::$check(sqlite_store());
                }
            )*
        }
    };
}

on_every_backend!(
    roundtrip,
    sub_second_dates_roundtrip,
    index_completeness,
    exclusivity_on_replace,
    deletion_completeness,
    failed_write_is_atomic,
    strings_are_never_decomposed,
    category_and_location_queries,
    range_bounds_are_inclusive,
    bury_many_and_stats,
    malformed_records_change_nothing,
);
