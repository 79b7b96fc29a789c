//! Shared fixtures for mailvault-meta integration tests

#![allow(dead_code)]

use mailvault_meta::{
    Backend, FindOptions, FieldPredicate, InMemoryBackend, MailMetadata, MessageId,
    MetadataStore, Predicate, StoreConfig,
};
use serde_json::json;

pub const FIRST_ID: i64 = 1412679471642059988;
pub const SECOND_ID: i64 = 1412679471642012345;

/// Install a test subscriber once; honours `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Metadata as the fetcher hands it over (legacy key names)
pub fn first_message() -> MailMetadata {
    serde_json::from_value(json!({
        "msg_id": "CAJnB4vBb5eS43vQPSphQiyo8oGQGtmDsMgFKZq9Pk1L1W6uZDA@mail.gmail.com",
        "gm_id": FIRST_ID,
        "labels": ["\\Inbox", "\\Important", "Perso/Foo"],
        "thread_ids": 1412630003922319997_i64,
        "flags": ["\\Seen"],
        "internal_date": 1347243329,
        "subject": "Re: some subject\r"
    }))
    .unwrap()
}

pub fn second_message() -> MailMetadata {
    serde_json::from_value(json!({
        "msg_id": "CAJnB4vBb5eS43vQPSphQizo8oGQGtmDsMgFKZq9Pk1L1W6uZDA@mail.gmail.com",
        "gm_id": SECOND_ID,
        "labels": ["\\Inbox", "Test"],
        "thread_ids": 1412630003922318997_i64,
        "flags": [],
        "internal_date": 1347243328,
        "subject": "Re: another subject\r"
    }))
    .unwrap()
}

/// `first_message` re-labelled with "Added"
pub fn first_message_updated() -> MailMetadata {
    let mut meta = first_message();
    meta.labels.push("Added".to_string());
    meta
}

pub fn memory_store() -> MetadataStore<InMemoryBackend> {
    init_tracing();
    MetadataStore::in_memory().unwrap()
}

#[cfg(feature = "sqlite")]
pub fn sqlite_store() -> MetadataStore<mailvault_meta::SqliteBackend> {
    init_tracing();
    MetadataStore::open(StoreConfig::default()).unwrap()
}

/// Ids matching `field = value`
pub fn ids_where<B: Backend>(store: &MetadataStore<B>, field: &str, value: &str) -> Vec<MessageId> {
    store
        .find_ids(
            &[FieldPredicate::new(field, Predicate::equals(value))],
            &FindOptions::default(),
        )
        .unwrap()
}
