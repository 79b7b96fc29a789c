//! Domain layer
//!
//! # Domain Models
//!
//! - `Record`: semi-structured metadata keyed by `MessageId`
//! - `FieldValue`: `Scalar` or list of scalars, classified at ingestion
//! - `IndexRow`: one (id, field, value) row of the secondary index
//! - `IndexedField`: registry entry with its backfill flag
//!
//! # Ports
//!
//! - `RecordStore`, `SecondaryIndex`, `FieldRegistry`: component contracts
//! - `Transaction`: all three, inside one atomic unit
//! - `Backend`: opens read/write transactions

pub mod extraction;
pub mod models;
pub mod placement;
pub mod ports;

pub use models::{
    fields, Category, Direction, EmittedValues, FieldPredicate, FieldValue, FindOptions,
    IndexRow, IndexValue, IndexedField, MailMetadata, MessageId, OrderBy, Placement, Predicate,
    Record, Scalar,
};
pub use ports::{
    Backend, BackfillReport, FieldRegistry, RecordStore, SecondaryIndex, StoreStats,
    Transaction, VerifyReport,
};
