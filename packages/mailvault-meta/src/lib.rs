//! mailvault-meta: Mail Metadata Store with Generic Secondary Indexes
//!
//! Persists per-message metadata keyed by a stable 64-bit message id and
//! answers point lookups and conjunctive scans over any registered field.
//!
//! ## Core Principles
//!
//! 1. **Record + rows, one transaction**: a record and its index rows always
//!    commit or roll back together
//! 2. **Classified once**: every field is a scalar or a list of scalars from
//!    ingestion on; strings are never decomposed, lists always are
//! 3. **Append-only registry**: indexing a new field is a registry insert plus
//!    a resumable backfill
//!
//! # Hexagonal Architecture
//! ```text
//! api/ (MetadataStore, query engine)
//!           ↓
//! domain/ (models, extraction, placement, ports)
//!           ↓
//! infrastructure/ (SQLite, in-memory)
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use mailvault_meta::{MailMetadata, MessageId, MetadataStore, Placement};
//!
//! let store = MetadataStore::in_memory()?;
//!
//! let mut meta = MailMetadata::new(MessageId(1412679471642059988));
//! meta.labels = vec!["\\Inbox".into(), "Perso/Foo".into()];
//! meta.internal_date = Some(1347243329);
//!
//! let id = store.bury_metadata(meta, &Placement::new(""))?;
//! assert_eq!(store.location_of(id)?, "2012-09");
//!
//! let found: Vec<_> = store.find_by_label("Perso/Foo")?.collect::<Result<_, _>>()?;
//! assert_eq!(found.len(), 1);
//! # Ok::<(), mailvault_meta::StorageError>(())
//! ```

pub mod api;
pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;

pub use error::{ErrorKind, Result, StorageError};

// High-level API
pub use api::{MetadataStore, RecordCursor};
pub use config::{Durability, StoreConfig};

pub use domain::{
    Category, Direction, FieldPredicate, FieldValue, FindOptions, IndexRow, IndexValue,
    IndexedField, MailMetadata, MessageId, OrderBy, Placement, Predicate, Record, Scalar,
};
pub use domain::{Backend, BackfillReport, StoreStats, VerifyReport};

pub use infrastructure::InMemoryBackend;
#[cfg(feature = "sqlite")]
pub use infrastructure::SqliteBackend;
