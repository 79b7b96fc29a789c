//! High-level metadata API
//!
//! - `MetadataStore`: indexing pipeline (bury, unbury, remove, backfill)
//! - query engine: `find`, `find_ids` and the conveniences built on them

pub mod metadata_store;
pub mod query;

pub use metadata_store::MetadataStore;
pub use query::RecordCursor;
