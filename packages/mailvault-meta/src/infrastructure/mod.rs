//! Storage Infrastructure (Adapters)

pub mod memory_store;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory_store::InMemoryBackend;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteBackend;
