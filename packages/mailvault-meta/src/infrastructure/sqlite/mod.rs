//! SQLite Metadata Backend
//!
//! Single-file persistent storage. One connection behind a mutex; every
//! operation runs in its own transaction (`BEGIN IMMEDIATE` for writes,
//! deferred for reads), so a record and its index rows always commit or roll
//! back together.

mod schema;
mod txn;

use rusqlite::{Connection, TransactionBehavior};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::info;

use crate::config::DatabaseConfig;
use crate::domain::ports::{Backend, Transaction};
use crate::error::{Result, StorageError};
use txn::SqliteTxn;

/// SQLite-based backend
#[derive(Clone)]
pub struct SqliteBackend {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteBackend {
    /// Open (or create) the database described by `config`
    ///
    /// A missing `path` opens a private in-memory database.
    pub fn open(config: &DatabaseConfig) -> Result<Self> {
        let conn = match &config.path {
            Some(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent)?;
                }
                Connection::open(path)?
            }
            None => Connection::open_in_memory()?,
        };
        schema::configure(&conn, config)?;
        schema::init_schema(&conn)?;

        info!(
            path = %config.path.as_deref().map_or("<memory>".into(), |p| p.display().to_string()),
            durability = config.durability.as_str(),
            "Opened SQLite metadata store"
        );
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open the database file at `path` with default settings
    pub fn open_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::open(&DatabaseConfig {
            path: Some(path.as_ref().to_path_buf()),
            ..Default::default()
        })
    }

    /// Create an in-memory SQLite store (for testing)
    pub fn in_memory() -> Result<Self> {
        Self::open(&DatabaseConfig::default())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StorageError::transaction("SQLite connection lock poisoned"))
    }
}

impl Backend for SqliteBackend {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn read<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&dyn Transaction) -> Result<T>,
    {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Deferred)?;
        let out = f(&SqliteTxn { conn: &tx })?;
        tx.finish()?;
        Ok(out)
    }

    fn write<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut dyn Transaction) -> Result<T>,
    {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        // Dropping `tx` on the error path rolls back.
        let out = f(&mut SqliteTxn { conn: &tx })?;
        tx.commit()
            .map_err(|e| StorageError::transaction(format!("Commit failed: {}", e)).with_source(e))?;
        Ok(out)
    }

    fn storage_size_bytes(&self) -> Result<u64> {
        let conn = self.lock()?;
        let bytes: i64 = conn.query_row(
            "SELECT page_count * page_size FROM pragma_page_count(), pragma_page_size()",
            [],
            |row| row.get(0),
        )?;
        Ok(bytes as u64)
    }
}
