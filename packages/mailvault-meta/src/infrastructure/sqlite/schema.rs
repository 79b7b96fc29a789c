//! SQLite schema and connection setup

use rusqlite::Connection;
use std::time::Duration;
use tracing::debug;

use crate::config::DatabaseConfig;
use crate::error::Result;

/// Apply durability pragmas and the busy timeout
pub(super) fn configure(conn: &Connection, config: &DatabaseConfig) -> Result<()> {
    let durability = config.durability;

    let journal_mode: String = conn.pragma_update_and_check(
        None,
        "journal_mode",
        durability.journal_mode(),
        |row| row.get(0),
    )?;
    conn.pragma_update(None, "synchronous", durability.synchronous())?;
    conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;

    debug!(
        durability = durability.as_str(),
        journal_mode = %journal_mode,
        busy_timeout_ms = config.busy_timeout_ms,
        "SQLite connection configured"
    );
    Ok(())
}

/// Initialize database schema
pub(super) fn init_schema(conn: &Connection) -> Result<()> {
    // Record store: one serialized envelope per message
    conn.execute(
        "CREATE TABLE IF NOT EXISTS messages (
            id INTEGER PRIMARY KEY,
            data TEXT NOT NULL
        )",
        [],
    )?;

    // Secondary index. `value` is declared without a type so integers and
    // text keep their storage class and never compare equal.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS message_index (
            id INTEGER NOT NULL,
            field TEXT NOT NULL,
            value NOT NULL,
            PRIMARY KEY (field, value, id)
        ) WITHOUT ROWID",
        [],
    )?;

    // Per-record row lookup (replace, delete, verify)
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_message_index_id
         ON message_index(id, field)",
        [],
    )?;

    // Field registry
    conn.execute(
        "CREATE TABLE IF NOT EXISTS indexed_fields (
            field TEXT PRIMARY KEY,
            needs_backfill INTEGER NOT NULL DEFAULT 1
        )",
        [],
    )?;

    Ok(())
}
