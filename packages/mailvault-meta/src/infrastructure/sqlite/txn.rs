//! Port implementations over one open SQLite transaction

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, Value, ValueRef};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, ToSql};

use crate::domain::models::{
    EmittedValues, IndexRow, IndexValue, IndexedField, MessageId, Predicate, Record, Scalar,
};
use crate::domain::ports::{FieldRegistry, RecordStore, SecondaryIndex};
use crate::error::Result;

impl ToSql for MessageId {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.0))
    }
}

impl FromSql for MessageId {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        i64::column_result(value).map(MessageId)
    }
}

impl ToSql for IndexValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            IndexValue::Integer(i) => ToSqlOutput::from(*i),
            IndexValue::Text(s) => ToSqlOutput::from(s.as_str()),
        })
    }
}

impl FromSql for IndexValue {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value {
            ValueRef::Integer(i) => Ok(IndexValue::Integer(i)),
            ValueRef::Text(_) => String::column_result(value).map(IndexValue::Text),
            _ => Err(FromSqlError::InvalidType),
        }
    }
}

fn sql_value(value: &IndexValue) -> Value {
    match value {
        IndexValue::Integer(i) => Value::Integer(*i),
        IndexValue::Text(s) => Value::Text(s.clone()),
    }
}

/// `typeof()` name of the storage class an index value is kept in
fn storage_class(value: &IndexValue) -> &'static str {
    match value {
        IndexValue::Integer(_) => "integer",
        IndexValue::Text(_) => "text",
    }
}

fn index_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<IndexRow> {
    Ok(IndexRow {
        id: row.get(0)?,
        field: row.get(1)?,
        value: row.get(2)?,
    })
}

/// All three ports over one open transaction
pub(super) struct SqliteTxn<'c> {
    pub(super) conn: &'c Connection,
}

impl SqliteTxn<'_> {
    fn insert_rows(&self, id: MessageId, field: &str, values: &[IndexValue]) -> Result<()> {
        let mut stmt = self.conn.prepare_cached(
            "INSERT OR IGNORE INTO message_index (id, field, value) VALUES (?1, ?2, ?3)",
        )?;
        for value in values {
            stmt.execute(params![id, field, value])?;
        }
        Ok(())
    }
}

impl RecordStore for SqliteTxn<'_> {
    fn put(&mut self, id: MessageId, record: &Record) -> Result<()> {
        let blob = record.to_blob()?;
        self.conn
            .prepare_cached("INSERT OR REPLACE INTO messages (id, data) VALUES (?1, ?2)")?
            .execute(params![id, blob])?;
        Ok(())
    }

    fn get(&self, id: MessageId) -> Result<Option<Record>> {
        let blob: Option<String> = self
            .conn
            .prepare_cached("SELECT data FROM messages WHERE id = ?1")?
            .query_row(params![id], |row| row.get(0))
            .optional()?;
        blob.map(|b| Record::from_blob(&b)).transpose()
    }

    fn delete(&mut self, id: MessageId) -> Result<bool> {
        let deleted = self
            .conn
            .prepare_cached("DELETE FROM messages WHERE id = ?1")?
            .execute(params![id])?;
        Ok(deleted > 0)
    }

    fn records_after(&self, after: Option<MessageId>, limit: usize) -> Result<Vec<Record>> {
        let limit = limit as i64;
        let blobs: Vec<String> = match after {
            Some(after) => self
                .conn
                .prepare_cached("SELECT data FROM messages WHERE id > ?1 ORDER BY id LIMIT ?2")?
                .query_map(params![after, limit], |row| row.get(0))?
                .collect::<rusqlite::Result<_>>()?,
            None => self
                .conn
                .prepare_cached("SELECT data FROM messages ORDER BY id LIMIT ?1")?
                .query_map(params![limit], |row| row.get(0))?
                .collect::<rusqlite::Result<_>>()?,
        };
        blobs.iter().map(|b| Record::from_blob(b)).collect()
    }

    fn record_ids(&self) -> Result<Vec<MessageId>> {
        let ids = self
            .conn
            .prepare_cached("SELECT id FROM messages ORDER BY id")?
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<_>>()?;
        Ok(ids)
    }

    fn count_records(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

impl SecondaryIndex for SqliteTxn<'_> {
    fn replace_rows(&mut self, id: MessageId, values: &EmittedValues) -> Result<()> {
        self.delete_rows(id)?;
        for (field, field_values) in values {
            self.insert_rows(id, field, field_values)?;
        }
        Ok(())
    }

    fn replace_field_rows(&mut self, id: MessageId, field: &str, values: &[IndexValue]) -> Result<()> {
        self.conn
            .prepare_cached("DELETE FROM message_index WHERE id = ?1 AND field = ?2")?
            .execute(params![id, field])?;
        self.insert_rows(id, field, values)
    }

    fn delete_rows(&mut self, id: MessageId) -> Result<()> {
        self.conn
            .prepare_cached("DELETE FROM message_index WHERE id = ?1")?
            .execute(params![id])?;
        Ok(())
    }

    fn scan(&self, field: &str, predicate: &Predicate) -> Result<Vec<IndexRow>> {
        let mut sql = String::from("SELECT id, field, value FROM message_index WHERE field = ?");
        let mut args = vec![Value::Text(field.to_string())];

        let mut bound = |op: &str, scalar: &Scalar, typed: bool| {
            let value = scalar.index_value();
            if typed {
                sql.push_str(" AND typeof(value) = ?");
                args.push(Value::Text(storage_class(&value).to_string()));
            }
            sql.push_str(" AND value ");
            sql.push_str(op);
            sql.push_str(" ?");
            args.push(sql_value(&value));
        };

        match predicate {
            Predicate::Equals(expected) => bound("=", expected, false),
            Predicate::Range { lo, hi } => {
                if let Some(lo) = lo {
                    bound(">=", lo, true);
                }
                if let Some(hi) = hi {
                    bound("<=", hi, true);
                }
            }
        }
        sql.push_str(" ORDER BY value, id");

        let rows = self
            .conn
            .prepare_cached(&sql)?
            .query_map(params_from_iter(args.iter()), index_row)?
            .collect::<rusqlite::Result<_>>()?;
        Ok(rows)
    }

    fn rows_for(&self, id: MessageId) -> Result<Vec<IndexRow>> {
        let rows = self
            .conn
            .prepare_cached(
                "SELECT id, field, value FROM message_index WHERE id = ?1 ORDER BY field, value",
            )?
            .query_map(params![id], index_row)?
            .collect::<rusqlite::Result<_>>()?;
        Ok(rows)
    }

    fn indexed_ids(&self) -> Result<Vec<MessageId>> {
        let ids = self
            .conn
            .prepare_cached("SELECT DISTINCT id FROM message_index ORDER BY id")?
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<_>>()?;
        Ok(ids)
    }

    fn count_rows(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM message_index", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

impl FieldRegistry for SqliteTxn<'_> {
    fn ensure_indexed(&mut self, fields: &[String]) -> Result<Vec<IndexedField>> {
        {
            let mut stmt = self.conn.prepare_cached(
                "INSERT OR IGNORE INTO indexed_fields (field, needs_backfill) VALUES (?1, 1)",
            )?;
            for field in fields {
                stmt.execute(params![field])?;
            }
        }
        self.indexed_fields()
    }

    fn indexed_fields(&self) -> Result<Vec<IndexedField>> {
        let fields = self
            .conn
            .prepare_cached("SELECT field, needs_backfill FROM indexed_fields ORDER BY field")?
            .query_map([], |row| {
                Ok(IndexedField {
                    name: row.get(0)?,
                    needs_backfill: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<_>>()?;
        Ok(fields)
    }

    fn clear_backfill(&mut self, fields: &[String]) -> Result<()> {
        let mut stmt = self
            .conn
            .prepare_cached("UPDATE indexed_fields SET needs_backfill = 0 WHERE field = ?1")?;
        for field in fields {
            stmt.execute(params![field])?;
        }
        Ok(())
    }
}
