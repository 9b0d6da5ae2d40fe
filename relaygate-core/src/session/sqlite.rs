//! SQLite session backend: one database file per session.

use std::path::Path;

use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use serde_json::{Map, Value, json};

use super::error::SessionError;
use super::manager::SessionBackend;

/// Creates `<key>.db` files seeded with a `metadata` table.
#[derive(Debug, Default, Clone, Copy)]
pub struct SqliteBackend;

impl SessionBackend for SqliteBackend {
    type Handle = Connection;

    fn extension(&self) -> &str {
        "db"
    }

    fn create(&self, path: &Path) -> Result<(), SessionError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("CREATE TABLE IF NOT EXISTS metadata (created_at TEXT);")?;
        Ok(())
    }

    fn open(&self, path: &Path) -> Result<Connection, SessionError> {
        // Never recreate a file that the sweep already removed.
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        Ok(Connection::open_with_flags(path, flags)?)
    }
}

/// Runs one SQL statement.
///
/// Statements that produce columns return `{"results": [{column: value}, ...]}`;
/// anything else is executed and returns `{"result": "ok"}`. Blobs are
/// returned as lossy UTF-8 text.
///
/// # Errors
///
/// `SessionError::Database` for SQL errors, including input holding more
/// than one statement.
pub fn run_sql(conn: &Connection, sql: &str) -> Result<Value, SessionError> {
    let mut stmt = conn.prepare(sql)?;
    if stmt.column_count() == 0 {
        stmt.execute([])?;
        return Ok(json!({"result": "ok"}));
    }

    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let mut rows = stmt.query([])?;
    let mut results = Vec::new();
    while let Some(row) = rows.next()? {
        let mut object = Map::with_capacity(columns.len());
        for (i, name) in columns.iter().enumerate() {
            object.insert(name.clone(), to_json(row.get_ref(i)?));
        }
        results.push(Value::Object(object));
    }
    Ok(json!({"results": results}))
}

fn to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => json!(i),
        ValueRef::Real(f) => json!(f),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            Value::String(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}
