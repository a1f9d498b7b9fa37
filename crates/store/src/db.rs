use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use duckdb::Connection;

use runlens_core::error::{Result, RunlensError};

use crate::schema::SPANS_TABLE;

#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
    db_path: String,
}

impl Store {
    /// Open (or create) the database file. The span schema itself is owned
    /// by the migration runner, which must run before any writes.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| RunlensError::Io(format!("failed to create db dir: {e}")))?;
        }

        let conn = Connection::open(path)
            .map_err(|e| RunlensError::Store(format!("failed to open duckdb: {e}")))?;
        conn.execute_batch("PRAGMA threads=4;")
            .map_err(|e| RunlensError::Store(format!("failed to set pragmas: {e}")))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: path.display().to_string(),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| RunlensError::Store(format!("failed to open in-memory db: {e}")))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: ":memory:".to_string(),
        })
    }

    pub fn db_path(&self) -> &str {
        &self.db_path
    }

    pub(crate) fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().expect("store mutex poisoned")
    }

    pub fn count_spans(&self) -> Result<usize> {
        let conn = self.conn();
        scalar_usize(&conn, &format!("SELECT COUNT(*) FROM {SPANS_TABLE}"))
    }
}

pub(crate) fn scalar_usize(conn: &Connection, sql: &str) -> Result<usize> {
    conn.query_row(sql, [], |row| row.get::<_, i64>(0))
        .map(|v| v as usize)
        .map_err(|e| RunlensError::Store(format!("query failed: {e}")))
}

pub(crate) fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
    conn.query_row(
        "SELECT COUNT(*) FROM information_schema.tables WHERE table_name = ?",
        [table],
        |row| row.get::<_, i64>(0),
    )
    .map(|count| count > 0)
    .map_err(|e| RunlensError::Store(format!("table lookup failed: {e}")))
}

pub(crate) fn column_exists(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    conn.query_row(
        "SELECT COUNT(*) FROM information_schema.columns WHERE table_name = ? AND column_name = ?",
        [table, column],
        |row| row.get::<_, i64>(0),
    )
    .map(|count| count > 0)
    .map_err(|e| RunlensError::Store(format!("column lookup failed: {e}")))
}

pub(crate) fn table_columns(conn: &Connection, table: &str) -> Result<Vec<String>> {
    let mut stmt = conn
        .prepare(
            "SELECT column_name FROM information_schema.columns
             WHERE table_name = ? ORDER BY ordinal_position",
        )
        .map_err(|e| RunlensError::Store(format!("column listing failed: {e}")))?;
    let mut rows = stmt
        .query([table])
        .map_err(|e| RunlensError::Store(format!("column listing failed: {e}")))?;

    let mut names = Vec::new();
    while let Some(row) = rows
        .next()
        .map_err(|e| RunlensError::Store(format!("column listing failed: {e}")))?
    {
        names.push(
            row.get::<_, String>(0)
                .map_err(|e| RunlensError::Store(format!("column listing failed: {e}")))?,
        );
    }
    Ok(names)
}
