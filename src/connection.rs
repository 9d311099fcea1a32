//! The minimal connection surface the dialects need during setup and
//! reflection.

use std::path::Path;

use rusqlite::types::Value;
use rusqlite::{OptionalExtension, params_from_iter};

use crate::error::Result;

/// A database connection as seen by the dialect adapters.
///
/// Only SQLite is bundled (through `rusqlite`); other drivers implement this
/// trait to get connection setup and reflection for their backend.
pub trait RawConnection {
    /// Run one or more statements, discarding any rows.
    fn execute_batch(&self, sql: &str) -> Result<()>;

    /// First row of `sql`, or `None` when the statement yields no row.
    fn query_row(&self, sql: &str, params: &[Value]) -> Result<Option<Vec<Value>>>;

    /// Load a shared-library extension into the connection.
    fn load_extension(&self, path: &Path) -> Result<()>;

    /// The underlying SQLite connection, when there is one.
    fn as_sqlite(&self) -> Option<&rusqlite::Connection> {
        None
    }
}

fn returns_rows(sql: &str) -> bool {
    let head = sql.trim_start();
    ["SELECT", "PRAGMA", "WITH"].iter().any(|keyword| {
        head.get(..keyword.len())
            .is_some_and(|start| start.eq_ignore_ascii_case(keyword))
    })
}

impl RawConnection for rusqlite::Connection {
    fn execute_batch(&self, sql: &str) -> Result<()> {
        // spatial management functions are invoked through single SELECTs
        if returns_rows(sql) && !sql.trim_end().trim_end_matches(';').contains(';') {
            RawConnection::query_row(self, sql, &[])?;
            return Ok(());
        }
        rusqlite::Connection::execute_batch(self, sql)?;
        Ok(())
    }

    fn query_row(&self, sql: &str, params: &[Value]) -> Result<Option<Vec<Value>>> {
        let mut stmt = self.prepare(sql)?;
        let count = stmt.column_count();
        let row = stmt
            .query_row(params_from_iter(params.iter()), |row| {
                (0..count)
                    .map(|i| row.get::<_, Value>(i))
                    .collect::<rusqlite::Result<Vec<Value>>>()
            })
            .optional()?;
        Ok(row)
    }

    fn load_extension(&self, path: &Path) -> Result<()> {
        // SAFETY: loading runs the library's initializer; the path is chosen
        // by whoever configured the dialect, as with any SQLite client.
        unsafe {
            let _guard = rusqlite::LoadExtensionGuard::new(self)?;
            rusqlite::Connection::load_extension(self, path, None::<&str>)?;
        }
        Ok(())
    }

    fn as_sqlite(&self) -> Option<&rusqlite::Connection> {
        Some(self)
    }
}

/// Turn "already done" failures of a setup step into success.
pub(crate) fn tolerate_repeat(result: Result<()>, step: &str) -> Result<()> {
    match result {
        Err(err) if err.is_already_initialized() => {
            tracing::debug!(step, error = %err, "setup step already done");
            Ok(())
        }
        other => other,
    }
}
