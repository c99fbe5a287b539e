//! SQLite reference engine backed by rusqlite.
//!
//! - `Memory` storage opens an in-memory database; `File` opens (and
//!   creates) a durable database at the given path
//! - Parameterless `exec` calls run as a batch, so multi-statement
//!   migration scripts execute in one call
//! - Export/import go through the SQLite backup API, staged in temp files

use std::fs;
use std::time::Duration;

use rusqlite::backup::Backup;
use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::{params_from_iter, Connection, OpenFlags, ToSql};

use super::{Engine, EngineError};
use crate::config::StorageMode;
use crate::protocol::{ExecOutcome, QueryRows, Value};

/// Pages copied per backup step; small enough to keep steps short.
const BACKUP_PAGES_PER_STEP: std::os::raw::c_int = 64;

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::from(rusqlite::types::Null),
            Value::Integer(i) => ToSqlOutput::from(*i),
            Value::Real(f) => ToSqlOutput::from(*f),
            Value::Text(s) => ToSqlOutput::from(s.as_str()),
            Value::Blob(b) => ToSqlOutput::from(b.as_slice()),
        })
    }
}

impl From<ValueRef<'_>> for Value {
    fn from(v: ValueRef<'_>) -> Self {
        match v {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(i) => Value::Integer(i),
            ValueRef::Real(f) => Value::Real(f),
            ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(b) => Value::Blob(b.to_vec()),
        }
    }
}

/// The reference [`Engine`] implementation.
#[derive(Default)]
pub struct SqliteEngine {
    conn: Option<Connection>,
}

impl SqliteEngine {
    pub fn new() -> Self {
        Self { conn: None }
    }

    fn conn(&mut self) -> Result<&mut Connection, EngineError> {
        self.conn.as_mut().ok_or(EngineError::NotInitialized)
    }
}

impl Engine for SqliteEngine {
    fn init(
        &mut self,
        name: &str,
        storage: &StorageMode,
        pragmas: &[(String, String)],
    ) -> Result<(), EngineError> {
        let conn = match storage {
            StorageMode::Memory => Connection::open_in_memory()?,
            StorageMode::File { path } => Connection::open_with_flags(
                path,
                OpenFlags::SQLITE_OPEN_READ_WRITE
                    | OpenFlags::SQLITE_OPEN_CREATE
                    | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?,
        };

        for (key, value) in pragmas {
            conn.pragma_update(None, key, value)?;
        }

        tracing::debug!(name, ?storage, "Engine initialized");
        self.conn = Some(conn);
        Ok(())
    }

    fn query(&mut self, sql: &str, params: &[Value]) -> Result<QueryRows, EngineError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql)?;
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let column_count = columns.len();

        let mut rows = Vec::new();
        let mut raw = stmt.query(params_from_iter(params.iter()))?;
        while let Some(row) = raw.next()? {
            let mut out = Vec::with_capacity(column_count);
            for i in 0..column_count {
                out.push(Value::from(row.get_ref(i)?));
            }
            rows.push(out);
        }

        Ok(QueryRows { columns, rows })
    }

    fn exec(&mut self, sql: &str, params: &[Value]) -> Result<ExecOutcome, EngineError> {
        let conn = self.conn()?;
        // The connection counters persist across statements: a statement that
        // changes no rows leaves the previous values in place. Deltas against
        // the pre-call state keep the outcome scoped to this call.
        let rowid_before = conn.last_insert_rowid();
        let changes = if params.is_empty() {
            // Batch form handles multi-statement scripts (migrations).
            let total_before = conn.total_changes();
            conn.execute_batch(sql)?;
            conn.total_changes() - total_before
        } else {
            conn.execute(sql, params_from_iter(params.iter()))? as u64
        };

        let rowid = conn.last_insert_rowid();
        Ok(ExecOutcome {
            changes,
            last_insert_id: (rowid != 0 && rowid != rowid_before).then_some(rowid),
        })
    }

    fn close(&mut self) -> Result<(), EngineError> {
        if let Some(conn) = self.conn.take() {
            conn.close().map_err(|(_, e)| e)?;
        }
        Ok(())
    }

    fn export(&mut self) -> Result<Vec<u8>, EngineError> {
        let conn = self.conn()?;
        let staging = tempfile::NamedTempFile::new()?;
        {
            let mut dst = Connection::open(staging.path())?;
            let backup = Backup::new(conn, &mut dst)?;
            backup.run_to_completion(BACKUP_PAGES_PER_STEP, Duration::ZERO, None)?;
        }
        Ok(fs::read(staging.path())?)
    }

    fn import(&mut self, bytes: &[u8]) -> Result<(), EngineError> {
        let conn = self.conn()?;
        let staging = tempfile::NamedTempFile::new()?;
        fs::write(staging.path(), bytes)?;
        let src = Connection::open(staging.path())?;
        let backup = Backup::new(&src, conn)?;
        backup.run_to_completion(BACKUP_PAGES_PER_STEP, Duration::ZERO, None)?;
        Ok(())
    }
}
