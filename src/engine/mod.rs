//! Engine contract and isolated execution.
//!
//! The relational engine is an external collaborator behind the [`Engine`]
//! trait; the core never depends on engine internals beyond it. The
//! reference implementation is [`sqlite::SqliteEngine`]; [`worker`] hosts
//! whichever engine is supplied on a dedicated thread.

pub mod sqlite;
pub mod worker;

use thiserror::Error;

use crate::config::StorageMode;
use crate::protocol::{ExecOutcome, QueryRows, Value};

/// Error type for engine operations.
///
/// Crosses the isolation boundary as a `Response::Error` payload, so the
/// message must be self-contained.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("engine used before init")]
    NotInitialized,

    #[error("{0}")]
    Other(String),
}

/// The embedded relational engine contract.
///
/// One instance is owned by exactly one worker thread; methods take
/// `&mut self` because the worker serializes every operation anyway.
pub trait Engine {
    /// Open the database for the given logical name and storage mode and
    /// apply initial pragmas. Called exactly once, before anything else.
    fn init(
        &mut self,
        name: &str,
        storage: &StorageMode,
        pragmas: &[(String, String)],
    ) -> Result<(), EngineError>;

    /// Run a read query and return its rows.
    fn query(&mut self, sql: &str, params: &[Value]) -> Result<QueryRows, EngineError>;

    /// Run a write statement and report what changed.
    fn exec(&mut self, sql: &str, params: &[Value]) -> Result<ExecOutcome, EngineError>;

    /// Close the database. Further calls are invalid.
    fn close(&mut self) -> Result<(), EngineError>;

    /// Snapshot the entire database as bytes.
    fn export(&mut self) -> Result<Vec<u8>, EngineError>;

    /// Replace the database contents from an exported snapshot.
    fn import(&mut self, bytes: &[u8]) -> Result<(), EngineError>;
}
