//! Caller-side error type.
//!
//! Engine failures cross the isolation boundary as `Response::Error`
//! payloads and surface here as [`Error::Engine`]; everything else is a
//! coordination failure on the caller side.

use thiserror::Error;

/// Error type for database operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The engine failed to execute a request. Carries the engine's own
    /// message and, when available, a trace of where it occurred.
    #[error("engine error: {message}")]
    Engine {
        message: String,
        trace: Option<String>,
    },

    /// The worker context terminated or became unreachable; the request
    /// (outstanding or new) can never receive a response.
    #[error("database worker is no longer reachable")]
    ContextLost,

    /// A migration's up script failed; the apply sequence was aborted at
    /// this id and the schema is at the last committed migration.
    #[error("migration {id} failed: {source}")]
    Migration {
        id: i64,
        #[source]
        source: Box<Error>,
    },

    /// Two migrations in the configured list share the same id.
    #[error("duplicate migration id {0}")]
    DuplicateMigration(i64),

    /// The worker answered with a response variant that does not match the
    /// request that was sent. Indicates an engine implementation bug.
    #[error("unexpected response variant for {operation}")]
    UnexpectedResponse { operation: &'static str },
}
