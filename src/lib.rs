//! Weir: a reactive SQLite client with worker-isolated execution.
//!
//! Weir lets an application treat a local SQLite database as its single
//! source of truth while keeping SQL execution off the caller's thread.
//! The engine runs on a dedicated worker; callers talk to it through a
//! correlated request/response channel and get table-level invalidation
//! notifications back, so reactive queries re-run exactly when data they
//! depend on changes.
//!
//! # Architecture
//!
//! - **Isolated execution**: one worker thread owns the engine; every
//!   operation is serialized through its inbox
//! - **Correlated protocol**: requests and responses travel as tagged
//!   envelopes matched by UUIDv7 id
//! - **Atomic transactions**: staged statement lists commit as one unit
//! - **Table-level invalidation**: lexical dependency extraction drives a
//!   local bus plus a named cross-context broadcast channel
//!
//! # Modules
//!
//! - [`config`]: database configuration surface
//! - [`protocol`]: envelope, request, and response types
//! - [`channel`]: request/response correlation
//! - [`engine`]: engine contract, SQLite implementation, worker thread
//! - [`extract`]: SQL-to-table dependency extraction
//! - [`invalidate`]: invalidation bus and peer broadcast
//! - [`migrate`]: versioned schema migrations
//! - [`client`]: the `Database` surface consumed by bindings

// Lint configuration
#![warn(clippy::all)]
#![allow(
    clippy::module_name_repetitions,    // client::watch::WatchedQuery is fine
    clippy::must_use_candidate,         // Not all functions need #[must_use]
    clippy::missing_errors_doc,         // Error docs can be verbose
    clippy::missing_panics_doc,         // Panic docs can be verbose
    clippy::needless_raw_string_hashes, // r#""# is fine for SQL
    clippy::too_many_lines              // Some functions are inherently long
)]

pub mod channel;
pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod extract;
pub mod invalidate;
pub mod migrate;
pub mod protocol;

pub use client::{Database, QueryState, StagedExec, TransactionScope, WatchedQuery};
pub use config::{DatabaseConfig, StorageMode};
pub use error::Error;
pub use extract::TableSet;
pub use migrate::Migration;
pub use protocol::{ExecOutcome, QueryRows, Value};

use uuid::Uuid;

/// Generate a new UUIDv7 (time-sortable) correlation id.
///
/// UUIDv7 gives enough entropy that two concurrently outstanding requests
/// essentially never collide, while staying sortable by creation time.
#[must_use]
pub fn generate_request_id() -> String {
    Uuid::now_v7().to_string()
}

/// Get the current Unix timestamp in milliseconds.
#[must_use]
pub fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time before Unix epoch")
        .as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_ids_are_unique() {
        let a = generate_request_id();
        let b = generate_request_id();
        assert_ne!(a, b);
        assert!(Uuid::parse_str(&a).is_ok());
    }

    #[test]
    fn test_now_millis_is_reasonable() {
        // After 2024-01-01.
        assert!(now_millis() > 1_704_067_200_000);
    }
}
