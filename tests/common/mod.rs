//! Test utilities and fixtures for weir tests.
//!
//! Provides:
//! - Temporary database directories
//! - Invalidation recording helpers
//! - Condition polling with timeout

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tempfile::TempDir;
use weir::invalidate::InvalidationHandler;
use weir::TableSet;

/// Test fixture that manages a temporary database directory.
///
/// The directory is automatically cleaned up when the fixture is dropped.
pub struct TestFixture {
    /// Temporary directory for test database
    pub temp_dir: TempDir,
    /// Path to the database file
    pub db_path: PathBuf,
}

impl TestFixture {
    /// Create a new test fixture with a temporary database directory.
    pub fn new() -> Self {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("error")
            .with_test_writer()
            .try_init();
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let db_path = temp_dir.path().join("test.db");
        Self { temp_dir, db_path }
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// An invalidation handler that records every changed-table set it sees.
pub fn recording_handler() -> (InvalidationHandler, Arc<Mutex<Vec<TableSet>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let handler: InvalidationHandler =
        Arc::new(move |tables: &TableSet| sink.lock().unwrap().push(tables.clone()));
    (handler, seen)
}

/// Wait for a condition to become true with timeout.
///
/// Returns `true` if the condition was met, `false` on timeout.
pub async fn wait_for<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
