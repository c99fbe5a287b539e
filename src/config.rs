//! Database configuration surface.
//!
//! Configuration is programmatic: callers build a [`DatabaseConfig`] and
//! hand it to [`Database::open`](crate::Database::open). Covers:
//! - Logical database name and storage mode
//! - Ordered migration list
//! - Initial pragma settings
//! - Peer-sync enablement and broadcast channel name override

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::migrate::Migration;

/// Where the engine keeps its data.
///
/// The core treats this as an opaque engine configuration value; the
/// reference engine maps `Memory` to an in-memory database and `File` to a
/// durable database at the given path.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "camelCase")]
pub enum StorageMode {
    /// Volatile in-memory storage; contents are lost on close.
    Memory,
    /// Durable file-backed storage at the given path.
    File { path: PathBuf },
}

/// Configuration for a [`Database`](crate::Database).
#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    /// Logical database name; also seeds the default peer channel name.
    pub name: String,
    /// Storage mode handed through to the engine.
    pub storage: StorageMode,
    /// Migrations applied (by ascending id) at open, before normal traffic.
    pub migrations: Vec<Migration>,
    /// Pragma key/value pairs applied by the engine at init.
    pub pragmas: Vec<(String, String)>,
    /// Whether invalidations are broadcast to peer contexts.
    pub peer_sync: bool,
    /// Peer broadcast channel name; defaults to one derived from `name`.
    pub channel_name: Option<String>,
}

impl DatabaseConfig {
    /// Create a configuration with the given logical name and defaults:
    /// in-memory storage, no migrations, no pragmas, peer sync off.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            storage: StorageMode::Memory,
            migrations: Vec::new(),
            pragmas: Vec::new(),
            peer_sync: false,
            channel_name: None,
        }
    }

    /// Use durable file-backed storage at `path`.
    #[must_use]
    pub fn file(mut self, path: impl Into<PathBuf>) -> Self {
        self.storage = StorageMode::File { path: path.into() };
        self
    }

    /// Set the ordered migration list.
    #[must_use]
    pub fn migrations(mut self, migrations: Vec<Migration>) -> Self {
        self.migrations = migrations;
        self
    }

    /// Add an initial pragma setting, e.g. `("foreign_keys", "ON")`.
    #[must_use]
    pub fn pragma(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.pragmas.push((key.into(), value.into()));
        self
    }

    /// Enable broadcasting invalidations to peer contexts of the same
    /// logical database.
    #[must_use]
    pub fn peer_sync(mut self, enabled: bool) -> Self {
        self.peer_sync = enabled;
        self
    }

    /// Override the peer broadcast channel name.
    #[must_use]
    pub fn channel_name(mut self, name: impl Into<String>) -> Self {
        self.channel_name = Some(name.into());
        self
    }

    /// The effective peer channel name: the override if set, otherwise one
    /// derived from the logical database name.
    pub fn effective_channel_name(&self) -> String {
        self.channel_name
            .clone()
            .unwrap_or_else(|| format!("weir:{}", self.name))
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self::new("main")
    }
}
