//! The `Database` surface consumed by UI bindings.
//!
//! A `Database` owns one worker context and fans write notifications out
//! through its invalidation bus. Handles are cheap to clone; every clone
//! talks to the same worker and bus.

mod transaction;
mod watch;

pub use transaction::{StagedExec, TransactionScope};
pub use watch::{QueryState, WatchedQuery};

use std::sync::Arc;

use crate::channel::CorrelationChannel;
use crate::config::DatabaseConfig;
use crate::engine::sqlite::SqliteEngine;
use crate::engine::{worker, Engine};
use crate::error::Error;
use crate::extract::{extract_tables, TableSet};
use crate::invalidate::{InvalidationBus, InvalidationHandler, InvalidationSubscription};
use crate::migrate::apply_migrations;
use crate::protocol::{ExecOutcome, QueryRows, Request, Response, Value};

pub(crate) struct DatabaseInner {
    pub(crate) channel: CorrelationChannel,
    pub(crate) bus: InvalidationBus,
    name: String,
}

/// Handle to a worker-isolated database.
#[derive(Clone)]
pub struct Database {
    pub(crate) inner: Arc<DatabaseInner>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("name", &self.inner.name)
            .finish_non_exhaustive()
    }
}

impl Database {
    /// Open a database with the reference SQLite engine: spawn the worker,
    /// initialize the engine, and apply pending migrations.
    pub async fn open(config: DatabaseConfig) -> Result<Self, Error> {
        Self::open_with_engine(config, SqliteEngine::new()).await
    }

    /// Open a database hosted on any [`Engine`] implementation.
    pub async fn open_with_engine<E: Engine + Send + 'static>(
        config: DatabaseConfig,
        engine: E,
    ) -> Result<Self, Error> {
        let (inbox, outbox, _join) = worker::spawn(engine);
        let channel = CorrelationChannel::new(inbox, outbox);

        channel
            .expect_ready(
                Request::Init {
                    name: config.name.clone(),
                    storage: config.storage.clone(),
                    pragmas: config.pragmas.clone(),
                },
                "init",
            )
            .await?;

        // Migrations run before any normal traffic and do not invalidate.
        apply_migrations(&channel, &config.migrations).await?;

        let bus = if config.peer_sync {
            InvalidationBus::with_peer(config.effective_channel_name())
        } else {
            InvalidationBus::new()
        };

        tracing::info!(name = %config.name, "Database open");
        Ok(Self {
            inner: Arc::new(DatabaseInner {
                channel,
                bus,
                name: config.name,
            }),
        })
    }

    /// The logical database name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Run a read query. Never fires invalidation.
    pub async fn query(&self, sql: &str, params: Vec<Value>) -> Result<QueryRows, Error> {
        self.inner.channel.query(sql, params).await
    }

    /// Run a write statement. On success, the statement's extracted table
    /// set (wildcard if undeterminable) is published locally and to peers.
    pub async fn exec(&self, sql: &str, params: Vec<Value>) -> Result<ExecOutcome, Error> {
        let outcome = self.inner.channel.exec(sql, params).await?;
        let tables = extract_tables(sql);
        self.inner.bus.publish(&tables, true);
        Ok(outcome)
    }

    /// Register a raw invalidation handler. Dropping the returned
    /// subscription unregisters it.
    pub fn on_invalidate(&self, handler: InvalidationHandler) -> InvalidationSubscription {
        self.inner.bus.subscribe(handler)
    }

    /// Snapshot the entire database as bytes.
    pub async fn export(&self) -> Result<Vec<u8>, Error> {
        match self.inner.channel.send(Request::Export).await? {
            Response::ExportResult { bytes } => Ok(bytes),
            _ => Err(Error::UnexpectedResponse {
                operation: "export",
            }),
        }
    }

    /// Replace the database contents from an exported snapshot. Everything
    /// may have changed, so the wildcard is published.
    pub async fn import(&self, bytes: Vec<u8>) -> Result<(), Error> {
        self.inner
            .channel
            .expect_ready(Request::Import { bytes }, "import")
            .await?;
        self.inner.bus.publish(&TableSet::All, true);
        Ok(())
    }

    /// Close the database and stop the worker. Outstanding and subsequent
    /// requests fail with [`Error::ContextLost`].
    pub async fn close(&self) -> Result<(), Error> {
        self.inner.channel.expect_ready(Request::Close, "close").await
    }
}
