//! Reactive query subscriptions.
//!
//! A watched query resolves its table-dependency set once (explicit
//! override or lexical extraction) and re-runs whenever an invalidation
//! intersects it. Deliveries are fingerprint-suppressed: re-running to an
//! identical result does not notify the subscriber again. Failures are
//! delivered as the `Error` state rather than unwinding into the caller.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use super::Database;
use crate::extract::{extract_tables, TableSet};
use crate::invalidate::InvalidationSubscription;
use crate::protocol::{QueryRows, Value};

/// Observable state of a watched query.
///
/// Transitions: `Loading -> Ready | Error`, then `Ready | Error ->
/// Ready | Error` on re-evaluation. Never back to `Loading`.
#[derive(Clone, Debug, PartialEq)]
pub enum QueryState {
    /// Initial evaluation has not delivered yet.
    Loading,
    /// Last evaluation succeeded with these rows.
    Ready(QueryRows),
    /// Last evaluation failed; carries the underlying error message.
    Error(String),
}

impl QueryState {
    pub fn is_loading(&self) -> bool {
        matches!(self, QueryState::Loading)
    }
}

/// Handle to an active query subscription.
///
/// The dependency set is immutable for the handle's lifetime: a query
/// whose text changes is a new subscription. Dropping the handle
/// unsubscribes and stops the evaluation task.
pub struct WatchedQuery {
    state: watch::Receiver<QueryState>,
    trigger: mpsc::UnboundedSender<()>,
    dependencies: TableSet,
    _subscription: InvalidationSubscription,
}

impl WatchedQuery {
    /// The current state without waiting.
    pub fn state(&self) -> QueryState {
        self.state.borrow().clone()
    }

    /// Wait for the next delivered state. Returns `None` if the
    /// evaluation task has stopped.
    pub async fn changed(&mut self) -> Option<QueryState> {
        self.state.changed().await.ok()?;
        Some(self.state.borrow_and_update().clone())
    }

    /// Force a re-evaluation regardless of invalidation. The fingerprint
    /// check still applies: an identical result is not re-delivered.
    pub fn refetch(&self) {
        let _ = self.trigger.send(());
    }

    /// The resolved table-dependency set.
    pub fn dependencies(&self) -> &TableSet {
        &self.dependencies
    }
}

impl Database {
    /// Watch a query, inferring its dependency set from the SQL text.
    pub fn watch(&self, sql: &str, params: Vec<Value>) -> WatchedQuery {
        self.watch_with_deps(sql, params, None)
    }

    /// Watch a query with an optional explicit dependency override. The
    /// set is resolved here, once, and never re-extracted afterward.
    pub fn watch_with_deps(
        &self,
        sql: &str,
        params: Vec<Value>,
        deps_override: Option<TableSet>,
    ) -> WatchedQuery {
        let dependencies = deps_override.unwrap_or_else(|| extract_tables(sql));
        let (state_tx, state_rx) = watch::channel(QueryState::Loading);
        let (trigger_tx, mut trigger_rx) = mpsc::unbounded_channel::<()>();

        let deps = dependencies.clone();
        let wake = trigger_tx.clone();
        let subscription = self.inner.bus.subscribe(Arc::new(move |changed| {
            if deps.intersects(changed) {
                let _ = wake.send(());
            }
        }));

        // Initial mount evaluation.
        let _ = trigger_tx.send(());

        let db = self.clone();
        let sql = sql.to_string();
        tokio::spawn(async move {
            let mut last_fingerprint: Option<u64> = None;
            while trigger_rx.recv().await.is_some() {
                match db.query(&sql, params.clone()).await {
                    Ok(rows) => {
                        let fp = fingerprint(&rows);
                        if last_fingerprint == Some(fp) {
                            // Result unchanged: suppress the delivery.
                            continue;
                        }
                        last_fingerprint = Some(fp);
                        if state_tx.send(QueryState::Ready(rows)).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        // Reset so recovery to the prior rows re-delivers.
                        last_fingerprint = None;
                        if state_tx.send(QueryState::Error(e.to_string())).is_err() {
                            break;
                        }
                    }
                }
            }
        });

        WatchedQuery {
            state: state_rx,
            trigger: trigger_tx,
            dependencies,
            _subscription: subscription,
        }
    }
}

/// Canonical result fingerprint used for change suppression.
fn fingerprint(rows: &QueryRows) -> u64 {
    let canonical = serde_json::to_string(rows).unwrap_or_default();
    let mut hasher = DefaultHasher::new();
    canonical.hash(&mut hasher);
    hasher.finish()
}
