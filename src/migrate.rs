//! Versioned schema migrations with a durable ledger.
//!
//! - The ledger table records every migration this applier has applied;
//!   rows are inserted once and never mutated
//! - Migrations are applied in ascending id order regardless of list
//!   order; each up script commits atomically with its ledger row
//! - A failure aborts the remaining sequence, leaving the schema at the
//!   last committed migration
//! - `down` scripts are stored but never auto-invoked; reversal is an
//!   explicit external operation

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::channel::CorrelationChannel;
use crate::error::Error;
use crate::now_millis;
use crate::protocol::{Statement, Value};

const CREATE_LEDGER: &str = "CREATE TABLE IF NOT EXISTS weir_migrations (\
     id INTEGER PRIMARY KEY, applied_at INTEGER NOT NULL)";

/// One schema migration. Immutable once applied.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Migration {
    /// Monotonically increasing id; the authoritative ordering key.
    pub id: i64,
    /// Script that brings the schema up to this version.
    pub up: String,
    /// Optional reversal script; stored, never auto-invoked.
    pub down: Option<String>,
}

impl Migration {
    pub fn new(id: i64, up: impl Into<String>) -> Self {
        Self {
            id,
            up: up.into(),
            down: None,
        }
    }

    /// Attach a reversal script.
    #[must_use]
    pub fn with_down(mut self, down: impl Into<String>) -> Self {
        self.down = Some(down.into());
        self
    }
}

/// Bring the database up to the target schema version, idempotently.
///
/// Returns the number of migrations applied in this call. Called once at
/// initialization, before normal traffic; does not fire invalidation.
pub(crate) async fn apply_migrations(
    channel: &CorrelationChannel,
    migrations: &[Migration],
) -> Result<usize, Error> {
    channel.exec(CREATE_LEDGER, vec![]).await?;

    let applied: BTreeSet<i64> = channel
        .query("SELECT id FROM weir_migrations", vec![])
        .await?
        .rows
        .iter()
        .filter_map(|row| match row.first() {
            Some(Value::Integer(id)) => Some(*id),
            _ => None,
        })
        .collect();

    let mut ordered: Vec<&Migration> = migrations.iter().collect();
    ordered.sort_by_key(|m| m.id);
    for pair in ordered.windows(2) {
        if pair[0].id == pair[1].id {
            return Err(Error::DuplicateMigration(pair[0].id));
        }
    }

    let mut count = 0;
    for migration in ordered {
        if applied.contains(&migration.id) {
            continue;
        }

        // Up script and ledger row commit as one atomic unit; a failure
        // rolls both back and aborts the whole sequence.
        let statements = vec![
            Statement::new(migration.up.clone(), vec![]),
            Statement::new(
                "INSERT INTO weir_migrations (id, applied_at) VALUES (?, ?)",
                vec![Value::Integer(migration.id), Value::Integer(now_millis())],
            ),
        ];
        channel
            .transaction(statements)
            .await
            .map_err(|e| Error::Migration {
                id: migration.id,
                source: Box::new(e),
            })?;

        tracing::info!(id = migration.id, "Migration applied");
        count += 1;
    }

    if count > 0 {
        tracing::info!(applied = count, "Schema migrations complete");
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migration_builder() {
        let m = Migration::new(1, "CREATE TABLE t (v)").with_down("DROP TABLE t");
        assert_eq!(m.id, 1);
        assert_eq!(m.down.as_deref(), Some("DROP TABLE t"));
    }
}
