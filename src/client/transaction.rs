//! Staged transactions with a single atomic commit.
//!
//! The scope is a two-phase object: a staging phase that only collects
//! statements (no engine interaction) and a commit phase that ships the
//! whole list as one atomic unit. Reads inside the scope run immediately
//! against committed state; they do not see the scope's own staged
//! writes. That is a documented limitation of this contract, not
//! snapshot isolation.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::{Arc, Mutex};

use super::Database;
use crate::error::Error;
use crate::extract::{extract_tables, TableSet};
use crate::protocol::{QueryRows, Statement, Value};

/// Placeholder result of a staged write.
///
/// Deliberately not an [`ExecOutcome`](crate::protocol::ExecOutcome): the
/// statement has not executed yet, so there is no meaningful change count
/// to report. Only the position in the staged list is known.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StagedExec {
    /// Zero-based position of the statement in the staged list.
    pub statement_index: usize,
}

/// The scope handed to a transaction closure.
pub struct TransactionScope {
    db: Database,
    staged: Arc<Mutex<Vec<Statement>>>,
}

impl TransactionScope {
    /// Stage a write statement in call order. Nothing executes until the
    /// closure completes; the placeholder result carries no outcome.
    pub fn exec(&self, sql: impl Into<String>, params: Vec<Value>) -> StagedExec {
        let mut staged = self.staged.lock().expect("staged list poisoned");
        staged.push(Statement::new(sql, params));
        StagedExec {
            statement_index: staged.len() - 1,
        }
    }

    /// Read immediately against the current committed state. Staged
    /// writes from this same scope are not visible.
    pub async fn query(&self, sql: &str, params: Vec<Value>) -> Result<QueryRows, Error> {
        self.db.inner.channel.query(sql, params).await
    }
}

impl Database {
    /// Run a transaction: stage writes through the scope, then commit
    /// them as one atomic unit after the closure succeeds.
    ///
    /// - An empty stage costs no engine round-trip
    /// - Any statement failure rolls the whole unit back and re-raises
    ///   the original error; no partial effects are observable
    /// - A closure error discards the stage entirely
    /// - Invalidation fires exactly once, after commit, with the union of
    ///   every staged statement's extracted tables (wildcard if any
    ///   statement is undeterminable)
    pub async fn transaction<F, Fut, T>(&self, f: F) -> Result<T, Error>
    where
        F: FnOnce(TransactionScope) -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        let staged = Arc::new(Mutex::new(Vec::new()));
        let scope = TransactionScope {
            db: self.clone(),
            staged: Arc::clone(&staged),
        };

        let result = f(scope).await?;

        let statements: Vec<Statement> = {
            let mut staged = staged.lock().expect("staged list poisoned");
            staged.drain(..).collect()
        };
        if statements.is_empty() {
            return Ok(result);
        }

        let mut tables = TableSet::Named(BTreeSet::new());
        for statement in &statements {
            tables.merge(extract_tables(&statement.sql));
        }

        self.inner.channel.transaction(statements).await?;

        // Readers must never observe a state between the statements of
        // one transaction: notify only after commit, in one shot.
        self.inner.bus.publish(&tables, true);
        Ok(result)
    }
}
