//! Isolated execution context hosting the engine.
//!
//! One dedicated thread owns the engine and drains an envelope inbox in
//! arrival order, so every operation against the engine is strictly
//! serialized. The thread exits when a `Close` request arrives or the
//! inbox closes; either way the outbox drops, which the caller side
//! observes as context loss for anything still outstanding.

use std::thread::{self, JoinHandle};

use tokio::sync::mpsc;

use super::Engine;
use crate::protocol::{Envelope, Request, Response, Statement};

/// Spawn the worker thread for the given engine.
///
/// Returns the envelope inbox (requests in), the outbox (responses out),
/// and the thread handle.
pub fn spawn<E: Engine + Send + 'static>(
    engine: E,
) -> (
    mpsc::UnboundedSender<Envelope>,
    mpsc::UnboundedReceiver<Envelope>,
    JoinHandle<()>,
) {
    let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
    let (outbox_tx, outbox_rx) = mpsc::unbounded_channel();

    let handle = thread::Builder::new()
        .name("weir-engine".into())
        .spawn(move || run(engine, inbox_rx, outbox_tx))
        .expect("failed to spawn engine worker thread");

    (inbox_tx, outbox_rx, handle)
}

fn run<E: Engine>(
    mut engine: E,
    mut inbox: mpsc::UnboundedReceiver<Envelope>,
    outbox: mpsc::UnboundedSender<Envelope>,
) {
    while let Some(envelope) = inbox.blocking_recv() {
        let Some(request) = envelope.request else {
            // Protocol error: a response-side envelope in the inbox.
            tracing::warn!(id = %envelope.id, "Discarding request envelope without a request");
            continue;
        };

        let is_close = matches!(request, Request::Close);
        let response = handle_request(&mut engine, request);
        // Send failures mean the caller side is gone; nothing to do.
        let _ = outbox.send(Envelope::response(envelope.id, response));

        if is_close {
            break;
        }
    }
    tracing::debug!("Engine worker stopped");
}

fn handle_request<E: Engine>(engine: &mut E, request: Request) -> Response {
    match request {
        Request::Init {
            name,
            storage,
            pragmas,
        } => match engine.init(&name, &storage, &pragmas) {
            Ok(()) => Response::Ready,
            Err(e) => error_response(e, None),
        },
        Request::Query { sql, params } => match engine.query(&sql, &params) {
            Ok(rows) => Response::QueryResult {
                columns: rows.columns,
                rows: rows.rows,
            },
            Err(e) => error_response(e, Some(sql)),
        },
        Request::Exec { sql, params } => match engine.exec(&sql, &params) {
            Ok(outcome) => Response::ExecResult {
                changes: outcome.changes,
                last_insert_id: outcome.last_insert_id,
            },
            Err(e) => error_response(e, Some(sql)),
        },
        Request::Transaction { statements } => run_transaction(engine, &statements),
        Request::Close => match engine.close() {
            Ok(()) => Response::Ready,
            Err(e) => error_response(e, None),
        },
        Request::Export => match engine.export() {
            Ok(bytes) => Response::ExportResult { bytes },
            Err(e) => error_response(e, None),
        },
        Request::Import { bytes } => match engine.import(&bytes) {
            Ok(()) => Response::Ready,
            Err(e) => error_response(e, None),
        },
    }
}

/// Execute a staged statement list as one atomic unit.
///
/// `BEGIN IMMEDIATE` takes the write lock up front; any statement failure
/// rolls the whole unit back and the original error is reported, so no
/// partial effects are ever observable.
fn run_transaction<E: Engine>(engine: &mut E, statements: &[Statement]) -> Response {
    if let Err(e) = engine.exec("BEGIN IMMEDIATE", &[]) {
        return error_response(e, None);
    }

    let mut changes: u64 = 0;
    let mut last_insert_id = None;
    for (index, statement) in statements.iter().enumerate() {
        match engine.exec(&statement.sql, &statement.params) {
            Ok(outcome) => {
                changes += outcome.changes;
                if outcome.last_insert_id.is_some() {
                    last_insert_id = outcome.last_insert_id;
                }
            }
            Err(e) => {
                if let Err(rollback_err) = engine.exec("ROLLBACK", &[]) {
                    tracing::error!(error = %rollback_err, "Rollback failed after statement error");
                }
                return error_response(e, Some(format!("statement {index}: {}", statement.sql)));
            }
        }
    }

    match engine.exec("COMMIT", &[]) {
        Ok(_) => Response::ExecResult {
            changes,
            last_insert_id,
        },
        Err(e) => {
            let _ = engine.exec("ROLLBACK", &[]);
            error_response(e, None)
        }
    }
}

fn error_response(error: super::EngineError, trace: Option<String>) -> Response {
    Response::Error {
        message: error.to_string(),
        trace,
    }
}
