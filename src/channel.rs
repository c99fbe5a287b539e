//! Request/response correlation across the isolation boundary.
//!
//! Every request registers a oneshot continuation under a fresh UUIDv7 id
//! *before* transmitting, closing the race between transmission and an
//! immediate response. A pump task matches response envelopes back to
//! their continuations; each continuation fires exactly once. If the
//! worker terminates with requests outstanding, every pending continuation
//! fails with context loss rather than hanging.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, oneshot};

use crate::error::Error;
use crate::generate_request_id;
use crate::protocol::{Envelope, ExecOutcome, QueryRows, Request, Response, Statement, Value};

type Continuation = oneshot::Sender<Result<Response, Error>>;

/// Pending-request table, owned exclusively by the channel; entries are
/// removed exactly once, on matching response or terminal failure.
type PendingMap = Arc<Mutex<HashMap<String, Continuation>>>;

/// Correlated request/response multiplexer over the worker boundary.
pub struct CorrelationChannel {
    to_worker: mpsc::UnboundedSender<Envelope>,
    pending: PendingMap,
    /// Set by the pump on exit; closes the window where a request could
    /// register between the drain and the worker's inbox dropping.
    closed: Arc<AtomicBool>,
}

impl CorrelationChannel {
    /// Wrap a worker's inbox/outbox pair and start the response pump.
    pub fn new(
        to_worker: mpsc::UnboundedSender<Envelope>,
        from_worker: mpsc::UnboundedReceiver<Envelope>,
    ) -> Self {
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));
        tokio::spawn(pump(
            from_worker,
            Arc::clone(&pending),
            Arc::clone(&closed),
        ));
        Self {
            to_worker,
            pending,
            closed,
        }
    }

    /// Send a request and await its matching response.
    ///
    /// Resolves with the response payload, or rejects with the engine's
    /// error, or with [`Error::ContextLost`] if the worker is gone.
    pub async fn send(&self, request: Request) -> Result<Response, Error> {
        let id = generate_request_id();
        let (tx, rx) = oneshot::channel();

        // Register before transmitting so an immediate response finds us.
        self.pending
            .lock()
            .expect("pending map poisoned")
            .insert(id.clone(), tx);

        if self.to_worker.send(Envelope::request(id.clone(), request)).is_err() {
            self.pending
                .lock()
                .expect("pending map poisoned")
                .remove(&id);
            return Err(Error::ContextLost);
        }

        // The pump may already have drained and exited; if our entry is
        // still registered at that point it would never fire.
        if self.closed.load(Ordering::SeqCst)
            && self
                .pending
                .lock()
                .expect("pending map poisoned")
                .remove(&id)
                .is_some()
        {
            return Err(Error::ContextLost);
        }

        match rx.await {
            Ok(result) => result,
            // Continuation dropped without firing: pump terminated between
            // registration and response.
            Err(_) => Err(Error::ContextLost),
        }
    }

    /// Run a read query and decode its rows.
    pub async fn query(&self, sql: &str, params: Vec<Value>) -> Result<QueryRows, Error> {
        match self
            .send(Request::Query {
                sql: sql.to_string(),
                params,
            })
            .await?
        {
            Response::QueryResult { columns, rows } => Ok(QueryRows { columns, rows }),
            _ => Err(Error::UnexpectedResponse { operation: "query" }),
        }
    }

    /// Run a single write statement and decode its outcome.
    pub async fn exec(&self, sql: &str, params: Vec<Value>) -> Result<ExecOutcome, Error> {
        match self
            .send(Request::Exec {
                sql: sql.to_string(),
                params,
            })
            .await?
        {
            Response::ExecResult {
                changes,
                last_insert_id,
            } => Ok(ExecOutcome {
                changes,
                last_insert_id,
            }),
            _ => Err(Error::UnexpectedResponse { operation: "exec" }),
        }
    }

    /// Run an ordered statement list as one atomic unit.
    pub async fn transaction(&self, statements: Vec<Statement>) -> Result<ExecOutcome, Error> {
        match self.send(Request::Transaction { statements }).await? {
            Response::ExecResult {
                changes,
                last_insert_id,
            } => Ok(ExecOutcome {
                changes,
                last_insert_id,
            }),
            _ => Err(Error::UnexpectedResponse {
                operation: "transaction",
            }),
        }
    }

    /// Send a request whose only success response is `Ready`.
    pub async fn expect_ready(
        &self,
        request: Request,
        operation: &'static str,
    ) -> Result<(), Error> {
        match self.send(request).await? {
            Response::Ready => Ok(()),
            _ => Err(Error::UnexpectedResponse { operation }),
        }
    }
}

/// Match response envelopes to pending continuations.
///
/// Runs until the worker's outbox closes, then drains the pending map so
/// no caller hangs on a response that can never arrive.
async fn pump(
    mut from_worker: mpsc::UnboundedReceiver<Envelope>,
    pending: PendingMap,
    closed: Arc<AtomicBool>,
) {
    while let Some(envelope) = from_worker.recv().await {
        let Some(response) = envelope.response else {
            tracing::warn!(id = %envelope.id, "Discarding response envelope without a response");
            continue;
        };

        let continuation = pending
            .lock()
            .expect("pending map poisoned")
            .remove(&envelope.id);
        match continuation {
            Some(tx) => {
                let result = match response {
                    Response::Error { message, trace } => Err(Error::Engine { message, trace }),
                    other => Ok(other),
                };
                // Receiver may have been dropped by an abandoned caller.
                let _ = tx.send(result);
            }
            None => {
                // Stale or duplicate response: silently discarded.
                tracing::warn!(id = %envelope.id, "No pending request for response envelope");
            }
        }
    }

    closed.store(true, Ordering::SeqCst);
    let drained: Vec<Continuation> = {
        let mut map = pending.lock().expect("pending map poisoned");
        map.drain().map(|(_, tx)| tx).collect()
    };
    if !drained.is_empty() {
        tracing::warn!(
            outstanding = drained.len(),
            "Worker terminated with requests outstanding"
        );
    }
    for tx in drained {
        let _ = tx.send(Err(Error::ContextLost));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Value;

    /// A fake worker that answers envelopes with a caller-supplied policy.
    fn fake_worker<F>(mut policy: F) -> CorrelationChannel
    where
        F: FnMut(Envelope) -> Option<Envelope> + Send + 'static,
    {
        let (in_tx, mut in_rx) = mpsc::unbounded_channel::<Envelope>();
        let (out_tx, out_rx) = mpsc::unbounded_channel::<Envelope>();
        tokio::spawn(async move {
            while let Some(envelope) = in_rx.recv().await {
                if let Some(reply) = policy(envelope) {
                    if out_tx.send(reply).is_err() {
                        break;
                    }
                }
            }
        });
        CorrelationChannel::new(in_tx, out_rx)
    }

    fn echo_query(envelope: Envelope) -> Option<Envelope> {
        let Some(Request::Query { sql, .. }) = envelope.request else {
            return Some(Envelope::response(envelope.id, Response::Ready));
        };
        Some(Envelope::response(
            envelope.id,
            Response::QueryResult {
                columns: vec!["echo".into()],
                rows: vec![vec![Value::Text(sql)]],
            },
        ))
    }

    fn query(sql: &str) -> Request {
        Request::Query {
            sql: sql.into(),
            params: vec![],
        }
    }

    #[tokio::test]
    async fn test_resolves_matching_response() {
        let channel = fake_worker(echo_query);
        let response = channel.send(query("SELECT 1")).await.unwrap();
        match response {
            Response::QueryResult { rows, .. } => {
                assert_eq!(rows[0][0], Value::Text("SELECT 1".into()));
            }
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_concurrent_requests_resolve_to_own_responses() {
        // Respond in reverse order of arrival: buffer every envelope and
        // flush them permuted once all have arrived.
        let n = 16usize;
        let buffered = Arc::new(Mutex::new(Vec::new()));
        let buf = Arc::clone(&buffered);
        let (in_tx, mut in_rx) = mpsc::unbounded_channel::<Envelope>();
        let (out_tx, out_rx) = mpsc::unbounded_channel::<Envelope>();
        tokio::spawn(async move {
            while let Some(envelope) = in_rx.recv().await {
                let mut held = buf.lock().unwrap();
                held.push(envelope);
                if held.len() == n {
                    for env in held.drain(..).rev() {
                        let _ = out_tx.send(echo_query(env).unwrap());
                    }
                }
            }
        });
        let channel = Arc::new(CorrelationChannel::new(in_tx, out_rx));

        let futures = (0..n)
            .map(|i| {
                let channel = Arc::clone(&channel);
                async move {
                    let sql = format!("SELECT {i}");
                    let response = channel.send(query(&sql)).await.unwrap();
                    (sql, response)
                }
            })
            .collect::<Vec<_>>();

        for (sql, response) in futures::future::join_all(futures).await {
            match response {
                Response::QueryResult { rows, .. } => {
                    assert_eq!(rows[0][0], Value::Text(sql));
                }
                other => panic!("unexpected response: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_error_response_rejects() {
        let channel = fake_worker(|env| {
            Some(Envelope::response(
                env.id,
                Response::Error {
                    message: "no such table: ghosts".into(),
                    trace: None,
                },
            ))
        });
        let err = channel.send(query("SELECT * FROM ghosts")).await.unwrap_err();
        match err {
            Error::Engine { message, .. } => assert!(message.contains("ghosts")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_stale_response_discarded_silently() {
        // Worker that emits a stale envelope before every real reply; the
        // stale one must be dropped without disturbing the real match.
        let (in_tx, mut in_rx) = mpsc::unbounded_channel::<Envelope>();
        let (out_tx, out_rx) = mpsc::unbounded_channel::<Envelope>();
        tokio::spawn(async move {
            while let Some(envelope) = in_rx.recv().await {
                let _ = out_tx.send(Envelope::response("stale-id", Response::Ready));
                let _ = out_tx.send(Envelope::response(envelope.id, Response::Ready));
            }
        });
        let stale_channel = CorrelationChannel::new(in_tx, out_rx);
        let response = stale_channel.send(Request::Close).await.unwrap();
        assert!(matches!(response, Response::Ready));
    }

    #[tokio::test]
    async fn test_outstanding_requests_fail_on_context_loss() {
        // Worker that never answers and hangs up after the first request.
        let (in_tx, mut in_rx) = mpsc::unbounded_channel::<Envelope>();
        let (out_tx, out_rx) = mpsc::unbounded_channel::<Envelope>();
        tokio::spawn(async move {
            let _ = in_rx.recv().await;
            drop(out_tx);
        });
        let channel = CorrelationChannel::new(in_tx, out_rx);

        let err = channel.send(query("SELECT 1")).await.unwrap_err();
        assert!(matches!(err, Error::ContextLost));

        // Later requests fail the same way once the pump has stopped.
        let err = channel.send(query("SELECT 2")).await.unwrap_err();
        assert!(matches!(err, Error::ContextLost));
    }
}
