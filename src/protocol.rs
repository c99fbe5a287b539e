//! Envelope protocol crossing the isolation boundary.
//!
//! Requests and responses are closed sum types dispatched by exhaustive
//! match on both sides of the boundary. The whole protocol is
//! JSON-serializable so the boundary can be replaced by any
//! message-passing transport without reshaping the types.

use serde::{Deserialize, Serialize};

use crate::config::StorageMode;

/// A SQL value crossing the boundary; SQLite's storage classes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Blob(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// One SQL statement with positional parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
}

impl Statement {
    pub fn new(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

/// A request shipped to the worker context.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Request {
    /// Initialize the engine. Must be the first request.
    Init {
        name: String,
        storage: StorageMode,
        pragmas: Vec<(String, String)>,
    },
    /// Read rows; never fires invalidation.
    Query { sql: String, params: Vec<Value> },
    /// Execute one write statement.
    Exec { sql: String, params: Vec<Value> },
    /// Execute an ordered statement list as one atomic unit.
    Transaction { statements: Vec<Statement> },
    /// Close the engine and terminate the worker.
    Close,
    /// Snapshot the whole database as bytes.
    Export,
    /// Replace the database contents from an exported snapshot.
    Import { bytes: Vec<u8> },
}

/// A response matched back to its request by envelope id.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Response {
    /// Init, Close, or Import completed.
    Ready,
    /// Rows produced by a Query.
    QueryResult {
        columns: Vec<String>,
        rows: Vec<Vec<Value>>,
    },
    /// Outcome of an Exec or Transaction.
    ExecResult {
        changes: u64,
        last_insert_id: Option<i64>,
    },
    /// Database snapshot produced by Export.
    ExportResult { bytes: Vec<u8> },
    /// The operation failed inside the engine.
    Error {
        message: String,
        trace: Option<String>,
    },
}

/// The unit of communication across the isolation boundary.
///
/// Exactly one of `request`/`response` is present; `id` correlates a
/// request with its eventual response and must be unique among
/// concurrently outstanding requests.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Envelope {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request: Option<Request>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<Response>,
}

impl Envelope {
    pub fn request(id: impl Into<String>, request: Request) -> Self {
        Self {
            id: id.into(),
            request: Some(request),
            response: None,
        }
    }

    pub fn response(id: impl Into<String>, response: Response) -> Self {
        Self {
            id: id.into(),
            request: None,
            response: Some(response),
        }
    }
}

/// Result rows of a read query.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueryRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl QueryRows {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }
}

/// Outcome of a write statement.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecOutcome {
    /// Number of rows changed by the statement.
    pub changes: u64,
    /// Rowid of the last inserted row, when the statement inserted one.
    pub last_insert_id: Option<i64>,
}
