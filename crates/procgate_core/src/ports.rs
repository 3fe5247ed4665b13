//! Port traits for the database collaborators.
//! Implemented by procgate_postgres - core logic depends only on these traits.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::types::{
    CoercedParameter, ExecutionLog, ExecutionLogEntry, LogQuery, ParameterDescriptor,
    ProcedureDescriptor, SchemaDescriptor,
};

pub type Result<T> = anyhow::Result<T>;

// ── Catalog ───────────────────────────────────────────────────

/// Read-only view of the live database catalog.
///
/// Implementations must not cache: a stale parameter list turns into
/// silent type errors at execution time.
#[async_trait]
pub trait CatalogReader: Send + Sync {
    /// All user schemas, ordered by name.
    async fn list_schemas(&self) -> Result<Vec<SchemaDescriptor>>;

    /// Procedures of a schema, ordered by name. Empty when the schema is unknown.
    async fn list_procedures(&self, schema: &str) -> Result<Vec<ProcedureDescriptor>>;

    async fn schema_exists(&self, schema: &str) -> Result<bool>;

    async fn procedure_exists(&self, schema: &str, procedure: &str) -> Result<bool>;

    /// Declared parameters, ordered by native ordinal, names sigil-normalized.
    async fn get_parameters(&self, schema: &str, procedure: &str)
        -> Result<Vec<ParameterDescriptor>>;
}

// ── Invocation ────────────────────────────────────────────────

/// One row as the driver returned it: ordered (column, value) pairs.
pub type RawRow = Vec<(String, Value)>;

/// Everything a single invocation produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowSet {
    pub rows: Vec<RawRow>,
    /// Driver-declared result columns as (name, type name), when known.
    pub declared_columns: Vec<(String, String)>,
}

impl RowSet {
    /// Build a row set from a column list and positional rows.
    pub fn from_values(columns: &[&str], rows: Vec<Vec<Value>>) -> Self {
        let rows = rows
            .into_iter()
            .map(|values| {
                columns
                    .iter()
                    .map(|c| c.to_string())
                    .zip(values)
                    .collect()
            })
            .collect();
        Self {
            rows,
            declared_columns: Vec::new(),
        }
    }

    pub fn with_declared_columns(mut self, declared: &[(&str, &str)]) -> Self {
        self.declared_columns = declared
            .iter()
            .map(|(n, t)| (n.to_string(), t.to_string()))
            .collect();
        self
    }
}

/// Arguments of a single procedure call.
#[derive(Debug, Clone)]
pub struct Invocation<'a> {
    pub schema: &'a str,
    pub procedure: &'a str,
    pub parameters: &'a [CoercedParameter],
    pub timeout: Duration,
    /// Adapters may stop reading after `row_limit + 1` rows.
    pub row_limit: usize,
}

#[derive(Debug, Error)]
pub enum InvokeError {
    /// The database rejected or failed the call.
    #[error("{message}")]
    Database {
        code: Option<String>,
        message: String,
    },

    /// The server aborted the statement (e.g. statement timeout).
    #[error("statement cancelled by the database")]
    Cancelled,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[async_trait]
pub trait ProcedureExecutor: Send + Sync {
    /// Invoke once, no retries. Dropping the future must abandon the call,
    /// including a statement still running on the server.
    async fn invoke(&self, call: &Invocation<'_>) -> std::result::Result<RowSet, InvokeError>;
}

// ── Execution log ─────────────────────────────────────────────

/// Append-only store for execution audit records.
#[async_trait]
pub trait ExecutionLogStore: Send + Sync {
    /// Persist master + parameter rows + column rows atomically.
    /// Returns the id assigned to the master row.
    async fn record(&self, log: &ExecutionLog) -> Result<i64>;

    async fn get_by_id(&self, id: i64) -> Result<Option<ExecutionLogEntry>>;

    /// Newest first.
    async fn recent(&self, top: i64) -> Result<Vec<ExecutionLogEntry>>;

    /// Newest first, filtered.
    async fn query(&self, query: &LogQuery) -> Result<Vec<ExecutionLogEntry>>;

    async fn latest(&self) -> Result<Option<ExecutionLogEntry>>;
}
