//! Execution engine: one invocation under a deadline and a cancel signal,
//! materialized into a rectangular [`ExecutionResult`].

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::{CancelReason, ProcGateError, Result};
use crate::ports::{InvokeError, Invocation, ProcedureExecutor, RawRow, RowSet};
use crate::types::{CoercedParameter, ExecutionResult};

#[derive(Clone)]
pub struct ExecutionEngine {
    executor: Arc<dyn ProcedureExecutor>,
}

impl ExecutionEngine {
    pub fn new(executor: Arc<dyn ProcedureExecutor>) -> Self {
        Self { executor }
    }

    /// Invoke `schema.procedure` exactly once.
    ///
    /// Whichever comes first of `timeout` and `cancel` abandons the call and
    /// yields [`ProcGateError::Cancelled`]. A result with more than
    /// `row_limit` rows is rejected whole, never truncated.
    pub async fn execute(
        &self,
        schema: &str,
        procedure: &str,
        parameters: &[CoercedParameter],
        timeout: Duration,
        row_limit: usize,
        cancel: &CancellationToken,
    ) -> Result<ExecutionResult> {
        let call = Invocation {
            schema,
            procedure,
            parameters,
            timeout,
            row_limit,
        };

        let invoked = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!(schema, procedure, "invocation abandoned by caller");
                return Err(ProcGateError::Cancelled(CancelReason::Caller));
            }
            r = tokio::time::timeout(timeout, self.executor.invoke(&call)) => r,
        };

        let rowset = match invoked {
            Err(_elapsed) => return Err(ProcGateError::Cancelled(CancelReason::Timeout(timeout))),
            Ok(Err(InvokeError::Cancelled)) => {
                return Err(ProcGateError::Cancelled(CancelReason::Timeout(timeout)))
            }
            Ok(Err(InvokeError::Database { code, message })) => {
                let detail = match code {
                    Some(code) => format!("[{code}] {message}"),
                    None => message,
                };
                return Err(ProcGateError::Execution { detail });
            }
            Ok(Err(InvokeError::Other(e))) => return Err(ProcGateError::Unhandled(e)),
            Ok(Ok(rowset)) => rowset,
        };

        if rowset.rows.len() > row_limit {
            return Err(ProcGateError::RowLimitExceeded {
                observed: rowset.rows.len(),
                limit: row_limit,
            });
        }
        Ok(materialize(rowset))
    }
}

/// Column set comes from the first row; every row is projected onto it,
/// missing cells become null. No rows means no columns.
pub fn materialize(rowset: RowSet) -> ExecutionResult {
    let RowSet {
        rows,
        declared_columns,
    } = rowset;

    let columns: Vec<String> = rows
        .first()
        .map(|first| first.iter().map(|(name, _)| name.clone()).collect())
        .unwrap_or_default();

    let column_types = columns
        .iter()
        .map(|c| {
            declared_columns
                .iter()
                .find(|(name, _)| name == c)
                .map(|(_, ty)| ty.clone())
        })
        .collect();

    let rows: Vec<Vec<Value>> = rows.into_iter().map(|row| project(row, &columns)).collect();
    ExecutionResult {
        row_count: rows.len(),
        columns,
        rows,
        column_types,
    }
}

fn project(row: RawRow, columns: &[String]) -> Vec<Value> {
    let aligned = row.len() == columns.len()
        && row.iter().zip(columns).all(|((name, _), c)| name == c);
    if aligned {
        return row.into_iter().map(|(_, v)| v).collect();
    }
    columns
        .iter()
        .map(|c| {
            row.iter()
                .find(|(name, _)| name == c)
                .map(|(_, v)| v.clone())
                .unwrap_or(Value::Null)
        })
        .collect()
}
