//! Audit logger: turns a completed execution into an [`ExecutionLog`] and
//! persists it through the [`ExecutionLogStore`] port.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::{ProcGateError, Result};
use crate::ports::ExecutionLogStore;
use crate::types::{CoercedParameter, ColumnLog, ExecutionLog, ExecutionResult, ParameterLog};

#[derive(Clone)]
pub struct AuditLogger {
    store: Arc<dyn ExecutionLogStore>,
}

impl AuditLogger {
    pub fn new(store: Arc<dyn ExecutionLogStore>) -> Self {
        Self { store }
    }

    /// Persist one record atomically and return its id.
    /// Any store failure surfaces as [`ProcGateError::AuditWrite`].
    pub async fn record(
        &self,
        executed_at: DateTime<Utc>,
        schema: &str,
        procedure: &str,
        parameters: &[CoercedParameter],
        result: &ExecutionResult,
        elapsed: Duration,
    ) -> Result<i64> {
        let log = build_log(executed_at, schema, procedure, parameters, result, elapsed);
        let id = self
            .store
            .record(&log)
            .await
            .map_err(ProcGateError::AuditWrite)?;
        tracing::debug!(
            id,
            schema,
            procedure,
            rows = log.row_count,
            duration_ms = log.duration_ms,
            "execution logged"
        );
        Ok(id)
    }
}

pub fn build_log(
    executed_at: DateTime<Utc>,
    schema: &str,
    procedure: &str,
    parameters: &[CoercedParameter],
    result: &ExecutionResult,
    elapsed: Duration,
) -> ExecutionLog {
    ExecutionLog {
        executed_at,
        schema_name: schema.to_string(),
        procedure_name: procedure.to_string(),
        row_count: i32::try_from(result.row_count).unwrap_or(i32::MAX),
        duration_ms: i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX),
        parameters: parameters.iter().map(parameter_log).collect(),
        columns: column_logs(result),
    }
}

fn parameter_log(p: &CoercedParameter) -> ParameterLog {
    ParameterLog {
        name: p.name.clone(),
        sql_type: p.sql_type.clone(),
        is_output: p.is_output,
        is_nullable: p.is_nullable,
        value_as_text: p.raw_text.clone(),
    }
}

/// One row per result column. The type is the driver-declared one when
/// known, else inferred from the first row; nullability reflects the
/// first row's value.
fn column_logs(result: &ExecutionResult) -> Vec<ColumnLog> {
    let first = result.rows.first();
    result
        .columns
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let sample = first.and_then(|row| row.get(i)).unwrap_or(&Value::Null);
            let sql_type = result
                .column_types
                .get(i)
                .cloned()
                .flatten()
                .unwrap_or_else(|| json_type_name(sample).to_string());
            ColumnLog {
                ordinal: i32::try_from(i).unwrap_or(i32::MAX),
                name: name.clone(),
                sql_type,
                is_nullable: sample.is_null(),
            }
        })
        .collect()
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "Unknown",
        Value::Bool(_) => "Boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "Int64",
        Value::Number(_) => "Double",
        Value::String(_) => "String",
        Value::Array(_) => "Array",
        Value::Object(_) => "Object",
    }
}
