//! Domain types shared by every layer.
//!
//! Descriptors come from the live catalog and are never cached across
//! requests. Coerced parameters and results are per-request values; log
//! entries are append-only once persisted.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::identifier::normalize_param_key;

// ── Catalog descriptors ───────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaDescriptor {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcedureDescriptor {
    pub schema: String,
    pub name: String,
}

/// Declared parameter of a procedure, as read from the catalog.
///
/// `name` is canonical: any `@` sigil is stripped, and request keys are
/// matched against it case-insensitively (see [`ParameterDescriptor::matches_key`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterDescriptor {
    pub name: String,
    pub sql_type: String,
    /// Declared maximum length; `0` or negative means unbounded.
    pub max_length: i32,
    pub is_output: bool,
    pub is_nullable: bool,
}

impl ParameterDescriptor {
    /// Required input parameter with no length bound.
    pub fn new(name: &str, sql_type: impl Into<String>) -> Self {
        Self {
            name: normalize_param_key(name).to_string(),
            sql_type: sql_type.into(),
            max_length: 0,
            is_output: false,
            is_nullable: false,
        }
    }

    pub fn with_max_length(mut self, max_length: i32) -> Self {
        self.max_length = max_length;
        self
    }

    pub fn nullable(mut self) -> Self {
        self.is_nullable = true;
        self
    }

    pub fn output(mut self) -> Self {
        self.is_output = true;
        self
    }

    /// True when a request key addresses this parameter.
    pub fn matches_key(&self, key: &str) -> bool {
        normalize_param_key(key).eq_ignore_ascii_case(&self.name)
    }

    /// Required = must be present in the request before coercion.
    pub fn is_required(&self) -> bool {
        !self.is_output && !self.is_nullable
    }
}

// ── Requests ──────────────────────────────────────────────────

/// One call of a procedure as received from a client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRequest {
    pub schema: String,
    pub procedure: String,
    pub parameters: BTreeMap<String, Value>,
    pub use_cache: bool,
}

impl ExecutionRequest {
    pub fn new(schema: impl Into<String>, procedure: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            procedure: procedure.into(),
            ..Default::default()
        }
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    pub fn with_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }

    /// Raw value supplied for `descriptor`, matched sigil- and case-insensitively.
    pub fn raw_value_for(&self, descriptor: &ParameterDescriptor) -> Option<&Value> {
        self.parameters
            .iter()
            .find(|(key, _)| descriptor.matches_key(key))
            .map(|(_, value)| value)
    }
}

// ── Coerced values ────────────────────────────────────────────

/// Natively typed parameter value.
///
/// Serialized with an explicit type tag so that `Int(7)` and `Text("7")`
/// never produce the same cache key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum SqlValue {
    Null,
    Int(i32),
    BigInt(i64),
    Decimal(Decimal),
    Float(f64),
    Bool(bool),
    DateTime(NaiveDateTime),
    DateTimeOffset(DateTime<FixedOffset>),
    Uuid(Uuid),
    Text(String),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null => f.write_str("NULL"),
            SqlValue::Int(v) => write!(f, "{v}"),
            SqlValue::BigInt(v) => write!(f, "{v}"),
            SqlValue::Decimal(v) => write!(f, "{v}"),
            SqlValue::Float(v) => write!(f, "{v}"),
            SqlValue::Bool(v) => write!(f, "{v}"),
            SqlValue::DateTime(v) => write!(f, "{}", v.format("%Y-%m-%dT%H:%M:%S%.f")),
            SqlValue::DateTimeOffset(v) => write!(f, "{}", v.to_rfc3339()),
            SqlValue::Uuid(v) => write!(f, "{v}"),
            SqlValue::Text(v) => f.write_str(v),
        }
    }
}

/// A parameter that passed validation, ready to bind.
#[derive(Debug, Clone, PartialEq)]
pub struct CoercedParameter {
    pub name: String,
    pub value: SqlValue,
    pub sql_type: String,
    pub is_output: bool,
    pub is_nullable: bool,
    /// The client's input rendered as text, kept for the audit trail.
    pub raw_text: Option<String>,
}

// ── Results ───────────────────────────────────────────────────

/// Rectangular, fully materialized procedure result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub row_count: usize,
    /// Driver-declared type per column, when the backend reports one.
    #[serde(skip)]
    pub column_types: Vec<Option<String>>,
}

/// What the pipeline hands back for a successful call.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub result: Arc<ExecutionResult>,
    pub log_id: i64,
    pub from_cache: bool,
}

// ── Audit log ─────────────────────────────────────────────────

/// Audit record of one execution attempt, before it has an id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionLog {
    pub executed_at: DateTime<Utc>,
    pub schema_name: String,
    pub procedure_name: String,
    pub row_count: i32,
    pub duration_ms: i64,
    pub parameters: Vec<ParameterLog>,
    pub columns: Vec<ColumnLog>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterLog {
    pub name: String,
    pub sql_type: String,
    pub is_output: bool,
    pub is_nullable: bool,
    pub value_as_text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnLog {
    pub ordinal: i32,
    pub name: String,
    pub sql_type: String,
    pub is_nullable: bool,
}

/// A persisted audit record. The id is assigned by the store and never changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionLogEntry {
    pub id: i64,
    #[serde(flatten)]
    pub log: ExecutionLog,
}

/// Filter for the operator-facing audit query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogQuery {
    pub schema_name: Option<String>,
    pub procedure_name: Option<String>,
    pub from_utc: Option<DateTime<Utc>>,
    pub to_utc: Option<DateTime<Utc>>,
    pub top: i64,
}

impl Default for LogQuery {
    fn default() -> Self {
        Self {
            schema_name: None,
            procedure_name: None,
            from_utc: None,
            to_utc: None,
            top: 100,
        }
    }
}

impl LogQuery {
    /// Whether `log` passes every filter set on this query. Blank names are ignored.
    pub fn matches(&self, log: &ExecutionLog) -> bool {
        let name_ok = |filter: &Option<String>, value: &str| match filter {
            Some(f) if !f.trim().is_empty() => f == value,
            _ => true,
        };
        name_ok(&self.schema_name, &log.schema_name)
            && name_ok(&self.procedure_name, &log.procedure_name)
            && self.from_utc.map_or(true, |from| log.executed_at >= from)
            && self.to_utc.map_or(true, |to| log.executed_at <= to)
    }
}
