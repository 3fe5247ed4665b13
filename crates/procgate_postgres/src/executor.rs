//! Procedure invocation over sqlx.
//!
//! Each call runs in its own transaction with `SET LOCAL statement_timeout`,
//! so the timeout never leaks back into the pool. When the timeout fires,
//! Postgres raises 57014 (query_canceled), which maps to
//! [`InvokeError::Cancelled`].
//!
//! The call itself runs on a spawned task that owns the connection. If the
//! `invoke` future is dropped (caller cancelled, client deadline), the task
//! sends `pg_cancel_backend` for its backend from a second pool connection,
//! waits for the statement to abort and rolls back. The connection is held
//! until then, so the cancel can never reach a backend serving someone else.
//!
//! Arguments are passed positionally, each cast to its declared type.
//! Procedures that declare OUT parameters are not supported: `CALL` would
//! need placeholders for them.

use anyhow::anyhow;
use async_trait::async_trait;
use std::time::Duration;

use futures::stream::BoxStream;
use futures::TryStreamExt;
use sqlx::postgres::{PgArguments, PgConnection, PgRow};
use sqlx::query::Query;
use sqlx::{Executor, PgPool, Postgres, Row};
use tokio_util::sync::CancellationToken;

use procgate_core::identifier::{is_sql_identifier, quote_ident};
use procgate_core::ports::{InvokeError, Invocation, ProcedureExecutor, RowSet};
use procgate_core::types::{CoercedParameter, SqlValue};

use crate::row_decode::{
    declared_columns, decode_row, needs_text_projection, plan_columns, text_projection,
    ResultColumn,
};

const QUERY_CANCELED: &str = "57014";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RoutineKind {
    /// Set- or row-returning function: `SELECT * FROM f(...)`.
    Function,
    /// Function returning void: called for its side effects.
    VoidFunction,
    Procedure,
}

pub struct PgProcedureExecutor {
    pool: PgPool,
}

impl PgProcedureExecutor {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProcedureExecutor for PgProcedureExecutor {
    async fn invoke(&self, call: &Invocation<'_>) -> Result<RowSet, InvokeError> {
        let job = CallJob {
            schema: call.schema.to_string(),
            procedure: call.procedure.to_string(),
            parameters: call.parameters.to_vec(),
            timeout: call.timeout,
            row_limit: call.row_limit,
        };

        // Fires when this future completes or is dropped. After completion the
        // task has already finished, so only abandonment has an effect.
        let abandoned = CancellationToken::new();
        let _abandon_on_drop = abandoned.clone().drop_guard();

        let task = tokio::spawn(run_call(self.pool.clone(), job, abandoned));
        task.await
            .map_err(|e| InvokeError::Other(anyhow!("invocation task failed: {e}")))?
    }
}

/// Owned copy of an [`Invocation`], moved onto the invocation task.
struct CallJob {
    schema: String,
    procedure: String,
    parameters: Vec<CoercedParameter>,
    timeout: Duration,
    row_limit: usize,
}

async fn run_call(
    pool: PgPool,
    job: CallJob,
    abandoned: CancellationToken,
) -> Result<RowSet, InvokeError> {
    let mut tx = pool.begin().await.map_err(classify)?;

    let timeout_ms = job.timeout.as_millis().max(1);
    sqlx::query(&format!("SET LOCAL statement_timeout = {timeout_ms}"))
        .execute(&mut *tx)
        .await
        .map_err(classify)?;

    let backend_pid: i32 = sqlx::query_scalar("SELECT pg_backend_pid()")
        .fetch_one(&mut *tx)
        .await
        .map_err(classify)?;

    let kind = routine_kind(&mut tx, &job.schema, &job.procedure).await?;
    let mut sql = call_sql(kind, &job.schema, &job.procedure, &job.parameters);

    // Plan result decoding from the described columns; types without a
    // native mapping are re-selected in their text form.
    let mut plan = Vec::new();
    if kind == RoutineKind::Function {
        let described = (&mut *tx).describe(&sql).await.map_err(classify)?;
        plan = plan_columns(described.columns());
        if needs_text_projection(&plan) {
            let target = call_target(&job.schema, &job.procedure, &job.parameters);
            sql = text_projection(&target, &plan);
        }
    }
    tracing::debug!(schema = %job.schema, procedure = %job.procedure, sql = %sql, backend_pid, "invoking");

    let query = job
        .parameters
        .iter()
        .fold(sqlx::query(&sql), |q, p| bind_value(q, p));

    let rowset = {
        let read = read_rows(query.fetch(&mut *tx), kind, plan, job.row_limit);
        tokio::pin!(read);
        tokio::select! {
            biased;
            r = &mut read => r,
            _ = abandoned.cancelled() => {
                cancel_backend(&pool, backend_pid).await;
                // Drain until the server reports the abort (or the call wins the race).
                read.await
            }
        }
    }?;

    tx.commit().await.map_err(classify)?;
    Ok(rowset)
}

async fn read_rows(
    mut stream: BoxStream<'_, Result<PgRow, sqlx::Error>>,
    kind: RoutineKind,
    mut plan: Vec<ResultColumn>,
    row_limit: usize,
) -> Result<RowSet, InvokeError> {
    let mut rowset = RowSet::default();
    while let Some(row) = stream.try_next().await.map_err(classify)? {
        if kind == RoutineKind::VoidFunction {
            continue;
        }
        if plan.is_empty() {
            plan = plan_columns(row.columns());
        }
        if rowset.declared_columns.is_empty() {
            rowset.declared_columns = declared_columns(&plan);
        }
        rowset.rows.push(decode_row(&row, &plan));
        // One past the limit is enough for the caller to reject.
        if rowset.rows.len() > row_limit {
            break;
        }
    }
    Ok(rowset)
}

/// Ask the server to abort whatever `backend_pid` is running.
async fn cancel_backend(pool: &PgPool, backend_pid: i32) {
    let sent = sqlx::query_scalar::<_, bool>("SELECT pg_cancel_backend($1)")
        .bind(backend_pid)
        .fetch_one(pool)
        .await;
    match sent {
        Ok(true) => tracing::debug!(backend_pid, "abandoned call cancelled on server"),
        Ok(false) => tracing::debug!(backend_pid, "no statement to cancel"),
        Err(e) => tracing::warn!(backend_pid, error = %e, "pg_cancel_backend failed"),
    }
}

async fn routine_kind(
    conn: &mut PgConnection,
    schema: &str,
    procedure: &str,
) -> Result<RoutineKind, InvokeError> {
    let row = sqlx::query_as::<_, (String, Option<String>)>(
        r#"
        SELECT routine_type::text, data_type::text
        FROM information_schema.routines
        WHERE routine_schema = $1 AND routine_name = $2
        ORDER BY specific_name
        LIMIT 1
        "#,
    )
    .bind(schema)
    .bind(procedure)
    .fetch_optional(&mut *conn)
    .await
    .map_err(classify)?;

    match row {
        Some((routine_type, _)) if routine_type == "PROCEDURE" => Ok(RoutineKind::Procedure),
        Some((_, Some(data_type))) if data_type == "void" => Ok(RoutineKind::VoidFunction),
        Some(_) => Ok(RoutineKind::Function),
        None => Err(InvokeError::Database {
            code: None,
            message: format!("routine {schema}.{procedure} does not exist"),
        }),
    }
}

fn call_sql(
    kind: RoutineKind,
    schema: &str,
    procedure: &str,
    parameters: &[CoercedParameter],
) -> String {
    let target = call_target(schema, procedure, parameters);
    match kind {
        RoutineKind::Function => format!("SELECT * FROM {target}"),
        RoutineKind::VoidFunction => format!("SELECT {target}"),
        RoutineKind::Procedure => format!("CALL {target}"),
    }
}

/// `"schema"."procedure"($1::type, ...)`
fn call_target(schema: &str, procedure: &str, parameters: &[CoercedParameter]) -> String {
    let args = parameters
        .iter()
        .enumerate()
        .map(|(i, p)| placeholder(i + 1, &p.sql_type))
        .collect::<Vec<_>>()
        .join(", ");
    format!("{}.{}({args})", quote_ident(schema), quote_ident(procedure))
}

/// `$n::type` when the declared type is a plain name, else an untyped `$n`.
fn placeholder(n: usize, sql_type: &str) -> String {
    if is_sql_identifier(sql_type) {
        format!("${n}::{}", quote_ident(sql_type))
    } else {
        format!("${n}")
    }
}

fn bind_value<'q>(
    q: Query<'q, Postgres, PgArguments>,
    param: &CoercedParameter,
) -> Query<'q, Postgres, PgArguments> {
    match param.value.clone() {
        SqlValue::Null => q.bind(None::<String>),
        SqlValue::Int(v) => q.bind(v),
        SqlValue::BigInt(v) => q.bind(v),
        SqlValue::Decimal(v) => q.bind(v),
        SqlValue::Float(v) => q.bind(v),
        // Postgres has no bool -> bit cast; bit takes its text form.
        SqlValue::Bool(v) if is_bit_type(&param.sql_type) => {
            q.bind(if v { "1" } else { "0" }.to_string())
        }
        SqlValue::Bool(v) => q.bind(v),
        SqlValue::DateTime(v) => q.bind(v),
        SqlValue::DateTimeOffset(v) => q.bind(v.with_timezone(&chrono::Utc)),
        SqlValue::Uuid(v) => q.bind(v),
        SqlValue::Text(v) => q.bind(v),
    }
}

fn is_bit_type(sql_type: &str) -> bool {
    sql_type.eq_ignore_ascii_case("bit") || sql_type.eq_ignore_ascii_case("varbit")
}

fn classify(e: sqlx::Error) -> InvokeError {
    if let Some(db) = e.as_database_error() {
        let code = db.code().map(|c| c.into_owned());
        if code.as_deref() == Some(QUERY_CANCELED) {
            return InvokeError::Cancelled;
        }
        return InvokeError::Database {
            code,
            message: db.message().to_string(),
        };
    }
    InvokeError::Other(anyhow!(e))
}
