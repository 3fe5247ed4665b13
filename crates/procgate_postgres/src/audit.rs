//! Postgres-backed execution log (`procgate.procedure_execution_*`).
//!
//! Writes are one transaction across the three tables. Reads load the master
//! rows first, then both child tables in one round trip each via `= ANY($1)`.

use std::collections::HashMap;

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use procgate_core::ports::{ExecutionLogStore, Result};
use procgate_core::types::{ColumnLog, ExecutionLog, ExecutionLogEntry, LogQuery, ParameterLog};

type MasterRow = (i64, DateTime<Utc>, String, String, i32, i64);

const MASTER_COLUMNS: &str =
    "id, executed_at_utc, schema_name, procedure_name, row_count, duration_ms";

pub struct PgExecutionLogStore {
    pool: PgPool,
}

impl PgExecutionLogStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn with_children(&self, masters: Vec<MasterRow>) -> Result<Vec<ExecutionLogEntry>> {
        if masters.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<i64> = masters.iter().map(|m| m.0).collect();

        let params = sqlx::query_as::<_, (i64, String, String, bool, bool, Option<String>)>(
            r#"
            SELECT execution_log_id, name, sql_type, is_output, is_nullable, value_as_text
            FROM procgate.procedure_execution_parameter
            WHERE execution_log_id = ANY($1)
            ORDER BY id
            "#,
        )
        .bind(ids.as_slice())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;

        let columns = sqlx::query_as::<_, (i64, i32, String, String, bool)>(
            r#"
            SELECT execution_log_id, ordinal, name, sql_type, is_nullable
            FROM procgate.procedure_execution_column
            WHERE execution_log_id = ANY($1)
            ORDER BY execution_log_id, ordinal
            "#,
        )
        .bind(ids.as_slice())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;

        let mut params_by_id: HashMap<i64, Vec<ParameterLog>> = HashMap::new();
        for (id, name, sql_type, is_output, is_nullable, value_as_text) in params {
            params_by_id.entry(id).or_default().push(ParameterLog {
                name,
                sql_type,
                is_output,
                is_nullable,
                value_as_text,
            });
        }
        let mut columns_by_id: HashMap<i64, Vec<ColumnLog>> = HashMap::new();
        for (id, ordinal, name, sql_type, is_nullable) in columns {
            columns_by_id.entry(id).or_default().push(ColumnLog {
                ordinal,
                name,
                sql_type,
                is_nullable,
            });
        }

        Ok(masters
            .into_iter()
            .map(
                |(id, executed_at, schema_name, procedure_name, row_count, duration_ms)| {
                    ExecutionLogEntry {
                        id,
                        log: ExecutionLog {
                            executed_at,
                            schema_name,
                            procedure_name,
                            row_count,
                            duration_ms,
                            parameters: params_by_id.remove(&id).unwrap_or_default(),
                            columns: columns_by_id.remove(&id).unwrap_or_default(),
                        },
                    }
                },
            )
            .collect())
    }
}

#[async_trait]
impl ExecutionLogStore for PgExecutionLogStore {
    async fn record(&self, log: &ExecutionLog) -> Result<i64> {
        let mut tx = self.pool.begin().await.map_err(|e| anyhow!(e))?;

        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO procgate.procedure_execution_log
                (executed_at_utc, schema_name, procedure_name, row_count, duration_ms)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id
            "#,
        )
        .bind(log.executed_at)
        .bind(&log.schema_name)
        .bind(&log.procedure_name)
        .bind(log.row_count)
        .bind(log.duration_ms)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| anyhow!(e))?;

        for p in &log.parameters {
            sqlx::query(
                r#"
                INSERT INTO procgate.procedure_execution_parameter
                    (execution_log_id, name, sql_type, is_output, is_nullable, value_as_text)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(id)
            .bind(&p.name)
            .bind(&p.sql_type)
            .bind(p.is_output)
            .bind(p.is_nullable)
            .bind(p.value_as_text.as_deref())
            .execute(&mut *tx)
            .await
            .map_err(|e| anyhow!(e))?;
        }

        for c in &log.columns {
            sqlx::query(
                r#"
                INSERT INTO procgate.procedure_execution_column
                    (execution_log_id, ordinal, name, sql_type, is_nullable)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(id)
            .bind(c.ordinal)
            .bind(&c.name)
            .bind(&c.sql_type)
            .bind(c.is_nullable)
            .execute(&mut *tx)
            .await
            .map_err(|e| anyhow!(e))?;
        }

        tx.commit().await.map_err(|e| anyhow!(e))?;
        Ok(id)
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<ExecutionLogEntry>> {
        let sql = format!("SELECT {MASTER_COLUMNS} FROM procgate.procedure_execution_log WHERE id = $1");
        let master = sqlx::query_as::<_, MasterRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| anyhow!(e))?;
        Ok(self
            .with_children(master.into_iter().collect())
            .await?
            .into_iter()
            .next())
    }

    async fn recent(&self, top: i64) -> Result<Vec<ExecutionLogEntry>> {
        let sql = format!(
            "SELECT {MASTER_COLUMNS} FROM procgate.procedure_execution_log ORDER BY id DESC LIMIT $1"
        );
        let masters = sqlx::query_as::<_, MasterRow>(&sql)
            .bind(top)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| anyhow!(e))?;
        self.with_children(masters).await
    }

    async fn query(&self, query: &LogQuery) -> Result<Vec<ExecutionLogEntry>> {
        let non_blank = |s: &Option<String>| s.clone().filter(|v| !v.trim().is_empty());
        let sql = format!(
            r#"
            SELECT {MASTER_COLUMNS}
            FROM procgate.procedure_execution_log
            WHERE ($1::text IS NULL OR schema_name = $1)
              AND ($2::text IS NULL OR procedure_name = $2)
              AND ($3::timestamptz IS NULL OR executed_at_utc >= $3)
              AND ($4::timestamptz IS NULL OR executed_at_utc <= $4)
            ORDER BY id DESC
            LIMIT $5
            "#
        );
        let masters = sqlx::query_as::<_, MasterRow>(&sql)
            .bind(non_blank(&query.schema_name))
            .bind(non_blank(&query.procedure_name))
            .bind(query.from_utc)
            .bind(query.to_utc)
            .bind(query.top)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| anyhow!(e))?;
        self.with_children(masters).await
    }

    async fn latest(&self) -> Result<Option<ExecutionLogEntry>> {
        Ok(self.recent(1).await?.into_iter().next())
    }
}
