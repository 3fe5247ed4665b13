//! Catalog reader over `information_schema`.
//!
//! Functions and procedures both count as callable routines. Overloads are
//! not distinguished by name: parameter metadata comes from the overload with
//! the lowest `specific_name`.

use anyhow::anyhow;
use async_trait::async_trait;
use sqlx::PgPool;

use procgate_core::ports::{CatalogReader, Result};
use procgate_core::types::{ParameterDescriptor, ProcedureDescriptor, SchemaDescriptor};

pub struct PgCatalogReader {
    pool: PgPool,
}

impl PgCatalogReader {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CatalogReader for PgCatalogReader {
    async fn list_schemas(&self) -> Result<Vec<SchemaDescriptor>> {
        let rows = sqlx::query_as::<_, (String,)>(
            r#"
            SELECT schema_name::text
            FROM information_schema.schemata
            WHERE schema_name NOT IN ('pg_catalog', 'information_schema')
              AND schema_name NOT LIKE 'pg\_toast%'
              AND schema_name NOT LIKE 'pg\_temp\_%'
            ORDER BY schema_name
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;

        Ok(rows
            .into_iter()
            .map(|(name,)| SchemaDescriptor { name })
            .collect())
    }

    async fn list_procedures(&self, schema: &str) -> Result<Vec<ProcedureDescriptor>> {
        let rows = sqlx::query_as::<_, (String,)>(
            r#"
            SELECT DISTINCT routine_name::text
            FROM information_schema.routines
            WHERE routine_schema = $1
              AND routine_type IN ('FUNCTION', 'PROCEDURE')
              AND COALESCE(data_type, '') <> 'trigger'
            ORDER BY 1
            "#,
        )
        .bind(schema)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;

        Ok(rows
            .into_iter()
            .map(|(name,)| ProcedureDescriptor {
                schema: schema.to_string(),
                name,
            })
            .collect())
    }

    async fn schema_exists(&self, schema: &str) -> Result<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM information_schema.schemata WHERE schema_name = $1
            )
            "#,
        )
        .bind(schema)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        Ok(exists)
    }

    async fn procedure_exists(&self, schema: &str, procedure: &str) -> Result<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM information_schema.routines
                WHERE routine_schema = $1
                  AND routine_name = $2
                  AND routine_type IN ('FUNCTION', 'PROCEDURE')
            )
            "#,
        )
        .bind(schema)
        .bind(procedure)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        Ok(exists)
    }

    async fn get_parameters(
        &self,
        schema: &str,
        procedure: &str,
    ) -> Result<Vec<ParameterDescriptor>> {
        // OUT parameters are result columns; INOUT ones are bound like inputs.
        // A declared default makes the argument optional.
        let rows = sqlx::query_as::<_, (String, String, i32, bool, bool)>(
            r#"
            WITH target AS (
                SELECT specific_name
                FROM information_schema.routines
                WHERE routine_schema = $1 AND routine_name = $2
                ORDER BY specific_name
                LIMIT 1
            )
            SELECT COALESCE(p.parameter_name::text, 'arg' || p.ordinal_position::text),
                   p.udt_name::text,
                   COALESCE(p.character_maximum_length, 0)::int4,
                   COALESCE(p.parameter_mode = 'OUT', false),
                   p.parameter_default IS NOT NULL
            FROM information_schema.parameters p
            JOIN target t ON t.specific_name = p.specific_name
            WHERE p.specific_schema = $1
            ORDER BY p.ordinal_position
            "#,
        )
        .bind(schema)
        .bind(procedure)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;

        Ok(rows
            .into_iter()
            .map(|(name, sql_type, max_length, is_output, has_default)| {
                let mut d = ParameterDescriptor::new(&name, sql_type).with_max_length(max_length);
                if is_output {
                    d = d.output();
                }
                if has_default {
                    d = d.nullable();
                }
                d
            })
            .collect())
    }
}
