//! ProcedureService - orchestrates the dynamic execution pipeline and the
//! catalog/audit read surfaces behind the HTTP layer.
//!
//! Step order for `execute` is fixed:
//!   identifier shape → allow-list → metadata → pre-flight → coercion →
//!   cache lookup or execution → audit → outcome.
//! Nothing before the cache/execute decision writes an audit record.

use std::future::Future;
use std::sync::Arc;

use anyhow::anyhow;
use chrono::Utc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::allow_list::{AllowList, PermitAll};
use crate::audit::AuditLogger;
use crate::cache::{cache_key, ResultCache};
use crate::coerce;
use crate::config::ExecutionConfig;
use crate::engine::ExecutionEngine;
use crate::error::{CancelReason, ProcGateError, Result};
use crate::identifier::is_valid_identifier;
use crate::ports::{CatalogReader, ExecutionLogStore, ProcedureExecutor};
use crate::types::{
    ExecutionLogEntry, ExecutionOutcome, ExecutionRequest, LogQuery, ParameterDescriptor,
    ProcedureDescriptor, SchemaDescriptor,
};

pub const DEFAULT_RECENT_LOGS: i64 = 50;

#[derive(Clone)]
pub struct ProcedureService {
    catalog: Arc<dyn CatalogReader>,
    engine: ExecutionEngine,
    cache: Arc<ResultCache>,
    audit: AuditLogger,
    logs: Arc<dyn ExecutionLogStore>,
    allow_list: Arc<dyn AllowList>,
    config: ExecutionConfig,
}

impl ProcedureService {
    pub fn new(
        catalog: Arc<dyn CatalogReader>,
        executor: Arc<dyn ProcedureExecutor>,
        logs: Arc<dyn ExecutionLogStore>,
        config: ExecutionConfig,
    ) -> Self {
        Self {
            catalog,
            engine: ExecutionEngine::new(executor),
            cache: Arc::new(ResultCache::new()),
            audit: AuditLogger::new(Arc::clone(&logs)),
            logs,
            allow_list: Arc::new(PermitAll),
            config,
        }
    }

    pub fn with_allow_list(mut self, allow_list: Arc<dyn AllowList>) -> Self {
        self.allow_list = allow_list;
        self
    }

    pub fn with_cache(mut self, cache: Arc<ResultCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    // ── Catalog surface ───────────────────────────────────────

    pub async fn list_schemas(&self) -> Result<Vec<SchemaDescriptor>> {
        Ok(self.catalog.list_schemas().await?)
    }

    pub async fn list_procedures(&self, schema: &str) -> Result<Vec<ProcedureDescriptor>> {
        if !is_valid_identifier(schema) {
            return Err(ProcGateError::InputShape(schema.to_string()));
        }
        self.ensure_schema(schema).await?;
        Ok(self.catalog.list_procedures(schema).await?)
    }

    pub async fn get_parameters(
        &self,
        schema: &str,
        procedure: &str,
    ) -> Result<Vec<ParameterDescriptor>> {
        check_identifiers(schema, procedure)?;
        self.ensure_exists(schema, procedure).await?;
        Ok(self.catalog.get_parameters(schema, procedure).await?)
    }

    // ── Execution pipeline ────────────────────────────────────

    /// Run one request through the pipeline. `cancel` aborts any pending
    /// catalog read or invocation; the audit write, once started, completes.
    pub async fn execute(
        &self,
        request: &ExecutionRequest,
        cancel: &CancellationToken,
    ) -> Result<ExecutionOutcome> {
        let schema = request.schema.as_str();
        let procedure = request.procedure.as_str();

        check_identifiers(schema, procedure)?;
        if !self.allow_list.is_allowed(schema, procedure) {
            return Err(ProcGateError::Authorization {
                schema: schema.to_string(),
                procedure: procedure.to_string(),
            });
        }

        let descriptors = cancellable(cancel, async {
            self.ensure_exists(schema, procedure).await?;
            Ok::<_, ProcGateError>(self.catalog.get_parameters(schema, procedure).await?)
        })
        .await?;

        coerce::preflight(&descriptors, request)?;
        let coerced = coerce::coerce_all(&descriptors, request)?;

        let key = cache_key(schema, procedure, &coerced).map_err(|e| anyhow!(e))?;
        let executed_at = Utc::now();
        let started = Instant::now();

        let cached = if request.use_cache {
            self.cache.try_get(&key)
        } else {
            None
        };
        let from_cache = cached.is_some();
        let result = match cached {
            Some(hit) => {
                tracing::debug!(schema, procedure, "result cache hit");
                hit
            }
            None => {
                let fresh = Arc::new(
                    self.engine
                        .execute(
                            schema,
                            procedure,
                            &coerced,
                            self.config.command_timeout,
                            self.config.row_limit,
                            cancel,
                        )
                        .await?,
                );
                if request.use_cache {
                    self.cache.put(key, Arc::clone(&fresh), self.config.cache_ttl);
                }
                fresh
            }
        };
        let elapsed = started.elapsed();

        let log_id = self
            .audit
            .record(executed_at, schema, procedure, &coerced, &result, elapsed)
            .await?;

        tracing::info!(
            schema,
            procedure,
            rows = result.row_count,
            from_cache,
            log_id,
            elapsed_ms = elapsed.as_millis() as u64,
            "procedure executed"
        );
        Ok(ExecutionOutcome {
            result,
            log_id,
            from_cache,
        })
    }

    // ── Audit read surface ────────────────────────────────────

    pub async fn recent_logs(&self, top: Option<i64>) -> Result<Vec<ExecutionLogEntry>> {
        let top = top.unwrap_or(DEFAULT_RECENT_LOGS).max(0);
        Ok(self.logs.recent(top).await?)
    }

    pub async fn log_by_id(&self, id: i64) -> Result<Option<ExecutionLogEntry>> {
        Ok(self.logs.get_by_id(id).await?)
    }

    pub async fn query_logs(&self, query: &LogQuery) -> Result<Vec<ExecutionLogEntry>> {
        let mut query = query.clone();
        query.top = query.top.max(0);
        Ok(self.logs.query(&query).await?)
    }

    pub async fn latest_log(&self) -> Result<Option<ExecutionLogEntry>> {
        Ok(self.logs.latest().await?)
    }

    // ── Helpers ───────────────────────────────────────────────

    async fn ensure_schema(&self, schema: &str) -> Result<()> {
        if !self.catalog.schema_exists(schema).await? {
            return Err(ProcGateError::NotFound(format!(
                "Schema '{schema}' does not exist."
            )));
        }
        Ok(())
    }

    async fn ensure_exists(&self, schema: &str, procedure: &str) -> Result<()> {
        self.ensure_schema(schema).await?;
        if !self.catalog.procedure_exists(schema, procedure).await? {
            return Err(ProcGateError::NotFound(format!(
                "Procedure '{schema}.{procedure}' does not exist."
            )));
        }
        Ok(())
    }
}

fn check_identifiers(schema: &str, procedure: &str) -> Result<()> {
    for name in [schema, procedure] {
        if !is_valid_identifier(name) {
            return Err(ProcGateError::InputShape(name.to_string()));
        }
    }
    Ok(())
}

async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ProcGateError::Cancelled(CancelReason::Caller)),
        r = fut => r,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allow_list::StaticAllowList;
    use crate::memory::{MemoryCatalog, MemoryExecutionLogStore, MemoryProcedureExecutor};
    use std::collections::HashMap;

    fn service() -> (ProcedureService, Arc<MemoryExecutionLogStore>) {
        let catalog = Arc::new(MemoryCatalog::new());
        catalog.add_procedure(
            "sales",
            "get_orders",
            vec![ParameterDescriptor::new("customerId", "int")],
        );
        let logs = Arc::new(MemoryExecutionLogStore::new());
        let svc = ProcedureService::new(
            catalog,
            Arc::new(MemoryProcedureExecutor::new()),
            logs.clone(),
            ExecutionConfig::default(),
        );
        (svc, logs)
    }

    #[tokio::test]
    async fn malformed_identifier_rejected_before_io() {
        let (svc, logs) = service();
        let req = ExecutionRequest::new("sales; drop", "get_orders");
        let err = svc.execute(&req, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, ProcGateError::InputShape(_)));
        assert_eq!(logs.row_counts(), (0, 0, 0));
    }

    #[tokio::test]
    async fn denied_by_allow_list() {
        let (svc, _) = service();
        let svc = svc.with_allow_list(Arc::new(StaticAllowList::new(HashMap::new())));
        let req = ExecutionRequest::new("sales", "get_orders").with_parameter("customerId", 7);
        let err = svc.execute(&req, &CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.http_status(), 401);
    }

    #[tokio::test]
    async fn cancelled_token_stops_before_metadata() {
        let (svc, logs) = service();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let req = ExecutionRequest::new("sales", "get_orders").with_parameter("customerId", 7);
        let err = svc.execute(&req, &cancel).await.unwrap_err();
        assert!(matches!(err, ProcGateError::Cancelled(CancelReason::Caller)));
        assert_eq!(logs.row_counts(), (0, 0, 0));
    }

    #[tokio::test]
    async fn unknown_procedure_is_not_found() {
        let (svc, _) = service();
        let err = svc.get_parameters("sales", "nope").await.unwrap_err();
        assert!(matches!(err, ProcGateError::NotFound(_)));
        assert_eq!(err.http_status(), 400);
    }

    #[tokio::test]
    async fn missing_logs_read_as_none() {
        let (svc, _) = service();
        assert!(svc.log_by_id(99).await.unwrap().is_none());
        assert!(svc.latest_log().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_procedures_of_unknown_schema_is_not_found() {
        let (svc, _) = service();
        let err = svc.list_procedures("ghost").await.unwrap_err();
        assert_eq!(err.to_string(), "Schema 'ghost' does not exist.");
        assert_eq!(svc.list_procedures("sales").await.unwrap().len(), 1);
    }
}
