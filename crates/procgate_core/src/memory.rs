//! In-memory implementations of the port traits.
//!
//! Used by the pipeline and HTTP tests, and handy for running the server
//! without a database. The execution log store keeps the same three-table
//! shape as the Postgres schema and rolls back partial writes, so atomicity
//! can be exercised with [`MemoryExecutionLogStore::fail_next_write_at`].

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::ports::{
    CatalogReader, ExecutionLogStore, InvokeError, Invocation, ProcedureExecutor, Result, RowSet,
};
use crate::types::{
    CoercedParameter, ColumnLog, ExecutionLog, ExecutionLogEntry, LogQuery, ParameterDescriptor,
    ParameterLog, ProcedureDescriptor, SchemaDescriptor,
};

// ── MemoryCatalog ─────────────────────────────────────────────

type ProcedureMap = BTreeMap<String, Vec<ParameterDescriptor>>;

#[derive(Debug, Default)]
pub struct MemoryCatalog {
    schemas: RwLock<BTreeMap<String, ProcedureMap>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_schema(&self, schema: &str) {
        self.schemas
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(schema.to_string())
            .or_default();
    }

    /// Register (or replace) a procedure, creating its schema if needed.
    pub fn add_procedure(&self, schema: &str, procedure: &str, parameters: Vec<ParameterDescriptor>) {
        self.schemas
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(schema.to_string())
            .or_default()
            .insert(procedure.to_string(), parameters);
    }

    pub fn drop_procedure(&self, schema: &str, procedure: &str) {
        if let Some(procs) = self
            .schemas
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(schema)
        {
            procs.remove(procedure);
        }
    }

    fn read<T>(&self, f: impl FnOnce(&BTreeMap<String, ProcedureMap>) -> T) -> T {
        f(&self.schemas.read().unwrap_or_else(PoisonError::into_inner))
    }
}

#[async_trait]
impl CatalogReader for MemoryCatalog {
    async fn list_schemas(&self) -> Result<Vec<SchemaDescriptor>> {
        Ok(self.read(|s| {
            s.keys()
                .map(|name| SchemaDescriptor { name: name.clone() })
                .collect()
        }))
    }

    async fn list_procedures(&self, schema: &str) -> Result<Vec<ProcedureDescriptor>> {
        Ok(self.read(|s| {
            s.get(schema)
                .map(|procs| {
                    procs
                        .keys()
                        .map(|name| ProcedureDescriptor {
                            schema: schema.to_string(),
                            name: name.clone(),
                        })
                        .collect()
                })
                .unwrap_or_default()
        }))
    }

    async fn schema_exists(&self, schema: &str) -> Result<bool> {
        Ok(self.read(|s| s.contains_key(schema)))
    }

    async fn procedure_exists(&self, schema: &str, procedure: &str) -> Result<bool> {
        Ok(self.read(|s| s.get(schema).is_some_and(|p| p.contains_key(procedure))))
    }

    async fn get_parameters(
        &self,
        schema: &str,
        procedure: &str,
    ) -> Result<Vec<ParameterDescriptor>> {
        Ok(self.read(|s| {
            s.get(schema)
                .and_then(|p| p.get(procedure))
                .cloned()
                .unwrap_or_default()
        }))
    }
}

// ── MemoryProcedureExecutor ───────────────────────────────────

type Handler =
    Arc<dyn Fn(&[CoercedParameter]) -> std::result::Result<RowSet, InvokeError> + Send + Sync>;

#[derive(Clone)]
struct Registered {
    handler: Handler,
    latency: Option<Duration>,
}

/// Scripted procedures: each `schema.procedure` maps to a closure over the
/// coerced parameters. Counts invocations so tests can observe caching.
#[derive(Default)]
pub struct MemoryProcedureExecutor {
    procedures: RwLock<HashMap<String, Registered>>,
    calls: Mutex<HashMap<String, usize>>,
}

impl MemoryProcedureExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&self, schema: &str, procedure: &str, handler: F)
    where
        F: Fn(&[CoercedParameter]) -> std::result::Result<RowSet, InvokeError>
            + Send
            + Sync
            + 'static,
    {
        self.insert(schema, procedure, Arc::new(handler), None);
    }

    /// Like [`register`](Self::register), but every call first sleeps for `latency`.
    pub fn register_slow<F>(&self, schema: &str, procedure: &str, latency: Duration, handler: F)
    where
        F: Fn(&[CoercedParameter]) -> std::result::Result<RowSet, InvokeError>
            + Send
            + Sync
            + 'static,
    {
        self.insert(schema, procedure, Arc::new(handler), Some(latency));
    }

    fn insert(&self, schema: &str, procedure: &str, handler: Handler, latency: Option<Duration>) {
        self.procedures
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(format!("{schema}.{procedure}"), Registered { handler, latency });
    }

    pub fn call_count(&self, schema: &str, procedure: &str) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&format!("{schema}.{procedure}"))
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl ProcedureExecutor for MemoryProcedureExecutor {
    async fn invoke(&self, call: &Invocation<'_>) -> std::result::Result<RowSet, InvokeError> {
        let key = format!("{}.{}", call.schema, call.procedure);
        *self
            .calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.clone())
            .or_insert(0) += 1;

        let registered = self
            .procedures
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .cloned();
        let Some(registered) = registered else {
            return Err(InvokeError::Database {
                code: Some("42883".into()),
                message: format!("function {key} does not exist"),
            });
        };

        if let Some(latency) = registered.latency {
            tokio::time::sleep(latency).await;
        }
        (registered.handler)(call.parameters)
    }
}

// ── MemoryExecutionLogStore ───────────────────────────────────

/// Which table write a forced failure hits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditWriteStage {
    Master,
    Parameter,
    Column,
}

#[derive(Debug, Clone)]
struct MasterRow {
    id: i64,
    executed_at: DateTime<Utc>,
    schema_name: String,
    procedure_name: String,
    row_count: i32,
    duration_ms: i64,
}

#[derive(Debug, Default)]
struct Tables {
    /// Like a database sequence, ids are not reused after a rollback.
    next_id: i64,
    masters: Vec<MasterRow>,
    parameters: Vec<(i64, ParameterLog)>,
    columns: Vec<(i64, ColumnLog)>,
}

impl Tables {
    fn assemble(&self, master: &MasterRow) -> ExecutionLogEntry {
        let mut columns: Vec<ColumnLog> = self
            .columns
            .iter()
            .filter(|(id, _)| *id == master.id)
            .map(|(_, c)| c.clone())
            .collect();
        columns.sort_by_key(|c| c.ordinal);
        ExecutionLogEntry {
            id: master.id,
            log: ExecutionLog {
                executed_at: master.executed_at,
                schema_name: master.schema_name.clone(),
                procedure_name: master.procedure_name.clone(),
                row_count: master.row_count,
                duration_ms: master.duration_ms,
                parameters: self
                    .parameters
                    .iter()
                    .filter(|(id, _)| *id == master.id)
                    .map(|(_, p)| p.clone())
                    .collect(),
                columns,
            },
        }
    }

    fn newest_first<'a>(&'a self) -> impl Iterator<Item = &'a MasterRow> + 'a {
        self.masters.iter().rev()
    }

    fn rollback_to(&mut self, savepoint: (usize, usize, usize)) {
        self.masters.truncate(savepoint.0);
        self.parameters.truncate(savepoint.1);
        self.columns.truncate(savepoint.2);
    }
}

#[derive(Debug, Default)]
pub struct MemoryExecutionLogStore {
    tables: Mutex<Tables>,
    fail_at: Mutex<Option<AuditWriteStage>>,
}

impl MemoryExecutionLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `record` fail when it reaches `stage`. One-shot.
    pub fn fail_next_write_at(&self, stage: AuditWriteStage) {
        *self.fail_at.lock().unwrap_or_else(PoisonError::into_inner) = Some(stage);
    }

    /// Committed row counts as (masters, parameters, columns).
    pub fn row_counts(&self) -> (usize, usize, usize) {
        let t = self.tables.lock().unwrap_or_else(PoisonError::into_inner);
        (t.masters.len(), t.parameters.len(), t.columns.len())
    }

    fn tables(&self) -> std::sync::MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ExecutionLogStore for MemoryExecutionLogStore {
    async fn record(&self, log: &ExecutionLog) -> Result<i64> {
        let fail_at = self
            .fail_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let mut t = self.tables();
        let savepoint = (t.masters.len(), t.parameters.len(), t.columns.len());

        t.next_id += 1;
        let id = t.next_id;
        let fail = |t: &mut Tables, stage: AuditWriteStage| -> Result<i64> {
            t.rollback_to(savepoint);
            anyhow::bail!("forced failure writing {stage:?} row for execution {id}")
        };

        if fail_at == Some(AuditWriteStage::Master) {
            return fail(&mut t, AuditWriteStage::Master);
        }
        t.masters.push(MasterRow {
            id,
            executed_at: log.executed_at,
            schema_name: log.schema_name.clone(),
            procedure_name: log.procedure_name.clone(),
            row_count: log.row_count,
            duration_ms: log.duration_ms,
        });
        for p in &log.parameters {
            if fail_at == Some(AuditWriteStage::Parameter) {
                return fail(&mut t, AuditWriteStage::Parameter);
            }
            t.parameters.push((id, p.clone()));
        }
        for c in &log.columns {
            if fail_at == Some(AuditWriteStage::Column) {
                return fail(&mut t, AuditWriteStage::Column);
            }
            t.columns.push((id, c.clone()));
        }
        Ok(id)
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<ExecutionLogEntry>> {
        let t = self.tables();
        Ok(t.masters.iter().find(|m| m.id == id).map(|m| t.assemble(m)))
    }

    async fn recent(&self, top: i64) -> Result<Vec<ExecutionLogEntry>> {
        let t = self.tables();
        let top = usize::try_from(top).unwrap_or(0);
        Ok(t.newest_first().take(top).map(|m| t.assemble(m)).collect())
    }

    async fn query(&self, query: &LogQuery) -> Result<Vec<ExecutionLogEntry>> {
        let t = self.tables();
        let top = usize::try_from(query.top).unwrap_or(0);
        let entries: Vec<_> = t
            .newest_first()
            .map(|m| t.assemble(m))
            .filter(|e| query.matches(&e.log))
            .take(top)
            .collect();
        Ok(entries)
    }

    async fn latest(&self) -> Result<Option<ExecutionLogEntry>> {
        let t = self.tables();
        let latest = t.newest_first().next().map(|m| t.assemble(m));
        Ok(latest)
    }
}
