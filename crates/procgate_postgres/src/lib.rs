//! Postgres implementations of the procgate_core port traits.
//!
//! Each adapter is a newtype wrapping PgPool. All SQL is runtime-checked
//! (sqlx::query, not sqlx::query!) to avoid a compile-time DB requirement.

pub mod audit;
pub mod catalog;
pub mod executor;
pub mod row_decode;

pub use audit::PgExecutionLogStore;
pub use catalog::PgCatalogReader;
pub use executor::PgProcedureExecutor;

use sqlx::PgPool;

/// DDL for the audit tables, applied by operators (or tests) before first use.
pub const EXECUTION_LOG_DDL: &str = include_str!("../sql/procedure_execution_log.sql");

/// All Postgres-backed port implementations over one pool.
pub struct PgStores {
    pub catalog: PgCatalogReader,
    pub executor: PgProcedureExecutor,
    pub logs: PgExecutionLogStore,
}

impl PgStores {
    pub fn new(pool: PgPool) -> Self {
        Self {
            catalog: PgCatalogReader::new(pool.clone()),
            executor: PgProcedureExecutor::new(pool.clone()),
            logs: PgExecutionLogStore::new(pool),
        }
    }
}
