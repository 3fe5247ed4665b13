//! procgate core - dynamic stored-procedure execution.
//!
//! Pure domain logic: descriptors, parameter coercion, the result cache, the
//! audit logger and the request pipeline. Storage and the database driver are
//! reached only through the traits in [`ports`]; `procgate_postgres` implements
//! them with sqlx, [`memory`] implements them in-process for tests.

pub mod allow_list;
pub mod audit;
pub mod cache;
pub mod coerce;
pub mod config;
pub mod engine;
pub mod error;
pub mod identifier;
pub mod memory;
pub mod ports;
pub mod service;
pub mod types;

pub use config::ExecutionConfig;
pub use error::ProcGateError;
pub use service::ProcedureService;
