//! procgate_server - REST surface over the procgate execution pipeline.

pub mod config;
pub mod envelope;
pub mod error;
pub mod extract;
pub mod handlers;
pub mod router;
