//! Server configuration from environment variables.
//!
//!   PROCGATE_DATABASE_URL         - Postgres connection string (falls back to DATABASE_URL)
//!   PROCGATE_BIND_ADDR            - listen address (default: 0.0.0.0:5080)
//!   PROCGATE_MAX_CONNECTIONS      - pool size (default: 10)
//!   PROCGATE_ROW_LIMIT            - max rows per result (default: 10000)
//!   PROCGATE_COMMAND_TIMEOUT_SECS - per-call timeout (default: 30)
//!   PROCGATE_CACHE_TTL_SECS       - result cache TTL (default: 300)
//!   PROCGATE_CACHE_SWEEP_SECS     - expired-entry sweep interval (default: 60)
//!   PROCGATE_ENV                  - `development` exposes error detail to callers
//!   PROCGATE_ALLOWED_PROCEDURES   - JSON `{"schema": ["proc", "*"]}`; unset permits all

use std::collections::HashMap;
use std::fmt::Display;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use procgate_core::allow_list::{AllowList, PermitAll, StaticAllowList};
use procgate_core::config::{DEFAULT_CACHE_TTL, DEFAULT_COMMAND_TIMEOUT, DEFAULT_ROW_LIMIT};
use procgate_core::ExecutionConfig;
use thiserror::Error;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:5080";
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_CACHE_SWEEP: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name}={value:?} is invalid: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub database_url: String,
    pub bind_addr: String,
    pub max_connections: u32,
    pub execution: ExecutionConfig,
    pub cache_sweep_interval: Duration,
    pub allowed_procedures: Option<HashMap<String, Vec<String>>>,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let database_url = get("PROCGATE_DATABASE_URL")
            .or_else(|| get("DATABASE_URL"))
            .ok_or(ConfigError::Missing("PROCGATE_DATABASE_URL"))?;

        let row_limit = parse(&get, "PROCGATE_ROW_LIMIT", DEFAULT_ROW_LIMIT)?;
        let timeout = positive_secs(&get, "PROCGATE_COMMAND_TIMEOUT_SECS", DEFAULT_COMMAND_TIMEOUT)?;
        let cache_ttl = positive_secs(&get, "PROCGATE_CACHE_TTL_SECS", DEFAULT_CACHE_TTL)?;
        let sweep = positive_secs(&get, "PROCGATE_CACHE_SWEEP_SECS", DEFAULT_CACHE_SWEEP)?;
        let diagnostic = get("PROCGATE_ENV")
            .is_some_and(|env| env.trim().eq_ignore_ascii_case("development"));

        let allowed_procedures = match get("PROCGATE_ALLOWED_PROCEDURES") {
            None => None,
            Some(raw) if raw.trim().is_empty() => None,
            Some(raw) => Some(serde_json::from_str(&raw).map_err(|e| ConfigError::Invalid {
                name: "PROCGATE_ALLOWED_PROCEDURES",
                value: raw.clone(),
                reason: e.to_string(),
            })?),
        };

        Ok(Self {
            database_url,
            bind_addr: get("PROCGATE_BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.into()),
            max_connections: parse(&get, "PROCGATE_MAX_CONNECTIONS", DEFAULT_MAX_CONNECTIONS)?,
            execution: ExecutionConfig::default()
                .with_row_limit(row_limit)
                .with_command_timeout(timeout)
                .with_cache_ttl(cache_ttl)
                .with_diagnostic_errors(diagnostic),
            cache_sweep_interval: sweep,
            allowed_procedures,
        })
    }

    pub fn allow_list(&self) -> Arc<dyn AllowList> {
        match &self.allowed_procedures {
            Some(entries) => Arc::new(StaticAllowList::new(entries.clone())),
            None => Arc::new(PermitAll),
        }
    }
}

fn parse<T>(
    get: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    match get(name) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}

fn positive_secs(
    get: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    let secs: u64 = parse(get, name, default.as_secs())?;
    if secs == 0 {
        return Err(ConfigError::Invalid {
            name,
            value: "0".into(),
            reason: "must be greater than zero".into(),
        });
    }
    Ok(Duration::from_secs(secs))
}
