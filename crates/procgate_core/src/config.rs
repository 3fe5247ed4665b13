//! Pipeline limits, passed explicitly into [`crate::ProcedureService`].

use std::time::Duration;

pub const DEFAULT_ROW_LIMIT: usize = 10_000;
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionConfig {
    /// Results with more rows than this are rejected whole.
    pub row_limit: usize,
    pub command_timeout: Duration,
    pub cache_ttl: Duration,
    /// Expose internal error detail (SQL messages, expected parameters) to callers.
    pub diagnostic_errors: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            row_limit: DEFAULT_ROW_LIMIT,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            cache_ttl: DEFAULT_CACHE_TTL,
            diagnostic_errors: false,
        }
    }
}

impl ExecutionConfig {
    pub fn with_row_limit(mut self, row_limit: usize) -> Self {
        self.row_limit = row_limit;
        self
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn with_diagnostic_errors(mut self, enabled: bool) -> Self {
        self.diagnostic_errors = enabled;
        self
    }
}
