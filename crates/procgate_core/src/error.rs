use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Status used for caller-cancelled requests (nginx convention).
pub const STATUS_CLIENT_CLOSED_REQUEST: u16 = 499;

#[derive(Debug, Error)]
pub enum ProcGateError {
    /// Malformed schema or procedure name, rejected before any I/O.
    #[error("invalid identifier: {0}")]
    InputShape(String),

    #[error("not permitted: {schema}.{procedure}")]
    Authorization { schema: String, procedure: String },

    #[error("{0}")]
    NotFound(String),

    /// `message` is safe for any caller; `detail` carries the verbose form
    /// (expected parameter list, rejected raw value) for diagnostic mode.
    #[error("{message}")]
    Validation {
        parameter: String,
        message: String,
        detail: Option<String>,
    },

    #[error("execution failed: {detail}")]
    Execution { detail: String },

    #[error("result exceeds the row limit of {limit} (read {observed} rows)")]
    RowLimitExceeded { observed: usize, limit: usize },

    #[error("request cancelled: {0}")]
    Cancelled(CancelReason),

    /// The procedure ran, but its audit record could not be persisted.
    #[error("audit write failed: {0:#}")]
    AuditWrite(anyhow::Error),

    #[error("unhandled: {0:#}")]
    Unhandled(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The caller went away or cancelled the token.
    Caller,
    /// The command timeout elapsed.
    Timeout(Duration),
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::Caller => f.write_str("cancelled by caller"),
            CancelReason::Timeout(t) => write!(f, "timed out after {}s", t.as_secs_f64()),
        }
    }
}

impl ProcGateError {
    pub fn validation(parameter: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            parameter: parameter.into(),
            message: message.into(),
            detail: None,
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            Self::InputShape(_) => 400,
            Self::Authorization { .. } => 401,
            Self::NotFound(_) => 400,
            Self::Validation { .. } => 400,
            Self::Execution { .. } => 400,
            Self::RowLimitExceeded { .. } => 400,
            Self::Cancelled(_) => STATUS_CLIENT_CLOSED_REQUEST,
            Self::AuditWrite(_) => 500,
            Self::Unhandled(_) => 500,
        }
    }

    /// Message returned to the caller. Internal detail only appears when
    /// `diagnostic` is set; the full error is always logged server-side.
    pub fn public_message(&self, diagnostic: bool) -> String {
        match self {
            Self::InputShape(_) => "Invalid schema or procedure name.".into(),
            Self::Authorization { .. } => "Not permitted.".into(),
            Self::NotFound(msg) => msg.clone(),
            Self::Validation {
                message, detail, ..
            } => match (diagnostic, detail) {
                (true, Some(detail)) => detail.clone(),
                _ => message.clone(),
            },
            Self::Execution { detail } if diagnostic => format!("SQL error: {detail}"),
            Self::Execution { .. } => "SQL error executing stored procedure.".into(),
            Self::RowLimitExceeded { limit, .. } => {
                format!("Too many rows. Limit {limit}.")
            }
            Self::Cancelled(_) => "Request cancelled.".into(),
            Self::AuditWrite(e) if diagnostic => format!("Execution log write failed: {e:#}"),
            Self::AuditWrite(_) => "Execution log write failed.".into(),
            Self::Unhandled(e) if diagnostic => format!("Unhandled error: {e:#}"),
            Self::Unhandled(_) => "Unhandled error.".into(),
        }
    }

    /// Client-side faults (4xx) versus server faults.
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.http_status())
    }
}

pub type Result<T> = std::result::Result<T, ProcGateError>;
