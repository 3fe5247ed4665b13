//! Execution log (audit) read handlers.
//!
//! GET /api/execution-logs/recent?top=N       - newest first (default 50)
//! GET /api/execution-logs/latest             - most recent entry, 404 when empty
//! GET /api/execution-logs/query?...          - filtered by schema/procedure/time range
//! GET /api/execution-logs/:id                - single entry, 404 when absent

use std::sync::Arc;

use axum::Extension;
use chrono::{DateTime, Utc};
use procgate_core::types::{ExecutionLogEntry, LogQuery};
use procgate_core::ProcedureService;
use serde::Deserialize;

use crate::envelope::ApiResponse;
use crate::error::AppError;
use crate::extract::{Path, Query};

#[derive(Debug, Default, Deserialize)]
pub struct RecentParams {
    pub top: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryParams {
    pub schema_name: Option<String>,
    pub procedure_name: Option<String>,
    pub from_utc: Option<DateTime<Utc>>,
    pub to_utc: Option<DateTime<Utc>>,
    pub top: Option<i64>,
}

impl From<QueryParams> for LogQuery {
    fn from(p: QueryParams) -> Self {
        let defaults = LogQuery::default();
        LogQuery {
            schema_name: p.schema_name,
            procedure_name: p.procedure_name,
            from_utc: p.from_utc,
            to_utc: p.to_utc,
            top: p.top.unwrap_or(defaults.top),
        }
    }
}

pub async fn recent(
    Extension(service): Extension<Arc<ProcedureService>>,
    Query(params): Query<RecentParams>,
) -> Result<ApiResponse<Vec<ExecutionLogEntry>>, AppError> {
    let diagnostic = service.config().diagnostic_errors;
    let entries = service
        .recent_logs(params.top)
        .await
        .map_err(AppError::core(diagnostic))?;
    Ok(ApiResponse::ok(entries))
}

pub async fn latest(
    Extension(service): Extension<Arc<ProcedureService>>,
) -> Result<ApiResponse<ExecutionLogEntry>, AppError> {
    let diagnostic = service.config().diagnostic_errors;
    service
        .latest_log()
        .await
        .map_err(AppError::core(diagnostic))?
        .map(ApiResponse::ok)
        .ok_or_else(|| AppError::not_found("No execution logs found."))
}

pub async fn query(
    Extension(service): Extension<Arc<ProcedureService>>,
    Query(params): Query<QueryParams>,
) -> Result<ApiResponse<Vec<ExecutionLogEntry>>, AppError> {
    let diagnostic = service.config().diagnostic_errors;
    let entries = service
        .query_logs(&params.into())
        .await
        .map_err(AppError::core(diagnostic))?;
    Ok(ApiResponse::ok(entries))
}

pub async fn get_by_id(
    Extension(service): Extension<Arc<ProcedureService>>,
    Path(id): Path<i64>,
) -> Result<ApiResponse<ExecutionLogEntry>, AppError> {
    let diagnostic = service.config().diagnostic_errors;
    service
        .log_by_id(id)
        .await
        .map_err(AppError::core(diagnostic))?
        .map(ApiResponse::ok)
        .ok_or_else(|| AppError::not_found(format!("Execution log {id} not found.")))
}
