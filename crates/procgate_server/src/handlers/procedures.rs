//! Catalog and execution handlers.
//!
//! GET  /api/procedures/schemas                          - list schemas
//! GET  /api/procedures/:schema/procedures               - list procedures of a schema
//! GET  /api/procedures/:schema/:procedure/parameters    - declared parameters
//! POST /api/procedures/:schema/:procedure/execute       - run a procedure

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::body::Bytes;
use axum::response::{IntoResponse, Response};
use axum::Extension;
use procgate_core::types::{
    ExecutionRequest, ParameterDescriptor, ProcedureDescriptor, SchemaDescriptor,
};
use procgate_core::ProcedureService;
use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::envelope::ApiResponse;
use crate::error::AppError;
use crate::extract::Path;

/// Execute request body. A missing or empty body means no parameters.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteBody {
    #[serde(default)]
    pub parameters: Option<BTreeMap<String, Value>>,
    #[serde(default)]
    pub use_cache: Option<bool>,
}

impl ExecuteBody {
    fn parse(body: &[u8]) -> Result<Self, AppError> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        serde_json::from_slice(body)
            .map_err(|e| AppError::bad_request(format!("Invalid request body: {e}")))
    }
}

pub async fn list_schemas(
    Extension(service): Extension<Arc<ProcedureService>>,
) -> Result<ApiResponse<Vec<SchemaDescriptor>>, AppError> {
    let diagnostic = service.config().diagnostic_errors;
    let schemas = service
        .list_schemas()
        .await
        .map_err(AppError::core(diagnostic))?;
    Ok(ApiResponse::ok(schemas))
}

pub async fn list_procedures(
    Extension(service): Extension<Arc<ProcedureService>>,
    Path(schema): Path<String>,
) -> Result<ApiResponse<Vec<ProcedureDescriptor>>, AppError> {
    let diagnostic = service.config().diagnostic_errors;
    let procedures = service
        .list_procedures(&schema)
        .await
        .map_err(AppError::core(diagnostic))?;
    Ok(ApiResponse::ok(procedures))
}

pub async fn get_parameters(
    Extension(service): Extension<Arc<ProcedureService>>,
    Path((schema, procedure)): Path<(String, String)>,
) -> Result<ApiResponse<Vec<ParameterDescriptor>>, AppError> {
    let diagnostic = service.config().diagnostic_errors;
    let parameters = service
        .get_parameters(&schema, &procedure)
        .await
        .map_err(AppError::core(diagnostic))?;
    Ok(ApiResponse::ok(parameters))
}

pub async fn execute(
    Extension(service): Extension<Arc<ProcedureService>>,
    Path((schema, procedure)): Path<(String, String)>,
    body: Bytes,
) -> Result<Response, AppError> {
    let diagnostic = service.config().diagnostic_errors;
    let body = ExecuteBody::parse(&body)?;
    let request = ExecutionRequest {
        schema,
        procedure,
        parameters: body.parameters.unwrap_or_default(),
        use_cache: body.use_cache.unwrap_or(false),
    };

    // If the client disconnects, axum drops this future and the guard
    // cancels whatever the pipeline is still waiting on.
    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();
    let outcome = service.execute(&request, &cancel).await;
    guard.disarm();

    let outcome = outcome.map_err(AppError::core(diagnostic))?;
    Ok(ApiResponse::ok(&*outcome.result)
        .with_id(outcome.log_id)
        .into_response())
}
