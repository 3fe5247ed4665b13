//! Router construction for the procgate server.

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Extension, Router,
};
use procgate_core::ProcedureService;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers;

/// Build the full axum router with all routes and middleware.
pub fn build_router(service: Arc<ProcedureService>) -> Router {
    let procedures = Router::new()
        .route("/schemas", get(handlers::procedures::list_schemas))
        .route(
            "/:schema/procedures",
            get(handlers::procedures::list_procedures),
        )
        .route(
            "/:schema/:procedure/parameters",
            get(handlers::procedures::get_parameters),
        )
        .route(
            "/:schema/:procedure/execute",
            post(handlers::procedures::execute),
        );

    let execution_logs = Router::new()
        .route("/recent", get(handlers::execution_logs::recent))
        .route("/latest", get(handlers::execution_logs::latest))
        .route("/query", get(handlers::execution_logs::query))
        .route("/:id", get(handlers::execution_logs::get_by_id));

    Router::new()
        .route("/health", get(handlers::health::health))
        .nest("/api/procedures", procedures)
        .nest("/api/execution-logs", execution_logs)
        .layer(Extension(service))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}
