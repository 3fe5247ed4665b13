//! AppError - turns core errors into enveloped HTTP responses.
//!
//! The full error is logged here, once. What the caller sees depends on
//! diagnostic mode (see [`ProcGateError::public_message`]).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use procgate_core::ProcGateError;

use crate::envelope::ApiResponse;

#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    /// Log `err` and build the caller-facing error.
    pub fn from_core(err: ProcGateError, diagnostic: bool) -> Self {
        let status = StatusCode::from_u16(err.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if err.is_client_error() {
            tracing::warn!(status = status.as_u16(), error = %err, "request rejected");
        } else {
            tracing::error!(status = status.as_u16(), error = ?err, "request failed");
        }
        Self::new(status, err.public_message(diagnostic))
    }

    /// `map_err` adapter: `.map_err(AppError::core(diagnostic))`.
    pub fn core(diagnostic: bool) -> impl Fn(ProcGateError) -> Self {
        move |err| Self::from_core(err, diagnostic)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        ApiResponse::failure(self.status, self.message).into_response()
    }
}
