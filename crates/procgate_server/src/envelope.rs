//! Response envelope shared by every endpoint:
//! `{statusCode, message?, data?, id?}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    pub status_code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    /// Execution log id, set on execute responses.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            status_code: StatusCode::OK.as_u16(),
            message: None,
            data: Some(data),
            id: None,
        }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.id = Some(id);
        self
    }
}

impl ApiResponse<()> {
    pub fn failure(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status_code: status.as_u16(),
            message: Some(message.into()),
            data: None,
            id: None,
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_fields_are_omitted() {
        let body = serde_json::to_value(ApiResponse::ok(vec![1, 2]).with_id(9)).unwrap();
        assert_eq!(body, serde_json::json!({"statusCode": 200, "data": [1, 2], "id": 9}));
    }

    #[test]
    fn failure_carries_only_message() {
        let body =
            serde_json::to_value(ApiResponse::failure(StatusCode::BAD_REQUEST, "nope")).unwrap();
        assert_eq!(body, serde_json::json!({"statusCode": 400, "message": "nope"}));
    }

    #[test]
    fn non_standard_status_survives() {
        let status = StatusCode::from_u16(499).unwrap();
        let resp = ApiResponse::failure(status, "Request cancelled.").into_response();
        assert_eq!(resp.status().as_u16(), 499);
    }
}
