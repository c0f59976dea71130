//! API error types.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::exec::ExecError;

/// Result type for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;

/// Error payload returned to clients, over HTTP and as a WebSocket frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub msg: String,
}

impl ErrorResponse {
    pub fn new(msg: impl Into<String>) -> Self {
        Self { msg: msg.into() }
    }
}

/// API errors. Every failure is a bad request carrying a readable message.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The request is not a valid WebSocket upgrade.
    #[error("{0}")]
    BadUpgradeRequest(String),

    #[error("{0}")]
    BadRequest(String),
}

impl From<ExecError> for ApiError {
    fn from(err: ExecError) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadUpgradeRequest(_) | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
        };

        (status, Json(ErrorResponse::new(self.to_string()))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineError;

    async fn body_json(response: Response) -> serde_json::Value {
        let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_bad_upgrade_is_400_with_msg() {
        let response =
            ApiError::BadUpgradeRequest("Connection header did not include 'upgrade'".to_string())
                .into_response();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["msg"], "Connection header did not include 'upgrade'");
    }

    #[tokio::test]
    async fn test_exec_error_message_is_verbatim() {
        let err: ApiError = ExecError::Resize(EngineError::NotFound(
            "No such exec instance: e9".to_string(),
        ))
        .into();
        let response = err.into_response();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.headers()["content-type"],
            "application/json"
        );
        let json = body_json(response).await;
        assert_eq!(json, serde_json::json!({ "msg": "No such exec instance: e9" }));
    }
}
