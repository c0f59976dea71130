//! API request handlers.

use axum::{
    Json,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, QueryRejection},
        ws::{WebSocket, WebSocketUpgrade, rejection::WebSocketUpgradeRejection},
    },
    response::Response,
};
use log::{debug, info};
use serde::Serialize;

use crate::engine::{ExecDescriptor, validate_container_id};
use crate::exec::{CreateExecRequest, ResizeExecRequest, StartExecQuery};
use crate::session::{AttachRequest, SessionError, run_session};
use crate::transport::{SocketWriter, WsTransport};

use super::error::{ApiError, ApiResult, ErrorResponse};
use super::state::AppState;

/// Close code sent when a session ends with an error.
pub const CLOSE_BAD_REQUEST: u16 = 4400;

const CLOSE_NORMAL: u16 = 1000;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// POST /exec - create an exec instance in a running container.
pub async fn create_exec(
    State(state): State<AppState>,
    payload: Result<Json<CreateExecRequest>, JsonRejection>,
) -> ApiResult<Json<ExecDescriptor>> {
    let Json(request) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let descriptor = state.exec.create(&request).await?;
    Ok(Json(descriptor))
}

/// POST /exec/{exec_id}/resize - resize a running exec's terminal.
pub async fn resize_exec(
    State(state): State<AppState>,
    Path(exec_id): Path<String>,
    payload: Result<Json<ResizeExecRequest>, JsonRejection>,
) -> ApiResult<Json<serde_json::Value>> {
    let Json(size) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    state.exec.resize(&exec_id, size.height, size.width).await?;
    Ok(Json(serde_json::json!({})))
}

/// GET /exec/{exec_id}/start - attach to an exec over WebSocket.
///
/// Anything that is not an upgrade request, or that names an invalid
/// container, is rejected before a container is claimed or the engine is
/// contacted. Failures after the upgrade are reported as a `{"msg"}` frame
/// followed by a close frame.
pub async fn start_exec(
    State(state): State<AppState>,
    Path(exec_id): Path<String>,
    query: Result<Query<StartExecQuery>, QueryRejection>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> ApiResult<Response> {
    let ws = ws.map_err(|e| ApiError::BadUpgradeRequest(e.body_text()))?;
    let Query(query) = query.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    validate_container_id(&query.container_id)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let request = AttachRequest {
        exec_id,
        tty: query.tty.unwrap_or(state.exec.default_tty()),
        container_id: query.container_id,
    };

    Ok(ws.on_upgrade(move |socket| handle_session(socket, state, request)))
}

async fn handle_session(socket: WebSocket, state: AppState, request: AttachRequest) {
    let (reader, writer) = WsTransport::from_socket(socket, state.write_wait);

    let result = run_session(
        &state.sessions,
        &state.exec,
        state.ping_period,
        &request,
        reader,
        writer.clone(),
    )
    .await;

    finish_session(writer, &request, result).await;
}

/// Report the outcome to the client and close the socket.
async fn finish_session(
    writer: SocketWriter,
    request: &AttachRequest,
    result: Result<(), SessionError>,
) {
    let closed = match result {
        Ok(()) => writer.close(CLOSE_NORMAL, "").await,
        Err(err) => {
            let body = serde_json::to_string(&ErrorResponse::new(err.to_string()))
                .unwrap_or_else(|_| String::from(r#"{"msg":"session failed"}"#));
            if let Err(send_err) = writer.write_frame(body.as_bytes()).await {
                debug!("failed to report session error: {}", send_err);
            }
            writer.close(CLOSE_BAD_REQUEST, "").await
        }
    };

    // The peer may already be gone.
    if let Err(err) = closed {
        debug!("close for exec {} not delivered: {}", request.exec_id, err);
    }
    info!(
        "session for exec {} in container {} closed",
        request.exec_id, request.container_id
    );
}
