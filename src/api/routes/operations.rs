//! Operation handlers.

use super::{WaitQuery, WebsocketQuery};
use crate::api::AppState;
use crate::relay::websocket;
use crate::types::OperationId;
use axum::{
    Json,
    extract::{Path, Query, State, ws::WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

/// GET /1.0/operations - List all operations
#[utoipa::path(
    get,
    path = "/1.0/operations",
    tag = "operations",
    responses(
        (status = 200, description = "All registered operations, oldest first", body = Vec<crate::types::OperationSnapshot>)
    )
)]
pub async fn list_operations(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.operations.list().await)
}

/// GET /1.0/operations/:id - Get single operation
#[utoipa::path(
    get,
    path = "/1.0/operations/{id}",
    tag = "operations",
    params(
        ("id" = String, Path, description = "Operation ID")
    ),
    responses(
        (status = 200, description = "Operation", body = crate::types::OperationSnapshot),
        (status = 404, description = "Operation not found", body = crate::error::ApiError)
    )
)]
pub async fn get_operation(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.operations.get(&OperationId::from(id)).await {
        Ok(op) => (StatusCode::OK, Json(op.snapshot().await)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// DELETE /1.0/operations/:id - Request cancellation
#[utoipa::path(
    delete,
    path = "/1.0/operations/{id}",
    tag = "operations",
    params(
        ("id" = String, Path, description = "Operation ID")
    ),
    responses(
        (status = 200, description = "Cancellation requested", body = crate::types::OperationSnapshot),
        (status = 400, description = "Operation cannot be cancelled now", body = crate::error::ApiError),
        (status = 404, description = "Operation not found", body = crate::error::ApiError)
    )
)]
pub async fn cancel_operation(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let op = match state.operations.get(&OperationId::from(id)).await {
        Ok(op) => op,
        Err(e) => return e.into_response(),
    };

    match op.cancel().await {
        Ok(()) => (StatusCode::OK, Json(op.snapshot().await)).into_response(),
        Err(e) => {
            tracing::info!(operation_id = %op.id(), error = %e, "Cancel request refused");
            e.into_response()
        }
    }
}

/// GET /1.0/operations/:id/wait - Wait for the operation to finish
///
/// Returns the operation as it is when the wait ends, finished or not.
#[utoipa::path(
    get,
    path = "/1.0/operations/{id}/wait",
    tag = "operations",
    params(
        ("id" = String, Path, description = "Operation ID"),
        WaitQuery
    ),
    responses(
        (status = 200, description = "Operation after waiting", body = crate::types::OperationSnapshot),
        (status = 404, description = "Operation not found", body = crate::error::ApiError)
    )
)]
pub async fn wait_operation(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<WaitQuery>,
) -> Response {
    let op = match state.operations.get(&OperationId::from(id)).await {
        Ok(op) => op,
        Err(e) => return e.into_response(),
    };

    op.wait(params.duration()).await;
    (StatusCode::OK, Json(op.snapshot().await)).into_response()
}

/// GET /1.0/operations/:id/websocket - Attach a stream to an operation
///
/// The secret is checked before upgrading, so a bad secret is refused with
/// 403 and never reaches the WebSocket layer.
#[utoipa::path(
    get,
    path = "/1.0/operations/{id}/websocket",
    tag = "operations",
    params(
        ("id" = String, Path, description = "Operation ID"),
        WebsocketQuery
    ),
    responses(
        (status = 101, description = "Switching to the WebSocket protocol"),
        (status = 400, description = "Not a websocket operation or not an upgrade request", body = crate::error::ApiError),
        (status = 403, description = "Invalid or already used secret", body = crate::error::ApiError),
        (status = 404, description = "Operation not found", body = crate::error::ApiError)
    )
)]
pub async fn operation_websocket(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<WebsocketQuery>,
    ws: Option<WebSocketUpgrade>,
) -> Response {
    let op = match state.operations.get(&OperationId::from(id)).await {
        Ok(op) => op,
        Err(e) => return e.into_response(),
    };

    if let Err(e) = op.authorize(&params.secret).await {
        tracing::warn!(operation_id = %op.id(), error = %e, "Refused stream connection");
        return e.into_response();
    }

    let Some(ws) = ws else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": {"code": "upgrade_required", "message": "websocket upgrade required"}})),
        )
            .into_response();
    };

    ws.on_upgrade(move |socket| async move {
        let transport = Box::new(websocket::server(socket));
        if let Err(e) = op.connect(&params.secret, transport).await {
            tracing::warn!(operation_id = %op.id(), error = %e, "Stream connection rejected after upgrade");
        }
    })
}
