//! REST API server module
//!
//! Exposes the operation registry over HTTP: listing and inspecting
//! operations, cancelling them, waiting for them to finish, attaching
//! WebSocket streams and following changes as server-sent events.

use crate::operation::Operations;
use crate::types::API_VERSION;
use crate::{Config, Result};
use axum::{Router, http::HeaderValue, routing::get};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub mod error_response;
pub mod openapi;
pub mod routes;
pub mod state;

pub use openapi::ApiDoc;
pub use state::AppState;

/// Create the API router with all route definitions
///
/// # Routes
///
/// ## Operations
/// - `GET /1.0/operations` - List all operations
/// - `GET /1.0/operations/:id` - Get single operation
/// - `DELETE /1.0/operations/:id` - Request cancellation
/// - `GET /1.0/operations/:id/wait` - Wait for the operation to finish
/// - `GET /1.0/operations/:id/websocket` - Attach a stream (WebSocket upgrade)
///
/// ## System
/// - `GET /1.0/events` - Server-sent events stream
/// - `GET /health` - Health check
/// - `GET /openapi.json` - OpenAPI specification
/// - `GET /swagger-ui` - Interactive Swagger UI documentation (if enabled)
pub fn create_router(operations: Operations, config: Arc<Config>) -> Router {
    let state = AppState::new(operations);

    let versioned = Router::new()
        .route("/operations", get(routes::list_operations))
        .route(
            "/operations/:id",
            get(routes::get_operation).delete(routes::cancel_operation),
        )
        .route("/operations/:id/wait", get(routes::wait_operation))
        .route("/operations/:id/websocket", get(routes::operation_websocket))
        .route("/events", get(routes::event_stream));

    let router = Router::new()
        .nest(&format!("/{API_VERSION}"), versioned)
        .route("/health", get(routes::health_check))
        .route("/openapi.json", get(routes::openapi_spec));

    let router = if config.api.swagger_ui {
        router.merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
    } else {
        router
    };

    let router = router.with_state(state).layer(TraceLayer::new_for_http());

    if config.api.cors_enabled {
        let cors = build_cors_layer(&config.api.cors_origins);
        router.layer(cors)
    } else {
        router
    }
}

/// Build a CORS layer based on configured origins
///
/// `"*"` or an empty list allows any origin.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let allow_any = origins.iter().any(|o| o == "*");

    if allow_any || origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let allowed: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(AllowOrigin::list(allowed))
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

/// Start the API server on the configured bind address.
///
/// The configuration is validated first; an invalid one fails with
/// [`Error::Config`](crate::Error::Config) before anything is bound. Runs
/// until the server stops or fails.
///
/// # Example
///
/// ```no_run
/// use lxops::{Config, operation::Operations};
/// use std::sync::Arc;
///
/// # async fn example() -> lxops::Result<()> {
/// let config = Arc::new(Config::default());
/// let operations = Operations::new(config.operations.clone());
///
/// lxops::api::start_api_server(operations, config).await?;
/// # Ok(())
/// # }
/// ```
pub async fn start_api_server(operations: Operations, config: Arc<Config>) -> Result<()> {
    config.validate()?;
    let bind_address = config.api.bind_address;

    tracing::info!(address = %bind_address, "Starting API server");

    let app = create_router(operations, config);

    let listener = TcpListener::bind(bind_address)
        .await
        .map_err(crate::error::Error::Io)?;

    tracing::info!(address = %bind_address, "API server listening");

    axum::serve(listener, app)
        .await
        .map_err(|e| crate::error::Error::ApiServerError(e.to_string()))?;

    tracing::info!("API server stopped");
    Ok(())
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
