//! OpenAPI documentation and schema generation
//!
//! The specification is generated at compile time with utoipa.

use utoipa::OpenApi;

/// OpenAPI documentation for the lxops REST API
///
/// Served at:
/// - `/openapi.json` - JSON format OpenAPI specification
/// - `/swagger-ui` - Interactive Swagger UI documentation
#[derive(OpenApi)]
#[openapi(
    info(
        title = "lxops REST API",
        version = "0.1.0",
        description = "Inspect, cancel and wait for background operations and attach to their streams",
        license(
            name = "MIT OR Apache-2.0"
        )
    ),
    servers(
        (url = "http://localhost:8443", description = "Local development server")
    ),
    paths(
        // Operations
        crate::api::routes::list_operations,
        crate::api::routes::get_operation,
        crate::api::routes::cancel_operation,
        crate::api::routes::wait_operation,
        crate::api::routes::operation_websocket,

        // System
        crate::api::routes::health_check,
        crate::api::routes::openapi_spec,
        crate::api::routes::event_stream,
    ),
    components(schemas(
        crate::types::OperationId,
        crate::types::OperationClass,
        crate::types::OperationSnapshot,
        crate::types::Event,

        crate::config::Config,
        crate::config::ApiConfig,
        crate::config::OperationConfig,
        crate::config::StreamConfig,
        crate::config::DownloadConfig,
        crate::config::RetryConfig,

        crate::api::routes::WaitQuery,
        crate::api::routes::WebsocketQuery,

        crate::error::ApiError,
        crate::error::ErrorDetail,
    )),
    tags(
        (name = "operations", description = "Background operations - Inspect, cancel, wait for and attach to operations"),
        (name = "system", description = "System endpoints - Health checks, OpenAPI spec, events"),
    )
)]
pub struct ApiDoc;
