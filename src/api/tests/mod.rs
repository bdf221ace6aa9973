use super::*;
use crate::operation::{NewOperation, Operation, OperationTask};
use crate::types::OperationClass;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use std::time::Duration;
use tower::ServiceExt;

mod operations;

/// Router over a fresh registry, with the registry for driving operations
fn create_test_router() -> (Router, Operations) {
    let config = Arc::new(Config::default());
    let operations = Operations::new(config.operations.clone());
    (create_router(operations.clone(), config), operations)
}

/// A running task that only finishes when cancelled
async fn create_cancelable_task(operations: &Operations) -> Operation {
    let stop = tokio_util::sync::CancellationToken::new();
    let task = {
        let run_stop = stop.clone();
        OperationTask::new()
            .run(move |_| async move {
                run_stop.cancelled().await;
                Err(crate::Error::Cancelled("stopped".to_string()))
            })
            .on_cancel(move |_| {
                let stop = stop.clone();
                async move {
                    stop.cancel();
                    Ok(())
                }
            })
    };

    let op = operations
        .create(NewOperation::new(OperationClass::Task, "Long running task", task))
        .await
        .unwrap();
    op.start().await.unwrap();
    op
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn test_api_server_spawns() {
    let mut config = Config::default();
    config.api.bind_address = "127.0.0.1:0".parse().unwrap(); // Port 0 = OS assigns a free port
    let config = Arc::new(config);
    let operations = Operations::new(config.operations.clone());

    let api_handle = tokio::spawn(async move { start_api_server(operations, config).await });

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!api_handle.is_finished(), "server should still be running");
    api_handle.abort();
}

#[tokio::test]
async fn test_api_server_rejects_invalid_config() {
    let mut config = Config::default();
    config.api.bind_address = "127.0.0.1:0".parse().unwrap();
    config.stream.channel_depth = 0;
    let config = Arc::new(config);
    let operations = Operations::new(config.operations.clone());

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        start_api_server(operations, config),
    )
    .await
    .expect("invalid config must fail before serving");

    match result {
        Err(crate::Error::Config { key, .. }) => {
            assert_eq!(key.as_deref(), Some("stream.channel_depth"));
        }
        other => panic!("expected config error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_cors_enabled() {
    let mut config = Config::default();
    config.api.cors_enabled = true;
    config.api.cors_origins = vec!["*".to_string()];
    let config = Arc::new(config);
    let app = create_router(Operations::new(config.operations.clone()), config);

    let request = Request::builder()
        .uri("/health")
        .header("Origin", "http://localhost:3000")
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        response.headers().contains_key("access-control-allow-origin"),
        "CORS header should be present when CORS is enabled"
    );
}

#[tokio::test]
async fn test_cors_disabled() {
    let mut config = Config::default();
    config.api.cors_enabled = false;
    let config = Arc::new(config);
    let app = create_router(Operations::new(config.operations.clone()), config);

    let request = Request::builder()
        .uri("/health")
        .header("Origin", "http://localhost:3000")
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert!(!response.headers().contains_key("access-control-allow-origin"));
}
