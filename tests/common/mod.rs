//! Common test utilities for lxops integration tests

use lxops::Config;
use lxops::api::create_router;
use lxops::operation::{Operation, Operations};
use lxops::status::StatusCode;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

/// Upper bound for anything a test waits on
pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Serve the API for `operations` on an ephemeral local port
pub async fn spawn_api(operations: Operations) -> SocketAddr {
    let config = Arc::new(Config::default());
    let app = create_router(operations, config);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// Wait for `op` to finish and return its final status
#[allow(dead_code)]
pub async fn wait_final(op: &Operation) -> StatusCode {
    assert!(
        op.wait(Some(TEST_TIMEOUT)).await,
        "operation {} did not finish in time",
        op.id()
    );
    op.status().await
}
