//! Cancelling an operation whose run hook is blocked in an HTTP download

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::{TEST_TIMEOUT, wait_final};
use lxops::download::{DownloadParams, download_to_writer};
use lxops::operation::{NewOperation, Operation, OperationTask, Operations};
use lxops::status::StatusCode;
use lxops::types::{Metadata, OperationClass};
use lxops::{Canceler, Error};
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn image_download(url: String, expected_sha256: Option<String>) -> OperationTask {
    OperationTask::new().run(move |op: Operation| async move {
        let canceler = op
            .canceler()
            .await
            .ok_or_else(|| Error::Other("no canceler attached".to_string()))?;
        let client = reqwest::Client::new();
        let mut sink = Vec::new();

        let params = DownloadParams {
            client: &client,
            url: &url,
            expected_sha256: expected_sha256.as_deref(),
            canceler: Some(&canceler),
        };
        let mut last = None;
        let bytes = download_to_writer(params, &mut sink, |progress| last = Some(progress)).await?;

        if let Some(progress) = last {
            op.update_metadata(progress.to_metadata()).await?;
        }
        Ok(Some(Metadata::progress(format!("{bytes} bytes"))))
    })
}

#[tokio::test]
async fn cancelling_interrupts_a_stalled_download() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/images/alpine.tar.xz"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(30)))
        .mount(&server)
        .await;

    let operations = Operations::default();
    let canceler = Canceler::new();
    let op = operations
        .create(
            NewOperation::new(
                OperationClass::Task,
                "Downloading image",
                image_download(format!("{}/images/alpine.tar.xz", server.uri()), None),
            )
            .canceler(canceler.clone()),
        )
        .await
        .unwrap();

    assert!(!op.may_cancel().await, "nothing in flight yet");
    op.start().await.unwrap();

    tokio::time::timeout(TEST_TIMEOUT, async {
        while !op.may_cancel().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("download should become cancelable");

    op.cancel().await.unwrap();

    assert_eq!(wait_final(&op).await, StatusCode::Cancelled);
    let snapshot = op.snapshot().await;
    assert_eq!(snapshot.err, "request canceled");
    assert!(!snapshot.may_cancel);
    assert!(!canceler.cancelable().await);
}

#[tokio::test]
async fn verified_download_succeeds() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/images/busybox"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"abc".to_vec()))
        .mount(&server)
        .await;

    let operations = Operations::default();
    let op = operations
        .create(
            NewOperation::new(
                OperationClass::Task,
                "Downloading image",
                image_download(
                    format!("{}/images/busybox", server.uri()),
                    // SHA-256 of "abc"
                    Some(
                        "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
                            .to_string(),
                    ),
                ),
            )
            .canceler(Canceler::new()),
        )
        .await
        .unwrap();
    op.start().await.unwrap();

    assert_eq!(wait_final(&op).await, StatusCode::Success);
    assert_eq!(
        op.snapshot().await.metadata,
        Some(Metadata::progress("3 bytes"))
    );
}

#[tokio::test]
async fn corrupted_download_fails() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/images/busybox"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"abd".to_vec()))
        .mount(&server)
        .await;

    let operations = Operations::default();
    let op = operations
        .create(
            NewOperation::new(
                OperationClass::Task,
                "Downloading image",
                image_download(
                    format!("{}/images/busybox", server.uri()),
                    Some(
                        "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
                            .to_string(),
                    ),
                ),
            )
            .canceler(Canceler::new()),
        )
        .await
        .unwrap();
    op.start().await.unwrap();

    assert_eq!(
        tokio::time::timeout(TEST_TIMEOUT, wait_final(&op)).await.unwrap(),
        StatusCode::Failure
    );
    assert!(op.snapshot().await.err.starts_with("hash mismatch"));
}
