//! End-to-end exec session over the REST API
//!
//! A websocket operation stands in for a command whose stdio is attached to
//! a client: the client connects with a channel secret, sends input followed
//! by a barrier, and reads the output back until the barrier the mirror sends
//! once the command's stdout is exhausted.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::{TEST_TIMEOUT, spawn_api, wait_final};
use futures::{SinkExt, StreamExt};
use lxops::config::StreamConfig;
use lxops::operation::{ChannelStreams, NewOperation, Operation, OperationTask, Operations};
use lxops::relay::{Frame, connect_remote, mirror};
use lxops::status::StatusCode;
use lxops::types::{Metadata, OperationClass};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Fake command: uppercases stdin onto stdout until stdin ends
fn spawn_uppercase_command(
    mut stdin: tokio::io::DuplexStream,
    mut stdout: tokio::io::DuplexStream,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut input = Vec::new();
        stdin.read_to_end(&mut input).await.unwrap();
        stdout
            .write_all(&input.to_ascii_uppercase())
            .await
            .unwrap();
        stdout.shutdown().await.unwrap();
    })
}

fn exec_task(streams: Arc<ChannelStreams>) -> OperationTask {
    let handler = streams.clone();
    OperationTask::new()
        .stream_handler(handler)
        .run(move |_op: Operation| async move {
            let config = StreamConfig::default();
            let transport = streams.accept_within("0", config.accept_timeout).await?;

            let (stdin_writer, stdin_reader) = tokio::io::duplex(4096);
            let (stdout_writer, stdout_reader) = tokio::io::duplex(4096);
            let command = spawn_uppercase_command(stdin_reader, stdout_writer);

            let handle = mirror(transport, stdin_writer, stdout_reader, &config);
            let outcome = handle
                .write_done
                .await
                .map_err(|e| lxops::Error::Other(e.to_string()))?;
            assert!(outcome.is_clean());
            command
                .await
                .map_err(|e| lxops::Error::Other(e.to_string()))?;
            handle
                .read_done
                .await
                .map_err(|e| lxops::Error::Other(e.to_string()))?;

            Ok(Some(Metadata::exec_exit(0)))
        })
}

#[tokio::test]
async fn exec_session_round_trip() {
    let operations = Operations::default();
    let addr = spawn_api(operations.clone()).await;

    let streams = Arc::new(ChannelStreams::interactive());
    let secret = streams.secrets().fds()["0"].clone();
    let metadata = streams.metadata(vec!["cat".to_string()], BTreeMap::new(), true);

    let op = operations
        .create(
            NewOperation::new(OperationClass::Websocket, "Executing command", exec_task(streams))
                .metadata(metadata),
        )
        .await
        .unwrap();
    op.start().await.unwrap();

    let url = format!("ws://{addr}/1.0/operations/{}/websocket?secret={secret}", op.id());
    let mut client = connect_remote(&url).await.unwrap();

    client.send(Frame::Data(b"hello ".to_vec())).await.unwrap();
    client.send(Frame::Data(b"world".to_vec())).await.unwrap();
    client.send(Frame::Barrier).await.unwrap();

    let output = tokio::time::timeout(TEST_TIMEOUT, async {
        let mut output = Vec::new();
        while let Some(frame) = client.next().await {
            match frame.unwrap() {
                Frame::Data(bytes) => output.extend_from_slice(&bytes),
                Frame::Barrier | Frame::Close => break,
            }
        }
        output
    })
    .await
    .expect("output barrier should arrive");

    assert_eq!(output, b"HELLO WORLD");

    assert_eq!(wait_final(&op).await, StatusCode::Success);
    assert_eq!(op.snapshot().await.metadata, Some(Metadata::exec_exit(0)));
    client.close().await.ok();
}

#[tokio::test]
async fn secret_is_single_use_over_http() {
    let operations = Operations::default();
    let addr = spawn_api(operations.clone()).await;

    let streams = Arc::new(ChannelStreams::interactive());
    let secret = streams.secrets().fds()["control"].clone();
    let op = operations
        .create(NewOperation::new(
            OperationClass::Websocket,
            "Console",
            OperationTask::new().stream_handler(streams.clone()),
        ))
        .await
        .unwrap();

    let url = format!("ws://{addr}/1.0/operations/{}/websocket?secret={secret}", op.id());
    let _first = connect_remote(&url).await.unwrap();

    tokio::time::timeout(TEST_TIMEOUT, async {
        while streams.secrets().verify(&secret).await {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("first connection should claim the secret");

    assert!(connect_remote(&url).await.is_err(), "second connection must be refused");
}
