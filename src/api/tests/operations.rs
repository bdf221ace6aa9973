use super::*;
use crate::operation::ChannelStreams;
use crate::status::StatusCode as OpStatus;

#[tokio::test]
async fn test_list_operations() {
    let (app, operations) = create_test_router();
    create_cancelable_task(&operations).await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/1.0/operations")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    let list = json.as_array().unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["status_code"], 103);
    assert_eq!(list[0]["may_cancel"], true);
}

#[tokio::test]
async fn test_get_operation() {
    let (app, operations) = create_test_router();
    let op = create_cancelable_task(&operations).await;

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/1.0/operations/{}", op.id()))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["id"], op.id().as_str());
    assert_eq!(json["status"], "Running");
    assert_eq!(json["class"], "task");
}

#[tokio::test]
async fn test_get_unknown_operation() {
    let (app, _operations) = create_test_router();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/1.0/operations/does-not-exist")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = body_json(response).await;
    assert_eq!(json["error"]["code"], "not_found");
}

#[tokio::test]
async fn test_cancel_operation() {
    let (app, operations) = create_test_router();
    let op = create_cancelable_task(&operations).await;

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/1.0/operations/{}", op.id()))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    assert!(op.wait(Some(Duration::from_secs(5))).await);
    assert_eq!(op.status().await, OpStatus::Cancelled);

    // Once final there is nothing left to cancel
    let response = app
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/1.0/operations/{}", op.id()))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["error"]["code"], "not_cancelable");
}

#[tokio::test]
async fn test_cancel_successful_operation_is_not_cancelable() {
    let (app, operations) = create_test_router();
    let op = operations
        .create(NewOperation::new(
            OperationClass::Task,
            "Quick task",
            OperationTask::new().run(|_| async { Ok(None) }),
        ))
        .await
        .unwrap();
    op.start().await.unwrap();
    assert!(op.wait(Some(Duration::from_secs(5))).await);
    assert_eq!(op.status().await, OpStatus::Success);

    let response = app
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/1.0/operations/{}", op.id()))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["error"]["code"], "not_cancelable");
    assert_eq!(json["error"]["message"], "operation cannot be canceled at this time");
    assert_eq!(op.status().await, OpStatus::Success);
}

#[tokio::test]
async fn test_cancel_not_cancelable_operation() {
    let (app, operations) = create_test_router();
    let op = operations
        .create(NewOperation::new(
            OperationClass::Task,
            "Uninterruptible task",
            OperationTask::new().run(|_| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(None)
            }),
        ))
        .await
        .unwrap();
    op.start().await.unwrap();

    let response = app
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/1.0/operations/{}", op.id()))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["error"]["code"], "not_cancelable");
    assert_eq!(op.status().await, OpStatus::Running);
}

#[tokio::test]
async fn test_wait_with_timeout_returns_running_operation() {
    let (app, operations) = create_test_router();
    let op = create_cancelable_task(&operations).await;

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/1.0/operations/{}/wait?timeout=0", op.id()))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status_code"], 103);
}

#[tokio::test]
async fn test_wait_returns_final_operation() {
    let (app, operations) = create_test_router();
    let op = create_cancelable_task(&operations).await;

    let waiter = tokio::spawn(
        app.oneshot(
            Request::builder()
                .uri(format!("/1.0/operations/{}/wait?timeout=-1", op.id()))
                .body(Body::empty())
                .unwrap(),
        ),
    );

    tokio::time::sleep(Duration::from_millis(20)).await;
    op.cancel().await.unwrap();

    let response = tokio::time::timeout(Duration::from_secs(5), waiter)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let json = body_json(response).await;
    assert_eq!(json["status_code"], 401);
    assert_eq!(json["err"], "stopped");
}

#[tokio::test]
async fn test_websocket_rejects_bad_secret() {
    let (app, operations) = create_test_router();
    let streams = Arc::new(ChannelStreams::interactive());
    let op = operations
        .create(NewOperation::new(
            OperationClass::Websocket,
            "Executing command",
            OperationTask::new().stream_handler(streams),
        ))
        .await
        .unwrap();

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/1.0/operations/{}/websocket?secret=guess", op.id()))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let json = body_json(response).await;
    assert_eq!(json["error"]["code"], "forbidden");
}

#[tokio::test]
async fn test_websocket_requires_upgrade() {
    let (app, operations) = create_test_router();
    let streams = Arc::new(ChannelStreams::interactive());
    let secret = streams.secrets().fds()["0"].clone();
    let op = operations
        .create(NewOperation::new(
            OperationClass::Websocket,
            "Executing command",
            OperationTask::new().stream_handler(streams.clone()),
        ))
        .await
        .unwrap();

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/1.0/operations/{}/websocket?secret={secret}", op.id()))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    // The secret was only checked, not consumed
    assert!(streams.secrets().verify(&secret).await);
}

#[tokio::test]
async fn test_websocket_on_task_operation() {
    let (app, operations) = create_test_router();
    let op = create_cancelable_task(&operations).await;

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/1.0/operations/{}/websocket?secret=x", op.id()))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["error"]["code"], "invalid_state");
}
