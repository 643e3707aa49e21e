//! Integration tests for the task WebSocket + REST surface.
//!
//! Each test spins up an Axum server on a random port, connects via
//! tokio-tungstenite or reqwest, and exercises the real WS / REST contract.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use media_tasks::config::EngineConfig;
use media_tasks::error::ExecutorError;
use media_tasks::tasks::{FnExecutor, TaskManager, TaskStatus, WorkerContext, task_routes};

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Start an Axum server on a random port, return (port, manager).
async fn start_server() -> (u16, TaskManager) {
    start_server_with(EngineConfig::default()).await
}

async fn start_server_with(config: EngineConfig) -> (u16, TaskManager) {
    let manager = TaskManager::from_config(&config);
    let app = task_routes(manager.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Give the server a moment to start accepting connections.
    tokio::time::sleep(Duration::from_millis(50)).await;

    (port, manager)
}

/// Parse a WS text frame into a serde_json::Value.
fn parse_ws_json(msg: &Message) -> Value {
    match msg {
        Message::Text(txt) => serde_json::from_str(txt).expect("invalid JSON from server"),
        other => panic!("expected Text frame, got {:?}", other),
    }
}

/// Executor that blocks until released, then reports a couple of steps.
fn gated_executor(
    release: oneshot::Receiver<()>,
) -> FnExecutor<
    Value,
    impl FnOnce(WorkerContext<Value>) -> futures_util::future::BoxFuture<'static, Result<(), ExecutorError>>
    + Send
    + 'static,
> {
    FnExecutor::new(move |ctx: WorkerContext<Value>| {
        Box::pin(async move {
            let _ = release.await;
            ctx.check_cancelled()?;
            ctx.report(50.0, &serde_json::json!({"step": "transcode"}))
                .await?;
            Ok(())
        }) as futures_util::future::BoxFuture<'static, Result<(), ExecutorError>>
    })
}

/// Executor that spins until cancelled.
fn until_cancelled() -> FnExecutor<
    Value,
    impl FnOnce(WorkerContext<Value>) -> futures_util::future::BoxFuture<'static, Result<(), ExecutorError>>
    + Send
    + 'static,
> {
    FnExecutor::new(|ctx: WorkerContext<Value>| {
        Box::pin(async move {
            while !ctx.is_cancelled() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            Err(ExecutorError::Cancelled)
        }) as futures_util::future::BoxFuture<'static, Result<(), ExecutorError>>
    })
}

/// Read frames until one satisfies `pred`.
async fn next_matching<S>(ws: &mut S, pred: impl Fn(&Value) -> bool) -> Value
where
    S: StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        let msg = ws.next().await.unwrap().unwrap();
        let json = parse_ws_json(&msg);
        if pred(&json) {
            return json;
        }
    }
}

// ── WebSocket Tests ──────────────────────────────────────────────────

#[tokio::test]
async fn ws_connect_receives_empty_sync() {
    timeout(TEST_TIMEOUT, async {
        let (port, _manager) = start_server().await;

        let (mut ws, _resp) = connect_async(format!("ws://127.0.0.1:{port}/ws/tasks"))
            .await
            .expect("WS connect failed");

        let msg = ws.next().await.unwrap().unwrap();
        let json = parse_ws_json(&msg);

        assert_eq!(json["type"], "tasks_sync");
        assert!(json["tasks"].as_array().unwrap().is_empty());
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn ws_streams_full_lifecycle() {
    timeout(TEST_TIMEOUT, async {
        let (port, manager) = start_server().await;

        let (mut ws, _) = connect_async(format!("ws://127.0.0.1:{port}/ws/tasks"))
            .await
            .unwrap();
        let _ = ws.next().await.unwrap().unwrap();

        let (release_tx, release_rx) = oneshot::channel();
        let id = manager
            .submit(
                "EncodingTask",
                serde_json::json!({"step": "queued"}),
                gated_executor(release_rx),
            )
            .await
            .unwrap();

        let pending = next_matching(&mut ws, |j| j["type"] == "task_updated").await;
        assert_eq!(pending["task"]["id"], id.to_string());
        assert_eq!(pending["task"]["status"], "pending");
        assert_eq!(pending["task"]["payload"]["step"], "queued");

        let running = next_matching(&mut ws, |j| j["task"]["status"] == "running").await;
        assert!(running["task"]["startedAt"].is_string());

        release_tx.send(()).unwrap();

        let progress = next_matching(&mut ws, |j| j["task"]["progress"] == 50.0).await;
        assert_eq!(progress["task"]["payload"]["step"], "transcode");

        let done = next_matching(&mut ws, |j| j["task"]["status"] == "completed").await;
        assert_eq!(done["task"]["progress"], 100.0);
        assert!(done["task"]["completedAt"].is_string());
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn ws_type_filter_excludes_other_types() {
    timeout(TEST_TIMEOUT, async {
        let (port, manager) = start_server().await;

        let (mut ws, _) = connect_async(format!(
            "ws://127.0.0.1:{port}/ws/tasks?type=NodeFileDownloadTask"
        ))
        .await
        .unwrap();
        let _ = ws.next().await.unwrap().unwrap();

        let encode = manager
            .submit("EncodingTask", Value::Null, until_cancelled())
            .await
            .unwrap();
        let download = manager
            .submit("NodeFileDownloadTask", Value::Null, until_cancelled())
            .await
            .unwrap();

        // Every frame up to the download's first update belongs to the download.
        let msg = ws.next().await.unwrap().unwrap();
        let json = parse_ws_json(&msg);
        assert_eq!(json["task"]["type"], "NodeFileDownloadTask");
        assert_eq!(json["task"]["id"], download.to_string());

        manager.cancel_task(encode).await;
        manager.cancel_task(download).await;
        let done = next_matching(&mut ws, |j| j["task"]["status"] == "cancelled").await;
        assert_eq!(done["task"]["id"], download.to_string());
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn ws_sync_includes_existing_tasks() {
    timeout(TEST_TIMEOUT, async {
        let (port, manager) = start_server().await;

        let id = manager
            .submit("MetadataScanTask", Value::Null, until_cancelled())
            .await
            .unwrap();

        let (mut ws, _) = connect_async(format!("ws://127.0.0.1:{port}/ws/tasks"))
            .await
            .unwrap();
        let json = next_matching(&mut ws, |j| j["type"] == "tasks_sync").await;
        let tasks = json["tasks"].as_array().unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0]["id"], id.to_string());

        manager.cancel_task(id).await;
    })
    .await
    .expect("test timed out");
}

// Runs on the default current-thread runtime: the burst of submissions below
// completes before the socket handler is polled again, so it must lag.
#[tokio::test]
async fn ws_lagging_client_gets_fresh_sync() {
    timeout(TEST_TIMEOUT, async {
        let (port, manager) = start_server_with(EngineConfig {
            broadcast_capacity: 4,
            ..EngineConfig::default()
        })
        .await;

        let (mut ws, _) = connect_async(format!("ws://127.0.0.1:{port}/ws/tasks"))
            .await
            .unwrap();
        let first = next_matching(&mut ws, |j| j["type"] == "tasks_sync").await;
        assert!(first["tasks"].as_array().unwrap().is_empty());

        for _ in 0..10 {
            manager
                .submit("MetadataScanTask", Value::Null, until_cancelled())
                .await
                .unwrap();
        }

        let resync = next_matching(&mut ws, |j| j["type"] == "tasks_sync").await;
        assert_eq!(resync["tasks"].as_array().unwrap().len(), 10);

        manager.cancel_all().await;
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn ws_cancel_action() {
    timeout(TEST_TIMEOUT, async {
        let (port, manager) = start_server().await;

        let id = manager
            .submit("NodeFileDownloadTask", Value::Null, until_cancelled())
            .await
            .unwrap();

        let (mut ws, _) = connect_async(format!("ws://127.0.0.1:{port}/ws/tasks"))
            .await
            .unwrap();
        let _ = next_matching(&mut ws, |j| j["type"] == "tasks_sync").await;

        let action = serde_json::json!({"action": "cancel", "id": id});
        ws.send(Message::Text(action.to_string().into()))
            .await
            .unwrap();

        let done = next_matching(&mut ws, |j| j["task"]["status"] == "cancelled").await;
        assert_eq!(done["task"]["id"], id.to_string());
        assert_eq!(
            manager.try_get_task(id).await.unwrap().status,
            TaskStatus::Cancelled
        );
    })
    .await
    .expect("test timed out");
}

// ── REST Endpoint Tests ──────────────────────────────────────────────

#[tokio::test]
async fn rest_health_endpoint() {
    timeout(TEST_TIMEOUT, async {
        let (port, _manager) = start_server().await;

        let resp = reqwest::get(format!("http://127.0.0.1:{port}/health"))
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);

        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["service"], "media-tasks");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn rest_get_and_list_tasks() {
    timeout(TEST_TIMEOUT, async {
        let (port, manager) = start_server().await;

        let encode = manager
            .submit("EncodingTask", Value::Null, until_cancelled())
            .await
            .unwrap();
        let download = manager
            .submit("NodeFileDownloadTask", Value::Null, until_cancelled())
            .await
            .unwrap();

        let body: Vec<Value> = reqwest::get(format!("http://127.0.0.1:{port}/api/tasks"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body.len(), 2);

        let body: Vec<Value> = reqwest::get(format!(
            "http://127.0.0.1:{port}/api/tasks?type=NodeFileDownloadTask"
        ))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
        assert_eq!(body.len(), 1);
        assert_eq!(body[0]["id"], download.to_string());

        let resp = reqwest::get(format!("http://127.0.0.1:{port}/api/tasks/{encode}"))
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["type"], "EncodingTask");

        manager.cancel_all().await;
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn rest_cancel_task() {
    timeout(TEST_TIMEOUT, async {
        let (port, manager) = start_server().await;

        let id = manager
            .submit("NodeFileDownloadTask", Value::Null, until_cancelled())
            .await
            .unwrap();

        let client = reqwest::Client::new();
        let resp = client
            .post(format!("http://127.0.0.1:{port}/api/tasks/{id}/cancel"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["cancelled"], true);

        let done = manager.wait_for_completion(id).await.unwrap();
        assert_eq!(done.status, TaskStatus::Cancelled);

        // Finished tasks can't be cancelled again.
        let resp = client
            .post(format!("http://127.0.0.1:{port}/api/tasks/{id}/cancel"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 404);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn rest_unknown_task_not_found() {
    timeout(TEST_TIMEOUT, async {
        let (port, _manager) = start_server().await;

        let resp = reqwest::get(format!(
            "http://127.0.0.1:{port}/api/tasks/{}",
            missing_task_id()
        ))
        .await
        .unwrap();
        assert_eq!(resp.status(), 404);

        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["error"], "Task not found");
    })
    .await
    .expect("test timed out");
}

fn missing_task_id() -> String {
    // Never issued by the engine under test.
    "3f2c9a4e-8d1b-4c7a-9e2f-5b6d7c8e9f01".to_string()
}
