//! WebSocket server + REST endpoints for task queries and cancellation.

use axum::{
    Json, Router,
    extract::{
        Path, Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::channel::SubscriptionError;
use super::manager::TaskManager;
use super::state::{TaskId, TaskSnapshot, TaskType};

/// Messages pushed to WebSocket clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskWsMessage {
    /// Full listing, sent on connect and after the client lagged.
    TasksSync { tasks: Vec<TaskSnapshot> },
    /// Current snapshot of one task after any change.
    TaskUpdated { task: TaskSnapshot },
}

/// Actions a WebSocket client may send.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum TaskWsAction {
    Cancel { id: TaskId },
}

/// `?type=EncodingTask` filter shared by the list and subscribe endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct TypeFilter {
    #[serde(rename = "type")]
    pub task_type: Option<String>,
}

impl TypeFilter {
    fn into_task_type(self) -> Option<TaskType> {
        self.task_type
            .map(TaskType::from)
            .filter(TaskType::is_valid)
    }
}

/// Build the Axum router with task REST and WebSocket routes.
pub fn task_routes(manager: TaskManager) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/tasks", get(list_tasks))
        .route("/api/tasks/summary", get(task_summary))
        .route("/api/tasks/{id}", get(get_task))
        .route("/api/tasks/{id}/cancel", post(cancel_task))
        .route("/ws/tasks", get(ws_handler))
        .layer(CorsLayer::permissive())
        .with_state(manager)
}

// ── Health ──────────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "media-tasks"
    }))
}

// ── REST Endpoints ──────────────────────────────────────────────────────

async fn list_tasks(
    State(manager): State<TaskManager>,
    Query(filter): Query<TypeFilter>,
) -> impl IntoResponse {
    let tasks = match filter.into_task_type() {
        Some(ty) => manager.tasks_of_type(&ty).await,
        None => manager.tasks().await,
    };
    Json(tasks)
}

async fn task_summary(State(manager): State<TaskManager>) -> impl IntoResponse {
    Json(manager.summary().await)
}

async fn get_task(State(manager): State<TaskManager>, Path(id): Path<String>) -> impl IntoResponse {
    let Ok(task_id) = Uuid::parse_str(&id) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "Invalid task ID"})),
        );
    };

    match manager.try_get_task(task_id).await {
        Some(task) => match serde_json::to_value(&task) {
            Ok(body) => (StatusCode::OK, Json(body)),
            Err(e) => {
                warn!(task_id = %task_id, error = %e, "Failed to serialize task");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(serde_json::json!({"error": "Failed to serialize task"})),
                )
            }
        },
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": "Task not found"})),
        ),
    }
}

async fn cancel_task(
    State(manager): State<TaskManager>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let Ok(task_id) = Uuid::parse_str(&id) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "Invalid task ID"})),
        );
    };

    if manager.cancel_task(task_id).await {
        info!(task_id = %task_id, "Task cancel requested via REST");
        (
            StatusCode::OK,
            Json(serde_json::json!({"id": task_id, "cancelled": true})),
        )
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": "Task not found or already finished"})),
        )
    }
}

// ── WebSocket ───────────────────────────────────────────────────────────

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(manager): State<TaskManager>,
    Query(filter): Query<TypeFilter>,
) -> impl IntoResponse {
    let filter = filter.into_task_type();
    info!(filter = ?filter, "Task WebSocket client connecting");
    ws.on_upgrade(move |socket| handle_socket(socket, manager, filter))
}

async fn handle_socket(mut socket: WebSocket, manager: TaskManager, filter: Option<TaskType>) {
    info!("Task WebSocket client connected");

    // Subscribe before the initial listing so nothing in between is missed.
    let mut sub = manager.subscribe(filter.clone());

    if !send_sync(&mut socket, &manager, filter.as_ref()).await {
        warn!("Failed to send initial task sync, client disconnected");
        return;
    }

    loop {
        tokio::select! {
            // Forward task updates to this client
            result = sub.recv() => {
                match result {
                    Some(Ok(task)) => {
                        let msg = TaskWsMessage::TaskUpdated { task };
                        if !send_json(&mut socket, &msg).await {
                            debug!("Task WS client disconnected during send");
                            break;
                        }
                    }
                    Some(Err(SubscriptionError::Lagged(n))) => {
                        warn!(missed = n, "Task WS client lagged behind broadcast");
                        // The retained backlog predates the resync, drop it.
                        sub = manager.subscribe(filter.clone());
                        if !send_sync(&mut socket, &manager, filter.as_ref()).await {
                            break;
                        }
                    }
                    None => {
                        debug!("Task update channel closed");
                        break;
                    }
                }
            }

            // Receive actions from client
            result = socket.recv() => {
                match result {
                    Some(Ok(Message::Text(text))) => {
                        handle_client_action(&text, &manager).await;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("Task WebSocket client disconnected");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "Task WebSocket error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    info!("Task WebSocket connection closed");
}

async fn send_sync(socket: &mut WebSocket, manager: &TaskManager, filter: Option<&TaskType>) -> bool {
    let tasks = match filter {
        Some(ty) => manager.tasks_of_type(ty).await,
        None => manager.tasks().await,
    };
    send_json(socket, &TaskWsMessage::TasksSync { tasks }).await
}

/// Serialize and send; false once the client is gone.
async fn send_json(socket: &mut WebSocket, msg: &TaskWsMessage) -> bool {
    match serde_json::to_string(msg) {
        Ok(json) => socket.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            warn!(error = %e, "Failed to serialize task WS message");
            true
        }
    }
}

async fn handle_client_action(text: &str, manager: &TaskManager) {
    match serde_json::from_str::<TaskWsAction>(text) {
        Ok(TaskWsAction::Cancel { id }) => {
            if manager.cancel_task(id).await {
                info!(task_id = %id, "Task cancel requested via WS");
            } else {
                warn!(task_id = %id, "Cancel ignored, task not found or already finished");
            }
        }
        Err(e) => {
            debug!(error = %e, text = text, "Unrecognized task WS message");
        }
    }
}
