//! `castqueue serve` command: the HTTP surface over [`CommandSurface`].

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::StreamExt;
use serde::Serialize;
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use castqueue_core::command::{CommandError, CommandSurface};
use castqueue_db::models::{Stage, Task, TaskStatus};
use castqueue_db::queries::{episode_failures, tasks};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

pub struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    pub fn internal(err: anyhow::Error) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: format!("{err:#}"),
        }
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: msg.into(),
        }
    }
}

impl From<CommandError> for AppError {
    fn from(err: CommandError) -> Self {
        let status = match err {
            CommandError::WrongState | CommandError::AlreadyQueued | CommandError::UnknownStage(_) => {
                StatusCode::CONFLICT
            }
            CommandError::NotFound => StatusCode::NOT_FOUND,
            CommandError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let body = serde_json::json!({ "error": self.message });
        (self.status, Json(body)).into_response()
    }
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct QueueSnapshotResponse {
    pending: i64,
    processing: i64,
    retry_scheduled: i64,
    completed: i64,
    failed: i64,
    dead: i64,
    cancelled: i64,
    total: i64,
    pending_tasks: Vec<Task>,
    processing_tasks: Vec<Task>,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn build_router(surface: CommandSurface) -> Router {
    Router::new()
        .route("/episodes/{id}/stages/{stage}", post(enqueue_stage))
        .route("/episodes/{id}/run", post(run_pipeline))
        .route("/episodes/{id}/cancel", post(cancel_pipeline))
        .route("/episodes/{id}/failure", get(episode_failure))
        .route("/episodes/{id}/retry", post(retry_episode))
        .route("/tasks/{id}", get(task_status))
        .route("/tasks/{id}/progress", get(task_progress))
        .route("/tasks/{id}/progress/stream", get(task_progress_stream))
        .route("/queue", get(queue_snapshot))
        .route("/dlq", get(dlq_list))
        .route("/dlq/{id}/retry", post(dlq_retry))
        .route("/dlq/{id}/skip", post(dlq_skip))
        .route("/dlq/retry-all", post(dlq_retry_all))
        .layer(CorsLayer::permissive())
        .with_state(surface)
}

pub async fn run_serve(surface: CommandSurface, bind: &str, port: u16) -> Result<()> {
    let app = build_router(surface);
    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    tracing::info!("castqueue serve listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("castqueue serve shut down");
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install Ctrl+C handler");
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn enqueue_stage(
    State(surface): State<CommandSurface>,
    Path((episode_id, stage)): Path<(Uuid, String)>,
) -> Result<Json<Task>, AppError> {
    let stage: Stage = stage
        .parse()
        .map_err(|_| AppError::bad_request(format!("unrecognized stage: {stage}")))?;
    let task = surface.enqueue_stage(episode_id, stage).await?;
    Ok(Json(task))
}

async fn run_pipeline(
    State(surface): State<CommandSurface>,
    Path(episode_id): Path<Uuid>,
) -> Result<Json<Task>, AppError> {
    let task = surface.run_pipeline(episode_id, None).await?;
    Ok(Json(task))
}

async fn cancel_pipeline(
    State(surface): State<CommandSurface>,
    Path(episode_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    let cancelled = surface.cancel_pipeline(episode_id).await?;
    Ok(Json(serde_json::json!({ "cancelled": cancelled })))
}

async fn task_status(
    State(surface): State<CommandSurface>,
    Path(task_id): Path<Uuid>,
) -> Result<Json<Task>, AppError> {
    let task = surface.task_status(task_id).await?;
    Ok(Json(task))
}

async fn task_progress(
    State(surface): State<CommandSurface>,
    Path(task_id): Path<Uuid>,
) -> Result<axum::response::Response, AppError> {
    match surface.current_progress(task_id).await {
        Some(event) => Ok(Json(progress_event_json(&event)).into_response()),
        None => Ok((StatusCode::NO_CONTENT, "").into_response()),
    }
}

async fn task_progress_stream(
    State(surface): State<CommandSurface>,
    Path(task_id): Path<Uuid>,
) -> Sse<impl futures::Stream<Item = Result<Event, Infallible>>> {
    let events = surface.subscribe_progress(task_id).await;
    let stream = events.map(|event| Ok(Event::default().json_data(progress_event_json(&event)).unwrap_or_else(|_| Event::default().data("{}"))));
    Sse::new(stream)
}

/// Serialize a progress event for the wire. On a terminal event the
/// pipeline stage stops being the interesting value to a client watching
/// for completion -- the `stage` field instead carries the literal
/// `"completed"` or `"failed"` the stream terminates on, with the prior
/// pipeline stage still available in `message`/`pipeline_stage` for
/// display.
fn progress_event_json(event: &castqueue_core::progress::ProgressEvent) -> serde_json::Value {
    let stage = if event.terminal {
        if event.message.as_deref() == Some("completed") {
            "completed".to_owned()
        } else {
            "failed".to_owned()
        }
    } else {
        event.stage.to_string()
    };

    serde_json::json!({
        "task_id": event.task_id,
        "stage": stage,
        "pipeline_stage": event.stage.to_string(),
        "progress_pct": event.progress_pct,
        "message": event.message,
        "estimated_remaining_seconds": event.estimated_remaining_seconds,
        "terminal": event.terminal,
    })
}

async fn queue_snapshot(
    State(surface): State<CommandSurface>,
) -> Result<Json<QueueSnapshotResponse>, AppError> {
    let counts = surface.queue_snapshot().await?;
    let pool = surface_pool(&surface);
    let pending_tasks = tasks::by_status(pool, TaskStatus::Pending)
        .await
        .map_err(|e| AppError::internal(e.into()))?;
    let processing_tasks = tasks::by_status(pool, TaskStatus::Processing)
        .await
        .map_err(|e| AppError::internal(e.into()))?;
    Ok(Json(QueueSnapshotResponse {
        pending: counts.pending,
        processing: counts.processing,
        retry_scheduled: counts.retry_scheduled,
        completed: counts.completed,
        failed: counts.failed,
        dead: counts.dead,
        cancelled: counts.cancelled,
        total: counts.total,
        pending_tasks,
        processing_tasks,
    }))
}

async fn dlq_list(
    State(surface): State<CommandSurface>,
) -> Result<Json<Vec<Task>>, AppError> {
    // `CommandSurface` has no dedicated DLQ listing; `dead` tasks are a
    // straightforward status filter on the same pool the surface wraps.
    let pool = surface_pool(&surface);
    let dead = tasks::by_status(pool, TaskStatus::Dead)
        .await
        .map_err(|e| AppError::internal(e.into()))?;
    Ok(Json(dead))
}

async fn dlq_retry(
    State(surface): State<CommandSurface>,
    Path(task_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    surface.retry_dlq(task_id).await?;
    Ok(Json(serde_json::json!({ "retried": task_id })))
}

async fn dlq_skip(
    State(surface): State<CommandSurface>,
    Path(task_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    surface.skip_dlq(task_id).await?;
    Ok(Json(serde_json::json!({ "skipped": task_id })))
}

async fn dlq_retry_all(
    State(surface): State<CommandSurface>,
) -> Result<Json<serde_json::Value>, AppError> {
    let retried = surface.retry_all_dlq().await?;
    Ok(Json(serde_json::json!({ "retried_count": retried })))
}

async fn episode_failure(
    State(surface): State<CommandSurface>,
    Path(episode_id): Path<Uuid>,
) -> Result<axum::response::Response, AppError> {
    let pool = surface_pool(&surface);
    let failure = episode_failures::get_episode_failure(pool, episode_id)
        .await
        .map_err(|e| AppError::internal(e.into()))?;
    match failure {
        Some(failure) if failure.is_failed() => Ok(Json(failure).into_response()),
        _ => Ok((StatusCode::NO_CONTENT, "").into_response()),
    }
}

async fn retry_episode(
    State(surface): State<CommandSurface>,
    Path(episode_id): Path<Uuid>,
) -> Result<axum::response::Response, AppError> {
    match surface.retry_episode(episode_id).await? {
        Some(task) => Ok(Json(task).into_response()),
        None => Ok((StatusCode::NO_CONTENT, "").into_response()),
    }
}

/// `CommandSurface` does not expose its pool; the DLQ listing and
/// episode-failure lookup handlers need direct read access to tables it has
/// no dedicated method for. Mirrors `worker::queue_pool`'s rationale.
fn surface_pool(surface: &CommandSurface) -> &sqlx::PgPool {
    surface.pool()
}
