//! REST endpoints and the SSE task stream.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode},
    response::sse::{Event, Sse},
    routing::{get, post},
};
use chrono::Utc;
use futures::{Stream, StreamExt};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::error::ApiError;
use super::types::{
    AnswerRequest, AnswerResponse, CancelResponse, HealthResponse, StartRequest, StartResponse,
    StatusResponse, TaskList, TaskSummary,
};
use crate::events::StreamMessage;
use crate::orchestrator::Orchestrator;
use crate::task::TaskStatus;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

/// Build the Axum router with the task REST and SSE routes.
pub fn relay_routes(orchestrator: Arc<Orchestrator>) -> Router {
    let state = AppState { orchestrator };

    Router::new()
        .route("/health", get(health))
        .route("/api/start", post(start_task))
        .route("/api/status/{id}", get(task_status))
        .route("/api/stream/{id}", get(stream_task))
        .route("/api/answer/{id}", post(answer_task))
        .route("/api/cancel/{id}", post(cancel_task))
        .route("/api/tasks", get(list_tasks))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

fn parse_task_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::BadRequest(format!("Invalid task ID: {raw}")))
}

// ── Health ──────────────────────────────────────────────────────────────

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let active_tasks = state.orchestrator.registry().list_active().await.len();
    Json(HealthResponse {
        status: "ok".to_string(),
        timestamp: Utc::now(),
        active_tasks,
    })
}

// ── Tasks ───────────────────────────────────────────────────────────────

async fn start_task(
    State(state): State<AppState>,
    body: Result<Json<StartRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<StartResponse>), ApiError> {
    let Json(req) = body?;
    let task = req
        .task
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("task is required".to_string()))?;
    let config = req.config.unwrap_or_default();
    let timeout_minutes = config.timeout_minutes.filter(|m| *m > 0);

    let task_id = state.orchestrator.submit(task, config).await;
    if let Some(minutes) = timeout_minutes {
        arm_timeout(Arc::clone(&state.orchestrator), task_id, minutes).await;
    }
    info!(task_id = %task_id, "Task submitted");

    Ok((
        StatusCode::CREATED,
        Json(StartResponse {
            task_id,
            stream_url: format!("/api/stream/{task_id}"),
            status: TaskStatus::Pending,
        }),
    ))
}

/// Cancel the task once `minutes` pass, unless it finishes first.
async fn arm_timeout(orchestrator: Arc<Orchestrator>, task_id: Uuid, minutes: u64) {
    let Some(token) = orchestrator.registry().cancellation_token(task_id).await else {
        return;
    };
    let limit = Duration::from_secs(minutes.saturating_mul(60));
    tokio::spawn(async move {
        tokio::select! {
            _ = token.cancelled() => {}
            _ = tokio::time::sleep(limit) => {
                let reason = format!("Timed out after {minutes} minutes");
                match orchestrator.cancel(task_id, Some(reason)).await {
                    Ok(_) => warn!(task_id = %task_id, minutes, "Task timed out"),
                    Err(e) => debug!(task_id = %task_id, error = %e, "Timeout fired for finished task"),
                }
            }
        }
    });
}

async fn task_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<StatusResponse>, ApiError> {
    let task_id = parse_task_id(&id)?;
    let task = state.orchestrator.registry().get(task_id).await?;
    Ok(Json(StatusResponse::from(&task)))
}

async fn list_tasks(State(state): State<AppState>) -> Json<TaskList> {
    let tasks = state.orchestrator.registry().list_all().await;
    Json(TaskList {
        tasks: tasks.iter().map(TaskSummary::from).collect(),
    })
}

async fn answer_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<AnswerRequest>, JsonRejection>,
) -> Result<Json<AnswerResponse>, ApiError> {
    let task_id = parse_task_id(&id)?;
    let Json(req) = body?;
    let answer = req
        .answer
        .filter(|a| !a.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("answer is required".to_string()))?;

    state
        .orchestrator
        .answer(task_id, req.question_id, answer)
        .await?;
    Ok(Json(AnswerResponse {
        success: true,
        message: "Answer submitted".to_string(),
    }))
}

async fn cancel_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CancelResponse>, ApiError> {
    let task_id = parse_task_id(&id)?;
    state
        .orchestrator
        .cancel(task_id, Some("Cancelled by user".to_string()))
        .await?;
    Ok(Json(CancelResponse {
        success: true,
        message: "Task cancelled".to_string(),
        task_id,
    }))
}

// ── SSE ─────────────────────────────────────────────────────────────────

/// Stream a task's events: the log first (after `Last-Event-ID`, if sent),
/// then live events until the task finishes.
async fn stream_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let task_id = parse_task_id(&id)?;
    let after_seq = headers
        .get("last-event-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());

    let subscription = state
        .orchestrator
        .registry()
        .register_observer(task_id, after_seq)
        .await?;
    debug!(task_id = %task_id, ?after_seq, "SSE client connected");

    Ok(Sse::new(subscription.map(|msg| Ok(to_sse(msg)))))
}

fn to_sse(msg: StreamMessage) -> Event {
    match msg {
        StreamMessage::Event(event) => {
            let sse = Event::default()
                .id(event.seq.to_string())
                .event(event.name());
            match sse.json_data(&event) {
                Ok(sse) => sse,
                Err(e) => {
                    warn!(task_id = %event.task_id, error = %e, "Failed to encode event");
                    Event::default().comment("encoding error")
                }
            }
        }
        StreamMessage::Heartbeat => Event::default().comment("heartbeat"),
    }
}
