//! HTTP surface - journal API plus liveness and readiness.
//!
//! Thin adapters over the engine: engine error kinds map onto HTTP status
//! codes, readiness aggregates the registry's health map and drops the
//! moment shutdown begins.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use engram_core::{Cancellation, CaptureEvent, EngramError, MemoryEntry, MemoryType, Metadata};

use crate::context::AppContext;

// ============================================================================
// ERROR MAPPING
// ============================================================================

struct ApiError(EngramError);

impl From<EngramError> for ApiError {
    fn from(err: EngramError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            EngramError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            EngramError::NotFound(_) => StatusCode::NOT_FOUND,
            EngramError::QueueFull(_) => StatusCode::TOO_MANY_REQUESTS,
            EngramError::BackendUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            EngramError::DuplicateId(_) => StatusCode::CONFLICT,
            EngramError::DimensionMismatch { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            EngramError::Cancelled => StatusCode::REQUEST_TIMEOUT,
            EngramError::BudgetRefused | EngramError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = json!({
            "error": self.0.to_string(),
            "kind": self.0.kind(),
        });
        (status, Json(body)).into_response()
    }
}

// ============================================================================
// ROUTER
// ============================================================================

pub fn router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .route("/api/v1/journal", post(capture).get(list))
        .route("/api/v1/journal/{id}", get(fetch))
        .route("/api/v1/journal/search", post(search))
        .route("/api/v1/journal/consolidate", post(consolidate))
        .route("/api/v1/journal/stats", get(stats))
        .route("/api/v1/events", post(submit_event))
        .route("/api/v1/context", get(context_state).post(update_context))
        .route("/health", get(health))
        .route("/ready", get(ready))
        .layer(CorsLayer::permissive())
        .with_state(ctx)
}

// ============================================================================
// JOURNAL HANDLERS
// ============================================================================

#[derive(Deserialize)]
struct CaptureBody {
    source: String,
    content: String,
    #[serde(default)]
    metadata: Metadata,
}

async fn capture(
    State(ctx): State<Arc<AppContext>>,
    Json(body): Json<CaptureBody>,
) -> Result<impl IntoResponse, ApiError> {
    let entry = ctx
        .journal
        .capture_context(&body.source, &body.content, body.metadata, &Cancellation::new())
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "id": entry.id, "pending": entry.is_pending() })),
    ))
}

#[derive(Deserialize)]
struct ListQuery {
    #[serde(default = "default_list_limit")]
    limit: usize,
}

fn default_list_limit() -> usize {
    20
}

async fn list(
    State(ctx): State<Arc<AppContext>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Value>, ApiError> {
    let entries = ctx.journal.get_memories(query.limit).await?;
    let count = entries.len();
    Ok(Json(json!({
        "memories": entries,
        "count": count,
    })))
}

async fn fetch(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let detail = ctx.journal.get_memory_with_associations(id).await?;
    Ok(Json(serde_json::to_value(detail).map_err(|e| {
        EngramError::Internal(format!("serialize entry: {e}"))
    })?))
}

#[derive(Deserialize)]
struct SearchBody {
    content: String,
    #[serde(default)]
    memory_type: Option<String>,
    #[serde(default = "default_search_limit")]
    limit: usize,
}

fn default_search_limit() -> usize {
    5
}

async fn search(
    State(ctx): State<Arc<AppContext>>,
    Json(body): Json<SearchBody>,
) -> Result<Json<Value>, ApiError> {
    let memory_type = match body.memory_type.as_deref() {
        None => MemoryType::Episodic,
        Some(raw) => MemoryType::parse_name(raw)
            .ok_or_else(|| EngramError::InvalidInput(format!("unknown memory type: {raw}")))?,
    };
    let hits = ctx
        .journal
        .query_similar(&body.content, memory_type, body.limit, &Cancellation::new())
        .await?;
    let count = hits.len();
    Ok(Json(json!({
        "results": hits,
        "count": count,
    })))
}

#[derive(Deserialize)]
struct ConsolidateBody {
    memory_ids: Vec<Uuid>,
}

async fn consolidate(
    State(ctx): State<Arc<AppContext>>,
    Json(body): Json<ConsolidateBody>,
) -> Result<Json<Value>, ApiError> {
    let cancel = Cancellation::new();
    let mut entries: Vec<MemoryEntry> = Vec::with_capacity(body.memory_ids.len());
    for id in &body.memory_ids {
        entries.push(ctx.journal.get_memory_by_id(*id).await?);
    }
    let outcome = ctx
        .journal
        .consolidate_memories(entries, "api_request", &cancel)
        .await?;
    Ok(Json(json!({
        "processed_count": outcome.processed,
        "created": outcome.created,
    })))
}

async fn stats(State(ctx): State<Arc<AppContext>>) -> Result<Json<Value>, ApiError> {
    let stats = ctx.journal.stats().await?;
    Ok(Json(json!({
        "journal": stats,
        "pipeline": ctx.pipeline.metrics(),
        "consolidation": ctx.engine.counters(),
        "context": ctx.monitor.state(),
    })))
}

// ============================================================================
// EVENT AND CONTEXT HANDLERS
// ============================================================================

async fn submit_event(
    State(ctx): State<Arc<AppContext>>,
    Json(event): Json<CaptureEvent>,
) -> Result<impl IntoResponse, ApiError> {
    let accepted = ctx.pipeline.submit(event)?;
    let status = if accepted {
        StatusCode::ACCEPTED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(json!({ "accepted": accepted }))))
}

#[derive(Deserialize)]
struct UsageBody {
    current_tokens: u64,
}

async fn update_context(
    State(ctx): State<Arc<AppContext>>,
    Json(body): Json<UsageBody>,
) -> Json<Value> {
    ctx.monitor.update_usage(body.current_tokens);
    Json(json!({ "ok": true }))
}

async fn context_state(State(ctx): State<Arc<AppContext>>) -> Json<Value> {
    Json(serde_json::to_value(ctx.monitor.state()).unwrap_or_else(|_| json!({})))
}

// ============================================================================
// HEALTH
// ============================================================================

async fn health(State(ctx): State<Arc<AppContext>>) -> Json<Value> {
    let statuses = ctx.registry.health_check_all().await;
    Json(json!({
        "status": "alive",
        "services": statuses,
    }))
}

async fn ready(State(ctx): State<Arc<AppContext>>) -> Response {
    if ctx.registry.is_ready().await {
        (StatusCode::OK, Json(json!({ "status": "ready" }))).into_response()
    } else {
        let statuses = ctx.registry.health_check_all().await;
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "not_ready", "services": statuses })),
        )
            .into_response()
    }
}
