use std::sync::Arc;

use axum::extract::{Path, Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{FixedOffset, Utc};
use recall_core::due::{DueCardAggregator, DueCardSource, DueCards};
use recall_core::models::{EntityKind, ReviewSubmission, SessionId};
use recall_core::sync::SessionSyncPayload;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::verify_shared_token;
use crate::config::AppConfig;
use crate::error::AppError;
use crate::store::{AnalyticsStore, ReviewReceipt, SessionSyncReceipt};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    store: Arc<AnalyticsStore>,
    due: Arc<DueCardAggregator>,
}

impl AppState {
    pub fn new(config: Arc<AppConfig>, store: AnalyticsStore) -> Self {
        let store = Arc::new(store);
        let source: Arc<dyn DueCardSource> = store.clone();
        Self {
            config,
            due: Arc::new(DueCardAggregator::new(source)),
            store,
        }
    }
}

pub fn app_router(state: AppState) -> Router {
    let protected_routes = Router::new()
        .route("/sessions/sync", post(sync_session))
        .route("/sessions/{session_id}", get(session_status))
        .route("/reviews/{review_id}", post(submit_review))
        .route("/profiles/{profile_id}/due", get(due_cards))
        .route(
            "/{resource}/{entity_id}",
            get(get_entity)
                .post(create_entity)
                .patch(update_entity)
                .delete(delete_entity),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), require_token));

    Router::new()
        .route("/healthz", get(healthz))
        .nest("/v1", protected_routes)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_headers(Any)
                .allow_methods(Any),
        )
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: i64,
}

async fn healthz() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now().timestamp(),
    })
}

async fn require_token(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    if let Some(expected) = state.config.api_token.as_deref() {
        verify_shared_token(request.headers(), expected)?;
    }
    Ok(next.run(request).await)
}

async fn sync_session(
    State(state): State<AppState>,
    Json(payload): Json<SessionSyncPayload>,
) -> Result<Json<SessionSyncReceipt>, AppError> {
    let receipt = state
        .store
        .sync_session(&payload, state.config.max_results_per_session)
        .await?;
    Ok(Json(receipt))
}

async fn session_status(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionSyncReceipt>, AppError> {
    let session_id: SessionId = session_id
        .parse()
        .map_err(|_| AppError::bad_request(format!("invalid session id '{session_id}'")))?;
    let count = state
        .store
        .session_result_count(&session_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("session {session_id}")))?;
    Ok(Json(SessionSyncReceipt {
        session_id,
        result_count: usize::try_from(count).unwrap_or(usize::MAX),
    }))
}

async fn submit_review(
    State(state): State<AppState>,
    Path(review_id): Path<String>,
    Json(review): Json<ReviewSubmission>,
) -> Result<Json<ReviewReceipt>, AppError> {
    if review.review_id != review_id {
        return Err(AppError::bad_request(
            "reviewId in body does not match the path",
        ));
    }
    Ok(Json(state.store.submit_review(&review).await?))
}

#[derive(Debug, Deserialize)]
struct DueQuery {
    #[serde(default)]
    tz_offset_minutes: i32,
}

async fn due_cards(
    State(state): State<AppState>,
    Path(profile_id): Path<String>,
    Query(query): Query<DueQuery>,
) -> Result<Json<DueCards>, AppError> {
    let limit = state.config.max_tz_offset_minutes;
    if query.tz_offset_minutes.unsigned_abs() > limit.unsigned_abs() {
        return Err(AppError::bad_request(format!(
            "tz_offset_minutes must be within [-{limit}, {limit}]"
        )));
    }
    let offset = query
        .tz_offset_minutes
        .checked_mul(60)
        .and_then(FixedOffset::east_opt)
        .ok_or_else(|| AppError::bad_request("invalid tz_offset_minutes"))?;

    let due = state
        .due
        .aggregate_at(&profile_id, Utc::now().with_timezone(&offset))
        .await?;
    Ok(Json(due))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EntityResponse {
    kind: EntityKind,
    entity_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload: Option<serde_json::Value>,
}

fn entity_kind(resource: &str) -> Result<EntityKind, AppError> {
    match EntityKind::from_resource(resource) {
        Some(EntityKind::CardReview) | None => {
            Err(AppError::not_found(format!("unknown resource '{resource}'")))
        }
        Some(kind) => Ok(kind),
    }
}

async fn get_entity(
    State(state): State<AppState>,
    Path((resource, entity_id)): Path<(String, String)>,
) -> Result<Json<EntityResponse>, AppError> {
    let kind = entity_kind(&resource)?;
    let payload = state
        .store
        .entity(kind, &entity_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("{} {entity_id}", kind.as_str())))?;
    Ok(Json(EntityResponse {
        kind,
        entity_id,
        payload: Some(payload),
    }))
}

async fn create_entity(
    State(state): State<AppState>,
    Path((resource, entity_id)): Path<(String, String)>,
    Json(payload): Json<serde_json::Value>,
) -> Result<Json<EntityResponse>, AppError> {
    let kind = entity_kind(&resource)?;
    state
        .store
        .upsert_entity(kind, &entity_id, &payload, false)
        .await?;
    Ok(Json(EntityResponse {
        kind,
        entity_id,
        payload: None,
    }))
}

async fn update_entity(
    State(state): State<AppState>,
    Path((resource, entity_id)): Path<(String, String)>,
    Json(payload): Json<serde_json::Value>,
) -> Result<Json<EntityResponse>, AppError> {
    let kind = entity_kind(&resource)?;
    state
        .store
        .upsert_entity(kind, &entity_id, &payload, true)
        .await?;
    Ok(Json(EntityResponse {
        kind,
        entity_id,
        payload: None,
    }))
}

// Deleting something already gone still succeeds so redelivery is harmless.
async fn delete_entity(
    State(state): State<AppState>,
    Path((resource, entity_id)): Path<(String, String)>,
) -> Result<StatusCode, AppError> {
    let kind = entity_kind(&resource)?;
    state.store.delete_entity(kind, &entity_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
