//! Read-only REST endpoints for intake progress and stored resumes.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;

use crate::error::DatabaseError;
use crate::store::{ProfileStore, ResumeSink};

use super::draft::ProfileDraft;
use super::step::IntakeStep;

/// Page size for list endpoints when `limit` is not given.
const DEFAULT_LIST_LIMIT: usize = 50;
/// Largest page a list endpoint returns.
const MAX_LIST_LIMIT: usize = 500;

/// Shared state for intake routes.
#[derive(Clone)]
pub struct IntakeRouteState {
    pub store: Arc<dyn ProfileStore>,
    pub resumes: Arc<dyn ResumeSink>,
}

/// Progress view of one draft.
#[derive(Debug, Serialize)]
pub struct DraftStatus {
    pub identity: String,
    pub current_step: IntakeStep,
    pub completed_steps: Vec<IntakeStep>,
    pub answered: usize,
    pub total: usize,
    pub complete: bool,
    pub fields: BTreeMap<IntakeStep, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<ProfileDraft> for DraftStatus {
    fn from(draft: ProfileDraft) -> Self {
        Self {
            completed_steps: draft.current_step.completed_before().to_vec(),
            answered: draft.fields.len(),
            total: IntakeStep::FIELDS.len(),
            complete: draft.is_complete(),
            identity: draft.identity,
            current_step: draft.current_step,
            fields: draft.fields,
            created_at: draft.created_at,
            updated_at: draft.updated_at,
            completed_at: draft.completed_at,
        }
    }
}

/// `?limit=` for list endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub limit: Option<usize>,
}

impl ListQuery {
    fn limit(&self) -> usize {
        self.limit
            .unwrap_or(DEFAULT_LIST_LIMIT)
            .min(MAX_LIST_LIMIT)
    }
}

/// Build the intake REST routes.
pub fn intake_routes(state: IntakeRouteState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/intake", get(list_intakes))
        .route("/api/intake/{identity}", get(get_intake))
        .route("/api/resumes", get(list_resumes))
        .route("/api/resumes/{identity}", get(get_resume))
        .route("/api/resumes/{identity}/markdown", get(get_resume_markdown))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "cvilo-intake"
    }))
}

fn not_found(what: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({"error": format!("{what} not found")})),
    )
        .into_response()
}

fn store_error(e: DatabaseError) -> Response {
    tracing::error!("Intake route store error: {e}");
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(serde_json::json!({"error": "store unavailable"})),
    )
        .into_response()
}

/// GET /api/intake?limit=
async fn list_intakes(
    State(state): State<IntakeRouteState>,
    Query(query): Query<ListQuery>,
) -> Response {
    match state.store.list_drafts(query.limit()).await {
        Ok(drafts) => {
            let statuses: Vec<DraftStatus> = drafts.into_iter().map(DraftStatus::from).collect();
            Json(statuses).into_response()
        }
        Err(e) => store_error(e),
    }
}

/// GET /api/intake/{identity}
async fn get_intake(
    State(state): State<IntakeRouteState>,
    Path(identity): Path<String>,
) -> Response {
    match state.store.get_draft(&identity).await {
        Ok(Some(draft)) => Json(DraftStatus::from(draft)).into_response(),
        Ok(None) => not_found("Draft"),
        Err(e) => store_error(e),
    }
}

/// GET /api/resumes?limit=
async fn list_resumes(
    State(state): State<IntakeRouteState>,
    Query(query): Query<ListQuery>,
) -> Response {
    match state.resumes.list_resumes(query.limit()).await {
        Ok(resumes) => Json(resumes).into_response(),
        Err(e) => store_error(e),
    }
}

/// GET /api/resumes/{identity}
async fn get_resume(
    State(state): State<IntakeRouteState>,
    Path(identity): Path<String>,
) -> Response {
    match state.resumes.get_resume(&identity).await {
        Ok(Some(resume)) => Json(resume).into_response(),
        Ok(None) => not_found("Resume"),
        Err(e) => store_error(e),
    }
}

/// GET /api/resumes/{identity}/markdown
async fn get_resume_markdown(
    State(state): State<IntakeRouteState>,
    Path(identity): Path<String>,
) -> Response {
    match state.resumes.get_resume(&identity).await {
        Ok(Some(resume)) => (
            [(header::CONTENT_TYPE, "text/markdown; charset=utf-8")],
            resume.to_markdown(),
        )
            .into_response(),
        Ok(None) => not_found("Resume"),
        Err(e) => store_error(e),
    }
}
