//! REST endpoints for driving the onboarding workflow.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tower_http::cors::{Any, CorsLayer};
use tracing::warn;

use super::manager::OnboardingManager;
use super::model::{Attachment, AttachmentType, RecordPatch, SectionId};
use super::plans::plans;
use super::state::OnboardingStep;
use crate::error::{Error, ValidationError};

/// Shared state for onboarding routes.
#[derive(Clone)]
pub struct OnboardingRouteState {
    pub manager: Arc<OnboardingManager>,
}

/// Error body for every failing onboarding endpoint.
pub struct ApiError(Error);

impl<E: Into<Error>> From<E> for ApiError {
    fn from(e: E) -> Self {
        Self(e.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::Validation(
                ValidationError::UnknownPlan { .. }
                | ValidationError::UnknownStep { .. }
                | ValidationError::UnknownSection { .. },
            ) => StatusCode::NOT_FOUND,
            Error::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::Auth(_) => StatusCode::UNAUTHORIZED,
            Error::Network(_) | Error::Upload(_) => StatusCode::BAD_GATEWAY,
            Error::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            warn!(status = status.as_u16(), error = %self.0, "Onboarding request failed");
        }
        let fields = match &self.0 {
            Error::Validation(v) => v.fields(),
            _ => Vec::new(),
        };
        (
            status,
            Json(serde_json::json!({"error": self.0.to_string(), "fields": fields})),
        )
            .into_response()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlanRequest {
    plan_id: String,
}

#[derive(Debug, Deserialize)]
struct SectionRequest {
    #[serde(default = "default_true")]
    complete: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct AttachmentRequest {
    #[serde(rename = "type")]
    attachment_type: AttachmentType,
    url: String,
    step: OnboardingStep,
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

/// GET /api/onboarding/record
async fn get_record(State(state): State<OnboardingRouteState>) -> impl IntoResponse {
    Json(state.manager.record())
}

/// PATCH /api/onboarding/record
async fn patch_record(
    State(state): State<OnboardingRouteState>,
    Json(patch): Json<RecordPatch>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.manager.merge(patch)?))
}

/// DELETE /api/onboarding/record
///
/// Abandons the registration.
async fn delete_record(State(state): State<OnboardingRouteState>) -> impl IntoResponse {
    state.manager.abandon().await;
    StatusCode::NO_CONTENT
}

async fn list_plans() -> impl IntoResponse {
    Json(plans())
}

/// POST /api/onboarding/plan
async fn choose_plan(
    State(state): State<OnboardingRouteState>,
    Json(body): Json<PlanRequest>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.manager.select_plan(&body.plan_id)?))
}

async fn list_sections(State(state): State<OnboardingRouteState>) -> impl IntoResponse {
    Json(state.manager.sections())
}

/// POST /api/onboarding/sections/{id}
async fn mark_section(
    State(state): State<OnboardingRouteState>,
    Path(id): Path<String>,
    Json(body): Json<SectionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let section: SectionId = id.parse()?;
    Ok(Json(state.manager.set_section_complete(section, body.complete)))
}

/// POST /api/onboarding/attachments
///
/// Registers a file that was already uploaded elsewhere.
async fn add_attachment(
    State(state): State<OnboardingRouteState>,
    Json(body): Json<AttachmentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if body.url.trim().is_empty() {
        return Err(ValidationError::Malformed {
            field: "url".to_string(),
            message: "must not be empty".to_string(),
        }
        .into());
    }
    let attachment = Attachment::new(body.attachment_type, body.url, body.step);
    Ok((StatusCode::CREATED, Json(state.manager.add_attachment(attachment))))
}

/// GET /api/onboarding/steps/{step}/guard
async fn check_guard(
    State(state): State<OnboardingRouteState>,
    Path(step): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let step: OnboardingStep = step.parse()?;
    Ok(Json(state.manager.evaluate_step(step).await))
}

/// POST /api/onboarding/steps/{step}/enter
async fn enter_step(
    State(state): State<OnboardingRouteState>,
    Path(step): Path<String>,
) -> Result<Response, ApiError> {
    let step: OnboardingStep = step.parse()?;
    let result = state.manager.enter_step(step).await;
    let status = if result.allowed {
        StatusCode::OK
    } else {
        StatusCode::CONFLICT
    };
    Ok((status, Json(result)).into_response())
}

/// POST /api/onboarding/steps/{step}/complete
async fn complete_step(
    State(state): State<OnboardingRouteState>,
    Path(step): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let step: OnboardingStep = step.parse()?;
    let next = state.manager.complete_step(step).await?;
    Ok(Json(serde_json::json!({"step": step, "next": next})))
}

/// POST /api/onboarding/submit
async fn submit(State(state): State<OnboardingRouteState>) -> Result<impl IntoResponse, ApiError> {
    state.manager.submit().await?;
    Ok((StatusCode::ACCEPTED, Json(state.manager.status().await)))
}

/// POST /api/onboarding/verification/refresh
async fn refresh_verification(State(state): State<OnboardingRouteState>) -> impl IntoResponse {
    if state.manager.refresh_verification().await {
        (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({"status": "refresh-requested"})),
        )
    } else {
        (
            StatusCode::CONFLICT,
            Json(serde_json::json!({"error": "Verification is not being watched"})),
        )
    }
}

/// GET /api/onboarding/status
async fn get_status(State(state): State<OnboardingRouteState>) -> impl IntoResponse {
    Json(state.manager.status().await)
}

/// Build the onboarding REST routes.
pub fn onboarding_routes(state: OnboardingRouteState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/api/onboarding/record",
            get(get_record).patch(patch_record).delete(delete_record),
        )
        .route("/api/onboarding/plans", get(list_plans))
        .route("/api/onboarding/plan", post(choose_plan))
        .route("/api/onboarding/sections", get(list_sections))
        .route("/api/onboarding/sections/{id}", post(mark_section))
        .route("/api/onboarding/attachments", post(add_attachment))
        .route("/api/onboarding/steps/{step}/guard", get(check_guard))
        .route("/api/onboarding/steps/{step}/enter", post(enter_step))
        .route("/api/onboarding/steps/{step}/complete", post(complete_step))
        .route("/api/onboarding/submit", post(submit))
        .route(
            "/api/onboarding/verification/refresh",
            post(refresh_verification),
        )
        .route("/api/onboarding/status", get(get_status))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
