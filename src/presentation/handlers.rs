// HTTP request handlers
use crate::application::aggregation_service::ServiceError;
use crate::domain::topology::DesiredLevels;
use crate::presentation::app_state::AppState;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = match self {
            ServiceError::AlreadyRunning => StatusCode::CONFLICT,
            ServiceError::NoTopology => StatusCode::NOT_FOUND,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

pub fn routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(health_check))
        .route(
            "/discovery",
            post(start_discovery).delete(cancel_discovery),
        )
        .route("/discovery/progress", get(discovery_progress))
        .route("/topology", get(get_topology))
        .route("/reconcile/plan", post(plan_reconcile))
        .route("/reconcile/apply", post(apply_reconcile))
        .with_state(state)
}

/// Health check endpoint
pub async fn health_check() -> &'static str {
    "ok"
}

/// Start a discovery run in the background
pub async fn start_discovery(State(state): State<Arc<AppState>>) -> Response {
    let service = &state.aggregation_service;
    match service.start_discovery() {
        Ok(_) => (StatusCode::ACCEPTED, Json(service.status())).into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn cancel_discovery(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let cancelled = state.aggregation_service.cancel();
    Json(json!({ "cancelled": cancelled }))
}

pub async fn discovery_progress(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.aggregation_service.status())
}

/// Latest complete topology with its issues and repair summary
pub async fn get_topology(State(state): State<Arc<AppState>>) -> Response {
    match state.aggregation_service.latest() {
        Some(report) => Json(report.as_ref()).into_response(),
        None => ServiceError::NoTopology.into_response(),
    }
}

pub async fn plan_reconcile(
    State(state): State<Arc<AppState>>,
    Json(desired): Json<DesiredLevels>,
) -> Response {
    match state.aggregation_service.plan(&desired) {
        Ok(directives) => Json(directives).into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn apply_reconcile(
    State(state): State<Arc<AppState>>,
    Json(desired): Json<DesiredLevels>,
) -> Response {
    match state.aggregation_service.apply(&desired).await {
        Ok(outcomes) => {
            let status = if outcomes.iter().all(|o| o.succeeded()) {
                StatusCode::OK
            } else {
                StatusCode::MULTI_STATUS
            };
            (status, Json(outcomes)).into_response()
        }
        Err(e) => e.into_response(),
    }
}
