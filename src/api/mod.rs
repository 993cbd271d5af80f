//! HTTP and WebSocket surface
//!
//! REST endpoints for the dashboard and the AI investigator under
//! `/api/v1`, plus the `/ws-fraud` push endpoint.

mod handlers;
mod types;
mod ws;

use crate::cases::CaseService;
use crate::error::TriageError;
use crate::push::PushBus;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use types::{ResolveRequest, StatsResponse};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub cases: CaseService,
    pub push: PushBus,
    /// Last TPS computed by the stats broadcaster.
    pub last_tps: Arc<AtomicU64>,
}

/// Create the API router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/dashboard/stats", get(handlers::dashboard_stats))
        .route("/api/v1/dashboard/queue", get(handlers::dashboard_queue))
        .route(
            "/api/v1/dashboard/cases/:case_id",
            get(handlers::get_case),
        )
        .route(
            "/api/v1/dashboard/cases/:case_id/resolve",
            post(handlers::resolve_case),
        )
        .route("/api/v1/fraud-cases/ai-update", post(handlers::ai_update))
        .route("/api/v1/fraud-cases/:case_id", get(handlers::get_case))
        .route("/ws-fraud", get(ws::ws_fraud))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// HTTP wrapper mapping the domain taxonomy onto status codes.
#[derive(Debug)]
pub struct ApiError(TriageError);

impl From<TriageError> for ApiError {
    fn from(err: TriageError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            TriageError::CaseNotFound(_) => StatusCode::NOT_FOUND,
            TriageError::IllegalTransition { .. } => StatusCode::CONFLICT,
            TriageError::BadPayload(_) | TriageError::PoisonRecord { .. } => {
                StatusCode::BAD_REQUEST
            }
            TriageError::DuplicateTrigger(_) => StatusCode::CONFLICT,
            TriageError::StoreUnavailable(_) | TriageError::StreamUnavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            TriageError::PushFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "error": self.0.to_string(),
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::case::CaseStatus;
    use axum::response::IntoResponse;

    #[test]
    fn test_error_status_mapping() {
        let cases = [
            (
                TriageError::CaseNotFound("CASE-1-0".into()),
                StatusCode::NOT_FOUND,
            ),
            (
                TriageError::IllegalTransition {
                    from: CaseStatus::Resolved,
                    to: CaseStatus::Resolved,
                },
                StatusCode::CONFLICT,
            ),
            (
                TriageError::BadPayload("bad".into()),
                StatusCode::BAD_REQUEST,
            ),
            (
                TriageError::StoreUnavailable("down".into()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
        ];

        for (err, expected) in cases {
            let response = ApiError(err).into_response();
            assert_eq!(response.status(), expected);
        }
    }
}
