//! REST endpoint handlers.

use super::types::{ResolveRequest, StatsResponse};
use super::{ApiError, AppState};
use crate::cases::{AiCaseUpdate, Resolution};
use crate::error::TriageError;
use crate::types::case::FraudCase;
use axum::{
    extract::{Path, State},
    Json,
};
use serde_json::{json, Map};
use std::sync::atomic::Ordering;
use tracing::info;

/// `GET /api/v1/dashboard/stats`
pub(super) async fn dashboard_stats(
    State(state): State<AppState>,
) -> Result<Json<StatsResponse>, ApiError> {
    let stats = state.cases.stats().await?;

    let mut counts = Map::new();
    for (status, count) in stats {
        counts.insert(status.as_str().to_string(), json!(count));
    }

    Ok(Json(StatsResponse {
        counts,
        tps: state.last_tps.load(Ordering::Relaxed),
    }))
}

/// `GET /api/v1/dashboard/queue`
pub(super) async fn dashboard_queue(
    State(state): State<AppState>,
) -> Result<Json<Vec<FraudCase>>, ApiError> {
    Ok(Json(state.cases.review_queue().await?))
}

/// `GET /api/v1/dashboard/cases/{case_id}` and `GET /api/v1/fraud-cases/{case_id}`
pub(super) async fn get_case(
    State(state): State<AppState>,
    Path(case_id): Path<String>,
) -> Result<Json<FraudCase>, ApiError> {
    Ok(Json(state.cases.get(&case_id).await?))
}

/// `POST /api/v1/dashboard/cases/{case_id}/resolve`
pub(super) async fn resolve_case(
    State(state): State<AppState>,
    Path(case_id): Path<String>,
    Json(request): Json<ResolveRequest>,
) -> Result<Json<FraudCase>, ApiError> {
    let resolved = state
        .cases
        .resolve(
            &case_id,
            Resolution {
                decision: request.decision,
                notes: request.notes,
            },
        )
        .await?;
    Ok(Json(resolved))
}

/// `POST /api/v1/fraud-cases/ai-update`
///
/// The investigator's payload is loosely shaped, so it is accepted as raw
/// JSON and re-validated here: a malformed body is a 400, not a 422.
pub(super) async fn ai_update(
    State(state): State<AppState>,
    Json(payload): Json<serde_json::Value>,
) -> Result<Json<FraudCase>, ApiError> {
    let update: AiCaseUpdate = serde_json::from_value(payload)
        .map_err(|e| TriageError::BadPayload(e.to_string()))?;

    info!(case_id = %update.case_id, "received AI update");
    Ok(Json(state.cases.apply_ai_update(update).await?))
}
