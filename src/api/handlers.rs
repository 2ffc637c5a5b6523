use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::notify::{NotifierState, NotifyService, RuleDefinition, RuleState};
use crate::observation::{Binding, ObservationBatch};

/// Application state shared across handlers
pub struct AppState {
    pub service: NotifyService,
}

// ============================================================================
// Health Check
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ============================================================================
// Ingest
// ============================================================================

#[derive(Deserialize)]
pub struct IngestRequest {
    pub binding: Binding,
    /// Unix seconds the readings were taken; defaults to now. Informational
    /// only: episode start, wait time and backoff use the receive time.
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub observations: serde_json::Map<String, serde_json::Value>,
}

#[derive(Serialize)]
pub struct IngestResponse {
    pub queued: usize,
}

pub async fn ingest(
    State(state): State<Arc<AppState>>,
    Json(request): Json<IngestRequest>,
) -> Result<Json<IngestResponse>, ApiError> {
    let timestamp = match request.timestamp {
        Some(secs) => DateTime::<Utc>::from_timestamp(secs, 0)
            .ok_or_else(|| ApiError::BadRequest(format!("Invalid timestamp {}", secs)))?,
        None => state.service.engine().now(),
    };

    let batch = ObservationBatch::from_json(request.binding, timestamp, &request.observations);
    tracing::debug!(
        binding = %batch.binding,
        timestamp = %batch.timestamp,
        readings = batch.len(),
        "Batch received"
    );

    let queued = state.service.submit(&batch);
    Ok(Json(IngestResponse { queued }))
}

// ============================================================================
// Status
// ============================================================================

#[derive(Serialize)]
pub struct StatusResponse {
    pub notifier: NotifierState,
    pub rules: Vec<RuleStatus>,
}

#[derive(Serialize)]
pub struct RuleStatus {
    pub rule: RuleDefinition,
    pub state: RuleState,
}

pub async fn status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let engine = state.service.engine();
    let rules = engine
        .store()
        .iter()
        .cloned()
        .zip(engine.rule_states())
        .map(|(rule, state)| RuleStatus { rule, state })
        .collect();

    Json(StatusResponse {
        notifier: engine.notifier_state(),
        rules,
    })
}

// ============================================================================
// Error Handling
// ============================================================================

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}
