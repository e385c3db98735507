use axum::{extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use tracing::warn;

use crate::common::response::{ApiError, ApiResponse, ApiSuccess};
use crate::infrastructure::db::pool;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub service: &'static str,
    pub queue_backend: &'static str,
    pub queue_name: String,
    pub storage_configured: bool,
    pub workers: usize,
}

impl HealthStatus {
    fn from_state(state: &AppState) -> Self {
        Self {
            service: env!("CARGO_PKG_NAME"),
            queue_backend: state.config.queue.backend().as_str(),
            queue_name: state.config.queue_name.clone(),
            storage_configured: state.config.storage.is_some(),
            workers: state.config.worker_concurrency,
        }
    }
}

/// Liveness: the process is up and serving.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    ApiSuccess(
        ApiResponse::success(HealthStatus::from_state(&state), "ok"),
        StatusCode::OK,
    )
}

/// Readiness: the ledger database answers.
pub async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    match pool::ping(&state.db).await {
        Ok(()) => ApiSuccess(
            ApiResponse::success(HealthStatus::from_state(&state), "ready"),
            StatusCode::OK,
        )
        .into_response(),
        Err(e) => {
            warn!(error = %e, "Readiness check failed");
            ApiError(
                format!("ledger database unavailable: {e}"),
                StatusCode::SERVICE_UNAVAILABLE,
            )
            .into_response()
        }
    }
}
