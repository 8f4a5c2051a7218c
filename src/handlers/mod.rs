pub mod batches;
pub mod stats;
pub mod verification;

use axum::{extract::State, http::StatusCode, Json};

use crate::dtos::HealthResponse;
use crate::error::AppError;
use crate::services::metrics::get_metrics;
use crate::AppState;

/// Liveness and dependency health. A dead cache degrades; a dead store
/// takes the service out of rotation.
pub async fn health_check(
    State(state): State<AppState>,
) -> (StatusCode, Json<HealthResponse>) {
    let database_ok = state.db.health_check().await.is_ok();
    let cache_ok = state.cache.health_check().await.is_ok();

    let (status_code, status) = match (database_ok, cache_ok) {
        (true, true) => (StatusCode::OK, "ok"),
        (true, false) => (StatusCode::OK, "degraded"),
        (false, _) => (StatusCode::SERVICE_UNAVAILABLE, "unavailable"),
    };

    (
        status_code,
        Json(HealthResponse {
            status,
            database: if database_ok { "ok" } else { "unavailable" },
            cache: if cache_ok { "ok" } else { "unavailable" },
        }),
    )
}

pub async fn metrics() -> Result<String, AppError> {
    get_metrics().map_err(|e| AppError::InternalError(anyhow::anyhow!("Failed to encode metrics: {}", e)))
}
