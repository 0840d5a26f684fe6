//! Health check handler.

use crate::models::HealthResponse;
use crate::routes::AppState;
use axum::extract::State;
use axum::Json;
use std::sync::Arc;
use tracing::{instrument, warn};

/// Handler for GET /health
///
/// Pings the datastore. Always answers 200 so orchestrators can read the
/// body; an unreachable datastore reports `"unhealthy"`.
#[instrument(skip_all, name = "reg.health.check")]
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let db_healthy = match state.store.ping().await {
        Ok(()) => true,
        Err(e) => {
            warn!(target: "reg.handlers.health", error = %e, "Datastore ping failed");
            false
        }
    };

    let label = if db_healthy { "healthy" } else { "unhealthy" };
    Json(HealthResponse {
        status: label.to_string(),
        database: label.to_string(),
    })
}
