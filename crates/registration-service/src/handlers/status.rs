//! Public registration status.

use crate::models::{ApiResponse, StatusResponse};
use crate::routes::AppState;
use axum::extract::State;
use axum::Json;
use std::sync::Arc;
use tracing::instrument;

/// Handler for GET /status
///
/// Never fails: a datastore error is reported as closed with status 200.
#[instrument(skip_all, name = "reg.handlers.status")]
pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<ApiResponse<StatusResponse>> {
    let status = state.status.status(&state.config.event_id).await;
    Json(ApiResponse::ok(status))
}
