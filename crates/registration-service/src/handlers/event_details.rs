//! Event details for the public landing page.

use crate::models::{ApiResponse, EventDetails, EventSettings};
use crate::routes::AppState;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, instrument};

/// Error message of a failed event details read.
pub const EVENT_DETAILS_FAILURE_MESSAGE: &str = "Failed to fetch event details";

/// Handler for GET /event-details
///
/// Settings and the live counter are read concurrently. Any storage error
/// answers 500 with a generic message.
#[instrument(skip_all, name = "reg.handlers.event_details")]
pub async fn get_event_details(State(state): State<Arc<AppState>>) -> Response {
    let event_id = state.config.event_id.as_str();

    let result = tokio::try_join!(state.store.settings(event_id), state.store.capacity(event_id));

    match result {
        Ok((settings, capacity)) => {
            let details = EventDetails::new(EventSettings::from_map(&settings), &capacity);
            Json(ApiResponse::ok(details)).into_response()
        }
        Err(e) => {
            error!(target: "reg.handlers.event_details", error = %e, "Failed to read event details");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "success": false, "error": EVENT_DETAILS_FAILURE_MESSAGE })),
            )
                .into_response()
        }
    }
}
