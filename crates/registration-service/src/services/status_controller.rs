//! Status controller.
//!
//! The public open state is derived from the flag and the live count read
//! together, never from the flag alone. Any read failure reports closed.
//! `close` is the only automatic writer of the flag; reopening is an
//! operator action outside this service.

use crate::errors::StoreError;
use crate::models::{EventSettings, StatusResponse};
use crate::repositories::EventStore;
use std::sync::Arc;
use tracing::{info, instrument, warn};

#[derive(Clone)]
pub struct StatusController {
    store: Arc<dyn EventStore>,
}

impl StatusController {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self { store }
    }

    /// `flag == open && current_count < max_quota`; `false` on any error.
    #[instrument(skip_all, name = "reg.status.is_open", fields(event_id = %event_id))]
    pub async fn is_open(&self, event_id: &str) -> bool {
        match self.store.capacity(event_id).await {
            Ok(capacity) => capacity.is_open(),
            Err(e) => {
                warn!(
                    target: "reg.services.status",
                    event_id = %event_id,
                    error = %e,
                    "Capacity read failed, reporting closed"
                );
                false
            }
        }
    }

    /// Public status payload. Never fails.
    pub async fn status(&self, event_id: &str) -> StatusResponse {
        let is_open = self.is_open(event_id).await;

        let description = match self.store.settings(event_id).await {
            Ok(map) => EventSettings::from_map(&map).status_description,
            Err(e) => {
                warn!(
                    target: "reg.services.status",
                    event_id = %event_id,
                    error = %e,
                    "Settings read failed, using default description"
                );
                EventSettings::default().status_description
            }
        };

        StatusResponse::new(is_open, description)
    }

    /// Close the event after the quota was reached.
    ///
    /// Returns `true` only for the call that flipped the flag.
    #[instrument(skip_all, name = "reg.status.close", fields(event_id = %event_id))]
    pub async fn close(&self, event_id: &str) -> Result<bool, StoreError> {
        let transitioned = self.store.close(event_id).await?;
        if transitioned {
            info!(target: "reg.services.status", event_id = %event_id, "Quota reached, registration closed");
        }
        Ok(transitioned)
    }
}
