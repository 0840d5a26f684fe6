//! Capacity ledger.
//!
//! Single owner of "how many slots remain". Every reservation goes through
//! the store's atomic `reserve`, so the quota check and the slot claim can
//! never be split by a concurrent request.

use crate::errors::{RegistrationError, StoreError};
use crate::models::{CapacitySnapshot, CommitReceipt, NewRegistration, ReserveOutcome};
use crate::observability::metrics;
use crate::repositories::EventStore;
use std::sync::Arc;
use tracing::{debug, error, instrument, warn};

/// Reservation and commit of registration slots.
#[derive(Clone)]
pub struct CapacityLedger {
    store: Arc<dyn EventStore>,
}

impl CapacityLedger {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self { store }
    }

    /// Claim a slot and its sequence number.
    ///
    /// # Errors
    ///
    /// - `RegistrationError::QuotaExhausted` if no slot remains
    /// - `RegistrationError::RegistrationClosed` if an operator closed the event
    /// - `RegistrationError::Internal` if the store is unreachable
    #[instrument(skip_all, name = "reg.ledger.reserve", fields(event_id = %event_id))]
    pub async fn reserve(&self, event_id: &str) -> Result<i32, RegistrationError> {
        match self.store.reserve(event_id).await {
            Ok(ReserveOutcome::Reserved { sequence_number }) => {
                metrics::record_reservation("reserved");
                debug!(
                    target: "reg.services.ledger",
                    event_id = %event_id,
                    sequence_number,
                    "Slot reserved"
                );
                Ok(sequence_number)
            }
            Ok(ReserveOutcome::QuotaExhausted) => {
                metrics::record_reservation("quota_exhausted");
                Err(RegistrationError::QuotaExhausted)
            }
            Ok(ReserveOutcome::Closed) => {
                metrics::record_reservation("closed");
                Err(RegistrationError::RegistrationClosed)
            }
            Err(e) => {
                metrics::record_reservation("error");
                error!(target: "reg.services.ledger", event_id = %event_id, error = %e, "Reservation failed");
                Err(e.into())
            }
        }
    }

    /// Persist the registration and move its slot from reserved to committed.
    #[instrument(
        skip_all,
        name = "reg.ledger.commit",
        fields(event_id = %event_id, registration_number = registration.registration_number)
    )]
    pub async fn commit(
        &self,
        event_id: &str,
        registration: &NewRegistration,
    ) -> Result<CommitReceipt, StoreError> {
        let receipt = self.store.insert_and_commit(event_id, registration).await?;
        if !receipt.newly_inserted {
            warn!(
                target: "reg.services.ledger",
                event_id = %event_id,
                registration_number = registration.registration_number,
                "Registration already persisted, commit replay ignored"
            );
        }
        Ok(receipt)
    }

    /// Return an abandoned reservation. Failures are logged, never returned.
    #[instrument(skip_all, name = "reg.ledger.release", fields(event_id = %event_id))]
    pub async fn release(&self, event_id: &str) {
        if let Err(e) = self.store.release(event_id).await {
            error!(
                target: "reg.services.ledger",
                event_id = %event_id,
                error = %e,
                "Failed to release reservation"
            );
        }
    }

    /// Whether the registration under `registration_number` is persisted.
    pub async fn is_persisted(
        &self,
        event_id: &str,
        registration_number: i32,
    ) -> Result<bool, StoreError> {
        self.store
            .registration_exists(event_id, registration_number)
            .await
    }

    pub async fn snapshot(&self, event_id: &str) -> Result<CapacitySnapshot, StoreError> {
        self.store.capacity(event_id).await
    }
}
