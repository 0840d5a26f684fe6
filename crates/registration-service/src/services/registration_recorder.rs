//! Registration recorder.
//!
//! Persists a registration once its artifacts are relocated. The INSERT and
//! the counter commit share one transaction and are idempotent per
//! sequence number, so a failed commit is retried once with the same number.
//!
//! A commit can land while its acknowledgement is lost. After the last
//! failed attempt the recorder asks the store whether the row exists and
//! only releases the reservation when it does not.

use crate::errors::RegistrationError;
use crate::errors::StoreError;
use crate::models::{ArtifactLinks, CommitReceipt, NewRegistration, SubmitterFields};
use crate::services::capacity_ledger::CapacityLedger;
use crate::services::status_controller::StatusController;
use tracing::{error, info, instrument, warn};

/// Commit attempts per registration.
const COMMIT_ATTEMPTS: u32 = 2;

/// Outcome of a successful record.
#[derive(Debug, Clone)]
pub struct RecordedRegistration {
    pub registration: NewRegistration,
    pub receipt: CommitReceipt,
    /// This registration filled the last slot and closed the event.
    pub closed_event: bool,
}

#[derive(Clone)]
pub struct RegistrationRecorder {
    ledger: CapacityLedger,
    status: StatusController,
}

impl RegistrationRecorder {
    pub fn new(ledger: CapacityLedger, status: StatusController) -> Self {
        Self { ledger, status }
    }

    /// Persist the registration under its reserved sequence number.
    ///
    /// # Errors
    ///
    /// Returns `RegistrationError::Persistence` when every commit attempt
    /// failed and the row is not in the store. The reservation is released
    /// only when the store confirms the row is absent; removing the
    /// relocated artifacts is left to the caller.
    #[instrument(
        skip_all,
        name = "reg.recorder.record",
        fields(event_id = %event_id, registration_number = sequence_number)
    )]
    pub async fn record(
        &self,
        event_id: &str,
        sequence_number: i32,
        fields: SubmitterFields,
        artifacts: ArtifactLinks,
    ) -> Result<RecordedRegistration, RegistrationError> {
        let registration = NewRegistration {
            registration_number: sequence_number,
            fields,
            artifacts,
        };

        let mut attempt = 1;
        let receipt = loop {
            match self.ledger.commit(event_id, &registration).await {
                Ok(receipt) => break receipt,
                Err(e) if attempt < COMMIT_ATTEMPTS => {
                    warn!(
                        target: "reg.services.recorder",
                        registration_number = sequence_number,
                        attempt,
                        error = %e,
                        "Commit failed, retrying"
                    );
                    attempt += 1;
                }
                Err(e) => match self.landed_receipt(event_id, sequence_number).await {
                    Ok(Some(receipt)) => {
                        warn!(
                            target: "reg.services.recorder",
                            registration_number = sequence_number,
                            attempts = attempt,
                            error = %e,
                            "Commit reported failure but the registration is persisted"
                        );
                        break receipt;
                    }
                    Ok(None) => {
                        error!(
                            target: "reg.services.recorder",
                            registration_number = sequence_number,
                            attempts = attempt,
                            error = %e,
                            "Commit failed, releasing reservation"
                        );
                        self.ledger.release(event_id).await;
                        return Err(RegistrationError::Persistence(e.to_string()));
                    }
                    Err(check_error) => {
                        // Releasing now could hand back a slot that is already counted
                        error!(
                            target: "reg.services.recorder",
                            registration_number = sequence_number,
                            attempts = attempt,
                            error = %e,
                            check_error = %check_error,
                            "Commit outcome unknown, keeping reservation"
                        );
                        return Err(RegistrationError::Persistence(e.to_string()));
                    }
                },
            }
        };

        info!(
            target: "reg.services.recorder",
            registration_number = sequence_number,
            current_count = receipt.current_count,
            max_quota = receipt.max_quota,
            "Registration recorded"
        );

        let closed_event = if receipt.quota_reached() {
            match self.status.close(event_id).await {
                Ok(transitioned) => transitioned,
                Err(e) => {
                    // The live count already reads as closed
                    warn!(
                        target: "reg.services.recorder",
                        error = %e,
                        "Failed to persist closed flag"
                    );
                    false
                }
            }
        } else {
            false
        };

        Ok(RecordedRegistration {
            registration,
            receipt,
            closed_event,
        })
    }

    /// Receipt of a registration whose commit landed despite the error,
    /// or `None` when the row is absent.
    async fn landed_receipt(
        &self,
        event_id: &str,
        sequence_number: i32,
    ) -> Result<Option<CommitReceipt>, StoreError> {
        if !self.ledger.is_persisted(event_id, sequence_number).await? {
            return Ok(None);
        }
        let snapshot = self.ledger.snapshot(event_id).await?;
        Ok(Some(CommitReceipt {
            current_count: snapshot.current_count,
            max_quota: snapshot.max_quota,
            newly_inserted: false,
        }))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::{ArtifactKind, ArtifactRef, EventStatus, VestSize};
    use crate::repositories::InMemoryEventStore;
    use std::sync::Arc;

    fn fields() -> SubmitterFields {
        SubmitterFields {
            name: "Budi Santoso".to_string(),
            email: "budi@example.com".to_string(),
            phone: "081234567890".to_string(),
            age: 25,
            city: "Jakarta".to_string(),
            instagram_username: "budisantoso".to_string(),
            participation_history: "Belum Pernah".to_string(),
            vest_size: VestSize::L,
        }
    }

    fn links() -> ArtifactLinks {
        ArtifactLinks {
            payment: ArtifactRef {
                kind: ArtifactKind::PaymentProof,
                folder_id: "folder-2".to_string(),
                file_id: "file-1".to_string(),
                link: "https://files.example/file-1".to_string(),
            },
            tiktok: None,
            instagram: None,
        }
    }

    fn recorder(store: Arc<InMemoryEventStore>) -> (RegistrationRecorder, CapacityLedger) {
        let ledger = CapacityLedger::new(store.clone());
        let status = StatusController::new(store);
        (RegistrationRecorder::new(ledger.clone(), status), ledger)
    }

    #[tokio::test]
    async fn test_record_commits_slot() {
        let store = Arc::new(InMemoryEventStore::with_event("ev", 50, 100));
        let (recorder, ledger) = recorder(store.clone());

        let number = ledger.reserve("ev").await.unwrap();
        let recorded = recorder.record("ev", number, fields(), links()).await.unwrap();

        assert_eq!(number, 51);
        assert_eq!(recorded.receipt.current_count, 51);
        assert!(!recorded.closed_event);
        let snapshot = store.snapshot("ev").unwrap();
        assert_eq!(snapshot.reserved_count, 0);
        assert_eq!(snapshot.status, EventStatus::Open);
        assert_eq!(store.registrations("ev").len(), 1);
    }

    #[tokio::test]
    async fn test_last_slot_closes_event() {
        let store = Arc::new(InMemoryEventStore::with_event("ev", 4, 5));
        let (recorder, ledger) = recorder(store.clone());

        let number = ledger.reserve("ev").await.unwrap();
        let recorded = recorder.record("ev", number, fields(), links()).await.unwrap();

        assert!(recorded.closed_event);
        assert_eq!(store.snapshot("ev").unwrap().status, EventStatus::Closed);
        assert!(matches!(
            ledger.reserve("ev").await,
            Err(RegistrationError::QuotaExhausted)
        ));
    }

    #[tokio::test]
    async fn test_transient_commit_failure_is_retried() {
        let store = Arc::new(InMemoryEventStore::with_event("ev", 0, 10));
        store.fail_next_commits(1);
        let (recorder, ledger) = recorder(store.clone());

        let number = ledger.reserve("ev").await.unwrap();
        let recorded = recorder.record("ev", number, fields(), links()).await.unwrap();

        assert_eq!(recorded.registration.registration_number, 1);
        assert_eq!(store.commit_calls(), 2);
        assert_eq!(store.registrations("ev").len(), 1);
    }

    #[tokio::test]
    async fn test_persistent_failure_releases_reservation() {
        let store = Arc::new(InMemoryEventStore::with_event("ev", 0, 10));
        store.fail_next_commits(2);
        let (recorder, ledger) = recorder(store.clone());

        let number = ledger.reserve("ev").await.unwrap();
        let result = recorder.record("ev", number, fields(), links()).await;

        assert!(matches!(result, Err(RegistrationError::Persistence(_))));
        let snapshot = store.snapshot("ev").unwrap();
        assert_eq!(snapshot.current_count, 0);
        assert_eq!(snapshot.reserved_count, 0);
        // Abandoned numbers are not reused
        assert_eq!(ledger.reserve("ev").await.unwrap(), 2);
    }

    /// Both attempts applied server-side but reported errors.
    #[tokio::test]
    async fn test_lost_acknowledgement_keeps_other_reservations() {
        let store = Arc::new(InMemoryEventStore::with_event("ev", 3, 5));
        store.lose_next_commit_acks(2);
        let (recorder, ledger) = recorder(store.clone());

        let number = ledger.reserve("ev").await.unwrap();
        let _in_flight = ledger.reserve("ev").await.unwrap();
        let recorded = recorder.record("ev", number, fields(), links()).await.unwrap();

        assert_eq!(store.commit_calls(), 2);
        assert!(!recorded.receipt.newly_inserted);
        assert_eq!(recorded.receipt.current_count, 4);
        assert!(!recorded.closed_event);
        let snapshot = store.snapshot("ev").unwrap();
        assert_eq!(snapshot.current_count, 4);
        // The other submission still holds its slot
        assert_eq!(snapshot.reserved_count, 1);
        assert!(matches!(
            ledger.reserve("ev").await,
            Err(RegistrationError::QuotaExhausted)
        ));
    }
}
