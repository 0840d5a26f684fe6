//! Registration pipeline.
//!
//! validate -> reserve -> relocate -> record -> respond, with operator
//! notifications and the sheet row handed to the dispatcher after the
//! registration is committed. Only validation, reservation, relocation and
//! persistence can fail a submission.

use crate::errors::RegistrationError;
use crate::models::{EventSettings, RawSubmission, RegisterResponse};
use crate::observability::metrics;
use crate::repositories::EventStore;
use crate::services::artifact_relocator::{event_folder_name, ArtifactRelocator};
use crate::services::capacity_ledger::CapacityLedger;
use crate::services::notification;
use crate::services::registration_recorder::{RecordedRegistration, RegistrationRecorder};
use crate::services::status_controller::StatusController;
use crate::tasks::{DispatcherHandle, Job, NotificationJob, NotificationKind};
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Per-instance pipeline settings.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub event_id: String,
    pub max_upload_bytes: usize,
    pub sheet_sync_enabled: bool,
}

#[derive(Clone)]
pub struct RegistrationPipeline {
    store: Arc<dyn EventStore>,
    ledger: CapacityLedger,
    relocator: ArtifactRelocator,
    recorder: RegistrationRecorder,
    dispatcher: DispatcherHandle,
    settings: Arc<PipelineSettings>,
}

impl RegistrationPipeline {
    pub fn new(
        store: Arc<dyn EventStore>,
        relocator: ArtifactRelocator,
        dispatcher: DispatcherHandle,
        settings: PipelineSettings,
    ) -> Self {
        let ledger = CapacityLedger::new(store.clone());
        let status = StatusController::new(store.clone());
        let recorder = RegistrationRecorder::new(ledger.clone(), status);
        Self {
            store,
            ledger,
            relocator,
            recorder,
            dispatcher,
            settings: Arc::new(settings),
        }
    }

    pub fn event_id(&self) -> &str {
        &self.settings.event_id
    }

    /// Run one submission to a definitive outcome.
    #[instrument(skip_all, name = "reg.pipeline.submit", fields(event_id = %self.settings.event_id))]
    pub async fn submit(&self, raw: RawSubmission) -> Result<RegisterResponse, RegistrationError> {
        let result = self.run(raw).await;
        metrics::record_registration(match &result {
            Ok(_) => "success",
            Err(e) => e.metric_label(),
        });
        result
    }

    async fn run(&self, raw: RawSubmission) -> Result<RegisterResponse, RegistrationError> {
        let event_id = self.settings.event_id.as_str();

        let submission = raw
            .validate(self.settings.max_upload_bytes)
            .map_err(RegistrationError::Validation)?;

        let sequence_number = self.ledger.reserve(event_id).await?;

        let event = self.event_settings(event_id).await;

        let artifacts = match self
            .relocator
            .relocate(&event, &submission.fields, &submission.files)
            .await
        {
            Ok(artifacts) => artifacts,
            Err(e) => {
                self.ledger.release(event_id).await;
                return Err(e);
            }
        };

        let rollback = artifacts.clone();
        let recorded = match self
            .recorder
            .record(event_id, sequence_number, submission.fields, artifacts)
            .await
        {
            Ok(recorded) => recorded,
            Err(e) => {
                let relocated: Vec<_> = rollback.iter().cloned().collect();
                self.relocator.discard(&relocated).await;
                return Err(e);
            }
        };

        info!(
            target: "reg.services.pipeline",
            registration_number = sequence_number,
            "Registration accepted"
        );

        let response = RegisterResponse {
            registration_number: sequence_number,
            name: recorded.registration.fields.name.clone(),
        };
        self.enqueue_followups(&event, recorded);
        Ok(response)
    }

    /// Display settings; defaults when unreadable so relocation can proceed.
    async fn event_settings(&self, event_id: &str) -> EventSettings {
        match self.store.settings(event_id).await {
            Ok(map) => EventSettings::from_map(&map),
            Err(e) => {
                warn!(
                    target: "reg.services.pipeline",
                    error = %e,
                    "Settings read failed, using defaults"
                );
                EventSettings::default()
            }
        }
    }

    fn enqueue_followups(&self, event: &EventSettings, recorded: RecordedRegistration) {
        let now = Utc::now();
        let registration = &recorded.registration;

        self.dispatcher.dispatch(Job::Notify(NotificationJob {
            kind: NotificationKind::NewRegistration,
            text: notification::new_registration_message(
                registration.registration_number,
                recorded.receipt.max_quota,
                &registration.fields,
                &registration.artifacts,
                now,
            ),
        }));

        if self.settings.sheet_sync_enabled {
            self.dispatcher.dispatch(Job::SheetSync {
                sheet: event_folder_name(&event.title, &event.date),
                row: notification::sheet_row(registration),
            });
        }

        if recorded.closed_event {
            self.dispatcher.dispatch(Job::Notify(NotificationJob {
                kind: NotificationKind::CapacityFull,
                text: notification::capacity_full_message(
                    &event.title,
                    recorded.receipt.current_count,
                    recorded.receipt.max_quota,
                    now,
                ),
            }));
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::models::{ArtifactKind, EventStatus, UploadedFile};
    use crate::repositories::InMemoryEventStore;
    use crate::services::artifact_sink::mock::MockArtifactSink;
    use bytes::Bytes;
    use std::collections::HashMap;
    use tokio::sync::mpsc;

    struct Harness {
        store: Arc<InMemoryEventStore>,
        sink: Arc<MockArtifactSink>,
        pipeline: RegistrationPipeline,
        jobs: mpsc::Receiver<Job>,
    }

    fn harness(store: InMemoryEventStore, sink: MockArtifactSink) -> Harness {
        let store = Arc::new(store);
        store.set_setting("ev", "event_title", "Bersih Pantai");
        store.set_setting("ev", "event_date", "Minggu, 12 Januari 2026");
        let sink = Arc::new(sink);
        let (handle, jobs) = DispatcherHandle::channel(16);
        let pipeline = RegistrationPipeline::new(
            store.clone(),
            ArtifactRelocator::new(sink.clone()),
            handle,
            PipelineSettings {
                event_id: "ev".to_string(),
                max_upload_bytes: 5 * 1024 * 1024,
                sheet_sync_enabled: true,
            },
        );
        Harness {
            store,
            sink,
            pipeline,
            jobs,
        }
    }

    fn file(kind: ArtifactKind) -> UploadedFile {
        UploadedFile {
            kind,
            original_name: "proof.png".to_string(),
            content_type: "image/png".to_string(),
            bytes: Bytes::from(vec![7u8; 2048]),
        }
    }

    fn submission(files: Vec<UploadedFile>) -> RawSubmission {
        let fields = [
            ("name", "Budi Santoso"),
            ("email", "budi@example.com"),
            ("phone", "081234567890"),
            ("age", "25"),
            ("city", "Jakarta"),
            ("instagramUsername", "budisantoso"),
            ("vestSize", "L"),
        ];
        RawSubmission {
            fields: fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<HashMap<_, _>>(),
            files,
        }
    }

    fn drain(jobs: &mut mpsc::Receiver<Job>) -> Vec<Job> {
        let mut out = Vec::new();
        while let Ok(job) = jobs.try_recv() {
            out.push(job);
        }
        out
    }

    #[tokio::test]
    async fn test_successful_submission() {
        let mut h = harness(
            InMemoryEventStore::with_event("ev", 50, 100),
            MockArtifactSink::accepting(),
        );

        let response = h
            .pipeline
            .submit(submission(vec![
                file(ArtifactKind::PaymentProof),
                file(ArtifactKind::TiktokProof),
            ]))
            .await
            .unwrap();

        assert_eq!(response.registration_number, 51);
        assert_eq!(response.name, "Budi Santoso");
        let snapshot = h.store.snapshot("ev").unwrap();
        assert_eq!(snapshot.current_count, 51);
        assert!(snapshot.is_open());
        assert_eq!(h.sink.uploads().len(), 2);

        let jobs = drain(&mut h.jobs);
        assert_eq!(jobs.len(), 2);
        assert!(matches!(
            &jobs[0],
            Job::Notify(NotificationJob { kind: NotificationKind::NewRegistration, text })
                if text.contains("*51 / 100*")
        ));
        assert!(matches!(
            &jobs[1],
            Job::SheetSync { sheet, row } if sheet == "Bersih Pantai - 12 Jan 2026" && row[0] == "51"
        ));
    }

    #[tokio::test]
    async fn test_last_slot_enqueues_capacity_alert() {
        let mut h = harness(
            InMemoryEventStore::with_event("ev", 4, 5),
            MockArtifactSink::accepting(),
        );

        h.pipeline
            .submit(submission(vec![file(ArtifactKind::PaymentProof)]))
            .await
            .unwrap();

        assert_eq!(h.store.snapshot("ev").unwrap().status, EventStatus::Closed);
        let jobs = drain(&mut h.jobs);
        assert!(jobs.iter().any(|job| matches!(
            job,
            Job::Notify(NotificationJob { kind: NotificationKind::CapacityFull, .. })
        )));

        let next = h
            .pipeline
            .submit(submission(vec![file(ArtifactKind::PaymentProof)]))
            .await;
        assert!(matches!(next, Err(RegistrationError::QuotaExhausted)));
    }

    #[tokio::test]
    async fn test_validation_failure_has_no_side_effects() {
        let mut h = harness(
            InMemoryEventStore::with_event("ev", 0, 10),
            MockArtifactSink::accepting(),
        );

        let result = h.pipeline.submit(submission(Vec::new())).await;

        match result {
            Err(RegistrationError::Validation(errors)) => {
                assert!(errors.contains_key("paymentProof"));
            }
            other => unreachable!("expected validation error, got {other:?}"),
        }
        assert_eq!(h.store.snapshot("ev").unwrap().last_sequence, 0);
        assert!(h.sink.uploads().is_empty());
        assert!(drain(&mut h.jobs).is_empty());
    }

    #[tokio::test]
    async fn test_relocation_failure_releases_slot() {
        let mut h = harness(
            InMemoryEventStore::with_event("ev", 0, 10),
            MockArtifactSink::failing_uploads("tiktok"),
        );

        let result = h
            .pipeline
            .submit(submission(vec![
                file(ArtifactKind::PaymentProof),
                file(ArtifactKind::TiktokProof),
            ]))
            .await;

        assert!(matches!(result, Err(RegistrationError::Relocation(_))));
        let snapshot = h.store.snapshot("ev").unwrap();
        assert_eq!(snapshot.reserved_count, 0);
        assert_eq!(snapshot.current_count, 0);
        assert!(h.store.registrations("ev").is_empty());
        assert_eq!(h.sink.deleted().len(), 1);
        assert!(drain(&mut h.jobs).is_empty());
    }

    #[tokio::test]
    async fn test_persistence_failure_discards_artifacts() {
        let mut h = harness(
            InMemoryEventStore::with_event("ev", 0, 10),
            MockArtifactSink::accepting(),
        );
        h.store.fail_next_commits(2);

        let result = h
            .pipeline
            .submit(submission(vec![file(ArtifactKind::PaymentProof)]))
            .await;

        assert!(matches!(result, Err(RegistrationError::Persistence(_))));
        assert_eq!(h.sink.deleted().len(), 1);
        assert_eq!(h.store.snapshot("ev").unwrap().reserved_count, 0);
        assert!(drain(&mut h.jobs).is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_submissions_never_exceed_quota() {
        let h = harness(
            InMemoryEventStore::with_event("ev", 95, 100),
            MockArtifactSink::accepting(),
        );

        let submissions = (0..12).map(|_| {
            let pipeline = h.pipeline.clone();
            async move {
                pipeline
                    .submit(submission(vec![file(ArtifactKind::PaymentProof)]))
                    .await
            }
        });
        let results = futures::future::join_all(submissions).await;

        let mut numbers: Vec<i32> = results
            .iter()
            .filter_map(|r| r.as_ref().ok().map(|r| r.registration_number))
            .collect();
        numbers.sort_unstable();
        assert_eq!(numbers, vec![96, 97, 98, 99, 100]);
        assert_eq!(
            results
                .iter()
                .filter(|r| matches!(r, Err(RegistrationError::QuotaExhausted)))
                .count(),
            7
        );
        assert_eq!(h.store.snapshot("ev").unwrap().current_count, 100);
        // All relocations converge on one event folder
        assert_eq!(
            h.sink
                .folders()
                .iter()
                .filter(|f| f.parent_id == "root")
                .count(),
            1
        );
    }
}
