//! Registration flow integration tests.
//!
//! Drives `POST /register`, `GET /status` and `GET /event-details` over real
//! HTTP through `TestRegistrationServer`, with the in-memory store and mock
//! artifact sink and chat client.

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]

use registration_service::models::EventStatus;
use registration_service::repositories::InMemoryEventStore;
use registration_service::services::artifact_sink::mock::MockArtifactSink;
use registration_service::services::chat_client::mock::MockChatClient;
use registration_test_utils::{
    RegistrationForm, ResponseAssertions, TestRegistrationServer, TEST_CHAT_IDS, TEST_EVENT_ID,
};
use std::sync::Arc;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

const VOLUNTEERS: [&str; 12] = [
    "Budi Santoso",
    "Siti Aminah",
    "Andi Wijaya",
    "Dewi Lestari",
    "Rizky Pratama",
    "Putri Maharani",
    "Agus Setiawan",
    "Nur Hidayah",
    "Joko Susilo",
    "Rina Marlina",
    "Toni Saputra",
    "Wulan Sari",
];

fn store_with(current_count: i32, max_quota: i32) -> Arc<InMemoryEventStore> {
    let store = InMemoryEventStore::with_event(TEST_EVENT_ID, current_count, max_quota);
    store.set_setting(TEST_EVENT_ID, "event_title", "Bersih Pantai");
    store.set_setting(TEST_EVENT_ID, "event_date", "Minggu, 12 Januari 2026");
    Arc::new(store)
}

/// A valid submission is numbered after the committed count and its payment
/// proof lands in the payment subfolder of the event folder.
#[tokio::test]
async fn test_register_assigns_next_number() -> Result<(), anyhow::Error> {
    let store = store_with(50, 100);
    let server = TestRegistrationServer::spawn(store.clone()).await?;

    let (status, body) = server.submit(RegistrationForm::valid("Budi Santoso")).await?;

    assert_eq!(status, 200);
    body.assert_registered(51, "Budi Santoso");

    let snapshot = store.snapshot(TEST_EVENT_ID).expect("event exists");
    assert_eq!(snapshot.current_count, 51);
    assert_eq!(snapshot.reserved_count, 0);
    assert_eq!(snapshot.status, EventStatus::Open);

    let sink = server.sink();
    let event_folder = sink
        .folder_id("root", "Bersih Pantai - 12 Jan 2026")
        .expect("event folder created");
    let payment_folder = sink
        .folder_id(&event_folder, "Bukti Pembayaran")
        .expect("payment folder created");
    let uploads = sink.uploads();
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].folder_id, payment_folder);
    assert!(uploads[0].name.starts_with("payment_Budi Santoso_"));

    let (_, status_body) = server.get_json("/status").await?;
    status_body.assert_open(true);

    Ok(())
}

/// Social proofs are stored next to each other in the social subfolder.
#[tokio::test]
async fn test_register_with_social_proofs() -> Result<(), anyhow::Error> {
    let server = TestRegistrationServer::spawn(store_with(0, 10)).await?;

    let (status, body) = server
        .submit(RegistrationForm::valid("Siti Aminah").with_social_proofs())
        .await?;

    assert_eq!(status, 200);
    body.assert_registered(1, "Siti Aminah");

    let sink = server.sink();
    let event_folder = sink
        .folder_id("root", "Bersih Pantai - 12 Jan 2026")
        .expect("event folder created");
    let social_folder = sink
        .folder_id(&event_folder, "Screenshot Sosmed")
        .expect("social folder created");
    let social: Vec<_> = sink
        .uploads()
        .into_iter()
        .filter(|u| u.folder_id == social_folder)
        .collect();
    assert_eq!(social.len(), 2);
    assert!(social.iter().any(|u| u.name.starts_with("tiktok_Siti_")));
    assert!(social.iter().any(|u| u.name.starts_with("instagram_Siti_")));

    Ok(())
}

/// Filling the last slot closes the event; the next submitter is turned away.
#[tokio::test]
async fn test_last_slot_closes_registration() -> Result<(), anyhow::Error> {
    let store = store_with(4, 5);
    let server = TestRegistrationServer::spawn(store.clone()).await?;

    let (status, body) = server.submit(RegistrationForm::valid("Budi Santoso")).await?;
    assert_eq!(status, 200);
    body.assert_registered(5, "Budi Santoso");

    assert_eq!(
        store.snapshot(TEST_EVENT_ID).expect("event exists").status,
        EventStatus::Closed
    );
    let (_, status_body) = server.get_json("/status").await?;
    status_body.assert_open(false);

    let (status, body) = server.submit(RegistrationForm::valid("Siti Aminah")).await?;
    assert_eq!(status, 400);
    body.assert_error("quota exhausted");
    assert_eq!(store.registrations(TEST_EVENT_ID).len(), 1);

    Ok(())
}

/// The capacity-full alert goes to every operator chat once.
#[tokio::test]
async fn test_capacity_full_alert_is_sent() -> Result<(), anyhow::Error> {
    let server = TestRegistrationServer::spawn(store_with(4, 5)).await?;

    let (status, _) = server.submit(RegistrationForm::valid("Budi Santoso")).await?;
    assert_eq!(status, 200);

    // One registration message and one alert per chat
    let delivered = server.wait_for_delivered(4, WAIT).await;
    let alerts: Vec<_> = delivered
        .iter()
        .filter(|m| m.text.contains("KUOTA PENUH"))
        .collect();
    assert_eq!(alerts.len(), TEST_CHAT_IDS.len());
    assert!(alerts[0].text.contains("*5 / 5*"));

    Ok(())
}

/// An operator-closed event rejects submissions while slots remain.
#[tokio::test]
async fn test_operator_closed_event_rejects() -> Result<(), anyhow::Error> {
    let store = store_with(3, 100);
    store.set_status(TEST_EVENT_ID, EventStatus::Closed);
    let server = TestRegistrationServer::spawn(store.clone()).await?;

    let (status, body) = server.submit(RegistrationForm::valid("Budi Santoso")).await?;

    assert_eq!(status, 400);
    body.assert_error("registration closed");
    assert!(server.sink().uploads().is_empty());

    Ok(())
}

/// Invalid fields are reported per field and nothing is stored.
#[tokio::test]
async fn test_validation_errors_are_reported_per_field() -> Result<(), anyhow::Error> {
    let store = store_with(10, 100);
    let server = TestRegistrationServer::spawn(store.clone()).await?;

    let form = RegistrationForm::valid("Budi Santoso")
        .with_field("email", "bukan-email")
        .with_field("age", "12")
        .without_file("paymentProof");
    let (status, body) = server.submit(form).await?;

    assert_eq!(status, 400);
    body.assert_field_error("email")
        .assert_field_error("age")
        .assert_field_error("paymentProof");

    let snapshot = store.snapshot(TEST_EVENT_ID).expect("event exists");
    assert_eq!(snapshot.current_count, 10);
    assert_eq!(snapshot.reserved_count, 0);
    assert!(server.sink().uploads().is_empty());
    assert!(server.chat().calls().is_empty());

    Ok(())
}

/// A failed upload returns a generic error and gives the slot back.
#[tokio::test]
async fn test_upload_failure_releases_slot() -> Result<(), anyhow::Error> {
    let store = store_with(10, 100);
    let server = TestRegistrationServer::spawn_with(
        store.clone(),
        MockArtifactSink::failing_uploads("tiktok"),
        MockChatClient::accepting(),
    )
    .await?;

    let (status, body) = server
        .submit(RegistrationForm::valid("Budi Santoso").with_social_proofs())
        .await?;

    assert_eq!(status, 500);
    assert_eq!(body["success"], false);

    let snapshot = store.snapshot(TEST_EVENT_ID).expect("event exists");
    assert_eq!(snapshot.current_count, 10);
    assert_eq!(snapshot.reserved_count, 0);
    assert!(store.registrations(TEST_EVENT_ID).is_empty());

    // The next submitter gets a fresh number; abandoned numbers are not reused
    let (status, body) = server.submit(RegistrationForm::valid("Siti Aminah")).await?;
    assert_eq!(status, 200);
    body.assert_registered(12, "Siti Aminah");

    Ok(())
}

/// Notifications reach every operator chat after the response was sent.
#[tokio::test]
async fn test_registration_notifies_operators() -> Result<(), anyhow::Error> {
    let server = TestRegistrationServer::spawn(store_with(50, 100)).await?;

    let (status, _) = server.submit(RegistrationForm::valid("Budi Santoso")).await?;
    assert_eq!(status, 200);

    let delivered = server.wait_for_delivered(2, WAIT).await;
    assert_eq!(delivered.len(), 2);
    for chat_id in TEST_CHAT_IDS {
        let message = delivered
            .iter()
            .find(|m| m.chat_id == chat_id)
            .expect("message for every chat");
        assert!(message.text.contains("PENDAFTAR BARU"));
        assert!(message.text.contains("*51 / 100*"));
    }

    Ok(())
}

/// A transient chat failure is retried with backoff until delivered.
#[tokio::test]
async fn test_notification_retried_after_failure() -> Result<(), anyhow::Error> {
    let server = TestRegistrationServer::spawn_with(
        store_with(0, 100),
        MockArtifactSink::accepting(),
        MockChatClient::failing_first(1),
    )
    .await?;

    let (status, body) = server.submit(RegistrationForm::valid("Budi Santoso")).await?;
    assert_eq!(status, 200);
    body.assert_registered(1, "Budi Santoso");

    // First attempt: one chat failed, one delivered. Second attempt: both.
    let delivered = server.wait_for_delivered(3, WAIT).await;
    assert_eq!(delivered.len(), 3);
    assert_eq!(server.chat().call_count(), 4);
    for chat_id in TEST_CHAT_IDS {
        assert!(delivered.iter().any(|m| m.chat_id == chat_id));
    }

    Ok(())
}

/// A chat that never accepts does not affect the submitter's response.
#[tokio::test]
async fn test_failing_chat_does_not_fail_registration() -> Result<(), anyhow::Error> {
    let server = TestRegistrationServer::spawn_with(
        store_with(0, 100),
        MockArtifactSink::accepting(),
        MockChatClient::failing(),
    )
    .await?;

    let (status, body) = server.submit(RegistrationForm::valid("Budi Santoso")).await?;

    assert_eq!(status, 200);
    body.assert_registered(1, "Budi Santoso");

    Ok(())
}

/// Every registration is appended to the event sheet, number first.
#[tokio::test]
async fn test_registration_appends_sheet_row() -> Result<(), anyhow::Error> {
    let server = TestRegistrationServer::spawn(store_with(7, 100)).await?;

    let (status, _) = server.submit(RegistrationForm::valid("Budi Santoso")).await?;
    assert_eq!(status, 200);

    let rows = server.wait_for_rows(1, WAIT).await;
    assert_eq!(rows.len(), 1);
    let (sheet, row) = &rows[0];
    assert_eq!(sheet, "Bersih Pantai - 12 Jan 2026");
    assert_eq!(row[0], "8");
    assert!(row.iter().any(|cell| cell == "Budi Santoso"));

    Ok(())
}

/// Concurrent submissions never exceed the quota and get distinct numbers.
#[tokio::test]
async fn test_concurrent_submissions_respect_quota() -> Result<(), anyhow::Error> {
    let store = store_with(95, 100);
    let server = Arc::new(TestRegistrationServer::spawn(store.clone()).await?);

    let submissions = VOLUNTEERS.iter().map(|name| {
        let server = Arc::clone(&server);
        async move { server.submit(RegistrationForm::valid(name)).await }
    });
    let results = futures::future::join_all(submissions).await;

    let mut numbers = Vec::new();
    let mut rejected = 0;
    for result in results {
        let (status, body) = result?;
        match status {
            200 => numbers.push(body["data"]["registrationNumber"].as_i64().expect("number")),
            400 => {
                body.assert_error("quota exhausted");
                rejected += 1;
            }
            other => panic!("unexpected status {other}: {body}"),
        }
    }

    numbers.sort_unstable();
    assert_eq!(numbers, vec![96, 97, 98, 99, 100]);
    assert_eq!(rejected, 7);

    let snapshot = store.snapshot(TEST_EVENT_ID).expect("event exists");
    assert_eq!(snapshot.current_count, 100);
    assert_eq!(snapshot.reserved_count, 0);
    assert_eq!(snapshot.status, EventStatus::Closed);

    // All uploads converged on a single event folder
    let event_folders: Vec<_> = server
        .sink()
        .folders()
        .into_iter()
        .filter(|f| f.parent_id == "root")
        .collect();
    assert_eq!(event_folders.len(), 1);

    Ok(())
}

/// Submissions over the per-client limit are refused before any slot is taken.
#[tokio::test]
async fn test_submissions_over_limit_are_refused() -> Result<(), anyhow::Error> {
    let store = store_with(0, 100);
    let server = TestRegistrationServer::spawn_rate_limited(store.clone(), 2).await?;

    for name in VOLUNTEERS.iter().take(2) {
        let (status, _) = server.submit(RegistrationForm::valid(name)).await?;
        assert_eq!(status, 200);
    }

    let (status, body) = server.submit(RegistrationForm::valid("Andi Wijaya")).await?;
    assert_eq!(status, 429);
    assert_eq!(body["success"], false);
    assert_eq!(
        body["error"],
        "Terlalu banyak percobaan, silakan coba lagi dalam 15 menit"
    );

    let snapshot = store.snapshot(TEST_EVENT_ID).expect("event exists");
    assert_eq!(snapshot.current_count, 2);
    assert_eq!(snapshot.reserved_count, 0);

    // Reads are not limited
    let (status, _) = server.get_json("/status").await?;
    assert_eq!(status, 200);

    Ok(())
}

/// The status endpoint reports closed when the datastore is unreachable.
#[tokio::test]
async fn test_status_fails_safe() -> Result<(), anyhow::Error> {
    let store = store_with(10, 100);
    store.set_unavailable(true);
    let server = TestRegistrationServer::spawn(store).await?;

    let (status, body) = server.get_json("/status").await?;

    assert_eq!(status, 200);
    body.assert_open(false);

    Ok(())
}

/// Event details combine settings with the live counter.
#[tokio::test]
async fn test_event_details_reports_live_count() -> Result<(), anyhow::Error> {
    let store = store_with(20, 100);
    store.set_setting(TEST_EVENT_ID, "event_location_name", "Pantai Ancol");
    let server = TestRegistrationServer::spawn(store).await?;

    let (status, _) = server.submit(RegistrationForm::valid("Budi Santoso")).await?;
    assert_eq!(status, 200);

    let (status, body) = server.get_json("/event-details").await?;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["title"], "Bersih Pantai");
    assert_eq!(body["data"]["location"], "Pantai Ancol");
    assert_eq!(body["data"]["currentRegistrants"], 21);
    assert_eq!(body["data"]["maxQuota"], 100);

    Ok(())
}

/// The metrics endpoint serves Prometheus text.
#[tokio::test]
async fn test_metrics_endpoint() -> Result<(), anyhow::Error> {
    let server = TestRegistrationServer::spawn(store_with(0, 10)).await?;

    let response = reqwest::get(format!("{}/metrics", server.url())).await?;

    assert_eq!(response.status(), 200);

    Ok(())
}
