//! Test server harness for E2E testing
//!
//! Provides `TestRegistrationServer` for spawning the real router with the
//! real pipeline and dispatcher, backed by a caller-supplied `EventStore`
//! and mock artifact sink and chat client.

use crate::form_fixtures::{RegistrationForm, TEST_EVENT_ID};
use registration_service::config::Config;
use registration_service::observability::metrics::init_metrics_recorder;
use registration_service::repositories::EventStore;
use registration_service::routes::{self, AppState};
use registration_service::services::artifact_sink::mock::MockArtifactSink;
use registration_service::services::chat_client::mock::{MockChatClient, SentMessage};
use registration_service::services::{
    ArtifactRelocator, PipelineSettings, RegistrationPipeline, StatusController,
};
use registration_service::tasks::{spawn_dispatcher, Dispatcher, RetryPolicy};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Operator chats the dispatcher fans out to.
pub const TEST_CHAT_IDS: [&str; 2] = ["-1001", "-1002"];

/// Backoff base used by the harness so retry tests finish quickly.
pub const TEST_RETRY_BASE_DELAY: Duration = Duration::from_millis(20);

/// Test harness for spawning the Registration Service in E2E tests
///
/// # Example
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_register_e2e() -> Result<()> {
///     let store = Arc::new(InMemoryEventStore::with_event(TEST_EVENT_ID, 50, 100));
///     let server = TestRegistrationServer::spawn(store).await?;
///
///     let (status, body) = server.submit(RegistrationForm::valid("Budi Santoso")).await?;
///
///     assert_eq!(status, 200);
///     Ok(())
/// }
/// ```
pub struct TestRegistrationServer {
    addr: SocketAddr,
    config: Config,
    sink: Arc<MockArtifactSink>,
    chat: Arc<MockChatClient>,
    client: reqwest::Client,
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

impl TestRegistrationServer {
    /// Spawn with an accepting sink and chat client.
    pub async fn spawn(store: Arc<dyn EventStore>) -> Result<Self, anyhow::Error> {
        Self::spawn_with(
            store,
            MockArtifactSink::accepting(),
            MockChatClient::accepting(),
        )
        .await
    }

    /// Spawn a new test server instance
    ///
    /// The server will:
    /// - Serve `TEST_EVENT_ID` with sheet sync enabled
    /// - Deliver notifications to `TEST_CHAT_IDS` with 3 attempts
    /// - Bind to a random available port (127.0.0.1:0)
    pub async fn spawn_with(
        store: Arc<dyn EventStore>,
        sink: MockArtifactSink,
        chat: MockChatClient,
    ) -> Result<Self, anyhow::Error> {
        Self::spawn_configured(store, sink, chat, &[]).await
    }

    /// Spawn with the submission rate limit enabled at `max_submissions`.
    ///
    /// Every other harness disables the limit, since all test requests
    /// come from 127.0.0.1.
    pub async fn spawn_rate_limited(
        store: Arc<dyn EventStore>,
        max_submissions: u32,
    ) -> Result<Self, anyhow::Error> {
        let limit = max_submissions.to_string();
        Self::spawn_configured(
            store,
            MockArtifactSink::accepting(),
            MockChatClient::accepting(),
            &[("RATE_LIMIT_MAX_SUBMISSIONS", limit.as_str())],
        )
        .await
    }

    async fn spawn_configured(
        store: Arc<dyn EventStore>,
        sink: MockArtifactSink,
        chat: MockChatClient,
        overrides: &[(&str, &str)],
    ) -> Result<Self, anyhow::Error> {
        let mut vars = HashMap::from([
            // Not used, the store is supplied by the caller
            (
                "DATABASE_URL".to_string(),
                "postgres://unused@localhost/test".to_string(),
            ),
            ("BIND_ADDRESS".to_string(), "127.0.0.1:0".to_string()),
            ("EVENT_ID".to_string(), TEST_EVENT_ID.to_string()),
            ("SHEET_SYNC_ENABLED".to_string(), "true".to_string()),
            (
                "NOTIFICATION_BASE_DELAY_MS".to_string(),
                TEST_RETRY_BASE_DELAY.as_millis().to_string(),
            ),
            ("RATE_LIMIT_MAX_SUBMISSIONS".to_string(), "0".to_string()),
        ]);
        for (key, value) in overrides {
            vars.insert((*key).to_string(), (*value).to_string());
        }
        let config = Config::from_vars(&vars)
            .map_err(|e| anyhow::anyhow!("Failed to build test config: {}", e))?;

        let sink = Arc::new(sink);
        let chat = Arc::new(chat);
        let shutdown = CancellationToken::new();

        let dispatcher = Dispatcher::new(
            Some(chat.clone()),
            Some(sink.clone()),
            TEST_CHAT_IDS.iter().map(ToString::to_string).collect(),
            RetryPolicy::new(config.notification_max_attempts, config.notification_base_delay),
        );
        let (dispatcher_handle, _dispatcher_task) =
            spawn_dispatcher(dispatcher, config.drain_period, shutdown.child_token());

        let pipeline = RegistrationPipeline::new(
            store.clone(),
            ArtifactRelocator::new(sink.clone()),
            dispatcher_handle,
            PipelineSettings {
                event_id: config.event_id.clone(),
                max_upload_bytes: config.max_upload_bytes,
                sheet_sync_enabled: config.sheet_sync_enabled,
            },
        );

        let state = Arc::new(AppState {
            config: config.clone(),
            status: StatusController::new(store.clone()),
            store,
            pipeline,
        });

        // May fail if already installed in the test process; fall back to a
        // standalone recorder that is not installed globally.
        let metrics_handle = match init_metrics_recorder() {
            Ok(handle) => handle,
            Err(_) => {
                use metrics_exporter_prometheus::PrometheusBuilder;
                PrometheusBuilder::new().build_recorder().handle()
            }
        };

        let app = routes::build_routes(state, metrics_handle);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;

        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        let server_shutdown = shutdown.clone();
        let handle = tokio::spawn(async move {
            let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
            if let Err(e) = axum::serve(listener, make_service)
                .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
                .await
            {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            config,
            sink,
            chat,
            client: reqwest::Client::new(),
            shutdown,
            handle,
        })
    }

    /// Get the base URL of the test server
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Get the socket address
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Get reference to the server configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn sink(&self) -> &MockArtifactSink {
        &self.sink
    }

    pub fn chat(&self) -> &MockChatClient {
        &self.chat
    }

    /// POST the form to `/register`; returns status and decoded body.
    pub async fn submit(
        &self,
        form: RegistrationForm,
    ) -> Result<(u16, serde_json::Value), anyhow::Error> {
        let response = self
            .client
            .post(format!("{}/register", self.url()))
            .multipart(form.into_multipart()?)
            .send()
            .await?;
        let status = response.status().as_u16();
        Ok((status, response.json().await?))
    }

    /// GET a JSON endpoint; returns status and decoded body.
    pub async fn get_json(&self, path: &str) -> Result<(u16, serde_json::Value), anyhow::Error> {
        let response = self
            .client
            .get(format!("{}{}", self.url(), path))
            .send()
            .await?;
        let status = response.status().as_u16();
        Ok((status, response.json().await?))
    }

    /// Wait until at least `count` messages were delivered, or `timeout` elapses.
    pub async fn wait_for_delivered(&self, count: usize, timeout: Duration) -> Vec<SentMessage> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let delivered = self.chat.delivered();
            if delivered.len() >= count || tokio::time::Instant::now() >= deadline {
                return delivered;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Wait until at least `count` sheet rows were appended, or `timeout` elapses.
    pub async fn wait_for_rows(
        &self,
        count: usize,
        timeout: Duration,
    ) -> Vec<(String, Vec<String>)> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let rows = self.sink.rows();
            if rows.len() >= count || tokio::time::Instant::now() >= deadline {
                return rows;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl Drop for TestRegistrationServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
        self.handle.abort();
    }
}
