//! Registration Service
//!
//! Entry point for the volunteer event registration service.
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize Prometheus metrics recorder
//! 3. Connect to Postgres, run migrations and seed the event's capacity row
//! 4. Build the artifact sink (Google Workspace with a token manager, or local)
//! 5. Spawn the notification dispatcher
//! 6. Serve HTTP until SIGINT/SIGTERM, then drain the dispatcher

use common::secret::ExposeSecret;
use common::token_manager::{
    spawn_token_manager, GoogleGrant, ServiceAccountKey, TokenManagerConfig,
};
use registration_service::config::{ArtifactSinkKind, Config, GoogleAuth, GoogleConfig};
use registration_service::observability::metrics::init_metrics_recorder;
use registration_service::repositories::{EventStore, PgEventStore};
use registration_service::routes::{self, AppState};
use registration_service::services::{
    ArtifactRelocator, ArtifactSink, ChatClient, GoogleWorkspaceSink, LocalArtifactSink,
    PipelineSettings, RegistrationPipeline, StatusController, TelegramClient,
};
use registration_service::tasks::{spawn_dispatcher, Dispatcher, RetryPolicy};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Default timeout for initial token acquisition.
const TOKEN_ACQUISITION_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    info!("Starting Registration Service");

    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        bind_address = %config.bind_address,
        event_id = %config.event_id,
        artifact_sink = ?config.artifact_sink,
        sheet_sync_enabled = config.sheet_sync_enabled,
        notifications_enabled = config.telegram.is_some(),
        "Configuration loaded successfully"
    );

    // Must happen before any metrics are recorded
    let metrics_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        e
    })?;

    info!("Connecting to database...");
    let db_url_with_timeout = add_query_timeout(&config.database_url, 5);
    let db_pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(5))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(&db_url_with_timeout)
        .await
        .map_err(|e| {
            error!("Failed to connect to database: {}", e);
            e
        })?;

    sqlx::migrate!("../../migrations")
        .run(&db_pool)
        .await
        .map_err(|e| {
            error!("Failed to run migrations: {}", e);
            e
        })?;
    info!("Database connection established");

    let pg_store = PgEventStore::new(db_pool);
    let seeded = pg_store
        .ensure_event(&config.event_id, config.max_quota)
        .await
        .map_err(|e| {
            error!(error = %e, event_id = %config.event_id, "Failed to prepare capacity row");
            e
        })?;
    if seeded {
        info!(event_id = %config.event_id, "Seeded capacity row for event");
    }

    let store: Arc<dyn EventStore> = Arc::new(pg_store);

    let sink = build_sink(&config).await?;

    let chat: Option<Arc<dyn ChatClient>> = match &config.telegram {
        Some(telegram) => Some(Arc::new(TelegramClient::new(telegram)?)),
        None => {
            warn!("TELEGRAM_BOT_TOKEN or TELEGRAM_CHAT_IDS not set, operator notifications disabled");
            None
        }
    };
    let recipients = config
        .telegram
        .as_ref()
        .map(|t| t.chat_ids.clone())
        .unwrap_or_default();

    let shutdown_token = CancellationToken::new();
    let dispatcher = Dispatcher::new(
        chat,
        config.sheet_sync_enabled.then(|| Arc::clone(&sink)),
        recipients,
        RetryPolicy::new(config.notification_max_attempts, config.notification_base_delay),
    );
    let (dispatcher_handle, dispatcher_task) =
        spawn_dispatcher(dispatcher, config.drain_period, shutdown_token.child_token());

    let pipeline = RegistrationPipeline::new(
        Arc::clone(&store),
        ArtifactRelocator::new(sink),
        dispatcher_handle,
        PipelineSettings {
            event_id: config.event_id.clone(),
            max_upload_bytes: config.max_upload_bytes,
            sheet_sync_enabled: config.sheet_sync_enabled,
        },
    );

    let bind_address = config.bind_address.clone();

    let state = Arc::new(AppState {
        status: StatusController::new(Arc::clone(&store)),
        store,
        pipeline,
        config,
    });

    let app = routes::build_routes(state, metrics_handle);

    let addr: SocketAddr = bind_address.parse().map_err(|e| {
        error!("Invalid bind address: {}", e);
        e
    })?;

    info!("Registration Service listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    // Requests are finished; give queued notifications their drain period
    shutdown_token.cancel();
    if let Err(e) = dispatcher_task.await {
        error!(error = %e, "Dispatcher task failed");
    }

    info!("Registration Service shutdown complete");

    Ok(())
}

/// `LOG_FORMAT=json` switches to JSON output.
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "registration_service=debug,tower_http=debug".into());
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

async fn build_sink(config: &Config) -> Result<Arc<dyn ArtifactSink>, Box<dyn std::error::Error>> {
    match (&config.artifact_sink, &config.google) {
        (ArtifactSinkKind::Google, Some(google)) => {
            let sink = build_google_sink(google).await?;
            info!(drive_folder_id = %google.drive_folder_id, "Using Google Workspace artifact sink");
            Ok(Arc::new(sink))
        }
        (ArtifactSinkKind::Google, None) => Err("ARTIFACT_SINK=google without Google settings".into()),
        (ArtifactSinkKind::Local, _) => {
            let sink = LocalArtifactSink::create(&config.local_artifact_dir)
                .await
                .map_err(|e| {
                    error!(error = %e, dir = %config.local_artifact_dir, "Failed to prepare local artifact directory");
                    e
                })?;
            info!(dir = %config.local_artifact_dir, "Using local artifact sink");
            Ok(Arc::new(sink))
        }
    }
}

async fn build_google_sink(
    google: &GoogleConfig,
) -> Result<GoogleWorkspaceSink, Box<dyn std::error::Error>> {
    let grant = match &google.auth {
        GoogleAuth::OAuth {
            client_id,
            client_secret,
            refresh_token,
        } => GoogleGrant::RefreshToken {
            client_id: client_id.clone(),
            client_secret: client_secret.clone(),
            refresh_token: refresh_token.clone(),
        },
        GoogleAuth::ServiceAccount { key_json } => {
            ServiceAccountKey::from_json(key_json.expose_secret())?.into_grant()
        }
    };

    info!(grant = grant.kind(), "Spawning token manager for Google APIs...");
    let token_config = TokenManagerConfig::new(google.token_uri.clone(), grant);

    // The refresh task lives for the whole process
    let (_token_task, token_rx) =
        tokio::time::timeout(TOKEN_ACQUISITION_TIMEOUT, spawn_token_manager(token_config))
            .await
            .map_err(|_| {
                error!(
                    timeout_secs = TOKEN_ACQUISITION_TIMEOUT.as_secs(),
                    "Token acquisition timed out - Google OAuth may be unreachable"
                );
                "Google token acquisition timed out"
            })?
            .map_err(|e| {
                error!(error = %e, "Failed to acquire initial Google access token");
                e
            })?;
    info!("Token manager spawned successfully, initial token acquired");

    Ok(GoogleWorkspaceSink::new(google, token_rx)?)
}

/// Listens for shutdown signals (SIGTERM, SIGINT).
async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, starting graceful shutdown..."),
            Err(e) => error!("Failed to listen for SIGINT: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM, starting graceful shutdown...");
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// Adds statement_timeout to the database URL.
/// This ensures queries don't hang indefinitely.
fn add_query_timeout(url: &str, timeout_secs: u32) -> String {
    let separator = if url.contains('?') { '&' } else { '?' };
    format!(
        "{}{}options=-c%20statement_timeout%3D{}s",
        url, separator, timeout_secs
    )
}
