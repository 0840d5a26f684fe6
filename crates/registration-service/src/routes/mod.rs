//! HTTP routes for the Registration Service.
//!
//! Defines the Axum router and application state.

use crate::config::Config;
use crate::handlers;
use crate::middleware::{http_metrics_middleware, submission_rate_limit, SubmissionRateLimiter};
use crate::repositories::EventStore;
use crate::services::{RegistrationPipeline, StatusController};
use axum::{
    extract::DefaultBodyLimit,
    http::Method,
    middleware,
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

/// Multipart framing and text fields on top of the three files.
const FORM_OVERHEAD_BYTES: usize = 64 * 1024;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Service configuration.
    pub config: Config,

    pub store: Arc<dyn EventStore>,

    pub pipeline: RegistrationPipeline,

    pub status: StatusController,
}

/// Build the application routes.
///
/// - `POST /register` - Submission pipeline (multipart), rate limited per client
/// - `GET /status` - Fail-safe open/closed state
/// - `GET /event-details` - Display settings and live counter
/// - `GET /health` - Datastore ping
/// - `GET /metrics` - Prometheus scrape
///
/// The public routes answer cross-origin requests from any origin; the
/// metrics route does not.
pub fn build_routes(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let body_limit = state
        .config
        .max_upload_bytes
        .saturating_mul(3)
        .saturating_add(FORM_OVERHEAD_BYTES);
    let request_timeout = state.config.request_timeout;
    let rate_limiter = Arc::new(SubmissionRateLimiter::new(&state.config.rate_limit));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    let public_routes = Router::new()
        .route(
            "/register",
            post(handlers::register)
                .layer(middleware::from_fn_with_state(rate_limiter, submission_rate_limit)),
        )
        .route("/status", get(handlers::get_status))
        .route("/event-details", get(handlers::get_event_details))
        .route("/health", get(handlers::health_check))
        .layer(cors)
        .with_state(state);

    let metrics_routes = Router::new()
        .route("/metrics", get(handlers::metrics_handler))
        .with_state(metrics_handle);

    // Layer order (bottom-to-top execution):
    // 1. http_metrics_middleware - Records every response (outermost)
    // 2. TimeoutLayer - Request timeout
    // 3. TraceLayer - Request logging
    // 4. DefaultBodyLimit - Upload ceiling
    // 5. CorsLayer - Public routes only (innermost)
    public_routes
        .merge(metrics_routes)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(request_timeout))
        .layer(middleware::from_fn(http_metrics_middleware))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::repositories::InMemoryEventStore;
    use crate::services::artifact_sink::mock::MockArtifactSink;
    use crate::services::{ArtifactRelocator, PipelineSettings};
    use crate::tasks::DispatcherHandle;
    use axum::body::Body;
    use axum::extract::ConnectInfo;
    use axum::http::{header, Request, StatusCode};
    use http_body_util::BodyExt;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use std::collections::HashMap;
    use std::net::SocketAddr;
    use tower::ServiceExt;

    #[test]
    fn test_app_state_is_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<AppState>();
    }

    #[test]
    fn test_config_is_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<Config>();
    }

    fn test_router(store: Arc<InMemoryEventStore>) -> Router {
        let vars = HashMap::from([
            ("DATABASE_URL".to_string(), "postgres://localhost/test".to_string()),
            ("EVENT_ID".to_string(), "ev".to_string()),
        ]);
        router_with(store, vars)
    }

    fn router_with(store: Arc<InMemoryEventStore>, vars: HashMap<String, String>) -> Router {
        let config = Config::from_vars(&vars).unwrap();
        let (dispatcher, _jobs) = DispatcherHandle::channel(8);
        let pipeline = RegistrationPipeline::new(
            store.clone(),
            ArtifactRelocator::new(Arc::new(MockArtifactSink::accepting())),
            dispatcher,
            PipelineSettings {
                event_id: config.event_id.clone(),
                max_upload_bytes: config.max_upload_bytes,
                sheet_sync_enabled: false,
            },
        );
        let state = Arc::new(AppState {
            config,
            store: store.clone(),
            pipeline,
            status: StatusController::new(store),
        });
        let handle = PrometheusBuilder::new().build_recorder().handle();
        build_routes(state, handle)
    }

    async fn get_json(router: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&body).unwrap())
    }

    /// Empty submission from `peer`; rejected by validation unless rate limited.
    fn submission_from(peer: [u8; 4]) -> Request<Body> {
        let mut request = Request::builder()
            .method("POST")
            .uri("/register")
            .header(header::CONTENT_TYPE, "multipart/form-data; boundary=X")
            .body(Body::from("--X--\r\n"))
            .unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from((peer, 40000))));
        request
    }

    #[tokio::test]
    async fn test_register_limited_after_five_submissions() {
        let store = Arc::new(InMemoryEventStore::with_event("ev", 0, 100));
        let router = test_router(store.clone());

        for _ in 0..5 {
            let response = router
                .clone()
                .oneshot(submission_from([203, 0, 113, 7]))
                .await
                .unwrap();
            assert_ne!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        }

        let response = router
            .clone()
            .oneshot(submission_from([203, 0, 113, 7]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(response.headers().contains_key(header::RETRY_AFTER));
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["success"], false);
        assert_eq!(
            body["error"],
            "Terlalu banyak percobaan, silakan coba lagi dalam 15 menit"
        );

        // Another client is unaffected, and no slot was touched
        let other = router.oneshot(submission_from([198, 51, 100, 2])).await.unwrap();
        assert_ne!(other.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(store.snapshot("ev").unwrap().reserved_count, 0);
    }

    #[tokio::test]
    async fn test_register_limit_can_be_disabled() {
        let store = Arc::new(InMemoryEventStore::with_event("ev", 0, 100));
        let vars = HashMap::from([
            ("DATABASE_URL".to_string(), "postgres://localhost/test".to_string()),
            ("EVENT_ID".to_string(), "ev".to_string()),
            ("RATE_LIMIT_MAX_SUBMISSIONS".to_string(), "0".to_string()),
        ]);
        let router = router_with(store, vars);

        for _ in 0..8 {
            let response = router
                .clone()
                .oneshot(submission_from([203, 0, 113, 7]))
                .await
                .unwrap();
            assert_ne!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        }
    }

    #[tokio::test]
    async fn test_cors_allows_any_origin() {
        let store = Arc::new(InMemoryEventStore::with_event("ev", 10, 100));
        let response = test_router(store)
            .oneshot(
                Request::builder()
                    .uri("/event-details")
                    .header(header::ORIGIN, "https://relawanns.example")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "*"
        );
    }

    #[tokio::test]
    async fn test_cors_preflight_for_register() {
        let store = Arc::new(InMemoryEventStore::with_event("ev", 10, 100));
        let response = test_router(store)
            .oneshot(
                Request::builder()
                    .method("OPTIONS")
                    .uri("/register")
                    .header(header::ORIGIN, "https://relawanns.example")
                    .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "*"
        );
        let methods = response.headers()[header::ACCESS_CONTROL_ALLOW_METHODS]
            .to_str()
            .unwrap();
        assert!(methods.contains("POST"));
    }

    #[tokio::test]
    async fn test_status_route() {
        let store = Arc::new(InMemoryEventStore::with_event("ev", 10, 100));

        let (status, body) = get_json(test_router(store), "/status").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["isOpen"], true);
    }

    #[tokio::test]
    async fn test_status_route_fails_safe() {
        let store = Arc::new(InMemoryEventStore::with_event("ev", 10, 100));
        store.set_unavailable(true);

        let (status, body) = get_json(test_router(store), "/status").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["isOpen"], false);
    }

    #[tokio::test]
    async fn test_event_details_route() {
        let store = Arc::new(InMemoryEventStore::with_event("ev", 42, 100));
        store.set_setting("ev", "event_title", "Bersih Pantai");
        store.set_setting("ev", "requirements", r#"["Usia 17+","Sehat jasmani"]"#);

        let (status, body) = get_json(test_router(store), "/event-details").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["title"], "Bersih Pantai");
        assert_eq!(body["data"]["location"], "Belum diset");
        assert_eq!(body["data"]["currentRegistrants"], 42);
        assert_eq!(body["data"]["maxQuota"], 100);
        assert_eq!(body["data"]["requirements"][1], "Sehat jasmani");
    }

    #[tokio::test]
    async fn test_event_details_storage_error() {
        let store = Arc::new(InMemoryEventStore::with_event("ev", 42, 100));
        store.set_unavailable(true);

        let (status, body) = get_json(test_router(store), "/event-details").await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "Failed to fetch event details");
    }

    #[tokio::test]
    async fn test_health_route_reports_unhealthy_datastore() {
        let store = Arc::new(InMemoryEventStore::with_event("ev", 0, 100));
        store.set_unavailable(true);

        let (status, body) = get_json(test_router(store), "/health").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "unhealthy");
        assert_eq!(body["database"], "unhealthy");
    }
}
