//! HTTP metrics middleware.
//!
//! Applied as the outermost layer so responses produced before a handler
//! runs (404, 405, 413 from the body limit, 408 from the timeout layer)
//! are counted too.

use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;

use crate::observability::metrics::record_http_request;

/// Record method, normalized path, status and duration of every request.
pub async fn http_metrics_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let path = request.uri().path().to_string();

    let response = next.run(request).await;

    record_http_request(&method, &path, response.status().as_u16(), start.elapsed());

    response
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        extract::DefaultBodyLimit,
        http::{Request as HttpRequest, StatusCode},
        middleware,
        routing::{get, post},
        Router,
    };
    use tower::ServiceExt;

    async fn ok() -> &'static str {
        "OK"
    }

    async fn read_body(body: axum::body::Bytes) -> String {
        body.len().to_string()
    }

    fn test_app() -> Router {
        Router::new()
            .route("/status", get(ok))
            .route("/register", post(read_body))
            .layer(DefaultBodyLimit::max(16))
            .layer(middleware::from_fn(http_metrics_middleware))
    }

    async fn send(request: HttpRequest<Body>) -> StatusCode {
        test_app()
            .oneshot(request)
            .await
            .expect("request should succeed")
            .status()
    }

    #[tokio::test]
    async fn test_passes_through_success() {
        let request = HttpRequest::builder()
            .uri("/status")
            .body(Body::empty())
            .expect("request builder should succeed");

        assert_eq!(send(request).await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_passes_through_unknown_route() {
        let request = HttpRequest::builder()
            .uri("/wp-login.php")
            .body(Body::empty())
            .expect("request builder should succeed");

        assert_eq!(send(request).await, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_passes_through_oversized_body() {
        let request = HttpRequest::builder()
            .method("POST")
            .uri("/register")
            .body(Body::from(vec![0u8; 64]))
            .expect("request builder should succeed");

        assert_eq!(send(request).await, StatusCode::PAYLOAD_TOO_LARGE);
    }
}
