//! HTTP middleware for the Registration Service.
//!
//! # Components
//!
//! - `http_metrics` - Request count and latency for every response
//! - `rate_limit` - Per-client limit on submissions

pub mod http_metrics;
pub mod rate_limit;

pub use http_metrics::http_metrics_middleware;
pub use rate_limit::{submission_rate_limit, SubmissionRateLimiter};
