//! Submission rate limiting.
//!
//! `POST /register` is limited per client address: `max_submissions` per
//! window, replenished evenly across the window (GCRA via `governor`).
//! Limited requests get `429` with the registration error envelope and a
//! `Retry-After` header.
//!
//! The client address is the TCP peer from `ConnectInfo`. Behind a reverse
//! proxy, `trust_forwarded_for` switches to the first `X-Forwarded-For`
//! entry. Requests without a usable address are not limited.

use crate::config::RateLimitConfig;
use crate::errors::RegistrationError;
use crate::observability::metrics::record_rate_limited;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use governor::clock::DefaultClock;
use governor::middleware::NoOpMiddleware;
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter};
use std::net::{IpAddr, SocketAddr};
use std::num::NonZeroU32;
use std::sync::Arc;
use tracing::{debug, warn};

type ClientLimiter = RateLimiter<IpAddr, DefaultKeyedStateStore<IpAddr>, DefaultClock, NoOpMiddleware>;

/// Tracked clients before idle entries are pruned.
const PRUNE_THRESHOLD: usize = 10_000;

/// Per-client limiter for submissions.
pub struct SubmissionRateLimiter {
    limiter: Option<ClientLimiter>,
    trust_forwarded_for: bool,
}

impl std::fmt::Debug for SubmissionRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubmissionRateLimiter")
            .field("enabled", &self.limiter.is_some())
            .field("trust_forwarded_for", &self.trust_forwarded_for)
            .finish()
    }
}

impl SubmissionRateLimiter {
    /// Build a limiter; `max_submissions == 0` disables it.
    pub fn new(config: &RateLimitConfig) -> Self {
        let limiter = NonZeroU32::new(config.max_submissions).and_then(|burst| {
            let replenish = config.window / burst.get();
            Quota::with_period(replenish).map(|quota| RateLimiter::keyed(quota.allow_burst(burst)))
        });

        Self {
            limiter,
            trust_forwarded_for: config.trust_forwarded_for,
        }
    }

    /// Count one submission from `client`.
    ///
    /// Returns the seconds to wait when the client is over its limit.
    pub fn check(&self, client: IpAddr) -> Result<(), u64> {
        let Some(limiter) = &self.limiter else {
            return Ok(());
        };

        if limiter.len() >= PRUNE_THRESHOLD {
            limiter.retain_recent();
        }

        limiter.check_key(&client).map_err(|not_until| {
            let wait = not_until.wait_time_from(governor::clock::Clock::now(&DefaultClock::default()));
            wait.as_secs().max(1)
        })
    }

    /// Address the request is attributed to.
    fn client_of(&self, headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<IpAddr> {
        if self.trust_forwarded_for {
            let forwarded = headers
                .get("x-forwarded-for")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(',').next())
                .and_then(|first| first.trim().parse::<IpAddr>().ok());
            if forwarded.is_some() {
                return forwarded;
            }
        }
        peer.map(|addr| addr.ip())
    }
}

/// Rate limiting middleware for the submission route.
pub async fn submission_rate_limit(
    State(limiter): State<Arc<SubmissionRateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    let Some(client) = limiter.client_of(request.headers(), peer) else {
        debug!(target: "reg.middleware.rate_limit", "No client address, skipping rate limit");
        return next.run(request).await;
    };

    match limiter.check(client) {
        Ok(()) => next.run(request).await,
        Err(retry_after_secs) => {
            warn!(
                target: "reg.middleware.rate_limit",
                client = %client,
                retry_after_secs,
                "Submission rate limit exceeded"
            );
            record_rate_limited();
            RegistrationError::RateLimited { retry_after_secs }.into_response()
        }
    }
}
