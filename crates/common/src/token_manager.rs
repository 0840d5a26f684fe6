//! Google OAuth 2.0 access-token manager.
//!
//! Acquires and refreshes the short-lived access token used by the
//! Drive and Sheets integrations. Two grants are supported:
//!
//! - **Delegated credential**: a long-lived refresh token issued once through
//!   the administrator consent flow (`grant_type=refresh_token`).
//! - **Service account**: a self-signed RS256 assertion exchanged at the
//!   token endpoint (`grant_type=urn:ietf:params:oauth:grant-type:jwt-bearer`).
//!
//! # Features
//!
//! - Automatic token refresh before expiration (configurable threshold)
//! - Exponential backoff on refresh failures (1s, 2s, 4s, ..., max 30s)
//! - Thread-safe access via `tokio::sync::watch`
//! - Background refresh task (no contention on reads)
//! - Infinite retry on failures (caller controls startup timeout)
//!
//! # Example
//!
//! ```rust,ignore
//! use common::token_manager::{spawn_token_manager, GoogleGrant, TokenManagerConfig};
//! use common::secret::SecretString;
//!
//! let grant = GoogleGrant::RefreshToken {
//!     client_id: "client-id.apps.googleusercontent.com".to_string(),
//!     client_secret: SecretString::from("secret"),
//!     refresh_token: SecretString::from("1//refresh"),
//! };
//! let config = TokenManagerConfig::new(DEFAULT_TOKEN_URI.to_string(), grant);
//!
//! // Spawn manager - blocks until first token acquired
//! let (task_handle, token_rx) = spawn_token_manager(config).await?;
//! let header = format!("Bearer {}", token_rx.token().expose_secret());
//! ```
//!
//! # Security
//!
//! - Client secrets, refresh tokens and private keys are `SecretString` (never logged)
//! - Access tokens are stored as `SecretString` internally
//! - Token acquisition/refresh events are logged (without values)

use crate::secret::{ExposeSecret, SecretString};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, trace, warn};

// =============================================================================
// Constants
// =============================================================================

/// Google's OAuth 2.0 token endpoint.
pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Scopes requested for the Drive and Sheets integrations.
pub const GOOGLE_WORKSPACE_SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/spreadsheets",
    "https://www.googleapis.com/auth/drive.file",
];

/// Default refresh threshold (5 minutes before expiration).
pub const DEFAULT_REFRESH_THRESHOLD: Duration = Duration::from_secs(300);

/// Default HTTP request timeout.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Lifetime requested for service-account assertions (Google's maximum).
const ASSERTION_LIFETIME_SECS: i64 = 3600;

/// Grant type for service-account assertions.
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Initial backoff delay for retry.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// Maximum backoff delay.
const MAX_BACKOFF_MS: u64 = 30_000;

/// Default connection timeout for HTTP client.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Clock drift safety margin (30 seconds).
///
/// Tokens are refreshed this much earlier than the threshold requires to
/// absorb clock differences with the token endpoint.
const CLOCK_DRIFT_MARGIN_SECS: i64 = 30;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during token management.
#[derive(Error, Debug, Clone)]
pub enum TokenError {
    /// Token acquisition failed.
    #[error("Token acquisition failed: {0}")]
    AcquisitionFailed(String),

    /// HTTP client error.
    #[error("HTTP client error: {0}")]
    HttpError(String),

    /// Credential rejected by the token endpoint (401, 400).
    #[error("Authentication rejected: {0}")]
    AuthenticationRejected(String),

    /// Token response parsing failed.
    #[error("Invalid token response: {0}")]
    InvalidResponse(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Watch channel closed unexpectedly.
    #[error("Token channel closed")]
    ChannelClosed,
}

// =============================================================================
// Configuration
// =============================================================================

/// Credential used to obtain access tokens.
#[derive(Clone)]
pub enum GoogleGrant {
    /// Delegated credential from the one-time consent flow.
    RefreshToken {
        /// OAuth client ID.
        client_id: String,
        /// OAuth client secret.
        client_secret: SecretString,
        /// Long-lived refresh token.
        refresh_token: SecretString,
    },

    /// Service-account key.
    ServiceAccount {
        /// Service account e-mail (`iss` claim).
        client_email: String,
        /// PEM-encoded RSA private key.
        private_key: SecretString,
        /// Space-joined into the `scope` claim.
        scopes: Vec<String>,
    },
}

impl GoogleGrant {
    /// Short label used in logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            GoogleGrant::RefreshToken { .. } => "refresh_token",
            GoogleGrant::ServiceAccount { .. } => "service_account",
        }
    }

    fn subject(&self) -> &str {
        match self {
            GoogleGrant::RefreshToken { client_id, .. } => client_id,
            GoogleGrant::ServiceAccount { client_email, .. } => client_email,
        }
    }
}

impl std::fmt::Debug for GoogleGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GoogleGrant::RefreshToken { client_id, .. } => f
                .debug_struct("RefreshToken")
                .field("client_id", client_id)
                .field("client_secret", &"[REDACTED]")
                .field("refresh_token", &"[REDACTED]")
                .finish(),
            GoogleGrant::ServiceAccount {
                client_email,
                scopes,
                ..
            } => f
                .debug_struct("ServiceAccount")
                .field("client_email", client_email)
                .field("private_key", &"[REDACTED]")
                .field("scopes", scopes)
                .finish(),
        }
    }
}

/// Subset of a downloaded service-account key file.
#[derive(Deserialize)]
pub struct ServiceAccountKey {
    /// Service account e-mail.
    pub client_email: String,
    /// PEM-encoded RSA private key.
    pub private_key: SecretString,
    /// Token endpoint declared by the key file.
    #[serde(default)]
    pub token_uri: Option<String>,
}

impl ServiceAccountKey {
    /// Parse a service-account key file.
    ///
    /// # Errors
    ///
    /// Returns `TokenError::Configuration` if the JSON is malformed or
    /// lacks `client_email`/`private_key`.
    pub fn from_json(json: &str) -> Result<Self, TokenError> {
        serde_json::from_str(json)
            .map_err(|e| TokenError::Configuration(format!("Invalid service account key: {e}")))
    }

    /// Convert into a grant for the Drive/Sheets scopes.
    #[must_use]
    pub fn into_grant(self) -> GoogleGrant {
        GoogleGrant::ServiceAccount {
            client_email: self.client_email,
            private_key: self.private_key,
            scopes: GOOGLE_WORKSPACE_SCOPES
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
        }
    }
}

impl std::fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("client_email", &self.client_email)
            .field("private_key", &"[REDACTED]")
            .field("token_uri", &self.token_uri)
            .finish()
    }
}

/// Configuration for the token manager.
#[derive(Clone, Debug)]
pub struct TokenManagerConfig {
    /// Token endpoint URL.
    pub token_uri: String,

    /// Credential exchanged for access tokens.
    pub grant: GoogleGrant,

    /// Refresh token this many seconds before expiration.
    pub refresh_threshold: Duration,

    /// HTTP request timeout.
    pub http_timeout: Duration,
}

impl TokenManagerConfig {
    /// Create a new configuration with default timeouts.
    #[must_use]
    pub fn new(token_uri: String, grant: GoogleGrant) -> Self {
        Self {
            token_uri,
            grant,
            refresh_threshold: DEFAULT_REFRESH_THRESHOLD,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
        }
    }

    /// Set the refresh threshold.
    #[must_use]
    pub fn with_refresh_threshold(mut self, threshold: Duration) -> Self {
        self.refresh_threshold = threshold;
        self
    }

    /// Set the HTTP timeout.
    #[must_use]
    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }
}

// =============================================================================
// Token Receiver
// =============================================================================

/// Wrapper around watch receiver that provides safe token access.
///
/// Callers never hold the borrow lock longer than a clone, so the refresh
/// task is never blocked from publishing a new token.
#[derive(Clone)]
pub struct TokenReceiver(watch::Receiver<SecretString>);

impl TokenReceiver {
    /// Create a `TokenReceiver` from a watch receiver.
    ///
    /// Used by tests and by sinks that are handed a fixed token.
    #[must_use]
    pub fn from_watch_receiver(receiver: watch::Receiver<SecretString>) -> Self {
        Self(receiver)
    }

    /// Get the current token.
    #[must_use]
    pub fn token(&self) -> SecretString {
        self.0.borrow().clone()
    }

    /// Wait for the token to change.
    ///
    /// # Errors
    ///
    /// Returns `TokenError::ChannelClosed` if the sender is dropped.
    pub async fn changed(&mut self) -> Result<(), TokenError> {
        self.0
            .changed()
            .await
            .map_err(|_| TokenError::ChannelClosed)
    }
}

impl std::fmt::Debug for TokenReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenReceiver")
            .field("token", &"[REDACTED]")
            .finish()
    }
}

// =============================================================================
// OAuth Wire Types
// =============================================================================

/// OAuth 2.0 token response.
#[derive(Deserialize)]
struct OAuthTokenResponse {
    access_token: String,
    #[allow(dead_code)]
    #[serde(default)]
    token_type: Option<String>,
    expires_in: u64,
    #[allow(dead_code)]
    #[serde(default)]
    scope: Option<String>,
}

impl std::fmt::Debug for OAuthTokenResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthTokenResponse")
            .field("access_token", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("scope", &self.scope)
            .finish()
    }
}

/// Claims of a service-account assertion.
#[derive(Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: String,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

/// Build the signed assertion for a service-account grant.
///
/// # Errors
///
/// Returns `TokenError::Configuration` if the private key is not a valid
/// RSA PEM or signing fails.
pub fn build_service_account_assertion(
    client_email: &str,
    private_key: &SecretString,
    scopes: &[String],
    token_uri: &str,
    issued_at: i64,
) -> Result<String, TokenError> {
    let key = EncodingKey::from_rsa_pem(private_key.expose_secret().as_bytes())
        .map_err(|e| TokenError::Configuration(format!("Invalid service account key: {e}")))?;

    let claims = AssertionClaims {
        iss: client_email,
        scope: scopes.join(" "),
        aud: token_uri,
        iat: issued_at,
        exp: issued_at + ASSERTION_LIFETIME_SECS,
    };

    encode(&Header::new(Algorithm::RS256), &claims, &key)
        .map_err(|e| TokenError::Configuration(format!("Failed to sign assertion: {e}")))
}

// =============================================================================
// Token Manager Function
// =============================================================================

/// Spawn the token manager background task.
///
/// This function:
/// 1. Creates a watch channel with an empty string sentinel
/// 2. Spawns a background task that acquires the initial token (infinite retry)
/// 3. Waits for the first real token before returning
/// 4. Returns `(JoinHandle, TokenReceiver)` where receiver always has a valid token
///
/// # Errors
///
/// - `TokenError::Configuration` - If the HTTP client cannot be built
/// - `TokenError::ChannelClosed` - If the channel closes before first token
#[instrument(skip_all, fields(grant = config.grant.kind()))]
pub async fn spawn_token_manager(
    config: TokenManagerConfig,
) -> Result<(JoinHandle<()>, TokenReceiver), TokenError> {
    let http_client = reqwest::Client::builder()
        .timeout(config.http_timeout)
        .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
        .build()
        .map_err(|e| TokenError::Configuration(format!("Failed to build HTTP client: {e}")))?;

    let (sender, mut receiver) = watch::channel(SecretString::from(""));

    let task_handle = tokio::spawn(async move {
        token_refresh_loop(config, http_client, sender).await;
    });

    receiver
        .changed()
        .await
        .map_err(|_| TokenError::ChannelClosed)?;

    if receiver.borrow().expose_secret().is_empty() {
        return Err(TokenError::AcquisitionFailed(
            "Token is empty after acquisition".into(),
        ));
    }

    Ok((task_handle, TokenReceiver(receiver)))
}

/// Background token refresh loop.
///
/// Runs until every receiver is dropped.
#[instrument(skip_all)]
async fn token_refresh_loop(
    config: TokenManagerConfig,
    http_client: reqwest::Client,
    sender: watch::Sender<SecretString>,
) {
    let mut backoff = INITIAL_BACKOFF_MS;
    let mut expires_at: Option<i64> = None;
    let mut initial_acquisition = true;
    let subject = config.grant.subject().to_string();

    loop {
        let needs_refresh = match expires_at {
            Some(exp) => {
                let now = chrono::Utc::now().timestamp();
                #[allow(clippy::cast_possible_wrap)]
                let threshold_secs = config.refresh_threshold.as_secs() as i64;
                exp - now <= threshold_secs + CLOCK_DRIFT_MARGIN_SECS
            }
            None => true,
        };

        if needs_refresh {
            match acquire_token(&config, &http_client).await {
                Ok((token, new_expires_at)) => {
                    expires_at = Some(new_expires_at);

                    if sender.send(token).is_err() {
                        debug!(
                            target: "common.token_manager",
                            subject = %subject,
                            "All receivers dropped, stopping refresh loop"
                        );
                        break;
                    }

                    if initial_acquisition {
                        info!(
                            target: "common.token_manager",
                            subject = %subject,
                            grant = config.grant.kind(),
                            "Initial access token acquired"
                        );
                        initial_acquisition = false;
                    } else {
                        debug!(
                            target: "common.token_manager",
                            subject = %subject,
                            "Access token refreshed"
                        );
                    }

                    backoff = INITIAL_BACKOFF_MS;
                }
                Err(e) => {
                    warn!(
                        target: "common.token_manager",
                        subject = %subject,
                        error = %e,
                        backoff_ms = backoff,
                        "Token acquisition failed, will retry"
                    );

                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF_MS);
                    continue;
                }
            }
        }

        let sleep_duration = match expires_at {
            Some(exp) => {
                let now = chrono::Utc::now().timestamp();
                #[allow(clippy::cast_possible_wrap)]
                let threshold_secs = config.refresh_threshold.as_secs() as i64;
                let refresh_at = exp - threshold_secs - CLOCK_DRIFT_MARGIN_SECS;
                let sleep_secs = (refresh_at - now).max(1);
                #[allow(clippy::cast_sign_loss)]
                Duration::from_secs(sleep_secs as u64)
            }
            None => Duration::from_secs(1),
        };

        tokio::time::sleep(sleep_duration).await;
    }
}

/// Exchange the configured grant for a new access token.
///
/// Returns the token and its expiration time (Unix timestamp).
#[instrument(skip_all)]
async fn acquire_token(
    config: &TokenManagerConfig,
    http_client: &reqwest::Client,
) -> Result<(SecretString, i64), TokenError> {
    debug!(
        target: "common.token_manager",
        grant = config.grant.kind(),
        url = %config.token_uri,
        "Requesting access token"
    );

    let request = match &config.grant {
        GoogleGrant::RefreshToken {
            client_id,
            client_secret,
            refresh_token,
        } => http_client.post(&config.token_uri).form(&[
            ("grant_type", "refresh_token"),
            ("client_id", client_id.as_str()),
            ("client_secret", client_secret.expose_secret()),
            ("refresh_token", refresh_token.expose_secret()),
        ]),
        GoogleGrant::ServiceAccount {
            client_email,
            private_key,
            scopes,
        } => {
            let assertion = build_service_account_assertion(
                client_email,
                private_key,
                scopes,
                &config.token_uri,
                chrono::Utc::now().timestamp(),
            )?;
            http_client
                .post(&config.token_uri)
                .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", &assertion)])
        }
    };

    let response = request.send().await.map_err(|e| {
        debug!(target: "common.token_manager", error = %e, "HTTP request failed");
        TokenError::HttpError(e.to_string())
    })?;

    let status = response.status();

    if status.is_success() {
        let token_response: OAuthTokenResponse = response.json().await.map_err(|e| {
            warn!(target: "common.token_manager", error = %e, "Failed to parse token response");
            TokenError::InvalidResponse(e.to_string())
        })?;

        let now = chrono::Utc::now().timestamp();
        #[allow(clippy::cast_possible_wrap)]
        let expires_at = now + token_response.expires_in as i64;

        debug!(
            target: "common.token_manager",
            expires_in_secs = token_response.expires_in,
            "Access token acquired"
        );

        Ok((SecretString::from(token_response.access_token), expires_at))
    } else if status.as_u16() == 401 || status.as_u16() == 400 {
        // Body may echo credential details; trace level only
        let body = response.text().await.unwrap_or_else(|e| {
            trace!(target: "common.token_manager", error = %e, "Failed to read error response body");
            "<failed to read body>".to_string()
        });
        warn!(
            target: "common.token_manager",
            status = %status,
            "Credential rejected by token endpoint"
        );
        trace!(
            target: "common.token_manager",
            body = %body,
            "Credential rejection response body"
        );
        Err(TokenError::AuthenticationRejected(format!(
            "Status {status}"
        )))
    } else if status.is_server_error() {
        warn!(
            target: "common.token_manager",
            status = %status,
            "Token endpoint returned server error"
        );
        Err(TokenError::HttpError(format!(
            "Token endpoint server error: {status}"
        )))
    } else {
        warn!(
            target: "common.token_manager",
            status = %status,
            "Unexpected response from token endpoint"
        );
        Err(TokenError::HttpError(format!(
            "Unexpected status: {status}"
        )))
    }
}

// =============================================================================
// Tests
// =============================================================================
