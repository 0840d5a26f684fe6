//! Registration service configuration.
//!
//! Configuration is loaded from environment variables. All sensitive
//! fields are redacted in Debug output.

use common::secret::SecretString;
use common::token_manager::DEFAULT_TOKEN_URI;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Default HTTP bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Default event identifier.
pub const DEFAULT_EVENT_ID: &str = "default";

/// Default directory for the local artifact sink.
pub const DEFAULT_LOCAL_ARTIFACT_DIR: &str = "./artifacts";

/// Default Drive v3 metadata API base.
pub const DEFAULT_DRIVE_API_BASE: &str = "https://www.googleapis.com/drive/v3";

/// Default Drive v3 media upload API base.
pub const DEFAULT_UPLOAD_API_BASE: &str = "https://www.googleapis.com/upload/drive/v3";

/// Default Sheets v4 API base.
pub const DEFAULT_SHEETS_API_BASE: &str = "https://sheets.googleapis.com/v4";

/// Default Telegram Bot API base.
pub const DEFAULT_TELEGRAM_API_BASE: &str = "https://api.telegram.org";

/// Default attempts per notification job (first try included).
pub const DEFAULT_NOTIFICATION_MAX_ATTEMPTS: u32 = 3;

/// Upper bound for `NOTIFICATION_MAX_ATTEMPTS`.
pub const MAX_NOTIFICATION_ATTEMPTS: u32 = 10;

/// Default delay before the first retry, doubled on each further retry.
pub const DEFAULT_NOTIFICATION_BASE_DELAY_MS: u64 = 1000;

/// Default per-file upload ceiling (5 MiB).
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 5 * 1024 * 1024;

/// Smallest accepted upload, also the lower bound for `MAX_UPLOAD_BYTES`.
pub const MIN_UPLOAD_BYTES: usize = 1024;

/// Default request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECONDS: u64 = 30;

/// Default shutdown drain period in seconds.
pub const DEFAULT_DRAIN_SECONDS: u64 = 5;

/// Quota of a capacity row seeded at startup when `max_quota` is not set.
pub const DEFAULT_MAX_QUOTA: i32 = 100;

/// Default submissions allowed per client address and window.
pub const DEFAULT_RATE_LIMIT_MAX_SUBMISSIONS: u32 = 5;

/// Default rate limit window (15 minutes).
pub const DEFAULT_RATE_LIMIT_WINDOW_SECONDS: u64 = 15 * 60;

/// Where relocated artifacts and spreadsheet rows end up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactSinkKind {
    /// Google Drive + Google Sheets.
    Google,
    /// Local directory tree + CSV files.
    Local,
}

/// How the Google integration obtains access tokens.
#[derive(Clone)]
pub enum GoogleAuth {
    /// Delegated credential from the administrator consent flow.
    OAuth {
        client_id: String,
        client_secret: SecretString,
        refresh_token: SecretString,
    },
    /// Service-account key file contents.
    ServiceAccount { key_json: SecretString },
}

impl fmt::Debug for GoogleAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GoogleAuth::OAuth { client_id, .. } => f
                .debug_struct("OAuth")
                .field("client_id", client_id)
                .field("client_secret", &"[REDACTED]")
                .field("refresh_token", &"[REDACTED]")
                .finish(),
            GoogleAuth::ServiceAccount { .. } => f
                .debug_struct("ServiceAccount")
                .field("key_json", &"[REDACTED]")
                .finish(),
        }
    }
}

/// Google Workspace settings, present when `ARTIFACT_SINK=google`.
#[derive(Clone, Debug)]
pub struct GoogleConfig {
    /// Drive folder that holds one subfolder per event.
    pub drive_folder_id: String,
    /// Spreadsheet receiving one sheet per event.
    pub spreadsheet_id: Option<String>,
    pub auth: GoogleAuth,
    pub token_uri: String,
    pub drive_api_base: String,
    pub upload_api_base: String,
    pub sheets_api_base: String,
}

/// Operator chat settings.
#[derive(Clone)]
pub struct TelegramConfig {
    pub bot_token: SecretString,
    /// Recipient chat IDs, already split and trimmed.
    pub chat_ids: Vec<String>,
    pub api_base: String,
}

impl fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("bot_token", &"[REDACTED]")
            .field("chat_ids", &self.chat_ids)
            .field("api_base", &self.api_base)
            .finish()
    }
}

/// Registration service configuration.
///
/// Loaded from environment variables with sensible defaults.
/// Database URL is redacted in Debug output to prevent credential leakage.
#[derive(Clone)]
pub struct Config {
    /// PostgreSQL connection URL.
    pub database_url: String,

    /// Server bind address (default: "0.0.0.0:8080").
    pub bind_address: String,

    /// Event whose capacity row and settings this instance serves.
    pub event_id: String,

    pub artifact_sink: ArtifactSinkKind,

    /// Root directory for `ArtifactSinkKind::Local`.
    pub local_artifact_dir: String,

    /// Google settings, `Some` only for `ArtifactSinkKind::Google`.
    pub google: Option<GoogleConfig>,

    /// Chat settings; `None` disables operator notifications.
    pub telegram: Option<TelegramConfig>,

    /// Attempts per notification job, first try included.
    pub notification_max_attempts: u32,

    /// Delay before the first retry.
    pub notification_base_delay: Duration,

    /// Per-file upload ceiling in bytes.
    pub max_upload_bytes: usize,

    pub request_timeout: Duration,

    /// How long shutdown waits for in-flight background jobs.
    pub drain_period: Duration,

    /// Append each registration to the event sheet.
    pub sheet_sync_enabled: bool,

    /// Quota used when the capacity row has to be created at startup.
    pub max_quota: i32,

    pub rate_limit: RateLimitConfig,
}

/// Per-client limit on `POST /register`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Submissions per window; 0 disables the limit.
    pub max_submissions: u32,
    pub window: Duration,
    /// Key clients by the first `X-Forwarded-For` entry instead of the peer address.
    pub trust_forwarded_for: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_submissions: DEFAULT_RATE_LIMIT_MAX_SUBMISSIONS,
            window: Duration::from_secs(DEFAULT_RATE_LIMIT_WINDOW_SECONDS),
            trust_forwarded_for: false,
        }
    }
}

/// Custom Debug implementation that redacts sensitive fields.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("database_url", &"[REDACTED]")
            .field("bind_address", &self.bind_address)
            .field("event_id", &self.event_id)
            .field("artifact_sink", &self.artifact_sink)
            .field("local_artifact_dir", &self.local_artifact_dir)
            .field("google", &self.google)
            .field("telegram", &self.telegram)
            .field("notification_max_attempts", &self.notification_max_attempts)
            .field("notification_base_delay", &self.notification_base_delay)
            .field("max_upload_bytes", &self.max_upload_bytes)
            .field("request_timeout", &self.request_timeout)
            .field("drain_period", &self.drain_period)
            .field("sheet_sync_enabled", &self.sheet_sync_enabled)
            .field("max_quota", &self.max_quota)
            .field("rate_limit", &self.rate_limit)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid artifact sink configuration: {0}")]
    InvalidArtifactSink(String),

    #[error("Invalid notification policy configuration: {0}")]
    InvalidNotificationPolicy(String),

    #[error("Invalid upload limit configuration: {0}")]
    InvalidUploadLimit(String),

    #[error("Invalid value for {name}: {reason}")]
    InvalidValue { name: String, reason: String },
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let database_url = required(vars, "DATABASE_URL")?;

        let bind_address = optional(vars, "BIND_ADDRESS")
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let event_id = optional(vars, "EVENT_ID").unwrap_or_else(|| DEFAULT_EVENT_ID.to_string());

        let artifact_sink = match optional(vars, "ARTIFACT_SINK").as_deref() {
            None | Some("local") => ArtifactSinkKind::Local,
            Some("google") => ArtifactSinkKind::Google,
            Some(other) => {
                return Err(ConfigError::InvalidArtifactSink(format!(
                    "ARTIFACT_SINK must be 'google' or 'local', got '{other}'"
                )))
            }
        };

        let local_artifact_dir = optional(vars, "LOCAL_ARTIFACT_DIR")
            .unwrap_or_else(|| DEFAULT_LOCAL_ARTIFACT_DIR.to_string());

        let google = match artifact_sink {
            ArtifactSinkKind::Google => Some(google_config(vars)?),
            ArtifactSinkKind::Local => None,
        };

        let telegram = telegram_config(vars);

        let notification_max_attempts =
            parse_or(vars, "NOTIFICATION_MAX_ATTEMPTS", DEFAULT_NOTIFICATION_MAX_ATTEMPTS)?;
        if notification_max_attempts == 0 || notification_max_attempts > MAX_NOTIFICATION_ATTEMPTS
        {
            return Err(ConfigError::InvalidNotificationPolicy(format!(
                "NOTIFICATION_MAX_ATTEMPTS must be between 1 and {MAX_NOTIFICATION_ATTEMPTS}, got {notification_max_attempts}"
            )));
        }

        let base_delay_ms =
            parse_or(vars, "NOTIFICATION_BASE_DELAY_MS", DEFAULT_NOTIFICATION_BASE_DELAY_MS)?;

        let max_upload_bytes = parse_or(vars, "MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES)?;
        if max_upload_bytes < MIN_UPLOAD_BYTES {
            return Err(ConfigError::InvalidUploadLimit(format!(
                "MAX_UPLOAD_BYTES must be at least {MIN_UPLOAD_BYTES}, got {max_upload_bytes}"
            )));
        }

        let request_timeout_secs =
            parse_or(vars, "REQUEST_TIMEOUT_SECONDS", DEFAULT_REQUEST_TIMEOUT_SECONDS)?;
        if request_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                name: "REQUEST_TIMEOUT_SECONDS".to_string(),
                reason: "must be greater than 0".to_string(),
            });
        }

        let drain_secs = parse_or(vars, "DRAIN_SECONDS", DEFAULT_DRAIN_SECONDS)?;

        let sheet_available = match &google {
            Some(g) => g.spreadsheet_id.is_some(),
            None => true,
        };
        let sheet_sync_enabled = parse_or(vars, "SHEET_SYNC_ENABLED", sheet_available)?;
        if sheet_sync_enabled && !sheet_available {
            return Err(ConfigError::MissingEnvVar(
                "GOOGLE_SPREADSHEET_ID".to_string(),
            ));
        }

        let max_quota = parse_or(vars, "MAX_QUOTA", DEFAULT_MAX_QUOTA)?;
        if max_quota < 0 {
            return Err(ConfigError::InvalidValue {
                name: "MAX_QUOTA".to_string(),
                reason: "must not be negative".to_string(),
            });
        }

        let rate_limit_window_secs = parse_or(
            vars,
            "RATE_LIMIT_WINDOW_SECONDS",
            DEFAULT_RATE_LIMIT_WINDOW_SECONDS,
        )?;
        if rate_limit_window_secs == 0 {
            return Err(ConfigError::InvalidValue {
                name: "RATE_LIMIT_WINDOW_SECONDS".to_string(),
                reason: "must be greater than 0".to_string(),
            });
        }
        let rate_limit = RateLimitConfig {
            max_submissions: parse_or(
                vars,
                "RATE_LIMIT_MAX_SUBMISSIONS",
                DEFAULT_RATE_LIMIT_MAX_SUBMISSIONS,
            )?,
            window: Duration::from_secs(rate_limit_window_secs),
            trust_forwarded_for: parse_or(vars, "TRUST_FORWARDED_FOR", false)?,
        };

        Ok(Config {
            database_url,
            bind_address,
            event_id,
            artifact_sink,
            local_artifact_dir,
            google,
            telegram,
            notification_max_attempts,
            notification_base_delay: Duration::from_millis(base_delay_ms),
            max_upload_bytes,
            request_timeout: Duration::from_secs(request_timeout_secs),
            drain_period: Duration::from_secs(drain_secs),
            sheet_sync_enabled,
            max_quota,
            rate_limit,
        })
    }
}

/// Non-empty, trimmed value of `name`.
fn optional(vars: &HashMap<String, String>, name: &str) -> Option<String> {
    vars.get(name)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn required(vars: &HashMap<String, String>, name: &str) -> Result<String, ConfigError> {
    optional(vars, name).ok_or_else(|| ConfigError::MissingEnvVar(name.to_string()))
}

fn parse_or<T>(vars: &HashMap<String, String>, name: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    match optional(vars, name) {
        Some(raw) => raw.parse().map_err(|e| ConfigError::InvalidValue {
            name: name.to_string(),
            reason: format!("'{raw}': {e}"),
        }),
        None => Ok(default),
    }
}

fn google_config(vars: &HashMap<String, String>) -> Result<GoogleConfig, ConfigError> {
    let drive_folder_id = required(vars, "GOOGLE_DRIVE_FOLDER_ID")?;

    let auth = match optional(vars, "GOOGLE_AUTH_MODE").as_deref() {
        None | Some("oauth") => GoogleAuth::OAuth {
            client_id: required(vars, "GOOGLE_OAUTH_CLIENT_ID")?,
            client_secret: SecretString::from(required(vars, "GOOGLE_OAUTH_CLIENT_SECRET")?),
            refresh_token: SecretString::from(required(vars, "GOOGLE_OAUTH_REFRESH_TOKEN")?),
        },
        Some("service_account") => GoogleAuth::ServiceAccount {
            key_json: SecretString::from(required(vars, "GOOGLE_SERVICE_ACCOUNT_JSON")?),
        },
        Some(other) => {
            return Err(ConfigError::InvalidArtifactSink(format!(
                "GOOGLE_AUTH_MODE must be 'oauth' or 'service_account', got '{other}'"
            )))
        }
    };

    Ok(GoogleConfig {
        drive_folder_id,
        spreadsheet_id: optional(vars, "GOOGLE_SPREADSHEET_ID"),
        auth,
        token_uri: optional(vars, "GOOGLE_TOKEN_URI")
            .unwrap_or_else(|| DEFAULT_TOKEN_URI.to_string()),
        drive_api_base: optional(vars, "GOOGLE_DRIVE_API_BASE")
            .unwrap_or_else(|| DEFAULT_DRIVE_API_BASE.to_string()),
        upload_api_base: optional(vars, "GOOGLE_UPLOAD_API_BASE")
            .unwrap_or_else(|| DEFAULT_UPLOAD_API_BASE.to_string()),
        sheets_api_base: optional(vars, "GOOGLE_SHEETS_API_BASE")
            .unwrap_or_else(|| DEFAULT_SHEETS_API_BASE.to_string()),
    })
}

/// Chat settings, or `None` when either the token or the recipient list is missing.
fn telegram_config(vars: &HashMap<String, String>) -> Option<TelegramConfig> {
    let bot_token = optional(vars, "TELEGRAM_BOT_TOKEN")?;
    let chat_ids = parse_chat_ids(&optional(vars, "TELEGRAM_CHAT_IDS")?);
    if chat_ids.is_empty() {
        return None;
    }

    Some(TelegramConfig {
        bot_token: SecretString::from(bot_token),
        chat_ids,
        api_base: optional(vars, "TELEGRAM_API_BASE")
            .unwrap_or_else(|| DEFAULT_TELEGRAM_API_BASE.to_string()),
    })
}

/// Split a comma-delimited recipient list, dropping blanks.
pub fn parse_chat_ids(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect()
}
