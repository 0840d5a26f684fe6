//! Registration service error types.
//!
//! `RegistrationError` maps to the public JSON envelope via `IntoResponse`.
//! Relocation and persistence failures return a generic message to the
//! caller; the actual cause is logged server-side.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

/// Message returned to the caller for relocation and persistence failures.
pub const GENERIC_FAILURE_MESSAGE: &str = "Registration could not be completed, please try again";

/// Message returned to a client over its submission limit.
pub const RATE_LIMIT_MESSAGE: &str = "Terlalu banyak percobaan, silakan coba lagi dalam 15 menit";

/// Failure of a registration submission.
///
/// Maps to HTTP status codes:
/// - Validation, QuotaExhausted, RegistrationClosed: 400 Bad Request
/// - RateLimited: 429 Too Many Requests
/// - Relocation, Persistence, Internal: 500 Internal Server Error
#[derive(Debug, Error)]
pub enum RegistrationError {
    /// Field-level validation messages keyed by form field name.
    #[error("Validation failed for {} field(s)", .0.len())]
    Validation(BTreeMap<String, String>),

    #[error("Quota exhausted")]
    QuotaExhausted,

    /// Operator closed the event while slots remain.
    #[error("Registration closed")]
    RegistrationClosed,

    /// Client exceeded its submission limit.
    #[error("Rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Artifact relocation failed: {0}")]
    Relocation(String),

    #[error("Persistence failed: {0}")]
    Persistence(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RegistrationError {
    /// Returns the HTTP status code for this error (for metrics recording).
    pub fn status_code(&self) -> u16 {
        match self {
            RegistrationError::Validation(_)
            | RegistrationError::QuotaExhausted
            | RegistrationError::RegistrationClosed => 400,
            RegistrationError::RateLimited { .. } => 429,
            RegistrationError::Relocation(_)
            | RegistrationError::Persistence(_)
            | RegistrationError::Internal(_) => 500,
        }
    }

    /// Bounded label for `reg_registrations_total`.
    pub fn metric_label(&self) -> &'static str {
        match self {
            RegistrationError::Validation(_) => "validation_error",
            RegistrationError::QuotaExhausted => "quota_exhausted",
            RegistrationError::RegistrationClosed => "closed",
            RegistrationError::RateLimited { .. } => "rate_limited",
            RegistrationError::Relocation(_) => "relocation_failure",
            RegistrationError::Persistence(_) => "persistence_failure",
            RegistrationError::Internal(_) => "internal_error",
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    error: String,
}

#[derive(Serialize)]
struct ValidationBody {
    success: bool,
    errors: BTreeMap<String, String>,
}

impl IntoResponse for RegistrationError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let message = match self {
            RegistrationError::Validation(errors) => {
                return (
                    status,
                    Json(ValidationBody {
                        success: false,
                        errors,
                    }),
                )
                    .into_response();
            }
            RegistrationError::QuotaExhausted => "quota exhausted".to_string(),
            RegistrationError::RegistrationClosed => "registration closed".to_string(),
            RegistrationError::RateLimited { retry_after_secs } => {
                let mut response = (
                    status,
                    Json(ErrorBody {
                        success: false,
                        error: RATE_LIMIT_MESSAGE.to_string(),
                    }),
                )
                    .into_response();
                if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                    response.headers_mut().insert(header::RETRY_AFTER, value);
                }
                return response;
            }
            RegistrationError::Relocation(err) => {
                // Log actual error server-side, return generic message to client
                tracing::error!(target: "reg.errors", error = %err, "Artifact relocation failed");
                GENERIC_FAILURE_MESSAGE.to_string()
            }
            RegistrationError::Persistence(err) => {
                tracing::error!(target: "reg.errors", error = %err, "Registration persistence failed");
                GENERIC_FAILURE_MESSAGE.to_string()
            }
            RegistrationError::Internal(err) => {
                tracing::error!(target: "reg.errors", error = %err, "Internal error");
                "An internal error occurred".to_string()
            }
        };

        (
            status,
            Json(ErrorBody {
                success: false,
                error: message,
            }),
        )
            .into_response()
    }
}

/// Datastore error.
#[derive(Debug, Error, Clone)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    /// No capacity row exists for the event.
    #[error("Event not found: {0}")]
    EventNotFound(String),

    #[error("Datastore unavailable")]
    Unavailable,
}

/// Convert sqlx errors to StoreError
impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Database(err.to_string())
    }
}

impl From<StoreError> for RegistrationError {
    fn from(err: StoreError) -> Self {
        RegistrationError::Internal(err.to_string())
    }
}
