//! Registration submission handler.
//!
//! Accepts the multipart sign-up form and hands it to the pipeline. Text
//! parts become fields; `paymentProof`, `tiktokProof` and `instagramProof`
//! parts become files. Unknown parts are ignored.
//!
//! # Security
//!
//! - The request body is capped by the router's body limit
//! - Submitter data is never logged at info level
//! - Internal failures answer with a generic message

use crate::errors::RegistrationError;
use crate::models::{ApiResponse, ArtifactKind, RawSubmission, RegisterResponse, UploadedFile};
use crate::routes::AppState;
use axum::extract::{Multipart, State};
use axum::Json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Validation key and message for a form that could not be read.
pub const FORM_FIELD: &str = "form";
pub const MSG_MALFORMED_FORM: &str = "Data formulir tidak valid";

/// Handler for POST /register
///
/// # Response
///
/// - 200 OK: `{success: true, data: {registrationNumber, name}}`
/// - 400 Bad Request: field errors, quota exhausted or registration closed
/// - 500 Internal Server Error: relocation or persistence failure
#[instrument(skip_all, name = "reg.handlers.register")]
pub async fn register(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Json<ApiResponse<RegisterResponse>>, RegistrationError> {
    let submission = read_submission(multipart).await?;
    debug!(
        target: "reg.handlers.register",
        fields = submission.fields.len(),
        files = submission.files.len(),
        "Submission received"
    );

    let response = state.pipeline.submit(submission).await?;
    Ok(Json(ApiResponse::ok(response)))
}

fn malformed_form() -> RegistrationError {
    let mut errors = BTreeMap::new();
    errors.insert(FORM_FIELD.to_string(), MSG_MALFORMED_FORM.to_string());
    RegistrationError::Validation(errors)
}

async fn read_submission(mut multipart: Multipart) -> Result<RawSubmission, RegistrationError> {
    let mut submission = RawSubmission::default();

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                warn!(target: "reg.handlers.register", error = %e, "Malformed multipart body");
                return Err(malformed_form());
            }
        };

        let Some(name) = field.name().map(ToString::to_string) else {
            continue;
        };

        if let Some(kind) = ArtifactKind::from_form_field(&name) {
            let original_name = field.file_name().unwrap_or_default().to_string();
            let content_type = field.content_type().unwrap_or_default().to_string();
            let bytes = field.bytes().await.map_err(|e| {
                warn!(target: "reg.handlers.register", part = %name, error = %e, "Failed to read file part");
                malformed_form()
            })?;
            submission.files.push(UploadedFile {
                kind,
                original_name,
                content_type,
                bytes,
            });
        } else {
            let value = field.text().await.map_err(|e| {
                warn!(target: "reg.handlers.register", part = %name, error = %e, "Failed to read text part");
                malformed_form()
            })?;
            submission.fields.insert(name, value);
        }
    }

    Ok(submission)
}
