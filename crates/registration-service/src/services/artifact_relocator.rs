//! Artifact relocator.
//!
//! Moves the submitted files into the event folder hierarchy of the
//! artifact sink:
//!
//! ```text
//! <root>/<event folder>/Bukti Pembayaran/payment_<full name>_<millis>.<ext>
//! <root>/<event folder>/Screenshot Sosmed/tiktok_<first name>_<millis>.<ext>
//! <root>/<event folder>/Screenshot Sosmed/instagram_<first name>_<millis>.<ext>
//! ```
//!
//! Relocation is all-or-nothing. Files are uploaded concurrently; if any
//! upload fails, the ones that succeeded are deleted (best effort) and the
//! whole relocation fails. The social subfolder is only resolved when a
//! social artifact was submitted.
//!
//! Folder ids are cached by the sink. When an upload reports its folder
//! missing (an operator deleted it), the cached ids are dropped and the
//! folders are resolved and uploaded to once more.

use crate::errors::RegistrationError;
use crate::models::{
    ArtifactCategory, ArtifactKind, ArtifactLinks, ArtifactRef, EventSettings, SubmitterFields,
    UploadedFile,
};
use crate::observability::metrics;
use crate::services::artifact_sink::{ArtifactSink, SinkError};
use chrono::Utc;
use futures::future::{join_all, try_join};
use regex::Regex;
use std::sync::{Arc, LazyLock};
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Longest event title kept in a folder name before "..." is appended.
pub const MAX_FOLDER_TITLE_CHARS: usize = 25;

/// Characters not allowed in folder names.
const ILLEGAL_FOLDER_CHARS: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

static DATE_TOKENS: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(\d+)\s+(\w+)\s+(\d{4})").ok());

/// Compact form of an Indonesian month name; unknown names pass through.
fn compact_month(month: &str) -> &str {
    match month {
        "Januari" => "Jan",
        "Februari" => "Feb",
        "Maret" => "Mar",
        "April" => "Apr",
        "Mei" => "May",
        "Juni" => "Jun",
        "Juli" => "Jul",
        "Agustus" => "Aug",
        "September" => "Sep",
        "Oktober" => "Okt",
        "November" => "Nov",
        "Desember" => "Des",
        other => other,
    }
}

/// Turn a long-form date such as `"Minggu, 12 Januari 2026"` into `"12 Jan 2026"`.
///
/// Dates without a comma are already compact and are returned unchanged.
pub fn normalize_event_date(date: &str) -> String {
    if !date.contains(',') {
        return date.to_string();
    }

    DATE_TOKENS
        .as_ref()
        .and_then(|re| re.captures(date))
        .and_then(|caps| {
            let day = caps.get(1)?.as_str();
            let month = caps.get(2)?.as_str();
            let year = caps.get(3)?.as_str();
            Some(format!("{day} {} {year}", compact_month(month)))
        })
        .unwrap_or_else(|| date.to_string())
}

/// Folder (and sheet) name of an event: `"<title> - <date>"`.
pub fn event_folder_name(title: &str, date: &str) -> String {
    let title = if title.chars().count() > MAX_FOLDER_TITLE_CHARS {
        let mut truncated: String = title.chars().take(MAX_FOLDER_TITLE_CHARS).collect();
        truncated.push_str("...");
        truncated
    } else {
        title.to_string()
    };

    format!("{title} - {}", normalize_event_date(date))
        .chars()
        .filter(|c| !ILLEGAL_FOLDER_CHARS.contains(c))
        .collect()
}

/// Destination file name of an artifact.
///
/// The payment proof carries the full name; social proofs only the first
/// name to keep names short.
pub fn artifact_file_name(file: &UploadedFile, fields: &SubmitterFields, millis: i64) -> String {
    let name_token = match file.kind {
        ArtifactKind::PaymentProof => fields.name.as_str(),
        ArtifactKind::TiktokProof | ArtifactKind::InstagramProof => fields.first_name(),
    };
    let extension = file.extension().unwrap_or_else(|| "bin".to_string());
    format!(
        "{}_{name_token}_{millis}.{extension}",
        file.kind.file_prefix()
    )
}

/// Upload rounds per relocation; the second runs after a missing folder.
const RELOCATION_ATTEMPTS: usize = 2;

/// Folder ids an event's artifacts go into.
struct EventFolders {
    event: String,
    payment: String,
    social: Option<String>,
}

fn relocation_error(stage: &str, err: &SinkError) -> RegistrationError {
    RegistrationError::Relocation(format!("{stage}: {err}"))
}

/// Relocation of submitted files into permanent storage.
#[derive(Clone)]
pub struct ArtifactRelocator {
    sink: Arc<dyn ArtifactSink>,
}

impl ArtifactRelocator {
    pub fn new(sink: Arc<dyn ArtifactSink>) -> Self {
        Self { sink }
    }

    pub fn sink(&self) -> &Arc<dyn ArtifactSink> {
        &self.sink
    }

    /// Upload all files; either every file lands or none is kept.
    ///
    /// # Errors
    ///
    /// Returns `RegistrationError::Relocation` if a folder operation or any
    /// upload fails, or if no payment proof was supplied.
    #[instrument(skip_all, name = "reg.relocator.relocate", fields(files = files.len()))]
    pub async fn relocate(
        &self,
        settings: &EventSettings,
        fields: &SubmitterFields,
        files: &[UploadedFile],
    ) -> Result<ArtifactLinks, RegistrationError> {
        let start = Instant::now();
        let result = self.relocate_all(settings, fields, files).await;
        metrics::record_relocation(result.is_ok(), start.elapsed());
        result
    }

    async fn relocate_all(
        &self,
        settings: &EventSettings,
        fields: &SubmitterFields,
        files: &[UploadedFile],
    ) -> Result<ArtifactLinks, RegistrationError> {
        if !files.iter().any(|f| f.kind == ArtifactKind::PaymentProof) {
            return Err(RegistrationError::Relocation(
                "payment proof missing".to_string(),
            ));
        }

        let folder_name = event_folder_name(&settings.title, &settings.date);
        let needs_social = files
            .iter()
            .any(|f| f.kind.category() == ArtifactCategory::Social);

        let mut attempt = 1;
        let stored = loop {
            let folders = self.resolve_folders(&folder_name, needs_social).await?;
            match self.upload_all(&folders, fields, files).await {
                Ok(stored) => break stored,
                Err((kind, SinkError::NotFound(reason))) if attempt < RELOCATION_ATTEMPTS => {
                    warn!(
                        target: "reg.services.relocator",
                        folder = %folder_name,
                        file = kind.file_prefix(),
                        reason = %reason,
                        "Target folder missing upstream, resolving folders again"
                    );
                    self.forget_folders(&folder_name, &folders).await;
                    attempt += 1;
                }
                Err((kind, err)) => return Err(relocation_error(kind.file_prefix(), &err)),
            }
        };

        let mut payment = None;
        let mut tiktok = None;
        let mut instagram = None;
        for artifact in stored {
            match artifact.kind {
                ArtifactKind::PaymentProof => payment = Some(artifact),
                ArtifactKind::TiktokProof => tiktok = Some(artifact),
                ArtifactKind::InstagramProof => instagram = Some(artifact),
            }
        }
        let payment = payment.ok_or_else(|| {
            RegistrationError::Relocation("payment proof missing after upload".to_string())
        })?;

        info!(
            target: "reg.services.relocator",
            folder = %folder_name,
            artifacts = 1 + usize::from(tiktok.is_some()) + usize::from(instagram.is_some()),
            "Artifacts relocated"
        );

        Ok(ArtifactLinks {
            payment,
            tiktok,
            instagram,
        })
    }

    async fn resolve_folders(
        &self,
        folder_name: &str,
        needs_social: bool,
    ) -> Result<EventFolders, RegistrationError> {
        let event = self
            .sink
            .find_or_create_folder(self.sink.root_folder(), folder_name)
            .await
            .map_err(|e| relocation_error("event folder", &e))?;

        let payment_folder = self
            .sink
            .find_or_create_folder(&event, ArtifactCategory::Payment.subfolder_name());

        let (payment, social) = if needs_social {
            let social_folder = self
                .sink
                .find_or_create_folder(&event, ArtifactCategory::Social.subfolder_name());
            let (payment, social) = try_join(payment_folder, social_folder)
                .await
                .map_err(|e| relocation_error("subfolder", &e))?;
            (payment, Some(social))
        } else {
            let payment = payment_folder
                .await
                .map_err(|e| relocation_error("subfolder", &e))?;
            (payment, None)
        };

        debug!(
            target: "reg.services.relocator",
            folder = %folder_name,
            "Event folders resolved"
        );

        Ok(EventFolders {
            event,
            payment,
            social,
        })
    }

    /// Drop every cached folder of the event so the next resolution asks the sink.
    async fn forget_folders(&self, folder_name: &str, folders: &EventFolders) {
        self.sink
            .forget_folder(self.sink.root_folder(), folder_name)
            .await;
        for category in [ArtifactCategory::Payment, ArtifactCategory::Social] {
            self.sink
                .forget_folder(&folders.event, category.subfolder_name())
                .await;
        }
    }

    /// Upload every file concurrently. On any failure the files that did
    /// land are deleted and one failure is returned, a missing folder first.
    async fn upload_all(
        &self,
        folders: &EventFolders,
        fields: &SubmitterFields,
        files: &[UploadedFile],
    ) -> Result<Vec<ArtifactRef>, (ArtifactKind, SinkError)> {
        let millis = Utc::now().timestamp_millis();
        let uploads = files.iter().map(|file| {
            let folder_id = match file.kind.category() {
                ArtifactCategory::Payment => folders.payment.clone(),
                ArtifactCategory::Social => folders.social.clone().unwrap_or_default(),
            };
            let name = artifact_file_name(file, fields, millis);
            async move {
                let result = self
                    .sink
                    .upload_file(&folder_id, &name, &file.content_type, file.bytes.clone())
                    .await;
                metrics::record_artifact_upload(file.kind.file_prefix(), result.is_ok());
                result
                    .map(|stored| ArtifactRef {
                        kind: file.kind,
                        folder_id,
                        file_id: stored.file_id,
                        link: stored.link,
                    })
                    .map_err(|e| (file.kind, e))
            }
        });

        let mut stored = Vec::with_capacity(files.len());
        let mut failures = Vec::new();
        for result in join_all(uploads).await {
            match result {
                Ok(artifact) => stored.push(artifact),
                Err(failure) => failures.push(failure),
            }
        }

        let failed = failures.len();
        let Some(failure) = failures
            .into_iter()
            .max_by_key(|(_, err)| matches!(err, SinkError::NotFound(_)))
        else {
            return Ok(stored);
        };

        warn!(
            target: "reg.services.relocator",
            failed,
            uploaded = stored.len(),
            "Upload failed, removing already uploaded artifacts"
        );
        self.discard(&stored).await;
        Err(failure)
    }

    /// Best-effort removal of relocated artifacts.
    pub async fn discard(&self, artifacts: &[ArtifactRef]) {
        let deletions = artifacts.iter().map(|artifact| async move {
            if let Err(e) = self.sink.delete_file(&artifact.file_id).await {
                warn!(
                    target: "reg.services.relocator",
                    file_id = %artifact.file_id,
                    error = %e,
                    "Failed to delete orphaned artifact"
                );
            }
        });
        join_all(deletions).await;
    }
}
