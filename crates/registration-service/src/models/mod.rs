//! Data models for the registration service.
//!
//! Contains the capacity counter snapshot, submitter and artifact types,
//! event display settings and the public API envelopes.

pub mod submission;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

pub use submission::{sanitize, RawSubmission, ValidSubmission};

// ============================================================================
// Capacity
// ============================================================================

/// Persisted open/closed flag of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Open,
    Closed,
}

impl EventStatus {
    /// Database representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Open => "open",
            EventStatus::Closed => "closed",
        }
    }
}

impl FromStr for EventStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(EventStatus::Open),
            "closed" => Ok(EventStatus::Closed),
            other => Err(format!("unknown event status '{other}'")),
        }
    }
}

/// Counter and flag of one event, read together in a single statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapacitySnapshot {
    /// Committed registrations.
    pub current_count: i32,
    /// Slots claimed by in-flight submissions.
    pub reserved_count: i32,
    pub max_quota: i32,
    /// Highest registration number handed out so far.
    pub last_sequence: i32,
    pub status: EventStatus,
}

impl CapacitySnapshot {
    /// Publicly visible open state: the flag is open and committed count is below quota.
    pub fn is_open(&self) -> bool {
        self.status == EventStatus::Open && self.current_count < self.max_quota
    }

    /// Slots neither committed nor reserved.
    pub fn remaining(&self) -> i32 {
        (self.max_quota - self.current_count - self.reserved_count).max(0)
    }
}

/// Result of an atomic reservation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReserveOutcome {
    /// A slot was claimed; the sequence number is never handed out again.
    Reserved { sequence_number: i32 },
    /// Committed plus reserved slots already equal the quota.
    QuotaExhausted,
    /// The flag is closed although slots remain.
    Closed,
}

/// Result of persisting a registration and committing its slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitReceipt {
    pub current_count: i32,
    pub max_quota: i32,
    /// `false` when the row already existed from an earlier attempt.
    pub newly_inserted: bool,
}

impl CommitReceipt {
    pub fn quota_reached(&self) -> bool {
        self.current_count >= self.max_quota
    }
}

// ============================================================================
// Submitter
// ============================================================================

/// Vest size selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VestSize {
    S,
    M,
    L,
    XL,
    XXL,
}

impl VestSize {
    pub fn as_str(&self) -> &'static str {
        match self {
            VestSize::S => "S",
            VestSize::M => "M",
            VestSize::L => "L",
            VestSize::XL => "XL",
            VestSize::XXL => "XXL",
        }
    }
}

impl FromStr for VestSize {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "S" => Ok(VestSize::S),
            "M" => Ok(VestSize::M),
            "L" => Ok(VestSize::L),
            "XL" => Ok(VestSize::XL),
            "XXL" => Ok(VestSize::XXL),
            other => Err(format!("unknown vest size '{other}'")),
        }
    }
}

impl fmt::Display for VestSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validated submitter fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitterFields {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub age: i32,
    pub city: String,
    /// Handle without the leading `@`.
    pub instagram_username: String,
    pub participation_history: String,
    pub vest_size: VestSize,
}

impl SubmitterFields {
    /// First whitespace-separated token of the name.
    pub fn first_name(&self) -> &str {
        self.name.split_whitespace().next().unwrap_or(&self.name)
    }
}

// ============================================================================
// Artifacts
// ============================================================================

/// Destination category of a relocated artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactCategory {
    Payment,
    Social,
}

impl ArtifactCategory {
    /// Subfolder below the event folder.
    pub fn subfolder_name(&self) -> &'static str {
        match self {
            ArtifactCategory::Payment => "Bukti Pembayaran",
            ArtifactCategory::Social => "Screenshot Sosmed",
        }
    }
}

/// Which submitted file an artifact came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    PaymentProof,
    TiktokProof,
    InstagramProof,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 3] = [
        ArtifactKind::PaymentProof,
        ArtifactKind::TiktokProof,
        ArtifactKind::InstagramProof,
    ];

    /// Multipart field name.
    pub fn form_field(&self) -> &'static str {
        match self {
            ArtifactKind::PaymentProof => "paymentProof",
            ArtifactKind::TiktokProof => "tiktokProof",
            ArtifactKind::InstagramProof => "instagramProof",
        }
    }

    pub fn from_form_field(field: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.form_field() == field)
    }

    /// File name prefix, also the metric label.
    pub fn file_prefix(&self) -> &'static str {
        match self {
            ArtifactKind::PaymentProof => "payment",
            ArtifactKind::TiktokProof => "tiktok",
            ArtifactKind::InstagramProof => "instagram",
        }
    }

    pub fn category(&self) -> ArtifactCategory {
        match self {
            ArtifactKind::PaymentProof => ArtifactCategory::Payment,
            ArtifactKind::TiktokProof | ArtifactKind::InstagramProof => ArtifactCategory::Social,
        }
    }

    /// Label used in operator messages.
    pub fn display_label(&self) -> &'static str {
        match self {
            ArtifactKind::PaymentProof => "Bukti Bayar",
            ArtifactKind::TiktokProof => "Screenshot TikTok",
            ArtifactKind::InstagramProof => "Screenshot IG",
        }
    }
}

/// A submitted file still held in memory.
#[derive(Clone)]
pub struct UploadedFile {
    pub kind: ArtifactKind,
    /// Client-supplied file name.
    pub original_name: String,
    pub content_type: String,
    pub bytes: Bytes,
}

impl UploadedFile {
    /// Lower-cased extension of the original name, if any.
    pub fn extension(&self) -> Option<String> {
        let (stem, ext) = self.original_name.rsplit_once('.')?;
        if stem.is_empty() || ext.is_empty() {
            return None;
        }
        Some(ext.to_ascii_lowercase())
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }
}

impl fmt::Debug for UploadedFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadedFile")
            .field("kind", &self.kind)
            .field("original_name", &self.original_name)
            .field("content_type", &self.content_type)
            .field("size", &self.bytes.len())
            .finish()
    }
}

/// A relocated artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactRef {
    pub kind: ArtifactKind,
    /// Destination folder identifier in the sink.
    pub folder_id: String,
    /// Sink identifier of the stored file, used for cleanup.
    pub file_id: String,
    /// Shareable link.
    pub link: String,
}

impl ArtifactRef {
    pub fn category(&self) -> ArtifactCategory {
        self.kind.category()
    }
}

/// Artifact references of one registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactLinks {
    pub payment: ArtifactRef,
    pub tiktok: Option<ArtifactRef>,
    pub instagram: Option<ArtifactRef>,
}

impl ArtifactLinks {
    /// All present references, payment first.
    pub fn iter(&self) -> impl Iterator<Item = &ArtifactRef> {
        std::iter::once(&self.payment)
            .chain(self.tiktok.as_ref())
            .chain(self.instagram.as_ref())
    }
}

// ============================================================================
// Registration
// ============================================================================

/// Registration row about to be persisted.
#[derive(Debug, Clone)]
pub struct NewRegistration {
    pub registration_number: i32,
    pub fields: SubmitterFields,
    pub artifacts: ArtifactLinks,
}

/// Persisted registration.
#[derive(Debug, Clone)]
pub struct Registration {
    pub event_id: String,
    pub registration_number: i32,
    pub fields: SubmitterFields,
    pub artifacts: ArtifactLinks,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Event settings
// ============================================================================

pub const DEFAULT_EVENT_TITLE: &str = "Event Relawanns";
pub const DEFAULT_UNSET: &str = "Belum diset";
pub const DEFAULT_LOCATION_MAPS: &str = "#";
pub const DEFAULT_EVENT_DESCRIPTION: &str = "Deskripsi belum tersedia";
pub const DEFAULT_EVENT_CATEGORY: &str = "volunteer";
pub const DEFAULT_STATUS_DESCRIPTION: &str =
    "Bergabung dengan Relawanns dan wujudkan perubahan nyata untuk Indonesia";

/// Operator-managed display settings with defaults applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventSettings {
    pub title: String,
    pub location_name: String,
    pub location_maps: String,
    pub date: String,
    pub description: String,
    pub category: String,
    pub requirements: Vec<String>,
    pub status_description: String,
}

impl EventSettings {
    /// Build from the key/value table; missing keys take their defaults.
    ///
    /// `requirements` is stored as a JSON array; malformed JSON yields an empty list.
    pub fn from_map(map: &HashMap<String, String>) -> Self {
        let get = |key: &str, default: &str| {
            map.get(key)
                .filter(|v| !v.trim().is_empty())
                .cloned()
                .unwrap_or_else(|| default.to_string())
        };

        let requirements = map
            .get("requirements")
            .and_then(|raw| serde_json::from_str::<Vec<String>>(raw).ok())
            .unwrap_or_default();

        Self {
            title: get("event_title", DEFAULT_EVENT_TITLE),
            location_name: get("event_location_name", DEFAULT_UNSET),
            location_maps: get("event_location_maps", DEFAULT_LOCATION_MAPS),
            date: get("event_date", DEFAULT_UNSET),
            description: get("event_description", DEFAULT_EVENT_DESCRIPTION),
            category: get("event_category", DEFAULT_EVENT_CATEGORY),
            requirements,
            status_description: get("status_description", DEFAULT_STATUS_DESCRIPTION),
        }
    }
}

/// Quota for a newly seeded capacity row: the `max_quota` setting when it
/// holds a non-negative integer, otherwise `fallback`.
pub fn seed_quota(map: &HashMap<String, String>, fallback: i32) -> i32 {
    map.get("max_quota")
        .and_then(|raw| raw.trim().parse::<i32>().ok())
        .filter(|quota| *quota >= 0)
        .unwrap_or(fallback)
}

impl Default for EventSettings {
    fn default() -> Self {
        Self::from_map(&HashMap::new())
    }
}

// ============================================================================
// API envelopes
// ============================================================================

/// `{success: true, data: ...}` envelope.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

/// `POST /register` success payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    pub registration_number: i32,
    pub name: String,
}

pub const STATUS_OPEN_MESSAGE: &str = "Pendaftaran sedang dibuka";
pub const STATUS_CLOSED_MESSAGE: &str = "Pendaftaran ditutup";

/// `GET /status` payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub is_open: bool,
    pub message: String,
    pub description: String,
}

impl StatusResponse {
    pub fn new(is_open: bool, description: String) -> Self {
        let message = if is_open {
            STATUS_OPEN_MESSAGE
        } else {
            STATUS_CLOSED_MESSAGE
        };
        Self {
            is_open,
            message: message.to_string(),
            description,
        }
    }
}

/// `GET /event-details` payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EventDetails {
    pub title: String,
    pub location: String,
    pub location_maps: String,
    pub date: String,
    pub description: String,
    pub max_quota: i32,
    pub current_registrants: i32,
    pub category: String,
    pub requirements: Vec<String>,
}

impl EventDetails {
    pub fn new(settings: EventSettings, capacity: &CapacitySnapshot) -> Self {
        Self {
            title: settings.title,
            location: settings.location_name,
            location_maps: settings.location_maps,
            date: settings.date,
            description: settings.description,
            max_quota: capacity.max_quota,
            current_registrants: capacity.current_count,
            category: settings.category,
            requirements: settings.requirements,
        }
    }
}

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Overall status ("healthy" or "unhealthy").
    pub status: String,
    /// Database reachability.
    pub database: String,
}
