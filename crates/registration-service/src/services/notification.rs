//! Operator message and spreadsheet row composition.
//!
//! Messages use Telegram's legacy Markdown. Submitter-provided text is
//! escaped so a handle like `budi_santoso` cannot break the formatting.

use crate::models::{ArtifactKind, ArtifactLinks, NewRegistration, SubmitterFields};
use chrono::{DateTime, FixedOffset, Utc};

const SEPARATOR: &str = "━━━━━━━━━━━━━━━━━";

/// Offset used for operator-facing timestamps (WIB, UTC+7).
const WIB_OFFSET_SECS: i32 = 7 * 3600;

/// Header row of the per-event sheet.
pub const SHEET_HEADER: [&str; 12] = [
    "No",
    "Nama",
    "Email",
    "No WA",
    "Usia",
    "Domisili",
    "Instagram",
    "Pernah ikut relawanns?",
    "Ukuran Vest",
    "Link Bukti Bayar",
    "Screenshot TikTok",
    "Screenshot IG",
];

/// Escape the characters legacy Markdown treats as markup.
pub fn escape_markdown(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '_' | '*' | '`' | '[') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// `dd/mm/yyyy, HH.MM.SS WIB`.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    match FixedOffset::east_opt(WIB_OFFSET_SECS) {
        Some(wib) => at
            .with_timezone(&wib)
            .format("%d/%m/%Y, %H.%M.%S WIB")
            .to_string(),
        None => at.format("%d/%m/%Y, %H.%M.%S UTC").to_string(),
    }
}

fn attachment_lines(artifacts: &ArtifactLinks) -> String {
    artifacts
        .iter()
        .map(|artifact| format!("• [{} (Link)]({})", artifact.kind.display_label(), artifact.link))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Message announcing a committed registration.
pub fn new_registration_message(
    registration_number: i32,
    max_quota: i32,
    fields: &SubmitterFields,
    artifacts: &ArtifactLinks,
    at: DateTime<Utc>,
) -> String {
    let history = if fields.participation_history.is_empty() {
        "-".to_string()
    } else {
        escape_markdown(&fields.participation_history)
    };

    format!(
        "🆕 *PENDAFTAR BARU!*\n\
         \n\
         No. Pendaftar: *{registration_number} / {max_quota}*\n\
         {SEPARATOR}\n\
         👤 *DATA DIRI*\n\
         Nama: {name}\n\
         Email: {email}\n\
         WA: {phone}\n\
         Usia: {age} th | Kota: {city}\n\
         IG: [@{handle_label}](https://instagram.com/{handle})\n\
         History: {history}\n\
         \n\
         👕 *ATRIBUT*\n\
         Ukuran Vest: *{vest}*\n\
         \n\
         📎 *LAMPIRAN*\n\
         {attachments}\n\
         {SEPARATOR}\n\
         📅 {timestamp}",
        name = escape_markdown(&fields.name),
        email = escape_markdown(&fields.email),
        phone = fields.phone,
        age = fields.age,
        city = escape_markdown(&fields.city),
        handle_label = escape_markdown(&fields.instagram_username),
        handle = fields.instagram_username,
        vest = fields.vest_size,
        attachments = attachment_lines(artifacts),
        timestamp = format_timestamp(at),
    )
}

/// One-off alert sent when the quota was reached.
pub fn capacity_full_message(
    event_title: &str,
    current_count: i32,
    max_quota: i32,
    at: DateTime<Utc>,
) -> String {
    format!(
        "🚫 *KUOTA PENUH*\n\
         \n\
         Event: {title}\n\
         Pendaftar: *{current_count} / {max_quota}*\n\
         Pendaftaran otomatis ditutup.\n\
         {SEPARATOR}\n\
         📅 {timestamp}",
        title = escape_markdown(event_title),
        timestamp = format_timestamp(at),
    )
}

/// Sheet row of a registration, sequence number first.
pub fn sheet_row(registration: &NewRegistration) -> Vec<String> {
    let fields = &registration.fields;
    let link = |kind: ArtifactKind| {
        registration
            .artifacts
            .iter()
            .find(|a| a.kind == kind)
            .map_or_else(|| "-".to_string(), |a| a.link.clone())
    };

    vec![
        registration.registration_number.to_string(),
        fields.name.clone(),
        fields.email.clone(),
        fields.phone.clone(),
        fields.age.to_string(),
        fields.city.clone(),
        fields.instagram_username.clone(),
        fields.participation_history.clone(),
        fields.vest_size.to_string(),
        link(ArtifactKind::PaymentProof),
        link(ArtifactKind::TiktokProof),
        link(ArtifactKind::InstagramProof),
    ]
}
