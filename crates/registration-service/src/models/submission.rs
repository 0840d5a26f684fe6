//! Submission sanitizing and field-level validation.
//!
//! Every field is checked in one pass and all messages are returned
//! together, keyed by form field name.

use super::{ArtifactKind, SubmitterFields, UploadedFile, VestSize};
use crate::config::MIN_UPLOAD_BYTES;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

pub const MSG_INVALID_NAME: &str = "Nama tidak valid";
pub const MSG_INVALID_EMAIL: &str = "Format email tidak valid";
pub const MSG_INVALID_PHONE: &str = "Nomor WhatsApp tidak valid";
pub const MSG_INVALID_AGE: &str = "Usia harus antara 17–60 tahun";
pub const MSG_INVALID_CITY: &str = "Nama kota tidak valid";
pub const MSG_INVALID_INSTAGRAM: &str = "Username Instagram tidak valid";
pub const MSG_INVALID_VEST_SIZE: &str = "Ukuran vest tidak valid";
pub const MSG_HISTORY_TOO_LONG: &str = "Riwayat partisipasi maksimal 100 karakter";
pub const MSG_PAYMENT_REQUIRED: &str = "Bukti pembayaran wajib diunggah";
pub const MSG_FILE_TYPE: &str = "Format file harus JPG, PNG, atau PDF";
pub const MSG_FILE_EXTENSION: &str = "Ekstensi file tidak sesuai dengan tipe file";
pub const MSG_FILE_TOO_SMALL: &str = "Ukuran file terlalu kecil";
pub const MSG_FILE_TOO_LARGE: &str = "Ukuran file melebihi batas maksimal";

/// Stored when no prior participation is given.
pub const DEFAULT_PARTICIPATION_HISTORY: &str = "Belum Pernah";

const MIN_AGE: i32 = 17;
const MAX_AGE: i32 = 60;
const NAME_LEN: std::ops::RangeInclusive<usize> = 3..=50;
const MAX_CITY_LEN: usize = 30;
const MAX_HISTORY_LEN: usize = 100;

/// Accepted MIME types and the extensions each one allows.
const ALLOWED_TYPES: &[(&str, &[&str])] = &[
    ("image/jpeg", &["jpg", "jpeg"]),
    ("image/png", &["png"]),
    ("application/pdf", &["pdf"]),
];

static SCRIPT_TAG: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?is)<script\b[^>]*>.*?</script\s*>").ok());
static HTML_TAG: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"<[^>]*>").ok());
static NAME: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"^[a-zA-Z\s.]+$").ok());
static EMAIL: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").ok()
});
static PHONE: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"^(08|62)\d{8,13}$").ok());
static CITY: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"^[a-zA-Z\s]+$").ok());
static INSTAGRAM: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9._]{1,30}$").ok());

/// A pattern that failed to compile matches nothing.
fn is_match(pattern: &LazyLock<Option<Regex>>, value: &str) -> bool {
    pattern.as_ref().is_some_and(|re| re.is_match(value))
}

fn strip(pattern: &LazyLock<Option<Regex>>, value: &str) -> String {
    match pattern.as_ref() {
        Some(re) => re.replace_all(value, "").into_owned(),
        None => value.to_string(),
    }
}

/// Remove script blocks, HTML tags and quote/statement characters, then trim.
pub fn sanitize(input: &str) -> String {
    let without_scripts = strip(&SCRIPT_TAG, input);
    let without_tags = strip(&HTML_TAG, &without_scripts);
    without_tags
        .chars()
        .filter(|c| !matches!(c, '\'' | '"' | ';' | '`'))
        .collect::<String>()
        .trim()
        .to_string()
}

/// Multipart submission as received, before validation.
#[derive(Debug, Default, Clone)]
pub struct RawSubmission {
    pub fields: HashMap<String, String>,
    pub files: Vec<UploadedFile>,
}

/// Submission that passed validation.
#[derive(Debug, Clone)]
pub struct ValidSubmission {
    pub fields: SubmitterFields,
    /// Payment proof first, then optional social proofs.
    pub files: Vec<UploadedFile>,
}

impl RawSubmission {
    fn text(&self, name: &str) -> String {
        self.fields
            .get(name)
            .map(|v| sanitize(v))
            .unwrap_or_default()
    }

    /// Validate every field and file, collecting all messages.
    pub fn validate(
        self,
        max_upload_bytes: usize,
    ) -> Result<ValidSubmission, BTreeMap<String, String>> {
        let mut errors = BTreeMap::new();
        let mut reject = |field: &str, message: &str| {
            errors
                .entry(field.to_string())
                .or_insert_with(|| message.to_string());
        };

        let name = self.text("name");
        if !NAME_LEN.contains(&name.chars().count()) || !is_match(&NAME, &name) {
            reject("name", MSG_INVALID_NAME);
        }

        let email = self.text("email");
        if !is_match(&EMAIL, &email) {
            reject("email", MSG_INVALID_EMAIL);
        }

        let phone = self.text("phone");
        if !is_match(&PHONE, &phone) {
            reject("phone", MSG_INVALID_PHONE);
        }

        let age = match self.text("age").parse::<i32>() {
            Ok(age) if (MIN_AGE..=MAX_AGE).contains(&age) => age,
            _ => {
                reject("age", MSG_INVALID_AGE);
                0
            }
        };

        let city = self.text("city");
        if city.chars().count() > MAX_CITY_LEN || !is_match(&CITY, &city) {
            reject("city", MSG_INVALID_CITY);
        }

        let instagram_raw = self.text("instagramUsername");
        let instagram_username = instagram_raw
            .strip_prefix('@')
            .unwrap_or(&instagram_raw)
            .to_string();
        if !is_match(&INSTAGRAM, &instagram_username) {
            reject("instagramUsername", MSG_INVALID_INSTAGRAM);
        }

        let vest_size = match self.text("vestSize").parse::<VestSize>() {
            Ok(size) => Some(size),
            Err(_) => {
                reject("vestSize", MSG_INVALID_VEST_SIZE);
                None
            }
        };

        let history = self.text("participationHistory");
        if history.chars().count() > MAX_HISTORY_LEN {
            reject("participationHistory", MSG_HISTORY_TOO_LONG);
        }
        let participation_history = if history.is_empty() {
            DEFAULT_PARTICIPATION_HISTORY.to_string()
        } else {
            history
        };

        let mut files: Vec<UploadedFile> = Vec::with_capacity(3);
        for kind in ArtifactKind::ALL {
            // Browsers send an empty part for an untouched optional input
            let Some(file) = self
                .files
                .iter()
                .find(|f| f.kind == kind && !(f.bytes.is_empty() && f.original_name.is_empty()))
            else {
                if kind == ArtifactKind::PaymentProof {
                    reject(kind.form_field(), MSG_PAYMENT_REQUIRED);
                }
                continue;
            };

            if let Some(message) = check_file(file, max_upload_bytes) {
                reject(kind.form_field(), message);
            } else {
                files.push(file.clone());
            }
        }

        match vest_size {
            Some(vest_size) if errors.is_empty() => Ok(ValidSubmission {
                fields: SubmitterFields {
                    name,
                    email,
                    phone,
                    age,
                    city,
                    instagram_username,
                    participation_history,
                    vest_size,
                },
                files,
            }),
            _ => Err(errors),
        }
    }
}

/// First rule a file breaks, if any.
fn check_file(file: &UploadedFile, max_upload_bytes: usize) -> Option<&'static str> {
    let content_type = file.content_type.trim().to_ascii_lowercase();
    let Some((_, extensions)) = ALLOWED_TYPES.iter().find(|(mime, _)| *mime == content_type)
    else {
        return Some(MSG_FILE_TYPE);
    };

    match file.extension() {
        Some(ext) if extensions.contains(&ext.as_str()) => {}
        _ => return Some(MSG_FILE_EXTENSION),
    }

    if file.size() < MIN_UPLOAD_BYTES {
        return Some(MSG_FILE_TOO_SMALL);
    }
    if file.size() > max_upload_bytes {
        return Some(MSG_FILE_TOO_LARGE);
    }

    None
}
