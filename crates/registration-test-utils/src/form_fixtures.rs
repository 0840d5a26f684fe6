//! Multipart form fixtures.
//!
//! `RegistrationForm::valid` passes every validation rule; tests then
//! break or extend it field by field.

use reqwest::multipart::{Form, Part};
use std::collections::BTreeMap;

/// Event served by `TestRegistrationServer`.
pub const TEST_EVENT_ID: &str = "test-event";

/// PNG signature followed by padding up to `size` bytes.
pub fn png_bytes(size: usize) -> Vec<u8> {
    let mut bytes = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
    bytes.resize(size.max(8), 0);
    bytes
}

/// File part of a form.
#[derive(Debug, Clone)]
pub struct FormFile {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl FormFile {
    /// 2 KiB PNG.
    pub fn png(file_name: &str) -> Self {
        Self {
            file_name: file_name.to_string(),
            content_type: "image/png".to_string(),
            bytes: png_bytes(2048),
        }
    }
}

/// Builder for a `POST /register` multipart body.
#[derive(Debug, Clone, Default)]
pub struct RegistrationForm {
    fields: BTreeMap<String, String>,
    files: BTreeMap<String, FormFile>,
}

impl RegistrationForm {
    /// Valid submission for `name` with a payment proof only.
    pub fn valid(name: &str) -> Self {
        Self::default()
            .with_field("name", name)
            .with_field("email", "budi@example.com")
            .with_field("phone", "081234567890")
            .with_field("age", "25")
            .with_field("city", "Jakarta")
            .with_field("instagramUsername", "@budisantoso")
            .with_field("vestSize", "xl")
            .with_field("participationHistory", "Bersih Pantai 2025")
            .with_file("paymentProof", FormFile::png("bukti.png"))
    }

    pub fn with_field(mut self, name: &str, value: &str) -> Self {
        self.fields.insert(name.to_string(), value.to_string());
        self
    }

    pub fn without_field(mut self, name: &str) -> Self {
        self.fields.remove(name);
        self
    }

    pub fn with_file(mut self, field: &str, file: FormFile) -> Self {
        self.files.insert(field.to_string(), file);
        self
    }

    pub fn without_file(mut self, field: &str) -> Self {
        self.files.remove(field);
        self
    }

    /// Add both optional social proofs.
    pub fn with_social_proofs(self) -> Self {
        self.with_file("tiktokProof", FormFile::png("tiktok.png"))
            .with_file("instagramProof", FormFile::png("ig.png"))
    }

    /// Build the multipart body.
    pub fn into_multipart(self) -> Result<Form, anyhow::Error> {
        let mut form = Form::new();
        for (name, value) in self.fields {
            form = form.text(name, value);
        }
        for (name, file) in self.files {
            let part = Part::bytes(file.bytes)
                .file_name(file.file_name)
                .mime_str(&file.content_type)?;
            form = form.part(name, part);
        }
        Ok(form)
    }
}
