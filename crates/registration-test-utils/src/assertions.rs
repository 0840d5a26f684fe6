//! Custom test assertions for response envelopes.
//!
//! # Example
//! ```rust,ignore
//! body.assert_registered(51, "Budi Santoso");
//! body.assert_field_error("email");
//! ```

use serde_json::Value;

/// Assertions on a decoded `{success, data | error | errors}` body.
pub trait ResponseAssertions {
    /// Assert `{success: true, data: {registrationNumber, name}}`.
    fn assert_registered(&self, registration_number: i64, name: &str) -> &Self;

    /// Assert `{success: false, error: message}`.
    fn assert_error(&self, message: &str) -> &Self;

    /// Assert `{success: false, errors: {field: ...}}`.
    fn assert_field_error(&self, field: &str) -> &Self;

    /// Assert `{success: true, data: {isOpen}}`.
    fn assert_open(&self, is_open: bool) -> &Self;
}

impl ResponseAssertions for Value {
    fn assert_registered(&self, registration_number: i64, name: &str) -> &Self {
        assert_eq!(self["success"], true, "expected success, got {self}");
        assert_eq!(
            self["data"]["registrationNumber"].as_i64(),
            Some(registration_number),
            "unexpected registration number in {self}"
        );
        assert_eq!(self["data"]["name"], name, "unexpected name in {self}");
        self
    }

    fn assert_error(&self, message: &str) -> &Self {
        assert_eq!(self["success"], false, "expected failure, got {self}");
        assert_eq!(self["error"], message, "unexpected error in {self}");
        self
    }

    fn assert_field_error(&self, field: &str) -> &Self {
        assert_eq!(self["success"], false, "expected failure, got {self}");
        assert!(
            self["errors"].get(field).is_some(),
            "expected an error for '{field}' in {self}"
        );
        self
    }

    fn assert_open(&self, is_open: bool) -> &Self {
        assert_eq!(self["success"], true, "expected success, got {self}");
        assert_eq!(self["data"]["isOpen"], is_open, "unexpected status in {self}");
        self
    }
}
