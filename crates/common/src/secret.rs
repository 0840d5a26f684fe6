//! Secret types for protecting sensitive values from accidental logging.
//!
//! Re-exports the [`secrecy`] wrappers used for every credential the
//! registration pipeline handles: the chat bot token, OAuth client secrets,
//! refresh tokens, service-account private keys and access tokens.
//!
//! `SecretString` implements `Debug` with redaction, so any struct deriving
//! `Debug` that holds one stays safe to log via `{:?}` or tracing fields.
//! Values are zeroized on drop.
//!
//! # Example
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct BotCredentials {
//!     bot_name: String,
//!     token: SecretString,
//! }
//!
//! let creds = BotCredentials {
//!     bot_name: "registrations".to_string(),
//!     token: SecretString::from("123456:ABC"),
//! };
//!
//! assert!(!format!("{creds:?}").contains("123456:ABC"));
//! let raw: &str = creds.token.expose_secret();
//! assert_eq!(raw, "123456:ABC");
//! ```
//!
//! With the `serde` feature (enabled workspace-wide), secrets deserialize
//! directly from JSON, which is how service-account key files are loaded.

pub use secrecy::{ExposeSecret, SecretBox, SecretString};

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn test_debug_is_redacted() {
        let secret = SecretString::from("1//0g-refresh-token");
        let debug_str = format!("{secret:?}");

        assert!(debug_str.contains("REDACTED"));
        assert!(!debug_str.contains("refresh-token"));
    }

    #[test]
    fn test_struct_with_secret_is_safe() {
        #[allow(dead_code)]
        #[derive(Debug)]
        struct ChatCredentials {
            chat_ids: Vec<String>,
            bot_token: SecretString,
        }

        let creds = ChatCredentials {
            chat_ids: vec!["-100123".to_string()],
            bot_token: SecretString::from("987654:XYZ"),
        };

        let debug_str = format!("{creds:?}");

        assert!(debug_str.contains("-100123"));
        assert!(debug_str.contains("REDACTED"));
        assert!(!debug_str.contains("987654:XYZ"));
    }

    #[test]
    fn test_deserialize_key_file_field() {
        #[allow(dead_code)]
        #[derive(Debug, Deserialize)]
        struct KeyFile {
            client_email: String,
            private_key: SecretString,
        }

        let json = r#"{"client_email": "bot@example.iam", "private_key": "pem-body"}"#;
        let key: KeyFile = serde_json::from_str(json).expect("deserialize");

        assert_eq!(key.private_key.expose_secret(), "pem-body");
        assert!(!format!("{key:?}").contains("pem-body"));
    }
}
