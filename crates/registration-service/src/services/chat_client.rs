//! Operator chat client (Telegram Bot API).
//!
//! One `send_message` call delivers one text to one chat. Fan-out to
//! several chats and retries are the dispatcher's job.
//!
//! # Security
//!
//! - The bot token is part of the request path; it never appears in logs
//!   or error messages
//! - Timeouts prevent hanging connections

use crate::config::TelegramConfig;
use common::secret::{ExposeSecret, SecretString};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, instrument, warn};

/// Default timeout for chat requests in seconds.
const CHAT_REQUEST_TIMEOUT_SECS: u64 = 10;

/// Chat delivery error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChatError {
    /// Network failure or 5xx.
    #[error("Chat service unavailable: {0}")]
    Unavailable(String),

    /// The chat service refused the message (bad chat id, bot blocked, ...).
    #[error("Message rejected with HTTP {0}")]
    Rejected(u16),

    #[error("Chat client error: {0}")]
    Internal(String),
}

/// Sends text messages to operator chats.
#[async_trait::async_trait]
pub trait ChatClient: Send + Sync {
    async fn send_message(&self, chat_id: &str, text: &str) -> Result<(), ChatError>;
}

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'static str,
    disable_web_page_preview: bool,
}

/// Telegram Bot API client.
#[derive(Clone)]
pub struct TelegramClient {
    client: Client,
    api_base: String,
    bot_token: SecretString,
}

impl TelegramClient {
    /// Create a client for the configured bot.
    ///
    /// # Errors
    ///
    /// Returns `ChatError::Internal` if the HTTP client cannot be built.
    pub fn new(config: &TelegramConfig) -> Result<Self, ChatError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(CHAT_REQUEST_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| {
                error!(target: "reg.services.chat", error = %e, "Failed to build HTTP client");
                ChatError::Internal("Failed to build HTTP client".to_string())
            })?;

        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            bot_token: config.bot_token.clone(),
        })
    }
}

#[async_trait::async_trait]
impl ChatClient for TelegramClient {
    #[instrument(skip_all, name = "reg.chat.send", fields(chat_id = %chat_id))]
    async fn send_message(&self, chat_id: &str, text: &str) -> Result<(), ChatError> {
        let url = format!(
            "{}/bot{}/sendMessage",
            self.api_base,
            self.bot_token.expose_secret()
        );

        let response = self
            .client
            .post(&url)
            .json(&SendMessageRequest {
                chat_id,
                text,
                parse_mode: "Markdown",
                disable_web_page_preview: false,
            })
            .send()
            .await
            .map_err(|e| {
                // reqwest errors embed the URL, which contains the token
                let reason = if e.is_timeout() { "timeout" } else { "connection failed" };
                warn!(target: "reg.services.chat", chat_id = %chat_id, reason, "Chat request failed");
                ChatError::Unavailable(reason.to_string())
            })?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else if status.is_server_error() || status.as_u16() == 429 {
            warn!(target: "reg.services.chat", chat_id = %chat_id, status = %status, "Chat service returned server error");
            Err(ChatError::Unavailable(format!("HTTP {status}")))
        } else {
            let body = response.text().await.unwrap_or_default();
            warn!(target: "reg.services.chat", chat_id = %chat_id, status = %status, body = %body, "Chat service rejected message");
            Err(ChatError::Rejected(status.as_u16()))
        }
    }
}

/// Mock chat client for testing.
///
/// This module provides a mock implementation of the chat client for use in tests.
pub mod mock {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::time::Instant;

    /// Message recorded by the mock.
    #[derive(Debug, Clone)]
    pub struct SentMessage {
        pub chat_id: String,
        pub text: String,
        /// Tokio clock at the time of the call, so paused-time tests can measure gaps.
        pub at: Instant,
    }

    /// Mock chat client for unit testing.
    pub struct MockChatClient {
        /// Calls that fail before calls start succeeding.
        failures_remaining: AtomicUsize,
        /// Chat that always fails, if any.
        failing_chat: Option<String>,
        call_count: AtomicUsize,
        calls: Mutex<Vec<SentMessage>>,
        delivered: Mutex<Vec<SentMessage>>,
    }

    impl MockChatClient {
        /// Create a mock that delivers every message.
        pub fn accepting() -> Self {
            Self::failing_first(0)
        }

        /// Create a mock whose first `count` calls fail.
        pub fn failing_first(count: usize) -> Self {
            Self {
                failures_remaining: AtomicUsize::new(count),
                failing_chat: None,
                call_count: AtomicUsize::new(0),
                calls: Mutex::new(Vec::new()),
                delivered: Mutex::new(Vec::new()),
            }
        }

        /// Create a mock that always fails.
        pub fn failing() -> Self {
            Self::failing_first(usize::MAX)
        }

        /// Create a mock that always fails for `chat_id` only.
        pub fn failing_chat(chat_id: &str) -> Self {
            Self {
                failing_chat: Some(chat_id.to_string()),
                ..Self::accepting()
            }
        }

        /// Get the number of calls made.
        pub fn call_count(&self) -> usize {
            self.call_count.load(Ordering::SeqCst)
        }

        /// Every call, failed ones included.
        pub fn calls(&self) -> Vec<SentMessage> {
            self.calls.lock().map(|c| c.clone()).unwrap_or_default()
        }

        /// Successfully delivered messages.
        pub fn delivered(&self) -> Vec<SentMessage> {
            self.delivered.lock().map(|d| d.clone()).unwrap_or_default()
        }
    }

    #[async_trait::async_trait]
    impl ChatClient for MockChatClient {
        async fn send_message(&self, chat_id: &str, text: &str) -> Result<(), ChatError> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            let message = SentMessage {
                chat_id: chat_id.to_string(),
                text: text.to_string(),
                at: Instant::now(),
            };
            if let Ok(mut calls) = self.calls.lock() {
                calls.push(message.clone());
            }

            if self.failing_chat.as_deref() == Some(chat_id) {
                return Err(ChatError::Rejected(400));
            }
            let failing = self
                .failures_remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(ChatError::Unavailable("simulated outage".to_string()));
            }

            if let Ok(mut delivered) = self.delivered.lock() {
                delivered.push(message);
            }
            Ok(())
        }
    }
}
