//! Shared building blocks for the volunteer registration services.

#![warn(clippy::pedantic)]

/// Module for secret types that prevent accidental logging
pub mod secret;

/// Module for Google OAuth 2.0 token management with automatic refresh
pub mod token_manager;
