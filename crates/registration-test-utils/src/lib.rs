//! # Registration Test Utilities
//!
//! Shared test utilities for the Registration Service.
//!
//! This crate provides:
//! - Server test harness (`TestRegistrationServer` for E2E tests)
//! - Multipart form fixtures (`RegistrationForm`)
//! - Custom assertions on response envelopes (`ResponseAssertions`)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use registration_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() -> Result<(), anyhow::Error> {
//!     let store = Arc::new(InMemoryEventStore::with_event(TEST_EVENT_ID, 50, 100));
//!     let server = TestRegistrationServer::spawn(store).await?;
//!
//!     let (status, body) = server.submit(RegistrationForm::valid("Budi Santoso")).await?;
//!     assert_eq!(status, 200);
//!     body.assert_registered(51, "Budi Santoso");
//!     Ok(())
//! }
//! ```

pub mod assertions;
pub mod form_fixtures;
pub mod server_harness;

// Re-export commonly used items
pub use assertions::*;
pub use form_fixtures::*;
pub use server_harness::*;
