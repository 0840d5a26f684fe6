//! Service layer for the Registration Service.
//!
//! This module contains the registration pipeline and the clients for the
//! external systems it coordinates.
//!
//! # Components
//!
//! - `artifact_relocator` - Uploads submitted files into the event folder hierarchy
//! - `artifact_sink` - Storage seam with Google Workspace and local file system backends
//! - `capacity_ledger` - Atomic slot reservation and sequence numbers
//! - `chat_client` - Telegram client for operator notifications
//! - `notification` - Operator message and sheet row composition
//! - `pipeline` - End-to-end submission flow
//! - `registration_recorder` - Persists registrations and closes full events
//! - `status_controller` - Fail-safe open/closed state

pub mod artifact_relocator;
pub mod artifact_sink;
pub mod capacity_ledger;
pub mod chat_client;
pub mod notification;
pub mod pipeline;
pub mod registration_recorder;
pub mod status_controller;

pub use artifact_relocator::ArtifactRelocator;
pub use artifact_sink::{ArtifactSink, GoogleWorkspaceSink, LocalArtifactSink};
pub use capacity_ledger::CapacityLedger;
pub use chat_client::{ChatClient, TelegramClient};
pub use pipeline::{PipelineSettings, RegistrationPipeline};
pub use registration_recorder::RegistrationRecorder;
pub use status_controller::StatusController;
