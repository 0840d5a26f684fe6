//! Registration Service Library
//!
//! Capacity-limited volunteer event registration. Each accepted submission
//! receives a unique, strictly increasing registration number; its files
//! are relocated into an event-scoped folder hierarchy and operators are
//! notified off the request path.
//!
//! # Architecture
//!
//! Handler -> Service -> Repository, with detached work in `tasks`:
//!
//! ```text
//! routes/mod.rs -> handlers/*.rs -> services/*.rs -> repositories/*.rs
//!                                        |
//!                                        +-> tasks/dispatcher.rs (notifications, sheet rows)
//! ```
//!
//! # Modules
//!
//! - `config` - Service configuration from environment
//! - `errors` - Error types with HTTP status code mapping
//! - `handlers` - HTTP request handlers
//! - `middleware` - HTTP metrics middleware
//! - `models` - Data models and API envelopes
//! - `observability` - Prometheus metrics
//! - `repositories` - Datastore access behind the `EventStore` seam
//! - `routes` - Axum router setup
//! - `services` - Registration pipeline and external clients
//! - `tasks` - Background dispatcher worker

pub mod config;
pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod observability;
pub mod repositories;
pub mod routes;
pub mod services;
pub mod tasks;
