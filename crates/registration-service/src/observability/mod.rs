//! Observability module for the registration service.
//!
//! Provides metrics definitions and the Prometheus recorder setup.

pub mod metrics;
