//! HTTP request handlers for the Registration Service.

pub mod event_details;
pub mod health;
pub mod metrics;
pub mod registration;
pub mod status;

pub use event_details::get_event_details;
pub use health::health_check;
pub use metrics::metrics_handler;
pub use registration::register;
pub use status::get_status;
