//! Background tasks for the Registration Service.
//!
//! Work that must not hold up the submitter's response runs here.
//!
//! # Tasks
//!
//! - `dispatcher` - Delivers operator notifications and sheet rows off the request path
//! - `retry` - Bounded retry with exponential backoff used by the dispatcher

pub mod dispatcher;
pub mod retry;

pub use dispatcher::{
    spawn_dispatcher, Dispatcher, DispatcherHandle, Job, NotificationJob, NotificationKind,
};
pub use retry::{DeliveryState, RetryPolicy};
