//! Notification dispatcher worker.
//!
//! Request handlers enqueue jobs through a [`DispatcherHandle`] and return
//! without waiting. A single worker task owns all retry and backoff state;
//! each job runs on its own child task so a slow backoff never delays other
//! jobs. Job state lives only in memory and is lost on crash.

use crate::observability::metrics;
use crate::services::artifact_sink::ArtifactSink;
use crate::services::chat_client::{ChatClient, ChatError};
use crate::services::notification::SHEET_HEADER;
use crate::tasks::retry::{run_with_retry, DeliveryState, RetryPolicy};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Queue depth between request handlers and the worker.
pub const DISPATCH_QUEUE_CAPACITY: usize = 1024;

/// Kind of operator notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    NewRegistration,
    /// One-off alert sent when an event was closed by reaching its quota.
    CapacityFull,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::NewRegistration => "new_registration",
            NotificationKind::CapacityFull => "capacity_full",
        }
    }
}

/// Message for every configured operator chat.
#[derive(Debug, Clone)]
pub struct NotificationJob {
    pub kind: NotificationKind,
    pub text: String,
}

/// Unit of detached work.
#[derive(Debug, Clone)]
pub enum Job {
    Notify(NotificationJob),
    /// Append one registration row to the event sheet.
    SheetSync { sheet: String, row: Vec<String> },
}

impl Job {
    fn label(&self) -> &'static str {
        match self {
            Job::Notify(job) => job.kind.as_str(),
            Job::SheetSync { .. } => "sheet_sync",
        }
    }
}

/// Delivers jobs to their collaborators.
#[derive(Clone)]
pub struct Dispatcher {
    chat: Option<Arc<dyn ChatClient>>,
    sink: Option<Arc<dyn ArtifactSink>>,
    recipients: Arc<[String]>,
    policy: RetryPolicy,
}

impl Dispatcher {
    /// `chat` is `None` when no chat credentials are configured; notification
    /// jobs are then dropped. `sink` is `None` when sheet sync is disabled.
    pub fn new(
        chat: Option<Arc<dyn ChatClient>>,
        sink: Option<Arc<dyn ArtifactSink>>,
        recipients: Vec<String>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            chat,
            sink,
            recipients: recipients.into(),
            policy,
        }
    }

    /// Run a job to a terminal state.
    #[instrument(skip_all, name = "reg.task.dispatch", fields(job = job.label()))]
    pub async fn deliver(&self, job: Job) -> DeliveryState {
        match job {
            Job::Notify(notification) => self.notify(notification).await,
            Job::SheetSync { sheet, row } => self.sync_row(&sheet, &row).await,
        }
    }

    async fn notify(&self, job: NotificationJob) -> DeliveryState {
        let kind = job.kind.as_str();
        let Some(chat) = self.chat.as_ref() else {
            debug!(target: "reg.task.dispatcher", kind, "Chat not configured, notification dropped");
            metrics::record_notification(kind, "skipped");
            return DeliveryState::GivenUp { attempts: 0 };
        };
        if self.recipients.is_empty() {
            debug!(target: "reg.task.dispatcher", kind, "No recipients configured, notification dropped");
            metrics::record_notification(kind, "skipped");
            return DeliveryState::GivenUp { attempts: 0 };
        }

        let policy = match job.kind {
            NotificationKind::NewRegistration => self.policy,
            NotificationKind::CapacityFull => RetryPolicy::single_attempt(),
        };

        let state = run_with_retry(&policy, kind, |attempt| {
            let text = job.text.as_str();
            async move {
                let result = fan_out(chat.as_ref(), &self.recipients, text).await;
                metrics::record_notification_attempt(kind, result.is_ok());
                if let Err(e) = &result {
                    debug!(target: "reg.task.dispatcher", kind, attempt, error = %e, "Attempt failed");
                }
                result
            }
        })
        .await;

        metrics::record_notification(kind, state.outcome_label());
        match state {
            DeliveryState::Delivered { attempts } => {
                info!(target: "reg.task.dispatcher", kind, attempts, "Notification delivered");
            }
            _ => {
                warn!(target: "reg.task.dispatcher", kind, state = ?state, "Notification dropped");
            }
        }
        state
    }

    async fn sync_row(&self, sheet: &str, row: &[String]) -> DeliveryState {
        let Some(sink) = self.sink.as_ref() else {
            metrics::record_sheet_sync("skipped");
            return DeliveryState::GivenUp { attempts: 0 };
        };

        let state = run_with_retry(&self.policy, "sheet_sync", |_| {
            sink.append_row(sheet, &SHEET_HEADER, row)
        })
        .await;

        match state {
            DeliveryState::Delivered { attempts } => {
                metrics::record_sheet_sync("success");
                info!(target: "reg.task.dispatcher", sheet = %sheet, attempts, "Sheet row appended");
            }
            _ => {
                metrics::record_sheet_sync("error");
                warn!(target: "reg.task.dispatcher", sheet = %sheet, state = ?state, "Sheet row dropped");
            }
        }
        state
    }
}

/// Send `text` to every recipient concurrently. One failure fails the attempt.
async fn fan_out(
    chat: &dyn ChatClient,
    recipients: &[String],
    text: &str,
) -> Result<(), ChatError> {
    let sends = recipients.iter().map(|id| chat.send_message(id, text));
    let mut first_error = None;
    for result in join_all(sends).await {
        if let Err(e) = result {
            first_error.get_or_insert(e);
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Enqueues jobs for the worker. Cheap to clone.
#[derive(Clone)]
pub struct DispatcherHandle {
    tx: mpsc::Sender<Job>,
}

impl DispatcherHandle {
    /// Enqueue without waiting. A full or closed queue drops the job.
    pub fn dispatch(&self, job: Job) {
        let label = job.label();
        let sheet_sync = matches!(job, Job::SheetSync { .. });
        if let Err(e) = self.tx.try_send(job) {
            let reason = match e {
                mpsc::error::TrySendError::Full(_) => "queue full",
                mpsc::error::TrySendError::Closed(_) => "worker stopped",
            };
            warn!(target: "reg.task.dispatcher", job = label, reason, "Job dropped");
            if sheet_sync {
                metrics::record_sheet_sync("dropped");
            } else {
                metrics::record_notification(label, "dropped");
            }
        }
    }

    /// Handle whose jobs land in the returned receiver; for tests.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Job>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

/// Spawn the dispatcher worker.
///
/// On cancellation the worker stops receiving, starts the jobs still in the
/// queue, and waits up to `drain_period` for in-flight jobs before aborting
/// them.
pub fn spawn_dispatcher(
    dispatcher: Dispatcher,
    drain_period: Duration,
    cancel_token: CancellationToken,
) -> (DispatcherHandle, JoinHandle<()>) {
    let (handle, rx) = DispatcherHandle::channel(DISPATCH_QUEUE_CAPACITY);
    let worker = tokio::spawn(run_dispatcher(dispatcher, rx, drain_period, cancel_token));
    (handle, worker)
}

#[instrument(skip_all, name = "reg.task.dispatcher")]
async fn run_dispatcher(
    dispatcher: Dispatcher,
    mut rx: mpsc::Receiver<Job>,
    drain_period: Duration,
    cancel_token: CancellationToken,
) {
    info!(target: "reg.task.dispatcher", "Starting notification dispatcher");

    let mut in_flight = JoinSet::new();

    loop {
        tokio::select! {
            received = rx.recv() => {
                match received {
                    Some(job) => {
                        let dispatcher = dispatcher.clone();
                        in_flight.spawn(async move { dispatcher.deliver(job).await });
                    }
                    None => {
                        debug!(target: "reg.task.dispatcher", "All handles dropped");
                        break;
                    }
                }
            }
            Some(_) = in_flight.join_next(), if !in_flight.is_empty() => {}
            () = cancel_token.cancelled() => {
                info!(target: "reg.task.dispatcher", "Dispatcher received shutdown signal");
                break;
            }
        }
    }

    rx.close();
    while let Some(job) = rx.recv().await {
        let dispatcher = dispatcher.clone();
        in_flight.spawn(async move { dispatcher.deliver(job).await });
    }

    let pending = in_flight.len();
    if pending > 0 {
        info!(target: "reg.task.dispatcher", pending, "Draining in-flight jobs");
        let drained = tokio::time::timeout(drain_period, async {
            while in_flight.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(
                target: "reg.task.dispatcher",
                remaining = in_flight.len(),
                "Drain period elapsed, aborting remaining jobs"
            );
            in_flight.shutdown().await;
        }
    }

    info!(target: "reg.task.dispatcher", "Notification dispatcher stopped");
}
