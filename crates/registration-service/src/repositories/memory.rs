//! In-memory `EventStore` for tests and local development.
//!
//! Every operation runs under one mutex, which gives the same atomicity the
//! conditional `UPDATE` provides in Postgres. Failure switches simulate an
//! unreachable datastore, transient commit errors and commits whose
//! acknowledgement is lost after they applied.

use super::EventStore;
use crate::errors::StoreError;
use crate::models::{
    CapacitySnapshot, CommitReceipt, EventStatus, NewRegistration, ReserveOutcome,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone)]
struct EventState {
    capacity: CapacitySnapshot,
    settings: HashMap<String, String>,
    registrations: BTreeMap<i32, NewRegistration>,
}

/// In-memory event store.
#[derive(Default)]
pub struct InMemoryEventStore {
    events: Mutex<HashMap<String, EventState>>,
    unavailable: AtomicBool,
    failing_commits: AtomicUsize,
    lost_commit_acks: AtomicUsize,
    commit_calls: AtomicUsize,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store with one open event. The next registration number is `current_count + 1`.
    pub fn with_event(event_id: &str, current_count: i32, max_quota: i32) -> Self {
        let store = Self::new();
        store.put_event(event_id, current_count, max_quota, EventStatus::Open);
        store
    }

    /// Create or reset an event.
    pub fn put_event(&self, event_id: &str, current_count: i32, max_quota: i32, status: EventStatus) {
        if let Ok(mut events) = self.events.lock() {
            events.insert(
                event_id.to_string(),
                EventState {
                    capacity: CapacitySnapshot {
                        current_count,
                        reserved_count: 0,
                        max_quota,
                        last_sequence: current_count,
                        status,
                    },
                    settings: HashMap::new(),
                    registrations: BTreeMap::new(),
                },
            );
        }
    }

    pub fn set_setting(&self, event_id: &str, key: &str, value: &str) {
        if let Ok(mut events) = self.events.lock() {
            if let Some(event) = events.get_mut(event_id) {
                event.settings.insert(key.to_string(), value.to_string());
            }
        }
    }

    /// Operator action on the flag.
    pub fn set_status(&self, event_id: &str, status: EventStatus) {
        if let Ok(mut events) = self.events.lock() {
            if let Some(event) = events.get_mut(event_id) {
                event.capacity.status = status;
            }
        }
    }

    /// Make every operation fail with `StoreError::Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Fail the next `count` calls to `insert_and_commit`.
    pub fn fail_next_commits(&self, count: usize) {
        self.failing_commits.store(count, Ordering::SeqCst);
    }

    /// Apply the next `count` commits but report them as failed.
    pub fn lose_next_commit_acks(&self, count: usize) {
        self.lost_commit_acks.store(count, Ordering::SeqCst);
    }

    /// Number of `insert_and_commit` calls, failed ones included.
    pub fn commit_calls(&self) -> usize {
        self.commit_calls.load(Ordering::SeqCst)
    }

    /// Persisted registrations, lowest number first.
    pub fn registrations(&self, event_id: &str) -> Vec<NewRegistration> {
        self.events
            .lock()
            .ok()
            .and_then(|events| {
                events
                    .get(event_id)
                    .map(|e| e.registrations.values().cloned().collect())
            })
            .unwrap_or_default()
    }

    /// Current counter and flag, bypassing the failure switches.
    pub fn snapshot(&self, event_id: &str) -> Option<CapacitySnapshot> {
        self.events
            .lock()
            .ok()
            .and_then(|events| events.get(event_id).map(|e| e.capacity))
    }

    fn guard(&self) -> Result<MutexGuard<'_, HashMap<String, EventState>>, StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable);
        }
        self.events.lock().map_err(|_| StoreError::Unavailable)
    }
}

fn event_mut<'a>(
    events: &'a mut HashMap<String, EventState>,
    event_id: &str,
) -> Result<&'a mut EventState, StoreError> {
    events
        .get_mut(event_id)
        .ok_or_else(|| StoreError::EventNotFound(event_id.to_string()))
}

#[async_trait::async_trait]
impl EventStore for InMemoryEventStore {
    async fn reserve(&self, event_id: &str) -> Result<ReserveOutcome, StoreError> {
        let mut events = self.guard()?;
        let capacity = &mut event_mut(&mut events, event_id)?.capacity;

        if capacity.status == EventStatus::Closed {
            return Ok(if capacity.remaining() > 0 {
                ReserveOutcome::Closed
            } else {
                ReserveOutcome::QuotaExhausted
            });
        }
        if capacity.current_count + capacity.reserved_count >= capacity.max_quota {
            return Ok(ReserveOutcome::QuotaExhausted);
        }

        capacity.reserved_count += 1;
        capacity.last_sequence += 1;
        Ok(ReserveOutcome::Reserved {
            sequence_number: capacity.last_sequence,
        })
    }

    async fn release(&self, event_id: &str) -> Result<(), StoreError> {
        let mut events = self.guard()?;
        let capacity = &mut event_mut(&mut events, event_id)?.capacity;
        capacity.reserved_count = (capacity.reserved_count - 1).max(0);
        Ok(())
    }

    async fn insert_and_commit(
        &self,
        event_id: &str,
        registration: &NewRegistration,
    ) -> Result<CommitReceipt, StoreError> {
        self.commit_calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failing_commits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StoreError::Database("simulated commit failure".to_string()));
        }

        let mut events = self.guard()?;
        let event = event_mut(&mut events, event_id)?;

        let newly_inserted = !event
            .registrations
            .contains_key(&registration.registration_number);
        if newly_inserted {
            event
                .registrations
                .insert(registration.registration_number, registration.clone());
            event.capacity.current_count += 1;
            event.capacity.reserved_count = (event.capacity.reserved_count - 1).max(0);
        }

        let ack_lost = self
            .lost_commit_acks
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if ack_lost {
            return Err(StoreError::Database("connection reset after commit".to_string()));
        }

        Ok(CommitReceipt {
            current_count: event.capacity.current_count,
            max_quota: event.capacity.max_quota,
            newly_inserted,
        })
    }

    async fn registration_exists(
        &self,
        event_id: &str,
        registration_number: i32,
    ) -> Result<bool, StoreError> {
        let mut events = self.guard()?;
        Ok(event_mut(&mut events, event_id)?
            .registrations
            .contains_key(&registration_number))
    }

    async fn capacity(&self, event_id: &str) -> Result<CapacitySnapshot, StoreError> {
        let mut events = self.guard()?;
        Ok(event_mut(&mut events, event_id)?.capacity)
    }

    async fn close(&self, event_id: &str) -> Result<bool, StoreError> {
        let mut events = self.guard()?;
        let capacity = &mut event_mut(&mut events, event_id)?.capacity;
        if capacity.status == EventStatus::Closed {
            return Ok(false);
        }
        capacity.status = EventStatus::Closed;
        Ok(true)
    }

    async fn settings(&self, event_id: &str) -> Result<HashMap<String, String>, StoreError> {
        let mut events = self.guard()?;
        Ok(event_mut(&mut events, event_id)?.settings.clone())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.guard().map(|_| ())
    }
}
