//! Repository layer for the registration service.
//!
//! `EventStore` is the seam the services depend on. `PgEventStore` is the
//! production implementation over the Postgres repositories below;
//! `memory::InMemoryEventStore` backs unit and HTTP tests.

pub mod event_capacity;
pub mod event_settings;
pub mod memory;
pub mod registrations;

pub use event_capacity::EventCapacityRepository;
pub use event_settings::EventSettingsRepository;
pub use memory::InMemoryEventStore;
pub use registrations::{RegistrationRow, RegistrationsRepository};

use crate::errors::StoreError;
use crate::models::{seed_quota, CapacitySnapshot, CommitReceipt, NewRegistration, ReserveOutcome};
use sqlx::PgPool;
use std::collections::HashMap;

/// Transactional datastore operations used by the pipeline.
#[async_trait::async_trait]
pub trait EventStore: Send + Sync {
    /// Atomically check quota and claim a slot plus the next sequence number.
    async fn reserve(&self, event_id: &str) -> Result<ReserveOutcome, StoreError>;

    /// Return a reservation whose submission was abandoned.
    async fn release(&self, event_id: &str) -> Result<(), StoreError>;

    /// Persist a registration and commit its reserved slot in one transaction.
    ///
    /// Idempotent per `(event_id, registration_number)`.
    async fn insert_and_commit(
        &self,
        event_id: &str,
        registration: &NewRegistration,
    ) -> Result<CommitReceipt, StoreError>;

    /// Whether the registration under this number was persisted.
    async fn registration_exists(
        &self,
        event_id: &str,
        registration_number: i32,
    ) -> Result<bool, StoreError>;

    /// Counter and flag read together.
    async fn capacity(&self, event_id: &str) -> Result<CapacitySnapshot, StoreError>;

    /// Flip the flag to closed; `true` only on the transition.
    async fn close(&self, event_id: &str) -> Result<bool, StoreError>;

    /// Raw display settings.
    async fn settings(&self, event_id: &str) -> Result<HashMap<String, String>, StoreError>;

    /// Connectivity check for the health endpoint.
    async fn ping(&self) -> Result<(), StoreError>;
}

/// Postgres-backed `EventStore`.
#[derive(Clone)]
pub struct PgEventStore {
    pool: PgPool,
}

impl PgEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Make sure the event has a capacity row, seeding one if absent.
    ///
    /// The quota of a new row comes from the `max_quota` setting, falling
    /// back to `default_quota`. Returns `true` when a row was created.
    pub async fn ensure_event(&self, event_id: &str, default_quota: i32) -> Result<bool, StoreError> {
        let settings = EventSettingsRepository::get_all(&self.pool, event_id).await?;
        let quota = seed_quota(&settings, default_quota);
        EventCapacityRepository::ensure(&self.pool, event_id, quota).await
    }
}

#[async_trait::async_trait]
impl EventStore for PgEventStore {
    async fn reserve(&self, event_id: &str) -> Result<ReserveOutcome, StoreError> {
        EventCapacityRepository::reserve(&self.pool, event_id).await
    }

    async fn release(&self, event_id: &str) -> Result<(), StoreError> {
        EventCapacityRepository::release(&self.pool, event_id).await
    }

    async fn insert_and_commit(
        &self,
        event_id: &str,
        registration: &NewRegistration,
    ) -> Result<CommitReceipt, StoreError> {
        RegistrationsRepository::insert_and_commit(&self.pool, event_id, registration).await
    }

    async fn registration_exists(
        &self,
        event_id: &str,
        registration_number: i32,
    ) -> Result<bool, StoreError> {
        RegistrationsRepository::exists(&self.pool, event_id, registration_number).await
    }

    async fn capacity(&self, event_id: &str) -> Result<CapacitySnapshot, StoreError> {
        EventCapacityRepository::get(&self.pool, event_id).await
    }

    async fn close(&self, event_id: &str) -> Result<bool, StoreError> {
        EventCapacityRepository::close(&self.pool, event_id).await
    }

    async fn settings(&self, event_id: &str) -> Result<HashMap<String, String>, StoreError> {
        EventSettingsRepository::get_all(&self.pool, event_id).await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }
}
