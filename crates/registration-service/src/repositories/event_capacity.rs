//! Event capacity repository.
//!
//! Owns the `event_capacity` row of each event: committed count, reserved
//! count, quota, last handed-out sequence number and the open/closed flag.
//!
//! # Concurrency
//!
//! Reservation is a single conditional `UPDATE ... RETURNING`: the quota
//! check and the slot claim happen in one statement under the row lock, so
//! two racing reservations for the last slot cannot both succeed.

use crate::errors::StoreError;
use crate::models::{CapacitySnapshot, EventStatus, ReserveOutcome};
use sqlx::PgPool;
use tracing::instrument;

#[derive(Debug, sqlx::FromRow)]
struct CapacityRow {
    current_count: i32,
    reserved_count: i32,
    max_quota: i32,
    last_sequence: i32,
    status: String,
}

impl TryFrom<CapacityRow> for CapacitySnapshot {
    type Error = StoreError;

    fn try_from(row: CapacityRow) -> Result<Self, Self::Error> {
        Ok(CapacitySnapshot {
            current_count: row.current_count,
            reserved_count: row.reserved_count,
            max_quota: row.max_quota,
            last_sequence: row.last_sequence,
            status: row.status.parse().map_err(StoreError::Database)?,
        })
    }
}

/// Repository for the capacity counter and status flag.
pub struct EventCapacityRepository;

impl EventCapacityRepository {
    /// Create or reset the capacity row of an event.
    ///
    /// `last_sequence` starts at `current_count` so the next registration
    /// number is `current_count + 1`.
    #[instrument(skip_all, fields(event_id = %event_id))]
    pub async fn upsert(
        pool: &PgPool,
        event_id: &str,
        current_count: i32,
        max_quota: i32,
        status: EventStatus,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO event_capacity (event_id, current_count, reserved_count, max_quota, last_sequence, status)
            VALUES ($1, $2, 0, $3, $2, $4)
            ON CONFLICT (event_id) DO UPDATE SET
                current_count = EXCLUDED.current_count,
                reserved_count = 0,
                max_quota = EXCLUDED.max_quota,
                last_sequence = GREATEST(event_capacity.last_sequence, EXCLUDED.last_sequence),
                status = EXCLUDED.status,
                updated_at = NOW()
            "#,
        )
        .bind(event_id)
        .bind(current_count)
        .bind(max_quota)
        .bind(status.as_str())
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Create the capacity row of an event unless one exists.
    ///
    /// Returns `true` when a row was created. An existing row is left
    /// untouched, counts and quota included.
    #[instrument(skip_all, fields(event_id = %event_id, max_quota = max_quota))]
    pub async fn ensure(pool: &PgPool, event_id: &str, max_quota: i32) -> Result<bool, StoreError> {
        let created: Option<(String,)> = sqlx::query_as(
            r#"
            INSERT INTO event_capacity (event_id, current_count, reserved_count, max_quota, last_sequence, status)
            VALUES ($1, 0, 0, $2, 0, 'open')
            ON CONFLICT (event_id) DO NOTHING
            RETURNING event_id
            "#,
        )
        .bind(event_id)
        .bind(max_quota)
        .fetch_optional(pool)
        .await?;

        Ok(created.is_some())
    }

    /// Read counter and flag in one statement.
    #[instrument(skip_all, fields(event_id = %event_id))]
    pub async fn get(pool: &PgPool, event_id: &str) -> Result<CapacitySnapshot, StoreError> {
        let row: Option<CapacityRow> = sqlx::query_as(
            r#"
            SELECT current_count, reserved_count, max_quota, last_sequence, status
            FROM event_capacity
            WHERE event_id = $1
            "#,
        )
        .bind(event_id)
        .fetch_optional(pool)
        .await?;

        row.ok_or_else(|| StoreError::EventNotFound(event_id.to_string()))?
            .try_into()
    }

    /// Atomically claim a slot and the next sequence number.
    ///
    /// On a declined reservation the row is read again only to tell a full
    /// event from an operator-closed one; that read does not affect the outcome.
    #[instrument(skip_all, fields(event_id = %event_id))]
    pub async fn reserve(pool: &PgPool, event_id: &str) -> Result<ReserveOutcome, StoreError> {
        let claimed: Option<(i32,)> = sqlx::query_as(
            r#"
            UPDATE event_capacity
            SET reserved_count = reserved_count + 1,
                last_sequence = last_sequence + 1,
                updated_at = NOW()
            WHERE event_id = $1
              AND status = 'open'
              AND current_count + reserved_count < max_quota
            RETURNING last_sequence
            "#,
        )
        .bind(event_id)
        .fetch_optional(pool)
        .await?;

        if let Some((sequence_number,)) = claimed {
            return Ok(ReserveOutcome::Reserved { sequence_number });
        }

        let snapshot = Self::get(pool, event_id).await?;
        if snapshot.status == EventStatus::Closed && snapshot.remaining() > 0 {
            Ok(ReserveOutcome::Closed)
        } else {
            Ok(ReserveOutcome::QuotaExhausted)
        }
    }

    /// Return an abandoned reservation. The sequence number stays consumed.
    #[instrument(skip_all, fields(event_id = %event_id))]
    pub async fn release(pool: &PgPool, event_id: &str) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE event_capacity
            SET reserved_count = reserved_count - 1,
                updated_at = NOW()
            WHERE event_id = $1 AND reserved_count > 0
            "#,
        )
        .bind(event_id)
        .execute(pool)
        .await?;

        if result.rows_affected() == 0 {
            tracing::warn!(
                target: "reg.repositories.capacity",
                event_id = %event_id,
                "Release requested with no outstanding reservation"
            );
        }

        Ok(())
    }

    /// Flip the flag to closed. Returns `true` only for the call that made the transition.
    #[instrument(skip_all, fields(event_id = %event_id))]
    pub async fn close(pool: &PgPool, event_id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE event_capacity
            SET status = 'closed', updated_at = NOW()
            WHERE event_id = $1 AND status = 'open'
            "#,
        )
        .bind(event_id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}
