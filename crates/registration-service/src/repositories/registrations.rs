//! Registrations repository.
//!
//! Inserting a registration and committing its reserved slot happen in one
//! transaction. The insert is keyed on `(event_id, registration_number)`, so
//! replaying the same reservation never double-counts.

use crate::errors::StoreError;
use crate::models::{ArtifactKind, ArtifactLinks, ArtifactRef, CommitReceipt, NewRegistration};
use sqlx::PgPool;
use tracing::instrument;

/// Registration row as stored, used by operator tooling and tests.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RegistrationRow {
    pub registration_number: i32,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub age: i32,
    pub city: String,
    pub instagram_username: String,
    pub participation_history: String,
    pub vest_size: String,
    pub payment_proof_url: String,
    pub tiktok_proof_url: Option<String>,
    pub instagram_proof_url: Option<String>,
}

fn link_of(artifacts: &ArtifactLinks, kind: ArtifactKind) -> Option<&str> {
    artifacts
        .iter()
        .find(|a: &&ArtifactRef| a.kind == kind)
        .map(|a| a.link.as_str())
}

/// Repository for registration rows.
pub struct RegistrationsRepository;

impl RegistrationsRepository {
    /// Persist a registration and move its slot from reserved to committed.
    #[instrument(skip_all, fields(event_id = %event_id, registration_number = registration.registration_number))]
    pub async fn insert_and_commit(
        pool: &PgPool,
        event_id: &str,
        registration: &NewRegistration,
    ) -> Result<CommitReceipt, StoreError> {
        let mut tx = pool.begin().await?;
        let fields = &registration.fields;

        let inserted: Option<(i64,)> = sqlx::query_as(
            r#"
            INSERT INTO registrations (
                event_id, registration_number, name, email, phone, age, city,
                instagram_username, participation_history, vest_size,
                payment_proof_url, tiktok_proof_url, instagram_proof_url
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (event_id, registration_number) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(event_id)
        .bind(registration.registration_number)
        .bind(&fields.name)
        .bind(&fields.email)
        .bind(&fields.phone)
        .bind(fields.age)
        .bind(&fields.city)
        .bind(&fields.instagram_username)
        .bind(&fields.participation_history)
        .bind(fields.vest_size.as_str())
        .bind(&registration.artifacts.payment.link)
        .bind(link_of(&registration.artifacts, ArtifactKind::TiktokProof))
        .bind(link_of(&registration.artifacts, ArtifactKind::InstagramProof))
        .fetch_optional(&mut *tx)
        .await?;

        let newly_inserted = inserted.is_some();

        let (current_count, max_quota): (i32, i32) = if newly_inserted {
            sqlx::query_as(
                r#"
                UPDATE event_capacity
                SET current_count = current_count + 1,
                    reserved_count = GREATEST(reserved_count - 1, 0),
                    updated_at = NOW()
                WHERE event_id = $1
                RETURNING current_count, max_quota
                "#,
            )
            .bind(event_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| StoreError::EventNotFound(event_id.to_string()))?
        } else {
            sqlx::query_as("SELECT current_count, max_quota FROM event_capacity WHERE event_id = $1")
                .bind(event_id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or_else(|| StoreError::EventNotFound(event_id.to_string()))?
        };

        tx.commit().await?;

        Ok(CommitReceipt {
            current_count,
            max_quota,
            newly_inserted,
        })
    }

    /// Whether a registration row with this number exists.
    #[instrument(skip_all, fields(event_id = %event_id, registration_number = registration_number))]
    pub async fn exists(
        pool: &PgPool,
        event_id: &str,
        registration_number: i32,
    ) -> Result<bool, StoreError> {
        let (exists,): (bool,) = sqlx::query_as(
            "SELECT EXISTS(SELECT 1 FROM registrations WHERE event_id = $1 AND registration_number = $2)",
        )
        .bind(event_id)
        .bind(registration_number)
        .fetch_one(pool)
        .await?;

        Ok(exists)
    }

    /// All registrations of an event, lowest number first.
    #[instrument(skip_all, fields(event_id = %event_id))]
    pub async fn list_for_event(
        pool: &PgPool,
        event_id: &str,
    ) -> Result<Vec<RegistrationRow>, StoreError> {
        let rows = sqlx::query_as(
            r#"
            SELECT registration_number, name, email, phone, age, city,
                   instagram_username, participation_history, vest_size,
                   payment_proof_url, tiktok_proof_url, instagram_proof_url
            FROM registrations
            WHERE event_id = $1
            ORDER BY registration_number
            "#,
        )
        .bind(event_id)
        .fetch_all(pool)
        .await?;

        Ok(rows)
    }
}
