//! Event settings repository (`event_settings` key/value table).

use crate::errors::StoreError;
use sqlx::PgPool;
use std::collections::HashMap;
use tracing::instrument;

/// Repository for operator-managed display settings.
pub struct EventSettingsRepository;

impl EventSettingsRepository {
    /// All settings of an event as a key/value map.
    #[instrument(skip_all, fields(event_id = %event_id))]
    pub async fn get_all(
        pool: &PgPool,
        event_id: &str,
    ) -> Result<HashMap<String, String>, StoreError> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT key, value FROM event_settings WHERE event_id = $1")
                .bind(event_id)
                .fetch_all(pool)
                .await?;

        Ok(rows.into_iter().collect())
    }

    #[instrument(skip_all, fields(event_id = %event_id, key = %key))]
    pub async fn upsert(
        pool: &PgPool,
        event_id: &str,
        key: &str,
        value: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO event_settings (event_id, key, value)
            VALUES ($1, $2, $3)
            ON CONFLICT (event_id, key) DO UPDATE SET value = EXCLUDED.value, updated_at = NOW()
            "#,
        )
        .bind(event_id)
        .bind(key)
        .bind(value)
        .execute(pool)
        .await?;

        Ok(())
    }
}
