use crate::config::RecordStoreConfig;
use crate::messages::MetadataField;
use crate::store::{RecordStore, RecordUpdate};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Record store backed by PostgreSQL.
///
/// Every write is a single upsert statement, so partial updates are atomic
/// and never read-modify-write across the disjoint field groups.
pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    /// Create a record store with a connection pool
    pub async fn connect(config: &RecordStoreConfig) -> Result<Self> {
        let url = config
            .url
            .as_deref()
            .context("record_store.url is required for the postgres backend")?;

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect(url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        info!("Connected to PostgreSQL record store");

        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running record store migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run migrations")?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl RecordStore for PgRecordStore {
    #[instrument(skip(self))]
    async fn put(&self, id: &str, created_at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO image_records (id, created_at)
            VALUES ($1, $2)
            ON CONFLICT (id) DO UPDATE SET
                created_at = EXCLUDED.created_at,
                caption = NULL,
                date = NULL,
                name = NULL,
                status = NULL,
                reason = NULL,
                reviewed_at = NULL
            "#,
        )
        .bind(id)
        .bind(created_at)
        .execute(&self.pool)
        .await
        .context("Failed to put image record")?;

        debug!(id = %id, "Image record created");
        Ok(())
    }

    #[instrument(skip(self, update))]
    async fn update_fields(&self, id: &str, update: RecordUpdate) -> Result<()> {
        match update {
            RecordUpdate::Metadata { field, value } => {
                // The target column is chosen from the closed field set, never
                // from message content.
                let sql = match field {
                    MetadataField::Caption => {
                        r#"
                        INSERT INTO image_records (id, caption) VALUES ($1, $2)
                        ON CONFLICT (id) DO UPDATE SET caption = EXCLUDED.caption
                        "#
                    }
                    MetadataField::Date => {
                        r#"
                        INSERT INTO image_records (id, date) VALUES ($1, $2)
                        ON CONFLICT (id) DO UPDATE SET date = EXCLUDED.date
                        "#
                    }
                    MetadataField::Name => {
                        r#"
                        INSERT INTO image_records (id, name) VALUES ($1, $2)
                        ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name
                        "#
                    }
                };

                sqlx::query(sql)
                    .bind(id)
                    .bind(&value)
                    .execute(&self.pool)
                    .await
                    .with_context(|| format!("Failed to update {field} field"))?;
            }
            RecordUpdate::Review {
                status,
                reason,
                reviewed_at,
            } => {
                sqlx::query(
                    r#"
                    INSERT INTO image_records (id, status, reason, reviewed_at)
                    VALUES ($1, $2, $3, $4)
                    ON CONFLICT (id) DO UPDATE SET
                        status = EXCLUDED.status,
                        reason = EXCLUDED.reason,
                        reviewed_at = EXCLUDED.reviewed_at
                    "#,
                )
                .bind(id)
                .bind(status.as_str())
                .bind(&reason)
                .bind(&reviewed_at)
                .execute(&self.pool)
                .await
                .context("Failed to update review status")?;
            }
        }

        debug!(id = %id, "Image record updated");
        Ok(())
    }
}
