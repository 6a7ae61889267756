//! SQLite store implementation
//!
//! This module provides a SQLite-based implementation of the `Store` trait.
//!
//! ## Features
//!
//! - **Embedded**: No separate database server required
//! - **WAL mode**: Readers are not blocked by eventd writes
//! - **Connection pooling**: Shared by every scheduler and worker
//! - **Migrations**: Automatic schema versioning with sqlx
//!
//! ## Layout
//!
//! Every resource is stored as a JSON document in a `body` column, keyed by
//! its identity columns. Upserts use `ON CONFLICT ... DO UPDATE`, so the last
//! write wins.

use std::path::Path;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Row, Sqlite};
use tracing::{debug, info, instrument, trace};

use super::{Store, StoreError, StoreResult};
use crate::types::{Asset, CheckConfig, CheckKey, Event, HookConfig};

/// SQLite store
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Open (or create) the database at `db_path` and run migrations
    ///
    /// ## Example
    ///
    /// ```no_run
    /// # use watchpost::store::sqlite::SqliteStore;
    /// # async fn example() -> anyhow::Result<()> {
    /// let store = SqliteStore::new("./watchpost.db").await?;
    /// # Ok(())
    /// # }
    /// ```
    #[instrument(skip_all)]
    pub async fn new(db_path: impl AsRef<Path>) -> StoreResult<Self> {
        let db_path = db_path.as_ref().to_string_lossy().to_string();

        info!("initializing SQLite store at: {}", db_path);

        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;

        debug!("running database migrations");
        sqlx::migrate!("./migrations").run(&pool).await?;

        info!("SQLite store ready");

        Ok(Self { pool })
    }

    fn decode<T: DeserializeOwned>(body: &str) -> StoreResult<T> {
        Ok(serde_json::from_str(body)?)
    }

    fn decode_rows<T: DeserializeOwned>(rows: &[sqlx::sqlite::SqliteRow]) -> StoreResult<Vec<T>> {
        rows.iter()
            .map(|row| Self::decode(&row.try_get::<String, _>("body")?))
            .collect()
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn get_check_configs(&self) -> StoreResult<Vec<CheckConfig>> {
        let rows = sqlx::query(
            "SELECT body FROM check_configs ORDER BY organization, environment, name",
        )
        .fetch_all(&self.pool)
        .await?;

        Self::decode_rows(&rows)
    }

    #[instrument(skip(self))]
    async fn get_check_by_key(
        &self,
        name: &str,
        organization: &str,
        environment: &str,
    ) -> StoreResult<Option<CheckConfig>> {
        let row = sqlx::query(
            "SELECT body FROM check_configs WHERE organization = ? AND environment = ? AND name = ?",
        )
        .bind(organization)
        .bind(environment)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| Self::decode(&row.try_get::<String, _>("body")?))
            .transpose()
    }

    #[instrument(skip_all, fields(check = %check.key()))]
    async fn update_check_config(&self, check: &CheckConfig) -> StoreResult<()> {
        check.validate()?;
        let body = serde_json::to_string(check)?;

        sqlx::query(
            r#"
            INSERT INTO check_configs (organization, environment, name, body)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (organization, environment, name) DO UPDATE SET
                body = excluded.body
            "#,
        )
        .bind(&check.organization)
        .bind(&check.environment)
        .bind(&check.name)
        .bind(body)
        .execute(&self.pool)
        .await?;

        trace!("check stored");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_check_config(&self, key: &CheckKey) -> StoreResult<()> {
        sqlx::query(
            "DELETE FROM check_configs WHERE organization = ? AND environment = ? AND name = ?",
        )
        .bind(&key.organization)
        .bind(&key.environment)
        .bind(&key.name)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_assets_in_org(&self, organization: &str) -> StoreResult<Vec<Asset>> {
        let rows = sqlx::query("SELECT body FROM assets WHERE organization = ? ORDER BY name")
            .bind(organization)
            .fetch_all(&self.pool)
            .await?;

        Self::decode_rows(&rows)
    }

    async fn update_asset(&self, asset: &Asset) -> StoreResult<()> {
        if asset.name.is_empty() || asset.organization.is_empty() {
            return Err(StoreError::InvalidResource(
                "asset requires a name and an organization".to_string(),
            ));
        }
        let body = serde_json::to_string(asset)?;

        sqlx::query(
            r#"
            INSERT INTO assets (organization, name, body)
            VALUES (?, ?, ?)
            ON CONFLICT (organization, name) DO UPDATE SET
                body = excluded.body
            "#,
        )
        .bind(&asset.organization)
        .bind(&asset.name)
        .bind(body)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_hooks_in_org(&self, organization: &str) -> StoreResult<Vec<HookConfig>> {
        let rows = sqlx::query(
            "SELECT body FROM hooks WHERE organization = ? ORDER BY name, environment",
        )
        .bind(organization)
        .fetch_all(&self.pool)
        .await?;

        Self::decode_rows(&rows)
    }

    async fn update_hook(&self, hook: &HookConfig) -> StoreResult<()> {
        if hook.name.is_empty() || hook.organization.is_empty() {
            return Err(StoreError::InvalidResource(
                "hook requires a name and an organization".to_string(),
            ));
        }
        let body = serde_json::to_string(hook)?;

        sqlx::query(
            r#"
            INSERT INTO hooks (organization, environment, name, body)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (organization, environment, name) DO UPDATE SET
                body = excluded.body
            "#,
        )
        .bind(&hook.organization)
        .bind(&hook.environment)
        .bind(&hook.name)
        .bind(body)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_event_by_entity_check(
        &self,
        entity_id: &str,
        check_name: &str,
    ) -> StoreResult<Option<Event>> {
        let row = sqlx::query("SELECT body FROM events WHERE entity_id = ? AND check_name = ?")
            .bind(entity_id)
            .bind(check_name)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| Self::decode(&row.try_get::<String, _>("body")?))
            .transpose()
    }

    #[instrument(skip_all)]
    async fn update_event(&self, event: &Event) -> StoreResult<()> {
        let key = event.key().ok_or_else(|| {
            StoreError::InvalidResource("event requires an entity and a check".to_string())
        })?;
        let body = serde_json::to_string(event)?;

        sqlx::query(
            r#"
            INSERT INTO events (entity_id, check_name, timestamp, body)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (entity_id, check_name) DO UPDATE SET
                timestamp = excluded.timestamp,
                body = excluded.body
            "#,
        )
        .bind(&key.entity_id)
        .bind(&key.check_name)
        .bind(event.timestamp.timestamp_millis())
        .bind(body)
        .execute(&self.pool)
        .await?;

        trace!(entity = %key.entity_id, check = %key.check_name, "event stored");
        Ok(())
    }

    async fn close(&self) -> StoreResult<()> {
        info!("closing SQLite store");
        self.pool.close().await;
        Ok(())
    }
}
