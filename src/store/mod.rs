//! Persistent store contract consumed by the scheduler and eventd
//!
//! This module provides a trait-based abstraction over the key-value store
//! holding checks, assets, hooks and events.
//!
//! ## Design
//!
//! - **Trait-based**: `Store` allows swapping implementations
//! - **Async**: All operations are async for compatibility with Tokio tasks
//! - **Upsert**: writes replace the previous value, last write wins
//!
//! ## Backends
//!
//! - **In-Memory**: No persistence, for testing or single-node trials
//! - **SQLite** (default): Embedded database storing JSON documents
//!
//! ## Usage
//!
//! ```no_run
//! use watchpost::store::{Store, sqlite::SqliteStore};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = SqliteStore::new("./watchpost.db").await?;
//!     let _event = store.get_event_by_entity_check("web-01", "disk").await?;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod memory;
#[cfg(feature = "storage-sqlite")]
pub mod sqlite;

use async_trait::async_trait;

use crate::types::{Asset, CheckConfig, CheckKey, Event, HookConfig};

pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;

/// Trait for the persistent store
///
/// Implementations must be `Send + Sync`; a single instance is shared by every
/// scheduler and eventd worker, and no caller holds a lock across a call.
#[async_trait]
pub trait Store: Send + Sync {
    /// All check definitions across organizations
    async fn get_check_configs(&self) -> StoreResult<Vec<CheckConfig>>;

    /// Look up a check definition by identity
    async fn get_check_by_key(
        &self,
        name: &str,
        organization: &str,
        environment: &str,
    ) -> StoreResult<Option<CheckConfig>>;

    /// Create or replace a check definition
    async fn update_check_config(&self, check: &CheckConfig) -> StoreResult<()>;

    /// Remove a check definition (no-op when absent)
    async fn delete_check_config(&self, key: &CheckKey) -> StoreResult<()>;

    /// All assets of an organization, ordered by name
    async fn get_assets_in_org(&self, organization: &str) -> StoreResult<Vec<Asset>>;

    /// Create or replace an asset
    async fn update_asset(&self, asset: &Asset) -> StoreResult<()>;

    /// All hooks of an organization, ordered by name
    async fn get_hooks_in_org(&self, organization: &str) -> StoreResult<Vec<HookConfig>>;

    /// Create or replace a hook
    async fn update_hook(&self, hook: &HookConfig) -> StoreResult<()>;

    /// The canonical event stored for an (entity, check) pair
    async fn get_event_by_entity_check(
        &self,
        entity_id: &str,
        check_name: &str,
    ) -> StoreResult<Option<Event>>;

    /// Create or replace the canonical event for the event's (entity, check) pair
    ///
    /// Fails with `StoreError::InvalidResource` if the event lacks either component.
    async fn update_event(&self, event: &Event) -> StoreResult<()>;

    /// Close the store and release resources
    async fn close(&self) -> StoreResult<()>;
}
