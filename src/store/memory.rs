//! In-memory store (no persistence)
//!
//! Useful for:
//! - Testing without database dependencies
//! - Single-node trials (`"backend": "none"`)
//!
//! All data is lost on restart. Each map sits behind its own
//! `std::sync::RwLock`, held only for the duration of a copy.

use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use tracing::{debug, trace};

use super::{Store, StoreError, StoreResult};
use crate::types::{Asset, CheckConfig, CheckKey, Event, EventKey, HookConfig};

/// In-memory store
#[derive(Default)]
pub struct MemoryStore {
    checks: RwLock<BTreeMap<CheckKey, CheckConfig>>,

    /// Keyed by (organization, name)
    assets: RwLock<BTreeMap<(String, String), Asset>>,

    /// Keyed by (organization, name, environment)
    hooks: RwLock<BTreeMap<(String, String, String), HookConfig>>,

    events: RwLock<HashMap<EventKey, Event>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored events
    pub fn event_count(&self) -> usize {
        self.events
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_check_configs(&self) -> StoreResult<Vec<CheckConfig>> {
        let checks = self.checks.read().unwrap_or_else(PoisonError::into_inner);
        Ok(checks.values().cloned().collect())
    }

    async fn get_check_by_key(
        &self,
        name: &str,
        organization: &str,
        environment: &str,
    ) -> StoreResult<Option<CheckConfig>> {
        let key = CheckKey::new(name, organization, environment);
        let checks = self.checks.read().unwrap_or_else(PoisonError::into_inner);
        Ok(checks.get(&key).cloned())
    }

    async fn update_check_config(&self, check: &CheckConfig) -> StoreResult<()> {
        check.validate()?;
        trace!("storing check {}", check.key());

        self.checks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(check.key(), check.clone());
        Ok(())
    }

    async fn delete_check_config(&self, key: &CheckKey) -> StoreResult<()> {
        trace!("deleting check {key}");

        self.checks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        Ok(())
    }

    async fn get_assets_in_org(&self, organization: &str) -> StoreResult<Vec<Asset>> {
        let assets = self.assets.read().unwrap_or_else(PoisonError::into_inner);
        Ok(assets
            .values()
            .filter(|a| a.organization == organization)
            .cloned()
            .collect())
    }

    async fn update_asset(&self, asset: &Asset) -> StoreResult<()> {
        if asset.name.is_empty() || asset.organization.is_empty() {
            return Err(StoreError::InvalidResource(
                "asset requires a name and an organization".to_string(),
            ));
        }

        self.assets
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                (asset.organization.clone(), asset.name.clone()),
                asset.clone(),
            );
        Ok(())
    }

    async fn get_hooks_in_org(&self, organization: &str) -> StoreResult<Vec<HookConfig>> {
        let hooks = self.hooks.read().unwrap_or_else(PoisonError::into_inner);
        Ok(hooks
            .values()
            .filter(|h| h.organization == organization)
            .cloned()
            .collect())
    }

    async fn update_hook(&self, hook: &HookConfig) -> StoreResult<()> {
        if hook.name.is_empty() || hook.organization.is_empty() {
            return Err(StoreError::InvalidResource(
                "hook requires a name and an organization".to_string(),
            ));
        }

        self.hooks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                (
                    hook.organization.clone(),
                    hook.name.clone(),
                    hook.environment.clone(),
                ),
                hook.clone(),
            );
        Ok(())
    }

    async fn get_event_by_entity_check(
        &self,
        entity_id: &str,
        check_name: &str,
    ) -> StoreResult<Option<Event>> {
        let key = EventKey {
            entity_id: entity_id.to_string(),
            check_name: check_name.to_string(),
        };
        let events = self.events.read().unwrap_or_else(PoisonError::into_inner);
        Ok(events.get(&key).cloned())
    }

    async fn update_event(&self, event: &Event) -> StoreResult<()> {
        let key = event.key().ok_or_else(|| {
            StoreError::InvalidResource("event requires an entity and a check".to_string())
        })?;

        self.events
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, event.clone());
        Ok(())
    }

    async fn close(&self) -> StoreResult<()> {
        debug!("closing in-memory store (no-op)");
        Ok(())
    }
}
