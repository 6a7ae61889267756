//! Scheduler state: an immutable snapshot of checks, assets and hooks
//!
//! The `StateManager` holds the current snapshot in an `ArcSwap`. Refreshing
//! builds a complete new snapshot from the store and swaps the pointer, so
//! readers never block and never observe a half-updated view.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use arc_swap::ArcSwap;
use tracing::{debug, instrument};

use crate::store::{Store, StoreResult};
use crate::types::{Asset, CheckConfig, CheckKey, HookConfig};

/// Point-in-time view of scheduling state
#[derive(Debug, Clone, Default)]
pub struct StateSnapshot {
    checks: HashMap<CheckKey, CheckConfig>,
    assets: HashMap<String, Vec<Asset>>,
    hooks: HashMap<String, Vec<HookConfig>>,
}

impl StateSnapshot {
    pub fn new(checks: Vec<CheckConfig>, assets: Vec<Asset>, hooks: Vec<HookConfig>) -> Self {
        let mut snapshot = Self {
            checks: checks.into_iter().map(|c| (c.key(), c)).collect(),
            ..Self::default()
        };

        for asset in assets {
            snapshot
                .assets
                .entry(asset.organization.clone())
                .or_default()
                .push(asset);
        }

        for hook in hooks {
            snapshot
                .hooks
                .entry(hook.organization.clone())
                .or_default()
                .push(hook);
        }

        snapshot
    }

    pub fn get_check(
        &self,
        name: &str,
        organization: &str,
        environment: &str,
    ) -> Option<&CheckConfig> {
        self.checks
            .get(&CheckKey::new(name, organization, environment))
    }

    pub fn checks(&self) -> impl Iterator<Item = &CheckConfig> {
        self.checks.values()
    }

    pub fn get_assets_in_org(&self, organization: &str) -> &[Asset] {
        self.assets.get(organization).map_or(&[], Vec::as_slice)
    }

    pub fn get_hooks_in_org(&self, organization: &str) -> &[HookConfig] {
        self.hooks.get(organization).map_or(&[], Vec::as_slice)
    }
}

/// Owner of the current `StateSnapshot`
pub struct StateManager {
    store: Arc<dyn Store>,
    state: ArcSwap<StateSnapshot>,
}

impl StateManager {
    /// Create a manager holding an empty snapshot
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            state: ArcSwap::from_pointee(StateSnapshot::default()),
        }
    }

    /// The current snapshot. Lock-free.
    pub fn state(&self) -> Arc<StateSnapshot> {
        self.state.load_full()
    }

    /// Swap in a new snapshot
    pub fn replace(&self, snapshot: StateSnapshot) {
        self.state.store(Arc::new(snapshot));
    }

    /// Rebuild the snapshot from the store
    ///
    /// On error the previous snapshot stays in place.
    #[instrument(skip(self))]
    pub async fn refresh(&self) -> StoreResult<()> {
        let checks = self.store.get_check_configs().await?;

        let organizations: BTreeSet<&str> =
            checks.iter().map(|c| c.organization.as_str()).collect();

        let mut assets = Vec::new();
        let mut hooks = Vec::new();
        for org in organizations {
            assets.extend(self.store.get_assets_in_org(org).await?);
            hooks.extend(self.store.get_hooks_in_org(org).await?);
        }

        debug!(
            "refreshed state: {} checks, {} assets, {} hooks",
            checks.len(),
            assets.len(),
            hooks.len()
        );

        self.replace(StateSnapshot::new(checks, assets, hooks));
        Ok(())
    }
}
