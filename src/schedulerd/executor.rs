//! Turns a due check into check requests on the bus
//!
//! ```text
//! CheckConfig ─► build_request (assets + hooks from snapshot)
//!             └► publish to check-request:{org}:{env}:{sub} for every subscription
//! ```

use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use tracing::{debug, trace, warn};

use super::state::StateSnapshot;
use crate::bus::{BusResult, Message, MessageBus, subscription_topic};
use crate::types::{CheckConfig, CheckRequest};

pub struct CheckExecutor {
    bus: Arc<dyn MessageBus>,
    state: Arc<StateSnapshot>,
}

impl CheckExecutor {
    pub fn new(bus: Arc<dyn MessageBus>, state: Arc<StateSnapshot>) -> Self {
        Self { bus, state }
    }

    /// Use a newer snapshot for subsequent requests
    pub fn set_state(&mut self, state: Arc<StateSnapshot>) {
        self.state = state;
    }

    /// Publish a request for `check` to each of its subscriptions
    ///
    /// Subscriptions are published to concurrently, so a slow or failing
    /// topic does not hold back the others. The last failure in subscription
    /// order is returned. Checks with `publish` unset produce nothing.
    pub async fn execute(&self, check: &CheckConfig) -> BusResult<()> {
        if !check.publish {
            trace!(check = %check.key(), "check is not published, skipping");
            return Ok(());
        }

        let request = Arc::new(self.build_request(check));

        let publishes = check.subscriptions.iter().map(|subscription| {
            let topic =
                subscription_topic(&check.organization, &check.environment, subscription);
            let message = Message::CheckRequest(Arc::clone(&request));
            async move {
                debug!("sending check request for {} on topic {}", check.name, topic);
                let result = self.bus.publish(&topic, message).await;
                if let Err(e) = &result {
                    warn!(%topic, "error publishing check request: {e}");
                }
                result
            }
        });

        join_all(publishes)
            .await
            .into_iter()
            .filter_map(Result::err)
            .last()
            .map_or(Ok(()), Err)
    }

    /// Assemble the request with the assets and hooks relevant to `check`
    pub fn build_request(&self, check: &CheckConfig) -> CheckRequest {
        let assets = if check.runtime_assets.is_empty() {
            Vec::new()
        } else {
            self.state
                .get_assets_in_org(&check.organization)
                .iter()
                .filter(|asset| asset.is_relevant_to(check))
                .cloned()
                .collect()
        };

        let hooks = if check.check_hooks.is_empty() {
            Vec::new()
        } else {
            self.state
                .get_hooks_in_org(&check.organization)
                .iter()
                .filter(|hook| hook.is_relevant_to(check))
                .cloned()
                .collect()
        };

        CheckRequest {
            config: check.clone(),
            assets,
            hooks,
            issued: Utc::now(),
        }
    }
}
