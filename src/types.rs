//! Resource and event types shared by the scheduler, the message bus and eventd
//!
//! ## Ownership
//!
//! - **CheckConfig / Asset / HookConfig**: owned by the store, read-only here
//! - **CheckRequest**: built fresh per scheduler tick, self-contained so it can
//!   cross a process boundary
//! - **Event**: produced by an agent, merged and overwritten by eventd
//!
//! ## Merge Semantics
//!
//! ```text
//! previous check ──┐
//!                  ├─► Check::merge_with ─► history (≤ 21), last_ok, occurrences,
//! incoming check ──┘                        total_state_change, state
//! ```

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum number of history entries kept on a check
pub const MAX_HISTORY: usize = 21;

static NAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\w.\-]+$").expect("name pattern is a valid regex"));

/// Errors raised by structural validation of resources
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} must not be empty")]
    Missing { field: &'static str },

    #[error("{field} '{value}' contains invalid characters")]
    InvalidName { field: &'static str, value: String },

    #[error("interval must be greater than 0")]
    InvalidInterval,

    #[error("low flap threshold ({low}) is greater than high flap threshold ({high})")]
    InvalidFlapThresholds { low: u32, high: u32 },
}

fn validate_name(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.is_empty() {
        return Err(ValidationError::Missing { field });
    }

    if !NAME_PATTERN.is_match(value) {
        return Err(ValidationError::InvalidName {
            field,
            value: value.to_string(),
        });
    }

    Ok(())
}

fn require(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.is_empty() {
        Err(ValidationError::Missing { field })
    } else {
        Ok(())
    }
}

// ============================================================================
// Check configuration and its dependencies
// ============================================================================

/// Identity of a check definition
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CheckKey {
    pub name: String,
    pub organization: String,
    pub environment: String,
}

impl CheckKey {
    pub fn new(
        name: impl Into<String>,
        organization: impl Into<String>,
        environment: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            organization: organization.into(),
            environment: environment.into(),
        }
    }
}

impl std::fmt::Display for CheckKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.organization, self.environment, self.name)
    }
}

/// A group of hooks to run for a given check result type (e.g. "critical")
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookList {
    #[serde(rename = "type")]
    pub hook_type: String,

    #[serde(default)]
    pub hooks: Vec<String>,
}

/// Definition of a periodically executed check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckConfig {
    pub name: String,
    pub organization: String,
    pub environment: String,

    /// Execution interval in seconds
    pub interval: u32,

    /// Command the agent runs
    #[serde(default)]
    pub command: String,

    /// Subscriber groups the request is routed to
    #[serde(default)]
    pub subscriptions: Vec<String>,

    /// Whether the scheduler publishes requests for this check at all
    #[serde(default)]
    pub publish: bool,

    /// Asset name prefixes required at runtime
    #[serde(default)]
    pub runtime_assets: Vec<String>,

    #[serde(default)]
    pub check_hooks: Vec<HookList>,

    #[serde(default)]
    pub handlers: Vec<String>,

    /// Execution timeout in seconds (0 = none)
    #[serde(default)]
    pub timeout: u32,

    /// Flap detection thresholds in percent (0 = disabled)
    #[serde(default)]
    pub low_flap_threshold: u32,
    #[serde(default)]
    pub high_flap_threshold: u32,
}

impl CheckConfig {
    pub fn key(&self) -> CheckKey {
        CheckKey::new(&self.name, &self.organization, &self.environment)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_name("check name", &self.name)?;
        require("organization", &self.organization)?;
        require("environment", &self.environment)?;

        if self.interval == 0 {
            return Err(ValidationError::InvalidInterval);
        }

        if self.low_flap_threshold > self.high_flap_threshold {
            return Err(ValidationError::InvalidFlapThresholds {
                low: self.low_flap_threshold,
                high: self.high_flap_threshold,
            });
        }

        Ok(())
    }
}

/// A runtime asset agents download before executing a check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    pub name: String,
    pub organization: String,
    pub url: String,
    #[serde(default)]
    pub sha512: String,
    #[serde(default)]
    pub filters: Vec<String>,
}

impl Asset {
    /// An asset is relevant when its name starts with any declared runtime asset
    pub fn is_relevant_to(&self, check: &CheckConfig) -> bool {
        check
            .runtime_assets
            .iter()
            .any(|prefix| self.name.starts_with(prefix.as_str()))
    }
}

/// A command run by the agent in response to a check result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookConfig {
    pub name: String,
    pub organization: String,
    pub environment: String,
    pub command: String,
    #[serde(default)]
    pub timeout: u32,
    #[serde(default)]
    pub stdin: bool,
}

impl HookConfig {
    /// A hook is relevant when any of the check's hook lists names it exactly
    pub fn is_relevant_to(&self, check: &CheckConfig) -> bool {
        check
            .check_hooks
            .iter()
            .flat_map(|list| list.hooks.iter())
            .any(|name| *name == self.name)
    }
}

/// Self-contained request published to agents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckRequest {
    pub config: CheckConfig,
    #[serde(default)]
    pub assets: Vec<Asset>,
    #[serde(default)]
    pub hooks: Vec<HookConfig>,
    pub issued: DateTime<Utc>,
}

// ============================================================================
// Events
// ============================================================================

/// A monitored node or service instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub class: String,
    pub organization: String,
    pub environment: String,
    #[serde(default)]
    pub subscriptions: Vec<String>,
    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,
}

impl Entity {
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_name("entity id", &self.id)?;
        require("entity class", &self.class)?;
        require("organization", &self.organization)?;
        require("environment", &self.environment)
    }
}

/// One past execution of a check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckHistory {
    pub status: u32,
    pub executed: DateTime<Utc>,
}

/// Derived health state of a check
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckState {
    #[default]
    Passing,
    Failing,
    Flapping,
}

/// Result of one check execution plus the continuity state carried across executions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Check {
    #[serde(flatten)]
    pub config: CheckConfig,

    pub status: u32,
    #[serde(default)]
    pub output: String,
    pub executed: DateTime<Utc>,
    #[serde(default)]
    pub duration: f64,

    #[serde(default)]
    pub history: Vec<CheckHistory>,
    #[serde(default)]
    pub last_ok: Option<DateTime<Utc>>,
    #[serde(default)]
    pub occurrences: u64,
    #[serde(default)]
    pub occurrences_watermark: u64,
    #[serde(default)]
    pub total_state_change: u32,
    #[serde(default)]
    pub state: CheckState,
}

impl Check {
    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        self.config.validate()
    }

    /// Absorb continuity state from the previously stored result of the same check
    pub fn merge_with(&mut self, prev: &Check) {
        let mut history = prev.history.clone();
        if history.is_empty() {
            history.push(CheckHistory {
                status: prev.status,
                executed: prev.executed,
            });
        }
        history.push(CheckHistory {
            status: self.status,
            executed: self.executed,
        });
        if history.len() > MAX_HISTORY {
            history.drain(..history.len() - MAX_HISTORY);
        }
        self.history = history;

        self.last_ok = if self.status == 0 {
            Some(self.executed)
        } else {
            prev.last_ok
        };

        let same_status = prev.status == self.status;
        // a result stored as-is on first observation counts once
        let prev_occurrences = prev.occurrences.max(1);

        self.occurrences = if same_status {
            prev_occurrences + 1
        } else {
            1
        };

        self.occurrences_watermark = if same_status {
            prev.occurrences_watermark.max(self.occurrences)
        } else if self.status == 0 {
            // resolution keeps the watermark of the streak it ends
            prev.occurrences_watermark.max(prev_occurrences)
        } else {
            1
        };

        self.total_state_change = total_state_change(&self.history);
        self.state = self.resolve_state(prev.state);
    }

    fn resolve_state(&self, prev_state: CheckState) -> CheckState {
        let low = self.config.low_flap_threshold;
        let high = self.config.high_flap_threshold;

        let flapping = if high == 0 {
            false
        } else if prev_state == CheckState::Flapping {
            self.total_state_change > low
        } else {
            self.total_state_change >= high
        };

        if flapping {
            CheckState::Flapping
        } else if self.status == 0 {
            CheckState::Passing
        } else {
            CheckState::Failing
        }
    }
}

/// Weighted percentage of status changes across a full history window
///
/// Later changes weigh more (0.80 rising by 0.02 per entry). Returns 0 until
/// the window holds `MAX_HISTORY` entries.
pub fn total_state_change(history: &[CheckHistory]) -> u32 {
    if history.len() < MAX_HISTORY {
        return 0;
    }

    // weights in hundredths to keep the sum exact
    let changes: u32 = history
        .windows(2)
        .enumerate()
        .filter(|(_, pair)| pair[0].status != pair[1].status)
        .map(|(i, _)| 80 + 2 * i as u32)
        .sum();

    changes / (MAX_HISTORY as u32 - 1)
}

/// Composite identity under which the canonical event is stored
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventKey {
    pub entity_id: String,
    pub check_name: String,
}

/// Latest result of one check on one entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub entity: Option<Entity>,
    #[serde(default)]
    pub check: Option<Check>,
}

impl Event {
    /// The (entity, check) key, if both components are present
    pub fn key(&self) -> Option<EventKey> {
        match (&self.entity, &self.check) {
            (Some(entity), Some(check)) => Some(EventKey {
                entity_id: entity.id.clone(),
                check_name: check.config.name.clone(),
            }),
            _ => None,
        }
    }
}
