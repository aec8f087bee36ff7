//! Poll settings and the config file model

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::convergence::{
    NotFoundPolicy, DEFAULT_CONVERGENCE_TIMEOUT, DEFAULT_NOT_FOUND_CHECKS, DEFAULT_POLL_INTERVAL,
    DEFAULT_PROBE_RETRY_BUDGET,
};

/// Default delay between transient-error retries inside one refresh
pub const DEFAULT_RETRY_DELAY_MS: u64 = 500;

/// Timing knobs for one polling session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollSettings {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Consecutive not-found reads tolerated while waiting on create/update
    #[serde(default = "default_not_found_checks")]
    pub not_found_checks: u32,
    /// Attempts per refresh when the transport reports a transient error
    #[serde(default = "default_transient_retries")]
    pub transient_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            timeout_secs: default_timeout_secs(),
            not_found_checks: default_not_found_checks(),
            transient_retries: default_transient_retries(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

fn default_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL.as_millis() as u64
}

fn default_timeout_secs() -> u64 {
    DEFAULT_CONVERGENCE_TIMEOUT.as_secs()
}

fn default_not_found_checks() -> u32 {
    DEFAULT_NOT_FOUND_CHECKS
}

fn default_transient_retries() -> u32 {
    DEFAULT_PROBE_RETRY_BUDGET
}

fn default_retry_delay_ms() -> u64 {
    DEFAULT_RETRY_DELAY_MS
}

impl PollSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Not-found policy used while waiting for a resource to appear or settle
    pub fn not_found_policy(&self) -> NotFoundPolicy {
        NotFoundPolicy::Retry {
            max_consecutive: self.not_found_checks,
        }
    }

    /// Copy of these settings with every set override applied
    pub fn merged(&self, overrides: &PollOverrides) -> PollSettings {
        PollSettings {
            interval_ms: overrides.interval_ms.unwrap_or(self.interval_ms),
            timeout_secs: overrides.timeout_secs.unwrap_or(self.timeout_secs),
            not_found_checks: overrides.not_found_checks.unwrap_or(self.not_found_checks),
            transient_retries: overrides
                .transient_retries
                .unwrap_or(self.transient_retries),
            retry_delay_ms: overrides.retry_delay_ms.unwrap_or(self.retry_delay_ms),
        }
    }
}

/// Partial [`PollSettings`] for one resource kind
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub not_found_checks: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transient_retries: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_delay_ms: Option<u64>,
}

/// Contents of the reconcile config file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReconcileConfig {
    #[serde(default)]
    pub defaults: PollSettings,

    /// Overrides keyed by kind name (`cluster`, `node-group`, ...)
    #[serde(default)]
    pub kinds: BTreeMap<String, PollOverrides>,

    /// JSON pointer to the state tag in HTTP responses
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_pointer: Option<String>,
}
