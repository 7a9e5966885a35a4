//! Runtime configuration. Defaults are overridable through `CANOPY_*` environment variables.

use std::collections::HashMap;
use std::time::Duration;

use crate::condition;

/// Per-condition hysteresis thresholds: how long a failing condition may
/// stay `Progressing` before it is reported as `False`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConditionThresholds(HashMap<String, Duration>);

impl ConditionThresholds {
    pub fn new() -> Self {
        Self(HashMap::new())
    }

    pub fn with(mut self, condition_type: impl Into<String>, threshold: Duration) -> Self {
        self.0.insert(condition_type.into(), threshold);
        self
    }

    pub fn get(&self, condition_type: &str) -> Option<Duration> {
        self.0.get(condition_type).copied()
    }

    pub fn defaults() -> Self {
        let five_minutes = Duration::from_secs(300);
        Self::new()
            .with(condition::CONTROL_PLANE_HEALTHY, five_minutes)
            .with(condition::OBSERVABILITY_COMPONENTS_HEALTHY, five_minutes)
            .with(condition::EVERY_NODE_READY, five_minutes)
            .with(condition::SYSTEM_COMPONENTS_HEALTHY, five_minutes)
    }

    /// Defaults, overridden by `CANOPY_THRESHOLD_<CONDITION>_SECS` (condition type upper-cased).
    /// A value of `0` removes the threshold for that condition.
    pub fn from_env() -> Self {
        let mut out = Self::defaults();
        for type_ in condition::SHOOT_CONDITION_TYPES {
            let key = format!("CANOPY_THRESHOLD_{}_SECS", type_.to_ascii_uppercase());
            match env_secs(&key) {
                Some(d) if d.is_zero() => {
                    out.0.remove(type_);
                }
                Some(d) => {
                    out.0.insert(type_.to_string(), d);
                }
                None => {}
            }
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanopyConfig {
    pub poll_interval: Duration,
    pub wait_timeout: Duration,
    pub stale_report_after: Duration,
    pub thresholds: ConditionThresholds,
    pub metrics_addr: Option<String>,
}

impl Default for CanopyConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            wait_timeout: Duration::from_secs(600),
            stale_report_after: Duration::from_secs(300),
            thresholds: ConditionThresholds::defaults(),
            metrics_addr: None,
        }
    }
}

impl CanopyConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            poll_interval: env_secs("CANOPY_POLL_INTERVAL_SECS").unwrap_or(d.poll_interval),
            wait_timeout: env_secs("CANOPY_WAIT_TIMEOUT_SECS").unwrap_or(d.wait_timeout),
            stale_report_after: env_secs("CANOPY_STALE_REPORT_SECS").unwrap_or(d.stale_report_after),
            thresholds: ConditionThresholds::from_env(),
            metrics_addr: std::env::var("CANOPY_METRICS_ADDR").ok().filter(|s| !s.is_empty()),
        }
    }
}

fn env_secs(key: &str) -> Option<Duration> {
    std::env::var(key).ok().and_then(|s| s.trim().parse::<u64>().ok()).map(Duration::from_secs)
}
