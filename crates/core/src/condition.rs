//! Health conditions: named verdicts that carry their own transition history.

use std::fmt;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::codes::ErrorCode;

pub const API_SERVER_AVAILABLE: &str = "APIServerAvailable";
pub const CONTROL_PLANE_HEALTHY: &str = "ControlPlaneHealthy";
pub const OBSERVABILITY_COMPONENTS_HEALTHY: &str = "ObservabilityComponentsHealthy";
pub const EVERY_NODE_READY: &str = "EveryNodeReady";
pub const SYSTEM_COMPONENTS_HEALTHY: &str = "SystemComponentsHealthy";

/// All condition types maintained for a shoot, in reporting order.
pub const SHOOT_CONDITION_TYPES: [&str; 5] = [
    API_SERVER_AVAILABLE,
    CONTROL_PLANE_HEALTHY,
    OBSERVABILITY_COMPONENTS_HEALTHY,
    EVERY_NODE_READY,
    SYSTEM_COMPONENTS_HEALTHY,
];

pub const REASON_INITIALIZED: &str = "ConditionInitialized";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    Progressing,
    Unknown,
}

impl fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::True => "True",
            Self::False => "False",
            Self::Progressing => "Progressing",
            Self::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: ConditionStatus,
    pub reason: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub codes: Vec<ErrorCode>,
    pub last_transition_time: DateTime<Utc>,
    pub last_update_time: DateTime<Utc>,
}

impl Condition {
    /// A fresh condition whose semantic check has not run yet.
    pub fn init(type_: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            type_: type_.into(),
            status: ConditionStatus::Unknown,
            reason: REASON_INITIALIZED.to_string(),
            message: "The condition has been initialized but its semantic check has not been performed yet.".to_string(),
            codes: Vec::new(),
            last_transition_time: now,
            last_update_time: now,
        }
    }

    /// Return an updated copy. The transition time only moves when the status
    /// changes; the update time moves when anything changes.
    pub fn updated(
        &self,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
        codes: Vec<ErrorCode>,
        now: DateTime<Utc>,
    ) -> Self {
        let mut next = Self {
            type_: self.type_.clone(),
            status,
            reason: reason.into(),
            message: message.into(),
            codes,
            last_transition_time: self.last_transition_time,
            last_update_time: self.last_update_time,
        };
        if next.status != self.status {
            next.last_transition_time = now;
        }
        if next.status != self.status || next.reason != self.reason || next.message != self.message || next.codes != self.codes {
            next.last_update_time = now;
        }
        next
    }

    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }
}

pub fn get<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

/// Existing condition of the given type, or a freshly initialized one.
pub fn get_or_init(conditions: &[Condition], type_: &str, now: DateTime<Utc>) -> Condition {
    get(conditions, type_).cloned().unwrap_or_else(|| Condition::init(type_, now))
}

/// Replace conditions by type, keeping unrelated ones in place and appending new types.
pub fn merge(existing: &[Condition], updates: impl IntoIterator<Item = Condition>) -> Vec<Condition> {
    let mut out = existing.to_vec();
    for u in updates {
        match out.iter_mut().find(|c| c.type_ == u.type_) {
            Some(slot) => *slot = u,
            None => out.push(u),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn transition_time_moves_only_on_status_change() {
        let c = Condition::init(CONTROL_PLANE_HEALTHY, t0());
        let later = t0() + Duration::seconds(10);
        let c1 = c.updated(ConditionStatus::True, "Healthy", "all good", vec![], later);
        assert_eq!(c1.last_transition_time, later);

        let much_later = later + Duration::seconds(50);
        let c2 = c1.updated(ConditionStatus::True, "Healthy", "still good", vec![], much_later);
        assert_eq!(c2.last_transition_time, later);
        assert_eq!(c2.last_update_time, much_later);

        let c3 = c2.updated(ConditionStatus::True, "Healthy", "still good", vec![], much_later + Duration::seconds(1));
        assert_eq!(c3.last_update_time, much_later);
    }

    #[test]
    fn merge_replaces_by_type() {
        let a = Condition::init(CONTROL_PLANE_HEALTHY, t0());
        let b = Condition::init(EVERY_NODE_READY, t0());
        let a2 = a.updated(ConditionStatus::False, "Down", "x", vec![], t0());
        let merged = merge(&[a, b.clone()], vec![a2.clone(), Condition::init(SYSTEM_COMPONENTS_HEALTHY, t0())]);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged[0], a2);
        assert_eq!(merged[1], b);
    }

    #[test]
    fn wire_format_is_camel_case() {
        let c = Condition::init(EVERY_NODE_READY, t0());
        let v = serde_json::to_value(&c).unwrap();
        assert_eq!(v["type"], "EveryNodeReady");
        assert_eq!(v["status"], "Unknown");
        assert!(v.get("lastTransitionTime").is_some());
        assert!(v.get("codes").is_none());
    }
}
