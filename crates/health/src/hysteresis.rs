//! Damping of failing conditions so transient errors do not flap the verdict.

use chrono::{DateTime, Utc};

use canopy_core::{Condition, ConditionStatus, ConditionThresholds, ErrorCode, LastOperation, LastOperationState, LastOperationType};

/// Move `condition` towards failure.
///
/// A healthy (or unknown) condition first becomes `Progressing` when a
/// threshold is configured for its type, and `False` otherwise. A
/// `Progressing` condition turns `False` once it has been progressing for
/// longer than the threshold. `False` stays `False`.
pub fn failed_condition(
    thresholds: &ConditionThresholds,
    now: DateTime<Utc>,
    condition: &Condition,
    reason: &str,
    message: &str,
    codes: Vec<ErrorCode>,
) -> Condition {
    let threshold = thresholds.get(&condition.type_);
    let status = match (condition.status, threshold) {
        (ConditionStatus::True | ConditionStatus::Unknown, Some(_)) => ConditionStatus::Progressing,
        (ConditionStatus::Progressing, Some(t)) => {
            let progressing_for = now.signed_duration_since(condition.last_transition_time);
            match chrono::Duration::from_std(t) {
                Ok(t) if progressing_for <= t => ConditionStatus::Progressing,
                _ => ConditionStatus::False,
            }
        }
        _ => ConditionStatus::False,
    };
    condition.updated(status, reason, message, codes, now)
}

/// Soften a `False` condition to `Progressing` while the cluster is still being
/// created or deleted, or has not run any operation yet.
pub fn pardon_condition(last_operation: Option<&LastOperation>, condition: Condition, now: DateTime<Utc>) -> Condition {
    if condition.status != ConditionStatus::False {
        return condition;
    }
    let pardoned = match last_operation {
        None => true,
        Some(op) => {
            matches!(op.type_, LastOperationType::Create | LastOperationType::Delete) && op.state == LastOperationState::Processing
        }
    };
    if !pardoned {
        return condition;
    }
    let reason = condition.reason.clone();
    let message = condition.message.clone();
    let codes = condition.codes.clone();
    condition.updated(ConditionStatus::Progressing, reason, message, codes, now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use canopy_core::condition::CONTROL_PLANE_HEALTHY;
    use chrono::TimeZone;
    use std::time::Duration;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn cond(status: ConditionStatus, at: DateTime<Utc>) -> Condition {
        Condition::init(CONTROL_PLANE_HEALTHY, at).updated(status, "Running", "all good", Vec::new(), at)
    }

    fn one_minute() -> ConditionThresholds {
        ConditionThresholds::new().with(CONTROL_PLANE_HEALTHY, Duration::from_secs(60))
    }

    #[test]
    fn healthy_condition_first_goes_progressing() {
        let c = failed_condition(&one_minute(), t0(), &cond(ConditionStatus::True, t0()), "DeploymentUnhealthy", "x", Vec::new());
        assert_eq!(c.status, ConditionStatus::Progressing);
        assert_eq!(c.last_transition_time, t0());
    }

    #[test]
    fn progressing_turns_false_after_threshold() {
        let progressing = cond(ConditionStatus::Progressing, t0());
        let later = t0() + chrono::Duration::seconds(61);
        let c = failed_condition(&one_minute(), later, &progressing, "DeploymentUnhealthy", "x", Vec::new());
        assert_eq!(c.status, ConditionStatus::False);
        assert_eq!(c.last_transition_time, later);

        let within = t0() + chrono::Duration::seconds(30);
        let c = failed_condition(&one_minute(), within, &progressing, "DeploymentUnhealthy", "x", Vec::new());
        assert_eq!(c.status, ConditionStatus::Progressing);
        assert_eq!(c.last_transition_time, t0());
    }

    #[test]
    fn without_threshold_failure_is_immediate() {
        let c = failed_condition(&ConditionThresholds::new(), t0(), &cond(ConditionStatus::True, t0()), "R", "m", Vec::new());
        assert_eq!(c.status, ConditionStatus::False);
        let c = failed_condition(&one_minute(), t0(), &cond(ConditionStatus::False, t0()), "R", "m", Vec::new());
        assert_eq!(c.status, ConditionStatus::False);
    }

    #[test]
    fn unknown_behaves_like_true() {
        let c = failed_condition(&one_minute(), t0(), &Condition::init(CONTROL_PLANE_HEALTHY, t0()), "R", "m", Vec::new());
        assert_eq!(c.status, ConditionStatus::Progressing);
    }

    #[test]
    fn pardon_only_while_creating_or_deleting() {
        let failed = cond(ConditionStatus::False, t0());
        let creating = LastOperation::new(LastOperationType::Create, LastOperationState::Processing, "");
        let created = LastOperation::new(LastOperationType::Create, LastOperationState::Succeeded, "");
        assert_eq!(pardon_condition(Some(&creating), failed.clone(), t0()).status, ConditionStatus::Progressing);
        assert_eq!(pardon_condition(Some(&created), failed.clone(), t0()).status, ConditionStatus::False);
        assert_eq!(pardon_condition(None, failed, t0()).status, ConditionStatus::Progressing);

        let healthy = cond(ConditionStatus::True, t0());
        assert_eq!(pardon_condition(Some(&creating), healthy, t0()).status, ConditionStatus::True);
    }
}
