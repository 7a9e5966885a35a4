//! Health reports published by extension controllers in `status.conditions`.

use std::time::Duration;

use chrono::{DateTime, Utc};

use canopy_core::{ClientError, Condition, ConditionStatus, Extension, ExtensionKind, ObjectKey, ResourceClient};

#[derive(Debug, Clone, PartialEq)]
pub struct ExtensionReport {
    pub kind: ExtensionKind,
    pub extension_type: String,
    pub key: ObjectKey,
    pub condition: Condition,
    pub reported_at: DateTime<Utc>,
}

/// One report per condition found on each object.
pub fn reports_from<E: Extension>(objects: &[E]) -> Vec<ExtensionReport> {
    objects
        .iter()
        .flat_map(|obj| {
            let conditions = obj.extension_status().map(|s| s.conditions.as_slice()).unwrap_or_default();
            conditions.iter().map(move |c| ExtensionReport {
                kind: E::KIND,
                extension_type: obj.extension_type().to_string(),
                key: obj.key(),
                condition: c.clone(),
                reported_at: c.last_update_time,
            })
        })
        .collect()
}

pub async fn collect_reports<E: Extension>(client: &dyn ResourceClient<E>, namespace: &str) -> Result<Vec<ExtensionReport>, ClientError> {
    let objects = client.list(namespace).await?;
    Ok(reports_from(&objects))
}

/// Fold extension reports of the same type into `condition`.
///
/// When even the newest matching report is older than `stale_after` the
/// condition becomes `Unknown`. Otherwise a failing report makes it `False`
/// (or `Progressing`), with the reason prefixed by the extension type.
/// Returns `None` when no report concerns this condition or all are healthy.
pub fn check_extension_condition(
    condition: &Condition,
    reports: &[ExtensionReport],
    stale_after: Duration,
    now: DateTime<Utc>,
) -> Option<Condition> {
    let relevant: Vec<&ExtensionReport> = reports.iter().filter(|r| r.condition.type_ == condition.type_).collect();
    let newest = relevant.iter().max_by_key(|r| r.reported_at)?;
    let stale = now.signed_duration_since(newest.reported_at).to_std().map(|age| age > stale_after).unwrap_or(false);
    if stale {
        return Some(condition.updated(
            ConditionStatus::Unknown,
            format!("{}{}", capitalize(&newest.extension_type), "StatusStale"),
            format!(
                "{} extension ({}) has not updated its {} report since {}",
                newest.kind,
                newest.key,
                newest.condition.type_,
                newest.reported_at.to_rfc3339()
            ),
            Vec::new(),
            now,
        ));
    }

    for r in relevant {
        let status = match r.condition.status {
            ConditionStatus::False | ConditionStatus::Unknown => ConditionStatus::False,
            ConditionStatus::Progressing => ConditionStatus::Progressing,
            ConditionStatus::True => continue,
        };
        return Some(condition.updated(
            status,
            format!("{}{}", capitalize(&r.extension_type), r.condition.reason),
            r.condition.message.clone(),
            r.condition.codes.clone(),
            now,
        ));
    }
    None
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
