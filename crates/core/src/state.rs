//! Persisted snapshot of extension controller state, carried from the source
//! seed to the destination seed during a control-plane migration.

use serde::{Deserialize, Serialize};

use crate::extension::{Extension, ExtensionKind};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionState {
    pub kind: ExtensionKind,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
    pub state: serde_json::Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShootState {
    #[serde(default)]
    pub extensions: Vec<ExtensionState>,
}

impl ShootState {
    /// Prior state for one resource, matched by kind, name and purpose.
    pub fn find(&self, kind: ExtensionKind, name: &str, purpose: Option<&str>) -> Option<&serde_json::Value> {
        self.extensions
            .iter()
            .find(|e| e.kind == kind && e.name == name && e.purpose.as_deref() == purpose)
            .map(|e| &e.state)
    }

    /// Record the current `status.state` of an extension object, replacing an older entry.
    pub fn capture<E: Extension>(&mut self, obj: &E) {
        let Some(state) = obj.extension_status().and_then(|s| s.state.clone()) else { return };
        let name = obj.key().name;
        let purpose = obj.purpose().map(str::to_string);
        self.extensions.retain(|e| !(e.kind == E::KIND && e.name == name && e.purpose == purpose));
        self.extensions.push(ExtensionState { kind: E::KIND, name, purpose, state });
    }

    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extension::{ControlPlane, ControlPlaneSpec, ExtensionStatus};
    use serde_json::json;

    fn cp(name: &str, purpose: Option<&str>, state: serde_json::Value) -> ControlPlane {
        let mut cp = ControlPlane::new(
            name,
            ControlPlaneSpec { type_: "aws".into(), provider_config: None, region: "eu".into(), purpose: purpose.map(str::to_string) },
        );
        cp.metadata.namespace = Some("shoot--a".into());
        cp.status = Some(ExtensionStatus { state: Some(state), ..Default::default() });
        cp
    }

    #[test]
    fn lookup_distinguishes_purpose() {
        let mut s = ShootState::default();
        s.capture(&cp("a", None, json!({"lb": "one"})));
        s.capture(&cp("a", Some("exposure"), json!({"lb": "two"})));
        assert_eq!(s.find(ExtensionKind::ControlPlane, "a", None), Some(&json!({"lb": "one"})));
        assert_eq!(s.find(ExtensionKind::ControlPlane, "a", Some("exposure")), Some(&json!({"lb": "two"})));
        assert_eq!(s.find(ExtensionKind::Worker, "a", None), None);
    }

    #[test]
    fn capture_replaces_older_entry() {
        let mut s = ShootState::default();
        s.capture(&cp("a", None, json!(1)));
        s.capture(&cp("a", None, json!(2)));
        assert_eq!(s.extensions.len(), 1);
        assert_eq!(s.find(ExtensionKind::ControlPlane, "a", None), Some(&json!(2)));
    }
}
