use crate::document::{DEFAULT_KEY, DocumentTarget};
use chrono::{DateTime, Utc};
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Finalizer attached to every instance whose block was written
pub static FINALIZER: &str = "ksm.jtyr.io/finalizer";

fn default_key() -> String {
    DEFAULT_KEY.to_string()
}

/// Identity of an instance inside the shared document markers
#[must_use]
pub fn instance_key(name: &str, namespace: &str) -> String {
    format!("{name}@{namespace}")
}

/// Describe a set of kube-state-metrics custom resource state definitions
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(
    kind = "CustomResourceStateMetrics",
    status = "CustomResourceStateMetricsStatus",
    shortname = "crsm",
    category = "ksm",
    group = "ksm.jtyr.io",
    version = "v1",
    namespaced
)]
#[kube(
    doc = "Custom resource holding kube-state-metrics custom resource state definitions",
    printcolumn = r#"
    {"name":"Ready", "type":"string", "description":"Ready condition", "jsonPath":".status.conditions[?(@.type == 'Ready')].status"},
    {"name":"ConfigMap", "type":"string", "description":"Destination ConfigMap", "jsonPath":".spec.configMap.name"},
    {"name":"last_updated", "type":"date", "description":"Last update date", "format": "date-time", "jsonPath":".status.conditions[?(@.type == 'Ready')].lastTransitionTime"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct CustomResourceStateMetricsSpec {
    /// Details of the ConfigMap where the resources will be written into
    pub config_map: ConfigMapTarget,
    /// kube-state-metrics resources, written into the ConfigMap as is
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<serde_json::Value>,
}

#[derive(Serialize, Deserialize, Eq, PartialEq, Clone, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConfigMapTarget {
    /// Name of the ConfigMap
    pub name: String,
    /// Namespace of the ConfigMap, the instance namespace when unset
    pub namespace: Option<String>,
    /// ConfigMap key under which the resources are stored
    #[serde(default = "default_key")]
    pub key: String,
}

#[derive(Serialize, Deserialize, Eq, PartialEq, Clone, Debug, JsonSchema, Default)]
pub enum ConditionsType {
    #[default]
    Ready,
}

#[derive(Serialize, Deserialize, Eq, PartialEq, Clone, Copy, Debug, JsonSchema, Default)]
pub enum ConditionsStatus {
    True,
    #[default]
    False,
}

impl From<bool> for ConditionsStatus {
    fn from(b: bool) -> Self {
        if b { ConditionsStatus::True } else { ConditionsStatus::False }
    }
}

#[derive(Serialize, Deserialize, Eq, PartialEq, Clone, Copy, Debug, JsonSchema)]
pub enum ConditionsReason {
    Adding,
    Removing,
}

impl ConditionsReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionsReason::Adding => "Adding",
            ConditionsReason::Removing => "Removing",
        }
    }
}

/// ApplicationCondition contains details about the state of the instance
#[derive(Serialize, Deserialize, Eq, PartialEq, Clone, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationCondition {
    /// LastTransitionTime is the last time the status flipped
    pub last_transition_time: Option<DateTime<Utc>>,
    /// Message contains human-readable message indicating details about condition
    pub message: String,
    /// Type is an application condition type
    #[serde(rename = "type")]
    pub condition_type: ConditionsType,
    /// Status ("True" or "False") describe if the condition is enabled
    pub status: ConditionsStatus,
    /// Reason of the last transition
    pub reason: ConditionsReason,
    /// Generation observed when the condition was set
    pub observed_generation: Option<i64>,
}

impl ApplicationCondition {
    #[must_use]
    pub fn new(
        message: &str,
        status: ConditionsStatus,
        condition_type: ConditionsType,
        reason: ConditionsReason,
        generation: Option<i64>,
    ) -> ApplicationCondition {
        ApplicationCondition {
            last_transition_time: Some(Utc::now()),
            message: message.to_string(),
            condition_type,
            status,
            reason,
            observed_generation: generation,
        }
    }

    pub fn ready(status: bool, reason: ConditionsReason, message: &str, generation: Option<i64>) -> Self {
        ApplicationCondition::new(message, status.into(), ConditionsType::Ready, reason, generation)
    }

    fn same_state(&self, other: &ApplicationCondition) -> bool {
        self.condition_type == other.condition_type
            && self.status == other.status
            && self.reason == other.reason
            && self.message == other.message
            && self.observed_generation == other.observed_generation
    }
}

/// The status object of `CustomResourceStateMetrics`
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
pub struct CustomResourceStateMetricsStatus {
    /// State conditions telling whether the resources are in the destination ConfigMap
    #[serde(default)]
    pub conditions: Vec<ApplicationCondition>,
}

impl CustomResourceStateMetrics {
    pub fn instance_key(&self) -> String {
        instance_key(&self.name_any(), &self.namespace().unwrap_or_default())
    }

    /// Resolves the ConfigMap location, defaulting to the instance namespace
    pub fn target(&self) -> DocumentTarget {
        let cm = &self.spec.config_map;
        DocumentTarget {
            name: cm.name.clone(),
            namespace: cm
                .namespace
                .clone()
                .filter(|ns| !ns.is_empty())
                .unwrap_or_else(|| self.namespace().unwrap_or_default()),
            key: if cm.key.is_empty() { default_key() } else { cm.key.clone() },
        }
    }

    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    pub fn has_finalizer(&self) -> bool {
        self.finalizers().iter().any(|f| f == FINALIZER)
    }

    pub fn add_finalizer(&mut self) {
        if !self.has_finalizer() {
            self.finalizers_mut().push(FINALIZER.to_string());
        }
    }

    pub fn remove_finalizer(&mut self) {
        self.finalizers_mut().retain(|f| f != FINALIZER);
    }

    pub fn ready_condition(&self) -> Option<&ApplicationCondition> {
        self.status
            .as_ref()
            .and_then(|s| s.conditions.iter().find(|c| c.condition_type == ConditionsType::Ready))
    }

    /// Sets the Ready condition, returns false when nothing changed.
    ///
    /// The transition time is kept unless the status flips.
    pub fn set_ready(&mut self, status: bool, reason: ConditionsReason, message: &str) -> bool {
        let mut cond = ApplicationCondition::ready(status, reason, message, self.metadata.generation);
        let conditions = &mut self.status.get_or_insert_with(Default::default).conditions;
        match conditions
            .iter_mut()
            .find(|c| c.condition_type == ConditionsType::Ready)
        {
            Some(current) => {
                if current.same_state(&cond) {
                    return false;
                }
                if current.status == cond.status {
                    cond.last_transition_time = current.last_transition_time;
                }
                *current = cond;
            }
            None => conditions.push(cond),
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::api::ObjectMeta;

    fn make_instance(namespace: Option<&str>, key: &str) -> CustomResourceStateMetrics {
        let mut inst = CustomResourceStateMetrics::new("foo", CustomResourceStateMetricsSpec {
            config_map: ConfigMapTarget {
                name: "ksm".to_string(),
                namespace: namespace.map(String::from),
                key: key.to_string(),
            },
            resources: vec![],
        });
        inst.metadata = ObjectMeta {
            name: Some("foo".to_string()),
            namespace: Some("bar".to_string()),
            generation: Some(1),
            ..ObjectMeta::default()
        };
        inst
    }

    #[test]
    fn test_instance_key() {
        assert_eq!(instance_key("foo", "bar"), "foo@bar");
        assert_eq!(make_instance(None, "config.yaml").instance_key(), "foo@bar");
    }

    #[test]
    fn test_target_defaults_to_instance_namespace() {
        let target = make_instance(None, "config.yaml").target();
        assert_eq!(target.namespace, "bar");
        assert_eq!(target.name, "ksm");
        assert_eq!(target.key, "config.yaml");
    }

    #[test]
    fn test_target_explicit_namespace_and_empty_key() {
        let target = make_instance(Some("monitoring"), "").target();
        assert_eq!(target.namespace, "monitoring");
        assert_eq!(target.key, DEFAULT_KEY);
    }

    #[test]
    fn test_spec_key_defaults_when_absent() {
        let spec: CustomResourceStateMetricsSpec =
            serde_json::from_value(serde_json::json!({"configMap": {"name": "ksm"}})).unwrap();
        assert_eq!(spec.config_map.key, "config.yaml");
        assert!(spec.resources.is_empty());
    }

    #[test]
    fn test_finalizer_add_remove() {
        let mut inst = make_instance(None, "config.yaml");
        assert!(!inst.has_finalizer());
        inst.add_finalizer();
        inst.add_finalizer();
        assert_eq!(inst.finalizers().len(), 1);
        assert!(inst.has_finalizer());
        inst.remove_finalizer();
        assert!(!inst.has_finalizer());
    }

    #[test]
    fn test_set_ready_keeps_a_single_condition() {
        let mut inst = make_instance(None, "config.yaml");
        assert!(inst.set_ready(false, ConditionsReason::Adding, "Adding"));
        assert!(inst.set_ready(true, ConditionsReason::Adding, "Done"));
        let status = inst.status.as_ref().unwrap();
        assert_eq!(status.conditions.len(), 1);
        assert_eq!(status.conditions[0].status, ConditionsStatus::True);
        assert_eq!(status.conditions[0].message, "Done");
    }

    #[test]
    fn test_set_ready_unchanged_and_transition_time() {
        let mut inst = make_instance(None, "config.yaml");
        inst.set_ready(true, ConditionsReason::Adding, "Done");
        let first = inst.ready_condition().unwrap().last_transition_time;
        assert!(!inst.set_ready(true, ConditionsReason::Adding, "Done"));
        assert!(inst.set_ready(true, ConditionsReason::Adding, "Same status, other message"));
        assert_eq!(inst.ready_condition().unwrap().last_transition_time, first);
    }

    #[test]
    fn test_condition_serialization() {
        let cond = ApplicationCondition::ready(true, ConditionsReason::Removing, "gone", Some(2));
        let v = serde_json::to_value(&cond).unwrap();
        assert_eq!(v["type"], "Ready");
        assert_eq!(v["status"], "True");
        assert_eq!(v["reason"], "Removing");
        assert_eq!(v["observedGeneration"], 2);
    }
}
