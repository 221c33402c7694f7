use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::ObjectMeta;
use std::{collections::BTreeMap, fmt};

/// ConfigMap key used when the instance doesn't name one
pub static DEFAULT_KEY: &str = "config.yaml";

/// Where an instance writes its block: a ConfigMap and one of its keys
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DocumentTarget {
    pub name: String,
    pub namespace: String,
    pub key: String,
}

impl fmt::Display for DocumentTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.namespace)
    }
}

/// Access to the owned field of the shared document
pub trait SharedDocument {
    fn content(&self, key: &str) -> &str;
    fn set_content(&mut self, key: &str, content: String);
}

impl SharedDocument for ConfigMap {
    fn content(&self, key: &str) -> &str {
        self.data
            .as_ref()
            .and_then(|d| d.get(key))
            .map(String::as_str)
            .unwrap_or_default()
    }

    fn set_content(&mut self, key: &str, content: String) {
        self.data
            .get_or_insert_with(BTreeMap::new)
            .insert(key.to_string(), content);
    }
}

/// Builds a fresh shared document holding `content` under the target key
#[must_use]
pub fn new_document(target: &DocumentTarget, content: String) -> ConfigMap {
    let mut cm = ConfigMap {
        metadata: ObjectMeta {
            name: Some(target.name.clone()),
            namespace: Some(target.namespace.clone()),
            ..ObjectMeta::default()
        },
        ..ConfigMap::default()
    };
    cm.set_content(&target.key, content);
    cm
}
