//! Filters deciding whether a change notification is worth a reconciliation.
//!
//! Status-only updates (including the ones this controller writes) change
//! neither the generation, the labels nor the finalizers, so they get dropped
//! here instead of triggering another round.
use crate::Result;
use async_trait::async_trait;
use kube::{
    Resource, ResourceExt,
    core::{Selector, SelectorExt},
};
use std::collections::BTreeMap;

/// A change notification about an object
#[derive(Debug)]
pub enum Notification<'a, K> {
    Create(&'a K),
    Update { old: &'a K, new: &'a K },
    Delete(&'a K),
    Generic(&'a K),
}

impl<'a, K> Notification<'a, K> {
    /// The most recent version of the object
    pub fn object(&self) -> &'a K {
        match self {
            Notification::Create(o) | Notification::Delete(o) | Notification::Generic(o) => o,
            Notification::Update { new, .. } => new,
        }
    }
}

/// Source of namespace labels
#[async_trait]
pub trait NamespaceLookup: Send + Sync {
    /// Labels of the namespace, `None` when it doesn't exist
    async fn namespace_labels(&self, name: &str) -> Result<Option<BTreeMap<String, String>>>;
}

pub fn generation_changed<K: Resource>(n: &Notification<'_, K>) -> bool {
    match n {
        Notification::Update { old, new } => old.meta().generation != new.meta().generation,
        _ => true,
    }
}

pub fn labels_changed<K: Resource>(n: &Notification<'_, K>) -> bool {
    match n {
        Notification::Create(_) => true,
        Notification::Update { old, new } => old.labels() != new.labels(),
        Notification::Delete(_) | Notification::Generic(_) => false,
    }
}

pub fn finalizers_changed<K: Resource>(n: &Notification<'_, K>) -> bool {
    match n {
        Notification::Create(_) => true,
        Notification::Update { old, new } => old.finalizers() != new.finalizers(),
        Notification::Delete(_) | Notification::Generic(_) => false,
    }
}

/// An unset selector matches everything
pub fn selector_matches(selector: Option<&Selector>, labels: &BTreeMap<String, String>) -> bool {
    selector.is_none_or(|s| s.matches(labels))
}

/// Matches the labels of `namespace`; a missing namespace or a failed lookup never matches
pub async fn namespace_matches(
    lookup: &dyn NamespaceLookup,
    selector: Option<&Selector>,
    namespace: &str,
) -> bool {
    let Some(selector) = selector else {
        return true;
    };
    match lookup.namespace_labels(namespace).await {
        Ok(Some(labels)) => selector.matches(&labels),
        Ok(None) => false,
        Err(e) => {
            tracing::debug!("Ignoring namespace {namespace} after failed lookup: {e}");
            false
        }
    }
}

/// Something a reconciliation cares about changed
pub fn changed<K: Resource>(n: &Notification<'_, K>) -> bool {
    generation_changed(n) || labels_changed(n) || finalizers_changed(n)
}

/// The object and its namespace both match their selectors
pub async fn in_scope<K: Resource>(
    obj: &K,
    selector: Option<&Selector>,
    namespace_selector: Option<&Selector>,
    lookup: &dyn NamespaceLookup,
) -> bool {
    selector_matches(selector, obj.labels())
        && namespace_matches(lookup, namespace_selector, &obj.namespace().unwrap_or_default()).await
}

/// Admit if something relevant changed and both selectors match
pub async fn admit<K: Resource>(
    n: &Notification<'_, K>,
    selector: Option<&Selector>,
    namespace_selector: Option<&Selector>,
    lookup: &dyn NamespaceLookup,
) -> bool {
    changed(n) && in_scope(n.object(), selector, namespace_selector, lookup).await
}
