//! Decides which changes deserve a reconciliation.
//!
//! The controller wakes up on every change of an instance, its own status
//! writes included. Each object is compared with the last version that was
//! reconciled successfully, and the comparison goes through the predicates.
use crate::CustomResourceStateMetrics;
use common::predicates::{NamespaceLookup, Notification, changed, in_scope};
use kube::core::Selector;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::RwLock;

pub struct Admission {
    selector: Option<Selector>,
    namespace_selector: Option<Selector>,
    lookup: Arc<dyn NamespaceLookup>,
    seen: RwLock<HashMap<String, CustomResourceStateMetrics>>,
}

impl Admission {
    #[must_use]
    pub fn new(
        selector: Option<Selector>,
        namespace_selector: Option<Selector>,
        lookup: Arc<dyn NamespaceLookup>,
    ) -> Self {
        Self {
            selector,
            namespace_selector,
            lookup,
            seen: RwLock::new(HashMap::new()),
        }
    }

    /// Whether `inst` changed enough since its last reconciliation.
    ///
    /// An object falling out of the selectors is forgotten.
    pub async fn admit(&self, inst: &CustomResourceStateMetrics) -> bool {
        let key = inst.instance_key();
        let last = self.seen.read().await.get(&key).cloned();
        let notification = match &last {
            _ if inst.is_deleting() => Notification::Delete(inst),
            None => Notification::Create(inst),
            Some(old) => Notification::Update { old, new: inst },
        };
        if !changed(&notification) {
            return false;
        }
        let admitted = in_scope(
            inst,
            self.selector.as_ref(),
            self.namespace_selector.as_ref(),
            self.lookup.as_ref(),
        )
        .await;
        if !admitted {
            self.forget(&key).await;
        }
        admitted
    }

    /// Records `inst` as reconciled
    pub async fn remember(&self, inst: &CustomResourceStateMetrics) {
        self.seen.write().await.insert(inst.instance_key(), inst.clone());
    }

    /// Next change of the instance is handled like a creation
    pub async fn forget(&self, key: &str) {
        self.seen.write().await.remove(key);
    }
}
