//! In-memory stand-ins for the API server, with resource versions and fault injection.
use crate::{
    CustomResourceStateMetrics, Error, Metrics, Result,
    admission::Admission,
    manager::{Context, Diagnostics},
    store::{DocumentStore, EventSink, InstanceStore},
};
use async_trait::async_trait;
use common::{
    crsm::{ConfigMapTarget, CustomResourceStateMetricsSpec},
    document::DocumentTarget,
    predicates::NamespaceLookup,
};
use k8s_openapi::{api::core::v1::ConfigMap, apimachinery::pkg::apis::meta::v1::Time};
use kube::{ResourceExt, api::ObjectMeta, runtime::events::EventType};
use std::{
    collections::BTreeMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU32, AtomicU64, Ordering},
    },
};
use tokio::sync::RwLock;

fn next_version(counter: &AtomicU64) -> String {
    (counter.fetch_add(1, Ordering::SeqCst) + 1).to_string()
}

fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

pub fn instance(name: &str, namespace: &str, resources: Vec<serde_json::Value>) -> CustomResourceStateMetrics {
    let mut inst = CustomResourceStateMetrics::new(name, CustomResourceStateMetricsSpec {
        config_map: ConfigMapTarget {
            name: "ksm".to_string(),
            namespace: Some("monitoring".to_string()),
            key: "config.yaml".to_string(),
        },
        resources,
    });
    inst.metadata = ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        generation: Some(1),
        ..ObjectMeta::default()
    };
    inst
}

pub fn target() -> DocumentTarget {
    DocumentTarget {
        name: "ksm".to_string(),
        namespace: "monitoring".to_string(),
        key: "config.yaml".to_string(),
    }
}

#[derive(Default)]
pub struct Instances {
    objects: Mutex<BTreeMap<String, CustomResourceStateMetrics>>,
    version: AtomicU64,
    pub updates: AtomicU32,
    pub status_updates: AtomicU32,
    /// Number of upcoming `update` calls failing with a server error
    pub update_failures: AtomicU32,
}

impl Instances {
    pub fn insert(&self, mut inst: CustomResourceStateMetrics) -> CustomResourceStateMetrics {
        inst.metadata.resource_version = Some(next_version(&self.version));
        self.objects
            .lock()
            .unwrap()
            .insert(inst.instance_key(), inst.clone());
        inst
    }

    pub fn stored(&self, key: &str) -> Option<CustomResourceStateMetrics> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    /// Sets the deletion timestamp, the way a delete request on an object with finalizers does
    pub fn mark_deleted(&self, key: &str) {
        let mut objects = self.objects.lock().unwrap();
        if let Some(inst) = objects.get_mut(key) {
            inst.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
            inst.metadata.resource_version = Some(next_version(&self.version));
        }
    }

    /// Bumps the generation after a spec change
    pub fn edit(&self, key: &str, resources: Vec<serde_json::Value>) {
        let mut objects = self.objects.lock().unwrap();
        if let Some(inst) = objects.get_mut(key) {
            inst.spec.resources = resources;
            inst.metadata.generation = inst.metadata.generation.map(|g| g + 1);
            inst.metadata.resource_version = Some(next_version(&self.version));
        }
    }

    fn check(&self, inst: &CustomResourceStateMetrics) -> Result<CustomResourceStateMetrics> {
        let objects = self.objects.lock().unwrap();
        let current = objects
            .get(&inst.instance_key())
            .ok_or_else(|| Error::Other(format!("{} not found", inst.instance_key())))?;
        if current.resource_version() != inst.resource_version() {
            return Err(Error::Conflict(format!("{} was modified", inst.instance_key())));
        }
        Ok(current.clone())
    }

    fn store(&self, mut inst: CustomResourceStateMetrics) -> CustomResourceStateMetrics {
        let mut objects = self.objects.lock().unwrap();
        inst.metadata.resource_version = Some(next_version(&self.version));
        if inst.metadata.deletion_timestamp.is_some() && inst.finalizers().is_empty() {
            objects.remove(&inst.instance_key());
        } else {
            objects.insert(inst.instance_key(), inst.clone());
        }
        inst
    }
}

#[async_trait]
impl InstanceStore for Instances {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<CustomResourceStateMetrics>> {
        Ok(self.stored(&format!("{name}@{namespace}")))
    }

    async fn update(&self, inst: &CustomResourceStateMetrics) -> Result<CustomResourceStateMetrics> {
        if take_one(&self.update_failures) {
            return Err(Error::Other("injected update failure".to_string()));
        }
        let mut current = self.check(inst)?;
        self.updates.fetch_add(1, Ordering::SeqCst);
        current.metadata.finalizers = inst.metadata.finalizers.clone();
        current.metadata.labels = inst.metadata.labels.clone();
        Ok(self.store(current))
    }

    async fn update_status(&self, inst: &CustomResourceStateMetrics) -> Result<CustomResourceStateMetrics> {
        let mut current = self.check(inst)?;
        self.status_updates.fetch_add(1, Ordering::SeqCst);
        current.status = inst.status.clone();
        Ok(self.store(current))
    }
}

#[derive(Default)]
pub struct Documents {
    objects: Mutex<BTreeMap<String, ConfigMap>>,
    version: AtomicU64,
    /// Number of upcoming writes rejected as conflicting
    pub conflicts: AtomicU32,
    /// Number of upcoming reads failing with a server error
    pub failures: AtomicU32,
    /// Number of upcoming updates failing with a server error
    pub update_failures: AtomicU32,
    pub writes: AtomicU32,
}

impl Documents {
    pub fn insert(&self, content: &str) {
        let mut cm = common::document::new_document(&target(), content.to_string());
        cm.metadata.resource_version = Some(next_version(&self.version));
        self.objects.lock().unwrap().insert(target().to_string(), cm);
    }

    pub fn content(&self) -> Option<String> {
        use common::document::SharedDocument;
        self.objects
            .lock()
            .unwrap()
            .get(&target().to_string())
            .map(|cm| cm.content(&target().key).to_string())
    }

    /// Concurrent writer, changing the document behind the reconciler's back
    pub fn touch(&self) {
        let mut objects = self.objects.lock().unwrap();
        if let Some(cm) = objects.get_mut(&target().to_string()) {
            cm.metadata.resource_version = Some(next_version(&self.version));
        }
    }

    fn key(doc: &ConfigMap) -> String {
        format!("{}@{}", doc.name_any(), doc.namespace().unwrap_or_default())
    }
}

#[async_trait]
impl DocumentStore for Documents {
    async fn get(&self, target: &DocumentTarget) -> Result<Option<ConfigMap>> {
        if take_one(&self.failures) {
            return Err(Error::Other("injected read failure".to_string()));
        }
        Ok(self.objects.lock().unwrap().get(&target.to_string()).cloned())
    }

    async fn create(&self, doc: &ConfigMap) -> Result<ConfigMap> {
        let mut objects = self.objects.lock().unwrap();
        if take_one(&self.conflicts) || objects.contains_key(&Self::key(doc)) {
            return Err(Error::AlreadyExists(Self::key(doc)));
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut doc = doc.clone();
        doc.metadata.resource_version = Some(next_version(&self.version));
        objects.insert(Self::key(&doc), doc.clone());
        Ok(doc)
    }

    async fn update(&self, doc: &ConfigMap) -> Result<ConfigMap> {
        if take_one(&self.update_failures) {
            return Err(Error::Other("injected update failure".to_string()));
        }
        let mut objects = self.objects.lock().unwrap();
        let stale = objects
            .get(&Self::key(doc))
            .is_none_or(|current| current.resource_version() != doc.resource_version());
        if take_one(&self.conflicts) || stale {
            return Err(Error::Conflict(Self::key(doc)));
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut doc = doc.clone();
        doc.metadata.resource_version = Some(next_version(&self.version));
        objects.insert(Self::key(&doc), doc.clone());
        Ok(doc)
    }
}

#[derive(Default)]
pub struct Events(pub Mutex<Vec<(EventType, String, String)>>);

impl Events {
    pub fn messages(&self) -> Vec<String> {
        self.0.lock().unwrap().iter().map(|(_, _, m)| m.clone()).collect()
    }

    pub fn warnings(&self) -> usize {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _, _)| *t == EventType::Warning)
            .count()
    }
}

impl EventSink for Events {
    fn record(&self, _inst: &CustomResourceStateMetrics, type_: EventType, reason: &str, message: String) {
        self.0.lock().unwrap().push((type_, reason.to_string(), message));
    }
}

/// Every namespace exists and carries no label
pub struct AnyNamespace;

#[async_trait]
impl NamespaceLookup for AnyNamespace {
    async fn namespace_labels(&self, _name: &str) -> Result<Option<BTreeMap<String, String>>> {
        Ok(Some(BTreeMap::new()))
    }
}

pub struct Fixture {
    pub instances: Arc<Instances>,
    pub documents: Arc<Documents>,
    pub events: Arc<Events>,
    pub ctx: Arc<Context>,
}

impl Fixture {
    pub fn new() -> Self {
        let instances = Arc::new(Instances::default());
        let documents = Arc::new(Documents::default());
        let events = Arc::new(Events::default());
        let ctx = Arc::new(Context {
            instances: instances.clone(),
            documents: documents.clone(),
            events: events.clone(),
            admission: Admission::new(None, None, Arc::new(AnyNamespace)),
            diagnostics: Arc::new(RwLock::new(Diagnostics::default())),
            metrics: Metrics::default(),
            max_attempts: 3,
        });
        Self {
            instances,
            documents,
            events,
            ctx,
        }
    }
}
