use crate::{CustomResourceStateMetrics, Error, Result};
use async_trait::async_trait;
use common::{context::get_reporter, document::DocumentTarget, predicates::NamespaceLookup};
use k8s_openapi::api::core::v1::{ConfigMap, Namespace};
use kube::{
    Resource, ResourceExt,
    api::{Api, Patch, PatchParams, PostParams},
    client::Client,
    runtime::events::{Event, EventType, Recorder, Reporter},
};
use std::collections::BTreeMap;

/// Persistence of the instances.
///
/// `update` and `update_status` are separate writes, each checked against the
/// resource version carried by the object.
#[async_trait]
pub trait InstanceStore: Send + Sync {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<CustomResourceStateMetrics>>;
    async fn update(&self, inst: &CustomResourceStateMetrics) -> Result<CustomResourceStateMetrics>;
    async fn update_status(&self, inst: &CustomResourceStateMetrics) -> Result<CustomResourceStateMetrics>;
}

/// Persistence of the shared documents
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, target: &DocumentTarget) -> Result<Option<ConfigMap>>;
    /// Fails with `Error::AlreadyExists` when someone created it first
    async fn create(&self, doc: &ConfigMap) -> Result<ConfigMap>;
    /// Fails with `Error::Conflict` when the document changed since it was read
    async fn update(&self, doc: &ConfigMap) -> Result<ConfigMap>;
}

/// Fire-and-forget event recording
pub trait EventSink: Send + Sync {
    fn record(&self, inst: &CustomResourceStateMetrics, type_: EventType, reason: &str, message: String);
}

pub struct KubeInstanceStore {
    client: Client,
}

impl KubeInstanceStore {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<CustomResourceStateMetrics> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl InstanceStore for KubeInstanceStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<CustomResourceStateMetrics>> {
        self.api(namespace).get_opt(name).await.map_err(Error::from_kube)
    }

    async fn update(&self, inst: &CustomResourceStateMetrics) -> Result<CustomResourceStateMetrics> {
        self.api(&inst.namespace().unwrap_or_default())
            .replace(&inst.name_any(), &PostParams::default(), inst)
            .await
            .map_err(Error::from_kube)
    }

    async fn update_status(&self, inst: &CustomResourceStateMetrics) -> Result<CustomResourceStateMetrics> {
        let patch = Patch::Merge(serde_json::json!({
            "metadata": {
                "resourceVersion": inst.resource_version(),
            },
            "status": inst.status,
        }));
        self.api(&inst.namespace().unwrap_or_default())
            .patch_status(&inst.name_any(), &PatchParams::default(), &patch)
            .await
            .map_err(Error::from_kube)
    }
}

pub struct KubeDocumentStore {
    client: Client,
}

impl KubeDocumentStore {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<ConfigMap> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl DocumentStore for KubeDocumentStore {
    async fn get(&self, target: &DocumentTarget) -> Result<Option<ConfigMap>> {
        self.api(&target.namespace)
            .get_opt(&target.name)
            .await
            .map_err(Error::from_kube)
    }

    async fn create(&self, doc: &ConfigMap) -> Result<ConfigMap> {
        self.api(&doc.namespace().unwrap_or_default())
            .create(&PostParams::default(), doc)
            .await
            .map_err(Error::from_kube)
    }

    async fn update(&self, doc: &ConfigMap) -> Result<ConfigMap> {
        self.api(&doc.namespace().unwrap_or_default())
            .replace(&doc.name_any(), &PostParams::default(), doc)
            .await
            .map_err(Error::from_kube)
    }
}

pub struct KubeEventSink {
    client: Client,
    reporter: Reporter,
}

impl KubeEventSink {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self {
            client,
            reporter: get_reporter(),
        }
    }
}

impl EventSink for KubeEventSink {
    fn record(&self, inst: &CustomResourceStateMetrics, type_: EventType, reason: &str, message: String) {
        let recorder = Recorder::new(self.client.clone(), self.reporter.clone(), inst.object_ref(&()));
        let ev = Event {
            type_,
            reason: reason.to_string(),
            note: Some(message),
            action: reason.to_string(),
            secondary: None,
        };
        tokio::spawn(async move {
            if let Err(e) = recorder.publish(ev).await {
                tracing::warn!("Ignoring {e:?} while sending an event");
            }
        });
    }
}

pub struct KubeNamespaces {
    client: Client,
}

impl KubeNamespaces {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl NamespaceLookup for KubeNamespaces {
    async fn namespace_labels(&self, name: &str) -> Result<Option<BTreeMap<String, String>>> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        Ok(api
            .get_opt(name)
            .await
            .map_err(Error::from_kube)?
            .map(|ns| ns.labels().clone()))
    }
}
