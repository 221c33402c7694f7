use crate::{
    CustomResourceStateMetrics, Error, Metrics, Result,
    admission::Admission,
    config::Parameters,
    crsm,
    store::{DocumentStore, EventSink, InstanceStore, KubeDocumentStore, KubeEventSink, KubeInstanceStore, KubeNamespaces},
};
use chrono::{DateTime, Utc};
use futures::{FutureExt, StreamExt, future::BoxFuture};
use kube::{
    api::{Api, ListParams},
    client::Client,
    runtime::{controller::Controller, events::Reporter, watcher::Config},
};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;

// Context for our reconciler
pub struct Context {
    /// Instance persistence
    pub instances: Arc<dyn InstanceStore>,
    /// Shared document persistence
    pub documents: Arc<dyn DocumentStore>,
    /// Event recording
    pub events: Arc<dyn EventSink>,
    /// Filter on the incoming changes
    pub admission: Admission,
    /// Diagnostics read by the web server
    pub diagnostics: Arc<RwLock<Diagnostics>>,
    /// Prometheus metrics
    pub metrics: Metrics,
    /// Attempts of a reconciliation that keeps hitting write conflicts
    pub max_attempts: u32,
}

/// Diagnostics to be exposed by the web server
#[derive(Clone, Serialize)]
pub struct Diagnostics {
    pub last_event: DateTime<Utc>,
    #[serde(skip)]
    pub reporter: Reporter,
}
impl Default for Diagnostics {
    fn default() -> Self {
        Self {
            last_event: Utc::now(),
            reporter: common::context::get_reporter(),
        }
    }
}

/// Data owned by the Manager
#[derive(Clone, Default)]
pub struct Manager {
    /// Diagnostics populated by the reconciler
    diagnostics: Arc<RwLock<Diagnostics>>,
    /// Metrics populated by the reconciler
    metrics: Metrics,
}

/// Manager that owns a Controller for CustomResourceStateMetrics
impl Manager {
    /// Lifecycle initialization interface for app
    ///
    /// This returns a `Manager` that drives a `Controller` + a future to be awaited
    /// It is up to `main` to wait for the controller stream.
    pub async fn new(params: &Parameters) -> Result<(Self, BoxFuture<'static, ()>)> {
        let client = Client::try_default().await.map_err(Error::KubeError)?;
        let manager = Manager::default();

        let insts = Api::<CustomResourceStateMetrics>::all(client.clone());
        // Ensure CRD is installed before loop-watching, and count the instances already holding a block
        let existing = insts.list(&ListParams::default()).await.map_err(|e| {
            tracing::error!("is the crd installed? please run: cargo run --bin crdgen | kubectl apply -f -");
            Error::KubeError(e)
        })?;
        let holding = existing.items.iter().filter(|i| i.has_finalizer()).count();
        manager.metrics.instances.set(i64::try_from(holding).unwrap_or(i64::MAX));
        tracing::info!("Found {holding} CustomResourceStateMetrics holding a block");

        let context = Arc::new(Context {
            instances: Arc::new(KubeInstanceStore::new(client.clone())),
            documents: Arc::new(KubeDocumentStore::new(client.clone())),
            events: Arc::new(KubeEventSink::new(client.clone())),
            admission: Admission::new(
                params.selector()?,
                params.namespace_selector()?,
                Arc::new(KubeNamespaces::new(client)),
            ),
            diagnostics: manager.diagnostics.clone(),
            metrics: manager.metrics.clone(),
            max_attempts: params.max_attempts,
        });

        // All good. Start controller and return its future.
        let controller = Controller::new(insts, Config::default().any_semantic())
            .shutdown_on_signal()
            .run(crsm::reconcile, crsm::error_policy, context)
            .filter_map(|x| async move { std::result::Result::ok(x) })
            .for_each(|_| futures::future::ready(()))
            .boxed();

        Ok((manager, controller))
    }

    /// Metrics getter
    pub fn metrics(&self) -> String {
        self.metrics.encode().unwrap_or_else(|e| {
            tracing::warn!("Failed to encode metrics: {e}");
            String::new()
        })
    }

    /// State getter
    pub async fn diagnostics(&self) -> Diagnostics {
        self.diagnostics.read().await.clone()
    }
}
