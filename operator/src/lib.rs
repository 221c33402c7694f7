use async_trait::async_trait;
use kube::runtime::controller::Action;
use manager::Context;
use std::sync::Arc;

pub use common::{Error, Result};

#[async_trait]
pub trait Reconciler {
    async fn reconcile(&self, ctx: Arc<Context>) -> Result<Action>;
    async fn cleanup(&self, ctx: Arc<Context>) -> Result<Action>;
}

pub mod admission;
pub mod config;
pub mod crsm;
pub mod store;

/// State machinery for kube, as exposeable to actix
pub mod manager;
pub use manager::Manager;

/// Generated type, for crdgen
pub use common::crsm::CustomResourceStateMetrics;

/// Metrics
mod metrics;
pub use metrics::Metrics;

#[cfg(test)]
mod mock;
