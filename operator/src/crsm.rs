use crate::{CustomResourceStateMetrics, Error, Reconciler, Result, manager::Context};
use async_trait::async_trait;
use chrono::Utc;
use common::{
    block::{HEADER, remove_block, render_block, upsert_block},
    crsm::{ConditionsReason, instance_key},
    document::{SharedDocument, new_document},
    encoder::encode_resources,
};
use kube::{
    ResourceExt,
    runtime::{controller::Action, events::EventType},
};
use std::sync::Arc;
use tokio::time::Duration;
use tracing::{Span, debug, field, info, instrument, warn};

/// What a reconciliation has to do with an instance, derived from its current state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Deleting,
    Creating,
    Updating,
}

impl Phase {
    #[must_use]
    pub fn of(inst: &CustomResourceStateMetrics) -> Self {
        if inst.is_deleting() {
            Phase::Deleting
        } else if inst.metadata.generation == Some(1) && !inst.has_finalizer() {
            Phase::Creating
        } else {
            Phase::Updating
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddOutcome {
    /// The document didn't exist and got created with the block
    Created,
    /// The identical block was already there, nothing written
    Unchanged,
    /// The block got appended or replaced in the existing document
    Written,
}

impl AddOutcome {
    fn message(self) -> &'static str {
        match self {
            AddOutcome::Created => "Finished the addition of resources into a newly created ConfigMap.",
            AddOutcome::Unchanged => "The same resources already exist in the ConfigMap.",
            AddOutcome::Written => "Finished the addition of resources into an existing ConfigMap.",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RemoveOutcome {
    NoDocument,
    NoBlock,
    Removed,
}

impl RemoveOutcome {
    fn message(self) -> &'static str {
        match self {
            RemoveOutcome::NoDocument => "The ConfigMap with the resources doesn't exist.",
            RemoveOutcome::NoBlock => "Resources don't exist in the ConfigMap.",
            RemoveOutcome::Removed => "Finished the removal of resources from the ConfigMap.",
        }
    }
}

/// Writes the block of `inst` into its shared document
pub async fn add_to_document(inst: &CustomResourceStateMetrics, ctx: &Context) -> Result<AddOutcome> {
    let fragment = encode_resources(&inst.spec.resources)?;
    let target = inst.target();
    let key = inst.instance_key();
    match ctx.documents.get(&target).await? {
        None => {
            debug!("Creating ConfigMap {target} for {key}");
            let content = format!("{HEADER}{}", render_block(&key, &fragment));
            ctx.documents.create(&new_document(&target, content)).await?;
            Ok(AddOutcome::Created)
        }
        Some(mut doc) => match upsert_block(doc.content(&target.key), &key, &fragment).into_document() {
            None => Ok(AddOutcome::Unchanged),
            Some(content) => {
                debug!("Updating ConfigMap {target} for {key}");
                doc.set_content(&target.key, content);
                ctx.documents.update(&doc).await?;
                Ok(AddOutcome::Written)
            }
        },
    }
}

/// Removes the block of `inst` from its shared document
pub async fn remove_from_document(inst: &CustomResourceStateMetrics, ctx: &Context) -> Result<RemoveOutcome> {
    let target = inst.target();
    let Some(mut doc) = ctx.documents.get(&target).await? else {
        return Ok(RemoveOutcome::NoDocument);
    };
    let Some(content) = remove_block(doc.content(&target.key), &inst.instance_key()) else {
        return Ok(RemoveOutcome::NoBlock);
    };
    doc.set_content(&target.key, content);
    ctx.documents.update(&doc).await?;
    Ok(RemoveOutcome::Removed)
}

/// Persists the Ready condition, when it changes
async fn set_ready(
    inst: &mut CustomResourceStateMetrics,
    ctx: &Context,
    status: bool,
    reason: ConditionsReason,
    message: &str,
) -> Result<()> {
    if inst.set_ready(status, reason, message) {
        *inst = ctx.instances.update_status(inst).await?;
    }
    Ok(())
}

/// Reports a failure on the instance before handing the error back
async fn fail(
    inst: &mut CustomResourceStateMetrics,
    ctx: &Context,
    reason: ConditionsReason,
    what: &str,
    error: Error,
) -> Error {
    let message = format!("{what}: {error}");
    ctx.events
        .record(inst, EventType::Warning, reason.as_str(), message.clone());
    if let Err(e) = set_ready(inst, ctx, false, reason, &message).await {
        ctx.events.record(
            inst,
            EventType::Warning,
            reason.as_str(),
            format!("Failed to update status: {e}"),
        );
        return e;
    }
    error
}

fn record(ctx: &Context, inst: &CustomResourceStateMetrics, reason: ConditionsReason, message: &str) {
    ctx.events
        .record(inst, EventType::Normal, reason.as_str(), message.to_string());
}

async fn create(inst: &mut CustomResourceStateMetrics, ctx: &Context) -> Result<()> {
    let adding = ConditionsReason::Adding;
    info!("Creating resources for {}", inst.instance_key());
    record(ctx, inst, adding, "Adding resources into the ConfigMap.");
    set_ready(inst, ctx, false, adding, "Adding resources into the ConfigMap.").await?;
    let outcome = match add_to_document(inst, ctx).await {
        Ok(o) => o,
        Err(e) => return Err(fail(inst, ctx, adding, "Failed to add resources into the ConfigMap", e).await),
    };
    record(ctx, inst, adding, outcome.message());
    set_ready(inst, ctx, true, adding, outcome.message()).await?;

    debug!("Adding finalizer to {}", inst.instance_key());
    inst.add_finalizer();
    match ctx.instances.update(inst).await {
        Ok(updated) => *inst = updated,
        Err(e) => return Err(fail(inst, ctx, adding, "Failed to add finalizer", e).await),
    }
    ctx.metrics.inc_instances();
    Ok(())
}

async fn update(inst: &mut CustomResourceStateMetrics, ctx: &Context) -> Result<()> {
    let adding = ConditionsReason::Adding;
    info!("Updating resources for {}", inst.instance_key());
    record(ctx, inst, adding, "Updating resources in the ConfigMap.");
    let outcome = match add_to_document(inst, ctx).await {
        Ok(o) => o,
        Err(e) => return Err(fail(inst, ctx, adding, "Failed to update the ConfigMap", e).await),
    };
    record(ctx, inst, adding, outcome.message());
    set_ready(inst, ctx, true, adding, outcome.message()).await
}

#[async_trait]
impl Reconciler for CustomResourceStateMetrics {
    // Reconcile (for non-deletion related changes)
    async fn reconcile(&self, ctx: Arc<Context>) -> Result<Action> {
        ctx.diagnostics.write().await.last_event = Utc::now();
        let mut inst = self.clone();
        if Phase::of(self) == Phase::Creating {
            create(&mut inst, &ctx).await?;
        } else {
            update(&mut inst, &ctx).await?;
        }
        Ok(Action::await_change())
    }

    // Reconcile with finalize cleanup (the object was deleted)
    async fn cleanup(&self, ctx: Arc<Context>) -> Result<Action> {
        ctx.diagnostics.write().await.last_event = Utc::now();
        let removing = ConditionsReason::Removing;
        let mut inst = self.clone();
        info!("Deleting resources for {}", inst.instance_key());
        record(&ctx, &inst, removing, "Deleting resource.");
        let outcome = match remove_from_document(&inst, &ctx).await {
            Ok(o) => o,
            Err(e) => {
                return Err(fail(&mut inst, &ctx, removing, "Failed to delete resources from the ConfigMap", e).await);
            }
        };
        record(&ctx, &inst, removing, outcome.message());
        set_ready(&mut inst, &ctx, false, removing, outcome.message()).await?;

        if inst.has_finalizer() {
            debug!("Deleting finalizer from {}", inst.instance_key());
            inst.remove_finalizer();
            if let Err(e) = ctx.instances.update(&inst).await {
                return Err(fail(&mut inst, &ctx, removing, "Failed to delete finalizer", e).await);
            }
            ctx.metrics.dec_instances();
        }
        Ok(Action::await_change())
    }
}

/// Reconciles the stored version of an instance, a missing one needs nothing.
///
/// The version reconciled successfully becomes the reference for admission.
pub async fn reconcile_key(ctx: Arc<Context>, namespace: &str, name: &str) -> Result<Action> {
    let key = instance_key(name, namespace);
    let Some(inst) = ctx.instances.get(namespace, name).await? else {
        debug!("CustomResourceStateMetrics {key} is gone");
        ctx.admission.forget(&key).await;
        return Ok(Action::await_change());
    };
    let res = match Phase::of(&inst) {
        Phase::Deleting => inst.cleanup(ctx.clone()).await,
        Phase::Creating | Phase::Updating => inst.reconcile(ctx.clone()).await,
    };
    if res.is_ok() && !inst.is_deleting() {
        ctx.admission.remember(&inst).await;
    } else {
        ctx.admission.forget(&key).await;
    }
    res
}

/// Runs `reconcile_key` again from a fresh read while writes conflict
pub async fn reconcile_with_retry(ctx: Arc<Context>, namespace: &str, name: &str) -> Result<Action> {
    let mut attempt = 1;
    loop {
        match reconcile_key(ctx.clone(), namespace, name).await {
            Err(e) if e.is_conflict() && attempt < ctx.max_attempts => {
                debug!("Attempt {attempt} for {name}@{namespace} conflicted: {e}");
                attempt += 1;
            }
            res => return res,
        }
    }
}

#[instrument(skip(ctx, inst), fields(instance))]
pub async fn reconcile(inst: Arc<CustomResourceStateMetrics>, ctx: Arc<Context>) -> Result<Action> {
    let key = inst.instance_key();
    Span::current().record("instance", field::display(&key));
    if !ctx.admission.admit(&inst).await {
        debug!("Ignoring change without effect on {key}");
        return Ok(Action::await_change());
    }
    let _mes = ctx.metrics.reconcile.count_and_measure();
    let res = reconcile_with_retry(ctx.clone(), &inst.namespace().unwrap_or_default(), &inst.name_any()).await;
    if res.is_err() {
        ctx.admission.forget(&key).await;
    }
    res
}

#[must_use]
pub fn error_policy(inst: Arc<CustomResourceStateMetrics>, error: &Error, ctx: Arc<Context>) -> Action {
    warn!("reconcile failed for '{}': {:?}", inst.instance_key(), error);
    ctx.metrics.reconcile.reconcile_failure(&inst, error);
    if error.is_permanent() {
        Action::await_change()
    } else if error.is_conflict() {
        Action::requeue(Duration::from_secs(5))
    } else {
        Action::requeue(Duration::from_secs(5 * 60))
    }
}
