use crate::{Update, FIELD_MANAGER};
use gateway_controller_core::ResourceId;
use gateway_controller_k8s_api::{
    self as k8s,
    envoy::EnvoyPatchPolicy,
    networking::{HttpProxy, TrafficProtectionPolicy},
    ResourceExt,
};
use kubert::lease::Claim;
use prometheus_client::{metrics::counter::Counter, registry::Registry};
use std::sync::Arc;
use tokio::{
    sync::{mpsc, watch},
    time::{self, Duration},
};

/// Applies updates produced by the index while this instance holds the write
/// lease.
pub struct Controller {
    claims: watch::Receiver<Arc<Claim>>,
    client: k8s::Client,
    name: String,
    updates: mpsc::Receiver<Update>,
    patch_timeout: Duration,
    metrics: ControllerMetrics,
}

#[derive(Clone, Debug, Default)]
pub struct ControllerMetrics {
    patch_succeeded: Counter,
    patch_failed: Counter,
    patch_timeout: Counter,
    patch_dequeued: Counter,
}

#[derive(Debug)]
enum Outcome {
    Applied,
    NotFound,
    Conflict,
}

// === impl ControllerMetrics ===

impl ControllerMetrics {
    pub fn register(registry: &mut Registry) -> Self {
        let metrics = Self::default();
        registry.register(
            "patch_succeeded",
            "Number of writes that succeeded",
            metrics.patch_succeeded.clone(),
        );
        registry.register(
            "patch_failed",
            "Number of writes that failed",
            metrics.patch_failed.clone(),
        );
        registry.register(
            "patch_timeout",
            "Number of writes that timed out",
            metrics.patch_timeout.clone(),
        );
        registry.register(
            "patch_dequeued",
            "Number of updates dequeued by the controller",
            metrics.patch_dequeued.clone(),
        );
        metrics
    }
}

// === impl Controller ===

impl Controller {
    pub fn new(
        claims: watch::Receiver<Arc<Claim>>,
        client: k8s::Client,
        name: impl ToString,
        updates: mpsc::Receiver<Update>,
        patch_timeout: Duration,
        metrics: ControllerMetrics,
    ) -> Self {
        Self {
            claims,
            client,
            name: name.to_string(),
            updates,
            patch_timeout,
            metrics,
        }
    }

    pub async fn run(mut self) {
        while let Some(update) = self.updates.recv().await {
            self.metrics.patch_dequeued.inc();

            // Only the lease holder writes. Updates dropped here are recomputed
            // on the next reconciliation.
            if !self.claims.borrow().is_current_for(&self.name) {
                tracing::trace!(kind = update.kind(), "Not the leader; dropping update");
                continue;
            }

            let kind = update.kind();
            match time::timeout(self.patch_timeout, self.write(update)).await {
                Ok(Ok(Outcome::Applied)) => {
                    self.metrics.patch_succeeded.inc();
                }
                Ok(Ok(Outcome::NotFound)) => {
                    self.metrics.patch_succeeded.inc();
                    tracing::debug!(%kind, "Resource no longer exists");
                }
                Ok(Ok(Outcome::Conflict)) => {
                    self.metrics.patch_failed.inc();
                    tracing::info!(%kind, "Write conflicted; retrying on the next reconciliation");
                }
                Ok(Err(error)) => {
                    self.metrics.patch_failed.inc();
                    tracing::error!(%kind, %error, "Failed to write resource");
                }
                Err(_) => {
                    self.metrics.patch_timeout.inc();
                    tracing::error!(%kind, timeout = ?self.patch_timeout, "Write timed out");
                }
            }
        }
    }

    async fn write(&self, update: Update) -> Result<Outcome, k8s::Error> {
        let params = k8s::PatchParams::apply(FIELD_MANAGER);
        let res = match update {
            Update::ApplyDocument(document) => {
                let id = document_id(&document);
                tracing::debug!(namespace = %id.namespace, name = %id.name, "Applying EnvoyPatchPolicy");
                let api = k8s::Api::<EnvoyPatchPolicy>::namespaced(self.client.clone(), &id.namespace);
                api.patch(&id.name, &params.force(), &k8s::Patch::Apply(*document))
                    .await
                    .map(|_| ())
            }
            Update::DeleteDocument(id) => {
                tracing::debug!(namespace = %id.namespace, name = %id.name, "Deleting EnvoyPatchPolicy");
                let api = k8s::Api::<EnvoyPatchPolicy>::namespaced(self.client.clone(), &id.namespace);
                api.delete(&id.name, &k8s::DeleteParams::default())
                    .await
                    .map(|_| ())
            }
            Update::PolicyStatus { id, patch } => {
                let api =
                    k8s::Api::<TrafficProtectionPolicy>::namespaced(self.client.clone(), &id.namespace);
                api.patch_status(&id.name, &params, &patch).await.map(|_| ())
            }
            Update::ProxyStatus { id, patch } => {
                let api = k8s::Api::<HttpProxy>::namespaced(self.client.clone(), &id.namespace);
                api.patch_status(&id.name, &params, &patch).await.map(|_| ())
            }
        };

        match res {
            Ok(()) => Ok(Outcome::Applied),
            Err(k8s::Error::Api(error)) if error.code == 404 => Ok(Outcome::NotFound),
            Err(k8s::Error::Api(error)) if error.code == 409 => Ok(Outcome::Conflict),
            Err(error) => Err(error),
        }
    }
}

fn document_id(document: &EnvoyPatchPolicy) -> ResourceId {
    ResourceId::new(document.namespace().unwrap_or_default(), document.name_any())
}
