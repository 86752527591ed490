use crate::{convert, ConnectorIndex};
use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use anyhow::Result;
use chrono::{DateTime, Utc};
use gateway_controller_core::{
    self as core,
    connector::{self, HttpProxy},
    policy::TrafficProtectionPolicy,
    waf, Config, Gateway, HttpRoute, PatchDocument, ResourceId, Targets,
};
use gateway_controller_k8s_api::{
    self as k8s,
    envoy::{EnvoyPatchPolicy, EnvoyPatchPolicySpec},
    networking::{
        self, traffic_protection_policy::LocalPolicyTargetReference, HttpProxyStatus,
        PolicyAncestorStatus, TrafficProtectionPolicyStatus,
    },
    Condition, Resource, ResourceExt,
};
use gateway_controller_k8s_status::{
    ancestors,
    conditions::{self, ProxyProgrammed},
    make_patch, Update,
};
use kubert::lease::Claim;
use parking_lot::RwLock;
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};
use tokio::{
    sync::{mpsc, watch},
    time::{self, Duration, MissedTickBehavior},
};

pub type SharedIndex = Arc<RwLock<Index>>;

/// Holds the resources of every watched namespace and, on each change,
/// recomputes the patch documents and statuses for the changed namespace.
///
/// Writes are only emitted while this instance holds the write lease.
pub struct Index {
    name: String,
    claims: watch::Receiver<Arc<Claim>>,
    updates: mpsc::Sender<Update>,
    config: Config,
    /// When set, every patch document is created in this namespace.
    downstream_namespace: Option<String>,
    namespaces: HashMap<String, Namespace>,
}

#[derive(Debug, Default)]
struct Namespace {
    gateways: HashMap<String, Gateway>,
    routes: HashMap<String, HttpRoute>,
    policies: HashMap<String, PolicyState>,
    proxies: HashMap<String, ProxyState>,
    connectors: ConnectorIndex,
    /// Downstream documents created for this namespace, as last observed.
    documents: HashMap<ResourceId, EnvoyPatchPolicySpec>,
    sent: Sent,
}

#[derive(Debug)]
struct PolicyState {
    policy: TrafficProtectionPolicy,
    target_refs: Vec<LocalPolicyTargetReference>,
    ancestors: Vec<PolicyAncestorStatus>,
}

#[derive(Debug)]
struct ProxyState {
    /// Holds the conversion error of an invalid proxy.
    proxy: std::result::Result<HttpProxy, String>,
    generation: Option<i64>,
    conditions: Vec<Condition>,
}

/// What was last sent to the controller, so unchanged writes are skipped.
#[derive(Debug, Default)]
struct Sent {
    documents: HashMap<ResourceId, EnvoyPatchPolicySpec>,
    /// Deletes that were queued but not yet observed by the document watch.
    deleted: HashSet<ResourceId>,
    policies: HashMap<String, Vec<PolicyAncestorStatus>>,
    proxies: HashMap<String, Vec<Condition>>,
}

struct CompiledProxy {
    /// `None` when no HTTPS listener can carry the connector routes.
    document: Option<PatchDocument>,
    all_ready: bool,
}

/// The desired state of one namespace.
#[derive(Debug, Default)]
struct Desired {
    documents: BTreeMap<ResourceId, EnvoyPatchPolicy>,
    policies: BTreeMap<String, Vec<PolicyAncestorStatus>>,
    proxies: BTreeMap<String, Vec<Condition>>,
}

// === impl Index ===

impl Index {
    pub fn shared(
        name: impl ToString,
        claims: watch::Receiver<Arc<Claim>>,
        updates: mpsc::Sender<Update>,
        config: Config,
        downstream_namespace: Option<String>,
    ) -> SharedIndex {
        Arc::new(RwLock::new(Self {
            name: name.to_string(),
            claims,
            updates,
            config,
            downstream_namespace,
            namespaces: HashMap::new(),
        }))
    }

    /// Periodically recomputes every namespace, resending everything that
    /// differs from the observed state. Also runs as soon as this instance
    /// acquires the write lease.
    pub async fn run(index: SharedIndex, period: Duration) {
        let mut claims = index.read().claims.clone();
        let mut interval = time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                res = claims.changed() => {
                    if res.is_err() {
                        tracing::debug!("Lease claims closed");
                        return;
                    }
                }
            }

            let mut index = index.write();
            if !index.is_leader() {
                continue;
            }
            index.reconcile_all();
        }
    }

    fn is_leader(&self) -> bool {
        self.claims.borrow().is_current_for(&self.name)
    }

    pub(crate) fn reconcile_all(&mut self) {
        let namespaces = self.namespaces.keys().cloned().collect::<Vec<_>>();
        for ns in namespaces {
            if let Some(namespace) = self.namespaces.get_mut(&ns) {
                namespace.sent = Sent::default();
            }
            self.reconcile(&ns);
        }
    }

    fn downstream_namespace<'n>(&'n self, namespace: &'n str) -> &'n str {
        self.downstream_namespace.as_deref().unwrap_or(namespace)
    }

    /// Recomputes a namespace and sends whatever changed.
    fn reconcile(&mut self, ns: &str) {
        if !self.is_leader() {
            tracing::trace!(namespace = %ns, "Not the leader; skipping reconciliation");
            return;
        }

        let Some(namespace) = self.namespaces.get(ns) else {
            return;
        };
        let downstream = self.downstream_namespace(ns).to_string();
        let desired = namespace.desired(&self.config, ns, &downstream, now());

        let Some(namespace) = self.namespaces.get_mut(ns) else {
            return;
        };
        let updates = namespace.diff(ns, desired);
        for update in updates {
            if let Err(error) = self.updates.try_send(update) {
                tracing::warn!(namespace = %ns, %error, "Failed to queue update");
                // Forget what was sent so the next reconciliation retries.
                if let Some(namespace) = self.namespaces.get_mut(ns) {
                    namespace.sent = Sent::default();
                }
                return;
            }
        }

        if self.namespaces.get(ns).is_some_and(Namespace::is_empty) {
            self.namespaces.remove(ns);
        }
    }

    fn namespace(&mut self, ns: &str) -> &mut Namespace {
        self.namespaces.entry(ns.to_string()).or_default()
    }
}

impl kubert::index::IndexNamespacedResource<k8s::gateway::Gateway> for Index {
    fn apply(&mut self, resource: k8s::gateway::Gateway) {
        let namespace = resource.namespace().expect("Gateway must have a namespace");
        let name = resource.name_unchecked();
        let gateway = convert::gateway(ResourceId::new(&namespace, &name), &resource);

        let ns = self.namespace(&namespace);
        if ns.gateways.get(&name) == Some(&gateway) {
            return;
        }
        ns.gateways.insert(name, gateway);
        self.reconcile(&namespace);
    }

    fn delete(&mut self, namespace: String, name: String) {
        if self.namespace(&namespace).gateways.remove(&name).is_some() {
            self.reconcile(&namespace);
        }
    }

    // Since apply only reindexes a single Gateway at a time, there's no need
    // to handle resets specially.
}

impl kubert::index::IndexNamespacedResource<k8s::gateway::HttpRoute> for Index {
    fn apply(&mut self, resource: k8s::gateway::HttpRoute) {
        let namespace = resource.namespace().expect("HTTPRoute must have a namespace");
        let name = resource.name_unchecked();

        let route = match convert::http_route(ResourceId::new(&namespace, &name), &resource) {
            Ok(route) => route,
            Err(error) => {
                tracing::info!(%namespace, %name, %error, "Ignoring HTTPRoute");
                // A previously valid version of the route is no longer a target.
                <Self as kubert::index::IndexNamespacedResource<k8s::gateway::HttpRoute>>::delete(
                    self, namespace, name,
                );
                return;
            }
        };

        let ns = self.namespace(&namespace);
        if ns.routes.get(&name) == Some(&route) {
            return;
        }
        ns.routes.insert(name, route);
        self.reconcile(&namespace);
    }

    fn delete(&mut self, namespace: String, name: String) {
        if self.namespace(&namespace).routes.remove(&name).is_some() {
            self.reconcile(&namespace);
        }
    }
}

impl kubert::index::IndexNamespacedResource<networking::TrafficProtectionPolicy> for Index {
    fn apply(&mut self, resource: networking::TrafficProtectionPolicy) {
        let namespace = resource
            .namespace()
            .expect("TrafficProtectionPolicy must have a namespace");
        let name = resource.name_unchecked();

        let policy =
            convert::traffic_protection_policy(ResourceId::new(&namespace, &name), &resource);
        let state = PolicyState {
            policy,
            target_refs: resource.spec.target_refs.clone(),
            ancestors: resource.status.map(|s| s.ancestors).unwrap_or_default(),
        };

        let ns = self.namespace(&namespace);
        ns.policies.insert(name, state);
        self.reconcile(&namespace);
    }

    fn delete(&mut self, namespace: String, name: String) {
        let ns = self.namespace(&namespace);
        ns.sent.policies.remove(&name);
        if ns.policies.remove(&name).is_some() {
            self.reconcile(&namespace);
        }
    }
}

impl kubert::index::IndexNamespacedResource<networking::HttpProxy> for Index {
    fn apply(&mut self, resource: networking::HttpProxy) {
        let namespace = resource.namespace().expect("HTTPProxy must have a namespace");
        let name = resource.name_unchecked();

        let proxy = convert::http_proxy(ResourceId::new(&namespace, &name), &resource)
            .map_err(|error| {
                tracing::info!(%namespace, %name, %error, "Invalid HTTPProxy");
                error.to_string()
            });
        let state = ProxyState {
            proxy,
            generation: resource.metadata.generation,
            conditions: resource.status.map(|s| s.conditions).unwrap_or_default(),
        };

        let ns = self.namespace(&namespace);
        ns.proxies.insert(name, state);
        self.reconcile(&namespace);
    }

    fn delete(&mut self, namespace: String, name: String) {
        let ns = self.namespace(&namespace);
        ns.sent.proxies.remove(&name);
        if ns.proxies.remove(&name).is_some() {
            self.reconcile(&namespace);
        }
    }
}

impl kubert::index::IndexNamespacedResource<networking::Connector> for Index {
    fn apply(&mut self, resource: networking::Connector) {
        let namespace = resource
            .namespace()
            .expect("Connector must have a namespace");
        let name = resource.name_unchecked();

        if self.namespace(&namespace).connectors.apply(name, &resource) {
            self.reconcile(&namespace);
        }
    }

    fn delete(&mut self, namespace: String, name: String) {
        if self.namespace(&namespace).connectors.delete(&name) {
            self.reconcile(&namespace);
        }
    }
}

impl kubert::index::IndexNamespacedResource<EnvoyPatchPolicy> for Index {
    fn apply(&mut self, resource: EnvoyPatchPolicy) {
        let Some(upstream) = convert::document_upstream_namespace(&resource) else {
            return;
        };
        let namespace = resource
            .namespace()
            .expect("EnvoyPatchPolicy must have a namespace");
        let id = ResourceId::new(namespace, resource.name_unchecked());

        // Documents are only observed here. Writes happen on reconciliation.
        self.namespace(&upstream).documents.insert(id, resource.spec);
    }

    fn delete(&mut self, namespace: String, name: String) {
        let id = ResourceId::new(namespace, name);
        for ns in self.namespaces.values_mut() {
            ns.documents.remove(&id);
            ns.sent.deleted.remove(&id);
        }
    }
}

// === impl Namespace ===

impl Namespace {
    fn is_empty(&self) -> bool {
        self.gateways.is_empty()
            && self.routes.is_empty()
            && self.policies.is_empty()
            && self.proxies.is_empty()
            && self.connectors.is_empty()
            && self.documents.is_empty()
    }

    /// Runs the engine over the namespace's resources.
    fn desired(
        &self,
        config: &Config,
        ns: &str,
        downstream: &str,
        timestamp: DateTime<Utc>,
    ) -> Desired {
        let mut desired = Desired::default();

        // Targets and policies are sorted so that passes are deterministic.
        let gateways = sorted_values(&self.gateways);
        let routes = sorted_values(&self.routes);
        let policies = self
            .policies
            .values()
            .map(|s| s.policy.clone())
            .collect::<Vec<_>>();

        let mut targets = Targets::new(&gateways, &routes);
        let resolution = core::resolve(config, &mut targets, &policies);

        match waf::synthesize(&config.waf, downstream, &resolution.attachments) {
            Ok(documents) => {
                for doc in documents {
                    desired.insert_document(ns, &doc);
                }
            }
            Err(error) => {
                tracing::error!(namespace = %ns, %error, "Failed to synthesize traffic protection patches");
            }
        }

        for (name, state) in &self.policies {
            let statuses = resolution
                .statuses
                .get(&state.policy.id)
                .into_iter()
                .flat_map(|s| s.values());
            let ancestors = ancestors::merge(
                &state.ancestors,
                ancestors::desired(statuses, &config.controller_name, timestamp),
                &config.controller_name,
                ns,
                &state.target_refs,
            );
            desired.policies.insert(name.clone(), ancestors);
        }

        for (name, state) in &self.proxies {
            let programmed = match &state.proxy {
                Ok(proxy) => match self.compile_proxy(config, downstream, &gateways, &routes, proxy) {
                    Ok(None) => continue,
                    Ok(Some(compiled)) => {
                        if let Some(doc) = compiled.document {
                            desired.insert_document(ns, &doc);
                        }
                        if compiled.all_ready {
                            ProxyProgrammed::Programmed
                        } else {
                            ProxyProgrammed::ConnectorNotReady
                        }
                    }
                    Err(error) => {
                        tracing::info!(namespace = %ns, proxy = %name, %error, "Failed to compile connector patches");
                        ProxyProgrammed::Invalid(error.to_string())
                    }
                },
                Err(message) => ProxyProgrammed::Invalid(message.clone()),
            };
            let condition = conditions::programmed(&programmed, state.generation, timestamp);
            desired
                .proxies
                .insert(name.clone(), conditions::set_condition(&state.conditions, condition));
        }

        desired
    }

    /// Compiles the connector document for a proxy. Returns `None` when the
    /// proxy has no connector backends or its Gateway does not exist yet.
    fn compile_proxy(
        &self,
        config: &Config,
        downstream: &str,
        gateways: &[Gateway],
        routes: &[HttpRoute],
        proxy: &HttpProxy,
    ) -> Result<Option<CompiledProxy>> {
        let Some(gateway) = gateways.iter().find(|g| g.id.name == proxy.id.name) else {
            tracing::debug!(proxy = %proxy.id, "Gateway for HTTPProxy not found");
            return Ok(None);
        };
        let section = routes
            .iter()
            .find(|r| r.id.name == proxy.id.name)
            .and_then(|r| {
                r.parents.iter().find(|p| {
                    p.targets_gateway() && p.gateway_id(&r.id.namespace) == gateway.id
                })
            })
            .and_then(|p| p.section_name.as_deref());

        let backends = connector::resolve_backends(proxy, section, &self.connectors)?;
        if backends.is_empty() {
            return Ok(None);
        }
        let document = connector::compile(&config.tunnel, downstream, gateway, proxy, &backends)?;
        Ok(Some(CompiledProxy {
            document,
            all_ready: backends.all_ready(),
        }))
    }

    /// Returns the updates needed to move from what was observed and sent to
    /// what is desired, recording them as sent.
    fn diff(&mut self, ns: &str, desired: Desired) -> Vec<Update> {
        let mut updates = Vec::new();

        let stale = self
            .documents
            .keys()
            .chain(self.sent.documents.keys())
            .filter(|id| !desired.documents.contains_key(id))
            .cloned()
            .collect::<BTreeSet<_>>();
        for id in stale {
            self.sent.documents.remove(&id);
            // Observed documents are only forgotten once the watch reports
            // the delete, so a resync retries a delete that never landed.
            if !self.sent.deleted.insert(id.clone()) {
                continue;
            }
            tracing::debug!(namespace = %ns, document = %id, "Removing stale document");
            updates.push(Update::DeleteDocument(id));
        }

        for (id, document) in desired.documents {
            // A queued delete may still remove the observed document.
            let current = if self.sent.deleted.remove(&id) {
                None
            } else {
                self.sent
                    .documents
                    .get(&id)
                    .or_else(|| self.documents.get(&id))
            };
            if current == Some(&document.spec) {
                continue;
            }
            self.sent.documents.insert(id, document.spec.clone());
            updates.push(Update::ApplyDocument(Box::new(document)));
        }

        for (name, ancestors) in desired.policies {
            let Some(state) = self.policies.get(&name) else {
                continue;
            };
            let current = self.sent.policies.get(&name).unwrap_or(&state.ancestors);
            if *current == ancestors {
                continue;
            }
            let id = ResourceId::new(ns, name.clone());
            let patch = make_patch(
                &networking::TrafficProtectionPolicy::api_version(&()),
                &networking::TrafficProtectionPolicy::kind(&()),
                &name,
                TrafficProtectionPolicyStatus {
                    ancestors: ancestors.clone(),
                },
            );
            self.sent.policies.insert(name, ancestors);
            updates.push(Update::PolicyStatus { id, patch });
        }

        for (name, conditions) in desired.proxies {
            let Some(state) = self.proxies.get(&name) else {
                continue;
            };
            let current = self.sent.proxies.get(&name).unwrap_or(&state.conditions);
            if *current == conditions {
                continue;
            }
            let id = ResourceId::new(ns, name.clone());
            let patch = make_patch(
                &networking::HttpProxy::api_version(&()),
                &networking::HttpProxy::kind(&()),
                &name,
                HttpProxyStatus {
                    conditions: conditions.clone(),
                },
            );
            self.sent.proxies.insert(name, conditions);
            updates.push(Update::ProxyStatus { id, patch });
        }

        updates
    }
}

// === impl Desired ===

impl Desired {
    fn insert_document(&mut self, ns: &str, doc: &PatchDocument) {
        self.documents
            .insert(doc.id.clone(), convert::document(ns, doc));
    }
}

fn sorted_values<T: Clone>(map: &HashMap<String, T>) -> Vec<T> {
    let mut entries = map.iter().collect::<Vec<_>>();
    entries.sort_by(|(a, _), (b, _)| a.cmp(b));
    entries.into_iter().map(|(_, v)| v.clone()).collect()
}

#[cfg(not(test))]
fn now() -> DateTime<Utc> {
    Utc::now()
}

#[cfg(test)]
fn now() -> DateTime<Utc> {
    DateTime::<Utc>::MIN_UTC
}
