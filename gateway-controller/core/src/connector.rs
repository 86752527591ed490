//! Routes HTTPProxy rules whose backends are reached through a Connector
//! tunnel rather than a direct network address.
//!
//! The proxy already has a cluster and routes for every HTTPRoute rule. For
//! connector rules, those routes are redirected to a tunnel-aware cluster,
//! CONNECT upgrades are enabled on the HTTPS listeners, and CONNECT routes are
//! added so that tunneled clients can reach the backend.

use crate::{
    gateway::{Gateway, PathMatch, RouteMatch},
    jsonpath,
    patch::{JsonPatch, PatchDocument, PatchError, ResourceType},
    ResourceId, TunnelConfig, TunnelMode,
};
use std::collections::{BTreeMap, BTreeSet};

mod endpoint;
mod routes;
#[cfg(test)]
mod tests;

pub use self::endpoint::Endpoint;

/// An HTTPProxy as seen by the tunnel compiler.
#[derive(Clone, Debug, PartialEq)]
pub struct HttpProxy {
    pub id: ResourceId,
    pub rules: Vec<ProxyRule>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProxyRule {
    pub matches: Vec<RouteMatch>,
    pub backends: Vec<ProxyBackend>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProxyBackend {
    pub endpoint: String,
    /// Name of a Connector in the proxy's namespace.
    pub connector: Option<String>,
    pub tls_hostname: Option<String>,
}

/// Resolves a Connector's readiness and tunnel identity.
pub trait ResolveConnector {
    fn resolve_connector(&self, namespace: &str, name: &str) -> Result<ConnectorState, ConnectorError>;
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ConnectorState {
    Ready { identity: String },
    NotReady,
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectorError {
    #[error("connector {0} is ready but has not published a public key")]
    MissingIdentity(ResourceId),
}

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("rule {rule} has {count} backends; rules with a connector backend require exactly one")]
    MultipleBackends { rule: usize, count: usize },

    #[error("invalid endpoint {endpoint:?}: {source}")]
    InvalidEndpoint {
        endpoint: String,
        #[source]
        source: http::uri::InvalidUri,
    },

    #[error("endpoint {0:?} has no host")]
    MissingHost(String),

    #[error("endpoint {0:?} must use the http or https scheme")]
    UnsupportedScheme(String),

    #[error("endpoint {0:?} is an IP address and requires a TLS hostname")]
    MissingTlsHostname(String),

    #[error(transparent)]
    Connector(#[from] ConnectorError),
}

/// A connector backend ready to be routed through its tunnel.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ConnectorBackendPatch {
    /// Restricts the backend to a single Gateway listener.
    pub section_name: Option<String>,
    pub rule_index: usize,
    pub match_index: usize,
    pub target_host: String,
    pub target_port: u16,
    /// The tunnel endpoint's public key identity.
    pub identity: String,
    pub tls_hostname: Option<String>,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ResolvedBackends {
    /// Restricts offline redirection to a single Gateway listener.
    pub section_name: Option<String>,
    pub online: Vec<ConnectorBackendPatch>,
    /// Rules whose connector is not ready.
    pub offline_rules: Vec<usize>,
}

/// A route configuration together with the proxy listener and filter chain
/// that serve it.
#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
struct RouteConfig {
    name: String,
    proxy_listener: String,
}

// === impl ResolvedBackends ===

impl ResolvedBackends {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.online.is_empty() && self.offline_rules.is_empty()
    }

    /// True when every connector backend is ready.
    #[inline]
    pub fn all_ready(&self) -> bool {
        self.offline_rules.is_empty()
    }
}

/// Resolves the connector backends of every rule.
///
/// Rules without a connector backend are ignored. Backends whose connector is
/// not ready are reported as offline rather than failing resolution.
pub fn resolve_backends(
    proxy: &HttpProxy,
    section_name: Option<&str>,
    connectors: &impl ResolveConnector,
) -> Result<ResolvedBackends, BackendError> {
    let mut resolved = ResolvedBackends {
        section_name: section_name.map(Into::into),
        ..Default::default()
    };

    for (rule_index, rule) in proxy.rules.iter().enumerate() {
        let Some(connector) = rule.backends.iter().find_map(|b| b.connector.as_deref()) else {
            continue;
        };
        if rule.backends.len() != 1 {
            return Err(BackendError::MultipleBackends {
                rule: rule_index,
                count: rule.backends.len(),
            });
        }
        let backend = &rule.backends[0];
        let endpoint = Endpoint::parse(&backend.endpoint)?;
        if endpoint.is_tls() && endpoint.is_ip_literal() && backend.tls_hostname.is_none() {
            return Err(BackendError::MissingTlsHostname(backend.endpoint.clone()));
        }

        let identity = match connectors.resolve_connector(&proxy.id.namespace, connector)? {
            ConnectorState::Ready { identity } => identity,
            ConnectorState::NotReady => {
                tracing::debug!(proxy = %proxy.id, %connector, rule = rule_index, "Connector is not ready");
                resolved.offline_rules.push(rule_index);
                continue;
            }
        };

        for match_index in 0..rule.matches.len().max(1) {
            resolved.online.push(ConnectorBackendPatch {
                section_name: section_name.map(Into::into),
                rule_index,
                match_index,
                target_host: endpoint.host.clone(),
                target_port: endpoint.port,
                identity: identity.clone(),
                tls_hostname: backend.tls_hostname.clone(),
            });
        }
    }

    Ok(resolved)
}

/// Name of the connector document for an HTTPProxy.
pub fn document_name(proxy: &str) -> String {
    format!("{proxy}-connector")
}

/// Compiles the patch document that routes an HTTPProxy's connector
/// backends through their tunnels. Returns `None` if the proxy has no
/// connector backends.
///
/// The HTTPRoute generated for the proxy shares the proxy's name.
pub fn compile(
    config: &TunnelConfig,
    namespace: &str,
    gateway: &Gateway,
    proxy: &HttpProxy,
    backends: &ResolvedBackends,
) -> Result<Option<PatchDocument>, PatchError> {
    if backends.is_empty() {
        return Ok(None);
    }

    // CONNECT routes are only added to HTTPS route configurations.
    let mut all_route_configs = BTreeSet::new();
    for backend in &backends.online {
        all_route_configs.extend(route_configs(gateway, namespace, backend.section_name.as_deref()));
    }
    let offline_route_configs = if backends.offline_rules.is_empty() {
        Vec::new()
    } else {
        route_configs(gateway, namespace, backends.section_name.as_deref())
    };
    if all_route_configs.is_empty() && offline_route_configs.is_empty() {
        tracing::debug!(proxy = %proxy.id, gateway = %gateway.id, "No HTTPS listener to route connector backends through");
        return Ok(None);
    }

    let names = Names::new(namespace, &proxy.id.name);
    let mut patches = Vec::new();

    let mut rules = BTreeMap::<usize, &ConnectorBackendPatch>::new();
    for backend in &backends.online {
        rules.entry(backend.rule_index).or_insert(backend);
    }

    // Clusters.
    if config.mode == TunnelMode::InternalListener {
        for (rule_index, backend) in &rules {
            let cluster = names.tunnel_cluster(*rule_index);
            patches.push(JsonPatch::add(
                ResourceType::Cluster,
                cluster.clone(),
                "",
                routes::internal_listener_cluster(config, &cluster, backend),
            ));
        }
    }
    if !offline_route_configs.is_empty() {
        let cluster = names.offline_cluster();
        patches.push(JsonPatch::add(
            ResourceType::Cluster,
            cluster.clone(),
            "",
            routes::offline_cluster(&cluster),
        ));
    }

    // CONNECT upgrades, once per HTTPS listener filter chain.
    for rc in &all_route_configs {
        patches.extend(routes::enable_connect(&rc.proxy_listener, &rc.name));
    }

    // Authorities, so CONNECT requests match the virtual host.
    let mut domains = BTreeSet::new();
    for backend in &backends.online {
        for rc in route_configs(gateway, namespace, backend.section_name.as_deref()) {
            if domains.insert((backend.target_host.clone(), rc.name.clone())) {
                patches.push(JsonPatch::add(
                    ResourceType::RouteConfiguration,
                    rc.name,
                    "/virtual_hosts/0/domains/-",
                    serde_json::Value::String(backend.target_host.clone()),
                ));
            }
        }
    }

    // CONNECT routes. Each is inserted at the head of the route table, so the
    // fallback goes first and the extended routes follow in reverse so that
    // the first rule ends up at the top.
    if let Some(fallback_rule) = fallback_rule(proxy, &backends.online) {
        for rc in &all_route_configs {
            patches.push(routes::insert_route(
                &rc.name,
                routes::connect_fallback_route(
                    &names.fallback_route(),
                    &names.rule_cluster(fallback_rule),
                ),
            ));
            for backend in backends.online.iter().rev() {
                let Some(path) = extended_connect_path(proxy, backend) else {
                    continue;
                };
                if !route_configs(gateway, namespace, backend.section_name.as_deref()).contains(rc) {
                    continue;
                }
                patches.push(routes::insert_route(
                    &rc.name,
                    routes::extended_connect_route(
                        &names.connect_route(backend.rule_index, backend.match_index),
                        path,
                        &names.rule_cluster(backend.rule_index),
                    ),
                ));
            }
        }
    }

    // Redirect each rule's routes, including the CONNECT routes added above,
    // to the tunnel.
    for (rule_index, backend) in &rules {
        let selector = jsonpath::routes_to_cluster(&names.rule_cluster(*rule_index));
        for rc in route_configs(gateway, namespace, backend.section_name.as_deref()) {
            match config.mode {
                TunnelMode::InternalListener => {
                    patches.push(
                        JsonPatch::replace(
                            ResourceType::RouteConfiguration,
                            rc.name,
                            "/route/cluster",
                            serde_json::Value::String(names.tunnel_cluster(*rule_index)),
                        )
                        .at(selector.clone()),
                    );
                }
                TunnelMode::HeaderInjection => {
                    // Headers first: once the cluster is rewritten the selector
                    // no longer matches.
                    patches.push(
                        JsonPatch::add(
                            ResourceType::RouteConfiguration,
                            rc.name.clone(),
                            "/request_headers_to_add",
                            routes::tunnel_headers(backend),
                        )
                        .at(selector.clone()),
                    );
                    patches.push(
                        JsonPatch::replace(
                            ResourceType::RouteConfiguration,
                            rc.name,
                            "/route/cluster",
                            serde_json::Value::String(config.gateway_cluster.clone()),
                        )
                        .at(selector.clone()),
                    );
                }
            }
        }
    }

    for rule_index in &backends.offline_rules {
        let selector = jsonpath::routes_to_cluster(&names.rule_cluster(*rule_index));
        for rc in &offline_route_configs {
            patches.push(
                JsonPatch::replace(
                    ResourceType::RouteConfiguration,
                    rc.name.clone(),
                    "/route/cluster",
                    serde_json::Value::String(names.offline_cluster()),
                )
                .at(selector.clone()),
            );
        }
    }

    Ok(Some(PatchDocument {
        id: ResourceId::new(namespace, document_name(&proxy.id.name)),
        gateway: gateway.id.name.clone(),
        patches,
    }))
}

/// Selects the HTTPS route configurations a backend applies to: all of them
/// without a section, otherwise only the named listener's (if it is HTTPS).
fn route_configs(gateway: &Gateway, namespace: &str, section_name: Option<&str>) -> Vec<RouteConfig> {
    gateway
        .https_listeners()
        .filter(|l| section_name.map_or(true, |s| s == l.name))
        .map(|l| RouteConfig {
            name: gateway.https_route_config_name(namespace, &l.name),
            proxy_listener: l.https_proxy_listener_name(),
        })
        .collect()
}

fn backend_match<'p>(proxy: &'p HttpProxy, backend: &ConnectorBackendPatch) -> Option<&'p RouteMatch> {
    proxy
        .rules
        .get(backend.rule_index)?
        .matches
        .get(backend.match_index)
}

/// The rule targeted by the path-agnostic CONNECT route: the first rule that
/// explicitly matches CONNECT on `/`, or else the first backend's rule.
fn fallback_rule(proxy: &HttpProxy, backends: &[ConnectorBackendPatch]) -> Option<usize> {
    backends
        .iter()
        .find(|b| {
            backend_match(proxy, b)
                .is_some_and(|m| m.is_connect() && m.is_root_path())
        })
        .or_else(|| backends.first())
        .map(|b| b.rule_index)
}

/// The path of an explicit CONNECT match on anything other than `/`.
fn extended_connect_path<'p>(proxy: &'p HttpProxy, backend: &ConnectorBackendPatch) -> Option<&'p PathMatch> {
    let m = backend_match(proxy, backend)?;
    if !m.is_connect() {
        return None;
    }
    match m.path.as_ref()? {
        PathMatch::Exact(p) | PathMatch::Prefix(p) if p == "/" => None,
        path @ (PathMatch::Exact(_) | PathMatch::Prefix(_)) => Some(path),
        PathMatch::RegularExpression(_) => {
            tracing::debug!(proxy = %proxy.id, rule = backend.rule_index, "Regular expression CONNECT paths are not supported");
            None
        }
    }
}

/// Deterministic names derived from the proxy's HTTPRoute.
struct Names<'a> {
    namespace: &'a str,
    route: &'a str,
}

impl<'a> Names<'a> {
    fn new(namespace: &'a str, route: &'a str) -> Self {
        Self { namespace, route }
    }

    /// The cluster the proxy generates for an HTTPRoute rule.
    fn rule_cluster(&self, rule: usize) -> String {
        format!("httproute/{}/{}/rule/{rule}", self.namespace, self.route)
    }

    fn tunnel_cluster(&self, rule: usize) -> String {
        format!("{}/{}/rule/{rule}", self.namespace, self.route)
    }

    fn offline_cluster(&self) -> String {
        format!("{}/{}/connector-offline", self.namespace, self.route)
    }

    fn connect_route(&self, rule: usize, match_index: usize) -> String {
        format!(
            "{}/{}/rule/{rule}/match/{match_index}/connect",
            self.namespace, self.route
        )
    }

    fn fallback_route(&self) -> String {
        format!("{}/{}/connect-fallback", self.namespace, self.route)
    }
}
