//! Converts watched resources into engine inputs, and engine outputs into
//! resources.

use anyhow::{bail, Result};
use gateway_controller_core::{
    connector::{HttpProxy, ProxyBackend, ProxyRule},
    gateway::{self, PathMatch, RouteMatch},
    policy::{self, Mode, RuleSet},
    PatchDocument, ResourceId, GATEWAY_API_GROUP,
};
use gateway_controller_k8s_api::{
    self as k8s,
    envoy::{self, EnvoyPatchPolicy, EnvoyPatchPolicySpec},
    labels,
    networking::{self, traffic_protection_policy as tpp},
    ResourceExt,
};

/// The only rule set type understood by the directive compiler.
pub const OWASP_CORE_RULE_SET: &str = "OWASPCoreRuleSet";

pub fn gateway(id: ResourceId, gateway: &k8s::gateway::Gateway) -> gateway::Gateway {
    let listeners = gateway
        .spec
        .listeners
        .iter()
        .map(|l| gateway::Listener {
            name: l.name.clone(),
            port: l.port,
            protocol: l
                .protocol
                .parse()
                .unwrap_or_else(|never: std::convert::Infallible| match never {}),
        })
        .collect();
    gateway::Gateway { id, listeners }
}

pub fn http_route(id: ResourceId, route: &k8s::gateway::HttpRoute) -> Result<gateway::HttpRoute> {
    let parents = route
        .spec
        .parent_refs
        .iter()
        .flatten()
        .map(|p| gateway::ParentRef {
            group: p.group.clone(),
            kind: p.kind.clone(),
            namespace: p.namespace.clone(),
            name: p.name.clone(),
            section_name: p.section_name.clone(),
        })
        .collect();

    let rules = route
        .spec
        .rules
        .iter()
        .flatten()
        .map(|rule| {
            Ok(gateway::RouteRule {
                name: rule.name.clone(),
                matches: route_matches(rule.matches.iter().flatten())?,
            })
        })
        .collect::<Result<_>>()?;

    Ok(gateway::HttpRoute { id, parents, rules })
}

fn route_matches<'m>(
    matches: impl IntoIterator<Item = &'m k8s::gateway::HttpRouteMatch>,
) -> Result<Vec<RouteMatch>> {
    matches
        .into_iter()
        .map(|m| {
            let method = match m.method.as_deref() {
                Some(method) => match method.parse::<http::Method>() {
                    Ok(method) => Some(method),
                    Err(_) => bail!("invalid HTTP method: {method:?}"),
                },
                None => None,
            };
            let path = m.path.as_ref().map(|path| match path {
                k8s::gateway::HttpPathMatch::Exact { value } => PathMatch::Exact(value.clone()),
                k8s::gateway::HttpPathMatch::PathPrefix { value } => PathMatch::Prefix(value.clone()),
                k8s::gateway::HttpPathMatch::RegularExpression { value } => {
                    PathMatch::RegularExpression(value.clone())
                }
            });
            Ok(RouteMatch { method, path })
        })
        .collect()
}

pub fn traffic_protection_policy(
    id: ResourceId,
    policy: &networking::TrafficProtectionPolicy,
) -> policy::TrafficProtectionPolicy {
    let spec = &policy.spec;
    policy::TrafficProtectionPolicy {
        id,
        generation: policy.metadata.generation,
        creation_timestamp: policy.metadata.creation_timestamp.as_ref().map(|t| t.0),
        target_refs: spec
            .target_refs
            .iter()
            .map(|t| policy::TargetRef {
                group: t.group.clone(),
                kind: t.kind.clone(),
                name: t.name.clone(),
                section_name: t.section_name.clone(),
            })
            .collect(),
        mode: match spec.mode {
            tpp::Mode::Observe => Mode::Observe,
            tpp::Mode::Enforce => Mode::Enforce,
            tpp::Mode::Disabled => Mode::Disabled,
        },
        sampling_percentage: spec.sampling_percentage.unwrap_or(100),
        rule_sets: spec.rule_sets.iter().map(rule_set).collect(),
    }
}

fn rule_set(rule_set: &tpp::RuleSet) -> RuleSet {
    let crs = match (&*rule_set.type_, &rule_set.owasp_core_rule_set) {
        (OWASP_CORE_RULE_SET, crs) => crs.clone().unwrap_or_default(),
        (type_, _) => return RuleSet::Unrecognized(type_.to_string()),
    };

    let defaults = policy::OwaspCoreRuleSet::default();
    let paranoia = crs.paranoia_levels.unwrap_or_default();
    let thresholds = crs.score_thresholds.unwrap_or_default();
    let exclusions = crs.rule_exclusions.unwrap_or_default();
    RuleSet::OwaspCoreRuleSet(policy::OwaspCoreRuleSet {
        paranoia_levels: policy::ParanoiaLevels {
            blocking: paranoia.blocking.unwrap_or(defaults.paranoia_levels.blocking),
            detection: paranoia.detection.unwrap_or(defaults.paranoia_levels.detection),
        },
        score_thresholds: policy::ScoreThresholds {
            inbound: thresholds.inbound.unwrap_or(defaults.score_thresholds.inbound),
            outbound: thresholds.outbound.unwrap_or(defaults.score_thresholds.outbound),
        },
        rule_exclusions: policy::RuleExclusions {
            tags: exclusions.tags,
            ids: exclusions.ids,
            id_ranges: exclusions.id_ranges,
        },
    })
}

pub fn http_proxy(id: ResourceId, proxy: &networking::HttpProxy) -> Result<HttpProxy> {
    let rules = proxy
        .spec
        .rules
        .iter()
        .map(|rule| {
            Ok(ProxyRule {
                matches: route_matches(&rule.matches)?,
                backends: rule
                    .backends
                    .iter()
                    .map(|b| ProxyBackend {
                        endpoint: b.endpoint.clone(),
                        connector: b.connector.as_ref().map(|c| c.name.clone()),
                        tls_hostname: b.tls.as_ref().and_then(|t| t.hostname.clone()),
                    })
                    .collect(),
            })
        })
        .collect::<Result<_>>()?;
    Ok(HttpProxy { id, rules })
}

/// Builds the EnvoyPatchPolicy that carries a patch document.
pub fn document(upstream_namespace: &str, document: &PatchDocument) -> EnvoyPatchPolicy {
    let spec = EnvoyPatchPolicySpec {
        target_ref: envoy::PolicyTargetReference {
            group: GATEWAY_API_GROUP.to_string(),
            kind: gateway::GATEWAY_KIND.to_string(),
            name: document.gateway.clone(),
        },
        type_: envoy::JSON_PATCH.to_string(),
        json_patches: document
            .patches
            .iter()
            .map(|p| envoy::EnvoyJsonPatchConfig {
                type_: p.type_.type_url().to_string(),
                name: p.name.clone(),
                operation: envoy::JsonPatchOperation {
                    op: p.operation.op.as_str().to_string(),
                    json_path: p.operation.json_path.clone(),
                    path: p.operation.path.clone(),
                    value: Some(p.operation.value.clone()),
                },
            })
            .collect(),
    };

    let mut policy = EnvoyPatchPolicy::new(&document.id.name, spec);
    policy.metadata.namespace = Some(document.id.namespace.clone());
    let mut labels = labels::managed();
    labels.insert(
        labels::UPSTREAM_NAMESPACE.to_string(),
        upstream_namespace.to_string(),
    );
    policy.metadata.labels = Some(labels);
    policy
}

/// Returns the upstream namespace of a document created by this controller.
pub fn document_upstream_namespace(document: &EnvoyPatchPolicy) -> Option<String> {
    let labels = document.labels();
    if !labels::is_managed(labels) {
        return None;
    }
    labels.get(labels::UPSTREAM_NAMESPACE).cloned()
}
