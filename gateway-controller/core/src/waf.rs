//! Synthesizes the proxy patches that realize resolved policy attachments.
//!
//! Patches for all attachments on a Gateway are merged into a single document
//! so that independent policies never compete over the same downstream
//! object.

use crate::{
    attachment::PolicyAttachment,
    gateway::{Gateway, GATEWAY_KIND, HTTP_ROUTE_KIND},
    jsonpath::{self, ResourceConstraint},
    patch::{JsonPatch, PatchDocument, PatchError, ResourceType},
    ResourceId, WafConfig,
};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};

/// The route configuration shared by every plaintext HTTP listener.
pub const HTTP_ROUTE_CONFIGURATION: &str = "http-80";

const FILTER_NAME: &str = "envoy.filters.http.golang";
const PLUGIN_NAME: &str = "coraza-waf";
const PER_ROUTE_PATH: &str = "/typed_per_filter_config/envoy.filters.http.golang";
const HTTP_FILTERS_PATH: &str = "/filters/0/typed_config/http_filters/0";

/// An HTTPS filter chain that must carry the WAF HTTP filter.
#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
struct FilterChain {
    name: String,
    proxy_listener: String,
}

/// Builds one patch document per Gateway that received any attachment.
///
/// Gateways are visited in lexicographic order and attachments in resolution
/// order, so unchanged inputs always produce identical documents.
pub fn synthesize(
    config: &WafConfig,
    namespace: &str,
    attachments: &[PolicyAttachment<'_>],
) -> Result<Vec<PatchDocument>, PatchError> {
    let mut by_gateway = BTreeMap::<&ResourceId, Vec<&PolicyAttachment<'_>>>::new();
    for attachment in attachments {
        by_gateway
            .entry(&attachment.gateway.id)
            .or_default()
            .push(attachment);
    }

    let mut documents = Vec::with_capacity(by_gateway.len());
    for (id, attachments) in by_gateway {
        let patches = gateway_patches(config, namespace, &attachments)?;
        if patches.is_empty() {
            tracing::debug!(gateway = %id, "No traffic protection patches");
            continue;
        }
        documents.push(PatchDocument {
            id: ResourceId::new(namespace, document_name(&id.name)),
            gateway: id.name.clone(),
            patches,
        });
    }
    Ok(documents)
}

/// Name of the traffic protection document for a Gateway.
pub fn document_name(gateway: &str) -> String {
    format!("{gateway}-traffic-protection")
}

fn gateway_patches(
    config: &WafConfig,
    namespace: &str,
    attachments: &[&PolicyAttachment<'_>],
) -> Result<Vec<JsonPatch>, PatchError> {
    let mut patches = Vec::new();
    let mut filter_chains = BTreeSet::new();

    for attachment in attachments {
        let gateway = attachment.gateway;
        let json_path = attachment_json_path(namespace, attachment);
        let value = per_route_config(&attachment.directives)?;

        let Some(listener) = attachment.listener.as_deref() else {
            patches.push(
                JsonPatch::add(
                    ResourceType::RouteConfiguration,
                    HTTP_ROUTE_CONFIGURATION,
                    PER_ROUTE_PATH,
                    value.clone(),
                )
                .at(json_path.clone()),
            );
            for listener in gateway.https_listeners() {
                let route_config = gateway.https_route_config_name(namespace, &listener.name);
                patches.push(
                    JsonPatch::add(
                        ResourceType::RouteConfiguration,
                        route_config.clone(),
                        PER_ROUTE_PATH,
                        value.clone(),
                    )
                    .at(json_path.clone()),
                );
                filter_chains.insert(FilterChain {
                    name: route_config,
                    proxy_listener: listener.https_proxy_listener_name(),
                });
            }
            continue;
        };

        match gateway.listener(listener) {
            Some(l) if l.is_https() => {
                let route_config = gateway.https_route_config_name(namespace, &l.name);
                patches.push(
                    JsonPatch::add(
                        ResourceType::RouteConfiguration,
                        route_config.clone(),
                        PER_ROUTE_PATH,
                        value,
                    )
                    .at(json_path),
                );
                filter_chains.insert(FilterChain {
                    name: route_config,
                    proxy_listener: l.https_proxy_listener_name(),
                });
            }
            Some(_) => {
                patches.push(
                    JsonPatch::add(
                        ResourceType::RouteConfiguration,
                        HTTP_ROUTE_CONFIGURATION,
                        PER_ROUTE_PATH,
                        value,
                    )
                    .at(json_path),
                );
            }
            None => {
                tracing::debug!(gateway = %gateway.id, %listener, "Attachment references an unknown listener");
            }
        }
    }

    // Known limitation: `add` at a fixed index is not idempotent. If the proxy
    // controller reapplies this document onto an already patched listener the
    // filter is inserted a second time.
    for chain in filter_chains {
        patches.push(
            JsonPatch::add(
                ResourceType::Listener,
                chain.proxy_listener,
                HTTP_FILTERS_PATH,
                http_filter(config),
            )
            .at(jsonpath::filter_chain(&chain.name)),
        );
    }

    Ok(patches)
}

fn attachment_json_path(namespace: &str, attachment: &PolicyAttachment<'_>) -> String {
    let gateway: &Gateway = attachment.gateway;
    let vhost = ResourceConstraint {
        kind: GATEWAY_KIND,
        namespace,
        name: &gateway.id.name,
        section_name: attachment.listener.as_deref(),
    };
    let route = attachment.route.map(|route| ResourceConstraint {
        kind: HTTP_ROUTE_KIND,
        namespace,
        name: &route.id.name,
        section_name: attachment.rule.as_deref(),
    });
    jsonpath::virtual_host_routes(&vhost, route.as_ref())
}

fn per_route_config(directives: &[String]) -> Result<serde_json::Value, PatchError> {
    let directives = serde_json::to_string(directives)?;
    Ok(json!({
        "@type": "type.googleapis.com/envoy.extensions.filters.http.golang.v3alpha.ConfigsPerRoute",
        "plugins_config": {
            "coraza-waf": {
                "config": {
                    "@type": "type.googleapis.com/xds.type.v3.TypedStruct",
                    "value": { "directives": directives },
                },
            },
        },
    }))
}

fn http_filter(config: &WafConfig) -> serde_json::Value {
    json!({
        "name": FILTER_NAME,
        "typed_config": {
            "@type": "type.googleapis.com/envoy.extensions.filters.http.golang.v3alpha.Config",
            "library_id": PLUGIN_NAME,
            "library_path": config.library_path,
            "plugin_name": PLUGIN_NAME,
            "plugin_config": {
                "@type": "type.googleapis.com/xds.type.v3.TypedStruct",
                "value": { "directives": "[]" },
            },
        },
    })
}

#[cfg(test)]
mod tests;
