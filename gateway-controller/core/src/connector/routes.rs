use super::ConnectorBackendPatch;
use crate::{
    gateway::PathMatch,
    jsonpath,
    patch::{JsonPatch, ResourceType},
    TunnelConfig,
};
use serde_json::{json, Value};

const TUNNEL_METADATA: &str = "tunnel";

pub(super) fn internal_listener_cluster(
    config: &TunnelConfig,
    name: &str,
    backend: &ConnectorBackendPatch,
) -> Value {
    let mut tunnel = json!({
        "address": format!("{}:{}", backend.target_host, backend.target_port),
        "endpoint_id": backend.identity,
    });
    if let Some(hostname) = &backend.tls_hostname {
        tunnel["tls_hostname"] = Value::String(hostname.clone());
    }

    json!({
        "name": name,
        "type": "STATIC",
        "connect_timeout": "10s",
        "load_assignment": {
            "cluster_name": name,
            "endpoints": [{
                "lb_endpoints": [{
                    "endpoint": {
                        "address": {
                            "envoy_internal_address": {
                                "server_listener_name": config.internal_listener,
                                "endpoint_id": backend.identity,
                            },
                        },
                    },
                    "metadata": {
                        "filter_metadata": { TUNNEL_METADATA: tunnel },
                    },
                }],
            }],
        },
        "transport_socket": {
            "name": "envoy.transport_sockets.internal_upstream",
            "typed_config": {
                "@type": "type.googleapis.com/envoy.extensions.transport_sockets.internal_upstream.v3.InternalUpstreamTransport",
                "passthrough_metadata": [{
                    "kind": { "host": {} },
                    "name": TUNNEL_METADATA,
                }],
                "transport_socket": {
                    "name": "envoy.transport_sockets.raw_buffer",
                    "typed_config": {
                        "@type": "type.googleapis.com/envoy.extensions.transport_sockets.raw_buffer.v3.RawBuffer",
                    },
                },
            },
        },
    })
}

/// A cluster without endpoints. Requests routed to it fail with 503.
pub(super) fn offline_cluster(name: &str) -> Value {
    json!({
        "name": name,
        "type": "STATIC",
        "connect_timeout": "1s",
        "load_assignment": {
            "cluster_name": name,
            "endpoints": [],
        },
    })
}

/// Enables CONNECT upgrades on the HTTP connection manager of a filter chain.
pub(super) fn enable_connect(proxy_listener: &str, filter_chain: &str) -> [JsonPatch; 2] {
    let selector = jsonpath::filter_chain(filter_chain);
    [
        JsonPatch::add(
            ResourceType::Listener,
            proxy_listener,
            "/filters/0/typed_config/upgrade_configs/-",
            json!({ "upgrade_type": "CONNECT" }),
        )
        .at(selector.clone()),
        JsonPatch::add(
            ResourceType::Listener,
            proxy_listener,
            "/filters/0/typed_config/http2_protocol_options/allow_connect",
            Value::Bool(true),
        )
        .at(selector),
    ]
}

/// Inserts a route at the head of the first virtual host's route table.
pub(super) fn insert_route(route_config: &str, route: Value) -> JsonPatch {
    JsonPatch::add(
        ResourceType::RouteConfiguration,
        route_config,
        "/virtual_hosts/0/routes/0",
        route,
    )
}

pub(super) fn connect_fallback_route(name: &str, cluster: &str) -> Value {
    json!({
        "name": name,
        "match": { "connect_matcher": {} },
        "route": {
            "cluster": cluster,
            "upgrade_configs": [{
                "upgrade_type": "CONNECT",
                "connect_config": {},
            }],
        },
    })
}

/// An extended CONNECT route, matching `:method: CONNECT` on a specific path.
pub(super) fn extended_connect_route(name: &str, path: &PathMatch, cluster: &str) -> Value {
    let mut route_match = match path {
        PathMatch::Exact(p) => json!({ "path": p }),
        PathMatch::Prefix(p) => json!({ "prefix": p }),
        PathMatch::RegularExpression(re) => json!({ "safe_regex": { "regex": re } }),
    };
    route_match["headers"] = json!([{
        "name": ":method",
        "string_match": { "exact": "CONNECT" },
    }]);

    json!({
        "name": name,
        "match": route_match,
        "route": {
            "cluster": cluster,
            "upgrade_configs": [{
                "upgrade_type": "CONNECT",
                "connect_config": {},
            }],
        },
    })
}

pub(super) fn tunnel_headers(backend: &ConnectorBackendPatch) -> Value {
    let header = |key: &str, value: String| {
        json!({
            "header": { "key": key, "value": value },
            "append_action": "OVERWRITE_IF_EXISTS_OR_ADD",
        })
    };
    Value::Array(vec![
        header("x-tunnel-target-host", backend.target_host.clone()),
        header("x-tunnel-target-port", backend.target_port.to_string()),
        header("x-tunnel-endpoint-id", backend.identity.clone()),
    ])
}
