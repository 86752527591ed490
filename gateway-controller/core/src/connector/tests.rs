use super::*;
use crate::gateway::{Listener, ListenerProtocol};
use maplit::hashmap;
use pretty_assertions::assert_eq;
use std::collections::HashMap;

const DOWNSTREAM_NS: &str = "ns-down";

struct Connectors(HashMap<&'static str, ConnectorState>);

impl ResolveConnector for Connectors {
    fn resolve_connector(&self, namespace: &str, name: &str) -> Result<ConnectorState, ConnectorError> {
        match self.0.get(name) {
            Some(state) => Ok(state.clone()),
            None => Err(ConnectorError::MissingIdentity(ResourceId::new(namespace, name))),
        }
    }
}

fn ready() -> Connectors {
    Connectors(hashmap! {
        "conn" => ConnectorState::Ready { identity: "node-key".to_string() },
    })
}

fn mk_gateway(listeners: &[(&str, u16, ListenerProtocol)]) -> Gateway {
    Gateway {
        id: ResourceId::new(DOWNSTREAM_NS, "proxy"),
        listeners: listeners
            .iter()
            .map(|(name, port, protocol)| Listener {
                name: name.to_string(),
                port: *port,
                protocol: protocol.clone(),
            })
            .collect(),
    }
}

fn https_gateway() -> Gateway {
    mk_gateway(&[
        ("http", 80, ListenerProtocol::Http),
        ("https", 443, ListenerProtocol::Https),
    ])
}

fn mk_rule(endpoint: &str, matches: Vec<RouteMatch>) -> ProxyRule {
    ProxyRule {
        matches,
        backends: vec![ProxyBackend {
            endpoint: endpoint.to_string(),
            connector: Some("conn".to_string()),
            tls_hostname: None,
        }],
    }
}

fn connect_match(path: PathMatch) -> RouteMatch {
    RouteMatch {
        method: Some(http::Method::CONNECT),
        path: Some(path),
    }
}

fn mk_proxy(rules: Vec<ProxyRule>) -> HttpProxy {
    HttpProxy {
        id: ResourceId::new("ns", "proxy"),
        rules,
    }
}

fn compile_proxy(config: &TunnelConfig, gateway: &Gateway, proxy: &HttpProxy, section: Option<&str>) -> Option<PatchDocument> {
    let backends = resolve_backends(proxy, section, &ready()).expect("backends must resolve");
    compile(config, DOWNSTREAM_NS, gateway, proxy, &backends).expect("document must compile")
}

/// The names of the routes inserted at the head of the route table, in patch
/// order.
fn inserted_routes(doc: &PatchDocument) -> Vec<(&str, &str)> {
    doc.patches
        .iter()
        .filter(|p| p.operation.path == "/virtual_hosts/0/routes/0")
        .map(|p| {
            (
                p.operation.value["name"].as_str().unwrap(),
                p.operation.value["route"]["cluster"].as_str().unwrap(),
            )
        })
        .collect()
}

#[test]
fn fallback_targets_first_backend() {
    let proxy = mk_proxy(vec![
        mk_rule("https://a.internal", vec![RouteMatch::default()]),
        mk_rule("https://b.internal", vec![RouteMatch::default()]),
        mk_rule("https://c.internal", vec![RouteMatch::default()]),
    ]);
    let doc = compile_proxy(&TunnelConfig::default(), &https_gateway(), &proxy, None).unwrap();

    assert_eq!(
        inserted_routes(&doc),
        vec![("ns-down/proxy/connect-fallback", "httproute/ns-down/proxy/rule/0")]
    );
}

#[test]
fn fallback_targets_explicit_root_connect_rule() {
    let proxy = mk_proxy(vec![
        mk_rule("https://a.internal", vec![RouteMatch::default()]),
        mk_rule(
            "https://b.internal",
            vec![connect_match(PathMatch::Prefix("/".to_string()))],
        ),
        mk_rule("https://c.internal", vec![RouteMatch::default()]),
    ]);
    let doc = compile_proxy(&TunnelConfig::default(), &https_gateway(), &proxy, None).unwrap();

    assert_eq!(
        inserted_routes(&doc),
        vec![("ns-down/proxy/connect-fallback", "httproute/ns-down/proxy/rule/1")]
    );
}

#[test]
fn extended_connect_routes_keep_rule_order() {
    let proxy = mk_proxy(vec![
        mk_rule(
            "https://a.internal",
            vec![connect_match(PathMatch::Prefix("/a".to_string()))],
        ),
        mk_rule(
            "https://b.internal",
            vec![
                RouteMatch::default(),
                connect_match(PathMatch::Exact("/b".to_string())),
            ],
        ),
    ]);
    let doc = compile_proxy(&TunnelConfig::default(), &https_gateway(), &proxy, None).unwrap();

    // Each insert lands at index 0, so the last patch becomes the first route.
    assert_eq!(
        inserted_routes(&doc),
        vec![
            ("ns-down/proxy/connect-fallback", "httproute/ns-down/proxy/rule/0"),
            ("ns-down/proxy/rule/1/match/1/connect", "httproute/ns-down/proxy/rule/1"),
            ("ns-down/proxy/rule/0/match/0/connect", "httproute/ns-down/proxy/rule/0"),
        ]
    );

    let exact = doc
        .patches
        .iter()
        .find(|p| p.operation.value["name"] == "ns-down/proxy/rule/1/match/1/connect")
        .unwrap();
    assert_eq!(
        exact.operation.value["match"],
        serde_json::json!({
            "path": "/b",
            "headers": [{ "name": ":method", "string_match": { "exact": "CONNECT" } }],
        })
    );
}

#[test]
fn domains_are_added_once_per_route_configuration() {
    let gateway = mk_gateway(&[
        ("https-a", 443, ListenerProtocol::Https),
        ("https-b", 8443, ListenerProtocol::Https),
    ]);
    let proxy = mk_proxy(vec![
        mk_rule("https://api.internal", vec![RouteMatch::default()]),
        mk_rule("https://api.internal:8443", vec![RouteMatch::default()]),
    ]);
    let doc = compile_proxy(&TunnelConfig::default(), &gateway, &proxy, None).unwrap();

    let domains = doc
        .patches
        .iter()
        .filter(|p| p.operation.path == "/virtual_hosts/0/domains/-")
        .map(|p| (p.name.as_str(), p.operation.value.as_str().unwrap()))
        .collect::<Vec<_>>();
    assert_eq!(
        domains,
        vec![
            ("ns-down/proxy/https-a", "api.internal"),
            ("ns-down/proxy/https-b", "api.internal"),
        ]
    );

    let upgrades = doc
        .patches
        .iter()
        .filter(|p| p.type_ == ResourceType::Listener)
        .map(|p| (p.name.as_str(), p.operation.path.as_str()))
        .collect::<Vec<_>>();
    assert_eq!(
        upgrades,
        vec![
            ("https-443", "/filters/0/typed_config/upgrade_configs/-"),
            ("https-443", "/filters/0/typed_config/http2_protocol_options/allow_connect"),
            ("https-8443", "/filters/0/typed_config/upgrade_configs/-"),
            ("https-8443", "/filters/0/typed_config/http2_protocol_options/allow_connect"),
        ]
    );
}

#[test]
fn section_restricts_route_configurations() {
    let gateway = mk_gateway(&[
        ("http", 80, ListenerProtocol::Http),
        ("https-a", 443, ListenerProtocol::Https),
        ("https-b", 443, ListenerProtocol::Https),
    ]);
    let proxy = mk_proxy(vec![mk_rule("https://api.internal", vec![])]);

    let doc = compile_proxy(&TunnelConfig::default(), &gateway, &proxy, Some("https-b")).unwrap();
    assert!(doc
        .patches
        .iter()
        .filter(|p| p.type_ == ResourceType::RouteConfiguration)
        .all(|p| p.name == "ns-down/proxy/https-b"));

    assert_eq!(
        compile_proxy(&TunnelConfig::default(), &gateway, &proxy, Some("http")),
        None,
        "a plaintext section has no route configuration to patch"
    );
}

#[test]
fn internal_listener_cluster_carries_tunnel_metadata() {
    let proxy = mk_proxy(vec![mk_rule("https://api.internal", vec![])]);
    let doc = compile_proxy(&TunnelConfig::default(), &https_gateway(), &proxy, None).unwrap();

    let cluster = &doc.patches[0];
    assert_eq!(cluster.type_, ResourceType::Cluster);
    assert_eq!(cluster.name, "ns-down/proxy/rule/0");
    assert_eq!(cluster.operation.path, "");
    let lb_endpoint = &cluster.operation.value["load_assignment"]["endpoints"][0]["lb_endpoints"][0];
    assert_eq!(
        lb_endpoint["endpoint"]["address"]["envoy_internal_address"],
        serde_json::json!({
            "server_listener_name": "tunnel-internal-listener",
            "endpoint_id": "node-key",
        })
    );
    assert_eq!(
        lb_endpoint["metadata"]["filter_metadata"]["tunnel"],
        serde_json::json!({ "address": "api.internal:443", "endpoint_id": "node-key" })
    );

    let rewrite = doc.patches.last().unwrap();
    assert_eq!(rewrite.operation.op, crate::patch::Op::Replace);
    assert_eq!(rewrite.operation.path, "/route/cluster");
    assert_eq!(rewrite.operation.value, "ns-down/proxy/rule/0");
    assert_eq!(
        rewrite.operation.json_path.as_deref(),
        Some(r#"..routes[?(@.route.cluster=="httproute/ns-down/proxy/rule/0")]"#)
    );
}

#[test]
fn header_injection_adds_headers_before_rewriting_cluster() {
    let config = TunnelConfig {
        mode: TunnelMode::HeaderInjection,
        ..Default::default()
    };
    let proxy = mk_proxy(vec![mk_rule("http://api.internal:8080", vec![])]);
    let doc = compile_proxy(&config, &https_gateway(), &proxy, None).unwrap();

    assert!(doc.patches.iter().all(|p| p.type_ != ResourceType::Cluster));

    let n = doc.patches.len();
    let headers = &doc.patches[n - 2].operation;
    let cluster = &doc.patches[n - 1].operation;
    assert_eq!(headers.path, "/request_headers_to_add");
    assert_eq!(
        headers.value[1],
        serde_json::json!({
            "header": { "key": "x-tunnel-target-port", "value": "8080" },
            "append_action": "OVERWRITE_IF_EXISTS_OR_ADD",
        })
    );
    assert_eq!(cluster.path, "/route/cluster");
    assert_eq!(cluster.value, "tunnel-gateway");
    assert_eq!(headers.json_path, cluster.json_path);
}

#[test]
fn offline_connector_redirects_to_offline_cluster() {
    let connectors = Connectors(hashmap! { "conn" => ConnectorState::NotReady });
    let proxy = mk_proxy(vec![mk_rule("https://api.internal", vec![])]);

    let backends = resolve_backends(&proxy, None, &connectors).unwrap();
    assert!(backends.online.is_empty());
    assert_eq!(backends.offline_rules, vec![0]);
    assert!(!backends.all_ready());

    let doc = compile(&TunnelConfig::default(), DOWNSTREAM_NS, &https_gateway(), &proxy, &backends)
        .unwrap()
        .unwrap();
    assert_eq!(doc.id, ResourceId::new(DOWNSTREAM_NS, "proxy-connector"));
    assert_eq!(doc.patches.len(), 2);
    assert_eq!(doc.patches[0].name, "ns-down/proxy/connector-offline");
    assert_eq!(
        doc.patches[0].operation.value["load_assignment"]["endpoints"],
        serde_json::json!([])
    );
    assert_eq!(doc.patches[1].operation.value, "ns-down/proxy/connector-offline");
}

#[test]
fn rules_without_connectors_are_ignored() {
    let proxy = mk_proxy(vec![ProxyRule {
        matches: vec![],
        backends: vec![
            ProxyBackend {
                endpoint: "https://a.internal".to_string(),
                ..Default::default()
            },
            ProxyBackend {
                endpoint: "https://b.internal".to_string(),
                ..Default::default()
            },
        ],
    }]);
    let backends = resolve_backends(&proxy, None, &ready()).unwrap();
    assert!(backends.is_empty());
    assert_eq!(
        compile(&TunnelConfig::default(), DOWNSTREAM_NS, &https_gateway(), &proxy, &backends).unwrap(),
        None
    );
}

#[test]
fn malformed_backends_are_errors() {
    let mut rule = mk_rule("https://a.internal", vec![]);
    rule.backends.push(ProxyBackend {
        endpoint: "https://b.internal".to_string(),
        ..Default::default()
    });
    assert!(matches!(
        resolve_backends(&mk_proxy(vec![rule]), None, &ready()),
        Err(BackendError::MultipleBackends { rule: 0, count: 2 })
    ));

    let proxy = mk_proxy(vec![mk_rule("https://10.0.0.1", vec![])]);
    assert!(matches!(
        resolve_backends(&proxy, None, &ready()),
        Err(BackendError::MissingTlsHostname(_))
    ));

    let mut rule = mk_rule("https://10.0.0.1", vec![]);
    rule.backends[0].tls_hostname = Some("api.internal".to_string());
    assert!(resolve_backends(&mk_proxy(vec![rule]), None, &ready()).is_ok());

    let proxy = mk_proxy(vec![mk_rule("https://a.internal", vec![])]);
    assert!(matches!(
        resolve_backends(&proxy, None, &Connectors(HashMap::new())),
        Err(BackendError::Connector(ConnectorError::MissingIdentity(_)))
    ));
}
