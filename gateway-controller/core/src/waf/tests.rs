use super::*;
use crate::{
    gateway::{HttpRoute, Listener, ListenerProtocol},
    patch::Op,
};
use pretty_assertions::assert_eq;

const DOWNSTREAM_NS: &str = "ns-down";

fn mk_gateway(name: &str) -> Gateway {
    Gateway {
        id: ResourceId::new("ns", name),
        listeners: vec![
            Listener {
                name: "http".to_string(),
                port: 80,
                protocol: ListenerProtocol::Http,
            },
            Listener {
                name: "https-a".to_string(),
                port: 443,
                protocol: ListenerProtocol::Https,
            },
            Listener {
                name: "https-b".to_string(),
                port: 443,
                protocol: ListenerProtocol::Https,
            },
        ],
    }
}

fn mk_route(name: &str) -> HttpRoute {
    HttpRoute {
        id: ResourceId::new("ns", name),
        parents: vec![],
        rules: vec![],
    }
}

fn attach<'a>(
    gateway: &'a Gateway,
    listener: Option<&str>,
    route: Option<&'a HttpRoute>,
    rule: Option<&str>,
) -> PolicyAttachment<'a> {
    PolicyAttachment {
        gateway,
        listener: listener.map(Into::into),
        route,
        rule: rule.map(Into::into),
        directives: vec!["SecRuleEngine On".to_string()],
    }
}

fn targets(doc: &PatchDocument) -> Vec<(ResourceType, &str)> {
    doc.patches
        .iter()
        .map(|p| (p.type_, p.name.as_str()))
        .collect()
}

#[test]
fn whole_gateway_patches_every_route_configuration() {
    let gw = mk_gateway("gw");
    let docs = synthesize(&WafConfig::default(), DOWNSTREAM_NS, &[attach(&gw, None, None, None)])
        .unwrap();

    assert_eq!(docs.len(), 1);
    let doc = &docs[0];
    assert_eq!(doc.id, ResourceId::new(DOWNSTREAM_NS, "gw-traffic-protection"));
    assert_eq!(doc.gateway, "gw");
    assert_eq!(
        targets(doc),
        vec![
            (ResourceType::RouteConfiguration, "http-80"),
            (ResourceType::RouteConfiguration, "ns-down/gw/https-a"),
            (ResourceType::RouteConfiguration, "ns-down/gw/https-b"),
            (ResourceType::Listener, "https-443"),
            (ResourceType::Listener, "https-443"),
        ]
    );
    let chains = doc
        .patches
        .iter()
        .filter(|p| p.type_ == ResourceType::Listener)
        .map(|p| p.operation.json_path.as_deref().unwrap())
        .collect::<Vec<_>>();
    assert_eq!(
        chains,
        vec![
            r#"..filter_chains[?(@.name=="ns-down/gw/https-a")]"#,
            r#"..filter_chains[?(@.name=="ns-down/gw/https-b")]"#,
        ]
    );
    assert!(doc.patches.iter().all(|p| p.operation.op == Op::Add));
}

#[test]
fn listener_attachment_patches_only_its_route_configuration() {
    let gw = mk_gateway("gw");
    let docs = synthesize(
        &WafConfig::default(),
        DOWNSTREAM_NS,
        &[attach(&gw, Some("https-b"), None, None)],
    )
    .unwrap();

    assert_eq!(
        targets(&docs[0]),
        vec![
            (ResourceType::RouteConfiguration, "ns-down/gw/https-b"),
            (ResourceType::Listener, "https-443"),
        ]
    );
    assert_eq!(
        docs[0].patches[0].operation.json_path.as_deref(),
        Some(
            r#"..virtual_hosts[?(@.metadata.filter_metadata["envoy-gateway"].resources[?(@.kind=="Gateway" && @.namespace=="ns-down" && @.name=="gw" && @.sectionName=="https-b")])]..routes[?(1==1)]"#
        )
    );
}

#[test]
fn shared_filter_chain_is_patched_once() {
    let gw = mk_gateway("gw");
    let route_a = mk_route("route-a");
    let route_b = mk_route("route-b");
    let docs = synthesize(
        &WafConfig::default(),
        DOWNSTREAM_NS,
        &[
            attach(&gw, Some("https-a"), Some(&route_a), None),
            attach(&gw, Some("https-a"), Some(&route_b), Some("r1")),
        ],
    )
    .unwrap();

    assert_eq!(
        targets(&docs[0]),
        vec![
            (ResourceType::RouteConfiguration, "ns-down/gw/https-a"),
            (ResourceType::RouteConfiguration, "ns-down/gw/https-a"),
            (ResourceType::Listener, "https-443"),
        ]
    );
}

#[test]
fn plaintext_listener_needs_no_filter_chain_patch() {
    let gw = mk_gateway("gw");
    let docs = synthesize(
        &WafConfig::default(),
        DOWNSTREAM_NS,
        &[attach(&gw, Some("http"), None, None)],
    )
    .unwrap();

    assert_eq!(
        targets(&docs[0]),
        vec![(ResourceType::RouteConfiguration, "http-80")]
    );
}

#[test]
fn unknown_listener_produces_no_document() {
    let gw = mk_gateway("gw");
    let docs = synthesize(
        &WafConfig::default(),
        DOWNSTREAM_NS,
        &[attach(&gw, Some("missing"), None, None)],
    )
    .unwrap();
    assert!(docs.is_empty());
}

#[test]
fn documents_are_grouped_per_gateway_in_name_order() {
    let gw_b = mk_gateway("gw-b");
    let gw_a = mk_gateway("gw-a");
    let route = mk_route("route");
    let attachments = [
        attach(&gw_b, Some("http"), None, None),
        attach(&gw_a, Some("http"), None, None),
        attach(&gw_b, Some("https-a"), Some(&route), Some("r1")),
    ];

    let docs = synthesize(&WafConfig::default(), DOWNSTREAM_NS, &attachments).unwrap();

    let names = docs.iter().map(|d| d.gateway.as_str()).collect::<Vec<_>>();
    assert_eq!(names, vec!["gw-a", "gw-b"]);
    assert_eq!(docs[1].patches.len(), 3);
}

#[test]
fn synthesis_is_idempotent() {
    let gw = mk_gateway("gw");
    let route = mk_route("route");
    let attachments = [
        attach(&gw, None, None, None),
        attach(&gw, Some("https-a"), Some(&route), Some("r1")),
    ];

    let first = synthesize(&WafConfig::default(), DOWNSTREAM_NS, &attachments).unwrap();
    let second = synthesize(&WafConfig::default(), DOWNSTREAM_NS, &attachments).unwrap();
    assert_eq!(first, second);
}

#[test]
fn per_route_config_embeds_directives() {
    let gw = mk_gateway("gw");
    let docs = synthesize(
        &WafConfig::default(),
        DOWNSTREAM_NS,
        &[attach(&gw, Some("http"), None, None)],
    )
    .unwrap();

    let op = &docs[0].patches[0].operation;
    assert_eq!(op.path, "/typed_per_filter_config/envoy.filters.http.golang");
    assert_eq!(
        op.value["plugins_config"]["coraza-waf"]["config"]["value"]["directives"],
        serde_json::json!(r#"["SecRuleEngine On"]"#)
    );
}

#[test]
fn listener_filter_is_inserted_first() {
    let gw = mk_gateway("gw");
    let config = WafConfig {
        library_path: "/opt/waf.so".to_string(),
        ..Default::default()
    };
    let docs = synthesize(&config, DOWNSTREAM_NS, &[attach(&gw, Some("https-a"), None, None)])
        .unwrap();

    let op = &docs[0].patches[1].operation;
    assert_eq!(op.op, Op::Add);
    assert_eq!(op.path, "/filters/0/typed_config/http_filters/0");
    assert_eq!(op.value["name"], serde_json::json!("envoy.filters.http.golang"));
    assert_eq!(
        op.value["typed_config"]["library_path"],
        serde_json::json!("/opt/waf.so")
    );
}
