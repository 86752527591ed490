//! JSONPath selectors used to address parts of the proxy's configuration.
//!
//! A malformed selector silently matches nothing when the patches are applied,
//! so every selector shape is built by exactly one function in this module.

/// Metadata key under which the proxy tags route configuration elements with
/// the resources they were generated from.
const RESOURCE_METADATA: &str = r#"@.metadata.filter_metadata["envoy-gateway"].resources"#;

/// Forces a filter to evaluate per element. Without a predicate, `..routes`
/// selects the routes array itself rather than each route in it.
const LIST_FORCING_CONJUNCT: &str = "1==1";

/// Constrains a selector to elements generated from a particular resource.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ResourceConstraint<'a> {
    pub kind: &'a str,
    pub namespace: &'a str,
    pub name: &'a str,
    pub section_name: Option<&'a str>,
}

impl ResourceConstraint<'_> {
    fn expression(&self) -> String {
        let mut expr = format!(
            r#"@.kind=="{}" && @.namespace=="{}" && @.name=="{}""#,
            self.kind, self.namespace, self.name,
        );
        if let Some(section) = self.section_name {
            expr.push_str(&format!(r#" && @.sectionName=="{section}""#));
        }
        expr
    }
}

/// Selects the routes of the virtual hosts generated for `vhost`, optionally
/// restricted to the routes generated for `route`.
pub fn virtual_host_routes(
    vhost: &ResourceConstraint<'_>,
    route: Option<&ResourceConstraint<'_>>,
) -> String {
    let route_filter = match route {
        Some(route) => format!(
            "{RESOURCE_METADATA}[?(\n\t\t{}\n\t)]",
            route.expression()
        ),
        None => LIST_FORCING_CONJUNCT.to_string(),
    };
    sanitize(&format!(
        "..virtual_hosts[?(\n\t{RESOURCE_METADATA}[?(\n\t\t{}\n\t)]\n)]..routes[?(\n\t{route_filter}\n)]",
        vhost.expression(),
    ))
}

/// Selects a listener's filter chain by name.
pub fn filter_chain(name: &str) -> String {
    sanitize(&format!("..filter_chains[?(\n\t@.name==\"{name}\"\n)]"))
}

/// Selects every route that forwards to the given cluster.
pub fn routes_to_cluster(cluster: &str) -> String {
    sanitize(&format!(
        "..routes[?(\n\t@.route.cluster==\"{cluster}\"\n)]"
    ))
}

/// Strips the newlines and tabs used to lay out selector templates.
pub fn sanitize(path: &str) -> String {
    path.chars().filter(|c| !matches!(c, '\n' | '\t')).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn gateway_listener_routes() {
        let vhost = ResourceConstraint {
            kind: "Gateway",
            namespace: "ns-down",
            name: "gw",
            section_name: Some("https"),
        };
        assert_eq!(
            virtual_host_routes(&vhost, None),
            r#"..virtual_hosts[?(@.metadata.filter_metadata["envoy-gateway"].resources[?(@.kind=="Gateway" && @.namespace=="ns-down" && @.name=="gw" && @.sectionName=="https")])]..routes[?(1==1)]"#,
        );
    }

    #[test]
    fn gateway_route_rule_routes() {
        let vhost = ResourceConstraint {
            kind: "Gateway",
            namespace: "ns-down",
            name: "gw",
            section_name: None,
        };
        let route = ResourceConstraint {
            kind: "HTTPRoute",
            namespace: "ns-down",
            name: "route",
            section_name: Some("r1"),
        };
        assert_eq!(
            virtual_host_routes(&vhost, Some(&route)),
            r#"..virtual_hosts[?(@.metadata.filter_metadata["envoy-gateway"].resources[?(@.kind=="Gateway" && @.namespace=="ns-down" && @.name=="gw")])]..routes[?(@.metadata.filter_metadata["envoy-gateway"].resources[?(@.kind=="HTTPRoute" && @.namespace=="ns-down" && @.name=="route" && @.sectionName=="r1")])]"#,
        );
    }

    #[test]
    fn filter_chain_by_name() {
        assert_eq!(
            filter_chain("ns/gw/https"),
            r#"..filter_chains[?(@.name=="ns/gw/https")]"#
        );
    }

    #[test]
    fn routes_by_cluster() {
        assert_eq!(
            routes_to_cluster("httproute/ns/proxy/rule/0"),
            r#"..routes[?(@.route.cluster=="httproute/ns/proxy/rule/0")]"#
        );
    }

    #[test]
    fn sanitize_strips_layout_whitespace_only() {
        assert_eq!(sanitize("a\n\tb c\t\n"), "ab c");
    }
}
