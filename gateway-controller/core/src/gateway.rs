use crate::{effective_group, ResourceId, GATEWAY_API_GROUP};

pub const GATEWAY_KIND: &str = "Gateway";
pub const HTTP_ROUTE_KIND: &str = "HTTPRoute";

/// The parts of a Gateway the engine reads.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Gateway {
    pub id: ResourceId,
    pub listeners: Vec<Listener>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Listener {
    pub name: String,
    pub port: u16,
    pub protocol: ListenerProtocol,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ListenerProtocol {
    Http,
    Https,
    Other(String),
}

/// The parts of an HTTPRoute the engine reads.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HttpRoute {
    pub id: ResourceId,
    pub parents: Vec<ParentRef>,
    pub rules: Vec<RouteRule>,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ParentRef {
    pub group: Option<String>,
    pub kind: Option<String>,
    pub namespace: Option<String>,
    pub name: String,
    pub section_name: Option<String>,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RouteRule {
    pub name: Option<String>,
    pub matches: Vec<RouteMatch>,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RouteMatch {
    pub method: Option<http::Method>,
    pub path: Option<PathMatch>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PathMatch {
    Exact(String),
    Prefix(String),
    RegularExpression(String),
}

// === impl Gateway ===

impl Gateway {
    pub fn listener(&self, name: &str) -> Option<&Listener> {
        self.listeners.iter().find(|l| l.name == name)
    }

    pub fn https_listeners(&self) -> impl Iterator<Item = &Listener> {
        self.listeners
            .iter()
            .filter(|l| l.protocol == ListenerProtocol::Https)
    }

    /// Name of the route configuration generated for an HTTPS listener. Every
    /// HTTPS listener gets its own route configuration and filter chain.
    pub fn https_route_config_name(&self, namespace: &str, listener: &str) -> String {
        format!("{namespace}/{}/{listener}", self.id.name)
    }
}

// === impl Listener ===

impl Listener {
    #[inline]
    pub fn is_https(&self) -> bool {
        self.protocol == ListenerProtocol::Https
    }

    /// Name of the proxy listener that holds the filter chains for this
    /// listener's port.
    pub fn https_proxy_listener_name(&self) -> String {
        format!("https-{}", self.port)
    }
}

impl std::str::FromStr for ListenerProtocol {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "HTTP" => Self::Http,
            "HTTPS" => Self::Https,
            s => Self::Other(s.to_string()),
        })
    }
}

// === impl HttpRoute ===

impl HttpRoute {
    /// Returns true if a rule with the given section name exists.
    pub fn has_rule(&self, name: &str) -> bool {
        self.rules.iter().any(|r| r.name.as_deref() == Some(name))
    }
}

// === impl ParentRef ===

impl ParentRef {
    /// Parent references default to the Gateway kind in the Gateway API group.
    pub fn targets_gateway(&self) -> bool {
        effective_group(self.group.as_deref().unwrap_or_default()) == GATEWAY_API_GROUP
            && self.kind.as_deref().unwrap_or(GATEWAY_KIND) == GATEWAY_KIND
    }

    /// Returns the identity of the referenced Gateway, resolving the namespace
    /// relative to the route.
    pub fn gateway_id(&self, route_ns: &str) -> ResourceId {
        ResourceId::new(
            self.namespace.as_deref().unwrap_or(route_ns),
            self.name.clone(),
        )
    }
}

// === impl RouteMatch ===

impl RouteMatch {
    #[inline]
    pub fn is_connect(&self) -> bool {
        self.method.as_ref() == Some(&http::Method::CONNECT)
    }

    /// True if the match has no path or matches exactly `/`. A missing path
    /// defaults to a `/` prefix.
    pub fn is_root_path(&self) -> bool {
        match &self.path {
            None => true,
            Some(PathMatch::Exact(p) | PathMatch::Prefix(p)) => p == "/",
            Some(PathMatch::RegularExpression(_)) => false,
        }
    }

    /// The literal path value of exact and prefix matches.
    pub fn path_value(&self) -> Option<&str> {
        match self.path.as_ref()? {
            PathMatch::Exact(p) | PathMatch::Prefix(p) => Some(p),
            PathMatch::RegularExpression(_) => None,
        }
    }
}
