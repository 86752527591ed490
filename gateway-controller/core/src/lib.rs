#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod ancestor;
pub mod attachment;
pub mod connector;
pub mod directives;
pub mod gateway;
pub mod jsonpath;
pub mod patch;
pub mod policy;
pub mod target;
pub mod waf;

pub use self::{
    ancestor::{AncestorRef, AncestorStatus, Reason},
    attachment::{resolve, PolicyAttachment, Resolution},
    gateway::{Gateway, HttpRoute, Listener, ListenerProtocol},
    patch::{JsonPatch, Op, Operation, PatchDocument, PatchError, ResourceType},
    policy::{TargetRef, TrafficProtectionPolicy},
    target::Targets,
};

pub const GATEWAY_API_GROUP: &str = "gateway.networking.k8s.io";
pub const DEFAULT_CONTROLLER_NAME: &str = "networking.datumapis.com/gateway-controller";

/// An empty reference group names the Gateway API group.
#[inline]
pub fn effective_group(group: &str) -> &str {
    if group.is_empty() {
        GATEWAY_API_GROUP
    } else {
        group
    }
}

/// Identifies a namespaced resource.
#[derive(Clone, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct ResourceId {
    pub namespace: String,
    pub name: String,
}

/// Engine configuration. Passed explicitly into every reconciliation pass.
#[derive(Clone, Debug)]
pub struct Config {
    /// Stamped into ancestor statuses as the `controllerName`.
    pub controller_name: String,
    pub waf: WafConfig,
    pub tunnel: TunnelConfig,
}

#[derive(Clone, Debug)]
pub struct WafConfig {
    /// Directives that seed every compiled directive list.
    pub base_directives: Vec<String>,
    /// Location of the WAF plugin library loaded by the proxy's golang filter.
    pub library_path: String,
}

#[derive(Clone, Debug)]
pub struct TunnelConfig {
    pub mode: TunnelMode,
    /// Shared local cluster that receives header-tagged tunnel traffic.
    pub gateway_cluster: String,
    /// Internal listener that terminates tunnel traffic inside the proxy.
    pub internal_listener: String,
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum TunnelMode {
    /// Define a static cluster per rule whose endpoint is an internal listener
    /// address carrying the tunnel address as connection metadata.
    #[default]
    InternalListener,
    /// Rewrite the rule's cluster to a shared gateway cluster and tag requests
    /// with routing headers.
    HeaderInjection,
}

// === impl ResourceId ===

impl ResourceId {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

// === impl Config ===

impl Default for Config {
    fn default() -> Self {
        Self {
            controller_name: DEFAULT_CONTROLLER_NAME.to_string(),
            waf: WafConfig::default(),
            tunnel: TunnelConfig::default(),
        }
    }
}

impl Default for WafConfig {
    fn default() -> Self {
        Self {
            base_directives: vec![
                "Include @recommended-conf".to_string(),
                "Include @crs-setup-conf".to_string(),
            ],
            library_path: "/etc/envoy/coraza-waf.so".to_string(),
        }
    }
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            mode: TunnelMode::default(),
            gateway_cluster: "tunnel-gateway".to_string(),
            internal_listener: "tunnel-internal-listener".to_string(),
        }
    }
}

impl std::str::FromStr for TunnelMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "internal-listener" => Ok(Self::InternalListener),
            "header-injection" => Ok(Self::HeaderInjection),
            s => anyhow::bail!("invalid tunnel mode: {s}"),
        }
    }
}
