//! Resources in the `networking.datumapis.com` API group.

pub mod connector;
pub mod http_proxy;
pub mod traffic_protection_policy;

pub use self::{
    connector::{Connector, ConnectorSpec, ConnectorStatus},
    http_proxy::{HttpProxy, HttpProxySpec, HttpProxyStatus},
    traffic_protection_policy::{
        PolicyAncestorStatus, TrafficProtectionPolicy, TrafficProtectionPolicySpec,
        TrafficProtectionPolicyStatus,
    },
};

pub const API_GROUP: &str = "networking.datumapis.com";
