use crate::Condition;

/// A simplified HTTP reverse proxy. Each HTTPProxy is realized as a Gateway
/// and an HTTPRoute of the same name.
#[derive(
    Clone,
    Debug,
    Default,
    kube::CustomResource,
    serde::Deserialize,
    serde::Serialize,
    schemars::JsonSchema,
)]
#[kube(
    group = "networking.datumapis.com",
    version = "v1alpha",
    kind = "HTTPProxy",
    root = "HttpProxy",
    status = "HttpProxyStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct HttpProxySpec {
    #[serde(default)]
    pub rules: Vec<HttpProxyRule>,
}

#[derive(
    Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema,
)]
#[serde(rename_all = "camelCase")]
pub struct HttpProxyRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default)]
    pub matches: Vec<crate::gateway::HttpRouteMatch>,

    #[serde(default)]
    pub backends: Vec<HttpProxyRuleBackend>,
}

#[derive(
    Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema,
)]
#[serde(rename_all = "camelCase")]
pub struct HttpProxyRuleBackend {
    /// An `http://` or `https://` URL.
    pub endpoint: String,

    /// Reaches the endpoint through a Connector tunnel.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connector: Option<ConnectorReference>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<BackendTls>,
}

#[derive(
    Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema,
)]
pub struct ConnectorReference {
    pub name: String,
}

#[derive(
    Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema,
)]
#[serde(rename_all = "camelCase")]
pub struct BackendTls {
    /// Hostname used for SNI and certificate validation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
}

#[derive(
    Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema,
)]
#[serde(rename_all = "camelCase")]
pub struct HttpProxyStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
}
