use crate::Condition;

/// An agent that establishes outbound tunnels through which backends are
/// reached.
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
    version = "v1alpha1",
    kind = "Connector",
    status = "ConnectorStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ConnectorSpec {
    pub connector_class_name: String,
}

#[derive(
    Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema,
)]
#[serde(rename_all = "camelCase")]
pub struct ConnectorStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_details: Option<ConnectionDetails>,
}

#[derive(
    Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema,
)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<PublicKeyDetails>,
}

#[derive(
    Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema,
)]
#[serde(rename_all = "camelCase")]
pub struct PublicKeyDetails {
    /// The tunnel endpoint identity derived from the connector's public key.
    pub id: String,
}

// === impl Connector ===

impl Connector {
    /// True if the connector reports a `Ready` condition with status `True`.
    pub fn is_ready(&self) -> bool {
        self.status
            .iter()
            .flat_map(|s| s.conditions.iter())
            .any(|c| c.type_ == "Ready" && c.status == "True")
    }

    pub fn public_key_id(&self) -> Option<&str> {
        self.status
            .as_ref()?
            .connection_details
            .as_ref()?
            .public_key
            .as_ref()
            .map(|k| k.id.as_str())
            .filter(|id| !id.is_empty())
    }
}
