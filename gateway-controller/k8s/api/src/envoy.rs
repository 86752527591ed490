//! The `EnvoyPatchPolicy` resource consumed by the downstream proxy
//! controller.

/// Applies JSON patches to the xDS configuration generated for a Gateway.
#[derive(
    Clone,
    Debug,
    Default,
    PartialEq,
    kube::CustomResource,
    serde::Deserialize,
    serde::Serialize,
    schemars::JsonSchema,
)]
#[kube(
    group = "gateway.envoyproxy.io",
    version = "v1alpha1",
    kind = "EnvoyPatchPolicy",
    derive = "PartialEq",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct EnvoyPatchPolicySpec {
    pub target_ref: PolicyTargetReference,

    /// Always `JSONPatch`.
    #[serde(rename = "type")]
    pub type_: String,

    #[serde(default)]
    pub json_patches: Vec<EnvoyJsonPatchConfig>,
}

pub const JSON_PATCH: &str = "JSONPatch";

#[derive(
    Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema,
)]
pub struct PolicyTargetReference {
    pub group: String,
    pub kind: String,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
pub struct EnvoyJsonPatchConfig {
    /// The xDS resource type URL.
    #[serde(rename = "type")]
    pub type_: String,
    pub name: String,
    pub operation: JsonPatchOperation,
}

#[derive(Clone, Debug, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct JsonPatchOperation {
    pub op: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json_path: Option<String>,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
}
