use crate::{gateway::ParentReference, Condition};

/// Attaches web application firewall protection to Gateways, listeners,
/// HTTPRoutes, or individual HTTPRoute rules.
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
    kind = "TrafficProtectionPolicy",
    status = "TrafficProtectionPolicyStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct TrafficProtectionPolicySpec {
    pub target_refs: Vec<LocalPolicyTargetReference>,

    #[serde(default)]
    pub mode: Mode,

    /// Percentage of requests to inspect. Defaults to 100.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sampling_percentage: Option<u32>,

    #[serde(default)]
    pub rule_sets: Vec<RuleSet>,
}

#[derive(
    Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema,
)]
#[serde(rename_all = "camelCase")]
pub struct LocalPolicyTargetReference {
    pub group: String,
    pub kind: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_name: Option<String>,
}

#[derive(
    Copy,
    Clone,
    Debug,
    Default,
    Eq,
    PartialEq,
    serde::Deserialize,
    serde::Serialize,
    schemars::JsonSchema,
)]
pub enum Mode {
    #[default]
    Observe,
    Enforce,
    Disabled,
}

#[derive(Clone, Debug, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RuleSet {
    /// Only `OWASPCoreRuleSet` is currently understood.
    #[serde(rename = "type")]
    pub type_: String,

    #[serde(
        default,
        rename = "owaspCoreRuleSet",
        skip_serializing_if = "Option::is_none"
    )]
    pub owasp_core_rule_set: Option<OwaspCoreRuleSet>,
}

#[derive(
    Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema,
)]
#[serde(rename_all = "camelCase")]
pub struct OwaspCoreRuleSet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paranoia_levels: Option<ParanoiaLevels>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score_thresholds: Option<ScoreThresholds>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_exclusions: Option<RuleExclusions>,
}

#[derive(
    Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema,
)]
#[serde(rename_all = "camelCase")]
pub struct ParanoiaLevels {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocking: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detection: Option<u8>,
}

#[derive(
    Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema,
)]
#[serde(rename_all = "camelCase")]
pub struct ScoreThresholds {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inbound: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outbound: Option<u32>,
}

#[derive(
    Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema,
)]
#[serde(rename_all = "camelCase")]
pub struct RuleExclusions {
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub ids: Vec<u32>,
    /// Inclusive ranges such as `920100-920199`.
    #[serde(default)]
    pub id_ranges: Vec<String>,
}

#[derive(
    Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema,
)]
#[serde(rename_all = "camelCase")]
pub struct TrafficProtectionPolicyStatus {
    #[serde(default)]
    pub ancestors: Vec<PolicyAncestorStatus>,
}

#[derive(Clone, Debug, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PolicyAncestorStatus {
    pub ancestor_ref: ParentReference,
    pub controller_name: String,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}
