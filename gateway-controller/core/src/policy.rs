use crate::{
    gateway::{GATEWAY_KIND, HTTP_ROUTE_KIND},
    effective_group, ResourceId, GATEWAY_API_GROUP,
};
use chrono::{DateTime, Utc};

/// A TrafficProtectionPolicy as seen by the resolver.
#[derive(Clone, Debug, PartialEq)]
pub struct TrafficProtectionPolicy {
    pub id: ResourceId,
    pub generation: Option<i64>,
    pub creation_timestamp: Option<DateTime<Utc>>,
    pub target_refs: Vec<TargetRef>,
    pub mode: Mode,
    /// Percentage of requests inspected by the engine; values of 100 or more
    /// disable sampling.
    pub sampling_percentage: u32,
    pub rule_sets: Vec<RuleSet>,
}

/// Declares what a policy attaches to. Policies are always local to the
/// targets' namespace.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct TargetRef {
    pub group: String,
    pub kind: String,
    pub name: String,
    pub section_name: Option<String>,
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum Mode {
    #[default]
    Observe,
    Enforce,
    Disabled,
}

#[derive(Clone, Debug, PartialEq)]
pub enum RuleSet {
    OwaspCoreRuleSet(OwaspCoreRuleSet),
    /// A rule set type this controller doesn't understand.
    Unrecognized(String),
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct OwaspCoreRuleSet {
    pub paranoia_levels: ParanoiaLevels,
    pub score_thresholds: ScoreThresholds,
    pub rule_exclusions: RuleExclusions,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ParanoiaLevels {
    pub blocking: u8,
    pub detection: u8,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ScoreThresholds {
    pub inbound: u32,
    pub outbound: u32,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RuleExclusions {
    pub tags: Vec<String>,
    pub ids: Vec<u32>,
    pub id_ranges: Vec<String>,
}

// === impl TrafficProtectionPolicy ===

impl TrafficProtectionPolicy {
    pub fn core_rule_set(&self) -> Option<&OwaspCoreRuleSet> {
        self.rule_sets.iter().find_map(|rs| match rs {
            RuleSet::OwaspCoreRuleSet(crs) => Some(crs),
            RuleSet::Unrecognized(_) => None,
        })
    }
}

/// Sorts policies by creation timestamp, oldest first, breaking ties by
/// namespace and name. Policies without a timestamp sort first.
pub fn precedence_order(policies: &[TrafficProtectionPolicy]) -> Vec<&TrafficProtectionPolicy> {
    let mut ordered = policies.iter().collect::<Vec<_>>();
    ordered.sort_by(|a, b| {
        a.creation_timestamp
            .cmp(&b.creation_timestamp)
            .then_with(|| a.id.cmp(&b.id))
    });
    ordered
}

// === impl TargetRef ===

impl TargetRef {
    #[inline]
    pub fn group(&self) -> &str {
        effective_group(&self.group)
    }

    #[inline]
    pub fn targets_gateway(&self) -> bool {
        self.group() == GATEWAY_API_GROUP && self.kind == GATEWAY_KIND
    }

    #[inline]
    pub fn targets_http_route(&self) -> bool {
        self.group() == GATEWAY_API_GROUP && self.kind == HTTP_ROUTE_KIND
    }
}

// === impl ParanoiaLevels ===

impl Default for ParanoiaLevels {
    fn default() -> Self {
        Self {
            blocking: 1,
            detection: 1,
        }
    }
}

// === impl ScoreThresholds ===

impl Default for ScoreThresholds {
    fn default() -> Self {
        Self {
            inbound: 5,
            outbound: 4,
        }
    }
}
