//! Compiles a TrafficProtectionPolicy's rule set into WAF engine directives.

use crate::{
    policy::{Mode, OwaspCoreRuleSet, TrafficProtectionPolicy},
    WafConfig,
};

/// Builds the ordered directive list for a policy.
///
/// Returns an empty list when the policy carries no recognized rule set, in
/// which case the policy produces no attachments.
pub fn compile(config: &WafConfig, policy: &TrafficProtectionPolicy) -> Vec<String> {
    let Some(crs) = policy.core_rule_set() else {
        return Vec::new();
    };

    let mut directives = config.base_directives.clone();
    directives.push(format!("SecRuleEngine {}", engine_mode(policy.mode)));
    directives.push(score_thresholds(crs));
    directives.push(paranoia_level(crs));
    if policy.sampling_percentage < 100 {
        directives.push(format!(
            "SecAction \"id:900400,phase:1,pass,nolog,setvar:tx.sampling_percentage={}\"",
            policy.sampling_percentage
        ));
    }
    directives.push("Include @owasp_crs/*.conf".to_string());

    let exclusions = &crs.rule_exclusions;
    directives.extend(
        exclusions
            .tags
            .iter()
            .map(|tag| format!("SecRuleRemoveByTag {tag}")),
    );
    directives.extend(
        exclusions
            .ids
            .iter()
            .map(|id| format!("SecRuleRemoveById {id}")),
    );
    directives.extend(
        exclusions
            .id_ranges
            .iter()
            .map(|range| format!("SecRuleRemoveById {range}")),
    );

    directives
}

fn engine_mode(mode: Mode) -> &'static str {
    match mode {
        Mode::Enforce => "On",
        Mode::Disabled => "Off",
        Mode::Observe => "DetectionOnly",
    }
}

fn score_thresholds(crs: &OwaspCoreRuleSet) -> String {
    format!(
        "SecAction \"id:900110,phase:1,pass,t:none,nolog,setvar:tx.inbound_anomaly_score_threshold={},setvar:tx.outbound_anomaly_score_threshold={}\"",
        crs.score_thresholds.inbound, crs.score_thresholds.outbound,
    )
}

fn paranoia_level(crs: &OwaspCoreRuleSet) -> String {
    let levels = crs.paranoia_levels;
    // The detection level can only raise the amount of logged rules, never
    // lower it below the blocking level.
    let detection = levels.detection.max(levels.blocking);
    format!(
        "SecAction \"id:900000,phase:1,pass,t:none,nolog,setvar:tx.blocking_paranoia_level={},setvar:tx.detection_paranoia_level={detection}\"",
        levels.blocking,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        policy::{ParanoiaLevels, RuleExclusions, RuleSet, ScoreThresholds},
        ResourceId,
    };
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn mk_policy(mode: Mode, sampling_percentage: u32, crs: OwaspCoreRuleSet) -> TrafficProtectionPolicy {
        TrafficProtectionPolicy {
            id: ResourceId::new("ns", "policy"),
            generation: Some(1),
            creation_timestamp: None,
            target_refs: vec![],
            mode,
            sampling_percentage,
            rule_sets: vec![RuleSet::OwaspCoreRuleSet(crs)],
        }
    }

    fn mk_config() -> WafConfig {
        WafConfig {
            base_directives: vec!["Include @recommended-conf".to_string()],
            library_path: "/lib/waf.so".to_string(),
        }
    }

    #[test]
    fn full_directive_order() {
        let crs = OwaspCoreRuleSet {
            paranoia_levels: ParanoiaLevels {
                blocking: 2,
                detection: 3,
            },
            score_thresholds: ScoreThresholds {
                inbound: 10,
                outbound: 8,
            },
            rule_exclusions: RuleExclusions {
                tags: vec!["attack-sqli".to_string()],
                ids: vec![920350, 942100],
                id_ranges: vec!["930000-930999".to_string()],
            },
        };
        let directives = compile(&mk_config(), &mk_policy(Mode::Enforce, 50, crs));

        assert_eq!(
            directives,
            vec![
                "Include @recommended-conf",
                "SecRuleEngine On",
                "SecAction \"id:900110,phase:1,pass,t:none,nolog,setvar:tx.inbound_anomaly_score_threshold=10,setvar:tx.outbound_anomaly_score_threshold=8\"",
                "SecAction \"id:900000,phase:1,pass,t:none,nolog,setvar:tx.blocking_paranoia_level=2,setvar:tx.detection_paranoia_level=3\"",
                "SecAction \"id:900400,phase:1,pass,nolog,setvar:tx.sampling_percentage=50\"",
                "Include @owasp_crs/*.conf",
                "SecRuleRemoveByTag attack-sqli",
                "SecRuleRemoveById 920350",
                "SecRuleRemoveById 942100",
                "SecRuleRemoveById 930000-930999",
            ]
        );
    }

    #[rstest]
    #[case(Mode::Enforce, "SecRuleEngine On")]
    #[case(Mode::Disabled, "SecRuleEngine Off")]
    #[case(Mode::Observe, "SecRuleEngine DetectionOnly")]
    fn engine_mode_directive(#[case] mode: Mode, #[case] expected: &str) {
        let directives = compile(
            &mk_config(),
            &mk_policy(mode, 100, OwaspCoreRuleSet::default()),
        );
        assert_eq!(directives[1], expected);
    }

    #[test]
    fn full_sampling_omits_sampling_directive() {
        let directives = compile(
            &mk_config(),
            &mk_policy(Mode::Observe, 100, OwaspCoreRuleSet::default()),
        );
        assert!(!directives.iter().any(|d| d.contains("sampling_percentage")));
        assert_eq!(directives.len(), 5);
        assert_eq!(directives[4], "Include @owasp_crs/*.conf");
    }

    #[test]
    fn compiling_twice_is_identical() {
        let crs = OwaspCoreRuleSet {
            rule_exclusions: RuleExclusions {
                tags: vec!["b".to_string(), "a".to_string()],
                ..Default::default()
            },
            ..Default::default()
        };
        let policy = mk_policy(Mode::Enforce, 10, crs);
        assert_eq!(compile(&mk_config(), &policy), compile(&mk_config(), &policy));
    }

    #[test]
    fn unrecognized_rule_set_yields_nothing() {
        let mut policy = mk_policy(Mode::Enforce, 100, OwaspCoreRuleSet::default());
        policy.rule_sets = vec![RuleSet::Unrecognized("Custom".to_string())];
        assert!(compile(&mk_config(), &policy).is_empty());
    }
}
