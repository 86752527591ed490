//! Merges freshly resolved ancestor statuses into a policy's observed status.

use crate::conditions;
use chrono::{DateTime, Utc};
use gateway_controller_core::{effective_group, AncestorRef, AncestorStatus};
use gateway_controller_k8s_api::{
    gateway::ParentReference,
    networking::{traffic_protection_policy::LocalPolicyTargetReference, PolicyAncestorStatus},
};

pub fn parent_reference(ancestor: &AncestorRef) -> ParentReference {
    ParentReference {
        group: Some(ancestor.group.clone()),
        kind: Some(ancestor.kind.clone()),
        namespace: Some(ancestor.namespace.clone()),
        name: ancestor.name.clone(),
        section_name: ancestor.section_name.clone(),
        port: None,
    }
}

/// Builds this controller's ancestor statuses from resolved outcomes.
pub fn desired<'s>(
    statuses: impl IntoIterator<Item = &'s AncestorStatus>,
    controller_name: &str,
    timestamp: DateTime<Utc>,
) -> Vec<PolicyAncestorStatus> {
    statuses
        .into_iter()
        .map(|status| PolicyAncestorStatus {
            ancestor_ref: parent_reference(&status.ancestor_ref),
            controller_name: controller_name.to_string(),
            conditions: vec![conditions::accepted(status, timestamp)],
        })
        .collect()
}

/// Merges `desired` into `existing`.
///
/// Entries with the same ancestor and controller are replaced. This
/// controller's entries for ancestors that no longer correspond to one of the
/// policy's target references are dropped. Entries written by other
/// controllers are kept as they are.
pub fn merge(
    existing: &[PolicyAncestorStatus],
    desired: Vec<PolicyAncestorStatus>,
    controller_name: &str,
    namespace: &str,
    target_refs: &[LocalPolicyTargetReference],
) -> Vec<PolicyAncestorStatus> {
    let mut merged = existing
        .iter()
        .filter(|status| {
            if status.controller_name != controller_name {
                return true;
            }
            let replaced = desired.iter().any(|d| d.ancestor_ref == status.ancestor_ref);
            let targeted = target_refs
                .iter()
                .any(|t| references_target(&status.ancestor_ref, namespace, t));
            !replaced && targeted
        })
        .cloned()
        .collect::<Vec<_>>();

    for mut status in desired {
        if let Some(prior) = existing
            .iter()
            .find(|e| e.controller_name == status.controller_name && e.ancestor_ref == status.ancestor_ref)
        {
            conditions::preserve_transition_times(&prior.conditions, &mut status.conditions);
        }
        merged.push(status);
    }

    merged.sort_by(|a, b| sort_key(a).cmp(&sort_key(b)));
    merged
}

fn references_target(
    ancestor: &ParentReference,
    namespace: &str,
    target: &LocalPolicyTargetReference,
) -> bool {
    effective_group(ancestor.group.as_deref().unwrap_or_default())
        == effective_group(&target.group)
        && ancestor.kind.as_deref() == Some(target.kind.as_str())
        && ancestor.namespace.as_deref().unwrap_or(namespace) == namespace
        && ancestor.name == target.name
        && ancestor.section_name == target.section_name
}

type SortKey<'a> = (
    &'a str,
    Option<&'a str>,
    Option<&'a str>,
    Option<&'a str>,
    &'a str,
    Option<&'a str>,
);

fn sort_key(status: &PolicyAncestorStatus) -> SortKey<'_> {
    let r = &status.ancestor_ref;
    (
        &status.controller_name,
        r.group.as_deref(),
        r.kind.as_deref(),
        r.namespace.as_deref(),
        &r.name,
        r.section_name.as_deref(),
    )
}
