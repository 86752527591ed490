//! Arbitrates which TrafficProtectionPolicy attaches to which target.
//!
//! Targets are claimed "first writer wins" within each scope. Policies are
//! processed in four passes, least specific first, so that patches generated
//! for more specific scopes are applied later and take priority:
//!
//! 1. whole Gateways,
//! 2. Gateway listeners,
//! 3. whole HTTPRoutes,
//! 4. HTTPRoute rules.
//!
//! Within a pass, policies are ordered by creation timestamp and then by
//! namespace and name.

use crate::{
    ancestor::{AncestorRef, AncestorStatus, Reason},
    directives,
    gateway::{Gateway, HttpRoute},
    policy::{self, TargetRef, TrafficProtectionPolicy},
    target::{Sections, TargetContext, Targets},
    Config, ResourceId,
};
use ahash::AHashMap as HashMap;
use std::collections::BTreeMap;

/// A resolved edge between a policy and a concrete target scope.
#[derive(Clone, Debug, PartialEq)]
pub struct PolicyAttachment<'a> {
    pub gateway: &'a Gateway,
    pub listener: Option<String>,
    pub route: Option<&'a HttpRoute>,
    pub rule: Option<String>,
    pub directives: Vec<String>,
}

/// The output of one resolution pass.
#[derive(Debug, Default)]
pub struct Resolution<'a> {
    /// Attachments in emission order.
    pub attachments: Vec<PolicyAttachment<'a>>,
    /// Ancestor statuses keyed by policy, then by ancestor reference.
    pub statuses: BTreeMap<ResourceId, BTreeMap<AncestorRef, AncestorStatus>>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Pass {
    GatewayWhole,
    GatewayListener,
    RouteWhole,
    RouteRule,
}

// === impl Pass ===

impl Pass {
    pub const ORDER: [Pass; 4] = [
        Pass::GatewayWhole,
        Pass::GatewayListener,
        Pass::RouteWhole,
        Pass::RouteRule,
    ];

    pub fn selects(&self, target: &TargetRef) -> bool {
        match self {
            Self::GatewayWhole => target.targets_gateway() && target.section_name.is_none(),
            Self::GatewayListener => target.targets_gateway() && target.section_name.is_some(),
            Self::RouteWhole => target.targets_http_route() && target.section_name.is_none(),
            Self::RouteRule => target.targets_http_route() && target.section_name.is_some(),
        }
    }
}

// === impl Resolution ===

impl Resolution<'_> {
    fn record(&mut self, policy: &TrafficProtectionPolicy, ancestor_ref: AncestorRef, reason: Reason) {
        tracing::debug!(
            policy = %policy.id,
            ancestor.kind = %ancestor_ref.kind,
            ancestor.name = %ancestor_ref.name,
            ancestor.section = ?ancestor_ref.section_name,
            %reason,
            "Resolved policy target",
        );
        let status = AncestorStatus {
            ancestor_ref: ancestor_ref.clone(),
            reason,
            observed_generation: policy.generation,
        };
        self.statuses
            .entry(policy.id.clone())
            .or_default()
            .insert(ancestor_ref, status);
    }
}

/// Resolves every policy's target references against the given targets.
///
/// `targets` must be freshly built for this pass; claims recorded here are
/// never carried over between passes.
pub fn resolve<'a>(
    config: &Config,
    targets: &mut Targets<'a>,
    policies: &[TrafficProtectionPolicy],
) -> Resolution<'a> {
    let ordered = policy::precedence_order(policies);
    let mut resolution = Resolution::default();

    for pass in Pass::ORDER {
        process_pass(&ordered, pass, |policy, target| match pass {
            Pass::GatewayWhole | Pass::GatewayListener => {
                attach_to_gateway(config, &mut targets.gateways, &mut resolution, policy, target)
            }
            Pass::RouteWhole | Pass::RouteRule => attach_to_route(
                config,
                &targets.gateways,
                &mut targets.routes,
                &mut resolution,
                policy,
                target,
            ),
        });
    }

    resolution
}

fn process_pass<'p>(
    policies: &[&'p TrafficProtectionPolicy],
    pass: Pass,
    mut handle: impl FnMut(&'p TrafficProtectionPolicy, &'p TargetRef),
) {
    for policy in policies.iter().copied() {
        for target in policy.target_refs.iter().filter(|t| pass.selects(t)) {
            handle(policy, target);
        }
    }
}

/// Claims the target's scope for the policy, recording a status for the
/// outcome. Returns false if the policy may not attach.
fn claim<T: Sections>(
    ctx: &mut TargetContext<'_, T>,
    resolution: &mut Resolution<'_>,
    policy: &TrafficProtectionPolicy,
    target: &TargetRef,
) -> bool {
    let ancestor_ref = AncestorRef::from_target_ref(&policy.id.namespace, target);

    match target.section_name.as_deref() {
        None => {
            if !ctx.claim() {
                resolution.record(policy, ancestor_ref, Reason::Conflicted);
                return false;
            }
        }
        Some(section) => {
            if !ctx.target.has_section(section) {
                resolution.record(policy, ancestor_ref, Reason::TargetNotFound);
                return false;
            }
            if !ctx.claim_section(section) {
                resolution.record(policy, ancestor_ref, Reason::Conflicted);
                return false;
            }
        }
    }

    resolution.record(policy, ancestor_ref, Reason::Accepted);
    true
}

fn attach_to_gateway<'a>(
    config: &Config,
    gateways: &mut HashMap<ResourceId, TargetContext<'a, Gateway>>,
    resolution: &mut Resolution<'a>,
    policy: &TrafficProtectionPolicy,
    target: &TargetRef,
) {
    let id = ResourceId::new(policy.id.namespace.clone(), target.name.clone());
    let Some(ctx) = gateways.get_mut(&id) else {
        return;
    };

    if !claim(ctx, resolution, policy, target) {
        return;
    }

    let directives = directives::compile(&config.waf, policy);
    if directives.is_empty() {
        return;
    }

    resolution.attachments.push(PolicyAttachment {
        gateway: ctx.target,
        listener: target.section_name.clone(),
        route: None,
        rule: None,
        directives,
    });
}

fn attach_to_route<'a>(
    config: &Config,
    gateways: &HashMap<ResourceId, TargetContext<'a, Gateway>>,
    routes: &mut HashMap<ResourceId, TargetContext<'a, HttpRoute>>,
    resolution: &mut Resolution<'a>,
    policy: &TrafficProtectionPolicy,
    target: &TargetRef,
) {
    let id = ResourceId::new(policy.id.namespace.clone(), target.name.clone());
    let Some(ctx) = routes.get_mut(&id) else {
        return;
    };

    if !claim(ctx, resolution, policy, target) {
        return;
    }

    let directives = directives::compile(&config.waf, policy);
    if directives.is_empty() {
        return;
    }

    let route = ctx.target;
    for parent in route.parents.iter().filter(|p| p.targets_gateway()) {
        let Some(gateway) = gateways.get(&parent.gateway_id(&route.id.namespace)) else {
            continue;
        };
        resolution.attachments.push(PolicyAttachment {
            gateway: gateway.target,
            listener: parent.section_name.clone(),
            route: Some(route),
            rule: target.section_name.clone(),
            directives: directives.clone(),
        });
    }
}
