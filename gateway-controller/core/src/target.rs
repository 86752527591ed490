use crate::{
    gateway::{Gateway, HttpRoute},
    ResourceId,
};
use ahash::{AHashMap as HashMap, AHashSet as HashSet};

/// Lookup tables for the objects policies may attach to, built fresh for every
/// reconciliation pass.
///
/// Claims are held in two independent namespaces per target: the whole object
/// and its named sections. Holding the whole object does not prevent another
/// policy from claiming a named section, and vice versa.
#[derive(Debug)]
pub struct Targets<'a> {
    pub gateways: HashMap<ResourceId, TargetContext<'a, Gateway>>,
    pub routes: HashMap<ResourceId, TargetContext<'a, HttpRoute>>,
}

#[derive(Debug)]
pub struct TargetContext<'a, T> {
    pub target: &'a T,
    attached: bool,
    sections: HashSet<String>,
}

/// A target that may be attached to by section name.
pub trait Sections {
    fn has_section(&self, name: &str) -> bool;
}

// === impl Targets ===

impl<'a> Targets<'a> {
    pub fn new(gateways: &'a [Gateway], routes: &'a [HttpRoute]) -> Self {
        Self {
            gateways: gateways
                .iter()
                .map(|gw| (gw.id.clone(), TargetContext::new(gw)))
                .collect(),
            routes: routes
                .iter()
                .map(|rt| (rt.id.clone(), TargetContext::new(rt)))
                .collect(),
        }
    }
}

// === impl TargetContext ===

impl<'a, T> TargetContext<'a, T> {
    fn new(target: &'a T) -> Self {
        Self {
            target,
            attached: false,
            sections: HashSet::new(),
        }
    }

    #[inline]
    pub fn is_attached(&self) -> bool {
        self.attached
    }

    #[inline]
    pub fn is_section_claimed(&self, section: &str) -> bool {
        self.sections.contains(section)
    }

    /// Claims the whole object. Returns false if it was already claimed.
    pub fn claim(&mut self) -> bool {
        !std::mem::replace(&mut self.attached, true)
    }

    /// Claims a named section. Returns false if it was already claimed.
    pub fn claim_section(&mut self, section: &str) -> bool {
        self.sections.insert(section.to_string())
    }
}

impl Sections for Gateway {
    fn has_section(&self, name: &str) -> bool {
        self.listener(name).is_some()
    }
}

impl Sections for HttpRoute {
    fn has_section(&self, name: &str) -> bool {
        self.has_rule(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{Listener, ListenerProtocol, RouteRule};

    fn mk_gateway() -> Gateway {
        Gateway {
            id: ResourceId::new("ns", "gw"),
            listeners: vec![Listener {
                name: "https".to_string(),
                port: 443,
                protocol: ListenerProtocol::Https,
            }],
        }
    }

    #[test]
    fn whole_and_section_claims_are_independent() {
        let gateways = vec![mk_gateway()];
        let mut targets = Targets::new(&gateways, &[]);
        let ctx = targets
            .gateways
            .get_mut(&ResourceId::new("ns", "gw"))
            .unwrap();

        assert!(ctx.claim_section("https"));
        assert!(!ctx.is_attached());
        assert!(ctx.claim());
        assert!(!ctx.claim());
        assert!(!ctx.claim_section("https"));
        assert!(ctx.is_section_claimed("https"));
    }

    #[test]
    fn sections() {
        let gw = mk_gateway();
        assert!(gw.has_section("https"));
        assert!(!gw.has_section("http"));

        let route = HttpRoute {
            id: ResourceId::new("ns", "route"),
            parents: vec![],
            rules: vec![
                RouteRule {
                    name: Some("r1".to_string()),
                    ..Default::default()
                },
                RouteRule::default(),
            ],
        };
        assert!(route.has_section("r1"));
        assert!(!route.has_section("r2"));
    }

    #[test]
    fn index_is_keyed_by_namespace_and_name() {
        let gateways = vec![mk_gateway()];
        let targets = Targets::new(&gateways, &[]);
        assert!(targets.gateways.contains_key(&ResourceId::new("ns", "gw")));
        assert!(!targets
            .gateways
            .contains_key(&ResourceId::new("other", "gw")));
        assert!(targets.routes.is_empty());
    }
}
