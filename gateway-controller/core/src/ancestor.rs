use crate::policy::TargetRef;

/// Identifies a target a policy attached to, or attempted to attach to.
#[derive(Clone, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct AncestorRef {
    pub group: String,
    pub kind: String,
    pub namespace: String,
    pub name: String,
    pub section_name: Option<String>,
}

/// The outcome of resolving one target reference.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AncestorStatus {
    pub ancestor_ref: AncestorRef,
    pub reason: Reason,
    pub observed_generation: Option<i64>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Reason {
    Accepted,
    Conflicted,
    TargetNotFound,
}

// === impl AncestorRef ===

impl AncestorRef {
    pub fn from_target_ref(namespace: &str, target: &TargetRef) -> Self {
        Self {
            group: target.group().to_string(),
            kind: target.kind.clone(),
            namespace: namespace.to_string(),
            name: target.name.clone(),
            section_name: target.section_name.clone(),
        }
    }
}

// === impl Reason ===

impl Reason {
    #[inline]
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accepted => "Accepted",
            Self::Conflicted => "Conflicted",
            Self::TargetNotFound => "TargetNotFound",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            Self::Accepted => "Policy has been accepted",
            Self::Conflicted => "Another policy is already attached to this target",
            Self::TargetNotFound => "The targeted section does not exist",
        }
    }
}

impl std::fmt::Display for Reason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
