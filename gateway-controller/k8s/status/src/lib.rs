#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod ancestors;
pub mod conditions;
mod controller;

pub use self::controller::{Controller, ControllerMetrics};
use gateway_controller_core::ResourceId;
use gateway_controller_k8s_api::{self as k8s, envoy::EnvoyPatchPolicy};

/// Field manager for every write made by the controller.
pub const FIELD_MANAGER: &str = "gateway-controller";

/// A write for the status controller to perform.
#[derive(Clone, Debug, PartialEq)]
pub enum Update {
    /// Creates or updates a patch document in its downstream namespace.
    ApplyDocument(Box<EnvoyPatchPolicy>),
    DeleteDocument(ResourceId),
    PolicyStatus {
        id: ResourceId,
        patch: k8s::Patch<serde_json::Value>,
    },
    ProxyStatus {
        id: ResourceId,
        patch: k8s::Patch<serde_json::Value>,
    },
}

// === impl Update ===

impl Update {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ApplyDocument(_) | Self::DeleteDocument(_) => "EnvoyPatchPolicy",
            Self::PolicyStatus { .. } => "TrafficProtectionPolicy",
            Self::ProxyStatus { .. } => "HTTPProxy",
        }
    }
}

/// Builds a merge patch replacing a resource's status.
pub fn make_patch<S: serde::Serialize>(
    api_version: &str,
    kind: &str,
    name: &str,
    status: S,
) -> k8s::Patch<serde_json::Value> {
    let value = serde_json::json!({
        "apiVersion": api_version,
        "kind": kind,
        "name": name,
        "status": status,
    });
    k8s::Patch::Merge(value)
}
