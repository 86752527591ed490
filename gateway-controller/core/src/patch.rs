//! The patch documents produced by the engine and applied by the proxy's
//! controller.

use crate::{connector::BackendError, ResourceId};
use serde::Serialize;

/// A named bundle of patches targeting one downstream Gateway.
#[derive(Clone, Debug, PartialEq)]
pub struct PatchDocument {
    pub id: ResourceId,
    /// Name of the downstream Gateway the patches are applied to.
    pub gateway: String,
    pub patches: Vec<JsonPatch>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct JsonPatch {
    #[serde(rename = "type")]
    pub type_: ResourceType,
    pub name: String,
    pub operation: Operation,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Operation {
    pub op: Op,
    #[serde(rename = "jsonPath", skip_serializing_if = "Option::is_none")]
    pub json_path: Option<String>,
    pub path: String,
    pub value: serde_json::Value,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Op {
    Add,
    Replace,
}

/// The proxy configuration resource type a patch applies to.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
pub enum ResourceType {
    #[serde(rename = "type.googleapis.com/envoy.config.route.v3.RouteConfiguration")]
    RouteConfiguration,
    #[serde(rename = "type.googleapis.com/envoy.config.listener.v3.Listener")]
    Listener,
    #[serde(rename = "type.googleapis.com/envoy.config.cluster.v3.Cluster")]
    Cluster,
}

#[derive(Debug, thiserror::Error)]
pub enum PatchError {
    #[error("failed to encode patch value: {0}")]
    Marshal(#[from] serde_json::Error),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

// === impl JsonPatch ===

impl JsonPatch {
    pub fn add(type_: ResourceType, name: impl Into<String>, path: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            type_,
            name: name.into(),
            operation: Operation {
                op: Op::Add,
                json_path: None,
                path: path.into(),
                value,
            },
        }
    }

    pub fn replace(type_: ResourceType, name: impl Into<String>, path: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            type_,
            name: name.into(),
            operation: Operation {
                op: Op::Replace,
                json_path: None,
                path: path.into(),
                value,
            },
        }
    }

    /// Restricts the patch to the elements selected by a JSONPath.
    pub fn at(mut self, json_path: String) -> Self {
        self.operation.json_path = Some(json_path);
        self
    }
}

// === impl Op ===

impl Op {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Replace => "replace",
        }
    }
}

// === impl ResourceType ===

impl ResourceType {
    pub fn type_url(&self) -> &'static str {
        match self {
            Self::RouteConfiguration => "type.googleapis.com/envoy.config.route.v3.RouteConfiguration",
            Self::Listener => "type.googleapis.com/envoy.config.listener.v3.Listener",
            Self::Cluster => "type.googleapis.com/envoy.config.cluster.v3.Cluster",
        }
    }
}
