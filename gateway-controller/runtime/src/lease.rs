use crate::{
    k8s::{self, labels, Deployment, ObjectMeta, PatchParams, Resource},
    status::FIELD_MANAGER,
};
use anyhow::Result;
use k8s_openapi::{
    api::coordination::v1 as coordv1, apimachinery::pkg::apis::meta::v1::OwnerReference,
};
use std::sync::Arc;
use tokio::{sync::watch, time};

const COMPONENT: &str = "app.kubernetes.io/component";
const COMPONENT_VALUE: &str = "write-lease";

/// Identifies the Lease that guards writes and how it is held.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WriteLease {
    pub namespace: String,
    pub name: String,
    pub duration: time::Duration,
    pub renew_grace_period: time::Duration,
}

// === impl WriteLease ===

impl WriteLease {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: "gateway-controller-write".to_string(),
            duration: time::Duration::from_secs(30),
            renew_grace_period: time::Duration::from_secs(1),
        }
    }

    /// Creates the Lease if needed, owned by the controller Deployment, and
    /// starts competing for it as `hostname`.
    pub async fn init<T>(
        &self,
        runtime: &kubert::Runtime<T>,
        deployment_name: &str,
        hostname: &str,
    ) -> Result<watch::Receiver<Arc<kubert::lease::Claim>>> {
        let deployments = k8s::Api::<Deployment>::namespaced(runtime.client(), &self.namespace);
        let owner = deployments
            .get(deployment_name)
            .await?
            .controller_owner_ref(&());

        let api = k8s::Api::<coordv1::Lease>::namespaced(runtime.client(), &self.namespace);
        let params = PatchParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        match api
            .patch(&self.name, &params, &k8s::Patch::Apply(self.resource(owner)))
            .await
        {
            Ok(_) => tracing::info!(namespace = %self.namespace, name = %self.name, "Created write Lease"),
            // A conflict on resource version "0" means another replica got there first.
            Err(k8s::Error::Api(_)) => {
                tracing::debug!(namespace = %self.namespace, name = %self.name, "Write Lease already exists")
            }
            Err(error) => return Err(error.into()),
        };

        let claim_params = kubert::lease::ClaimParams {
            lease_duration: self.duration,
            renew_grace_period: self.renew_grace_period,
        };
        let (claims, _task) = kubert::lease::LeaseManager::init(api, &self.name)
            .await?
            .spawn(hostname, claim_params)
            .await?;
        Ok(claims)
    }

    /// The Lease object to create. Labeled like the generated documents.
    fn resource(&self, owner: Option<OwnerReference>) -> coordv1::Lease {
        let mut lease_labels = labels::managed();
        lease_labels.insert(COMPONENT.to_string(), COMPONENT_VALUE.to_string());
        coordv1::Lease {
            metadata: ObjectMeta {
                name: Some(self.name.clone()),
                namespace: Some(self.namespace.clone()),
                // Only create the Lease if it does not already exist.
                resource_version: Some("0".to_string()),
                owner_references: owner.map(|r| vec![r]),
                labels: Some(lease_labels),
                ..Default::default()
            },
            spec: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner() -> OwnerReference {
        OwnerReference {
            api_version: "apps/v1".to_string(),
            kind: "Deployment".to_string(),
            name: "gateway-controller".to_string(),
            uid: "uid-1".to_string(),
            controller: Some(true),
            ..Default::default()
        }
    }

    #[test]
    fn lease_is_labeled_like_generated_documents() {
        let lease = WriteLease::new("datum-system").resource(Some(owner()));
        let lease_labels = lease.metadata.labels.unwrap();
        assert!(labels::is_managed(&lease_labels));
        assert_eq!(
            lease_labels.get(COMPONENT).map(String::as_str),
            Some(COMPONENT_VALUE)
        );
        assert_eq!(lease.metadata.owner_references, Some(vec![owner()]));
        assert_eq!(lease.metadata.namespace.as_deref(), Some("datum-system"));
        assert_eq!(lease.metadata.resource_version.as_deref(), Some("0"));
        assert_eq!(lease.spec, None);
    }

    #[test]
    fn lease_without_owner() {
        let lease = WriteLease::new("ns").resource(None);
        assert_eq!(lease.metadata.name.as_deref(), Some("gateway-controller-write"));
        assert_eq!(lease.metadata.owner_references, None);
    }
}
