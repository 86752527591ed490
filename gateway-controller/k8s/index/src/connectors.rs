use ahash::AHashMap as HashMap;
use gateway_controller_core::{
    connector::{ConnectorError, ConnectorState, ResolveConnector},
    ResourceId,
};
use gateway_controller_k8s_api::networking::Connector;

/// The readiness and identity of the Connectors in one namespace.
#[derive(Debug, Default)]
pub struct ConnectorIndex(HashMap<String, ConnectorInfo>);

#[derive(Clone, Debug, Eq, PartialEq)]
struct ConnectorInfo {
    ready: bool,
    identity: Option<String>,
}

// === impl ConnectorIndex ===

impl ConnectorIndex {
    /// Returns true if the connector's readiness or identity changed.
    pub fn apply(&mut self, name: String, connector: &Connector) -> bool {
        let info = ConnectorInfo {
            ready: connector.is_ready(),
            identity: connector.public_key_id().map(Into::into),
        };
        self.0.insert(name, info.clone()) != Some(info)
    }

    pub fn delete(&mut self, name: &str) -> bool {
        self.0.remove(name).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl ResolveConnector for ConnectorIndex {
    fn resolve_connector(&self, namespace: &str, name: &str) -> Result<ConnectorState, ConnectorError> {
        match self.0.get(name) {
            Some(ConnectorInfo {
                ready: true,
                identity: Some(identity),
            }) => Ok(ConnectorState::Ready {
                identity: identity.clone(),
            }),
            Some(ConnectorInfo {
                ready: true,
                identity: None,
            }) => Err(ConnectorError::MissingIdentity(ResourceId::new(namespace, name))),
            // Connectors that don't exist yet are treated as offline.
            Some(_) | None => Ok(ConnectorState::NotReady),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_controller_k8s_api::{
        networking::connector::{ConnectionDetails, ConnectorSpec, ConnectorStatus, PublicKeyDetails},
        Condition, Time,
    };

    fn mk_connector(ready: bool, id: Option<&str>) -> Connector {
        let mut connector = Connector::new(
            "conn",
            ConnectorSpec {
                connector_class_name: "datum".to_string(),
            },
        );
        connector.status = Some(ConnectorStatus {
            conditions: vec![Condition {
                type_: "Ready".to_string(),
                status: if ready { "True" } else { "False" }.to_string(),
                reason: "Test".to_string(),
                message: String::new(),
                observed_generation: None,
                last_transition_time: Time(chrono::DateTime::<chrono::Utc>::MIN_UTC),
            }],
            connection_details: id.map(|id| ConnectionDetails {
                public_key: Some(PublicKeyDetails { id: id.to_string() }),
            }),
        });
        connector
    }

    #[test]
    fn resolves_ready_connectors() {
        let mut index = ConnectorIndex::default();
        assert!(index.apply("conn".to_string(), &mk_connector(true, Some("key"))));
        assert!(!index.apply("conn".to_string(), &mk_connector(true, Some("key"))));
        assert_eq!(
            index.resolve_connector("ns", "conn").unwrap(),
            ConnectorState::Ready {
                identity: "key".to_string()
            }
        );
    }

    #[test]
    fn unknown_and_unready_connectors_are_offline() {
        let mut index = ConnectorIndex::default();
        assert_eq!(
            index.resolve_connector("ns", "conn").unwrap(),
            ConnectorState::NotReady
        );
        index.apply("conn".to_string(), &mk_connector(false, Some("key")));
        assert_eq!(
            index.resolve_connector("ns", "conn").unwrap(),
            ConnectorState::NotReady
        );
    }

    #[test]
    fn ready_connector_without_identity_is_an_error() {
        let mut index = ConnectorIndex::default();
        index.apply("conn".to_string(), &mk_connector(true, None));
        assert!(matches!(
            index.resolve_connector("ns", "conn"),
            Err(ConnectorError::MissingIdentity(_))
        ));
    }
}
