use std::sync::Arc;
use chrono::Utc;
use shared::protocol::{DiscoverResponse, HelloResponse};
use crate::policy::PolicyStore;
use crate::tls::PeerIdentity;

/// Result of resolving a caller against the policy store.
///
/// A denial is an ordinary outcome, not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum DiscoveryOutcome {
    Authorized(DiscoverResponse),
    Denied(DiscoverResponse),
}

/// Resolves verified identities into the set of services they may reach.
///
/// Holds no transport state; callers hand it an identity already extracted
/// from the TLS session.
#[derive(Debug, Clone)]
pub struct DiscoveryService {
    store: Arc<PolicyStore>,
    version: String,
}

impl DiscoveryService {
    pub fn new(store: Arc<PolicyStore>, version: impl Into<String>) -> Self {
        Self {
            store,
            version: version.into(),
        }
    }

    pub fn handle(&self, identity: &PeerIdentity) -> DiscoveryOutcome {
        match self.store.lookup(identity.as_str()) {
            Some(client) => {
                let response =
                    DiscoverResponse::authorized(&client.device_id, client.authorized_services());
                tracing::info!(
                    device_id = %client.device_id,
                    label = %client.label,
                    services = response.services.len(),
                    "Discovery served"
                );
                DiscoveryOutcome::Authorized(response)
            }
            None => {
                tracing::warn!(device_id = %identity, "Discovery denied for unknown identity");
                DiscoveryOutcome::Denied(DiscoverResponse::denied())
            }
        }
    }

    pub fn hello(&self, identity: &PeerIdentity) -> HelloResponse {
        HelloResponse {
            success: true,
            msg: format!("Hello {}!", identity),
            device_id: identity.to_string(),
            datetime: Utc::now(),
            version: self.version.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};
    use shared::protocol::NOT_AUTHORIZED_MSG;
    use shared::types::{AccessType, ProtoPort, Service};
    use crate::policy::ClientDefinition;

    fn web_store() -> Arc<PolicyStore> {
        let web = Service {
            name: "web".to_string(),
            addresses: vec![IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5))],
            ports: vec![ProtoPort::tcp(443)],
            tags: vec!["prod".to_string()],
            access_types: vec![AccessType::OpenSpa],
        };
        let ping = Service {
            name: "ping".to_string(),
            addresses: vec![IpAddr::V4(Ipv4Addr::new(10, 0, 0, 6))],
            ports: vec![ProtoPort::icmp()],
            tags: vec![],
            access_types: vec![AccessType::OpenSpa],
        };
        let c1 = ClientDefinition {
            device_id: "C1".to_string(),
            label: "first".to_string(),
            services: vec!["web".to_string()],
        };
        Arc::new(PolicyStore::build(vec![web, ping], vec![c1]).unwrap())
    }

    #[test]
    fn test_known_identity_gets_configured_services() {
        let discovery = DiscoveryService::new(web_store(), "0.1.0");

        let outcome = discovery.handle(&PeerIdentity("C1".to_string()));
        let DiscoveryOutcome::Authorized(response) = outcome else {
            panic!("expected authorized outcome");
        };

        assert!(response.success);
        assert_eq!(response.device_id, "C1");
        assert_eq!(response.services.len(), 1);
        assert_eq!(response.services[0].name, "web");
        assert_eq!(response.services[0].ports, vec![vec!["tcp", "443"]]);
        assert_eq!(response.services[0].access_type, vec!["OpenSPA"]);

        let decoded = response.into_services().unwrap();
        assert_eq!(decoded[0].ports, vec![ProtoPort::tcp(443)]);
    }

    #[test]
    fn test_unknown_identity_is_denied() {
        let discovery = DiscoveryService::new(web_store(), "0.1.0");

        let outcome = discovery.handle(&PeerIdentity("C2".to_string()));
        let DiscoveryOutcome::Denied(response) = outcome else {
            panic!("expected denied outcome");
        };

        assert!(!response.success);
        assert!(response.services.is_empty());
        assert_eq!(response.error.as_deref(), Some(NOT_AUTHORIZED_MSG));
    }

    #[test]
    fn test_hello_echoes_identity() {
        let discovery = DiscoveryService::new(web_store(), "1.2.3");
        let hello = discovery.hello(&PeerIdentity("C2".to_string()));

        assert!(hello.success);
        assert_eq!(hello.msg, "Hello C2!");
        assert_eq!(hello.device_id, "C2");
        assert_eq!(hello.version, "1.2.3");
    }
}
