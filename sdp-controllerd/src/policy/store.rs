use std::collections::HashMap;
use std::sync::Arc;
use shared::types::Service;
use super::PolicyError;

/// Binds one client to one service it may access.
#[derive(Debug, Clone)]
pub struct ServicePolicy {
    pub service: Arc<Service>,
}

/// A principal recognized by the controller, keyed by the common name
/// of its client certificate.
#[derive(Debug, Clone)]
pub struct ClientIdentity {
    pub device_id: String,
    pub label: String,
    pub services: Vec<ServicePolicy>,
}

impl ClientIdentity {
    pub fn authorized_services(&self) -> impl Iterator<Item = &Service> {
        self.services.iter().map(|policy| policy.service.as_ref())
    }
}

/// A client as declared in configuration, with service references by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientDefinition {
    pub device_id: String,
    pub label: String,
    pub services: Vec<String>,
}

/// Read-only mapping of device id to authorized services.
///
/// Built once before serving and never mutated afterwards, so it is shared
/// across connection tasks behind an `Arc` without locking.
#[derive(Debug, Default)]
pub struct PolicyStore {
    services: HashMap<String, Arc<Service>>,
    clients: HashMap<String, ClientIdentity>,
}

impl PolicyStore {
    /// Resolve client definitions against the service set.
    /// Any dangling service reference fails the whole build.
    pub fn build(
        services: Vec<Service>,
        clients: Vec<ClientDefinition>,
    ) -> Result<Self, PolicyError> {
        let mut by_name = HashMap::with_capacity(services.len());
        for service in services {
            validate_service(&service)?;
            if by_name.contains_key(&service.name) {
                return Err(PolicyError::DuplicateService(service.name));
            }
            by_name.insert(service.name.clone(), Arc::new(service));
        }

        let mut by_id = HashMap::with_capacity(clients.len());
        for client in clients {
            if by_id.contains_key(&client.device_id) {
                return Err(PolicyError::DuplicateClient(client.device_id));
            }

            let policies = client
                .services
                .iter()
                .map(|name| {
                    by_name
                        .get(name)
                        .map(|service| ServicePolicy {
                            service: Arc::clone(service),
                        })
                        .ok_or_else(|| PolicyError::UnknownService {
                            client: client.device_id.clone(),
                            service: name.clone(),
                        })
                })
                .collect::<Result<Vec<_>, _>>()?;

            by_id.insert(
                client.device_id.clone(),
                ClientIdentity {
                    device_id: client.device_id,
                    label: client.label,
                    services: policies,
                },
            );
        }

        Ok(Self {
            services: by_name,
            clients: by_id,
        })
    }

    pub fn lookup(&self, device_id: &str) -> Option<&ClientIdentity> {
        self.clients.get(device_id)
    }

    pub fn service_count(&self) -> usize {
        self.services.len()
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }
}

fn validate_service(service: &Service) -> Result<(), PolicyError> {
    let invalid = |reason| PolicyError::InvalidService {
        name: service.name.clone(),
        reason,
    };

    if service.name.is_empty() {
        return Err(invalid("missing field name"));
    }
    if service.addresses.is_empty() {
        return Err(invalid("missing field ips"));
    }
    if service.ports.is_empty() {
        return Err(invalid("missing field ports"));
    }
    if service.ports.iter().any(|p| p.protocol.has_ports() && p.port == 0) {
        return Err(invalid("port 0 is not a valid port"));
    }
    if service.access_types.is_empty() {
        return Err(invalid("missing field access types"));
    }
    Ok(())
}
