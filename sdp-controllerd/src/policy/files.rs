//! YAML policy files: the `services` and `clients` definitions.

use std::net::IpAddr;
use std::path::Path;
use anyhow::{Context, Result};
use serde::Deserialize;
use shared::types::{AccessType, ProtoPort, Service};
use shared::ProtocolError;
use uuid::Uuid;
use super::{ClientDefinition, PolicyError};

const SERVICES_KIND: &str = "services";
const CLIENTS_KIND: &str = "clients";

/// Port entries may be written as `[tcp, 443]` or `[tcp, "443"]`
#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    Text(String),
    Number(u64),
}

impl Scalar {
    fn into_string(self) -> String {
        match self {
            Scalar::Text(s) => s,
            Scalar::Number(n) => n.to_string(),
        }
    }
}

#[derive(Deserialize)]
struct ServicesFile {
    #[serde(default)]
    kind: String,
    #[serde(default)]
    services: Vec<ServiceEntry>,
}

#[derive(Deserialize)]
struct ServiceEntry {
    #[serde(default)]
    name: String,
    #[serde(default)]
    ips: Vec<String>,
    #[serde(default)]
    ports: Vec<Vec<Scalar>>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(rename = "accessType", default)]
    access_type: Vec<String>,
}

#[derive(Deserialize)]
struct ClientsFile {
    #[serde(default)]
    kind: String,
    #[serde(default)]
    clients: Vec<ClientEntry>,
}

#[derive(Deserialize)]
struct ClientEntry {
    #[serde(rename = "deviceId", default)]
    device_id: String,
    #[serde(default)]
    label: String,
    #[serde(default)]
    services: Vec<ClientServiceEntry>,
}

#[derive(Deserialize)]
struct ClientServiceEntry {
    name: String,
}

/// Read and validate a services file
pub fn load_services(path: impl AsRef<Path>) -> Result<Vec<Service>> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read services file: {}", path.display()))?;

    let services = parse_services(&contents)
        .with_context(|| format!("Failed to parse services file: {}", path.display()))?;

    for service in &services {
        tracing::debug!(name = %service.name, "Loaded service configuration");
    }
    Ok(services)
}

/// Read and validate a clients file. Service references are resolved later
/// by [`super::PolicyStore::build`].
pub fn load_clients(path: impl AsRef<Path>) -> Result<Vec<ClientDefinition>> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read clients file: {}", path.display()))?;

    parse_clients(&contents)
        .with_context(|| format!("Failed to parse clients file: {}", path.display()))
}

pub fn parse_services(yaml: &str) -> Result<Vec<Service>, PolicyError> {
    let file: ServicesFile = serde_yaml::from_str(yaml)?;
    if file.kind != SERVICES_KIND {
        return Err(PolicyError::WrongKind {
            expected: SERVICES_KIND,
            found: file.kind,
        });
    }

    file.services.into_iter().map(parse_service).collect()
}

fn parse_service(entry: ServiceEntry) -> Result<Service, PolicyError> {
    let name = entry.name;
    let invalid = |reason| PolicyError::InvalidService {
        name: name.clone(),
        reason,
    };
    let field = |source| PolicyError::ServiceField {
        name: name.clone(),
        source,
    };

    if name.is_empty() {
        return Err(invalid("missing field name"));
    }
    if entry.ips.is_empty() {
        return Err(invalid("missing field ips"));
    }
    if entry.ports.is_empty() {
        return Err(invalid("missing field ports"));
    }
    if entry.access_type.is_empty() {
        return Err(invalid("missing field access types"));
    }

    let addresses = entry
        .ips
        .iter()
        .map(|ip| {
            ip.parse::<IpAddr>()
                .map_err(|_| field(ProtocolError::BadAddress(ip.clone())))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let ports = entry
        .ports
        .into_iter()
        .map(|combo| {
            let parts: Vec<String> = combo.into_iter().map(Scalar::into_string).collect();
            ProtoPort::from_wire(parts.as_slice()).map_err(field)
        })
        .collect::<Result<Vec<_>, _>>()?;

    let access_types = entry
        .access_type
        .iter()
        .map(|at| at.parse::<AccessType>().map_err(field))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Service {
        name: name.clone(),
        addresses,
        ports,
        tags: entry.tags,
        access_types,
    })
}

pub fn parse_clients(yaml: &str) -> Result<Vec<ClientDefinition>, PolicyError> {
    let file: ClientsFile = serde_yaml::from_str(yaml)?;
    if file.kind != CLIENTS_KIND {
        return Err(PolicyError::WrongKind {
            expected: CLIENTS_KIND,
            found: file.kind,
        });
    }

    file.clients
        .into_iter()
        .map(|entry| {
            // Device ids are the common names of client certificates
            if Uuid::parse_str(&entry.device_id).is_err() {
                return Err(PolicyError::InvalidDeviceId(entry.device_id));
            }

            Ok(ClientDefinition {
                device_id: entry.device_id,
                label: entry.label,
                services: entry.services.into_iter().map(|s| s.name).collect(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use shared::types::Protocol;
    use crate::policy::PolicyStore;

    const SERVICES: &str = r#"
version: v1
kind: services
services:
  - name: web
    ips: ["10.0.0.5"]
    ports:
      - [tcp, 443]
      - [TCP, "8080"]
      - [icmp]
    tags: [prod, http]
    accessType: [OpenSPA]
  - name: dns
    ips: ["10.0.0.53", "fd00::53"]
    ports:
      - [udp, 53]
    accessType: [OpenSPA]
"#;

    const CLIENTS: &str = r#"
version: v1
kind: clients
clients:
  - deviceId: 0c8e7a4e-3f0b-4a7e-9c55-8a7c5d2e1f00
    label: alice
    services:
      - name: web
      - name: dns
"#;

    #[test]
    fn test_parse_services() {
        let services = parse_services(SERVICES).unwrap();
        assert_eq!(services.len(), 2);

        let web = &services[0];
        assert_eq!(web.name, "web");
        assert_eq!(
            web.ports,
            vec![ProtoPort::tcp(443), ProtoPort::tcp(8080), ProtoPort::icmp()]
        );
        assert_eq!(web.tags, vec!["prod", "http"]);
        assert_eq!(web.access_types, vec![AccessType::OpenSpa]);

        let dns = &services[1];
        assert_eq!(dns.addresses.len(), 2);
        assert_eq!(dns.ports[0].protocol, Protocol::Udp);
    }

    #[test]
    fn test_parse_clients_keeps_label() {
        let clients = parse_clients(CLIENTS).unwrap();
        assert_eq!(
            clients,
            vec![ClientDefinition {
                device_id: "0c8e7a4e-3f0b-4a7e-9c55-8a7c5d2e1f00".to_string(),
                label: "alice".to_string(),
                services: vec!["web".to_string(), "dns".to_string()],
            }]
        );
    }

    #[test]
    fn test_wrong_kind_is_rejected() {
        let err = parse_services(CLIENTS).unwrap_err();
        assert!(matches!(err, PolicyError::WrongKind { expected: "services", .. }));

        let err = parse_clients(SERVICES).unwrap_err();
        assert!(matches!(err, PolicyError::WrongKind { expected: "clients", .. }));
    }

    #[test]
    fn test_bad_service_entries() {
        let icmp_with_port = r#"
kind: services
services:
  - name: ping
    ips: ["10.0.0.1"]
    ports: [[icmp, 7]]
    accessType: [OpenSPA]
"#;
        let err = parse_services(icmp_with_port).unwrap_err();
        assert!(matches!(
            err,
            PolicyError::ServiceField { source: ProtocolError::UnexpectedPort, .. }
        ));

        let unknown_access = r#"
kind: services
services:
  - name: web
    ips: ["10.0.0.1"]
    ports: [[tcp, 80]]
    accessType: [WireGuard]
"#;
        let err = parse_services(unknown_access).unwrap_err();
        assert!(matches!(
            err,
            PolicyError::ServiceField { source: ProtocolError::UnknownAccessType(_), .. }
        ));

        let no_ips = r#"
kind: services
services:
  - name: web
    ports: [[tcp, 80]]
    accessType: [OpenSPA]
"#;
        let err = parse_services(no_ips).unwrap_err();
        assert!(matches!(err, PolicyError::InvalidService { reason: "missing field ips", .. }));
    }

    #[test]
    fn test_invalid_device_id_is_rejected() {
        let clients = r#"
kind: clients
clients:
  - deviceId: not-a-uuid
    services: []
"#;
        let err = parse_clients(clients).unwrap_err();
        assert!(matches!(err, PolicyError::InvalidDeviceId(ref id) if id == "not-a-uuid"));
    }

    #[test]
    fn test_load_files_into_store() {
        let mut services_file = tempfile::NamedTempFile::new().unwrap();
        services_file.write_all(SERVICES.as_bytes()).unwrap();
        let mut clients_file = tempfile::NamedTempFile::new().unwrap();
        clients_file.write_all(CLIENTS.as_bytes()).unwrap();

        let services = load_services(services_file.path()).unwrap();
        let clients = load_clients(clients_file.path()).unwrap();
        let store = PolicyStore::build(services, clients).unwrap();

        let alice = store.lookup("0c8e7a4e-3f0b-4a7e-9c55-8a7c5d2e1f00").unwrap();
        assert_eq!(alice.services.len(), 2);
    }

    #[test]
    fn test_missing_file_reports_path() {
        let err = load_services("/nonexistent/services.yaml").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/services.yaml"));
    }
}
