use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::error::ProtocolError;
use crate::types::{AccessType, ProtoPort, Service};

/// Discovery endpoint path
pub const DISCOVER_PATH: &str = "/discover";

/// Liveness/identity echo endpoint path
pub const HELLO_PATH: &str = "/";

/// Default controller listen port
pub const DEFAULT_CONTROLLER_PORT: u16 = 8443;

/// Default port of the remote SPA server
pub const DEFAULT_SPA_PORT: u16 = 22211;

/// Error message returned to callers whose identity has no policy
pub const NOT_AUTHORIZED_MSG: &str = "not authorized for any services";

/// Wire projection of a [`Service`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoverResponseService {
    pub name: String,

    #[serde(default)]
    pub ips: Vec<String>,

    pub ports: Vec<Vec<String>>,

    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(rename = "accessType", default)]
    pub access_type: Vec<String>,
}

impl From<&Service> for DiscoverResponseService {
    fn from(service: &Service) -> Self {
        Self {
            name: service.name.clone(),
            ips: service.addresses.iter().map(ToString::to_string).collect(),
            ports: service.ports.iter().map(ProtoPort::to_wire).collect(),
            tags: service.tags.clone(),
            access_type: service
                .access_types
                .iter()
                .map(|at| at.as_str().to_string())
                .collect(),
        }
    }
}

impl TryFrom<DiscoverResponseService> for Service {
    type Error = ProtocolError;

    fn try_from(drs: DiscoverResponseService) -> Result<Self, Self::Error> {
        let addresses = drs
            .ips
            .iter()
            .map(|ip| ip.parse().map_err(|_| ProtocolError::BadAddress(ip.clone())))
            .collect::<Result<Vec<_>, _>>()?;

        let ports = drs
            .ports
            .iter()
            .map(|combo| ProtoPort::from_wire(combo.as_slice()))
            .collect::<Result<Vec<_>, _>>()?;

        let access_types = drs
            .access_type
            .iter()
            .map(|at| at.parse::<AccessType>())
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Service {
            name: drs.name,
            addresses,
            ports,
            tags: drs.tags,
            access_types,
        })
    }
}

/// Body of `GET /discover`.
///
/// A denied caller gets `success: false`, an `error` message and an empty service list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoverResponse {
    pub success: bool,

    #[serde(rename = "deviceId", default, skip_serializing_if = "String::is_empty")]
    pub device_id: String,

    #[serde(default)]
    pub services: Vec<DiscoverResponseService>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DiscoverResponse {
    pub fn authorized<'a>(
        device_id: impl Into<String>,
        services: impl IntoIterator<Item = &'a Service>,
    ) -> Self {
        Self {
            success: true,
            device_id: device_id.into(),
            services: services.into_iter().map(DiscoverResponseService::from).collect(),
            error: None,
        }
    }

    pub fn denied() -> Self {
        Self {
            success: false,
            device_id: String::new(),
            services: Vec::new(),
            error: Some(NOT_AUTHORIZED_MSG.to_string()),
        }
    }

    /// Decode every advertised service. Any malformed entry fails the whole response.
    pub fn into_services(self) -> Result<Vec<Service>, ProtocolError> {
        self.services.into_iter().map(Service::try_from).collect()
    }
}

/// Body of `GET /`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloResponse {
    pub success: bool,
    pub msg: String,
    #[serde(rename = "deviceId")]
    pub device_id: String,
    pub datetime: DateTime<Utc>,
    pub version: String,
}
