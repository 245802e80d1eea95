use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use crate::error::ProtocolError;

/// Transport protocol of a protected port.
/// Discriminants are the IANA protocol numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Protocol {
    Icmp = 1,
    Tcp = 6,
    Udp = 17,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Icmp => "icmp",
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        }
    }

    /// Whether entries of this protocol carry a port number
    pub fn has_ports(&self) -> bool {
        !matches!(self, Protocol::Icmp)
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "TCP" => Ok(Protocol::Tcp),
            "UDP" => Ok(Protocol::Udp),
            "ICMP" => Ok(Protocol::Icmp),
            _ => Err(ProtocolError::UnknownProtocol(s.to_string())),
        }
    }
}

/// A `(protocol, port)` pair. For ICMP the port is always zero.
///
/// On the wire a `ProtoPort` is a list of strings: `["icmp"]` or `["tcp", "443"]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProtoPort {
    pub protocol: Protocol,
    pub port: u16,
}

impl ProtoPort {
    pub fn new(protocol: Protocol, port: u16) -> Self {
        let port = if protocol.has_ports() { port } else { 0 };
        Self { protocol, port }
    }

    pub fn icmp() -> Self {
        Self::new(Protocol::Icmp, 0)
    }

    pub fn tcp(port: u16) -> Self {
        Self::new(Protocol::Tcp, port)
    }

    pub fn udp(port: u16) -> Self {
        Self::new(Protocol::Udp, port)
    }

    /// Encode into the `[proto]` / `[proto, port]` wire form
    pub fn to_wire(&self) -> Vec<String> {
        if self.protocol.has_ports() {
            vec![self.protocol.to_string(), self.port.to_string()]
        } else {
            vec![self.protocol.to_string()]
        }
    }

    /// Decode from the `[proto]` / `[proto, port]` wire form
    pub fn from_wire<S: AsRef<str>>(parts: &[S]) -> Result<Self, ProtocolError> {
        let (proto, port) = match parts {
            [proto] => (proto.as_ref(), None),
            [proto, port] => (proto.as_ref(), Some(port.as_ref())),
            other => return Err(ProtocolError::BadArity(other.len())),
        };

        let protocol: Protocol = proto.parse()?;

        match (protocol.has_ports(), port) {
            (false, None) => Ok(Self::icmp()),
            (false, Some(_)) => Err(ProtocolError::UnexpectedPort),
            (true, None) => Err(ProtocolError::MissingPort(protocol.to_string())),
            (true, Some(port)) => {
                let port: u16 = port
                    .trim()
                    .parse()
                    .map_err(|_| ProtocolError::BadPort(port.to_string()))?;
                if port == 0 {
                    return Err(ProtocolError::BadPort(port.to_string()));
                }
                Ok(Self::new(protocol, port))
            }
        }
    }
}

impl fmt::Display for ProtoPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.protocol.has_ports() {
            write!(f, "{}/{}", self.protocol, self.port)
        } else {
            write!(f, "{}", self.protocol)
        }
    }
}

impl Serialize for ProtoPort {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_wire().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ProtoPort {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let parts = Vec::<String>::deserialize(deserializer)?;
        ProtoPort::from_wire(parts.as_slice()).map_err(serde::de::Error::custom)
    }
}

/// Mechanism used to open a service's ports to a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccessType {
    #[serde(rename = "OpenSPA")]
    OpenSpa,
}

impl AccessType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessType::OpenSpa => "OpenSPA",
        }
    }
}

impl fmt::Display for AccessType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccessType {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OpenSPA" => Ok(AccessType::OpenSpa),
            _ => Err(ProtocolError::UnknownAccessType(s.to_string())),
        }
    }
}

/// A protected network endpoint.
/// This is the canonical data model used by the controller, the wire protocol and the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Service {
    /// Unique, human-readable key
    pub name: String,

    /// Addresses the service is reachable on
    pub addresses: Vec<IpAddr>,

    /// Protected ports, in configuration order
    pub ports: Vec<ProtoPort>,

    /// Informational labels
    pub tags: Vec<String>,

    /// Supported access mechanisms
    pub access_types: Vec<AccessType>,
}

impl Service {
    /// Primary address, used as the SPA target
    pub fn primary_address(&self) -> Option<IpAddr> {
        self.addresses.first().copied()
    }

    pub fn ports_display(&self) -> Vec<String> {
        self.ports.iter().map(ToString::to_string).collect()
    }

    pub fn access_types_display(&self) -> Vec<String> {
        self.access_types.iter().map(ToString::to_string).collect()
    }
}
