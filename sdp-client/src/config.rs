use std::path::{Path, PathBuf};
use std::time::Duration;
use anyhow::{Context, Result};
use serde::Deserialize;
use shared::protocol::DEFAULT_SPA_PORT;

#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Controller address as `host:port`
    #[serde(default)]
    pub server: Option<String>,
    #[serde(default)]
    pub tls: TlsConfig,
    #[serde(default)]
    pub openspa: OpenSpaConfig,
    #[serde(default)]
    pub access: AccessConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TlsConfig {
    #[serde(default)]
    pub ca_cert: Option<PathBuf>,
    #[serde(default = "default_certificate")]
    pub certificate: PathBuf,
    #[serde(default = "default_key")]
    pub key: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenSpaConfig {
    #[serde(default = "default_openspa_path")]
    pub path: PathBuf,
    #[serde(default = "default_ospa")]
    pub ospa: PathBuf,
    #[serde(default = "default_spa_port")]
    pub server_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccessConfig {
    /// Delay between successive access task starts
    #[serde(default = "default_stagger_nanos")]
    pub stagger_nanos: u64,
}

fn default_certificate() -> PathBuf {
    PathBuf::from("client.crt")
}

fn default_key() -> PathBuf {
    PathBuf::from("client.key")
}

fn default_openspa_path() -> PathBuf {
    PathBuf::from("openspa")
}

fn default_ospa() -> PathBuf {
    PathBuf::from("client.ospa")
}

fn default_spa_port() -> u16 {
    DEFAULT_SPA_PORT
}

fn default_stagger_nanos() -> u64 {
    200
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: None,
            tls: TlsConfig::default(),
            openspa: OpenSpaConfig::default(),
            access: AccessConfig::default(),
        }
    }
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            ca_cert: None,
            certificate: default_certificate(),
            key: default_key(),
        }
    }
}

impl Default for OpenSpaConfig {
    fn default() -> Self {
        Self {
            path: default_openspa_path(),
            ospa: default_ospa(),
            server_port: default_spa_port(),
        }
    }
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            stagger_nanos: default_stagger_nanos(),
        }
    }
}

impl AccessConfig {
    pub fn stagger(&self) -> Duration {
        Duration::from_nanos(self.stagger_nanos)
    }
}

impl ClientConfig {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: ClientConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config: ClientConfig = toml::from_str(r#"server = "10.0.0.1:8443""#).unwrap();

        assert_eq!(config.server.as_deref(), Some("10.0.0.1:8443"));
        assert_eq!(config.tls.certificate, PathBuf::from("client.crt"));
        assert_eq!(config.tls.key, PathBuf::from("client.key"));
        assert!(config.tls.ca_cert.is_none());
        assert_eq!(config.openspa.path, PathBuf::from("openspa"));
        assert_eq!(config.openspa.ospa, PathBuf::from("client.ospa"));
        assert_eq!(config.openspa.server_port, 22211);
        assert_eq!(config.access.stagger(), Duration::from_nanos(200));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(
            br#"
server = "sdp.example.com:9443"

[tls]
ca_cert = "/etc/sdp/ca.crt"

[openspa]
path = "/usr/local/bin/openspa"
server_port = 30000

[access]
stagger_nanos = 5000000
"#,
        )
        .unwrap();

        let config = ClientConfig::load(file.path()).unwrap();
        assert_eq!(config.tls.ca_cert, Some(PathBuf::from("/etc/sdp/ca.crt")));
        assert_eq!(config.openspa.path, PathBuf::from("/usr/local/bin/openspa"));
        assert_eq!(config.openspa.ospa, PathBuf::from("client.ospa"));
        assert_eq!(config.openspa.server_port, 30000);
        assert_eq!(config.access.stagger(), Duration::from_millis(5));
    }
}
