use std::path::{Path, PathBuf};
use serde::Deserialize;
use anyhow::{Context, Result};
use shared::protocol::DEFAULT_CONTROLLER_PORT;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub tls: TlsConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
}

/// Trust material. All three paths are required before the server may start.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TlsConfig {
    pub ca_cert: Option<PathBuf>,
    pub certificate: Option<PathBuf>,
    pub key: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PolicyConfig {
    #[serde(default = "default_services_path")]
    pub services: PathBuf,
    #[serde(default = "default_clients_path")]
    pub clients: PathBuf,
}

/// Resolved trust material paths
#[derive(Debug, Clone)]
pub struct TlsPaths {
    pub ca_cert: PathBuf,
    pub certificate: PathBuf,
    pub key: PathBuf,
}

fn default_listen() -> String {
    format!("0.0.0.0:{}", DEFAULT_CONTROLLER_PORT)
}

fn default_services_path() -> PathBuf {
    PathBuf::from("services.yaml")
}

fn default_clients_path() -> PathBuf {
    PathBuf::from("clients.yaml")
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            services: default_services_path(),
            clients: default_clients_path(),
        }
    }
}

impl TlsConfig {
    pub fn resolve(&self) -> Result<TlsPaths> {
        Ok(TlsPaths {
            ca_cert: self.ca_cert.clone().context("missing ca certificate")?,
            certificate: self.certificate.clone().context("missing server certificate")?,
            key: self.key.clone().context("missing server key")?,
        })
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }
}
