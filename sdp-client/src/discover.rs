use std::path::Path;
use std::time::Duration;
use async_trait::async_trait;
use reqwest::StatusCode;
use shared::protocol::{DiscoverResponse, HelloResponse, DISCOVER_PATH, HELLO_PATH, NOT_AUTHORIZED_MSG};
use shared::types::Service;
use crate::error::{Error, Result};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Services the controller disclosed to this client
#[derive(Debug, Clone, PartialEq)]
pub struct Discovery {
    pub device_id: String,
    pub services: Vec<Service>,
}

#[async_trait]
pub trait DiscoveryTransport: Send + Sync {
    async fn discover(&self) -> Result<Discovery>;
}

/// Discovery over mutual-TLS HTTPS.
pub struct HttpsDiscovery {
    client: reqwest::Client,
    base_url: String,
}

impl HttpsDiscovery {
    /// `identity_pem` holds the client certificate followed by its private key.
    pub fn new(server: &str, ca_pem: &[u8], identity_pem: &[u8]) -> Result<Self> {
        let ca = reqwest::Certificate::from_pem(ca_pem)
            .map_err(|e| Error::Identity(format!("invalid CA certificate: {}", e)))?;
        let identity = reqwest::Identity::from_pem(identity_pem)
            .map_err(|e| Error::Identity(format!("invalid client certificate or key: {}", e)))?;

        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .tls_built_in_root_certs(false)
            .add_root_certificate(ca)
            .identity(identity)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            base_url: format!("https://{}", server.trim_end_matches('/')),
        })
    }

    pub fn from_files(server: &str, ca_cert: &Path, certificate: &Path, key: &Path) -> Result<Self> {
        let read = |path: &Path| {
            std::fs::read(path)
                .map_err(|e| Error::Identity(format!("failed to read {}: {}", path.display(), e)))
        };

        let ca_pem = read(ca_cert)?;
        let mut identity_pem = read(certificate)?;
        identity_pem.push(b'\n');
        identity_pem.extend(read(key)?);

        Self::new(server, &ca_pem, &identity_pem)
    }

    /// Reachability check against the root endpoint
    pub async fn hello(&self) -> Result<HelloResponse> {
        let response = self
            .client
            .get(format!("{}{}", self.base_url, HELLO_PATH))
            .send()
            .await?
            .error_for_status()?;
        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| Error::Decode(e.to_string()))
    }
}

#[async_trait]
impl DiscoveryTransport for HttpsDiscovery {
    async fn discover(&self) -> Result<Discovery> {
        let url = format!("{}{}", self.base_url, DISCOVER_PATH);
        tracing::debug!(%url, "Issuing discovery request");

        let response = self.client.get(&url).send().await?;
        let status = response.status();
        let body = response.bytes().await?;
        decode_response(status, &body)
    }
}

/// Interpret a discovery reply. A partially malformed service list fails
/// the whole discovery.
pub fn decode_response(status: StatusCode, body: &[u8]) -> Result<Discovery> {
    if status == StatusCode::UNAUTHORIZED {
        let message = serde_json::from_slice::<DiscoverResponse>(body)
            .ok()
            .and_then(|r| r.error)
            .unwrap_or_else(|| NOT_AUTHORIZED_MSG.to_string());
        return Err(Error::Unauthorized(message));
    }
    if !status.is_success() {
        return Err(Error::Decode(format!("unexpected status {}", status)));
    }

    let response: DiscoverResponse =
        serde_json::from_slice(body).map_err(|e| Error::Decode(e.to_string()))?;
    if !response.success {
        return Err(Error::Unauthorized(
            response.error.unwrap_or_else(|| NOT_AUTHORIZED_MSG.to_string()),
        ));
    }

    let device_id = response.device_id.clone();
    let services = response.into_services()?;
    tracing::debug!(%device_id, services = services.len(), "Discovery completed");

    Ok(Discovery { device_id, services })
}
