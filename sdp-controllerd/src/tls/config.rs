use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use anyhow::{bail, Context, Result};
use rustls::crypto::{ring, CryptoProvider};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig, SupportedCipherSuite};
use crate::config::TlsPaths;

/// AEAD suites only; TLS 1.2 is limited to ECDHE key exchange.
fn cipher_suites() -> Vec<SupportedCipherSuite> {
    vec![
        ring::cipher_suite::TLS13_AES_256_GCM_SHA384,
        ring::cipher_suite::TLS13_AES_128_GCM_SHA256,
        ring::cipher_suite::TLS13_CHACHA20_POLY1305_SHA256,
        ring::cipher_suite::TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384,
        ring::cipher_suite::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
        ring::cipher_suite::TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384,
        ring::cipher_suite::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
    ]
}

pub fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open certificate file: {}", path.display()))?;

    let certs = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("Failed to parse certificates: {}", path.display()))?;

    if certs.is_empty() {
        bail!("No certificates found in {}", path.display());
    }
    Ok(certs)
}

pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open key file: {}", path.display()))?;

    rustls_pemfile::private_key(&mut BufReader::new(file))
        .with_context(|| format!("Failed to parse private key: {}", path.display()))?
        .with_context(|| format!("No private key found in {}", path.display()))
}

/// Build the mutual-TLS server configuration.
///
/// Client certificates are mandatory and must chain to the configured CA.
/// Only HTTP/1.1 is offered over ALPN.
pub fn server_config(paths: &TlsPaths) -> Result<Arc<ServerConfig>> {
    let provider = Arc::new(CryptoProvider {
        cipher_suites: cipher_suites(),
        ..ring::default_provider()
    });

    let mut roots = RootCertStore::empty();
    for cert in load_certs(&paths.ca_cert)? {
        roots
            .add(cert)
            .with_context(|| format!("Failed to add CA certificate: {}", paths.ca_cert.display()))?;
    }

    let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider.clone())
        .build()
        .context("Failed to build client certificate verifier")?;

    let cert_chain = load_certs(&paths.certificate)?;
    let key = load_private_key(&paths.key)?;

    let mut config = ServerConfig::builder_with_provider(provider)
        .with_protocol_versions(&[&rustls::version::TLS13, &rustls::version::TLS12])
        .context("Failed to select TLS protocol versions")?
        .with_client_cert_verifier(verifier)
        .with_single_cert(cert_chain, key)
        .context("Failed to load server certificate and key")?;

    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(Arc::new(config))
}


#[cfg(test)]
mod tests {
    use super::testing::{pem_file, TestPki};
    use super::*;

    #[test]
    fn test_server_config_from_generated_pki() {
        let pki = TestPki::new();
        let config = server_config(&pki.paths).unwrap();
        assert_eq!(config.alpn_protocols, vec![b"http/1.1".to_vec()]);
    }

    #[test]
    fn test_missing_ca_is_fatal() {
        let pki = TestPki::new();
        let mut paths = pki.paths.clone();
        paths.ca_cert = "/nonexistent/ca.crt".into();

        let err = server_config(&paths).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/ca.crt"));
    }

    #[test]
    fn test_garbage_key_is_fatal() {
        let pki = TestPki::new();
        let garbage = pem_file("not a key\n");
        let mut paths = pki.paths.clone();
        paths.key = garbage.path().to_path_buf();

        assert!(server_config(&paths).is_err());
    }
}
