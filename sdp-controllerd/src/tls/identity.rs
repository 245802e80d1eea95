use std::fmt;
use rustls::pki_types::CertificateDer;
use rustls::ServerConnection;
use sha2::{Digest, Sha256};
use x509_parser::prelude::{FromDer, X509Certificate};

/// Verified caller identity: the subject common name of the client
/// certificate presented during the mutual-TLS handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerIdentity(pub String);

impl PeerIdentity {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// First subject CN of a DER certificate
pub fn common_name(der: &[u8]) -> Option<String> {
    let (_, cert) = X509Certificate::from_der(der).ok()?;
    let cn = cert.subject().iter_common_name().next()?;
    cn.as_str().ok().map(str::to_string)
}

/// Hex SHA-256 of a DER certificate
pub fn fingerprint(der: &[u8]) -> String {
    hex::encode(Sha256::digest(der))
}

/// Leaf certificate of a completed handshake, if the peer sent one
pub fn peer_leaf(conn: &ServerConnection) -> Option<&CertificateDer<'static>> {
    conn.peer_certificates()?.first()
}

/// Identity of the peer on a completed handshake.
///
/// The certificate chain has already been verified by the client verifier,
/// so only the common name is read here. A certificate without a CN yields
/// `None` and the connection is dropped by the caller.
pub fn peer_identity(conn: &ServerConnection) -> Option<PeerIdentity> {
    let leaf = peer_leaf(conn)?;
    common_name(leaf.as_ref())
        .filter(|cn| !cn.is_empty())
        .map(PeerIdentity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};

    fn cert_der(common_name: Option<&str>) -> Vec<u8> {
        let key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
        params.distinguished_name = DistinguishedName::new();
        if let Some(cn) = common_name {
            params.distinguished_name.push(DnType::CommonName, cn);
        }
        params.self_signed(&key).unwrap().der().to_vec()
    }

    #[test]
    fn test_common_name_is_extracted() {
        let der = cert_der(Some("0c8e7a4e-3f0b-4a7e-9c55-8a7c5d2e1f00"));
        assert_eq!(
            common_name(&der).as_deref(),
            Some("0c8e7a4e-3f0b-4a7e-9c55-8a7c5d2e1f00")
        );
    }

    #[test]
    fn test_missing_common_name() {
        assert_eq!(common_name(&cert_der(None)), None);
        assert_eq!(common_name(b"not a certificate"), None);
    }

    #[test]
    fn test_fingerprint_is_hex_sha256() {
        let der = cert_der(Some("C1"));
        let fp = fingerprint(&der);
        assert_eq!(fp.len(), 64);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(fp, fingerprint(&der));
        assert_ne!(fp, fingerprint(&cert_der(Some("C1"))));
    }
}
