//! Certificate authority for the cluster control plane
//!
//! Each provisioning run mints a fresh CA and uses it to sign exactly two
//! leaves: the API server's serving certificate and the administrator's
//! client certificate. Every certificate gets its own RSA key; only the CA key
//! signs. Nothing is persisted here; the caller hands the PEM pairs on to the
//! template arguments and the artifact writer.
//!
//! # Trust Layout
//!
//! - `ca`: self-signed, may sign certificates
//! - `apiserver`: server-auth, SANs cover the public FQDN, the in-cluster
//!   service names and the control plane IPs
//! - `client`: client-auth only, no SANs

use std::fmt;
use std::net::IpAddr;

use rand::Rng;
use rcgen::{
    string::Ia5String, BasicConstraints, CertificateParams, DistinguishedName, DnType, DnValue,
    ExtendedKeyUsagePurpose, IsCa, Issuer, KeyUsagePurpose, SanType, SerialNumber,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::keys::{generate_rsa, KeySize};

/// Validity window of every issued certificate (two years)
pub const VALIDITY_DAYS: i64 = 2 * 365;

/// Subject common name of the certificate authority
pub const CA_COMMON_NAME: &str = "ca";

/// Subject common name of the API server certificate
pub const SERVER_COMMON_NAME: &str = "apiserver";

/// Subject common name of the administrator client certificate
pub const CLIENT_COMMON_NAME: &str = "client";

/// In-cluster service name of the API server
pub const API_SERVICE_NAME: &str = "kubernetes";

/// PKI errors
#[derive(Debug, Error)]
pub enum PkiError {
    /// Key generation failed
    #[error("key generation failed: {0}")]
    KeyGenerationFailed(String),

    /// Certificate generation failed
    #[error("certificate generation failed: {0}")]
    CertificateGenerationFailed(String),

    /// A subject alternative name can't be encoded
    #[error("invalid subject alternative name '{name}': {reason}")]
    InvalidSubjectAltName {
        /// The offending name
        name: String,
        /// Why it was rejected
        reason: String,
    },

    /// Certificate or key parsing error
    #[error("certificate parsing error: {0}")]
    ParseError(String),
}

/// Result type for PKI operations
pub type Result<T> = std::result::Result<T, PkiError>;

/// Parse PEM-encoded data and return the DER bytes
pub fn parse_pem(pem_data: &str) -> Result<Vec<u8>> {
    let pem_obj = ::pem::parse(pem_data.as_bytes())
        .map_err(|e| PkiError::ParseError(format!("failed to parse PEM: {}", e)))?;
    Ok(pem_obj.contents().to_vec())
}

/// A certificate and the private key it was issued for, both PEM encoded
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyCertPair {
    /// PEM encoded X.509 certificate
    pub certificate_pem: String,
    /// PEM encoded PKCS#8 private key
    pub private_key_pem: String,
}

impl fmt::Debug for KeyCertPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyCertPair")
            .field("certificate_pem", &self.certificate_pem)
            .finish_non_exhaustive()
    }
}

/// Logical role of a certificate in the chain
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CertRole {
    /// Self-signed root
    Ca,
    /// API server serving certificate
    Server,
    /// Administrator client certificate
    Client,
}

/// A DNS name or IP address a certificate is valid for
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum SubjectAltName {
    /// DNS name
    Dns(String),
    /// IP address
    Ip(IpAddr),
}

impl SubjectAltName {
    fn to_san_type(&self) -> Result<SanType> {
        match self {
            SubjectAltName::Ip(ip) => Ok(SanType::IpAddress(*ip)),
            SubjectAltName::Dns(name) => Ia5String::try_from(name.clone())
                .map(SanType::DnsName)
                .map_err(|e| PkiError::InvalidSubjectAltName {
                    name: name.clone(),
                    reason: e.to_string(),
                }),
        }
    }
}

/// Names the API server must present to external and in-cluster clients
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServerIdentity {
    /// Public FQDN of the master
    pub fqdn: String,
    /// Additional DNS names requested by the operator
    pub extra_fqdns: Vec<String>,
    /// Cluster DNS domain, e.g. `cluster.local`
    pub cluster_domain: String,
    /// Control plane IPs: master private IP, extra IPs and the service VIP
    pub ip_addresses: Vec<IpAddr>,
}

impl ServerIdentity {
    /// DNS names the `kubernetes` service resolves under inside the cluster
    pub fn in_cluster_names(cluster_domain: &str) -> Vec<String> {
        let mut names = Vec::with_capacity(7);
        names.push(API_SERVICE_NAME.to_string());
        for namespace in ["default", "kube-system"] {
            names.push(format!("{}.{}", API_SERVICE_NAME, namespace));
            names.push(format!("{}.{}.svc", API_SERVICE_NAME, namespace));
            names.push(format!(
                "{}.{}.svc.{}",
                API_SERVICE_NAME, namespace, cluster_domain
            ));
        }
        names
    }

    /// Full SAN list: extra FQDNs, in-cluster names, the public FQDN, then IPs.
    /// Duplicates are dropped, keeping the first occurrence.
    pub fn subject_alt_names(&self) -> Vec<SubjectAltName> {
        let dns = self
            .extra_fqdns
            .iter()
            .cloned()
            .chain(Self::in_cluster_names(&self.cluster_domain))
            .chain(std::iter::once(self.fqdn.clone()))
            .filter(|name| !name.is_empty())
            .map(SubjectAltName::Dns);
        let ips = self.ip_addresses.iter().copied().map(SubjectAltName::Ip);

        let mut sans: Vec<SubjectAltName> = Vec::new();
        for san in dns.chain(ips) {
            if !sans.contains(&san) {
                sans.push(san);
            }
        }
        sans
    }
}

/// Everything needed to issue one certificate
#[derive(Clone, Debug)]
pub struct CertificateProfile {
    /// Role in the chain
    pub role: CertRole,
    /// Subject common name
    pub common_name: String,
    /// Subject alternative names (server role only)
    pub subject_alt_names: Vec<SubjectAltName>,
    /// Validity window starting at issuance
    pub validity: ::time::Duration,
    /// RSA key size for the certificate's own key
    pub key_size: KeySize,
}

impl CertificateProfile {
    fn new(role: CertRole, common_name: &str, key_size: KeySize) -> Self {
        Self {
            role,
            common_name: common_name.to_string(),
            subject_alt_names: Vec::new(),
            validity: ::time::Duration::days(VALIDITY_DAYS),
            key_size,
        }
    }

    /// Profile of the self-signed root
    pub fn ca(key_size: KeySize) -> Self {
        Self::new(CertRole::Ca, CA_COMMON_NAME, key_size)
    }

    /// Profile of the API server certificate
    pub fn server(identity: &ServerIdentity, key_size: KeySize) -> Self {
        Self {
            subject_alt_names: identity.subject_alt_names(),
            ..Self::new(CertRole::Server, SERVER_COMMON_NAME, key_size)
        }
    }

    /// Profile of the administrator client certificate
    pub fn client(key_size: KeySize) -> Self {
        Self::new(CertRole::Client, CLIENT_COMMON_NAME, key_size)
    }

    fn to_params(&self) -> Result<CertificateParams> {
        let mut params = CertificateParams::default();

        let mut dn = DistinguishedName::new();
        dn.push(
            DnType::CommonName,
            DnValue::Utf8String(self.common_name.clone()),
        );
        params.distinguished_name = dn;

        params.serial_number = Some(random_serial());
        let now = ::time::OffsetDateTime::now_utc();
        params.not_before = now;
        params.not_after = now + self.validity;

        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];

        match self.role {
            CertRole::Ca => {
                params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
                params.key_usages.push(KeyUsagePurpose::KeyCertSign);
            }
            CertRole::Server => {
                params.is_ca = IsCa::ExplicitNoCa;
                params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
                params.subject_alt_names = self
                    .subject_alt_names
                    .iter()
                    .map(SubjectAltName::to_san_type)
                    .collect::<Result<Vec<_>>>()?;
            }
            CertRole::Client => {
                params.is_ca = IsCa::ExplicitNoCa;
                params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];
            }
        }

        Ok(params)
    }
}

/// Positive serial below 2^128
fn random_serial() -> SerialNumber {
    let mut bytes: [u8; 16] = rand::thread_rng().gen();
    bytes[0] &= 0x7f;
    SerialNumber::from_slice(&bytes)
}

/// The three certificates of one provisioning run
#[derive(Clone, Debug)]
pub struct CertificateChain {
    /// Self-signed root
    pub ca: KeyCertPair,
    /// API server certificate
    pub server: KeyCertPair,
    /// Administrator client certificate
    pub client: KeyCertPair,
}

/// Issues the CA and its two leaves
#[derive(Clone, Debug, Default)]
pub struct CertificateAuthorityEngine {
    key_size: KeySize,
}

impl CertificateAuthorityEngine {
    /// Create an engine generating keys of the given size
    pub fn new(key_size: KeySize) -> Self {
        Self { key_size }
    }

    /// Issue a fresh CA plus server and client leaves signed by it.
    ///
    /// Any failure aborts the whole chain.
    pub fn issue_chain(&self, server: &ServerIdentity) -> Result<CertificateChain> {
        debug!("pki: generating certificate authority");
        let ca = self.issue_self_signed(&CertificateProfile::ca(self.key_size))?;

        debug!(fqdn = %server.fqdn, "pki: generating apiserver server certificate");
        let server = self.issue_leaf(&CertificateProfile::server(server, self.key_size), &ca)?;

        debug!("pki: generating client certificate");
        let client = self.issue_leaf(&CertificateProfile::client(self.key_size), &ca)?;

        Ok(CertificateChain { ca, server, client })
    }

    /// Issue a self-signed certificate for `profile`
    pub fn issue_self_signed(&self, profile: &CertificateProfile) -> Result<KeyCertPair> {
        let key_pair = generate_rsa(profile.key_size)?;
        let cert = profile.to_params()?.self_signed(&key_pair).map_err(|e| {
            PkiError::CertificateGenerationFailed(format!(
                "failed to create {} cert: {}",
                profile.common_name, e
            ))
        })?;

        Ok(KeyCertPair {
            certificate_pem: cert.pem(),
            private_key_pem: key_pair.serialize_pem(),
        })
    }

    /// Issue a certificate for `profile` signed by `ca`
    pub fn issue_leaf(&self, profile: &CertificateProfile, ca: &KeyCertPair) -> Result<KeyCertPair> {
        let ca_key = rcgen::KeyPair::from_pem(&ca.private_key_pem)
            .map_err(|e| PkiError::ParseError(format!("failed to load CA key: {}", e)))?;
        let issuer = Issuer::from_ca_cert_pem(&ca.certificate_pem, &ca_key)
            .map_err(|e| PkiError::ParseError(format!("failed to create issuer: {}", e)))?;

        let leaf_key = generate_rsa(profile.key_size)?;
        let cert = profile
            .to_params()?
            .signed_by(&leaf_key, &issuer)
            .map_err(|e| {
                PkiError::CertificateGenerationFailed(format!(
                    "failed to sign {} cert: {}",
                    profile.common_name, e
                ))
            })?;

        Ok(KeyCertPair {
            certificate_pem: cert.pem(),
            private_key_pem: leaf_key.serialize_pem(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcgen::PublicKeyData;
    use std::net::Ipv4Addr;
    use x509_parser::extensions::GeneralName;
    use x509_parser::prelude::*;

    fn identity() -> ServerIdentity {
        ServerIdentity {
            fqdn: "kube-20260101-000000.westus.cloudapp.azure.com".to_string(),
            extra_fqdns: vec!["api.example.com".to_string()],
            cluster_domain: "cluster.local".to_string(),
            ip_addresses: vec![
                IpAddr::V4(Ipv4Addr::new(10, 0, 1, 4)),
                IpAddr::V4(Ipv4Addr::new(10, 3, 0, 1)),
            ],
        }
    }

    fn chain() -> CertificateChain {
        CertificateAuthorityEngine::new(KeySize::Rsa2048)
            .issue_chain(&identity())
            .unwrap()
    }

    fn dns_names(cert: &X509Certificate<'_>) -> Vec<String> {
        cert.subject_alternative_name()
            .unwrap()
            .map(|ext| {
                ext.value
                    .general_names
                    .iter()
                    .filter_map(|name| match name {
                        GeneralName::DNSName(dns) => Some(dns.to_string()),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn ip_addresses(cert: &X509Certificate<'_>) -> Vec<Vec<u8>> {
        cert.subject_alternative_name()
            .unwrap()
            .map(|ext| {
                ext.value
                    .general_names
                    .iter()
                    .filter_map(|name| match name {
                        GeneralName::IPAddress(ip) => Some(ip.to_vec()),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    // ==========================================================================
    // Story Tests: One Run, One CA, Two Leaves
    // ==========================================================================

    /// Story: the root of trust signs itself and is allowed to sign others
    #[test]
    fn story_ca_is_self_signed() {
        let chain = chain();
        let der = parse_pem(&chain.ca.certificate_pem).unwrap();
        let (_, ca) = X509Certificate::from_der(&der).unwrap();

        assert_eq!(ca.issuer(), ca.subject());
        assert!(ca.verify_signature(None).is_ok());
        assert!(ca.is_ca());

        let usage = ca.key_usage().unwrap().unwrap().value;
        assert!(usage.key_cert_sign());
        assert!(usage.digital_signature());
        assert!(usage.key_encipherment());
    }

    /// Story: both leaves chain to the CA and neither can act as one
    #[test]
    fn story_leaves_verify_against_ca() {
        let chain = chain();
        let ca_der = parse_pem(&chain.ca.certificate_pem).unwrap();
        let (_, ca) = X509Certificate::from_der(&ca_der).unwrap();

        for leaf in [&chain.server, &chain.client] {
            let der = parse_pem(&leaf.certificate_pem).unwrap();
            let (_, cert) = X509Certificate::from_der(&der).unwrap();
            assert!(cert.verify_signature(Some(ca.public_key())).is_ok());
            assert_eq!(cert.issuer(), ca.subject());
            assert!(!cert.is_ca());
        }

        // Each leaf has its own key
        assert_ne!(chain.server.private_key_pem, chain.ca.private_key_pem);
        assert_ne!(chain.client.private_key_pem, chain.ca.private_key_pem);
        assert_ne!(chain.server.private_key_pem, chain.client.private_key_pem);
    }

    /// Story: the API server answers to its public name and every in-cluster name
    #[test]
    fn story_server_sans_cover_cluster_names() {
        let chain = chain();
        let der = parse_pem(&chain.server.certificate_pem).unwrap();
        let (_, cert) = X509Certificate::from_der(&der).unwrap();

        let cn: Vec<_> = cert.subject().iter_common_name().collect();
        assert_eq!(cn[0].as_str().unwrap(), SERVER_COMMON_NAME);

        let names = dns_names(&cert);
        for expected in [
            "kube-20260101-000000.westus.cloudapp.azure.com",
            "api.example.com",
            "kubernetes",
            "kubernetes.default",
            "kubernetes.default.svc",
            "kubernetes.default.svc.cluster.local",
            "kubernetes.kube-system",
            "kubernetes.kube-system.svc",
            "kubernetes.kube-system.svc.cluster.local",
        ] {
            assert!(names.iter().any(|n| n == expected), "missing SAN {}", expected);
        }

        let ips = ip_addresses(&cert);
        assert!(ips.contains(&vec![10, 0, 1, 4]));
        assert!(ips.contains(&vec![10, 3, 0, 1]));

        let eku = cert.extended_key_usage().unwrap().unwrap().value;
        assert!(eku.server_auth);
        assert!(!eku.client_auth);
    }

    /// Story: the client certificate is identity only
    #[test]
    fn story_client_has_no_sans_and_client_auth_only() {
        let chain = chain();
        let der = parse_pem(&chain.client.certificate_pem).unwrap();
        let (_, cert) = X509Certificate::from_der(&der).unwrap();

        assert!(cert.subject_alternative_name().unwrap().is_none());
        let eku = cert.extended_key_usage().unwrap().unwrap().value;
        assert!(eku.client_auth);
        assert!(!eku.server_auth);

        let cn: Vec<_> = cert.subject().iter_common_name().collect();
        assert_eq!(cn[0].as_str().unwrap(), CLIENT_COMMON_NAME);
    }

    /// Story: keys written to disk reload to the same public key the certificate carries
    #[test]
    fn story_private_key_pem_round_trips() {
        let chain = chain();
        for pair in [&chain.ca, &chain.server, &chain.client] {
            let reloaded = rcgen::KeyPair::from_pem(&pair.private_key_pem).unwrap();
            let der = parse_pem(&pair.certificate_pem).unwrap();
            let (_, cert) = X509Certificate::from_der(&der).unwrap();
            assert_eq!(reloaded.subject_public_key_info(), cert.public_key().raw.to_vec());
        }
    }

    #[test]
    fn validity_is_two_years_from_issuance() {
        let chain = chain();
        let der = parse_pem(&chain.server.certificate_pem).unwrap();
        let (_, cert) = X509Certificate::from_der(&der).unwrap();

        let span = cert.validity().not_after.timestamp() - cert.validity().not_before.timestamp();
        assert_eq!(span, VALIDITY_DAYS * 24 * 60 * 60);
    }

    #[test]
    fn serial_is_positive_and_at_most_128_bits() {
        let chain = chain();
        let der = parse_pem(&chain.ca.certificate_pem).unwrap();
        let (_, cert) = X509Certificate::from_der(&der).unwrap();

        let serial = cert.raw_serial();
        assert!(serial.len() <= 17);
        assert_eq!(serial[0] & 0x80, 0);
    }

    #[test]
    fn subject_alt_names_are_deduplicated() {
        let mut id = identity();
        id.extra_fqdns.push("kubernetes".to_string());
        id.extra_fqdns.push(id.fqdn.clone());
        id.ip_addresses.push(IpAddr::V4(Ipv4Addr::new(10, 3, 0, 1)));

        let sans = id.subject_alt_names();
        let kubernetes = sans
            .iter()
            .filter(|san| **san == SubjectAltName::Dns("kubernetes".to_string()))
            .count();
        assert_eq!(kubernetes, 1);
        assert_eq!(sans.len(), 1 + 7 + 1 + 2);
    }

    #[test]
    fn invalid_dns_name_is_rejected() {
        let mut id = identity();
        id.extra_fqdns.push("bad\u{e9}name".to_string());
        let err = CertificateAuthorityEngine::new(KeySize::Rsa2048)
            .issue_chain(&id)
            .unwrap_err();
        assert!(matches!(err, PkiError::InvalidSubjectAltName { .. }));
    }

    #[test]
    fn default_engine_profiles_use_4096_bit_keys() {
        assert_eq!(CertificateProfile::ca(KeySize::default()).key_size, KeySize::Rsa4096);
        assert_eq!(
            CertificateAuthorityEngine::default().key_size,
            KeySize::Rsa4096
        );
    }

    #[test]
    fn parse_pem_rejects_garbage() {
        assert!(matches!(
            parse_pem("not a pem"),
            Err(PkiError::ParseError(_))
        ));
    }
}
