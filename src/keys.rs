//! RSA key generation and the SSH identity
//!
//! The cluster PKI and the operator's SSH login both start from an RSA key
//! pair. Private keys are serialized as PKCS#8 PEM; the SSH public half is
//! additionally encoded as an `authorized_keys` line.

use std::fmt;

use rcgen::{KeyPair, PublicKeyData, RsaKeySize};
use ssh_key::public::{KeyData, RsaPublicKey};
use ssh_key::Mpint;
use tracing::debug;
use x509_parser::prelude::FromDer;
use x509_parser::public_key::PublicKey;
use x509_parser::x509::SubjectPublicKeyInfo;

use crate::pki::PkiError;

/// RSA modulus size for generated keys
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum KeySize {
    /// 2048-bit modulus
    Rsa2048,
    /// 4096-bit modulus
    #[default]
    Rsa4096,
}

impl KeySize {
    /// Modulus size in bits
    pub fn bits(&self) -> usize {
        match self {
            KeySize::Rsa2048 => 2048,
            KeySize::Rsa4096 => 4096,
        }
    }

    fn rcgen(&self) -> RsaKeySize {
        match self {
            KeySize::Rsa2048 => RsaKeySize::_2048,
            KeySize::Rsa4096 => RsaKeySize::_4096,
        }
    }
}

/// Generate an RSA key pair usable for SHA-256 signatures
pub fn generate_rsa(size: KeySize) -> Result<KeyPair, PkiError> {
    KeyPair::generate_rsa_for(&rcgen::PKCS_RSA_SHA256, size.rcgen()).map_err(|e| {
        PkiError::KeyGenerationFailed(format!("failed to generate {}-bit RSA key: {}", size.bits(), e))
    })
}

/// The login identity installed on every cluster machine
#[derive(Clone)]
pub struct SshIdentity {
    /// PKCS#8 PEM private key, written next to the other artifacts
    pub private_key_pem: String,
    /// `ssh-rsa <base64>` line, newline terminated
    pub authorized_key: String,
}

impl fmt::Debug for SshIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SshIdentity")
            .field("authorized_key", &self.authorized_key)
            .finish_non_exhaustive()
    }
}

/// Generate a fresh RSA key pair and its `authorized_keys` line
pub fn issue_ssh_identity(size: KeySize) -> Result<SshIdentity, PkiError> {
    let key_pair = generate_rsa(size)?;
    let authorized_key = authorized_key_line(&key_pair)?;
    debug!(bits = size.bits(), "generated ssh identity");

    Ok(SshIdentity {
        private_key_pem: key_pair.serialize_pem(),
        authorized_key,
    })
}

/// Encode the public half of an RSA key pair as an `authorized_keys` line.
pub fn authorized_key_line(key_pair: &KeyPair) -> Result<String, PkiError> {
    let spki_der = key_pair.subject_public_key_info();
    let (_, spki) = SubjectPublicKeyInfo::from_der(&spki_der)
        .map_err(|e| PkiError::ParseError(format!("failed to parse public key: {}", e)))?;

    let rsa = match spki.parsed() {
        Ok(PublicKey::RSA(rsa)) => rsa,
        Ok(_) => {
            return Err(PkiError::ParseError(
                "ssh identity requires an RSA public key".to_string(),
            ))
        }
        Err(e) => {
            return Err(PkiError::ParseError(format!(
                "failed to decode public key: {}",
                e
            )))
        }
    };

    let key_data = KeyData::Rsa(RsaPublicKey {
        e: ssh_mpint(rsa.exponent)?,
        n: ssh_mpint(rsa.modulus)?,
    });
    let line = ssh_key::PublicKey::new(key_data, "")
        .to_openssh()
        .map_err(|e| PkiError::ParseError(format!("failed to encode ssh public key: {}", e)))?;

    Ok(format!("{}\n", line))
}

fn ssh_mpint(value: &[u8]) -> Result<Mpint, PkiError> {
    Mpint::from_positive_bytes(value)
        .map_err(|e| PkiError::ParseError(format!("invalid RSA key component: {}", e)))
}
