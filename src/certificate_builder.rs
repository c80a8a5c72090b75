//! X.509v3 certificate construction shared by every engine.
//!
//! The CA bootstrap, issuance, renewal and reissuance all build certificates
//! the same way; they differ only in where the subject, serial and public key
//! come from and in who signs.
//!
//! # Example
//! ```rust,no_run
//! use wisp_pki::certifiable::CertificateRole;
//! use wisp_pki::certificate_builder::{CertificateBuilder, Signer};
//! use wisp_pki::distinguished_name::DistinguishedName;
//! use wisp_pki::keys::generate_rsa_key;
//! # fn example() -> anyhow::Result<()> {
//! let ca_key = generate_rsa_key(2048)?;
//! let ca_dn = DistinguishedName::parse("/C=US/ST=CA/L=SF/O=OpenWISP/CN=Root")?;
//! let root = CertificateBuilder::new(CertificateRole::Ca)
//!     .subject(ca_dn)
//!     .serial(1)
//!     .validity_days(7305)
//!     .sign(&ca_key, Signer::SelfSigned(&ca_key))?;
//! # Ok(())
//! # }
//! ```

use anyhow::{anyhow, Result};
use openssl::asn1::{Asn1Integer, Asn1Time};
use openssl::bn::BigNum;
use openssl::hash::MessageDigest;
use openssl::pkey::{HasPublic, PKeyRef, Private};
use openssl::x509::{X509Ref, X509};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::certifiable::CertificateRole;
use crate::configs::SignatureDigest;
use crate::distinguished_name::DistinguishedName;
use crate::extensions::profile_for;

const X509_VERSION_3: i32 = 2; // X509 version 3 is represented by 2
const SECONDS_PER_DAY: i64 = 86_400;

/// Who signs the certificate being built.
pub enum Signer<'a> {
    /// The key certifies itself; issuer = subject.
    SelfSigned(&'a PKeyRef<Private>),
    /// A CA certificate and its key.
    Authority {
        certificate: &'a X509Ref,
        key: &'a PKeyRef<Private>,
    },
}

impl SignatureDigest {
    pub fn message_digest(&self) -> MessageDigest {
        match self {
            SignatureDigest::Sha1 => MessageDigest::sha1(),
            SignatureDigest::Sha256 => MessageDigest::sha256(),
            SignatureDigest::Sha512 => MessageDigest::sha512(),
        }
    }
}

pub(crate) fn unix_now() -> Result<i64> {
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| anyhow!("System clock is before the Unix epoch: {}", e))?;
    Ok(elapsed.as_secs() as i64)
}

pub(crate) fn serial_to_asn1(serial: u64) -> Result<Asn1Integer> {
    let bn = BigNum::from_slice(&serial.to_be_bytes())
        .map_err(|e| anyhow!("Failed to convert serial {}: {}", serial, e))?;
    bn.to_asn1_integer()
        .map_err(|e| anyhow!("Failed to encode serial {}: {}", serial, e))
}

pub(crate) fn certificate_to_pem(cert: &X509Ref) -> Result<String> {
    let pem = cert
        .to_pem()
        .map_err(|e| anyhow!("Failed to encode certificate PEM: {}", e))?;
    String::from_utf8(pem).map_err(|e| anyhow!("Certificate PEM is not valid UTF-8: {}", e))
}

/// Read a certificate serial back as `u64`.
pub fn certificate_serial(cert: &X509Ref) -> Result<u64> {
    let bytes = cert
        .serial_number()
        .to_bn()
        .map_err(|e| anyhow!("Failed to read serial number: {}", e))?
        .to_vec();
    if bytes.len() > 8 {
        return Err(anyhow!("Serial number does not fit in 64 bits"));
    }
    Ok(bytes.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
}

/// Builder for a role-specific X.509v3 certificate
pub struct CertificateBuilder {
    role: CertificateRole,
    subject: Option<DistinguishedName>,
    serial: u64,
    validity_days: u32,
    digest: SignatureDigest,
}

impl CertificateBuilder {
    pub fn new(role: CertificateRole) -> Self {
        Self {
            role,
            subject: None,
            serial: 0,
            validity_days: 365,
            digest: SignatureDigest::default(),
        }
    }

    pub fn subject(mut self, subject: DistinguishedName) -> Self {
        self.subject = Some(subject);
        self
    }

    pub fn serial(mut self, serial: u64) -> Self {
        self.serial = serial;
        self
    }

    /// Validity window starts now and lasts `days`.
    pub fn validity_days(mut self, days: u32) -> Self {
        self.validity_days = days;
        self
    }

    pub fn digest(mut self, digest: SignatureDigest) -> Self {
        self.digest = digest;
        self
    }

    /// Build the certificate for `public_key` and sign it.
    ///
    /// # Errors
    /// Returns error if:
    /// - No subject was set or the serial is zero
    /// - Any name, validity or extension field is rejected by OpenSSL
    /// - Signing fails
    pub fn sign<T: HasPublic>(self, public_key: &PKeyRef<T>, signer: Signer<'_>) -> Result<X509> {
        let subject = self
            .subject
            .as_ref()
            .ok_or_else(|| anyhow!("Certificate subject is required"))?;
        if self.serial == 0 {
            return Err(anyhow!("Certificate serial must be positive"));
        }

        let mut builder =
            X509::builder().map_err(|e| anyhow!("Failed to create X509 builder: {}", e))?;

        builder
            .set_version(X509_VERSION_3)
            .map_err(|e| anyhow!("Failed to set version: {}", e))?;

        let asn1_serial = serial_to_asn1(self.serial)?;
        builder
            .set_serial_number(&asn1_serial)
            .map_err(|e| anyhow!("Failed to set serial number: {}", e))?;

        let subject_name = subject.to_x509_name()?;
        builder
            .set_subject_name(&subject_name)
            .map_err(|e| anyhow!("Failed to set subject: {}", e))?;

        let (issuer_cert, signing_key) = match &signer {
            Signer::SelfSigned(key) => {
                builder
                    .set_issuer_name(&subject_name)
                    .map_err(|e| anyhow!("Failed to set issuer: {}", e))?;
                (None, *key)
            }
            Signer::Authority { certificate, key } => {
                builder
                    .set_issuer_name(certificate.subject_name())
                    .map_err(|e| anyhow!("Failed to set issuer from CA: {}", e))?;
                (Some(*certificate), *key)
            }
        };

        let now = unix_now()?;
        let not_before = Asn1Time::from_unix(now as _)
            .map_err(|e| anyhow!("Failed to create not_before: {}", e))?;
        builder
            .set_not_before(&not_before)
            .map_err(|e| anyhow!("Failed to set not_before: {}", e))?;

        let not_after = Asn1Time::from_unix((now + i64::from(self.validity_days) * SECONDS_PER_DAY) as _)
            .map_err(|e| anyhow!("Failed to create not_after: {}", e))?;
        builder
            .set_not_after(&not_after)
            .map_err(|e| anyhow!("Failed to set not_after: {}", e))?;

        builder
            .set_pubkey(public_key)
            .map_err(|e| anyhow!("Failed to set public key: {}", e))?;

        profile_for(self.role).apply(&mut builder, issuer_cert)?;

        builder
            .sign(signing_key, self.digest.message_digest())
            .map_err(|e| anyhow!("Failed to sign certificate: {}", e))?;

        Ok(builder.build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distinguished_name::x509_name_to_string;
    use crate::keys::{generate_rsa_key, public_key_der};

    fn ca_dn() -> DistinguishedName {
        DistinguishedName::parse("/C=US/ST=CA/L=SF/O=OpenWISP/CN=Root").unwrap()
    }

    #[test]
    fn test_self_signed_root() {
        let key = generate_rsa_key(2048).unwrap();
        let cert = CertificateBuilder::new(CertificateRole::Ca)
            .subject(ca_dn())
            .serial(1)
            .validity_days(7305)
            .sign(&key, Signer::SelfSigned(&key))
            .unwrap();

        assert_eq!(cert.version(), X509_VERSION_3);
        assert_eq!(certificate_serial(&cert).unwrap(), 1);
        assert_eq!(
            x509_name_to_string(cert.subject_name()).unwrap(),
            "/C=US/ST=CA/L=SF/O=OpenWISP/CN=Root"
        );
        assert_eq!(
            x509_name_to_string(cert.issuer_name()).unwrap(),
            "/C=US/ST=CA/L=SF/O=OpenWISP/CN=Root"
        );
        assert!(cert.verify(&key).unwrap());
        assert!(cert.subject_key_id().is_some());
        assert!(cert.authority_key_id().is_some());
    }

    #[test]
    fn test_signed_by_authority() {
        let ca_key = generate_rsa_key(2048).unwrap();
        let root = CertificateBuilder::new(CertificateRole::Ca)
            .subject(ca_dn())
            .serial(1)
            .validity_days(7305)
            .sign(&ca_key, Signer::SelfSigned(&ca_key))
            .unwrap();

        let leaf_key = generate_rsa_key(1024).unwrap();
        let leaf = CertificateBuilder::new(CertificateRole::Client)
            .subject(ca_dn().with_common_name("dev42"))
            .serial(2)
            .validity_days(1096)
            .sign(
                &leaf_key,
                Signer::Authority {
                    certificate: &root,
                    key: &ca_key,
                },
            )
            .unwrap();

        assert_eq!(certificate_serial(&leaf).unwrap(), 2);
        assert_eq!(
            x509_name_to_string(leaf.issuer_name()).unwrap(),
            "/C=US/ST=CA/L=SF/O=OpenWISP/CN=Root"
        );
        assert!(leaf.verify(&ca_key).unwrap());
        assert!(!leaf.verify(&leaf_key).unwrap());
        assert_eq!(
            public_key_der(&leaf.public_key().unwrap()).unwrap(),
            public_key_der(&leaf_key).unwrap()
        );
        assert_eq!(
            leaf.authority_key_id().unwrap().as_slice(),
            root.subject_key_id().unwrap().as_slice()
        );
    }

    #[test]
    fn test_missing_subject_or_serial_rejected() {
        let key = generate_rsa_key(1024).unwrap();
        assert!(CertificateBuilder::new(CertificateRole::Ca)
            .serial(1)
            .sign(&key, Signer::SelfSigned(&key))
            .is_err());
        assert!(CertificateBuilder::new(CertificateRole::Ca)
            .subject(ca_dn())
            .sign(&key, Signer::SelfSigned(&key))
            .is_err());
    }

    #[test]
    fn test_large_serial_round_trips() {
        let asn1 = serial_to_asn1(u64::MAX).unwrap();
        let bytes = asn1.to_bn().unwrap().to_vec();
        assert_eq!(bytes, u64::MAX.to_be_bytes().to_vec());
    }
}
