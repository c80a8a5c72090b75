//! X.509v3 extension profiles, one per certificate role.
//!
//! The profiles are read-only tables; [`profile_for`] picks the one matching
//! a role and [`ExtensionProfile::apply`] appends it to a certificate under
//! construction together with the subject and authority key identifiers.

use anyhow::{anyhow, Result};
use openssl::asn1::{Asn1Object, Asn1OctetString};
use openssl::x509::extension::{
    AuthorityKeyIdentifier, BasicConstraints, ExtendedKeyUsage, KeyUsage, SubjectKeyIdentifier,
};
use openssl::x509::{X509Builder, X509Extension, X509Ref};

use crate::certifiable::CertificateRole;

pub const NS_CERT_TYPE_OID: &str = "2.16.840.1.113730.1.1";
pub const NS_COMMENT_OID: &str = "2.16.840.1.113730.1.13";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyUsageFlag {
    DigitalSignature,
    KeyEncipherment,
    KeyCertSign,
    CrlSign,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtendedUsage {
    ClientAuth,
    ServerAuth,
}

/// Netscape certificate type bits (`nsCertType`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NsCertType {
    Client,
    Server,
}

impl NsCertType {
    /// Bit mask inside the first octet of the BIT STRING.
    pub fn mask(&self) -> u8 {
        match self {
            NsCertType::Client => 0x80,
            NsCertType::Server => 0x40,
        }
    }

    fn to_der(self) -> [u8; 4] {
        match self {
            // BIT STRING, 7 unused bits, bit 0
            NsCertType::Client => [0x03, 0x02, 0x07, 0x80],
            // BIT STRING, 6 unused bits, bit 1
            NsCertType::Server => [0x03, 0x02, 0x06, 0x40],
        }
    }
}

#[derive(Debug)]
pub struct ExtensionProfile {
    pub role: CertificateRole,
    pub ca: bool,
    pub key_usage: &'static [KeyUsageFlag],
    pub extended_key_usage: Option<ExtendedUsage>,
    pub ns_cert_type: Option<NsCertType>,
    pub comment: &'static str,
}

static PROFILES: [ExtensionProfile; 3] = [
    ExtensionProfile {
        role: CertificateRole::Ca,
        ca: true,
        key_usage: &[KeyUsageFlag::CrlSign, KeyUsageFlag::KeyCertSign],
        extended_key_usage: None,
        ns_cert_type: None,
        comment: "CA - autogenerated Certificate",
    },
    ExtensionProfile {
        role: CertificateRole::Client,
        ca: false,
        key_usage: &[KeyUsageFlag::DigitalSignature, KeyUsageFlag::KeyEncipherment],
        extended_key_usage: Some(ExtendedUsage::ClientAuth),
        ns_cert_type: Some(NsCertType::Client),
        comment: "OpenVPN client - autogenerated Certificate",
    },
    ExtensionProfile {
        role: CertificateRole::Server,
        ca: false,
        key_usage: &[KeyUsageFlag::DigitalSignature, KeyUsageFlag::KeyEncipherment],
        extended_key_usage: Some(ExtendedUsage::ServerAuth),
        ns_cert_type: Some(NsCertType::Server),
        comment: "OpenVPN server - autogenerated Certificate",
    },
];

pub fn profile_for(role: CertificateRole) -> &'static ExtensionProfile {
    match role {
        CertificateRole::Ca => &PROFILES[0],
        CertificateRole::Client => &PROFILES[1],
        CertificateRole::Server => &PROFILES[2],
    }
}

impl ExtensionProfile {
    /// Append the profile to `builder`. Subject, issuer, serial and public key
    /// must already be set. `issuer` is `None` for self-signed certificates.
    pub(crate) fn apply(&self, builder: &mut X509Builder, issuer: Option<&X509Ref>) -> Result<()> {
        let mut bc = BasicConstraints::new();
        bc.critical();
        if self.ca {
            bc.ca();
        }
        let extension = bc
            .build()
            .map_err(|e| anyhow!("Failed to build BasicConstraints: {}", e))?;
        builder
            .append_extension(extension)
            .map_err(|e| anyhow!("Failed to add BasicConstraints: {}", e))?;

        if let Some(ns_cert_type) = self.ns_cert_type {
            let extension = raw_extension(NS_CERT_TYPE_OID, &ns_cert_type.to_der())?;
            builder
                .append_extension(extension)
                .map_err(|e| anyhow!("Failed to add nsCertType: {}", e))?;
        }

        let extension = raw_extension(NS_COMMENT_OID, &ia5_string_der(self.comment))?;
        builder
            .append_extension(extension)
            .map_err(|e| anyhow!("Failed to add nsComment: {}", e))?;

        if let Some(usage) = self.extended_key_usage {
            let mut eku = ExtendedKeyUsage::new();
            match usage {
                ExtendedUsage::ClientAuth => eku.client_auth(),
                ExtendedUsage::ServerAuth => eku.server_auth(),
            };
            let extension = eku
                .build()
                .map_err(|e| anyhow!("Failed to build ExtendedKeyUsage: {}", e))?;
            builder
                .append_extension(extension)
                .map_err(|e| anyhow!("Failed to add ExtendedKeyUsage: {}", e))?;
        }

        let mut ku = KeyUsage::new();
        for flag in self.key_usage {
            match flag {
                KeyUsageFlag::DigitalSignature => ku.digital_signature(),
                KeyUsageFlag::KeyEncipherment => ku.key_encipherment(),
                KeyUsageFlag::KeyCertSign => ku.key_cert_sign(),
                KeyUsageFlag::CrlSign => ku.crl_sign(),
            };
        }
        let extension = ku
            .build()
            .map_err(|e| anyhow!("Failed to build KeyUsage: {}", e))?;
        builder
            .append_extension(extension)
            .map_err(|e| anyhow!("Failed to add KeyUsage: {}", e))?;

        // The SKI has to be in place before the AKI of a self-signed
        // certificate can reference it.
        let ski = SubjectKeyIdentifier::new()
            .build(&builder.x509v3_context(issuer, None))
            .map_err(|e| anyhow!("Failed to build SubjectKeyIdentifier: {}", e))?;
        builder
            .append_extension(ski)
            .map_err(|e| anyhow!("Failed to add SubjectKeyIdentifier: {}", e))?;

        let aki = AuthorityKeyIdentifier::new()
            .keyid(true)
            .issuer(true)
            .build(&builder.x509v3_context(issuer, None))
            .map_err(|e| anyhow!("Failed to build AuthorityKeyIdentifier: {}", e))?;
        builder
            .append_extension(aki)
            .map_err(|e| anyhow!("Failed to add AuthorityKeyIdentifier: {}", e))?;

        Ok(())
    }
}

fn raw_extension(oid: &str, der: &[u8]) -> Result<X509Extension> {
    let object =
        Asn1Object::from_str(oid).map_err(|e| anyhow!("Invalid extension OID {}: {}", oid, e))?;
    let contents = Asn1OctetString::new_from_bytes(der)
        .map_err(|e| anyhow!("Failed to wrap extension value: {}", e))?;
    X509Extension::new_from_der(&object, false, &contents)
        .map_err(|e| anyhow!("Failed to create extension {}: {}", oid, e))
}

/// Short-form DER IA5String; comments are well below 128 bytes.
fn ia5_string_der(value: &str) -> Vec<u8> {
    let mut der = Vec::with_capacity(value.len() + 2);
    der.push(0x16);
    der.push(value.len() as u8);
    der.extend_from_slice(value.as_bytes());
    der
}
