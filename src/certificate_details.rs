//! Read-only view of an issued certificate.

use std::time::SystemTime;

use anyhow::{anyhow, Context, Result};
use const_oid::{AssociatedOid, ObjectIdentifier};
use der::asn1::{BitString, Ia5String};
use der::Decode;
use openssl::x509::{X509Ref, X509};
use x509_cert::ext::pkix::{
    AuthorityKeyIdentifier, BasicConstraints, ExtendedKeyUsage, SubjectKeyIdentifier,
};
use x509_cert::Certificate;

use crate::crl::serial_value;
use crate::distinguished_name::x509_name_to_string;
use crate::extensions::{ExtendedUsage, NsCertType, NS_CERT_TYPE_OID, NS_COMMENT_OID};

const ID_KP_SERVER_AUTH: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.6.1.5.5.7.3.1");
const ID_KP_CLIENT_AUTH: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.6.1.5.5.7.3.2");

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateDetails {
    pub serial: u64,
    pub subject: String,
    pub issuer: String,
    pub not_before: SystemTime,
    pub not_after: SystemTime,
    pub is_ca: bool,
    pub extended_key_usage: Vec<ExtendedUsage>,
    pub ns_cert_type: Option<NsCertType>,
    pub comment: Option<String>,
    pub has_subject_key_id: bool,
    pub has_authority_key_id: bool,
}

impl CertificateDetails {
    pub fn from_pem(pem: &str) -> Result<Self> {
        let cert = X509::from_pem(pem.as_bytes()).context("Failed to parse certificate PEM")?;
        Self::from_x509(&cert)
    }

    pub fn from_x509(cert: &X509Ref) -> Result<Self> {
        let der = cert.to_der().context("Failed to encode certificate")?;
        let parsed = Certificate::from_der(&der)
            .map_err(|e| anyhow!("Failed to decode certificate: {}", e))?;
        let tbs = &parsed.tbs_certificate;

        let mut details = Self {
            serial: serial_value(&tbs.serial_number)?,
            subject: x509_name_to_string(cert.subject_name())?,
            issuer: x509_name_to_string(cert.issuer_name())?,
            not_before: tbs.validity.not_before.to_system_time(),
            not_after: tbs.validity.not_after.to_system_time(),
            is_ca: false,
            extended_key_usage: Vec::new(),
            ns_cert_type: None,
            comment: None,
            has_subject_key_id: false,
            has_authority_key_id: false,
        };

        let ns_cert_type_oid = ObjectIdentifier::new(NS_CERT_TYPE_OID)
            .map_err(|e| anyhow!("Invalid nsCertType OID: {}", e))?;
        let ns_comment_oid = ObjectIdentifier::new(NS_COMMENT_OID)
            .map_err(|e| anyhow!("Invalid nsComment OID: {}", e))?;

        for extension in tbs.extensions.iter().flatten() {
            let value = extension.extn_value.as_bytes();
            if extension.extn_id == BasicConstraints::OID {
                let bc = BasicConstraints::from_der(value)
                    .map_err(|e| anyhow!("Failed to decode BasicConstraints: {}", e))?;
                details.is_ca = bc.ca;
            } else if extension.extn_id == ExtendedKeyUsage::OID {
                let eku = ExtendedKeyUsage::from_der(value)
                    .map_err(|e| anyhow!("Failed to decode ExtendedKeyUsage: {}", e))?;
                details.extended_key_usage = eku
                    .0
                    .iter()
                    .filter_map(|oid| {
                        if *oid == ID_KP_CLIENT_AUTH {
                            Some(ExtendedUsage::ClientAuth)
                        } else if *oid == ID_KP_SERVER_AUTH {
                            Some(ExtendedUsage::ServerAuth)
                        } else {
                            None
                        }
                    })
                    .collect();
            } else if extension.extn_id == ns_cert_type_oid {
                let bits = BitString::from_der(value)
                    .map_err(|e| anyhow!("Failed to decode nsCertType: {}", e))?;
                let first = bits.raw_bytes().first().copied().unwrap_or(0);
                details.ns_cert_type = [NsCertType::Client, NsCertType::Server]
                    .into_iter()
                    .find(|t| first & t.mask() != 0);
            } else if extension.extn_id == ns_comment_oid {
                let comment = Ia5String::from_der(value)
                    .map_err(|e| anyhow!("Failed to decode nsComment: {}", e))?;
                details.comment = Some(comment.to_string());
            } else if extension.extn_id == SubjectKeyIdentifier::OID {
                details.has_subject_key_id = true;
            } else if extension.extn_id == AuthorityKeyIdentifier::OID {
                details.has_authority_key_id = true;
            }
        }

        Ok(details)
    }
}
