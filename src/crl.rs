//! Certificate revocation lists.
//!
//! The CRL structure is assembled with `x509-cert`, its TBS part is signed
//! with the CA key through OpenSSL and the result is stored as PEM. Entries
//! are not persisted anywhere else; they are read back from the CRL itself.

use std::fmt;
use std::time::{Duration, SystemTime};

use anyhow::{anyhow, bail, Context, Result};
use const_oid::{AssociatedOid, ObjectIdentifier};
use der::asn1::{BitString, GeneralizedTime, OctetString, UtcTime};
use der::{Any, Decode, Encode, Tag};
use openssl::pkey::{HasPublic, PKeyRef, Private};
use openssl::sign::Signer;
use openssl::x509::{X509Crl, X509Ref};
use x509_cert::crl::{CertificateList, RevokedCert, TbsCertList};
use x509_cert::ext::pkix::crl::CrlReason;
use x509_cert::ext::Extension;
use x509_cert::name::Name;
use x509_cert::serial_number::SerialNumber;
use x509_cert::spki::AlgorithmIdentifierOwned;
use x509_cert::time::Time;
use x509_cert::Version;

use crate::configs::{CrlWindow, SignatureDigest};
use crate::distinguished_name::x509_name_to_string;

const SHA1_WITH_RSA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.5");
const SHA256_WITH_RSA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.11");
const SHA512_WITH_RSA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.13");

/// CRLReason codes (RFC 5280, section 5.3.1). Code 7 is unassigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum RevocationReason {
    Unspecified = 0,
    #[default]
    KeyCompromise = 1,
    CaCompromise = 2,
    AffiliationChanged = 3,
    Superseded = 4,
    CessationOfOperation = 5,
    CertificateHold = 6,
    RemoveFromCrl = 8,
    PrivilegeWithdrawn = 9,
    AaCompromise = 10,
}

impl RevocationReason {
    pub fn code(self) -> u8 {
        self as u8
    }

    fn to_crl_reason(self) -> CrlReason {
        match self {
            RevocationReason::Unspecified => CrlReason::Unspecified,
            RevocationReason::KeyCompromise => CrlReason::KeyCompromise,
            RevocationReason::CaCompromise => CrlReason::CaCompromise,
            RevocationReason::AffiliationChanged => CrlReason::AffiliationChanged,
            RevocationReason::Superseded => CrlReason::Superseded,
            RevocationReason::CessationOfOperation => CrlReason::CessationOfOperation,
            RevocationReason::CertificateHold => CrlReason::CertificateHold,
            RevocationReason::RemoveFromCrl => CrlReason::RemoveFromCRL,
            RevocationReason::PrivilegeWithdrawn => CrlReason::PrivilegeWithdrawn,
            RevocationReason::AaCompromise => CrlReason::AaCompromise,
        }
    }

    fn from_crl_reason(reason: CrlReason) -> Self {
        match reason {
            CrlReason::Unspecified => RevocationReason::Unspecified,
            CrlReason::KeyCompromise => RevocationReason::KeyCompromise,
            CrlReason::CaCompromise => RevocationReason::CaCompromise,
            CrlReason::AffiliationChanged => RevocationReason::AffiliationChanged,
            CrlReason::Superseded => RevocationReason::Superseded,
            CrlReason::CessationOfOperation => RevocationReason::CessationOfOperation,
            CrlReason::CertificateHold => RevocationReason::CertificateHold,
            CrlReason::RemoveFromCRL => RevocationReason::RemoveFromCrl,
            CrlReason::PrivilegeWithdrawn => RevocationReason::PrivilegeWithdrawn,
            CrlReason::AaCompromise => RevocationReason::AaCompromise,
        }
    }
}

impl TryFrom<u8> for RevocationReason {
    type Error = anyhow::Error;

    fn try_from(code: u8) -> Result<Self> {
        Ok(match code {
            0 => RevocationReason::Unspecified,
            1 => RevocationReason::KeyCompromise,
            2 => RevocationReason::CaCompromise,
            3 => RevocationReason::AffiliationChanged,
            4 => RevocationReason::Superseded,
            5 => RevocationReason::CessationOfOperation,
            6 => RevocationReason::CertificateHold,
            8 => RevocationReason::RemoveFromCrl,
            9 => RevocationReason::PrivilegeWithdrawn,
            10 => RevocationReason::AaCompromise,
            other => bail!("Unknown CRL reason code {}", other),
        })
    }
}

impl fmt::Display for RevocationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} ({})", self, self.code())
    }
}

/// One revoked certificate as listed in a CRL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevocationEntry {
    pub serial: u64,
    pub revoked_at: SystemTime,
    /// `None` when the entry carries no reason extension.
    pub reason: Option<RevocationReason>,
}

impl SignatureDigest {
    fn rsa_signature_oid(&self) -> ObjectIdentifier {
        match self {
            SignatureDigest::Sha1 => SHA1_WITH_RSA,
            SignatureDigest::Sha256 => SHA256_WITH_RSA,
            SignatureDigest::Sha512 => SHA512_WITH_RSA,
        }
    }
}

fn serial_number(serial: u64) -> Result<SerialNumber> {
    let bytes = serial.to_be_bytes();
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len() - 1);
    let mut encoded = Vec::with_capacity(9);
    // positive INTEGER: keep the sign bit clear
    if bytes[first] & 0x80 != 0 {
        encoded.push(0);
    }
    encoded.extend_from_slice(&bytes[first..]);
    SerialNumber::new(&encoded).map_err(|e| anyhow!("Failed to encode serial {}: {}", serial, e))
}

pub(crate) fn serial_value(serial: &SerialNumber) -> Result<u64> {
    let bytes = serial.as_bytes();
    let significant: Vec<u8> = bytes.iter().copied().skip_while(|b| *b == 0).collect();
    if significant.len() > 8 {
        bail!("Serial number does not fit in 64 bits");
    }
    Ok(significant
        .iter()
        .fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
}

/// UTCTime through 2049, GeneralizedTime from 2050 on (RFC 5280 5.1.2.4).
fn crl_time(at: SystemTime) -> Result<Time> {
    if let Ok(utc) = UtcTime::from_system_time(at) {
        return Ok(Time::UtcTime(utc));
    }
    let generalized =
        GeneralizedTime::from_system_time(at).map_err(|e| anyhow!("Invalid CRL time: {}", e))?;
    Ok(Time::GeneralTime(generalized))
}

/// A parsed, signed certificate revocation list.
#[derive(Debug, Clone)]
pub struct RevocationList {
    inner: CertificateList,
}

impl RevocationList {
    pub fn from_pem(pem: &str) -> Result<Self> {
        let der = X509Crl::from_pem(pem.as_bytes())
            .context("Failed to parse CRL PEM")?
            .to_der()
            .context("Failed to encode CRL")?;
        Self::from_der(&der)
    }

    pub fn from_der(der: &[u8]) -> Result<Self> {
        let inner =
            CertificateList::from_der(der).map_err(|e| anyhow!("Failed to decode CRL: {}", e))?;
        Ok(Self { inner })
    }

    pub fn to_der(&self) -> Result<Vec<u8>> {
        self.inner
            .to_der()
            .map_err(|e| anyhow!("Failed to encode CRL: {}", e))
    }

    pub fn to_pem(&self) -> Result<String> {
        let pem = X509Crl::from_der(&self.to_der()?)
            .context("Failed to load encoded CRL")?
            .to_pem()
            .context("Failed to write CRL PEM")?;
        String::from_utf8(pem).context("CRL PEM is not valid UTF-8")
    }

    pub fn issuer(&self) -> Result<String> {
        let crl = X509Crl::from_der(&self.to_der()?).context("Failed to load encoded CRL")?;
        x509_name_to_string(crl.issuer_name())
    }

    pub fn this_update(&self) -> SystemTime {
        self.inner.tbs_cert_list.this_update.to_system_time()
    }

    pub fn next_update(&self) -> Option<SystemTime> {
        self.inner
            .tbs_cert_list
            .next_update
            .as_ref()
            .map(Time::to_system_time)
    }

    pub fn len(&self) -> usize {
        self.inner
            .tbs_cert_list
            .revoked_certificates
            .as_ref()
            .map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rebuild the revocation entries from the CRL structure.
    pub fn entries(&self) -> Result<Vec<RevocationEntry>> {
        let Some(revoked) = &self.inner.tbs_cert_list.revoked_certificates else {
            return Ok(Vec::new());
        };
        revoked
            .iter()
            .map(|rc| -> Result<RevocationEntry> {
                let reason = match &rc.crl_entry_extensions {
                    Some(exts) => match exts.iter().find(|e| e.extn_id == CrlReason::OID) {
                        Some(ext) => Some(RevocationReason::from_crl_reason(
                            CrlReason::from_der(ext.extn_value.as_bytes())
                                .map_err(|e| anyhow!("Malformed CRL reason: {}", e))?,
                        )),
                        None => None,
                    },
                    None => None,
                };
                Ok(RevocationEntry {
                    serial: serial_value(&rc.serial_number)?,
                    revoked_at: rc.revocation_date.to_system_time(),
                    reason,
                })
            })
            .collect()
    }

    pub fn contains(&self, serial: u64) -> Result<bool> {
        Ok(self.entries()?.iter().any(|e| e.serial == serial))
    }

    /// Check the CRL signature against the issuing CA's key.
    pub fn verify<T: HasPublic>(&self, key: &PKeyRef<T>) -> Result<bool> {
        let crl = X509Crl::from_der(&self.to_der()?).context("Failed to load encoded CRL")?;
        crl.verify(key).context("Failed to verify CRL signature")
    }
}

/// Inputs for producing the next version of a CA's CRL.
pub struct CrlRevision<'a> {
    pub ca_certificate: &'a X509Ref,
    pub ca_key: &'a PKeyRef<Private>,
    pub digest: SignatureDigest,
    pub window: CrlWindow,
    pub next_update_days: u32,
}

impl CrlRevision<'_> {
    /// Copy `previous` (or start empty), move the update window, append one
    /// entry for `serial` and sign.
    pub fn revoke(
        &self,
        previous: Option<&RevocationList>,
        serial: u64,
        reason: RevocationReason,
        now: SystemTime,
    ) -> Result<RevocationList> {
        let issuer_der = self
            .ca_certificate
            .issuer_name()
            .to_der()
            .context("Failed to encode CA issuer name")?;
        let issuer =
            Name::from_der(&issuer_der).map_err(|e| anyhow!("Failed to decode issuer: {}", e))?;

        let (this_update, next_update) = match self.window {
            CrlWindow::Standard => (
                now,
                now + Duration::from_secs(u64::from(self.next_update_days) * 86_400),
            ),
            CrlWindow::LegacyRotation => (
                previous.and_then(RevocationList::next_update).unwrap_or(now),
                now,
            ),
        };

        let mut revoked = previous
            .and_then(|crl| crl.inner.tbs_cert_list.revoked_certificates.clone())
            .unwrap_or_default();

        let reason_der = reason
            .to_crl_reason()
            .to_der()
            .map_err(|e| anyhow!("Failed to encode CRL reason: {}", e))?;
        revoked.push(RevokedCert {
            serial_number: serial_number(serial)?,
            revocation_date: crl_time(now)?,
            crl_entry_extensions: Some(vec![Extension {
                extn_id: CrlReason::OID,
                critical: false,
                extn_value: OctetString::new(reason_der)
                    .map_err(|e| anyhow!("Failed to wrap CRL reason: {}", e))?,
            }]),
        });

        let algorithm = AlgorithmIdentifierOwned {
            oid: self.digest.rsa_signature_oid(),
            parameters: Some(
                Any::new(Tag::Null, Vec::<u8>::new())
                    .map_err(|e| anyhow!("Failed to encode NULL parameters: {}", e))?,
            ),
        };

        let tbs_cert_list = TbsCertList {
            version: Version::V2,
            signature: algorithm.clone(),
            issuer,
            this_update: crl_time(this_update)?,
            next_update: Some(crl_time(next_update)?),
            revoked_certificates: Some(revoked),
            crl_extensions: None,
        };

        let tbs_der = tbs_cert_list
            .to_der()
            .map_err(|e| anyhow!("Failed to encode TBSCertList: {}", e))?;
        let mut signer = Signer::new(self.digest.message_digest(), self.ca_key)
            .context("Failed to create CRL signer")?;
        signer
            .update(&tbs_der)
            .context("Failed to hash TBSCertList")?;
        let signature = signer.sign_to_vec().context("Failed to sign CRL")?;

        Ok(RevocationList {
            inner: CertificateList {
                tbs_cert_list,
                signature_algorithm: algorithm,
                signature: BitString::from_bytes(&signature)
                    .map_err(|e| anyhow!("Failed to encode CRL signature: {}", e))?,
            },
        })
    }
}
