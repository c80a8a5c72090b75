//! Certificate authorities and the engine that operates them.
//!
//! [`PkiEngine`] owns the store, the key protector and the issuance defaults.
//! This module holds the CA bootstrap, lookups and verification; issuance,
//! revocation, renewal and reissuance extend the engine in their own modules.

use anyhow::anyhow;
use openssl::pkey::{PKey, Private};
use openssl::stack::Stack;
use openssl::x509::store::X509StoreBuilder;
use openssl::x509::{X509StoreContext, X509};
use regex::Regex;
use tracing::{debug, info, warn};

use crate::certifiable::{underscore_whitespace, Certifiable, CertificateRole, OwnerRef};
use crate::certificate_builder::{certificate_to_pem, CertificateBuilder, Signer};
use crate::configs::{AppConfig, CrlConfig, IssuanceDefaults};
use crate::crl::RevocationList;
use crate::distinguished_name::{check_encodable, DistinguishedName};
use crate::error::{FieldError, PkiError, Result, ValidationErrors};
use crate::keys::{generate_rsa_key, KeyProtector};
use crate::store::{is_unique_violation, CertificateRecord, CertificateStore, NewCertificate, StoreTx};

/// Printable word characters, spaces, `.`, `_` and `'`.
const IDENTITY_FIELD_PATTERN: &str = r"^(?-u:[\s\w.'])+$";

const TAKEN: &str = "has already been taken";

fn max_length(field: &str) -> usize {
    match field {
        "o" | "cn" => 128,
        _ => 32,
    }
}

/// A persisted certificate authority.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateAuthority {
    pub id: i64,
    pub identity: DistinguishedName,
    /// Network domain the CA serves, if bound to one.
    pub domain: Option<String>,
    /// Last serial handed out; the root certificate has serial 1.
    pub serial: u64,
    /// PEM CRL, absent until the first revocation.
    pub crl: Option<String>,
}

impl CertificateAuthority {
    pub fn dn(&self) -> String {
        self.identity.to_string()
    }

    pub fn dn_prefix(&self) -> String {
        self.identity.prefix()
    }

    pub fn revocation_list(&self) -> Result<Option<RevocationList>> {
        match &self.crl {
            Some(pem) => Ok(Some(RevocationList::from_pem(pem)?)),
            None => Ok(None),
        }
    }
}

impl Certifiable for CertificateAuthority {
    fn identifier(&self) -> String {
        format!("ca_{}_{}", self.id, underscore_whitespace(&self.identity.common_name))
    }

    fn role(&self) -> CertificateRole {
        CertificateRole::Ca
    }

    fn owner_ref(&self) -> OwnerRef {
        OwnerRef::ca(self.id)
    }
}

/// Identity of a CA to be created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCertificateAuthority {
    pub identity: DistinguishedName,
    pub domain: Option<String>,
}

impl NewCertificateAuthority {
    pub fn new(identity: DistinguishedName) -> Self {
        Self {
            identity,
            domain: None,
        }
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    /// Format checks on every identity field. Uniqueness is checked against
    /// the store by [`PkiEngine::create_ca`].
    pub fn validate(&self) -> Result<ValidationErrors> {
        let pattern = Regex::new(IDENTITY_FIELD_PATTERN)
            .map_err(|e| anyhow!("Invalid identity field pattern: {}", e))?;
        let mut errors = ValidationErrors::default();

        for (field, nid, value) in self.identity.components() {
            let max = max_length(field);
            if value.trim().is_empty() {
                errors.push(field, "can't be blank");
                continue;
            }
            if !pattern.is_match(value) {
                errors.push(field, "is invalid");
            }
            if value.chars().count() > max {
                errors.push(field, format!("is too long (maximum is {} characters)", max));
            }
            if !errors.has(field) {
                if let Err(e) = check_encodable(nid, value) {
                    debug!(field, error = %e, "identity field rejected by name encoder");
                    errors.push(field, "can't be encoded in a certificate name");
                }
            }
        }

        if let Some(domain) = &self.domain {
            if domain.trim().is_empty() {
                errors.push("domain", "can't be blank");
            }
        }

        Ok(errors)
    }
}

/// Outcome of [`PkiEngine::verify_certificate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CertificateStatus {
    /// Chains to the CA root and is not listed in its CRL.
    Valid,
    Revoked,
    /// Chain verification failed.
    Invalid(String),
}

/// The CA's own certificate and its opened private key.
pub(crate) struct RootMaterial {
    pub certificate: X509,
    pub key: PKey<Private>,
}

pub struct PkiEngine {
    store: CertificateStore,
    protector: KeyProtector,
    defaults: IssuanceDefaults,
    crl: CrlConfig,
}

impl PkiEngine {
    pub fn new(
        store: CertificateStore,
        protector: KeyProtector,
        defaults: IssuanceDefaults,
        crl: CrlConfig,
    ) -> Self {
        Self {
            store,
            protector,
            defaults,
            crl,
        }
    }

    /// Open the configured database and key protection.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let store = CertificateStore::open(&config.database.path)?;
        let protector = KeyProtector::new(config.key_protection.passphrase()?);
        info!(
            database = %config.database.path.display(),
            encrypted_keys = protector.is_encrypting(),
            "PKI engine ready"
        );
        Ok(Self::new(
            store,
            protector,
            config.defaults.clone(),
            config.crl.clone(),
        ))
    }

    /// Engine on a fresh in-memory database with default settings.
    pub fn in_memory() -> Result<Self> {
        Ok(Self::new(
            CertificateStore::open_in_memory()?,
            KeyProtector::plaintext(),
            IssuanceDefaults::default(),
            CrlConfig::default(),
        ))
    }

    pub fn defaults(&self) -> &IssuanceDefaults {
        &self.defaults
    }

    pub(crate) fn store(&self) -> &CertificateStore {
        &self.store
    }

    pub(crate) fn protector(&self) -> &KeyProtector {
        &self.protector
    }

    pub(crate) fn crl_config(&self) -> &CrlConfig {
        &self.crl
    }

    /// Validate, generate the CA key pair and persist the CA together with
    /// its self-signed root certificate (serial 1).
    pub fn create_ca(&self, new: NewCertificateAuthority) -> Result<CertificateAuthority> {
        let mut errors = new.validate()?;
        self.store.read(|tx| {
            if !errors.has("cn") && tx.ca_by_cn(&new.identity.common_name)?.is_some() {
                errors.push("cn", TAKEN);
            }
            if let Some(domain) = &new.domain {
                if !errors.has("domain") && tx.ca_by_domain(domain)?.is_some() {
                    errors.push("domain", TAKEN);
                }
            }
            Ok(())
        })?;
        if !errors.is_empty() {
            debug!(errors = %errors, "rejected certificate authority");
        }
        errors.into_result()?;

        let key = generate_rsa_key(self.defaults.ca_key_length)?;
        let key_pem = self.protector.seal(&key)?;

        let ca = self.store.write(|tx| {
            let ca_id = tx
                .insert_ca(&new.identity, new.domain.as_deref())
                .map_err(|e| {
                    let field = if is_unique_violation(&e, "certificate_authorities.cn") {
                        "cn"
                    } else if is_unique_violation(&e, "certificate_authorities.domain") {
                        "domain"
                    } else {
                        return e;
                    };
                    PkiError::Validation(ValidationErrors(vec![FieldError::new(field, TAKEN)]))
                })?;

            let certificate = CertificateBuilder::new(CertificateRole::Ca)
                .subject(new.identity.clone())
                .serial(1)
                .validity_days(self.defaults.ca_validity_days)
                .digest(self.defaults.digest)
                .sign(&key, Signer::SelfSigned(&key))?;
            let certificate_pem = certificate_to_pem(&certificate)?;

            tx.insert_certificate(NewCertificate {
                dn: &new.identity.to_string(),
                ca_id,
                owner: &OwnerRef::ca(ca_id),
                role: CertificateRole::Ca,
                serial: 1,
                certificate_pem: &certificate_pem,
                key_pem: &key_pem,
            })?;

            tx.ca(ca_id)?.ok_or(PkiError::NotFound {
                entity: "certificate authority",
                id: ca_id,
            })
        })?;

        info!(ca_id = ca.id, dn = %ca.dn(), "created certificate authority");
        Ok(ca)
    }

    /// Root certificate and key of `ca_id`, opened for signing.
    pub(crate) fn load_root(&self, tx: &StoreTx<'_>, ca_id: i64) -> Result<RootMaterial> {
        let record = tx
            .root_certificate(ca_id)?
            .ok_or(PkiError::MissingRootMaterial { ca_id })?;
        let certificate = record.x509().map_err(|e| {
            warn!(ca_id, error = %e, "unreadable root certificate");
            PkiError::MissingRootMaterial { ca_id }
        })?;
        let key = self.protector.open(&record.key_pem).map_err(|e| {
            warn!(ca_id, error = %e, "unreadable root key");
            PkiError::MissingRootMaterial { ca_id }
        })?;
        Ok(RootMaterial { certificate, key })
    }

    pub fn find_ca(&self, ca_id: i64) -> Result<CertificateAuthority> {
        self.store.read(|tx| {
            tx.ca(ca_id)?.ok_or(PkiError::NotFound {
                entity: "certificate authority",
                id: ca_id,
            })
        })
    }

    pub fn find_ca_by_cn(&self, cn: &str) -> Result<Option<CertificateAuthority>> {
        self.store.read(|tx| tx.ca_by_cn(cn))
    }

    pub fn find_ca_by_domain(&self, domain: &str) -> Result<Option<CertificateAuthority>> {
        self.store.read(|tx| tx.ca_by_domain(domain))
    }

    pub fn list_cas(&self) -> Result<Vec<CertificateAuthority>> {
        self.store.read(|tx| tx.cas())
    }

    pub fn certificate(&self, cert_id: i64) -> Result<CertificateRecord> {
        self.store.read(|tx| {
            tx.certificate(cert_id)?.ok_or(PkiError::NotFound {
                entity: "certificate",
                id: cert_id,
            })
        })
    }

    pub fn certificates_for_ca(&self, ca_id: i64) -> Result<Vec<CertificateRecord>> {
        self.store.read(|tx| tx.certificates_for_ca(ca_id))
    }

    pub fn certificates_for_owner(&self, owner: &OwnerRef) -> Result<Vec<CertificateRecord>> {
        self.store.read(|tx| tx.certificates_for_owner(owner))
    }

    pub fn root_certificate(&self, ca_id: i64) -> Result<CertificateRecord> {
        self.store.read(|tx| {
            tx.root_certificate(ca_id)?
                .ok_or(PkiError::MissingRootMaterial { ca_id })
        })
    }

    /// Open the stored private key of a certificate.
    pub fn private_key(&self, cert_id: i64) -> Result<PKey<Private>> {
        let record = self.certificate(cert_id)?;
        Ok(self.protector.open(&record.key_pem)?)
    }

    pub fn revocation_list(&self, ca_id: i64) -> Result<Option<RevocationList>> {
        self.find_ca(ca_id)?.revocation_list()
    }

    /// Delete a CA and every certificate it issued.
    pub fn delete_ca(&self, ca_id: i64) -> Result<()> {
        let deleted = self.store.write(|tx| tx.delete_ca(ca_id))?;
        if !deleted {
            return Err(PkiError::NotFound {
                entity: "certificate authority",
                id: ca_id,
            });
        }
        info!(ca_id, "deleted certificate authority");
        Ok(())
    }

    /// Drop the certificates of an owner that no longer exists. A CA's own
    /// certificate is only removed by [`PkiEngine::delete_ca`].
    pub fn delete_owner_certificates(&self, owner: &dyn Certifiable) -> Result<usize> {
        let role = owner.role();
        if role == CertificateRole::Ca {
            return Err(PkiError::UnsupportedRole(role));
        }
        let owner_ref = owner.owner_ref();
        let removed = self
            .store
            .write(|tx| tx.delete_certificates_for_owner(&owner_ref))?;
        info!(
            owner_type = %owner_ref.owner_type,
            owner_id = owner_ref.owner_id,
            removed,
            "deleted owner certificates"
        );
        Ok(removed)
    }

    /// Check a stored certificate against its CA root and CRL.
    pub fn verify_certificate(&self, cert_id: i64) -> Result<CertificateStatus> {
        let (record, root, ca) = self.store.read(|tx| {
            let record = tx.certificate(cert_id)?.ok_or(PkiError::NotFound {
                entity: "certificate",
                id: cert_id,
            })?;
            let root = tx
                .root_certificate(record.ca_id)?
                .ok_or(PkiError::MissingRootMaterial {
                    ca_id: record.ca_id,
                })?;
            let ca = tx.ca(record.ca_id)?.ok_or(PkiError::NotFound {
                entity: "certificate authority",
                id: record.ca_id,
            })?;
            Ok((record, root, ca))
        })?;

        let certificate = record.x509()?;
        let root_certificate = root.x509()?;

        let mut trust = X509StoreBuilder::new()?;
        trust.add_cert(root_certificate.clone())?;
        let trust = trust.build();
        let chain: Stack<X509> = Stack::new()?;
        let mut context = X509StoreContext::new()?;
        let (verified, reason) = context.init(&trust, &certificate, &chain, |c| {
            let verified = c.verify_cert()?;
            Ok((verified, c.error().error_string().to_string()))
        })?;
        if !verified {
            debug!(cert_id, reason = %reason, "certificate failed chain verification");
            return Ok(CertificateStatus::Invalid(reason));
        }

        if record.revoked {
            return Ok(CertificateStatus::Revoked);
        }
        if let Some(crl) = ca.revocation_list()? {
            let root_public_key = root_certificate.public_key()?;
            if !crl.verify(&root_public_key)? {
                warn!(ca_id = ca.id, "CRL signature does not match the CA key");
            }
            if crl.contains(record.serial)? {
                return Ok(CertificateStatus::Revoked);
            }
        }
        Ok(CertificateStatus::Valid)
    }
}
