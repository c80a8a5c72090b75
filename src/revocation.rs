//! Revoking issued certificates and maintaining the CA's CRL.

use std::time::SystemTime;

use tracing::{info, warn};

use crate::certificate_authority::PkiEngine;
use crate::crl::{CrlRevision, RevocationReason};
use crate::error::{PkiError, Result, SelfOperation};
use crate::store::CertificateRecord;

impl PkiEngine {
    /// Add the certificate to its CA's CRL and mark it revoked. `reason`
    /// defaults to key compromise.
    ///
    /// The CRL and the `revoked` flag are committed in one transaction.
    pub fn revoke_certificate(
        &self,
        cert_id: i64,
        reason: Option<RevocationReason>,
    ) -> Result<CertificateRecord> {
        let reason = reason.unwrap_or_default();

        let (record, entries) = self.store().write(|tx| {
            let record = tx.certificate(cert_id)?.ok_or(PkiError::NotFound {
                entity: "certificate",
                id: cert_id,
            })?;
            if record.is_authority_root() {
                warn!(ca_id = record.ca_id, cert_id, "refusing to revoke CA root certificate");
                return Err(PkiError::SelfOperation {
                    ca_id: record.ca_id,
                    operation: SelfOperation::Revoke,
                });
            }
            if record.revoked {
                return Err(PkiError::AlreadyRevoked(cert_id));
            }

            let ca = tx.ca(record.ca_id)?.ok_or(PkiError::NotFound {
                entity: "certificate authority",
                id: record.ca_id,
            })?;
            let root = self.load_root(tx, ca.id)?;
            let previous = ca.revocation_list()?;

            let revision = CrlRevision {
                ca_certificate: &root.certificate,
                ca_key: &root.key,
                digest: self.defaults().digest,
                window: self.crl_config().window,
                next_update_days: self.crl_config().next_update_days,
            };
            let crl = revision.revoke(previous.as_ref(), record.serial, reason, SystemTime::now())?;

            tx.set_crl(ca.id, &crl.to_pem()?)?;
            tx.set_revoked(cert_id, true)?;

            Ok((
                CertificateRecord {
                    revoked: true,
                    ..record
                },
                crl.len(),
            ))
        })?;

        info!(
            ca_id = record.ca_id,
            cert_id,
            serial = record.serial,
            reason = %reason,
            crl_entries = entries,
            "revoked certificate"
        );
        Ok(record)
    }
}
