//! Extending the validity of a certificate in place.

use tracing::info;

use crate::certificate_authority::PkiEngine;
use crate::certificate_builder::{certificate_to_pem, CertificateBuilder, Signer};
use crate::distinguished_name::DistinguishedName;
use crate::error::{PkiError, Result};
use crate::store::CertificateRecord;

impl PkiEngine {
    /// Re-sign the certificate with a fresh validity window starting now.
    ///
    /// Serial, subject, issuer and key pair are kept; the CA serial counter
    /// is untouched. A CA root is renewed self-signed.
    pub fn renew_certificate(
        &self,
        cert_id: i64,
        validity_days: Option<u32>,
    ) -> Result<CertificateRecord> {
        let record = self.store().write(|tx| {
            let record = tx.certificate(cert_id)?.ok_or(PkiError::NotFound {
                entity: "certificate",
                id: cert_id,
            })?;
            if record.revoked {
                return Err(PkiError::RenewRevoked(cert_id));
            }

            let root = self.load_root(tx, record.ca_id)?;
            let public_key = record.x509()?.public_key()?;
            let subject = DistinguishedName::parse(&record.dn)?;
            let validity_days =
                validity_days.unwrap_or_else(|| self.defaults().validity_days_for(record.role));

            let signer = if record.is_authority_root() {
                Signer::SelfSigned(&root.key)
            } else {
                Signer::Authority {
                    certificate: &root.certificate,
                    key: &root.key,
                }
            };
            let certificate = CertificateBuilder::new(record.role)
                .subject(subject)
                .serial(record.serial)
                .validity_days(validity_days)
                .digest(self.defaults().digest)
                .sign(&public_key, signer)?;
            let certificate_pem = certificate_to_pem(&certificate)?;

            tx.update_certificate_pem(cert_id, &certificate_pem)?;
            Ok(CertificateRecord {
                certificate_pem,
                ..record
            })
        })?;

        info!(
            ca_id = record.ca_id,
            cert_id,
            serial = record.serial,
            "renewed certificate"
        );
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certifiable::{VpnClient, VpnServer};
    use crate::certificate_authority::tests::engine_with_root;
    use crate::certificate_authority::CertificateStatus;
    use crate::certificate_details::CertificateDetails;
    use crate::issuance::IssueOptions;
    use crate::keys::public_key_der;

    fn public_key(record: &CertificateRecord) -> Vec<u8> {
        public_key_der(&record.x509().unwrap().public_key().unwrap()).unwrap()
    }

    #[test]
    fn test_renewal_keeps_identity_and_extends_validity() {
        let (engine, ca) = engine_with_root();
        let client = VpnClient {
            id: 42,
            name: "dev42".to_string(),
        };
        let cert = engine
            .issue_certificate(ca.id, &client, IssueOptions::default().validity_days(1))
            .unwrap();
        let before = CertificateDetails::from_pem(&cert.certificate_pem).unwrap();

        let renewed = engine.renew_certificate(cert.id, None).unwrap();
        let after = CertificateDetails::from_pem(&renewed.certificate_pem).unwrap();

        assert_eq!(renewed.dn, cert.dn);
        assert_eq!(renewed.serial, cert.serial);
        assert_eq!(after.serial, before.serial);
        assert_eq!(after.subject, before.subject);
        assert_eq!(after.issuer, before.issuer);
        assert_eq!(public_key(&renewed), public_key(&cert));
        assert_eq!(renewed.key_pem, cert.key_pem);
        assert!(after.not_after > before.not_after);
        assert!(after.not_before >= before.not_before);

        let lifetime = after.not_after.duration_since(after.not_before).unwrap();
        assert_eq!(lifetime.as_secs(), 1096 * 86_400);

        assert_eq!(engine.certificate(cert.id).unwrap(), renewed);
        assert_eq!(engine.find_ca(ca.id).unwrap().serial, 2);
        assert_eq!(
            engine.verify_certificate(cert.id).unwrap(),
            CertificateStatus::Valid
        );
    }

    #[test]
    fn test_server_default_validity() {
        let (engine, ca) = engine_with_root();
        let server = VpnServer {
            id: 1,
            name: "gw".to_string(),
        };
        let cert = engine
            .issue_certificate(ca.id, &server, IssueOptions::default().validity_days(1))
            .unwrap();
        let renewed = engine.renew_certificate(cert.id, None).unwrap();
        let details = CertificateDetails::from_pem(&renewed.certificate_pem).unwrap();
        let lifetime = details.not_after.duration_since(details.not_before).unwrap();
        assert_eq!(lifetime.as_secs(), 1826 * 86_400);
    }

    #[test]
    fn test_root_renewal_stays_self_signed() {
        let (engine, ca) = engine_with_root();
        let root = engine.root_certificate(ca.id).unwrap();
        let leaf = engine
            .issue_certificate(
                ca.id,
                &VpnClient {
                    id: 1,
                    name: "dev1".to_string(),
                },
                IssueOptions::default(),
            )
            .unwrap();

        let renewed = engine.renew_certificate(root.id, Some(7400)).unwrap();
        let details = CertificateDetails::from_pem(&renewed.certificate_pem).unwrap();
        assert!(details.is_ca);
        assert_eq!(details.serial, 1);
        assert_eq!(details.subject, details.issuer);
        assert_eq!(public_key(&renewed), public_key(&root));

        // same key, so earlier leaves still chain
        assert_eq!(
            engine.verify_certificate(leaf.id).unwrap(),
            CertificateStatus::Valid
        );
    }

    #[test]
    fn test_revoked_certificate_cannot_be_renewed() {
        let (engine, ca) = engine_with_root();
        let cert = engine
            .issue_certificate(
                ca.id,
                &VpnClient {
                    id: 1,
                    name: "dev1".to_string(),
                },
                IssueOptions::default(),
            )
            .unwrap();
        engine.revoke_certificate(cert.id, None).unwrap();

        let err = engine.renew_certificate(cert.id, None).unwrap_err();
        assert!(matches!(err, PkiError::RenewRevoked(_)));
        assert_eq!(
            engine.certificate(cert.id).unwrap().certificate_pem,
            cert.certificate_pem
        );
    }
}
