//! Issuing OpenVPN client and server certificates.

use tracing::{debug, info};

use crate::certifiable::{Certifiable, CertificateRole};
use crate::certificate_authority::PkiEngine;
use crate::certificate_builder::{certificate_to_pem, CertificateBuilder, Signer};
use crate::distinguished_name::check_common_name_component;
use crate::error::{PkiError, Result};
use crate::keys::generate_rsa_key;
use crate::store::{CertificateRecord, NewCertificate};

/// Overrides for a single issuance or reissuance. Unset fields fall back to
/// the role defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IssueOptions {
    pub validity_days: Option<u32>,
    pub key_length: Option<u32>,
}

impl IssueOptions {
    pub fn validity_days(mut self, days: u32) -> Self {
        self.validity_days = Some(days);
        self
    }

    pub fn key_length(mut self, bits: u32) -> Self {
        self.key_length = Some(bits);
        self
    }
}

impl PkiEngine {
    /// Issue a new certificate for `owner`, signed by CA `ca_id`.
    ///
    /// The key pair is generated before the store lock is taken; the serial
    /// increment and the new record are committed together.
    pub fn issue_certificate(
        &self,
        ca_id: i64,
        owner: &dyn Certifiable,
        options: IssueOptions,
    ) -> Result<CertificateRecord> {
        let role = owner.role();
        if role == CertificateRole::Ca {
            return Err(PkiError::UnsupportedRole(role));
        }
        let identifier = owner.identifier();
        check_common_name_component(&identifier).map_err(|reason| {
            debug!(identifier = %identifier, reason, "rejected certificate owner");
            PkiError::InvalidOwnerIdentifier {
                identifier: identifier.clone(),
                reason,
            }
        })?;

        let validity_days = options
            .validity_days
            .unwrap_or_else(|| self.defaults().validity_days_for(role));
        let key_length = options
            .key_length
            .unwrap_or(self.defaults().certificate_key_length);

        let key = generate_rsa_key(key_length)?;
        let key_pem = self.protector().seal(&key)?;
        let owner_ref = owner.owner_ref();

        let record = self.store().write(|tx| {
            let ca = tx.ca(ca_id)?.ok_or(PkiError::NotFound {
                entity: "certificate authority",
                id: ca_id,
            })?;
            let root = self.load_root(tx, ca_id)?;
            let serial = tx.increment_serial(ca_id)?;
            let subject = ca.identity.with_common_name(&identifier);

            let certificate = CertificateBuilder::new(role)
                .subject(subject.clone())
                .serial(serial)
                .validity_days(validity_days)
                .digest(self.defaults().digest)
                .sign(
                    &key,
                    Signer::Authority {
                        certificate: &root.certificate,
                        key: &root.key,
                    },
                )?;
            let certificate_pem = certificate_to_pem(&certificate)?;

            tx.insert_certificate(NewCertificate {
                dn: &subject.to_string(),
                ca_id,
                owner: &owner_ref,
                role,
                serial,
                certificate_pem: &certificate_pem,
                key_pem: &key_pem,
            })
        })?;

        info!(
            ca_id,
            cert_id = record.id,
            serial = record.serial,
            role = %role,
            dn = %record.dn,
            "issued certificate"
        );
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    use crate::certifiable::{VpnClient, VpnServer};
    use crate::certificate_authority::tests::engine_with_root;
    use crate::certificate_authority::CertificateStatus;
    use crate::certificate_details::CertificateDetails;
    use crate::extensions::{ExtendedUsage, NsCertType};

    fn client(id: i64, name: &str) -> VpnClient {
        VpnClient {
            id,
            name: name.to_string(),
        }
    }

    #[test]
    fn test_client_certificate() {
        let (engine, ca) = engine_with_root();
        let record = engine
            .issue_certificate(ca.id, &client(42, "dev42"), IssueOptions::default())
            .unwrap();

        assert_eq!(record.serial, 2);
        assert_eq!(record.dn, "/C=US/ST=CA/L=SF/O=OpenWISP/CN=dev42");
        assert_eq!(record.role, CertificateRole::Client);
        assert!(!record.revoked);
        assert!(!record.is_authority_root());

        let details = CertificateDetails::from_pem(&record.certificate_pem).unwrap();
        assert!(!details.is_ca);
        assert_eq!(details.issuer, "/C=US/ST=CA/L=SF/O=OpenWISP/CN=Root");
        assert_eq!(details.extended_key_usage, vec![ExtendedUsage::ClientAuth]);
        assert_eq!(details.ns_cert_type, Some(NsCertType::Client));
        let lifetime = details.not_after.duration_since(details.not_before).unwrap();
        assert_eq!(lifetime.as_secs(), 1096 * 86_400);

        assert_eq!(engine.private_key(record.id).unwrap().bits(), 1024);
        assert_eq!(engine.find_ca(ca.id).unwrap().serial, 2);
        assert_eq!(
            engine.verify_certificate(record.id).unwrap(),
            CertificateStatus::Valid
        );
    }

    #[test]
    fn test_server_certificate_with_options() {
        let (engine, ca) = engine_with_root();
        let server = VpnServer {
            id: 1,
            name: "main gateway".to_string(),
        };
        let record = engine
            .issue_certificate(
                ca.id,
                &server,
                IssueOptions::default().validity_days(30).key_length(2048),
            )
            .unwrap();

        assert_eq!(record.dn, "/C=US/ST=CA/L=SF/O=OpenWISP/CN=vpn_server_1_main_gateway");
        let details = CertificateDetails::from_pem(&record.certificate_pem).unwrap();
        assert_eq!(details.extended_key_usage, vec![ExtendedUsage::ServerAuth]);
        assert_eq!(details.ns_cert_type, Some(NsCertType::Server));
        let lifetime = details.not_after.duration_since(details.not_before).unwrap();
        assert_eq!(lifetime.as_secs(), 30 * 86_400);
        assert_eq!(engine.private_key(record.id).unwrap().bits(), 2048);
    }

    #[test]
    fn test_serials_strictly_increase() {
        let (engine, ca) = engine_with_root();
        let serials: Vec<u64> = (0..3)
            .map(|i| {
                engine
                    .issue_certificate(ca.id, &client(i, &format!("dev{i}")), IssueOptions::default())
                    .unwrap()
                    .serial
            })
            .collect();
        assert_eq!(serials, vec![2, 3, 4]);
    }

    #[test]
    fn test_concurrent_issuance_never_repeats_serials() {
        let (engine, ca) = engine_with_root();
        let engine = Arc::new(engine);
        let ca_id = ca.id;

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let engine = Arc::clone(&engine);
                thread::spawn(move || {
                    engine
                        .issue_certificate(
                            ca_id,
                            &client(i, &format!("device{i}")),
                            IssueOptions::default(),
                        )
                        .unwrap()
                        .serial
                })
            })
            .collect();

        let serials: HashSet<u64> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(serials.len(), 8);
        assert_eq!(serials, (2..=9).collect::<HashSet<u64>>());
        assert_eq!(engine.find_ca(ca_id).unwrap().serial, 9);
    }

    #[test]
    fn test_invalid_identifier_rejected_without_consuming_serial() {
        let (engine, ca) = engine_with_root();
        for name in ["", "   ", "a/CN=b"] {
            let err = engine
                .issue_certificate(ca.id, &client(1, name), IssueOptions::default())
                .unwrap_err();
            assert!(matches!(err, PkiError::InvalidOwnerIdentifier { .. }));
        }
        let server = VpnServer {
            id: 1,
            name: "\t".to_string(),
        };
        assert!(matches!(
            engine.issue_certificate(ca.id, &server, IssueOptions::default()),
            Err(PkiError::InvalidOwnerIdentifier { .. })
        ));
        assert_eq!(engine.find_ca(ca.id).unwrap().serial, 1);
        assert_eq!(engine.certificates_for_ca(ca.id).unwrap().len(), 1);
    }

    #[test]
    fn test_ca_role_not_issued() {
        let (engine, ca) = engine_with_root();
        let err = engine
            .issue_certificate(ca.id, &ca, IssueOptions::default())
            .unwrap_err();
        assert!(matches!(err, PkiError::UnsupportedRole(CertificateRole::Ca)));
    }

    #[test]
    fn test_unknown_ca() {
        let (engine, ca) = engine_with_root();
        let err = engine
            .issue_certificate(ca.id + 10, &client(1, "dev1"), IssueOptions::default())
            .unwrap_err();
        assert!(matches!(err, PkiError::NotFound { .. }));
    }

    #[test]
    fn test_missing_root_material_leaves_serial_unchanged() {
        let (engine, ca) = engine_with_root();
        let root = engine.root_certificate(ca.id).unwrap();
        engine
            .store()
            .write(|tx| {
                tx.replace_certificate_material(root.id, 1, &root.certificate_pem, "garbage")
            })
            .unwrap();

        let err = engine
            .issue_certificate(ca.id, &client(1, "dev1"), IssueOptions::default())
            .unwrap_err();
        assert!(matches!(err, PkiError::MissingRootMaterial { .. }));
        assert_eq!(engine.find_ca(ca.id).unwrap().serial, 1);
        assert_eq!(engine.certificates_for_ca(ca.id).unwrap().len(), 1);
    }
}
