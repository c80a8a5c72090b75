//! Minting fresh key material for an existing certificate slot.

use tracing::{info, warn};

use crate::certificate_authority::PkiEngine;
use crate::certificate_builder::{certificate_to_pem, CertificateBuilder, Signer};
use crate::distinguished_name::DistinguishedName;
use crate::error::{PkiError, Result, SelfOperation};
use crate::issuance::IssueOptions;
use crate::keys::generate_rsa_key;
use crate::store::{CertificateRecord, StoreTx};

fn reissuable(tx: &StoreTx<'_>, cert_id: i64) -> Result<CertificateRecord> {
    let record = tx.certificate(cert_id)?.ok_or(PkiError::NotFound {
        entity: "certificate",
        id: cert_id,
    })?;
    if record.is_authority_root() {
        warn!(ca_id = record.ca_id, cert_id, "refusing to reissue CA root certificate");
        return Err(PkiError::SelfOperation {
            ca_id: record.ca_id,
            operation: SelfOperation::Reissue,
        });
    }
    Ok(record)
}

impl PkiEngine {
    /// Replace the key pair and serial of a certificate, keeping its DN and
    /// owner. Clears the revoked flag.
    pub fn reissue_certificate(
        &self,
        cert_id: i64,
        options: IssueOptions,
    ) -> Result<CertificateRecord> {
        let role = self.store().read(|tx| reissuable(tx, cert_id))?.role;

        let validity_days = options
            .validity_days
            .unwrap_or_else(|| self.defaults().validity_days_for(role));
        let key_length = options
            .key_length
            .unwrap_or(self.defaults().certificate_key_length);

        let key = generate_rsa_key(key_length)?;
        let key_pem = self.protector().seal(&key)?;

        let (record, previous_serial) = self.store().write(|tx| {
            let record = reissuable(tx, cert_id)?;
            let root = self.load_root(tx, record.ca_id)?;
            let serial = tx.increment_serial(record.ca_id)?;
            let subject = DistinguishedName::parse(&record.dn)?;

            let certificate = CertificateBuilder::new(record.role)
                .subject(subject)
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

            tx.replace_certificate_material(cert_id, serial, &certificate_pem, &key_pem)?;
            let previous_serial = record.serial;
            Ok((
                CertificateRecord {
                    serial,
                    certificate_pem,
                    key_pem: key_pem.clone(),
                    revoked: false,
                    ..record
                },
                previous_serial,
            ))
        })?;

        info!(
            ca_id = record.ca_id,
            cert_id,
            previous_serial,
            serial = record.serial,
            "reissued certificate"
        );
        Ok(record)
    }
}
