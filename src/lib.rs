//! Wisp PKI - Embedded Certificate Authority Engine
//!
//! A synchronous issuance and revocation engine for the OpenVPN endpoints of
//! managed network domains. Every domain owns exactly one certificate
//! authority; the CA issues, renews, revokes and reissues X.509 certificates
//! for the VPN servers and clients of that domain and keeps a signed CRL.
//!
//! # Overview
//!
//! ```text
//! CA (self-signed, serial 1, CA:TRUE)
//!   ├── VPN server certificate (serverAuth, nsCertType=server)
//!   └── VPN client certificate (clientAuth, nsCertType=client)
//! ```
//!
//! State lives in a SQLite database. Every engine operation is one
//! transaction, so a serial number is only consumed when the certificate
//! signed with it is stored, and a CRL is only stored together with the
//! `revoked` flag it justifies.
//!
//! # Features
//!
//! - **Root bootstrap**: creating a CA validates its identity and generates
//!   its self-signed root certificate in the same step
//! - **Monotonic serials**: issuance and reissuance bump the CA serial under
//!   an exclusive write transaction
//! - **CRL maintenance**: X.509 v2 CRLs with reason codes, signed by the CA
//! - **Renewal and reissuance**: extend validity in place or mint new key
//!   material for an existing certificate slot
//! - **Key protection**: private keys at rest as PKCS#8, optionally
//!   AES-256-CBC encrypted
//!
//! # Quick Start
//!
//! ```no_run
//! use wisp_pki::certifiable::VpnClient;
//! use wisp_pki::certificate_authority::{NewCertificateAuthority, PkiEngine};
//! use wisp_pki::crl::RevocationReason;
//! use wisp_pki::distinguished_name::DistinguishedName;
//! use wisp_pki::issuance::IssueOptions;
//!
//! fn main() -> Result<(), wisp_pki::error::PkiError> {
//!     let engine = PkiEngine::in_memory()?;
//!
//!     let identity = DistinguishedName::parse("/C=US/ST=CA/L=SF/O=OpenWISP/CN=Root")?;
//!     let ca = engine.create_ca(NewCertificateAuthority::new(identity))?;
//!
//!     let device = VpnClient { id: 42, name: "dev42".to_string() };
//!     let cert = engine.issue_certificate(ca.id, &device, IssueOptions::default())?;
//!     assert_eq!(cert.serial, 2);
//!
//!     engine.revoke_certificate(cert.id, Some(RevocationReason::KeyCompromise))?;
//!     Ok(())
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`certificate_authority`]: the [`PkiEngine`](certificate_authority::PkiEngine),
//!   CA bootstrap, lookups and verification
//! - [`issuance`], [`revocation`], [`renewal`], [`reissuance`]: certificate
//!   lifecycle operations
//! - [`store`]: SQLite persistence
//! - [`certificate_builder`], [`extensions`], [`distinguished_name`], [`keys`]:
//!   X.509 construction on top of OpenSSL
//! - [`crl`], [`certificate_details`]: parsed views of CRLs and certificates
//! - [`openvpn`]: DH parameters and `tls-auth` keys
//!
//! # Error Handling
//!
//! Engine operations return [`error::PkiError`]. Validation failures carry
//! every rejected field, self-revocation and self-reissuance are reported as
//! usage errors, and a CA without usable root material is a precondition
//! failure. Nothing is persisted when an operation fails.

pub mod certifiable;
pub mod certificate_authority;
pub mod certificate_builder;
pub mod certificate_details;
pub mod configs;
pub mod crl;
pub mod distinguished_name;
pub mod error;
pub mod extensions;
pub mod issuance;
pub mod keys;
pub mod openvpn;
pub mod reissuance;
pub mod renewal;
pub mod revocation;
pub mod store;
