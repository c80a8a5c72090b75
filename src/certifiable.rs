//! Entities a certificate can be issued for.
//!
//! The store keeps a polymorphic `(owner_type, owner_id)` reference; the role
//! decides which extension profile and default validity apply.

use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CertificateRole {
    Ca,
    Server,
    Client,
}

impl CertificateRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            CertificateRole::Ca => "ca",
            CertificateRole::Server => "server",
            CertificateRole::Client => "client",
        }
    }
}

impl fmt::Display for CertificateRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CertificateRole {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ca" => Ok(CertificateRole::Ca),
            "server" => Ok(CertificateRole::Server),
            "client" => Ok(CertificateRole::Client),
            other => Err(anyhow!("Unknown certificate role: {}", other)),
        }
    }
}

/// Reference to the owning entity as persisted next to each certificate.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OwnerRef {
    pub owner_type: String,
    pub owner_id: i64,
}

impl OwnerRef {
    pub const CA_OWNER_TYPE: &'static str = "ca";

    pub fn new(owner_type: impl Into<String>, owner_id: i64) -> Self {
        Self {
            owner_type: owner_type.into(),
            owner_id,
        }
    }

    pub fn ca(ca_id: i64) -> Self {
        Self::new(Self::CA_OWNER_TYPE, ca_id)
    }
}

/// Capability every certificate owner exposes to the engine.
pub trait Certifiable {
    /// Whitespace-free name used verbatim as the certificate CN.
    fn identifier(&self) -> String;

    fn role(&self) -> CertificateRole;

    fn owner_ref(&self) -> OwnerRef;
}

/// Replace every whitespace character with `_`.
pub(crate) fn underscore_whitespace(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .collect()
}

/// An OpenVPN server of a managed domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VpnServer {
    pub id: i64,
    pub name: String,
}

impl Certifiable for VpnServer {
    fn identifier(&self) -> String {
        if self.name.trim().is_empty() {
            return String::new();
        }
        format!("vpn_server_{}_{}", self.id, underscore_whitespace(&self.name))
    }

    fn role(&self) -> CertificateRole {
        CertificateRole::Server
    }

    fn owner_ref(&self) -> OwnerRef {
        OwnerRef::new("vpn_server", self.id)
    }
}

/// A device connecting to a domain's VPN, typically an access point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VpnClient {
    pub id: i64,
    pub name: String,
}

impl Certifiable for VpnClient {
    /// Blank names stay blank so issuance rejects them.
    fn identifier(&self) -> String {
        if self.name.trim().is_empty() {
            return String::new();
        }
        underscore_whitespace(&self.name)
    }

    fn role(&self) -> CertificateRole {
        CertificateRole::Client
    }

    fn owner_ref(&self) -> OwnerRef {
        OwnerRef::new("vpn_client", self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_round_trips_through_storage_name() {
        for role in [
            CertificateRole::Ca,
            CertificateRole::Server,
            CertificateRole::Client,
        ] {
            assert_eq!(role.as_str().parse::<CertificateRole>().unwrap(), role);
        }
        assert!("router".parse::<CertificateRole>().is_err());
    }

    #[test]
    fn test_identifiers_have_no_whitespace() {
        let server = VpnServer {
            id: 7,
            name: "main gateway".to_string(),
        };
        assert_eq!(server.identifier(), "vpn_server_7_main_gateway");
        assert_eq!(server.owner_ref(), OwnerRef::new("vpn_server", 7));

        let client = VpnClient {
            id: 42,
            name: "ap lobby\t2".to_string(),
        };
        assert_eq!(client.identifier(), "ap_lobby_2");
        assert_eq!(client.role(), CertificateRole::Client);
    }

    #[test]
    fn test_blank_names_give_blank_identifiers() {
        let server = VpnServer {
            id: 7,
            name: " \t".to_string(),
        };
        assert_eq!(server.identifier(), "");

        let client = VpnClient {
            id: 42,
            name: "   ".to_string(),
        };
        assert_eq!(client.identifier(), "");
    }
}
