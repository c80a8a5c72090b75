//! Slash-separated distinguished names (`/C=../ST=../L=../O=../CN=..`) and
//! their conversion to and from X.509 names.

use anyhow::{anyhow, bail, Result};
use openssl::nid::Nid;
use openssl::x509::{X509Name, X509NameRef};
use std::fmt;

/// Maximum length of a CN component inside an X.509 name (ub-common-name).
pub const MAX_COMMON_NAME_LENGTH: usize = 64;

/// The five identity components every CA and issued certificate carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistinguishedName {
    pub country: String,
    pub state: String,
    pub locality: String,
    pub organization: String,
    pub common_name: String,
}

impl DistinguishedName {
    /// Everything but the CN: `/C=../ST=../L=../O=..`
    pub fn prefix(&self) -> String {
        format!(
            "/C={}/ST={}/L={}/O={}",
            self.country, self.state, self.locality, self.organization
        )
    }

    /// Same C/ST/L/O with another CN.
    pub fn with_common_name(&self, common_name: &str) -> Self {
        Self {
            common_name: common_name.to_string(),
            ..self.clone()
        }
    }

    pub(crate) fn components(&self) -> [(&'static str, Nid, &str); 5] {
        [
            ("c", Nid::COUNTRYNAME, &self.country),
            ("st", Nid::STATEORPROVINCENAME, &self.state),
            ("l", Nid::LOCALITYNAME, &self.locality),
            ("o", Nid::ORGANIZATIONNAME, &self.organization),
            ("cn", Nid::COMMONNAME, &self.common_name),
        ]
    }

    /// Parse `/C=US/ST=CA/L=SF/O=OpenWISP/CN=Root`.
    pub fn parse(dn: &str) -> Result<Self> {
        let mut country = None;
        let mut state = None;
        let mut locality = None;
        let mut organization = None;
        let mut common_name = None;

        for component in dn.split('/').filter(|c| !c.is_empty()) {
            let (key, value) = component
                .split_once('=')
                .ok_or_else(|| anyhow!("Malformed DN component '{}' in {}", component, dn))?;
            let slot = match key {
                "C" => &mut country,
                "ST" => &mut state,
                "L" => &mut locality,
                "O" => &mut organization,
                "CN" => &mut common_name,
                other => bail!("Unsupported DN attribute '{}' in {}", other, dn),
            };
            *slot = Some(value.to_string());
        }

        let missing = |name: &str| anyhow!("DN {} has no {} component", dn, name);
        Ok(Self {
            country: country.ok_or_else(|| missing("C"))?,
            state: state.ok_or_else(|| missing("ST"))?,
            locality: locality.ok_or_else(|| missing("L"))?,
            organization: organization.ok_or_else(|| missing("O"))?,
            common_name: common_name.ok_or_else(|| missing("CN"))?,
        })
    }

    /// Build the X.509 name, keeping the C, ST, L, O, CN order.
    pub fn to_x509_name(&self) -> Result<X509Name> {
        let mut name_builder =
            X509Name::builder().map_err(|e| anyhow!("Failed to create name builder: {}", e))?;
        for (field, nid, value) in self.components() {
            name_builder
                .append_entry_by_nid(nid, value)
                .map_err(|e| anyhow!("Failed to set {}: {}", field, e))?;
        }
        Ok(name_builder.build())
    }
}

impl fmt::Display for DistinguishedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/CN={}", self.prefix(), self.common_name)
    }
}

/// Render an X.509 name in slash form using the short attribute names.
pub fn x509_name_to_string(name: &X509NameRef) -> Result<String> {
    let mut out = String::new();
    for entry in name.entries() {
        let short_name = entry
            .object()
            .nid()
            .short_name()
            .map_err(|e| anyhow!("Unknown name attribute: {}", e))?;
        let value = std::str::from_utf8(entry.data().as_slice())
            .map_err(|e| anyhow!("Failed to decode {} value: {}", short_name, e))?;
        out.push('/');
        out.push_str(short_name);
        out.push('=');
        out.push_str(value);
    }
    Ok(out)
}

/// Check that `value` can stand alone as the CN of an issued certificate.
pub fn check_common_name_component(value: &str) -> Result<(), &'static str> {
    if value.trim().is_empty() {
        return Err("is blank");
    }
    if value.chars().count() > MAX_COMMON_NAME_LENGTH {
        return Err("is longer than 64 characters");
    }
    if value.chars().any(char::is_whitespace) {
        return Err("contains whitespace");
    }
    if value
        .chars()
        .any(|c| c.is_control() || matches!(c, '/' | '=' | ',' | '+' | '"' | '\\' | '<' | '>' | ';'))
    {
        return Err("contains characters reserved in distinguished names");
    }
    Ok(())
}

/// Try encoding a single attribute so encoding limits surface per field.
pub(crate) fn check_encodable(nid: Nid, value: &str) -> Result<()> {
    let mut name_builder =
        X509Name::builder().map_err(|e| anyhow!("Failed to create name builder: {}", e))?;
    name_builder
        .append_entry_by_nid(nid, value)
        .map_err(|e| anyhow!("{}", e))?;
    Ok(())
}
