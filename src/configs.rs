use anyhow::{Context, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;

use crate::certifiable::CertificateRole;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub key_protection: KeyProtectionConfig,
    #[serde(default)]
    pub defaults: IssuanceDefaults,
    #[serde(default)]
    pub crl: CrlConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

fn default_database_path() -> PathBuf {
    PathBuf::from("data/pki.sqlite3")
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct KeyProtectionConfig {
    /// Environment variable holding the passphrase used to encrypt stored
    /// private keys. Keys are stored unencrypted when unset.
    #[serde(default)]
    pub passphrase_env: Option<String>,
}

impl KeyProtectionConfig {
    /// Resolve the passphrase from the environment.
    pub fn passphrase(&self) -> Result<Option<SecretString>> {
        match &self.passphrase_env {
            None => Ok(None),
            Some(var) => {
                let value = std::env::var(var)
                    .context(format!("Key passphrase variable {} is not set", var))?;
                Ok(Some(SecretString::from(value)))
            }
        }
    }
}

/// Digest used for certificate and CRL signatures.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SignatureDigest {
    Sha1,
    #[default]
    Sha256,
    Sha512,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IssuanceDefaults {
    #[serde(default = "default_ca_key_length")]
    pub ca_key_length: u32,
    #[serde(default = "default_certificate_key_length")]
    pub certificate_key_length: u32,
    #[serde(default = "default_ca_validity_days")]
    pub ca_validity_days: u32,
    #[serde(default = "default_server_validity_days")]
    pub server_validity_days: u32,
    #[serde(default = "default_client_validity_days")]
    pub client_validity_days: u32,
    #[serde(default)]
    pub digest: SignatureDigest,
}

impl Default for IssuanceDefaults {
    fn default() -> Self {
        Self {
            ca_key_length: default_ca_key_length(),
            certificate_key_length: default_certificate_key_length(),
            ca_validity_days: default_ca_validity_days(),
            server_validity_days: default_server_validity_days(),
            client_validity_days: default_client_validity_days(),
            digest: SignatureDigest::default(),
        }
    }
}

impl IssuanceDefaults {
    /// Validity used when a caller does not pass one.
    pub fn validity_days_for(&self, role: CertificateRole) -> u32 {
        match role {
            CertificateRole::Ca => self.ca_validity_days,
            CertificateRole::Server => self.server_validity_days,
            CertificateRole::Client => self.client_validity_days,
        }
    }
}

fn default_ca_key_length() -> u32 {
    2048
}

fn default_certificate_key_length() -> u32 {
    1024
}

fn default_ca_validity_days() -> u32 {
    7305 // 20 years
}

fn default_server_validity_days() -> u32 {
    1826 // 5 years
}

fn default_client_validity_days() -> u32 {
    1096 // 3 years
}

/// How `this_update`/`next_update` move when the CRL is rewritten.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum CrlWindow {
    /// `this_update = now`, `next_update = now + next_update_days`.
    #[default]
    Standard,
    /// `this_update = previous next_update`, `next_update = now`.
    LegacyRotation,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CrlConfig {
    #[serde(default)]
    pub window: CrlWindow,
    #[serde(default = "default_next_update_days")]
    pub next_update_days: u32,
}

impl Default for CrlConfig {
    fn default() -> Self {
        Self {
            window: CrlWindow::default(),
            next_update_days: default_next_update_days(),
        }
    }
}

fn default_next_update_days() -> u32 {
    30
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &str) -> Result<Self> {
        let config_str =
            fs::read_to_string(path).context(format!("Failed to read config file: {}", path))?;

        let config: AppConfig =
            toml::from_str(&config_str).context("Failed to parse config file")?;

        Ok(config)
    }

    /// Load configuration with default path (config.toml)
    pub fn load() -> Result<Self> {
        Self::from_file("config.toml")
    }
}
