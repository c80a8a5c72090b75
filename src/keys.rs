//! RSA key generation and at-rest protection of private keys.
//!
//! Keys are persisted as PKCS#8 PEM. With a passphrase configured the PEM is
//! encrypted with AES-256-CBC, otherwise it is stored in the clear.

use anyhow::{anyhow, Context, Result};
use openssl::pkey::{HasPublic, PKey, PKeyRef, Private};
use openssl::symm::Cipher;
use secrecy::{ExposeSecret, SecretString};
use std::fmt;

/// Generate an RSA key pair of `bits` length
pub fn generate_rsa_key(bits: u32) -> Result<PKey<Private>> {
    let rsa = openssl::rsa::Rsa::generate(bits)
        .map_err(|e| anyhow!("Failed to generate RSA keypair: {}", e))?;
    PKey::from_rsa(rsa).map_err(|e| anyhow!("Failed to create private key: {}", e))
}

/// DER encoding of the public half, used to compare keys.
pub fn public_key_der<T: HasPublic>(key: &PKeyRef<T>) -> Result<Vec<u8>> {
    key.public_key_to_der()
        .map_err(|e| anyhow!("Failed to encode public key: {}", e))
}

/// Seals private keys before they reach the store and opens them again when
/// a CA needs to sign.
pub struct KeyProtector {
    passphrase: Option<SecretString>,
}

impl KeyProtector {
    pub fn new(passphrase: Option<SecretString>) -> Self {
        Self { passphrase }
    }

    /// Keys are written as plain PKCS#8 PEM.
    pub fn plaintext() -> Self {
        Self { passphrase: None }
    }

    pub fn is_encrypting(&self) -> bool {
        self.passphrase.is_some()
    }

    pub fn seal(&self, key: &PKeyRef<Private>) -> Result<String> {
        let pem = match &self.passphrase {
            Some(pwd) => key
                .private_key_to_pem_pkcs8_passphrase(
                    Cipher::aes_256_cbc(),
                    pwd.expose_secret().as_bytes(),
                )
                .context("Failed to encrypt private key")?,
            None => key
                .private_key_to_pem_pkcs8()
                .context("Failed to encode private key")?,
        };
        String::from_utf8(pem).context("Private key PEM is not valid UTF-8")
    }

    pub fn open(&self, pem: &str) -> Result<PKey<Private>> {
        match &self.passphrase {
            Some(pwd) => {
                PKey::private_key_from_pem_passphrase(pem.as_bytes(), pwd.expose_secret().as_bytes())
                    .context("Failed to decrypt private key with passphrase")
            }
            None => PKey::private_key_from_pem(pem.as_bytes())
                .context("Failed to parse private key PEM"),
        }
    }
}

impl fmt::Debug for KeyProtector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyProtector")
            .field("encrypting", &self.is_encrypting())
            .finish()
    }
}
