//! Shared OpenVPN material handed out next to the certificates.

use anyhow::{anyhow, Result};
use openssl::dh::Dh;
use openssl::rand::rand_bytes;

pub const DEFAULT_DH_LENGTH: u32 = 1024;
pub const TLS_AUTH_KEY_BITS: usize = 2048;

const TLS_AUTH_LINE_LENGTH: usize = 32;
const TLS_AUTH_HEADER: &str = "-----BEGIN OpenVPN Static key V1-----";
const TLS_AUTH_FOOTER: &str = "-----END OpenVPN Static key V1-----";

/// Diffie-Hellman parameters (generator 2) as PEM.
pub fn generate_dh_params(bits: u32) -> Result<String> {
    let dh = Dh::generate_params(bits, 2)
        .map_err(|e| anyhow!("Failed to generate DH parameters: {}", e))?;
    let pem = dh
        .params_to_pem()
        .map_err(|e| anyhow!("Failed to encode DH parameters: {}", e))?;
    String::from_utf8(pem).map_err(|e| anyhow!("DH parameters PEM is not valid UTF-8: {}", e))
}

/// Random 2048 bit key in OpenVPN static key format, for `tls-auth`.
pub fn generate_tls_auth_key() -> Result<String> {
    let mut key = [0u8; TLS_AUTH_KEY_BITS / 8];
    rand_bytes(&mut key).map_err(|e| anyhow!("Failed to generate tls-auth key: {}", e))?;

    let mut out = String::with_capacity(key.len() * 3 + 80);
    out.push_str(TLS_AUTH_HEADER);
    out.push('\n');
    // two hex digits per byte
    for line in key.chunks(TLS_AUTH_LINE_LENGTH / 2) {
        for byte in line {
            out.push_str(&format!("{:02x}", byte));
        }
        out.push('\n');
    }
    out.push_str(TLS_AUTH_FOOTER);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tls_auth_key_layout() {
        let key = generate_tls_auth_key().unwrap();
        let lines: Vec<&str> = key.lines().collect();

        assert_eq!(lines.len(), 18);
        assert_eq!(lines[0], TLS_AUTH_HEADER);
        assert_eq!(lines[17], TLS_AUTH_FOOTER);
        assert!(!key.ends_with('\n'));
        for line in &lines[1..17] {
            assert_eq!(line.len(), 32);
            assert!(line.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        }
    }

    #[test]
    fn test_tls_auth_keys_differ() {
        assert_ne!(
            generate_tls_auth_key().unwrap(),
            generate_tls_auth_key().unwrap()
        );
    }

    #[test]
    fn test_dh_params_pem() {
        let pem = generate_dh_params(DEFAULT_DH_LENGTH).unwrap();
        assert!(pem.starts_with("-----BEGIN DH PARAMETERS-----"));

        let dh = Dh::params_from_pem(pem.as_bytes()).unwrap();
        assert_eq!(dh.prime_p().num_bits(), 1024);
    }
}
