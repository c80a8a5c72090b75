//! Wisp PKI - administrative console
//!
//! Interactive menu over the [`PkiEngine`]: create certificate authorities,
//! issue VPN server and client certificates, revoke, renew and reissue them,
//! inspect CRLs and generate the shared OpenVPN material.
//!
//! Settings are read from `config.toml` when present (see
//! [`wisp_pki::configs::AppConfig`]); log verbosity follows `RUST_LOG`.

use anyhow::{anyhow, Context, Result};
use std::io::{self, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use wisp_pki::certifiable::{Certifiable, VpnClient, VpnServer};
use wisp_pki::certificate_authority::{CertificateStatus, NewCertificateAuthority, PkiEngine};
use wisp_pki::certificate_details::CertificateDetails;
use wisp_pki::configs::AppConfig;
use wisp_pki::crl::RevocationReason;
use wisp_pki::distinguished_name::DistinguishedName;
use wisp_pki::issuance::IssueOptions;
use wisp_pki::openvpn::{generate_dh_params, generate_tls_auth_key, DEFAULT_DH_LENGTH};
use wisp_pki::store::CertificateRecord;

const CONFIG_PATH: &str = "config.toml";

fn main() -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(io::stderr)
        .init();

    println!("=== Wisp PKI ===\n");

    let config = if Path::new(CONFIG_PATH).exists() {
        AppConfig::from_file(CONFIG_PATH)?
    } else {
        warn!("{} not found, using defaults", CONFIG_PATH);
        AppConfig::default()
    };
    let engine = PkiEngine::from_config(&config).context("Failed to open PKI engine")?;
    println!("✓ Database: {}", config.database.path.display());

    loop {
        println!("\n=== Wisp PKI Menu ===");
        println!("1. Create certificate authority");
        println!("2. List certificate authorities");
        println!("3. Issue VPN client certificate");
        println!("4. Issue VPN server certificate");
        println!("5. Revoke certificate");
        println!("6. Renew certificate");
        println!("7. Reissue certificate");
        println!("8. Show CRL");
        println!("9. Verify certificate");
        println!("10. Generate OpenVPN DH parameters and tls-auth key");
        println!("11. Exit");
        let choice = prompt("\nSelect an option")?;

        let outcome = match choice.as_str() {
            "1" => create_ca(&engine),
            "2" => list_cas(&engine),
            "3" => issue(&engine, false),
            "4" => issue(&engine, true),
            "5" => revoke(&engine),
            "6" => renew(&engine),
            "7" => reissue(&engine),
            "8" => show_crl(&engine),
            "9" => verify(&engine),
            "10" => openvpn_material(),
            "11" => {
                println!("\nExiting Wisp PKI...");
                break;
            }
            _ => {
                println!("Invalid option. Please select 1-11.");
                Ok(())
            }
        };
        if let Err(e) = outcome {
            println!("✗ {:#}", e);
        }
    }

    Ok(())
}

fn prompt(label: &str) -> Result<String> {
    print!("{}: ", label);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

fn prompt_id(label: &str) -> Result<i64> {
    let value = prompt(label)?;
    value
        .parse()
        .map_err(|_| anyhow!("'{}' is not a valid id", value))
}

fn prompt_optional_u32(label: &str) -> Result<Option<u32>> {
    let value = prompt(label)?;
    if value.is_empty() {
        return Ok(None);
    }
    value
        .parse()
        .map(Some)
        .map_err(|_| anyhow!("'{}' is not a positive number", value))
}

fn unix_seconds(at: SystemTime) -> u64 {
    at.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

fn print_certificate(record: &CertificateRecord) -> Result<()> {
    let details = CertificateDetails::from_pem(&record.certificate_pem)?;
    println!("  Certificate #{} ({})", record.id, record.role);
    println!("    DN:        {}", record.dn);
    println!("    Issuer:    {}", details.issuer);
    println!("    Serial:    {}", record.serial);
    println!(
        "    Validity:  {} .. {} (unix)",
        unix_seconds(details.not_before),
        unix_seconds(details.not_after)
    );
    println!("    Revoked:   {}", record.revoked);
    Ok(())
}

fn create_ca(engine: &PkiEngine) -> Result<()> {
    println!("\n=== Create Certificate Authority ===");
    let identity = DistinguishedName {
        country: prompt("Country (2 letters)")?,
        state: prompt("State")?,
        locality: prompt("Locality")?,
        organization: prompt("Organization")?,
        common_name: prompt("Common name")?,
    };
    let domain = prompt("Network domain (empty for none)")?;

    let mut new = NewCertificateAuthority::new(identity);
    if !domain.is_empty() {
        new = new.with_domain(domain);
    }
    let ca = engine.create_ca(new)?;
    println!("✓ Certificate authority {} created: {}", ca.id, ca.dn());
    print_certificate(&engine.root_certificate(ca.id)?)?;
    Ok(())
}

fn list_cas(engine: &PkiEngine) -> Result<()> {
    println!("\n=== Certificate Authorities ===");
    let cas = engine.list_cas()?;
    if cas.is_empty() {
        println!("No certificate authorities yet.");
        return Ok(());
    }
    for ca in cas {
        let issued = engine.certificates_for_ca(ca.id)?.len();
        println!(
            "[{}] {} (identifier {}, serial {}, {} certificates{})",
            ca.id,
            ca.dn(),
            ca.identifier(),
            ca.serial,
            issued,
            ca.domain
                .as_deref()
                .map(|d| format!(", domain {}", d))
                .unwrap_or_default()
        );
    }
    Ok(())
}

fn issue(engine: &PkiEngine, server: bool) -> Result<()> {
    println!("\n=== Issue VPN {} Certificate ===", if server { "Server" } else { "Client" });
    let ca_id = prompt_id("CA id")?;
    let id = prompt_id("Owner id")?;
    let name = prompt("Owner name")?;
    let options = IssueOptions {
        validity_days: prompt_optional_u32("Validity in days (empty for default)")?,
        key_length: prompt_optional_u32("Key length in bits (empty for default)")?,
    };

    let owner: Box<dyn Certifiable> = if server {
        Box::new(VpnServer { id, name })
    } else {
        Box::new(VpnClient { id, name })
    };
    let record = engine.issue_certificate(ca_id, owner.as_ref(), options)?;
    println!("✓ Certificate issued");
    print_certificate(&record)
}

fn revoke(engine: &PkiEngine) -> Result<()> {
    println!("\n=== Revoke Certificate ===");
    let cert_id = prompt_id("Certificate id")?;
    let reason = prompt("Reason code (empty for key compromise)")?;
    let reason = if reason.is_empty() {
        None
    } else {
        let code: u8 = reason
            .parse()
            .map_err(|_| anyhow!("'{}' is not a reason code", reason))?;
        Some(RevocationReason::try_from(code)?)
    };
    let record = engine.revoke_certificate(cert_id, reason)?;
    println!("✓ Certificate {} revoked (serial {})", record.id, record.serial);
    Ok(())
}

fn renew(engine: &PkiEngine) -> Result<()> {
    println!("\n=== Renew Certificate ===");
    let cert_id = prompt_id("Certificate id")?;
    let validity = prompt_optional_u32("Validity in days (empty for default)")?;
    let record = engine.renew_certificate(cert_id, validity)?;
    println!("✓ Certificate renewed");
    print_certificate(&record)
}

fn reissue(engine: &PkiEngine) -> Result<()> {
    println!("\n=== Reissue Certificate ===");
    let cert_id = prompt_id("Certificate id")?;
    let options = IssueOptions {
        validity_days: prompt_optional_u32("Validity in days (empty for default)")?,
        key_length: prompt_optional_u32("Key length in bits (empty for default)")?,
    };
    let record = engine.reissue_certificate(cert_id, options)?;
    println!("✓ Certificate reissued");
    print_certificate(&record)
}

fn show_crl(engine: &PkiEngine) -> Result<()> {
    println!("\n=== Certificate Revocation List ===");
    let ca_id = prompt_id("CA id")?;
    let ca = engine.find_ca(ca_id)?;
    let Some(crl) = ca.revocation_list()? else {
        println!("No certificates revoked by {} yet.", ca.dn());
        return Ok(());
    };

    println!("Issuer:      {}", crl.issuer()?);
    println!("This update: {} (unix)", unix_seconds(crl.this_update()));
    if let Some(next_update) = crl.next_update() {
        println!("Next update: {} (unix)", unix_seconds(next_update));
    }
    for entry in crl.entries()? {
        println!(
            "  serial {} revoked at {} reason {}",
            entry.serial,
            unix_seconds(entry.revoked_at),
            entry
                .reason
                .map(|r| r.to_string())
                .unwrap_or_else(|| "-".to_string())
        );
    }
    if let Some(pem) = &ca.crl {
        println!("\n{}", pem);
    }
    Ok(())
}

fn verify(engine: &PkiEngine) -> Result<()> {
    println!("\n=== Verify Certificate ===");
    let cert_id = prompt_id("Certificate id")?;
    match engine.verify_certificate(cert_id)? {
        CertificateStatus::Valid => println!("✓ Certificate {} is valid", cert_id),
        CertificateStatus::Revoked => println!("✗ Certificate {} is revoked", cert_id),
        CertificateStatus::Invalid(reason) => {
            println!("✗ Certificate {} is invalid: {}", cert_id, reason)
        }
    }
    Ok(())
}

fn openvpn_material() -> Result<()> {
    println!("\n=== OpenVPN Material ===");
    let bits = prompt_optional_u32("DH length in bits (empty for 1024)")?.unwrap_or(DEFAULT_DH_LENGTH);
    println!("Generating DH parameters, this may take a while...");
    println!("{}", generate_dh_params(bits)?);
    println!("{}", generate_tls_auth_key()?);
    Ok(())
}
