//! Dev certificate generator - run with `cargo run --manifest-path scripts/Cargo.toml [-- <dir>]`
//!
//! Writes a self-signed localhost certificate to `<dir>/cert.pem` and
//! `<dir>/key.pem` (default `certs`, where the server looks when
//! TLS_CERT_PATH/TLS_KEY_PATH are unset) and prints the hashes viewers need.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use ring::digest::{digest, SHA256};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{Duration, SystemTime};

const DEFAULT_DIR: &str = "certs";

/// WebTransport `serverCertificateHashes` only accepts certificates valid for at most 14 days
const VALIDITY: Duration = Duration::from_secs(14 * 24 * 60 * 60);

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let dir = PathBuf::from(std::env::args().nth(1).unwrap_or_else(|| DEFAULT_DIR.to_string()));
    let cert_file = dir.join("cert.pem");
    let key_file = dir.join("key.pem");

    if cert_file.exists() && key_file.exists() {
        println!("Certificates already exist in {}/", dir.display());
        println!("Delete them first to regenerate (they expire after 14 days).");
        print_hashes(&cert_file)?;
        return Ok(());
    }

    println!("Generating Hamlet development certificate for localhost...\n");
    fs::create_dir_all(&dir)?;

    let mut params = CertificateParams::new(vec!["localhost".to_string(), "127.0.0.1".to_string()])?;
    params.distinguished_name = DistinguishedName::new();
    params.distinguished_name.push(DnType::CommonName, "Hamlet Dev");
    params.distinguished_name.push(DnType::OrganizationName, "Hamlet Development");

    let now = SystemTime::now();
    params.not_before = now.into();
    params.not_after = (now + VALIDITY).into();

    let key_pair = KeyPair::generate()?;
    let cert = params.self_signed(&key_pair)?;

    fs::write(&cert_file, cert.pem())?;
    fs::write(&key_file, key_pair.serialize_pem())?;

    println!("Certificate: {}", cert_file.display());
    println!("Private key: {}\n", key_file.display());

    print_hashes(&cert_file)
}

fn print_hashes(cert_file: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let pem = pem::parse(fs::read_to_string(cert_file)?)?;

    // Same value the server logs at startup
    let cert_hash = STANDARD.encode(digest(&SHA256, pem.contents()).as_ref());
    let spki_hash = spki_hash(cert_file).unwrap_or_else(|_| cert_hash.clone());

    println!("Viewer certificate hash (serverCertificateHashes):");
    println!("  HAMLET_CERT_HASH={}\n", cert_hash);
    println!("Chrome flag:");
    println!("  --ignore-certificate-errors-spki-list={}", spki_hash);

    Ok(())
}

/// SHA-256 of the SubjectPublicKeyInfo, via openssl
fn spki_hash(cert_file: &Path) -> Result<String, Box<dyn std::error::Error>> {
    let output = Command::new("sh")
        .arg("-c")
        .arg(format!(
            "openssl x509 -in {} -pubkey -noout 2>/dev/null | openssl pkey -pubin -outform der 2>/dev/null | openssl dgst -sha256 -binary | base64",
            cert_file.display()
        ))
        .output()?;

    if output.status.success() {
        Ok(String::from_utf8(output.stdout)?.trim().to_string())
    } else {
        Err("openssl failed to compute the SPKI hash".into())
    }
}
