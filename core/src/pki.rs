//! Certificate lifecycle for the daemon's TLS endpoint.
//!
//! One CA per store signs a client certificate (shared by every host) and a
//! server certificate per host carrying the host address as SAN. Existing
//! server material is checked with [`validate`] and regenerated in place by
//! [`ensure_server_cert`] when it no longer fits.
//!
//! Every pair is written next to its destination first and renamed into
//! place only when both halves are on disk, so a failed run never leaves a
//! certificate without its key.

use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rackctl_common::host::CertificateBundle;
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DistinguishedName, DnType, DnValue,
    ExtendedKeyUsagePurpose, Ia5String, IsCa, KeyPair, KeyUsagePurpose, SanType, SignatureAlgorithm,
};
use thiserror::Error;
use tracing::{debug, info};
use x509_parser::pem::parse_x509_pem;
use time::OffsetDateTime;
use x509_parser::prelude::{GeneralName, X509Certificate};

const CA_VALIDITY: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);
const LEAF_VALIDITY: Duration = Duration::from_secs(3 * 365 * 24 * 60 * 60);
const CLOCK_SKEW: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Error)]
pub enum PkiError {
    #[error("CA material missing: {0}")]
    CaMissing(PathBuf),

    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    #[error("certificate generation failed: {0}")]
    Generation(String),

    #[error("certificate parsing error: {0}")]
    Parse(String),

    #[error("invalid subject alternative name '{0}'")]
    InvalidName(String),

    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, PkiError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LeafKind {
    Server,
    Client,
}

/// Key algorithm for a requested key size.
pub fn signature_algorithm(key_bits: u32) -> &'static SignatureAlgorithm {
    match key_bits {
        384 => &rcgen::PKCS_ECDSA_P384_SHA384,
        _ => &rcgen::PKCS_ECDSA_P256_SHA256,
    }
}

/// Creates the CA and the shared client certificate when they are missing.
///
/// Existing material is left untouched. Returns `true` if anything was written.
pub fn ensure_authority(bundle: &CertificateBundle, organization: &str, key_bits: u32) -> Result<bool> {
    let mut created = false;

    if !bundle.ca_cert.exists() || !bundle.ca_key.exists() {
        info!("Creating CA: {}", bundle.ca_cert.display());
        generate_ca(&bundle.ca_cert, &bundle.ca_key, organization, key_bits)?;
        created = true;
    }

    if !bundle.client_cert.exists() || !bundle.client_key.exists() {
        info!("Creating client certificate: {}", bundle.client_cert.display());
        generate_leaf(
            LeafKind::Client,
            &[],
            organization,
            &bundle.client_cert,
            &bundle.client_key,
            &bundle.ca_cert,
            &bundle.ca_key,
            organization,
            key_bits,
        )?;
        created = true;
    }

    Ok(created)
}

/// Issues a server certificate for `subject`, creating the CA first if absent.
pub fn generate(bundle: &CertificateBundle, subject: &str, organization: &str, key_bits: u32) -> Result<()> {
    if !bundle.ca_cert.exists() || !bundle.ca_key.exists() {
        generate_ca(&bundle.ca_cert, &bundle.ca_key, organization, key_bits)?;
    }
    generate_cert(
        &[subject.to_string()],
        &bundle.server_cert,
        &bundle.server_key,
        &bundle.ca_cert,
        &bundle.ca_key,
        organization,
        key_bits,
    )
}

/// Issues a server certificate for `hosts`, signed by an existing CA.
///
/// The first host becomes the common name; every host is added as an IP or
/// DNS alternative name.
pub fn generate_cert(
    hosts: &[String],
    cert_out: &Path,
    key_out: &Path,
    ca_cert: &Path,
    ca_key: &Path,
    organization: &str,
    key_bits: u32,
) -> Result<()> {
    let common_name = hosts.first().map(String::as_str).unwrap_or(organization);
    generate_leaf(
        LeafKind::Server,
        hosts,
        common_name,
        cert_out,
        key_out,
        ca_cert,
        ca_key,
        organization,
        key_bits,
    )
}

/// Validates the server pair and regenerates it when invalid.
///
/// Returns `true` when new material was written.
pub fn ensure_server_cert(bundle: &CertificateBundle, host: &str, organization: &str, key_bits: u32) -> Result<bool> {
    if validate(host, &bundle.ca_cert, &bundle.server_cert, &bundle.server_key) {
        debug!("Server certificate for {host} is valid");
        return Ok(false);
    }

    info!("Generating server certificate for {host}");
    generate(bundle, host, organization, key_bits)?;
    Ok(true)
}

/// Checks that the server certificate is signed by the CA, lists `host` as an
/// alternative name, is within its validity period and matches its key.
///
/// Missing or unreadable files count as invalid.
pub fn validate(host: &str, ca_cert: &Path, server_cert: &Path, server_key: &Path) -> bool {
    let read = |path: &Path| fs::read(path).ok();
    let (Some(ca), Some(cert), Some(key)) = (read(ca_cert), read(server_cert), read(server_key)) else {
        debug!("Server certificate material incomplete for {host}");
        return false;
    };

    match check_certificate(host, &ca, &cert, &key) {
        Ok(()) => true,
        Err(reason) => {
            debug!("Server certificate rejected for {host}: {reason}");
            false
        }
    }
}

/// Pure validation over PEM bytes; the error names the first failed check.
pub fn check_certificate(
    host: &str,
    ca_pem: &[u8],
    cert_pem: &[u8],
    key_pem: &[u8],
) -> std::result::Result<(), String> {
    let (_, ca_block) = parse_x509_pem(ca_pem).map_err(|e| format!("CA is not PEM: {e}"))?;
    let ca = ca_block
        .parse_x509()
        .map_err(|e| format!("CA is not a certificate: {e}"))?;

    let (_, cert_block) = parse_x509_pem(cert_pem).map_err(|e| format!("certificate is not PEM: {e}"))?;
    let cert = cert_block
        .parse_x509()
        .map_err(|e| format!("not a certificate: {e}"))?;

    cert.verify_signature(Some(ca.public_key()))
        .map_err(|_| String::from("not signed by the CA"))?;

    if !cert.validity().is_valid() {
        return Err(String::from("outside its validity period"));
    }

    if !san_contains(&cert, host)? {
        return Err(format!("{host} is not among its alternative names"));
    }

    let key_pem = std::str::from_utf8(key_pem).map_err(|_| String::from("key is not text"))?;
    let key = KeyPair::from_pem(key_pem).map_err(|e| format!("key is unreadable: {e}"))?;
    if key.public_key_raw() != &*cert.public_key().subject_public_key.data {
        return Err(String::from("key does not match certificate"));
    }

    Ok(())
}

fn san_contains(cert: &X509Certificate<'_>, host: &str) -> std::result::Result<bool, String> {
    let Some(san) = cert
        .subject_alternative_name()
        .map_err(|e| format!("bad alternative name extension: {e}"))?
    else {
        return Ok(false);
    };

    let wanted_ip = host.parse::<IpAddr>().ok();
    Ok(san.value.general_names.iter().any(|name| match (name, wanted_ip) {
        (GeneralName::IPAddress(bytes), Some(IpAddr::V4(ip))) => *bytes == ip.octets(),
        (GeneralName::IPAddress(bytes), Some(IpAddr::V6(ip))) => *bytes == ip.octets(),
        (GeneralName::DNSName(dns), None) => dns.eq_ignore_ascii_case(host),
        _ => false,
    }))
}

fn generate_ca(cert_out: &Path, key_out: &Path, organization: &str, key_bits: u32) -> Result<()> {
    let mut params = CertificateParams::default();
    params.distinguished_name = distinguished_name(organization, organization);
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
        KeyUsagePurpose::DigitalSignature,
    ];
    set_validity(&mut params, CA_VALIDITY);

    let key = KeyPair::generate_for(signature_algorithm(key_bits))
        .map_err(|e| PkiError::KeyGeneration(format!("failed to generate CA key: {e}")))?;
    let cert = params
        .self_signed(&key)
        .map_err(|e| PkiError::Generation(format!("failed to create CA cert: {e}")))?;

    write_pair(cert_out, &cert.pem(), key_out, &key.serialize_pem())
}

#[allow(clippy::too_many_arguments)]
fn generate_leaf(
    kind: LeafKind,
    hosts: &[String],
    common_name: &str,
    cert_out: &Path,
    key_out: &Path,
    ca_cert: &Path,
    ca_key: &Path,
    organization: &str,
    key_bits: u32,
) -> Result<()> {
    let (issuer, issuer_key) = load_ca(ca_cert, ca_key)?;

    let mut params = CertificateParams::default();
    params.distinguished_name = distinguished_name(common_name, organization);
    params.subject_alt_names = hosts
        .iter()
        .map(|host| subject_alt_name(host))
        .collect::<Result<Vec<_>>>()?;
    params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
    params.extended_key_usages = match kind {
        LeafKind::Server => vec![ExtendedKeyUsagePurpose::ServerAuth],
        LeafKind::Client => vec![ExtendedKeyUsagePurpose::ClientAuth],
    };
    set_validity(&mut params, LEAF_VALIDITY);

    let key = KeyPair::generate_for(signature_algorithm(key_bits))
        .map_err(|e| PkiError::KeyGeneration(format!("failed to generate key: {e}")))?;
    let cert = params
        .signed_by(&key, &issuer, &issuer_key)
        .map_err(|e| PkiError::Generation(format!("failed to sign certificate: {e}")))?;

    debug!("Writing {:?} certificate {}", kind, cert_out.display());
    write_pair(cert_out, &cert.pem(), key_out, &key.serialize_pem())
}

/// Rebuilds a signing handle from the stored CA certificate and key.
fn load_ca(ca_cert: &Path, ca_key: &Path) -> Result<(Certificate, KeyPair)> {
    let cert_pem = fs::read_to_string(ca_cert).map_err(|_| PkiError::CaMissing(ca_cert.to_path_buf()))?;
    let key_pem = fs::read_to_string(ca_key).map_err(|_| PkiError::CaMissing(ca_key.to_path_buf()))?;

    let key = KeyPair::from_pem(&key_pem)
        .map_err(|e| PkiError::Parse(format!("failed to parse CA key: {e}")))?;
    let params = CertificateParams::from_ca_cert_pem(&cert_pem)
        .map_err(|e| PkiError::Parse(format!("failed to parse CA cert: {e}")))?;
    let cert = params
        .self_signed(&key)
        .map_err(|e| PkiError::Generation(format!("failed to load CA for signing: {e}")))?;

    Ok((cert, key))
}

fn distinguished_name(common_name: &str, organization: &str) -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, DnValue::Utf8String(common_name.to_string()));
    dn.push(DnType::OrganizationName, DnValue::Utf8String(organization.to_string()));
    dn
}

fn subject_alt_name(host: &str) -> Result<SanType> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(SanType::IpAddress(ip));
    }
    let dns = Ia5String::try_from(host.to_string()).map_err(|_| PkiError::InvalidName(host.to_string()))?;
    Ok(SanType::DnsName(dns))
}

fn set_validity(params: &mut CertificateParams, lifetime: Duration) {
    let now = OffsetDateTime::now_utc();
    params.not_before = now - CLOCK_SKEW;
    params.not_after = now + lifetime;
}

/// Writes both halves to temporary siblings, then renames them into place.
///
/// The previous key is kept aside until the certificate has landed and is put
/// back if it does not, so the pair on disk always belongs together.
fn write_pair(cert_out: &Path, cert_pem: &str, key_out: &Path, key_pem: &str) -> Result<()> {
    let cert_tmp = staging_path(cert_out, "tmp");
    let key_tmp = staging_path(key_out, "tmp");
    let discard_staged = || {
        let _ = fs::remove_file(&cert_tmp);
        let _ = fs::remove_file(&key_tmp);
    };

    let staged = stage(&cert_tmp, cert_pem)
        .and_then(|_| stage(&key_tmp, key_pem))
        .and_then(|_| restrict_permissions(&key_tmp));
    if let Err(e) = staged {
        discard_staged();
        return Err(e);
    }

    let previous_key = staging_path(key_out, "old");
    let had_key = key_out.is_file();
    if had_key {
        if let Err(source) = fs::rename(key_out, &previous_key) {
            discard_staged();
            return Err(PkiError::Io {
                path: key_out.to_path_buf(),
                source,
            });
        }
    }
    let restore_key = || {
        if had_key {
            let _ = fs::rename(&previous_key, key_out);
        } else {
            let _ = fs::remove_file(key_out);
        }
    };

    if let Err(source) = fs::rename(&key_tmp, key_out) {
        restore_key();
        discard_staged();
        return Err(PkiError::Io {
            path: key_out.to_path_buf(),
            source,
        });
    }
    if let Err(source) = fs::rename(&cert_tmp, cert_out) {
        restore_key();
        discard_staged();
        return Err(PkiError::Io {
            path: cert_out.to_path_buf(),
            source,
        });
    }

    if had_key {
        let _ = fs::remove_file(&previous_key);
    }
    Ok(())
}

fn stage(path: &Path, contents: &str) -> Result<()> {
    let io_err = |source| PkiError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).map_err(io_err)?;
    }
    fs::write(path, contents).map_err(io_err)
}

fn staging_path(path: &Path, extension: &str) -> PathBuf {
    let mut staged = path.as_os_str().to_owned();
    staged.push(".");
    staged.push(extension);
    PathBuf::from(staged)
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|source| PkiError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

// ╔════════════════════════════════════════════╗
// ║ ████████╗███████╗███████╗████████╗███████╗ ║
// ║ ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝ ║
// ║    ██║   █████╗  ███████╗   ██║   ███████╗ ║
// ║    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║ ║
// ║    ██║   ███████╗███████║   ██║   ███████║ ║
// ║    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝ ║
// ╚════════════════════════════════════════════╝

#[cfg(test)]
mod tests {
    use super::*;

    fn bundle(root: &Path) -> CertificateBundle {
        CertificateBundle::for_host(&root.join("certs"), &root.join("machines").join("rack-0-t-1"))
    }

    #[test]
    fn generated_certificate_validates_for_its_ip() {
        let dir = tempfile::tempdir().unwrap();
        let b = bundle(dir.path());

        generate(&b, "10.0.0.1", "rack-0-t-1", 256).unwrap();

        assert!(validate("10.0.0.1", &b.ca_cert, &b.server_cert, &b.server_key));
        assert!(!validate("10.0.0.2", &b.ca_cert, &b.server_cert, &b.server_key));
    }

    #[test]
    fn p384_keys_are_supported() {
        let dir = tempfile::tempdir().unwrap();
        let b = bundle(dir.path());

        generate(&b, "10.0.0.9", "org", 384).unwrap();
        assert!(validate("10.0.0.9", &b.ca_cert, &b.server_cert, &b.server_key));
    }

    #[test]
    fn dns_names_are_matched() {
        let dir = tempfile::tempdir().unwrap();
        let b = bundle(dir.path());

        generate(&b, "node1.lab", "org", 256).unwrap();
        assert!(validate("NODE1.lab", &b.ca_cert, &b.server_cert, &b.server_key));
        assert!(!validate("node2.lab", &b.ca_cert, &b.server_cert, &b.server_key));
    }

    #[test]
    fn missing_material_is_invalid_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let b = bundle(dir.path());
        assert!(!validate("10.0.0.1", &b.ca_cert, &b.server_cert, &b.server_key));
    }

    #[test]
    fn certificate_from_another_ca_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let b = bundle(dir.path());
        generate(&b, "10.0.0.1", "org", 256).unwrap();

        let other = tempfile::tempdir().unwrap();
        let other_bundle = bundle(other.path());
        ensure_authority(&other_bundle, "other", 256).unwrap();

        assert!(!validate("10.0.0.1", &other_bundle.ca_cert, &b.server_cert, &b.server_key));
    }

    #[test]
    fn mismatched_key_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let b = bundle(dir.path());
        ensure_authority(&b, "org", 256).unwrap();
        generate(&b, "10.0.0.1", "org", 256).unwrap();

        let ca = fs::read(&b.ca_cert).unwrap();
        let cert = fs::read(&b.server_cert).unwrap();
        let foreign_key = fs::read(&b.client_key).unwrap();

        let err = check_certificate("10.0.0.1", &ca, &cert, &foreign_key).unwrap_err();
        assert!(err.contains("does not match"), "{err}");
    }

    #[test]
    fn validation_is_pure_over_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let b = bundle(dir.path());
        generate(&b, "192.168.4.20", "org", 256).unwrap();

        let ca = fs::read(&b.ca_cert).unwrap();
        let cert = fs::read(&b.server_cert).unwrap();
        let key = fs::read(&b.server_key).unwrap();

        for _ in 0..2 {
            assert_eq!(check_certificate("192.168.4.20", &ca, &cert, &key), Ok(()));
        }
        assert!(check_certificate("192.168.4.20", b"junk", &cert, &key).is_err());
    }

    #[test]
    fn ensure_server_cert_regenerates_only_when_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let b = bundle(dir.path());

        assert!(ensure_server_cert(&b, "10.0.0.1", "org", 256).unwrap());
        let first = fs::read_to_string(&b.server_cert).unwrap();

        assert!(!ensure_server_cert(&b, "10.0.0.1", "org", 256).unwrap());
        assert_eq!(fs::read_to_string(&b.server_cert).unwrap(), first);

        // Address changed: same paths get fresh material.
        assert!(ensure_server_cert(&b, "10.0.0.5", "org", 256).unwrap());
        assert_ne!(fs::read_to_string(&b.server_cert).unwrap(), first);
        assert!(validate("10.0.0.5", &b.ca_cert, &b.server_cert, &b.server_key));
    }

    #[test]
    fn authority_is_created_once() {
        let dir = tempfile::tempdir().unwrap();
        let b = bundle(dir.path());

        assert!(ensure_authority(&b, "org", 256).unwrap());
        let ca = fs::read_to_string(&b.ca_cert).unwrap();
        assert!(!ensure_authority(&b, "org", 256).unwrap());
        assert_eq!(fs::read_to_string(&b.ca_cert).unwrap(), ca);
    }

    #[test]
    fn generation_without_ca_fails_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let b = bundle(dir.path());

        let err = generate_cert(
            &["10.0.0.1".to_string()],
            &b.server_cert,
            &b.server_key,
            &b.ca_cert,
            &b.ca_key,
            "org",
            256,
        )
        .unwrap_err();

        assert!(matches!(err, PkiError::CaMissing(_)));
        assert!(!b.server_cert.exists());
        assert!(!staging_path(&b.server_cert, "tmp").exists());
    }

    #[test]
    fn failed_certificate_swap_puts_the_previous_key_back() {
        let dir = tempfile::tempdir().unwrap();
        let b = bundle(dir.path());
        generate(&b, "10.0.0.1", "org", 256).unwrap();
        let old_key = fs::read_to_string(&b.server_key).unwrap();

        // A non-empty directory in the certificate's place makes its rename fail.
        let blocked = dir.path().join("blocked.pem");
        fs::create_dir_all(blocked.join("inner")).unwrap();

        let err = write_pair(&blocked, "CERT", &b.server_key, "NEW KEY").unwrap_err();

        assert!(matches!(err, PkiError::Io { ref path, .. } if *path == blocked));
        assert_eq!(fs::read_to_string(&b.server_key).unwrap(), old_key);
        assert!(!staging_path(&b.server_key, "old").exists());
        assert!(!staging_path(&b.server_key, "tmp").exists());
        assert!(!staging_path(&blocked, "tmp").exists());
    }
}
