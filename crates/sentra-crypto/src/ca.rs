//! Certificate authority for device and broker identity.
//!
//! A self-signed RSA-2048 root is created on first use and persisted as
//! `ca.key`/`ca.crt` under the configured certificate directory. Server
//! (broker) and client (device) leaf certificates are signed by that root.
//!
//! Verification here checks validity bounds only; revocation state lives
//! in the database and is layered on top by the identity service.

use std::net::IpAddr;
use std::path::{Path, PathBuf};

use rcgen::{
    BasicConstraints, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa, Issuer, KeyPair,
    KeyUsagePurpose, SanType, SerialNumber,
};
use rsa::RsaPrivateKey;
use rsa::pkcs8::EncodePrivateKey;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;
use x509_parser::prelude::{FromDer, X509Certificate, parse_x509_pem};

use crate::error::CaError;

const ROOT_VALIDITY_DAYS: i64 = 3650;
const RSA_KEY_BITS: usize = 2048;

const ROOT_SAN: &str = "sentra-ca.local";

const CA_KEY_FILE: &str = "ca.key";
const CA_CERT_FILE: &str = "ca.crt";
const SERVER_KEY_FILE: &str = "server.key";
const SERVER_CERT_FILE: &str = "server.crt";

/// A signed leaf certificate together with its private key.
pub struct IssuedCertificate {
    /// Human-auditable serial recorded alongside the certificate.
    pub serial: String,
    pub cert_pem: String,
    pub key_pem: String,
    pub ca_cert_pem: String,
    pub not_before: i64,
    pub not_after: i64,
}

/// Result of checking a certificate against its validity window.
pub struct CertVerification {
    pub valid: bool,
    pub reason: Option<String>,
    pub subject: String,
    pub not_before: i64,
    pub not_after: i64,
}

/// Root CA with on-disk persistence.
#[derive(Debug)]
pub struct CertificateAuthority {
    cert_dir: PathBuf,
    key_pair: KeyPair,
    cert_pem: String,
    org_name: String,
}

impl CertificateAuthority {
    /// Load the root identity from `cert_dir`, creating it if absent.
    pub fn load_or_create(cert_dir: &Path, org_name: &str) -> Result<Self, CaError> {
        std::fs::create_dir_all(cert_dir).map_err(|source| CaError::Io {
            path: cert_dir.to_path_buf(),
            source,
        })?;

        let key_path = cert_dir.join(CA_KEY_FILE);
        let cert_path = cert_dir.join(CA_CERT_FILE);

        let (key_pair, cert_pem) = if key_path.exists() && cert_path.exists() {
            // An unreadable or corrupt persisted root is an operational
            // condition: the operator has to restore or reissue it, so it
            // surfaces as unavailable rather than a crypto fault.
            let key_pem =
                read_file(&key_path).map_err(|e| CaError::Unavailable(e.to_string()))?;
            let cert_pem =
                read_file(&cert_path).map_err(|e| CaError::Unavailable(e.to_string()))?;
            let key_pair = KeyPair::from_pem(&key_pem)
                .map_err(|e| CaError::Unavailable(format!("{}: {e}", key_path.display())))?;
            parse_x509_pem(cert_pem.as_bytes())
                .map_err(|e| CaError::Unavailable(format!("{}: {e}", cert_path.display())))?;
            tracing::debug!(path = %cert_path.display(), "Loaded existing root CA");
            (key_pair, cert_pem)
        } else {
            let key_pair = generate_rsa_key_pair()?;
            let cert = root_params(org_name)?.self_signed(&key_pair)?;
            let cert_pem = cert.pem();
            write_file(&key_path, key_pair.serialize_pem().as_bytes())?;
            write_file(&cert_path, cert_pem.as_bytes())?;
            tracing::info!(path = %cert_path.display(), "Generated new root CA");
            (key_pair, cert_pem)
        };

        Ok(Self {
            cert_dir: cert_dir.to_path_buf(),
            key_pair,
            cert_pem,
            org_name: org_name.to_string(),
        })
    }

    /// PEM of the root certificate, for distribution to devices.
    pub fn root_certificate_pem(&self) -> &str {
        &self.cert_pem
    }

    /// Issue a broker/server certificate and persist it as
    /// `server.key`/`server.crt`. The common name and every alt name become
    /// subject alternative names, each classified as an IP or DNS entry.
    pub fn issue_server_certificate(
        &self,
        common_name: &str,
        alt_names: &[String],
        validity_days: i64,
    ) -> Result<IssuedCertificate, CaError> {
        let mut params = CertificateParams::default();
        params
            .distinguished_name
            .push(DnType::CommonName, common_name);
        params
            .distinguished_name
            .push(DnType::OrganizationName, &self.org_name);
        params.subject_alt_names.push(classify_host(common_name)?);
        for host in alt_names {
            params.subject_alt_names.push(classify_host(host)?);
        }
        params.key_usages.push(KeyUsagePurpose::DigitalSignature);
        params.key_usages.push(KeyUsagePurpose::KeyEncipherment);
        params
            .extended_key_usages
            .push(ExtendedKeyUsagePurpose::ServerAuth);

        let issued = self.sign_leaf(params, Uuid::new_v4(), validity_days)?;
        write_file(&self.cert_dir.join(SERVER_KEY_FILE), issued.key_pem.as_bytes())?;
        write_file(
            &self.cert_dir.join(SERVER_CERT_FILE),
            issued.cert_pem.as_bytes(),
        )?;
        Ok(issued)
    }

    /// Issue a client certificate identifying a device.
    ///
    /// The common name defaults to the device id so the broker can extract
    /// it during mutual TLS; callers may override it.
    pub fn issue_client_certificate(
        &self,
        device_id: &str,
        common_name: Option<&str>,
        validity_days: i64,
    ) -> Result<IssuedCertificate, CaError> {
        let mut params = CertificateParams::default();
        params
            .distinguished_name
            .push(DnType::CommonName, common_name.unwrap_or(device_id));
        params
            .distinguished_name
            .push(DnType::OrganizationName, &self.org_name);
        params.subject_alt_names.push(dns_san(device_id)?);
        params
            .subject_alt_names
            .push(dns_san(&format!("device-{device_id}"))?);
        params.key_usages.push(KeyUsagePurpose::DigitalSignature);
        params
            .extended_key_usages
            .push(ExtendedKeyUsagePurpose::ClientAuth);

        self.sign_leaf(params, Uuid::new_v4(), validity_days)
    }

    fn sign_leaf(
        &self,
        mut params: CertificateParams,
        serial: Uuid,
        validity_days: i64,
    ) -> Result<IssuedCertificate, CaError> {
        let not_before = OffsetDateTime::now_utc();
        let not_after = not_before + Duration::days(validity_days);
        params.not_before = not_before;
        params.not_after = not_after;
        // Raw serial comes from the UUID; 9 bytes keeps it within the
        // 20-octet DER limit with the high bit clear.
        params.serial_number = Some(SerialNumber::from(serial.as_bytes()[..9].to_vec()));

        let ca_params = root_params(&self.org_name)?;
        let issuer = Issuer::from_params(&ca_params, &self.key_pair);
        let leaf_key = generate_rsa_key_pair()?;
        let cert = params.signed_by(&leaf_key, &issuer)?;

        Ok(IssuedCertificate {
            serial: serial.to_string(),
            cert_pem: cert.pem(),
            key_pem: leaf_key.serialize_pem(),
            ca_cert_pem: self.cert_pem.clone(),
            not_before: not_before.unix_timestamp(),
            not_after: not_after.unix_timestamp(),
        })
    }
}

/// Check a PEM certificate against its validity window.
pub fn verify_certificate(cert_pem: &str) -> Result<CertVerification, CaError> {
    let (_, pem) = parse_x509_pem(cert_pem.as_bytes())
        .map_err(|e| CaError::InvalidPem(e.to_string()))?;
    let (_, cert) = X509Certificate::from_der(&pem.contents)
        .map_err(|e| CaError::InvalidPem(e.to_string()))?;

    let not_before = cert.validity().not_before.timestamp();
    let not_after = cert.validity().not_after.timestamp();
    let now = sentra_core::unix_timestamp();

    let reason = if now < not_before {
        Some("certificate is not yet valid".to_string())
    } else if now > not_after {
        Some("certificate has expired".to_string())
    } else {
        None
    };

    Ok(CertVerification {
        valid: reason.is_none(),
        reason,
        subject: cert.subject().to_string(),
        not_before,
        not_after,
    })
}

/// Deterministic root parameters: rebuilding them on reload produces the
/// same issuer DN the persisted `ca.crt` carries.
fn root_params(org_name: &str) -> Result<CertificateParams, CaError> {
    let mut params = CertificateParams::default();
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params
        .distinguished_name
        .push(DnType::CommonName, format!("{org_name} Root CA"));
    params
        .distinguished_name
        .push(DnType::OrganizationName, org_name);
    params.subject_alt_names.push(dns_san(ROOT_SAN)?);
    params.key_usages.push(KeyUsagePurpose::KeyCertSign);
    params.key_usages.push(KeyUsagePurpose::CrlSign);
    params.key_usages.push(KeyUsagePurpose::DigitalSignature);
    let now = OffsetDateTime::now_utc();
    params.not_before = now;
    params.not_after = now + Duration::days(ROOT_VALIDITY_DAYS);
    Ok(params)
}

/// Generate an RSA-2048 key pair in a form rcgen can sign with.
fn generate_rsa_key_pair() -> Result<KeyPair, CaError> {
    let private_key = RsaPrivateKey::new(&mut rand::thread_rng(), RSA_KEY_BITS)
        .map_err(|e| CaError::Generation(format!("RSA key generation: {e}")))?;
    let der = private_key
        .to_pkcs8_der()
        .map_err(|e| CaError::Generation(format!("PKCS#8 encoding: {e}")))?;
    KeyPair::try_from(der.as_bytes())
        .map_err(|e| CaError::Generation(format!("key pair import: {e}")))
}

fn classify_host(host: &str) -> Result<SanType, CaError> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        Ok(SanType::IpAddress(ip))
    } else {
        dns_san(host)
    }
}

fn dns_san(name: &str) -> Result<SanType, CaError> {
    Ok(SanType::DnsName(name.to_string().try_into().map_err(
        |e| CaError::Generation(format!("invalid DNS name {name:?}: {e}")),
    )?))
}

fn read_file(path: &Path) -> Result<String, CaError> {
    std::fs::read_to_string(path).map_err(|source| CaError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn write_file(path: &Path, contents: &[u8]) -> Result<(), CaError> {
    std::fs::write(path, contents).map_err(|source| CaError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn load_or_create_persists_and_reloads_root() {
        let dir = tempfile::tempdir().unwrap();
        let ca = CertificateAuthority::load_or_create(dir.path(), "Sentra Test").unwrap();
        assert!(dir.path().join("ca.key").exists());
        assert!(dir.path().join("ca.crt").exists());

        let reloaded = CertificateAuthority::load_or_create(dir.path(), "Sentra Test").unwrap();
        assert_eq!(ca.root_certificate_pem(), reloaded.root_certificate_pem());
    }

    #[test]
    fn corrupt_root_key_reports_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        CertificateAuthority::load_or_create(dir.path(), "Sentra Test").unwrap();
        std::fs::write(dir.path().join("ca.key"), "not a pem key").unwrap();

        let err = CertificateAuthority::load_or_create(dir.path(), "Sentra Test").unwrap_err();
        assert!(matches!(err, CaError::Unavailable(_)));
    }

    #[test]
    fn corrupt_root_certificate_reports_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        CertificateAuthority::load_or_create(dir.path(), "Sentra Test").unwrap();
        std::fs::write(dir.path().join("ca.crt"), "garbage").unwrap();

        let err = CertificateAuthority::load_or_create(dir.path(), "Sentra Test").unwrap_err();
        assert!(matches!(err, CaError::Unavailable(_)));
    }

    #[test]
    fn server_certificate_written_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let ca = CertificateAuthority::load_or_create(dir.path(), "Sentra Test").unwrap();
        let issued = ca
            .issue_server_certificate("192.168.1.5", &["broker.local".to_string()], 365)
            .unwrap();

        assert!(issued.cert_pem.contains("BEGIN CERTIFICATE"));
        assert!(issued.key_pem.contains("BEGIN PRIVATE KEY"));
        assert!(dir.path().join("server.crt").exists());
        assert!(dir.path().join("server.key").exists());
    }

    #[test]
    fn client_certificate_verifies_within_window() {
        let dir = tempfile::tempdir().unwrap();
        let ca = CertificateAuthority::load_or_create(dir.path(), "Sentra Test").unwrap();
        let issued = ca.issue_client_certificate("device-001", None, 365).unwrap();

        let verification = verify_certificate(&issued.cert_pem).unwrap();
        assert!(verification.valid);
        assert!(verification.reason.is_none());
        assert!(verification.subject.contains("device-001"));
        assert!(verification.not_after > verification.not_before);
    }

    #[test]
    fn expired_certificate_fails_verification() {
        let dir = tempfile::tempdir().unwrap();
        let ca = CertificateAuthority::load_or_create(dir.path(), "Sentra Test").unwrap();
        let issued = ca.issue_client_certificate("device-001", None, -1).unwrap();

        let verification = verify_certificate(&issued.cert_pem).unwrap();
        assert!(!verification.valid);
        assert_eq!(
            verification.reason.as_deref(),
            Some("certificate has expired")
        );
    }

    #[test]
    fn client_common_name_can_be_overridden() {
        let dir = tempfile::tempdir().unwrap();
        let ca = CertificateAuthority::load_or_create(dir.path(), "Sentra Test").unwrap();
        let issued = ca
            .issue_client_certificate("device-001", Some("edge-gateway"), 30)
            .unwrap();

        let verification = verify_certificate(&issued.cert_pem).unwrap();
        assert!(verification.subject.contains("edge-gateway"));
    }

    #[test]
    fn client_serials_are_unique() {
        let dir = tempfile::tempdir().unwrap();
        let ca = CertificateAuthority::load_or_create(dir.path(), "Sentra Test").unwrap();
        let a = ca.issue_client_certificate("device-a", None, 365).unwrap();
        let b = ca.issue_client_certificate("device-b", None, 365).unwrap();
        assert_ne!(a.serial, b.serial);
        assert_ne!(a.cert_pem, b.cert_pem);
    }

    #[test]
    fn garbage_pem_is_rejected() {
        assert!(verify_certificate("not a certificate").is_err());
    }
}
