//! Certificate issuance and lifecycle on top of the root CA.
//!
//! Private keys are run through the secret store before they reach the
//! database, and come back out only through this service.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::ServiceError;
use crate::storage::{CertKind, Certificate, Database, DatabaseError, NewCertificate};
use sentra_crypto::ca::{IssuedCertificate, verify_certificate};
use sentra_crypto::{CertificateAuthority, SecretStore};

const SERIAL_RETRY_ATTEMPTS: usize = 3;
const DEFAULT_LEAF_VALIDITY_DAYS: i64 = 365;

/// Certificate plus its private key in the clear.
#[derive(Debug, Clone, Serialize)]
pub struct CertBundle {
    pub serial_number: String,
    pub cert_pem: String,
    pub key_pem: String,
    pub ca_cert_pem: String,
    pub not_before: i64,
    pub not_after: i64,
}

/// Verification verdict for a stored certificate.
#[derive(Debug, Clone, Serialize)]
pub struct VerifyReport {
    pub serial_number: String,
    pub valid: bool,
    pub revoked: bool,
    pub reason: Option<String>,
    pub not_after: i64,
}

#[derive(Clone)]
pub struct CertificateService {
    db: Database,
    ca: Arc<CertificateAuthority>,
    secrets: Arc<SecretStore>,
}

impl CertificateService {
    pub fn new(db: Database, ca: Arc<CertificateAuthority>, secrets: Arc<SecretStore>) -> Self {
        Self { db, ca, secrets }
    }

    /// PEM of the root certificate for device provisioning.
    pub fn root_certificate(&self) -> String {
        self.ca.root_certificate_pem().to_string()
    }

    /// Issue a broker certificate and make it the single active server
    /// certificate. Validity defaults to one year.
    pub async fn issue_server(
        &self,
        common_name: &str,
        alt_names: &[String],
        validity_days: Option<i64>,
    ) -> Result<CertBundle, ServiceError> {
        if common_name.trim().is_empty() {
            return Err(ServiceError::Validation("common name must not be empty".to_string()));
        }
        let validity_days = leaf_validity(validity_days)?;

        let issued = self
            .ca
            .issue_server_certificate(common_name, alt_names, validity_days)?;
        let key_enc = self.secrets.encrypt(&issued.key_pem)?;
        self.db
            .replace_server_certificate(&NewCertificate {
                id: &Uuid::new_v4().to_string(),
                device_id: None,
                kind: CertKind::Server,
                subject_cn: common_name,
                serial_number: &issued.serial,
                not_before: issued.not_before,
                not_after: issued.not_after,
                pem_cert: &issued.cert_pem,
                pem_key_enc: &key_enc,
            })
            .await?;

        info!(serial = %issued.serial, "Issued server certificate");
        Ok(self.bundle_from_issued(issued))
    }

    /// Active server certificate with its key decrypted.
    pub async fn server_bundle(&self) -> Result<CertBundle, ServiceError> {
        let cert = self
            .db
            .get_active_server_certificate()
            .await?
            .ok_or_else(|| ServiceError::NotFound("no active server certificate".to_string()))?;
        self.decrypt_bundle(cert)
    }

    /// Issue a client certificate for a device. The device must exist.
    ///
    /// Serial collisions are vanishingly unlikely but cheap to retry; the
    /// unique index surfaces them as `Conflict`.
    pub async fn issue_for_device(
        &self,
        device_id: &str,
        common_name: Option<&str>,
        validity_days: Option<i64>,
    ) -> Result<CertBundle, ServiceError> {
        if device_id.trim().is_empty() {
            return Err(ServiceError::Validation("device id must not be empty".to_string()));
        }
        let validity_days = leaf_validity(validity_days)?;
        self.db
            .get_device(device_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("device {device_id}")))?;

        let subject_cn = common_name.unwrap_or(device_id);
        let mut last_err = None;
        for attempt in 0..SERIAL_RETRY_ATTEMPTS {
            let issued = self
                .ca
                .issue_client_certificate(device_id, common_name, validity_days)?;
            let key_enc = self.secrets.encrypt(&issued.key_pem)?;
            let result = self
                .db
                .create_certificate(&NewCertificate {
                    id: &Uuid::new_v4().to_string(),
                    device_id: Some(device_id),
                    kind: CertKind::Client,
                    subject_cn,
                    serial_number: &issued.serial,
                    not_before: issued.not_before,
                    not_after: issued.not_after,
                    pem_cert: &issued.cert_pem,
                    pem_key_enc: &key_enc,
                })
                .await;

            match result {
                Ok(()) => {
                    info!(device_id, serial = %issued.serial, "Issued device certificate");
                    return Ok(self.bundle_from_issued(issued));
                }
                Err(DatabaseError::Conflict(msg)) => {
                    warn!(device_id, attempt, "Serial collision, reissuing: {msg}");
                    last_err = Some(DatabaseError::Conflict(msg));
                }
                Err(other) => return Err(other.into()),
            }
        }
        Err(last_err
            .map(Into::into)
            .unwrap_or_else(|| ServiceError::CaUnavailable("issuance retries exhausted".to_string())))
    }

    /// Active client certificate for a device with its key decrypted.
    pub async fn device_bundle(&self, device_id: &str) -> Result<CertBundle, ServiceError> {
        let cert = self
            .db
            .get_active_client_certificate(device_id)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("no active certificate for device {device_id}"))
            })?;
        self.decrypt_bundle(cert)
    }

    pub async fn list_for_device(&self, device_id: &str) -> Result<Vec<Certificate>, ServiceError> {
        Ok(self.db.list_certificates_for_device(device_id).await?)
    }

    /// Check a stored certificate: revocation first, then validity window.
    pub async fn verify(&self, serial_number: &str) -> Result<VerifyReport, ServiceError> {
        let cert = self
            .db
            .get_certificate_by_serial(serial_number)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("certificate {serial_number}")))?;

        if cert.revoked != 0 {
            return Ok(VerifyReport {
                serial_number: cert.serial_number,
                valid: false,
                revoked: true,
                reason: Some("certificate has been revoked".to_string()),
                not_after: cert.not_after,
            });
        }

        let verification = verify_certificate(&cert.pem_cert)?;
        Ok(VerifyReport {
            serial_number: cert.serial_number,
            valid: verification.valid,
            revoked: false,
            reason: verification.reason,
            not_after: verification.not_after,
        })
    }

    pub async fn revoke(&self, serial_number: &str) -> Result<(), ServiceError> {
        if self.db.revoke_certificate_by_serial(serial_number).await? {
            info!(serial = serial_number, "Revoked certificate");
            Ok(())
        } else {
            Err(ServiceError::NotFound(format!("certificate {serial_number}")))
        }
    }

    fn decrypt_bundle(&self, cert: Certificate) -> Result<CertBundle, ServiceError> {
        let key_pem = self.secrets.decrypt(&cert.pem_key_enc)?;
        Ok(CertBundle {
            serial_number: cert.serial_number,
            cert_pem: cert.pem_cert,
            key_pem,
            ca_cert_pem: self.ca.root_certificate_pem().to_string(),
            not_before: cert.not_before,
            not_after: cert.not_after,
        })
    }

    fn bundle_from_issued(&self, issued: IssuedCertificate) -> CertBundle {
        CertBundle {
            serial_number: issued.serial,
            cert_pem: issued.cert_pem,
            key_pem: issued.key_pem,
            ca_cert_pem: issued.ca_cert_pem,
            not_before: issued.not_before,
            not_after: issued.not_after,
        }
    }
}

fn leaf_validity(validity_days: Option<i64>) -> Result<i64, ServiceError> {
    let days = validity_days.unwrap_or(DEFAULT_LEAF_VALIDITY_DAYS);
    if days < 1 {
        return Err(ServiceError::Validation(format!(
            "validity_days must be at least 1, got {days}"
        )));
    }
    Ok(days)
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    async fn test_service() -> (CertificateService, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_in_memory().await.unwrap();
        db.touch_device("dev-1").await.unwrap();
        let ca = Arc::new(CertificateAuthority::load_or_create(dir.path(), "Sentra Test").unwrap());
        let secrets = Arc::new(SecretStore::new("test-master", false));
        (CertificateService::new(db, ca, secrets), dir)
    }

    #[tokio::test]
    async fn issue_and_fetch_device_certificate() {
        let (service, _dir) = test_service().await;
        let issued = service.issue_for_device("dev-1", None, None).await.unwrap();
        assert!(issued.cert_pem.contains("BEGIN CERTIFICATE"));
        assert!(issued.key_pem.contains("BEGIN PRIVATE KEY"));

        // The bundle read back must decrypt to the same key.
        let fetched = service.device_bundle("dev-1").await.unwrap();
        assert_eq!(fetched.serial_number, issued.serial_number);
        assert_eq!(fetched.key_pem, issued.key_pem);
    }

    #[tokio::test]
    async fn issue_for_unknown_device_fails() {
        let (service, _dir) = test_service().await;
        let err = service.issue_for_device("ghost", None, None).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn verify_then_revoke() {
        let (service, _dir) = test_service().await;
        let issued = service.issue_for_device("dev-1", None, None).await.unwrap();

        let report = service.verify(&issued.serial_number).await.unwrap();
        assert!(report.valid);
        assert!(!report.revoked);

        service.revoke(&issued.serial_number).await.unwrap();
        let report = service.verify(&issued.serial_number).await.unwrap();
        assert!(!report.valid);
        assert!(report.revoked);

        // Revoked certs fall out of the active lookup.
        assert!(matches!(
            service.device_bundle("dev-1").await.unwrap_err(),
            ServiceError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn server_issue_replaces_previous() {
        let (service, _dir) = test_service().await;
        let first = service.issue_server("broker.local", &[], None).await.unwrap();
        let second = service
            .issue_server("10.0.0.2", &["broker.local".to_string()], None)
            .await
            .unwrap();
        assert_ne!(first.serial_number, second.serial_number);

        let active = service.server_bundle().await.unwrap();
        assert_eq!(active.serial_number, second.serial_number);
        assert_eq!(active.key_pem, second.key_pem);
    }

    #[tokio::test]
    async fn issue_server_validates_inputs() {
        let (service, _dir) = test_service().await;
        assert!(matches!(
            service.issue_server("", &[], None).await.unwrap_err(),
            ServiceError::Validation(_)
        ));
        assert!(matches!(
            service.issue_server("broker.local", &[], Some(0)).await.unwrap_err(),
            ServiceError::Validation(_)
        ));
    }

    #[tokio::test]
    async fn issue_for_device_accepts_validity_and_common_name() {
        let (service, _dir) = test_service().await;
        let bundle = service
            .issue_for_device("dev-1", Some("edge-gateway"), Some(30))
            .await
            .unwrap();
        let stored = service.list_for_device("dev-1").await.unwrap();
        assert_eq!(stored[0].subject_cn, "edge-gateway");
        let window = bundle.not_after - bundle.not_before;
        assert_eq!(window, 30 * 24 * 3600);

        assert!(matches!(
            service
                .issue_for_device("dev-1", None, Some(-7))
                .await
                .unwrap_err(),
            ServiceError::Validation(_)
        ));
    }
}
