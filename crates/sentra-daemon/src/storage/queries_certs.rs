//! Certificate queries.

use sentra_core::unix_timestamp;

use super::db::Database;
use super::models::{CertKind, Certificate};
use super::DatabaseError;

/// Parameters for inserting a certificate row.
pub struct NewCertificate<'a> {
    pub id: &'a str,
    pub device_id: Option<&'a str>,
    pub kind: CertKind,
    pub subject_cn: &'a str,
    pub serial_number: &'a str,
    pub not_before: i64,
    pub not_after: i64,
    pub pem_cert: &'a str,
    pub pem_key_enc: &'a str,
}

impl Database {
    pub async fn create_certificate(
        &self,
        params: &NewCertificate<'_>,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            "INSERT INTO certificates
             (id, device_id, kind, subject_cn, serial_number, not_before, not_after,
              pem_cert, pem_key_enc, revoked, active, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 0, 1, ?)",
        )
        .bind(params.id)
        .bind(params.device_id)
        .bind(params.kind.as_str())
        .bind(params.subject_cn)
        .bind(params.serial_number)
        .bind(params.not_before)
        .bind(params.not_after)
        .bind(params.pem_cert)
        .bind(params.pem_key_enc)
        .bind(unix_timestamp())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Insert a server certificate and deactivate any previous one in the
    /// same transaction, so there is never more than one active server cert.
    pub async fn replace_server_certificate(
        &self,
        params: &NewCertificate<'_>,
    ) -> Result<(), DatabaseError> {
        let mut tx = self.pool().begin().await?;

        sqlx::query("UPDATE certificates SET active = 0 WHERE kind = ? AND active = 1")
            .bind(CertKind::Server.as_str())
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "INSERT INTO certificates
             (id, device_id, kind, subject_cn, serial_number, not_before, not_after,
              pem_cert, pem_key_enc, revoked, active, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 0, 1, ?)",
        )
        .bind(params.id)
        .bind(params.device_id)
        .bind(CertKind::Server.as_str())
        .bind(params.subject_cn)
        .bind(params.serial_number)
        .bind(params.not_before)
        .bind(params.not_after)
        .bind(params.pem_cert)
        .bind(params.pem_key_enc)
        .bind(unix_timestamp())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn get_certificate_by_serial(
        &self,
        serial_number: &str,
    ) -> Result<Option<Certificate>, DatabaseError> {
        let cert =
            sqlx::query_as::<_, Certificate>("SELECT * FROM certificates WHERE serial_number = ?")
                .bind(serial_number)
                .fetch_optional(self.pool())
                .await?;
        Ok(cert)
    }

    /// Most recent active, unrevoked client certificate for a device.
    pub async fn get_active_client_certificate(
        &self,
        device_id: &str,
    ) -> Result<Option<Certificate>, DatabaseError> {
        let cert = sqlx::query_as::<_, Certificate>(
            "SELECT * FROM certificates
             WHERE device_id = ? AND kind = ? AND active = 1 AND revoked = 0
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(device_id)
        .bind(CertKind::Client.as_str())
        .fetch_optional(self.pool())
        .await?;
        Ok(cert)
    }

    pub async fn get_active_server_certificate(
        &self,
    ) -> Result<Option<Certificate>, DatabaseError> {
        let cert = sqlx::query_as::<_, Certificate>(
            "SELECT * FROM certificates
             WHERE kind = ? AND active = 1 AND revoked = 0
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(CertKind::Server.as_str())
        .fetch_optional(self.pool())
        .await?;
        Ok(cert)
    }

    pub async fn list_certificates_for_device(
        &self,
        device_id: &str,
    ) -> Result<Vec<Certificate>, DatabaseError> {
        let certs = sqlx::query_as::<_, Certificate>(
            "SELECT * FROM certificates WHERE device_id = ? ORDER BY created_at DESC",
        )
        .bind(device_id)
        .fetch_all(self.pool())
        .await?;
        Ok(certs)
    }

    /// Revoke by serial. Revoked certificates also stop being active.
    pub async fn revoke_certificate_by_serial(
        &self,
        serial_number: &str,
    ) -> Result<bool, DatabaseError> {
        let result =
            sqlx::query("UPDATE certificates SET revoked = 1, active = 0 WHERE serial_number = ?")
                .bind(serial_number)
                .execute(self.pool())
                .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn is_certificate_revoked(&self, serial_number: &str) -> Result<bool, DatabaseError> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT revoked FROM certificates WHERE serial_number = ?")
                .bind(serial_number)
                .fetch_optional(self.pool())
                .await?;
        Ok(row.is_some_and(|(revoked,)| revoked != 0))
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    fn sample<'a>(id: &'a str, serial: &'a str, device_id: Option<&'a str>) -> NewCertificate<'a> {
        NewCertificate {
            id,
            device_id,
            kind: CertKind::Client,
            subject_cn: device_id.unwrap_or("broker"),
            serial_number: serial,
            not_before: 1000,
            not_after: 2000,
            pem_cert: "-----BEGIN CERTIFICATE-----\ntest\n-----END CERTIFICATE-----",
            pem_key_enc: "token",
        }
    }

    #[tokio::test]
    async fn create_and_lookup_by_serial() {
        let db = Database::open_in_memory().await.unwrap();
        db.touch_device("dev-1").await.unwrap();
        db.create_certificate(&sample("c1", "S1", Some("dev-1"))).await.unwrap();

        let cert = db.get_certificate_by_serial("S1").await.unwrap().unwrap();
        assert_eq!(cert.id, "c1");
        assert_eq!(cert.kind, "client");
    }

    #[tokio::test]
    async fn duplicate_serial_is_conflict() {
        let db = Database::open_in_memory().await.unwrap();
        db.touch_device("dev-1").await.unwrap();
        db.create_certificate(&sample("c1", "S1", Some("dev-1"))).await.unwrap();
        let err = db
            .create_certificate(&sample("c2", "S1", Some("dev-1")))
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::Conflict(_)));
    }

    #[tokio::test]
    async fn revocation_clears_active_lookup() {
        let db = Database::open_in_memory().await.unwrap();
        db.touch_device("dev-1").await.unwrap();
        db.create_certificate(&sample("c1", "S1", Some("dev-1"))).await.unwrap();

        assert!(db.get_active_client_certificate("dev-1").await.unwrap().is_some());
        assert!(db.revoke_certificate_by_serial("S1").await.unwrap());
        assert!(db.is_certificate_revoked("S1").await.unwrap());
        assert!(db.get_active_client_certificate("dev-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn replace_server_certificate_keeps_single_active() {
        let db = Database::open_in_memory().await.unwrap();
        let mut first = sample("srv-1", "SRV1", None);
        first.kind = CertKind::Server;
        db.replace_server_certificate(&first).await.unwrap();

        let mut second = sample("srv-2", "SRV2", None);
        second.kind = CertKind::Server;
        db.replace_server_certificate(&second).await.unwrap();

        let active = db.get_active_server_certificate().await.unwrap().unwrap();
        assert_eq!(active.id, "srv-2");

        let old = db.get_certificate_by_serial("SRV1").await.unwrap().unwrap();
        assert_eq!(old.active, 0);
    }
}
