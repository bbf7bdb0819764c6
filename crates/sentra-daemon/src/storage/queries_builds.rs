//! Firmware build and template queries.

use sentra_core::unix_timestamp;

use super::db::Database;
use super::models::{BuildKind, BuildStatus, FirmwareBuild, FirmwareTemplate};
use super::DatabaseError;

/// Final artifact details for a build that reached `completed`.
pub struct CompletedBuild<'a> {
    pub artifact_path: &'a str,
    pub artifact_hash: &'a str,
    pub binary_size: i64,
    pub masked_hash: Option<&'a str>,
    pub key_fingerprint: Option<&'a str>,
}

impl Database {
    pub async fn create_build(
        &self,
        id: &str,
        device_id: &str,
        version: &str,
        kind: BuildKind,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            "INSERT INTO firmware_builds (id, device_id, version, status, build_kind, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(device_id)
        .bind(version)
        .bind(BuildStatus::Pending.as_str())
        .bind(kind.as_str())
        .bind(unix_timestamp())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn get_build(&self, id: &str) -> Result<Option<FirmwareBuild>, DatabaseError> {
        let build = sqlx::query_as::<_, FirmwareBuild>("SELECT * FROM firmware_builds WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        Ok(build)
    }

    pub async fn set_build_status(
        &self,
        id: &str,
        status: BuildStatus,
    ) -> Result<(), DatabaseError> {
        sqlx::query("UPDATE firmware_builds SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn set_build_source(&self, id: &str, source_path: &str) -> Result<(), DatabaseError> {
        sqlx::query("UPDATE firmware_builds SET source_path = ? WHERE id = ?")
            .bind(source_path)
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn complete_build(
        &self,
        id: &str,
        result: &CompletedBuild<'_>,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            "UPDATE firmware_builds
             SET status = ?, artifact_path = ?, artifact_hash = ?, binary_size = ?,
                 masked_hash = ?, key_fingerprint = ?, completed_at = ?
             WHERE id = ?",
        )
        .bind(BuildStatus::Completed.as_str())
        .bind(result.artifact_path)
        .bind(result.artifact_hash)
        .bind(result.binary_size)
        .bind(result.masked_hash)
        .bind(result.key_fingerprint)
        .bind(unix_timestamp())
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn fail_build(&self, id: &str, error: &str) -> Result<(), DatabaseError> {
        sqlx::query(
            "UPDATE firmware_builds SET status = ?, error = ?, completed_at = ? WHERE id = ?",
        )
        .bind(BuildStatus::Failed.as_str())
        .bind(error)
        .bind(unix_timestamp())
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Most recent completed build for a device.
    pub async fn latest_completed_build(
        &self,
        device_id: &str,
    ) -> Result<Option<FirmwareBuild>, DatabaseError> {
        let build = sqlx::query_as::<_, FirmwareBuild>(
            "SELECT * FROM firmware_builds
             WHERE device_id = ? AND status = ?
             ORDER BY created_at DESC, id DESC LIMIT 1",
        )
        .bind(device_id)
        .bind(BuildStatus::Completed.as_str())
        .fetch_optional(self.pool())
        .await?;
        Ok(build)
    }

    pub async fn list_builds_for_device(
        &self,
        device_id: &str,
    ) -> Result<Vec<FirmwareBuild>, DatabaseError> {
        let builds = sqlx::query_as::<_, FirmwareBuild>(
            "SELECT * FROM firmware_builds WHERE device_id = ? ORDER BY created_at DESC, id DESC",
        )
        .bind(device_id)
        .fetch_all(self.pool())
        .await?;
        Ok(builds)
    }

    pub async fn upsert_template(&self, name: &str, content: &str) -> Result<(), DatabaseError> {
        sqlx::query(
            "INSERT INTO firmware_templates (id, name, content, created_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(name) DO UPDATE SET content = excluded.content",
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(name)
        .bind(content)
        .bind(unix_timestamp())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn get_template(
        &self,
        name: &str,
    ) -> Result<Option<FirmwareTemplate>, DatabaseError> {
        let template =
            sqlx::query_as::<_, FirmwareTemplate>("SELECT * FROM firmware_templates WHERE name = ?")
                .bind(name)
                .fetch_optional(self.pool())
                .await?;
        Ok(template)
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    async fn test_db() -> Database {
        let db = Database::open_in_memory().await.unwrap();
        db.touch_device("dev-1").await.unwrap();
        db
    }

    #[tokio::test]
    async fn build_lifecycle_to_completed() {
        let db = test_db().await;
        db.create_build("b1", "dev-1", "1.2.0", BuildKind::Masked).await.unwrap();
        db.set_build_status("b1", BuildStatus::Building).await.unwrap();
        db.complete_build(
            "b1",
            &CompletedBuild {
                artifact_path: "/fw/dev-1_masked.bin",
                artifact_hash: "aa",
                binary_size: 2048,
                masked_hash: Some("bb"),
                key_fingerprint: Some("cc"),
            },
        )
        .await
        .unwrap();

        let build = db.get_build("b1").await.unwrap().unwrap();
        assert_eq!(build.status, "completed");
        assert_eq!(build.build_kind, "masked");
        assert_eq!(build.artifact_hash.as_deref(), Some("aa"));
        assert!(build.completed_at.is_some());
    }

    #[tokio::test]
    async fn plain_build_has_no_mask_columns() {
        let db = test_db().await;
        db.create_build("b1", "dev-1", "1.2.0", BuildKind::Plain).await.unwrap();
        db.complete_build(
            "b1",
            &CompletedBuild {
                artifact_path: "/fw/dev-1_firmware.bin",
                artifact_hash: "aa",
                binary_size: 2048,
                masked_hash: None,
                key_fingerprint: None,
            },
        )
        .await
        .unwrap();

        let build = db.get_build("b1").await.unwrap().unwrap();
        assert_eq!(build.build_kind, "plain");
        assert!(build.masked_hash.is_none());
        assert!(build.key_fingerprint.is_none());
    }

    #[tokio::test]
    async fn failed_build_records_error() {
        let db = test_db().await;
        db.create_build("b1", "dev-1", "1.2.0", BuildKind::Masked).await.unwrap();
        db.fail_build("b1", "compiler exited with status 1").await.unwrap();

        let build = db.get_build("b1").await.unwrap().unwrap();
        assert_eq!(build.status, "failed");
        assert_eq!(build.error.as_deref(), Some("compiler exited with status 1"));
    }

    #[tokio::test]
    async fn latest_completed_skips_failed() {
        let db = test_db().await;
        db.create_build("b1", "dev-1", "1.0.0", BuildKind::Masked).await.unwrap();
        db.complete_build(
            "b1",
            &CompletedBuild {
                artifact_path: "/a",
                artifact_hash: "h1",
                binary_size: 64,
                masked_hash: Some("m1"),
                key_fingerprint: Some("k1"),
            },
        )
        .await
        .unwrap();
        db.create_build("b2", "dev-1", "1.1.0", BuildKind::Masked).await.unwrap();
        db.fail_build("b2", "boom").await.unwrap();

        let latest = db.latest_completed_build("dev-1").await.unwrap().unwrap();
        assert_eq!(latest.id, "b1");
    }

    #[tokio::test]
    async fn template_upsert_overwrites() {
        let db = test_db().await;
        db.upsert_template("default", "v1").await.unwrap();
        db.upsert_template("default", "v2").await.unwrap();
        let template = db.get_template("default").await.unwrap().unwrap();
        assert_eq!(template.content, "v2");
    }
}
