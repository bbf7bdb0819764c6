//! Masking-key queries.
//!
//! Key bytes are stored as secret-store tokens; the partial unique index on
//! `device_keys` enforces at most one active key per device at the SQL
//! level, so revoke-then-insert must happen inside one transaction.

use sentra_core::unix_timestamp;

use super::db::Database;
use super::models::DeviceKey;
use super::DatabaseError;

impl Database {
    pub async fn insert_device_key(
        &self,
        id: &str,
        device_id: &str,
        key_enc: &str,
        key_hash: &str,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            "INSERT INTO device_keys (id, device_id, key_enc, key_hash, is_active, created_at)
             VALUES (?, ?, ?, ?, 1, ?)",
        )
        .bind(id)
        .bind(device_id)
        .bind(key_enc)
        .bind(key_hash)
        .bind(unix_timestamp())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn get_active_device_key(
        &self,
        device_id: &str,
    ) -> Result<Option<DeviceKey>, DatabaseError> {
        let key = sqlx::query_as::<_, DeviceKey>(
            "SELECT * FROM device_keys WHERE device_id = ? AND is_active = 1",
        )
        .bind(device_id)
        .fetch_optional(self.pool())
        .await?;
        Ok(key)
    }

    /// Retire the active key without issuing a replacement.
    pub async fn revoke_device_key(&self, device_id: &str) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "UPDATE device_keys SET is_active = 0, revoked_at = ?
             WHERE device_id = ? AND is_active = 1",
        )
        .bind(unix_timestamp())
        .bind(device_id)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Retire the active key and install a new one atomically.
    pub async fn rotate_device_key(
        &self,
        id: &str,
        device_id: &str,
        key_enc: &str,
        key_hash: &str,
    ) -> Result<(), DatabaseError> {
        let now = unix_timestamp();
        let mut tx = self.pool().begin().await?;

        sqlx::query(
            "UPDATE device_keys SET is_active = 0, revoked_at = ?
             WHERE device_id = ? AND is_active = 1",
        )
        .bind(now)
        .bind(device_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO device_keys (id, device_id, key_enc, key_hash, is_active, created_at)
             VALUES (?, ?, ?, ?, 1, ?)",
        )
        .bind(id)
        .bind(device_id)
        .bind(key_enc)
        .bind(key_hash)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Full key history for a device, newest first.
    pub async fn list_device_keys(
        &self,
        device_id: &str,
    ) -> Result<Vec<DeviceKey>, DatabaseError> {
        let keys = sqlx::query_as::<_, DeviceKey>(
            "SELECT * FROM device_keys WHERE device_id = ? ORDER BY created_at DESC, id DESC",
        )
        .bind(device_id)
        .fetch_all(self.pool())
        .await?;
        Ok(keys)
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
    async fn insert_and_get_active_key() {
        let db = test_db().await;
        db.insert_device_key("k1", "dev-1", "enc", "hash").await.unwrap();
        let key = db.get_active_device_key("dev-1").await.unwrap().unwrap();
        assert_eq!(key.id, "k1");
        assert_eq!(key.is_active, 1);
    }

    #[tokio::test]
    async fn second_active_insert_is_conflict() {
        let db = test_db().await;
        db.insert_device_key("k1", "dev-1", "enc", "hash").await.unwrap();
        let err = db
            .insert_device_key("k2", "dev-1", "enc2", "hash2")
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::Conflict(_)));
    }

    #[tokio::test]
    async fn rotate_retires_old_and_installs_new() {
        let db = test_db().await;
        db.insert_device_key("k1", "dev-1", "enc", "hash").await.unwrap();
        db.rotate_device_key("k2", "dev-1", "enc2", "hash2").await.unwrap();

        let active = db.get_active_device_key("dev-1").await.unwrap().unwrap();
        assert_eq!(active.id, "k2");

        let history = db.list_device_keys("dev-1").await.unwrap();
        assert_eq!(history.len(), 2);
        let old = history.iter().find(|k| k.id == "k1").unwrap();
        assert_eq!(old.is_active, 0);
        assert!(old.revoked_at.is_some());
    }

    #[tokio::test]
    async fn revoke_without_replacement() {
        let db = test_db().await;
        db.insert_device_key("k1", "dev-1", "enc", "hash").await.unwrap();
        assert!(db.revoke_device_key("dev-1").await.unwrap());
        assert!(db.get_active_device_key("dev-1").await.unwrap().is_none());
        assert!(!db.revoke_device_key("dev-1").await.unwrap());
    }
}
