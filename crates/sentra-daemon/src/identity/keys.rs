//! Masking-key service.
//!
//! Each device gets one active 16-byte XOR key. Key bytes are stored as
//! encrypted hex; only the SHA-256 fingerprint ever leaves the daemon in
//! verification flows. Deployments that predate the database rows may
//! still have a `keys/<device>_key.txt` file next to the firmware tree;
//! those are imported on first access.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::ServiceError;
use crate::storage::{Database, DeviceKey};
use sentra_crypto::SecretStore;
use sentra_crypto::mask::{generate_key, key_fingerprint, XOR_KEY_LEN};

/// Active key material for a device.
#[derive(Debug, Clone, Serialize)]
pub struct KeyInfo {
    pub device_id: String,
    pub key_hex: String,
    pub key_hash: String,
    pub created_at: i64,
}

#[derive(Clone)]
pub struct KeyService {
    db: Database,
    secrets: Arc<SecretStore>,
    firmware_dir: PathBuf,
}

impl KeyService {
    pub fn new(db: Database, secrets: Arc<SecretStore>, firmware_dir: PathBuf) -> Self {
        Self {
            db,
            secrets,
            firmware_dir,
        }
    }

    /// Issue a key for a device. Refused while an active key exists unless
    /// `force` is set, which retires the old key first.
    pub async fn issue(&self, device_id: &str, force: bool) -> Result<KeyInfo, ServiceError> {
        if self.db.get_active_device_key(device_id).await?.is_some() {
            if force {
                return self.rotate(device_id).await;
            }
            return Err(ServiceError::Conflict(format!(
                "device {device_id} already has an active key; pass force to replace it"
            )));
        }
        self.ensure_key(device_id).await
    }

    /// Active key for a device, creating one if none exists.
    pub async fn ensure_key(&self, device_id: &str) -> Result<KeyInfo, ServiceError> {
        if let Some(row) = self.db.get_active_device_key(device_id).await? {
            return self.decode_row(row);
        }
        if let Some(imported) = self.import_legacy_key(device_id).await? {
            return Ok(imported);
        }
        self.create_key(device_id).await
    }

    /// Active key, erroring if the device has none.
    pub async fn get_key(&self, device_id: &str) -> Result<KeyInfo, ServiceError> {
        match self.db.get_active_device_key(device_id).await? {
            Some(row) => self.decode_row(row),
            None => match self.import_legacy_key(device_id).await? {
                Some(imported) => Ok(imported),
                None => Err(ServiceError::NotFound(format!(
                    "no active key for device {device_id}"
                ))),
            },
        }
    }

    /// Raw key bytes for masking firmware.
    pub async fn key_bytes(&self, device_id: &str) -> Result<Vec<u8>, ServiceError> {
        let info = self.ensure_key(device_id).await?;
        hex::decode(&info.key_hex)
            .map_err(|e| ServiceError::Crypto(format!("stored key is not hex: {e}")))
    }

    /// Compare a fingerprint reported by a device against the active key.
    pub async fn verify(&self, device_id: &str, reported_hash: &str) -> Result<bool, ServiceError> {
        let info = self.get_key(device_id).await?;
        Ok(info.key_hash.eq_ignore_ascii_case(reported_hash))
    }

    /// Retire the active key without a replacement.
    pub async fn revoke(&self, device_id: &str) -> Result<(), ServiceError> {
        if self.db.revoke_device_key(device_id).await? {
            info!(device_id, "Revoked masking key");
            Ok(())
        } else {
            Err(ServiceError::NotFound(format!(
                "no active key for device {device_id}"
            )))
        }
    }

    /// Retire the active key (if any) and issue a fresh one.
    pub async fn rotate(&self, device_id: &str) -> Result<KeyInfo, ServiceError> {
        let key = generate_key();
        let key_hex = hex::encode(&key);
        let key_hash = key_fingerprint(&key);
        let key_enc = self.secrets.encrypt(&key_hex)?;
        let id = Uuid::new_v4().to_string();

        self.db
            .rotate_device_key(&id, device_id, &key_enc, &key_hash)
            .await?;
        info!(device_id, "Rotated masking key");

        let row = self
            .db
            .get_active_device_key(device_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("device key {id}")))?;
        self.decode_row(row)
    }

    /// Key history, newest first. Key material stays encrypted.
    pub async fn history(&self, device_id: &str) -> Result<Vec<DeviceKey>, ServiceError> {
        Ok(self.db.list_device_keys(device_id).await?)
    }

    async fn create_key(&self, device_id: &str) -> Result<KeyInfo, ServiceError> {
        let key = generate_key();
        let key_hex = hex::encode(&key);
        let key_hash = key_fingerprint(&key);
        let key_enc = self.secrets.encrypt(&key_hex)?;
        let id = Uuid::new_v4().to_string();

        self.db
            .insert_device_key(&id, device_id, &key_enc, &key_hash)
            .await?;
        info!(device_id, "Issued masking key");

        let row = self
            .db
            .get_active_device_key(device_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("device key {id}")))?;
        self.decode_row(row)
    }

    /// Import a plaintext key file left behind by older deployments.
    async fn import_legacy_key(&self, device_id: &str) -> Result<Option<KeyInfo>, ServiceError> {
        let path = self
            .firmware_dir
            .join("keys")
            .join(format!("{device_id}_key.txt"));
        if !path.exists() {
            return Ok(None);
        }

        let key_hex = tokio::fs::read_to_string(&path).await?.trim().to_string();
        let key = match hex::decode(&key_hex) {
            Ok(key) if key.len() == XOR_KEY_LEN => key,
            _ => {
                warn!(device_id, path = %path.display(), "Ignoring malformed legacy key file");
                return Ok(None);
            }
        };

        let key_hash = key_fingerprint(&key);
        let key_enc = self.secrets.encrypt(&key_hex)?;
        let id = Uuid::new_v4().to_string();
        self.db
            .insert_device_key(&id, device_id, &key_enc, &key_hash)
            .await?;
        info!(device_id, "Imported legacy key file");

        let row = self
            .db
            .get_active_device_key(device_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("device key {id}")))?;
        self.decode_row(row).map(Some)
    }

    fn decode_row(&self, row: DeviceKey) -> Result<KeyInfo, ServiceError> {
        let key_hex = self.secrets.decrypt(&row.key_enc)?;
        Ok(KeyInfo {
            device_id: row.device_id,
            key_hex,
            key_hash: row.key_hash,
            created_at: row.created_at,
        })
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    async fn test_service() -> (KeyService, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_in_memory().await.unwrap();
        db.touch_device("dev-1").await.unwrap();
        let secrets = Arc::new(SecretStore::new("test-master", false));
        (
            KeyService::new(db, secrets, dir.path().to_path_buf()),
            dir,
        )
    }

    #[tokio::test]
    async fn ensure_key_is_stable() {
        let (service, _dir) = test_service().await;
        let first = service.ensure_key("dev-1").await.unwrap();
        let second = service.ensure_key("dev-1").await.unwrap();
        assert_eq!(first.key_hex, second.key_hex);
        assert_eq!(first.key_hash, second.key_hash);
        assert_eq!(first.key_hex.len(), XOR_KEY_LEN * 2);
    }

    #[tokio::test]
    async fn verify_matches_fingerprint() {
        let (service, _dir) = test_service().await;
        let info = service.ensure_key("dev-1").await.unwrap();
        assert!(service.verify("dev-1", &info.key_hash).await.unwrap());
        assert!(service
            .verify("dev-1", &info.key_hash.to_uppercase())
            .await
            .unwrap());
        assert!(!service.verify("dev-1", "deadbeef").await.unwrap());
    }

    #[tokio::test]
    async fn issue_conflicts_unless_forced() {
        let (service, _dir) = test_service().await;
        let first = service.issue("dev-1", false).await.unwrap();
        assert!(matches!(
            service.issue("dev-1", false).await.unwrap_err(),
            ServiceError::Conflict(_)
        ));
        let replaced = service.issue("dev-1", true).await.unwrap();
        assert_ne!(first.key_hex, replaced.key_hex);
    }

    #[tokio::test]
    async fn rotate_changes_key() {
        let (service, _dir) = test_service().await;
        let before = service.ensure_key("dev-1").await.unwrap();
        let after = service.rotate("dev-1").await.unwrap();
        assert_ne!(before.key_hex, after.key_hex);

        let history = service.history("dev-1").await.unwrap();
        assert_eq!(history.len(), 2);
    }

    #[tokio::test]
    async fn revoke_then_get_is_not_found() {
        let (service, _dir) = test_service().await;
        service.ensure_key("dev-1").await.unwrap();
        service.revoke("dev-1").await.unwrap();
        assert!(matches!(
            service.get_key("dev-1").await.unwrap_err(),
            ServiceError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn legacy_key_file_is_imported() {
        let (service, dir) = test_service().await;
        let keys_dir = dir.path().join("keys");
        std::fs::create_dir_all(&keys_dir).unwrap();
        std::fs::write(
            keys_dir.join("dev-1_key.txt"),
            "000102030405060708090a0b0c0d0e0f\n",
        )
        .unwrap();

        let info = service.get_key("dev-1").await.unwrap();
        assert_eq!(info.key_hex, "000102030405060708090a0b0c0d0e0f");

        // Imported once; later reads come from the database.
        std::fs::remove_file(keys_dir.join("dev-1_key.txt")).unwrap();
        let again = service.get_key("dev-1").await.unwrap();
        assert_eq!(again.key_hex, info.key_hex);
    }
}
