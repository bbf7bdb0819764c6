//! Device and telemetry queries.

use sentra_core::unix_timestamp;

use super::db::Database;
use super::models::{Device, DeviceMetric, DeviceStatus};
use super::DatabaseError;

impl Database {
    /// Register a device explicitly. Fails with `Conflict` if the id exists.
    pub async fn create_device(
        &self,
        id: &str,
        name: &str,
        metadata: &str,
    ) -> Result<Device, DatabaseError> {
        let now = unix_timestamp();
        sqlx::query(
            "INSERT INTO devices (id, name, status, registered_at, last_seen, metadata)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(name)
        .bind(DeviceStatus::Offline.as_str())
        .bind(now)
        .bind(now)
        .bind(metadata)
        .execute(self.pool())
        .await?;

        self.get_device(id)
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("device {id}")))
    }

    /// Record traffic from a device: create the row on first contact, then
    /// bump `last_seen` and force status online.
    pub async fn touch_device(&self, id: &str) -> Result<(), DatabaseError> {
        let now = unix_timestamp();
        sqlx::query(
            "INSERT INTO devices (id, name, status, registered_at, last_seen, metadata)
             VALUES (?, '', ?, ?, ?, '{}')
             ON CONFLICT(id) DO UPDATE SET last_seen = excluded.last_seen, status = excluded.status",
        )
        .bind(id)
        .bind(DeviceStatus::Online.as_str())
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn get_device(&self, id: &str) -> Result<Option<Device>, DatabaseError> {
        let device = sqlx::query_as::<_, Device>("SELECT * FROM devices WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        Ok(device)
    }

    pub async fn list_devices(&self) -> Result<Vec<Device>, DatabaseError> {
        let devices = sqlx::query_as::<_, Device>("SELECT * FROM devices ORDER BY registered_at")
            .fetch_all(self.pool())
            .await?;
        Ok(devices)
    }

    pub async fn update_device(
        &self,
        id: &str,
        name: &str,
        metadata: &str,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query("UPDATE devices SET name = ?, metadata = ? WHERE id = ?")
            .bind(name)
            .bind(metadata)
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Demote online devices whose `last_seen` is older than the cutoff.
    /// Returns the ids that were marked offline.
    pub async fn mark_offline_stale(&self, cutoff: i64) -> Result<Vec<String>, DatabaseError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "UPDATE devices SET status = ? WHERE status = ? AND last_seen < ? RETURNING id",
        )
        .bind(DeviceStatus::Offline.as_str())
        .bind(DeviceStatus::Online.as_str())
        .bind(cutoff)
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    pub async fn insert_metric(
        &self,
        device_id: &str,
        metric: &str,
        value: f64,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            "INSERT INTO device_metrics (device_id, metric, value, recorded_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(device_id)
        .bind(metric)
        .bind(value)
        .bind(unix_timestamp())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn list_metrics(
        &self,
        device_id: &str,
        limit: i64,
    ) -> Result<Vec<DeviceMetric>, DatabaseError> {
        let metrics = sqlx::query_as::<_, DeviceMetric>(
            "SELECT * FROM device_metrics WHERE device_id = ?
             ORDER BY recorded_at DESC, id DESC LIMIT ?",
        )
        .bind(device_id)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;
        Ok(metrics)
    }
}
