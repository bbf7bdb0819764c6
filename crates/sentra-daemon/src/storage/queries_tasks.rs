//! OTA task queries.
//!
//! State transitions are validated by the orchestrator, not here; the
//! storage layer only persists what it is told.

use sentra_core::unix_timestamp;

use super::db::Database;
use super::models::{OtaTask, TaskStatus};
use super::DatabaseError;

/// Parameters for inserting an OTA task row.
pub struct NewOtaTask<'a> {
    pub id: &'a str,
    pub device_id: &'a str,
    pub firmware_version: &'a str,
    pub firmware_url: &'a str,
    pub firmware_hash: &'a str,
}

impl Database {
    pub async fn create_ota_task(&self, params: &NewOtaTask<'_>) -> Result<(), DatabaseError> {
        sqlx::query(
            "INSERT INTO ota_tasks
             (id, device_id, firmware_version, firmware_url, firmware_hash, status, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(params.id)
        .bind(params.device_id)
        .bind(params.firmware_version)
        .bind(params.firmware_url)
        .bind(params.firmware_hash)
        .bind(TaskStatus::Pending.as_str())
        .bind(unix_timestamp())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn get_ota_task(&self, id: &str) -> Result<Option<OtaTask>, DatabaseError> {
        let task = sqlx::query_as::<_, OtaTask>("SELECT * FROM ota_tasks WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        Ok(task)
    }

    pub async fn set_ota_task_status(
        &self,
        id: &str,
        status: TaskStatus,
        progress: Option<i64>,
        detail: Option<&str>,
    ) -> Result<(), DatabaseError> {
        let now = unix_timestamp();
        // started_at is stamped on the move out of pending, completed_at on
        // entering a terminal state; both only once. A completed task always
        // reads 100% regardless of what the device last reported.
        sqlx::query(
            "UPDATE ota_tasks SET
                status = ?,
                progress = CASE WHEN ? = 'completed' THEN 100
                                ELSE COALESCE(?, progress) END,
                detail = COALESCE(?, detail),
                started_at = CASE WHEN started_at IS NULL AND ? != 'pending'
                                  THEN ? ELSE started_at END,
                completed_at = CASE WHEN completed_at IS NULL AND ? IN ('completed', 'failed', 'cancelled')
                                    THEN ? ELSE completed_at END
             WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(status.as_str())
        .bind(progress)
        .bind(detail)
        .bind(status.as_str())
        .bind(now)
        .bind(status.as_str())
        .bind(now)
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Most recent task for a device, regardless of state.
    pub async fn latest_ota_task(
        &self,
        device_id: &str,
    ) -> Result<Option<OtaTask>, DatabaseError> {
        let task = sqlx::query_as::<_, OtaTask>(
            "SELECT * FROM ota_tasks WHERE device_id = ?
             ORDER BY created_at DESC, id DESC LIMIT 1",
        )
        .bind(device_id)
        .fetch_optional(self.pool())
        .await?;
        Ok(task)
    }

    pub async fn list_ota_tasks_for_device(
        &self,
        device_id: &str,
        limit: i64,
    ) -> Result<Vec<OtaTask>, DatabaseError> {
        let tasks = sqlx::query_as::<_, OtaTask>(
            "SELECT * FROM ota_tasks WHERE device_id = ?
             ORDER BY created_at DESC, id DESC LIMIT ?",
        )
        .bind(device_id)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;
        Ok(tasks)
    }

    /// Non-terminal tasks for a device, oldest first.
    pub async fn open_ota_tasks_for_device(
        &self,
        device_id: &str,
    ) -> Result<Vec<OtaTask>, DatabaseError> {
        let tasks = sqlx::query_as::<_, OtaTask>(
            "SELECT * FROM ota_tasks
             WHERE device_id = ? AND status NOT IN ('completed', 'failed', 'cancelled')
             ORDER BY created_at, id",
        )
        .bind(device_id)
        .fetch_all(self.pool())
        .await?;
        Ok(tasks)
    }
}
