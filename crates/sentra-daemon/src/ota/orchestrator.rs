//! OTA task lifecycle.
//!
//! Tasks move pending -> sent -> downloading -> installing -> completed,
//! with failed and cancelled reachable from any non-terminal state. The
//! daemon drives pending -> sent by publishing a control message; every
//! later move comes from device status reports.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::ServiceError;
use crate::storage::{Database, NewOtaTask, OtaTask, TaskStatus};
use crate::transport::Transport;
use sentra_core::unix_timestamp;

/// Control message sent to a device to start an update.
#[derive(Debug, Serialize)]
struct OtaControlMessage<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    firmware_url: &'a str,
    firmware_version: &'a str,
    firmware_hash: &'a str,
    task_id: &'a str,
    timestamp: i64,
}

#[derive(Clone)]
pub struct OtaService {
    db: Database,
    transport: Arc<dyn Transport>,
    external_base_url: String,
}

impl OtaService {
    pub fn new(db: Database, transport: Arc<dyn Transport>, external_base_url: String) -> Self {
        Self {
            db,
            transport,
            external_base_url: external_base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Create a pending task. The URL may be daemon-relative; it is made
    /// absolute when the task is pushed.
    pub async fn create_task(
        &self,
        device_id: &str,
        firmware_version: &str,
        firmware_url: &str,
        firmware_hash: &str,
    ) -> Result<OtaTask, ServiceError> {
        if firmware_url.trim().is_empty() {
            return Err(ServiceError::Validation("firmware URL must not be empty".to_string()));
        }
        self.db
            .get_device(device_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("device {device_id}")))?;

        let id = Uuid::new_v4().to_string();
        self.db
            .create_ota_task(&NewOtaTask {
                id: &id,
                device_id,
                firmware_version,
                firmware_url,
                firmware_hash,
            })
            .await?;
        info!(task_id = %id, device_id, firmware_version, "Created OTA task");
        self.get_task(&id).await
    }

    /// Publish the update command for a pending task.
    ///
    /// A publish failure fails the task and surfaces as a transport error:
    /// the device never heard about it, and retrying means creating a new
    /// task.
    pub async fn push_task(&self, task_id: &str) -> Result<OtaTask, ServiceError> {
        let task = self.get_task(task_id).await?;
        let status = parse_status(&task.status)?;
        if status != TaskStatus::Pending {
            return Err(ServiceError::Conflict(format!(
                "task {task_id} is {status}, only pending tasks can be pushed"
            )));
        }

        let firmware_url = self.absolutise(&task.firmware_url);
        let message = OtaControlMessage {
            kind: "ota_update",
            firmware_url: &firmware_url,
            firmware_version: &task.firmware_version,
            firmware_hash: &task.firmware_hash,
            task_id: &task.id,
            timestamp: unix_timestamp(),
        };
        let payload = serde_json::to_vec(&message)
            .map_err(|e| ServiceError::Validation(format!("control message encoding: {e}")))?;
        let topic = format!("devices/{}/control", task.device_id);

        match self.transport.publish(&topic, &payload).await {
            Ok(()) => {
                self.db
                    .set_ota_task_status(task_id, TaskStatus::Sent, None, None)
                    .await?;
                info!(task_id, topic = %topic, "Pushed OTA task");
                self.get_task(task_id).await
            }
            Err(err) => {
                warn!(task_id, "OTA push failed: {err}");
                self.db
                    .set_ota_task_status(task_id, TaskStatus::Failed, None, Some(&err.to_string()))
                    .await?;
                Err(ServiceError::TransportUnavailable(err.to_string()))
            }
        }
    }

    /// Apply a status report. Backward and terminal-escaping moves are
    /// rejected; duplicates of the current state are rejected the same way.
    pub async fn report_status(
        &self,
        task_id: &str,
        reported: &str,
        progress: Option<i64>,
        detail: Option<&str>,
    ) -> Result<OtaTask, ServiceError> {
        let task = self.get_task(task_id).await?;
        let current = parse_status(&task.status)?;
        let next = parse_status(reported)?;

        if !current.can_transition_to(next) {
            return Err(ServiceError::Conflict(format!(
                "task {task_id} cannot move from {current} to {next}"
            )));
        }
        if let Some(p) = progress {
            if !(0..=100).contains(&p) {
                return Err(ServiceError::Validation(format!(
                    "progress {p} is outside 0..=100"
                )));
            }
        }

        self.db
            .set_ota_task_status(task_id, next, progress, detail)
            .await?;
        info!(task_id, from = %current, to = %next, "OTA task status updated");
        self.get_task(task_id).await
    }

    /// Cancel a task that has not reached a terminal state.
    pub async fn cancel(&self, task_id: &str) -> Result<OtaTask, ServiceError> {
        self.report_status(
            task_id,
            TaskStatus::Cancelled.as_str(),
            None,
            Some("cancelled by operator"),
        )
        .await
    }

    pub async fn get_task(&self, task_id: &str) -> Result<OtaTask, ServiceError> {
        self.db
            .get_ota_task(task_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("OTA task {task_id}")))
    }

    pub async fn latest_for_device(&self, device_id: &str) -> Result<Option<OtaTask>, ServiceError> {
        Ok(self.db.latest_ota_task(device_id).await?)
    }

    pub async fn list_for_device(
        &self,
        device_id: &str,
        limit: i64,
    ) -> Result<Vec<OtaTask>, ServiceError> {
        Ok(self.db.list_ota_tasks_for_device(device_id, limit).await?)
    }

    fn absolutise(&self, url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else {
            format!("{}/{}", self.external_base_url, url.trim_start_matches('/'))
        }
    }
}

fn parse_status(s: &str) -> Result<TaskStatus, ServiceError> {
    TaskStatus::parse(s)
        .ok_or_else(|| ServiceError::Validation(format!("unknown task status {s:?}")))
}
