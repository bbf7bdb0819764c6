//! Database models for the Sentra daemon.

use serde::{Deserialize, Serialize};

/// Device record from the database.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Device {
    pub id: String,
    pub name: String,
    pub status: String,
    pub registered_at: i64,
    pub last_seen: i64,
    pub metadata: String,
}

/// Certificate record from the database.
///
/// `pem_key_enc` holds the private key as a secret-store token; callers go
/// through the identity service to read it in the clear.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Certificate {
    pub id: String,
    pub device_id: Option<String>,
    pub kind: String,
    pub subject_cn: String,
    pub serial_number: String,
    pub not_before: i64,
    pub not_after: i64,
    pub pem_cert: String,
    pub pem_key_enc: String,
    pub revoked: i64,
    pub active: i64,
    pub created_at: i64,
}

/// Masking key record. The key bytes are stored encrypted; `key_hash` is
/// the SHA-256 fingerprint devices report back for verification.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DeviceKey {
    pub id: String,
    pub device_id: String,
    pub key_enc: String,
    pub key_hash: String,
    pub is_active: i64,
    pub created_at: i64,
    pub revoked_at: Option<i64>,
}

/// Firmware build record from the database.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct FirmwareBuild {
    pub id: String,
    pub device_id: String,
    pub version: String,
    pub status: String,
    pub build_kind: String,
    pub source_path: Option<String>,
    pub artifact_path: Option<String>,
    pub artifact_hash: Option<String>,
    pub binary_size: Option<i64>,
    pub masked_hash: Option<String>,
    pub key_fingerprint: Option<String>,
    pub error: Option<String>,
    pub created_at: i64,
    pub completed_at: Option<i64>,
}

/// OTA task record from the database.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct OtaTask {
    pub id: String,
    pub device_id: String,
    pub firmware_version: String,
    pub firmware_url: String,
    pub firmware_hash: String,
    pub status: String,
    pub progress: i64,
    pub detail: Option<String>,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
}

/// One telemetry sample extracted from a device message.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DeviceMetric {
    pub id: i64,
    pub device_id: String,
    pub metric: String,
    pub value: f64,
    pub recorded_at: i64,
}

/// Stored firmware source template.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct FirmwareTemplate {
    pub id: String,
    pub name: String,
    pub content: String,
    pub created_at: i64,
}

/// Device liveness status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStatus {
    Online,
    Offline,
}

impl DeviceStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
        }
    }
}

impl std::fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Certificate role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertKind {
    Root,
    Server,
    Client,
}

impl CertKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Root => "root",
            Self::Server => "server",
            Self::Client => "client",
        }
    }
}

impl std::fmt::Display for CertKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Whether a build's distributable artifact was XOR-masked with the
/// device key or left as plain bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildKind {
    Plain,
    Masked,
}

impl BuildKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Plain => "plain",
            Self::Masked => "masked",
        }
    }
}

impl std::fmt::Display for BuildKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Firmware build lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStatus {
    Pending,
    Building,
    Completed,
    Failed,
}

impl BuildStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Building => "building",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// OTA task lifecycle.
///
/// Progress states are ordered; a device may legitimately skip intermediate
/// states when its reports are coalesced, so any strictly forward move is
/// accepted. `Failed` and `Cancelled` are reachable from every non-terminal
/// state, and terminal states accept no further transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Sent,
    Downloading,
    Installing,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Downloading => "downloading",
            Self::Installing => "installing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "sent" => Some(Self::Sent),
            "downloading" => Some(Self::Downloading),
            "installing" => Some(Self::Installing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    const fn progress_rank(&self) -> Option<u8> {
        match self {
            Self::Pending => Some(0),
            Self::Sent => Some(1),
            Self::Downloading => Some(2),
            Self::Installing => Some(3),
            Self::Completed => Some(4),
            Self::Failed | Self::Cancelled => None,
        }
    }

    pub fn can_transition_to(&self, next: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            Self::Failed | Self::Cancelled => true,
            _ => match (self.progress_rank(), next.progress_rank()) {
                (Some(cur), Some(nxt)) => nxt > cur,
                _ => false,
            },
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn task_status_forward_moves_allowed() {
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Sent));
        assert!(TaskStatus::Sent.can_transition_to(TaskStatus::Downloading));
        assert!(TaskStatus::Downloading.can_transition_to(TaskStatus::Installing));
        assert!(TaskStatus::Installing.can_transition_to(TaskStatus::Completed));
        // skipping intermediate states is allowed
        assert!(TaskStatus::Sent.can_transition_to(TaskStatus::Completed));
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Installing));
    }

    #[test]
    fn task_status_backward_moves_rejected() {
        assert!(!TaskStatus::Downloading.can_transition_to(TaskStatus::Sent));
        assert!(!TaskStatus::Installing.can_transition_to(TaskStatus::Pending));
        assert!(!TaskStatus::Sent.can_transition_to(TaskStatus::Sent));
    }

    #[test]
    fn task_status_terminal_states_frozen() {
        for terminal in [TaskStatus::Completed, TaskStatus::Failed, TaskStatus::Cancelled] {
            for next in [
                TaskStatus::Pending,
                TaskStatus::Sent,
                TaskStatus::Downloading,
                TaskStatus::Installing,
                TaskStatus::Completed,
                TaskStatus::Failed,
                TaskStatus::Cancelled,
            ] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn task_status_failure_from_any_progress_state() {
        for cur in [
            TaskStatus::Pending,
            TaskStatus::Sent,
            TaskStatus::Downloading,
            TaskStatus::Installing,
        ] {
            assert!(cur.can_transition_to(TaskStatus::Failed));
            assert!(cur.can_transition_to(TaskStatus::Cancelled));
        }
    }

    #[test]
    fn task_status_round_trips_through_strings() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::Sent,
            TaskStatus::Downloading,
            TaskStatus::Installing,
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::Cancelled,
        ] {
            assert_eq!(TaskStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(TaskStatus::parse("bogus"), None);
    }
}
