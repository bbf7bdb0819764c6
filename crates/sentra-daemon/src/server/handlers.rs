//! API request handlers.

use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use super::error::ApiError;
use super::AppState;
use crate::firmware::BuildRequest;
use crate::storage::{Certificate, Device, DeviceKey, DeviceMetric, FirmwareBuild, OtaTask};

/// Health check endpoint.
pub async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "sentra-daemon"
    }))
}

// ---------------------------------------------------------------------------
// Devices

#[derive(Debug, Deserialize)]
pub struct RegisterDeviceRequest {
    pub device_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct DeviceResponse {
    pub device: Device,
}

#[derive(Debug, Serialize)]
pub struct DevicesListResponse {
    pub devices: Vec<Device>,
    pub total: usize,
}

pub async fn register_device_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RegisterDeviceRequest>,
) -> Result<(StatusCode, Json<DeviceResponse>), ApiError> {
    if payload.device_id.trim().is_empty() {
        return Err(ApiError {
            status: StatusCode::BAD_REQUEST,
            message: "device_id must not be empty".to_string(),
        });
    }
    let metadata = payload
        .metadata
        .map_or_else(|| "{}".to_string(), |m| m.to_string());
    let device = state
        .db
        .create_device(&payload.device_id, &payload.name, &metadata)
        .await?;
    info!(device_id = %device.id, "Registered device");
    Ok((StatusCode::CREATED, Json(DeviceResponse { device })))
}

pub async fn list_devices_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<DevicesListResponse>, ApiError> {
    let devices = state.db.list_devices().await?;
    let total = devices.len();
    Ok(Json(DevicesListResponse { devices, total }))
}

pub async fn get_device_handler(
    State(state): State<Arc<AppState>>,
    Path(device_id): Path<String>,
) -> Result<Json<DeviceResponse>, ApiError> {
    let device = state
        .db
        .get_device(&device_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("device {device_id}")))?;
    Ok(Json(DeviceResponse { device }))
}

#[derive(Debug, Deserialize)]
pub struct UpdateDeviceRequest {
    pub name: String,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

pub async fn update_device_handler(
    State(state): State<Arc<AppState>>,
    Path(device_id): Path<String>,
    Json(payload): Json<UpdateDeviceRequest>,
) -> Result<Json<DeviceResponse>, ApiError> {
    let metadata = payload
        .metadata
        .map_or_else(|| "{}".to_string(), |m| m.to_string());
    if !state.db.update_device(&device_id, &payload.name, &metadata).await? {
        return Err(ApiError::not_found(format!("device {device_id}")));
    }
    let device = state
        .db
        .get_device(&device_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("device {device_id}")))?;
    Ok(Json(DeviceResponse { device }))
}

#[derive(Debug, Deserialize)]
pub struct MetricsQuery {
    #[serde(default = "default_metrics_limit")]
    pub limit: i64,
}

const fn default_metrics_limit() -> i64 {
    100
}

#[derive(Debug, Serialize)]
pub struct MetricsResponse {
    pub metrics: Vec<DeviceMetric>,
}

pub async fn list_metrics_handler(
    State(state): State<Arc<AppState>>,
    Path(device_id): Path<String>,
    Query(query): Query<MetricsQuery>,
) -> Result<Json<MetricsResponse>, ApiError> {
    let metrics = state
        .db
        .list_metrics(&device_id, query.limit.clamp(1, 1000))
        .await?;
    Ok(Json(MetricsResponse { metrics }))
}

// ---------------------------------------------------------------------------
// Certificates

#[derive(Debug, Serialize)]
pub struct RootCertificateResponse {
    pub ca_cert_pem: String,
}

pub async fn root_certificate_handler(
    State(state): State<Arc<AppState>>,
) -> Json<RootCertificateResponse> {
    Json(RootCertificateResponse {
        ca_cert_pem: state.certs.root_certificate(),
    })
}

#[derive(Debug, Deserialize)]
pub struct IssueServerCertRequest {
    pub common_name: String,
    #[serde(default)]
    pub alt_names: Vec<String>,
    #[serde(default)]
    pub validity_days: Option<i64>,
}

pub async fn issue_server_certificate_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<IssueServerCertRequest>,
) -> Result<(StatusCode, Json<crate::identity::certs::CertBundle>), ApiError> {
    let bundle = state
        .certs
        .issue_server(&payload.common_name, &payload.alt_names, payload.validity_days)
        .await?;
    Ok((StatusCode::CREATED, Json(bundle)))
}

pub async fn get_server_certificate_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<crate::identity::certs::CertBundle>, ApiError> {
    Ok(Json(state.certs.server_bundle().await?))
}

#[derive(Debug, Default, Deserialize)]
pub struct IssueClientCertRequest {
    #[serde(default)]
    pub common_name: Option<String>,
    #[serde(default)]
    pub validity_days: Option<i64>,
}

pub async fn issue_device_certificate_handler(
    State(state): State<Arc<AppState>>,
    Path(device_id): Path<String>,
    payload: Option<Json<IssueClientCertRequest>>,
) -> Result<(StatusCode, Json<crate::identity::certs::CertBundle>), ApiError> {
    let Json(payload) = payload.unwrap_or_default();
    let bundle = state
        .certs
        .issue_for_device(
            &device_id,
            payload.common_name.as_deref(),
            payload.validity_days,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(bundle)))
}

pub async fn get_device_certificate_handler(
    State(state): State<Arc<AppState>>,
    Path(device_id): Path<String>,
) -> Result<Json<crate::identity::certs::CertBundle>, ApiError> {
    Ok(Json(state.certs.device_bundle(&device_id).await?))
}

#[derive(Debug, Serialize)]
pub struct CertificatesListResponse {
    pub certificates: Vec<Certificate>,
}

pub async fn list_device_certificates_handler(
    State(state): State<Arc<AppState>>,
    Path(device_id): Path<String>,
) -> Result<Json<CertificatesListResponse>, ApiError> {
    let mut certificates = state.certs.list_for_device(&device_id).await?;
    // Encrypted keys never leave the daemon through list endpoints.
    for cert in &mut certificates {
        cert.pem_key_enc.clear();
    }
    Ok(Json(CertificatesListResponse { certificates }))
}

pub async fn verify_certificate_handler(
    State(state): State<Arc<AppState>>,
    Path(serial): Path<String>,
) -> Result<Json<crate::identity::certs::VerifyReport>, ApiError> {
    Ok(Json(state.certs.verify(&serial).await?))
}

#[derive(Debug, Deserialize)]
pub struct VerifyPemRequest {
    pub certificate_pem: String,
}

/// Check a caller-supplied certificate against its validity window. The
/// certificate does not have to be one this daemon issued.
pub async fn verify_certificate_pem_handler(
    Json(payload): Json<VerifyPemRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    use sentra_crypto::error::CaError;

    match sentra_crypto::ca::verify_certificate(&payload.certificate_pem) {
        Ok(report) => Ok(Json(serde_json::json!({
            "valid": report.valid,
            "reason": report.reason,
            "subject": report.subject,
            "not_before": report.not_before,
            "not_after": report.not_after,
        }))),
        Err(CaError::InvalidPem(reason)) => Ok(Json(serde_json::json!({
            "valid": false,
            "reason": reason,
        }))),
        Err(err) => Err(crate::error::ServiceError::from(err).into()),
    }
}

pub async fn revoke_certificate_handler(
    State(state): State<Arc<AppState>>,
    Path(serial): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.certs.revoke(&serial).await?;
    Ok(Json(serde_json::json!({ "revoked": serial })))
}

// ---------------------------------------------------------------------------
// Masking keys

#[derive(Debug, Deserialize)]
pub struct IssueKeyQuery {
    #[serde(default)]
    pub force: bool,
}

pub async fn issue_key_handler(
    State(state): State<Arc<AppState>>,
    Path(device_id): Path<String>,
    Query(query): Query<IssueKeyQuery>,
) -> Result<(StatusCode, Json<crate::identity::keys::KeyInfo>), ApiError> {
    let info = state.keys.issue(&device_id, query.force).await?;
    Ok((StatusCode::CREATED, Json(info)))
}

pub async fn get_key_handler(
    State(state): State<Arc<AppState>>,
    Path(device_id): Path<String>,
) -> Result<Json<crate::identity::keys::KeyInfo>, ApiError> {
    Ok(Json(state.keys.get_key(&device_id).await?))
}

pub async fn rotate_key_handler(
    State(state): State<Arc<AppState>>,
    Path(device_id): Path<String>,
) -> Result<Json<crate::identity::keys::KeyInfo>, ApiError> {
    Ok(Json(state.keys.rotate(&device_id).await?))
}

pub async fn revoke_key_handler(
    State(state): State<Arc<AppState>>,
    Path(device_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.keys.revoke(&device_id).await?;
    Ok(Json(serde_json::json!({ "revoked": device_id })))
}

#[derive(Debug, Deserialize)]
pub struct VerifyKeyRequest {
    pub key_hash: String,
}

pub async fn verify_key_handler(
    State(state): State<Arc<AppState>>,
    Path(device_id): Path<String>,
    Json(payload): Json<VerifyKeyRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let matches = state.keys.verify(&device_id, &payload.key_hash).await?;
    Ok(Json(serde_json::json!({ "matches": matches })))
}

#[derive(Debug, Serialize)]
pub struct KeysListResponse {
    pub keys: Vec<DeviceKey>,
}

pub async fn list_keys_handler(
    State(state): State<Arc<AppState>>,
    Path(device_id): Path<String>,
) -> Result<Json<KeysListResponse>, ApiError> {
    let mut keys = state.keys.history(&device_id).await?;
    for key in &mut keys {
        key.key_enc.clear();
    }
    Ok(Json(KeysListResponse { keys }))
}

// ---------------------------------------------------------------------------
// Firmware

#[derive(Debug, Deserialize)]
pub struct BuildFirmwareRequest {
    pub device_id: String,
    pub version: String,
    #[serde(default)]
    pub wifi_ssid: String,
    #[serde(default)]
    pub wifi_password: String,
    #[serde(default)]
    pub template: Option<String>,
    #[serde(default = "default_use_masking")]
    pub use_masking: bool,
}

const fn default_use_masking() -> bool {
    true
}

#[derive(Debug, Serialize)]
pub struct BuildResponse {
    pub build: FirmwareBuild,
}

pub async fn build_firmware_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<BuildFirmwareRequest>,
) -> Result<(StatusCode, Json<BuildResponse>), ApiError> {
    let build = state
        .firmware
        .build(&BuildRequest {
            device_id: payload.device_id,
            version: payload.version,
            wifi_ssid: payload.wifi_ssid,
            wifi_password: payload.wifi_password,
            template: payload.template,
            use_masking: payload.use_masking,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(BuildResponse { build })))
}

pub async fn get_build_handler(
    State(state): State<Arc<AppState>>,
    Path(build_id): Path<String>,
) -> Result<Json<BuildResponse>, ApiError> {
    let build = state.firmware.get_build(&build_id).await?;
    Ok(Json(BuildResponse { build }))
}

#[derive(Debug, Serialize)]
pub struct BuildsListResponse {
    pub builds: Vec<FirmwareBuild>,
}

pub async fn list_builds_handler(
    State(state): State<Arc<AppState>>,
    Path(device_id): Path<String>,
) -> Result<Json<BuildsListResponse>, ApiError> {
    let builds = state.firmware.list_builds(&device_id).await?;
    Ok(Json(BuildsListResponse { builds }))
}

/// Serve the firmware image a device downloads during an update.
pub async fn download_firmware_handler(
    State(state): State<Arc<AppState>>,
    Path(device_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let (bytes, filename) = state.firmware.download_artifact(&device_id).await?;
    let headers = [
        (header::CONTENT_TYPE, "application/octet-stream".to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{filename}\""),
        ),
    ];
    Ok((headers, bytes))
}

#[derive(Debug, Deserialize)]
pub struct UpsertTemplateRequest {
    pub name: String,
    pub content: String,
}

pub async fn upsert_template_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<UpsertTemplateRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if payload.name.trim().is_empty() {
        return Err(ApiError {
            status: StatusCode::BAD_REQUEST,
            message: "template name must not be empty".to_string(),
        });
    }
    state.db.upsert_template(&payload.name, &payload.content).await?;
    Ok(Json(serde_json::json!({ "name": payload.name })))
}

// ---------------------------------------------------------------------------
// OTA tasks

#[derive(Debug, Deserialize)]
pub struct CreateOtaTaskRequest {
    pub device_id: String,
    #[serde(default)]
    pub firmware_build_id: Option<String>,
    #[serde(default)]
    pub firmware_version: Option<String>,
    #[serde(default)]
    pub firmware_url: Option<String>,
    #[serde(default)]
    pub firmware_hash: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct OtaTaskResponse {
    pub task: OtaTask,
}

/// Create an OTA task from either a completed build or an ad-hoc URL,
/// never both.
pub async fn create_ota_task_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateOtaTaskRequest>,
) -> Result<(StatusCode, Json<OtaTaskResponse>), ApiError> {
    let (version, url, hash) = match (payload.firmware_build_id, payload.firmware_url) {
        (Some(build_id), None) => {
            let build = state
                .db
                .get_build(&build_id)
                .await?
                .ok_or_else(|| ApiError::not_found(format!("build {build_id}")))?;
            if build.device_id != payload.device_id {
                return Err(ApiError {
                    status: StatusCode::BAD_REQUEST,
                    message: format!(
                        "build {build_id} does not belong to device {}",
                        payload.device_id
                    ),
                });
            }
            if build.status != "completed" {
                return Err(ApiError {
                    status: StatusCode::BAD_REQUEST,
                    message: format!("build {build_id} is {}, not completed", build.status),
                });
            }
            // Masked builds distribute the masked bytes; plain builds the
            // artifact itself.
            let hash = build.masked_hash.or(build.artifact_hash).ok_or_else(|| ApiError {
                status: StatusCode::BAD_REQUEST,
                message: format!("build {build_id} has no artifact hash"),
            })?;
            (
                payload.firmware_version.unwrap_or(build.version),
                format!("/api/v1/firmware/download/{}", payload.device_id),
                hash,
            )
        }
        (None, Some(url)) => {
            let version = payload.firmware_version.unwrap_or_default();
            let hash = payload.firmware_hash.unwrap_or_default();
            (version, url, hash)
        }
        _ => {
            return Err(ApiError {
                status: StatusCode::BAD_REQUEST,
                message: "exactly one of firmware_build_id or firmware_url is required"
                    .to_string(),
            });
        }
    };

    let task = state
        .ota
        .create_task(&payload.device_id, &version, &url, &hash)
        .await?;
    Ok((StatusCode::CREATED, Json(OtaTaskResponse { task })))
}

pub async fn get_ota_task_handler(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> Result<Json<OtaTaskResponse>, ApiError> {
    Ok(Json(OtaTaskResponse {
        task: state.ota.get_task(&task_id).await?,
    }))
}

pub async fn push_ota_task_handler(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> Result<Json<OtaTaskResponse>, ApiError> {
    Ok(Json(OtaTaskResponse {
        task: state.ota.push_task(&task_id).await?,
    }))
}

#[derive(Debug, Deserialize)]
pub struct ReportOtaStatusRequest {
    pub status: String,
    #[serde(default)]
    pub progress: Option<i64>,
    #[serde(default)]
    pub detail: Option<String>,
}

/// Status reports arrive from devices and are therefore unauthenticated,
/// same as transport-borne reports.
pub async fn report_ota_status_handler(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
    Json(payload): Json<ReportOtaStatusRequest>,
) -> Result<Json<OtaTaskResponse>, ApiError> {
    let task = state
        .ota
        .report_status(
            &task_id,
            &payload.status,
            payload.progress,
            payload.detail.as_deref(),
        )
        .await?;
    Ok(Json(OtaTaskResponse { task }))
}

pub async fn cancel_ota_task_handler(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> Result<Json<OtaTaskResponse>, ApiError> {
    Ok(Json(OtaTaskResponse {
        task: state.ota.cancel(&task_id).await?,
    }))
}

#[derive(Debug, Serialize)]
pub struct OtaTasksListResponse {
    pub tasks: Vec<OtaTask>,
}

#[derive(Debug, Deserialize)]
pub struct TasksQuery {
    #[serde(default = "default_tasks_limit")]
    pub limit: i64,
}

const fn default_tasks_limit() -> i64 {
    50
}

pub async fn list_ota_tasks_handler(
    State(state): State<Arc<AppState>>,
    Path(device_id): Path<String>,
    Query(query): Query<TasksQuery>,
) -> Result<Json<OtaTasksListResponse>, ApiError> {
    Ok(Json(OtaTasksListResponse {
        tasks: state
            .ota
            .list_for_device(&device_id, query.limit.clamp(1, 1000))
            .await?,
    }))
}

pub async fn latest_ota_task_handler(
    State(state): State<Arc<AppState>>,
    Path(device_id): Path<String>,
) -> Result<Json<OtaTaskResponse>, ApiError> {
    let task = state
        .ota
        .latest_for_device(&device_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("no OTA tasks for device {device_id}")))?;
    Ok(Json(OtaTaskResponse { task }))
}
