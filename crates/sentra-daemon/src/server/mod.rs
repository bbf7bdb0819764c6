//! HTTP API for the Sentra daemon.

pub mod error;
pub mod handlers;

use std::sync::Arc;

use axum::routing::{get, post, put};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::firmware::FirmwareService;
use crate::identity::{CertificateService, KeyService};
use crate::ota::OtaService;
use crate::storage::Database;

pub use error::ApiError;

/// Shared application state.
pub struct AppState {
    pub db: Database,
    pub certs: CertificateService,
    pub keys: KeyService,
    pub firmware: FirmwareService,
    pub ota: OtaService,
}

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let shared_state = Arc::new(state);

    Router::new()
        .route("/health", get(handlers::health_handler))
        // Devices
        .route("/api/v1/devices", post(handlers::register_device_handler))
        .route("/api/v1/devices", get(handlers::list_devices_handler))
        .route("/api/v1/devices/{device_id}", get(handlers::get_device_handler))
        .route("/api/v1/devices/{device_id}", put(handlers::update_device_handler))
        .route(
            "/api/v1/devices/{device_id}/metrics",
            get(handlers::list_metrics_handler),
        )
        // Certificates
        .route(
            "/api/v1/certificates/root",
            get(handlers::root_certificate_handler).post(handlers::root_certificate_handler),
        )
        .route(
            "/api/v1/certificates/verify",
            post(handlers::verify_certificate_pem_handler),
        )
        .route(
            "/api/v1/certificates/server",
            post(handlers::issue_server_certificate_handler),
        )
        .route(
            "/api/v1/certificates/server",
            get(handlers::get_server_certificate_handler),
        )
        .route(
            "/api/v1/certificates/{serial}/verify",
            get(handlers::verify_certificate_handler),
        )
        .route(
            "/api/v1/certificates/{serial}/revoke",
            post(handlers::revoke_certificate_handler),
        )
        .route(
            "/api/v1/devices/{device_id}/certificate",
            post(handlers::issue_device_certificate_handler),
        )
        .route(
            "/api/v1/devices/{device_id}/certificate",
            get(handlers::get_device_certificate_handler),
        )
        .route(
            "/api/v1/devices/{device_id}/certificates",
            get(handlers::list_device_certificates_handler),
        )
        // Masking keys
        .route("/api/v1/devices/{device_id}/key", post(handlers::issue_key_handler))
        .route("/api/v1/devices/{device_id}/key", get(handlers::get_key_handler))
        .route(
            "/api/v1/devices/{device_id}/key",
            axum::routing::delete(handlers::revoke_key_handler),
        )
        .route(
            "/api/v1/devices/{device_id}/key/rotate",
            post(handlers::rotate_key_handler),
        )
        .route(
            "/api/v1/devices/{device_id}/key/verify",
            post(handlers::verify_key_handler),
        )
        .route(
            "/api/v1/devices/{device_id}/keys",
            get(handlers::list_keys_handler),
        )
        // Firmware
        .route("/api/v1/firmware/build", post(handlers::build_firmware_handler))
        .route(
            "/api/v1/firmware/builds/{build_id}",
            get(handlers::get_build_handler),
        )
        .route(
            "/api/v1/devices/{device_id}/builds",
            get(handlers::list_builds_handler),
        )
        .route(
            "/api/v1/firmware/download/{device_id}",
            get(handlers::download_firmware_handler),
        )
        .route(
            "/api/v1/firmware/templates",
            post(handlers::upsert_template_handler),
        )
        // OTA tasks
        .route("/api/v1/ota/tasks", post(handlers::create_ota_task_handler))
        .route("/api/v1/ota/tasks/{task_id}", get(handlers::get_ota_task_handler))
        .route(
            "/api/v1/ota/tasks/{task_id}/push",
            post(handlers::push_ota_task_handler),
        )
        .route(
            "/api/v1/ota/tasks/{task_id}/status",
            post(handlers::report_ota_status_handler),
        )
        .route(
            "/api/v1/ota/tasks/{task_id}/cancel",
            post(handlers::cancel_ota_task_handler),
        )
        .route(
            "/api/v1/devices/{device_id}/ota",
            get(handlers::list_ota_tasks_handler),
        )
        .route(
            "/api/v1/devices/{device_id}/ota/latest",
            get(handlers::latest_ota_task_handler),
        )
        .with_state(shared_state)
        .layer(TraceLayer::new_for_http())
}
