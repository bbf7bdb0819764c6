//! SQLite storage for the Sentra daemon.
//!
//! Provides persistence for devices, certificates, masking keys, firmware
//! builds, OTA tasks, device metrics and firmware templates.

mod db;
mod models;
mod queries_builds;
mod queries_certs;
mod queries_devices;
mod queries_keys;
mod queries_tasks;

pub use db::Database;
pub use models::*;
pub use queries_builds::CompletedBuild;
pub use queries_certs::NewCertificate;
pub use queries_tasks::NewOtaTask;
pub use sentra_core::db::DatabaseError;
