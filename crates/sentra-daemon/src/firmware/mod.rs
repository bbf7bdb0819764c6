//! Firmware build pipeline: template rendering, optional compilation and
//! per-device masking.

pub mod build;
pub mod render;

pub use build::{BuildRequest, FirmwareService};
