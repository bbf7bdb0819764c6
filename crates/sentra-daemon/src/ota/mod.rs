//! OTA update task orchestration.

pub mod orchestrator;

pub use orchestrator::OtaService;
