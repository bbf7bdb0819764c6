//! Sentra daemon library.
//!
//! Device identity (certificates and masking keys), firmware build
//! pipeline, OTA task orchestration and the transport bridge that feeds
//! device traffic into all of it.

pub mod error;
pub mod firmware;
pub mod identity;
pub mod ota;
pub mod server;
pub mod storage;
pub mod transport;

pub use error::ServiceError;
