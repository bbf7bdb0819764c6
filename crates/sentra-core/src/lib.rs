//! Sentra Core Library
//!
//! Shared functionality for Sentra components:
//! - Configuration resolution and env overrides
//! - SQLite pool helpers and common database errors
//! - Base64 encoding for secret-store tokens
//! - Tracing initialisation

pub mod config;
pub mod db;
pub mod encoding;
pub mod tracing_init;

pub use config::Config;
pub use db::{DatabaseError, unix_timestamp};
