//! Service-level errors shared across daemon subsystems.

use crate::storage::DatabaseError;
use sentra_crypto::error::{CaError, CryptoError};

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Certificate authority unavailable: {0}")]
    CaUnavailable(String),

    #[error("Transport unavailable: {0}")]
    TransportUnavailable(String),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<CryptoError> for ServiceError {
    fn from(err: CryptoError) -> Self {
        Self::Crypto(err.to_string())
    }
}

impl From<CaError> for ServiceError {
    fn from(err: CaError) -> Self {
        match err {
            CaError::Unavailable(msg) => Self::CaUnavailable(msg),
            other => Self::Crypto(other.to_string()),
        }
    }
}
