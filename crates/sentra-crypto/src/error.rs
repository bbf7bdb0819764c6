//! Error types for the crypto layer.

/// Errors from the secret store and masking primitives.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Decryption failed: {0}")]
    Decryption(String),

    #[error("Invalid key material: {0}")]
    InvalidKey(String),
}

/// Errors from the certificate authority.
#[derive(Debug, thiserror::Error)]
pub enum CaError {
    #[error("Certificate authority unavailable: {0}")]
    Unavailable(String),

    #[error("Certificate generation failed: {0}")]
    Generation(String),

    #[error("Invalid PEM material: {0}")]
    InvalidPem(String),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        source: std::io::Error,
    },
}

impl From<rcgen::Error> for CaError {
    fn from(err: rcgen::Error) -> Self {
        Self::Generation(err.to_string())
    }
}
