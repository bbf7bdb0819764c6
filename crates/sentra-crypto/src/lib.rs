//! Cryptographic building blocks for Sentra.
//!
//! - [`secret`]: PBKDF2-derived AEAD secret store for values at rest
//! - [`ca`]: self-signed root CA plus server/client leaf issuance
//! - [`mask`]: XOR firmware masking and key fingerprinting

pub mod ca;
pub mod error;
pub mod mask;
pub mod secret;

pub use ca::CertificateAuthority;
pub use error::CryptoError;
pub use secret::SecretStore;
