//! Device identity services: certificate issuance and masking keys.

pub mod certs;
pub mod keys;

pub use certs::CertificateService;
pub use keys::KeyService;
