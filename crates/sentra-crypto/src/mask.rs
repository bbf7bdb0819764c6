//! XOR masking for firmware binaries.
//!
//! Devices in the field unmask firmware with a repeating 16-byte key they
//! received at provisioning time. XOR is an involution, so the same routine
//! serves both directions.

use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::error::CryptoError;

/// Length of a device masking key in bytes.
pub const XOR_KEY_LEN: usize = 16;

/// Generate a fresh random masking key.
pub fn generate_key() -> Vec<u8> {
    let mut key = vec![0u8; XOR_KEY_LEN];
    rand::thread_rng().fill_bytes(&mut key);
    key
}

/// SHA-256 fingerprint of a key, hex-encoded. Used to verify a device holds
/// the expected key without transmitting the key itself.
pub fn key_fingerprint(key: &[u8]) -> String {
    hex::encode(Sha256::digest(key))
}

/// Mask (or unmask) data with a repeating XOR key.
pub fn xor_mask(data: &[u8], key: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if key.is_empty() {
        return Err(CryptoError::InvalidKey("empty masking key".to_string()));
    }
    Ok(data
        .iter()
        .enumerate()
        .map(|(i, byte)| byte ^ key[i % key.len()])
        .collect())
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn masking_twice_restores_input() {
        let key = generate_key();
        let data = b"firmware image bytes \x00\xff\x7f";
        let masked = xor_mask(data, &key).unwrap();
        assert_ne!(masked.as_slice(), data.as_slice());
        let restored = xor_mask(&masked, &key).unwrap();
        assert_eq!(restored.as_slice(), data.as_slice());
    }

    #[test]
    fn empty_data_masks_to_empty() {
        let key = generate_key();
        assert!(xor_mask(&[], &key).unwrap().is_empty());
    }

    #[test]
    fn empty_key_rejected() {
        assert!(xor_mask(b"data", &[]).is_err());
    }

    #[test]
    fn generated_keys_are_distinct() {
        assert_ne!(generate_key(), generate_key());
    }

    #[test]
    fn fingerprint_is_hex_sha256() {
        let fp = key_fingerprint(b"0123456789abcdef");
        assert_eq!(fp.len(), 64);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
