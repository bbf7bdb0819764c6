//! Token codec for values the secret store writes to the database.
//!
//! Encrypted secrets travel as standard base64 text. Decoding enforces a
//! caller-supplied minimum payload length, so a truncated token is
//! rejected before any cryptography runs on it.

const ALPHABET: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

/// Reasons a stored token cannot be decoded.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("token length {0} is not valid base64")]
    Length(usize),

    #[error("byte {0:?} is not in the base64 alphabet")]
    Alphabet(char),

    #[error("decoded token is {got} bytes, below the {min}-byte minimum")]
    Truncated { got: usize, min: usize },
}

/// Encode raw token bytes as padded base64.
#[allow(clippy::cast_possible_truncation)]
pub fn encode_token(data: &[u8]) -> String {
    let mut out = Vec::with_capacity(data.len().div_ceil(3) * 4);
    let mut chunks = data.chunks_exact(3);
    for chunk in chunks.by_ref() {
        let n = u32::from_be_bytes([0, chunk[0], chunk[1], chunk[2]]);
        out.push(ALPHABET[(n >> 18) as usize & 63]);
        out.push(ALPHABET[(n >> 12) as usize & 63]);
        out.push(ALPHABET[(n >> 6) as usize & 63]);
        out.push(ALPHABET[n as usize & 63]);
    }
    match *chunks.remainder() {
        [a] => {
            let n = u32::from(a) << 16;
            out.push(ALPHABET[(n >> 18) as usize & 63]);
            out.push(ALPHABET[(n >> 12) as usize & 63]);
            out.extend_from_slice(b"==");
        }
        [a, b] => {
            let n = (u32::from(a) << 16) | (u32::from(b) << 8);
            out.push(ALPHABET[(n >> 18) as usize & 63]);
            out.push(ALPHABET[(n >> 12) as usize & 63]);
            out.push(ALPHABET[(n >> 6) as usize & 63]);
            out.push(b'=');
        }
        _ => {}
    }
    // The alphabet is pure ASCII.
    String::from_utf8(out).unwrap_or_default()
}

/// Decode a stored token, requiring at least `min_len` payload bytes.
#[allow(clippy::cast_possible_truncation)]
pub fn decode_token(input: &str, min_len: usize) -> Result<Vec<u8>, TokenError> {
    let trimmed = input.trim_end_matches('=');
    if trimmed.len() % 4 == 1 {
        return Err(TokenError::Length(input.len()));
    }

    let mut out = Vec::with_capacity(trimmed.len() * 3 / 4);
    let mut acc: u32 = 0;
    let mut bits = 0u32;
    for &byte in trimmed.as_bytes() {
        let sextet = sextet(byte).ok_or(TokenError::Alphabet(byte as char))?;
        acc = (acc << 6) | u32::from(sextet);
        bits += 6;
        if bits >= 8 {
            bits -= 8;
            out.push((acc >> bits) as u8);
        }
    }

    if out.len() < min_len {
        return Err(TokenError::Truncated {
            got: out.len(),
            min: min_len,
        });
    }
    Ok(out)
}

const fn sextet(byte: u8) -> Option<u8> {
    match byte {
        b'A'..=b'Z' => Some(byte - b'A'),
        b'a'..=b'z' => Some(byte - b'a' + 26),
        b'0'..=b'9' => Some(byte - b'0' + 52),
        b'+' => Some(62),
        b'/' => Some(63),
        _ => None,
    }
}
