//! Model payload integrity: base64 transport encoding and SHA-256 digests.
//!
//! The coordinator never interprets payload bytes; it only checks that the
//! decoded bytes hash to the digest the client declared.

use base64::Engine;
use sha2::{Digest, Sha256};

use crate::ProtocolError;

/// Compute SHA-256 hash of data.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let hash = Sha256::digest(data);
    let mut result = [0u8; 32];
    result.copy_from_slice(&hash);
    result
}

/// Lowercase hex SHA-256 digest of a model payload.
pub fn compute_model_hash(payload: &[u8]) -> String {
    hex::encode(sha256(payload))
}

/// Encode payload bytes for a JSON message.
pub fn encode_payload(payload: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(payload)
}

/// Decode a base64 payload field.
pub fn decode_payload(encoded: &str) -> Result<Vec<u8>, ProtocolError> {
    base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|e| ProtocolError::Base64(e.to_string()))
}

/// Check `payload` against a declared hex digest (case-insensitive).
pub fn verify_model_hash(payload: &[u8], declared_hash: &str) -> bool {
    compute_model_hash(payload).eq_ignore_ascii_case(declared_hash.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_digest() {
        assert_eq!(
            compute_model_hash(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_verify_is_case_insensitive() {
        let hash = compute_model_hash(b"weights").to_uppercase();
        assert!(verify_model_hash(b"weights", &hash));
        assert!(!verify_model_hash(b"other", &hash));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_payload("not*base64!").is_err());
        assert_eq!(decode_payload(&encode_payload(b"\x00\x01")).unwrap(), vec![0, 1]);
    }
}
