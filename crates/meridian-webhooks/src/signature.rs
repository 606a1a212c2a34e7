//! HMAC-SHA256 and constant-time token verification for the two upstream
//! webhook senders (`spec.md` §4.10). Built directly on `sha2`/`subtle`
//! rather than a dedicated HMAC crate, matching how the teacher's stack
//! already reaches for `sha2`/`subtle` for constant-time API key comparison.

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

const BLOCK_SIZE: usize = 64;

/// HMAC-SHA256 per RFC 2104, keyed with SHA-256 when the key exceeds the
/// block size.
pub fn hmac_sha256(key: &[u8], message: &[u8]) -> [u8; 32] {
    let mut block_key = [0u8; BLOCK_SIZE];
    if key.len() > BLOCK_SIZE {
        let digest = Sha256::digest(key);
        block_key[..digest.len()].copy_from_slice(&digest);
    } else {
        block_key[..key.len()].copy_from_slice(key);
    }

    let mut ipad = [0x36u8; BLOCK_SIZE];
    let mut opad = [0x5cu8; BLOCK_SIZE];
    for i in 0..BLOCK_SIZE {
        ipad[i] ^= block_key[i];
        opad[i] ^= block_key[i];
    }

    let mut inner = Sha256::new();
    inner.update(ipad);
    inner.update(message);
    let inner_digest = inner.finalize();

    let mut outer = Sha256::new();
    outer.update(opad);
    outer.update(inner_digest);
    outer.finalize().into()
}

pub fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}

/// Verifies a `sha256=<hex>` signature header over the raw request body.
pub fn verify_hmac_signature(secret: &[u8], body: &[u8], header: &str) -> bool {
    let Some(hex_sig) = header.strip_prefix("sha256=") else {
        return false;
    };
    let expected_hex = hex_encode(&hmac_sha256(secret, body));
    expected_hex.as_bytes().ct_eq(hex_sig.as_bytes()).into()
}

/// Constant-time comparison of a static bearer token against the configured
/// secret. Length is compared up front — `ConstantTimeEq` requires equal
/// lengths and would otherwise panic.
pub fn verify_static_token(expected: &str, provided: &str) -> bool {
    if expected.len() != provided.len() {
        return false;
    }
    expected.as_bytes().ct_eq(provided.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hmac_matches_rfc4231_test_case_one() {
        let key = [0x0bu8; 20];
        let mac = hmac_sha256(&key, b"Hi There");
        assert_eq!(
            hex_encode(&mac),
            "b0344c61d8db38535ca8afceaf0bf12b881dc200c9833da726e9376c2e32cff"
        );
    }

    #[test]
    fn verify_hmac_signature_rejects_missing_prefix() {
        assert!(!verify_hmac_signature(b"secret", b"body", "deadbeef"));
    }

    #[test]
    fn verify_hmac_signature_accepts_matching_digest() {
        let mac = hmac_sha256(b"secret", b"payload");
        let header = format!("sha256={}", hex_encode(&mac));
        assert!(verify_hmac_signature(b"secret", b"payload", &header));
    }

    #[test]
    fn verify_static_token_rejects_different_length() {
        assert!(!verify_static_token("abc", "abcd"));
    }

    #[test]
    fn verify_static_token_accepts_exact_match() {
        assert!(verify_static_token("my-token", "my-token"));
    }
}
