//! Payload signing and verification.
//!
//! Format: `sha256=<hex(HMAC-SHA256(body, secret))>` in the
//! `X-Webhook-Signature` header. Verification compares in constant time.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Signature header carried on every signed delivery
pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";

/// Compute the signature header value for a body.
#[must_use]
pub fn sign(body: &[u8], secret: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

/// Verify a signature header value against a body in constant time.
#[must_use]
pub fn verify(body: &[u8], signature: &str, secret: &str) -> bool {
    let expected = sign(body, secret);
    constant_time_eq(signature.as_bytes(), expected.as_bytes())
}

/// Constant-time byte comparison
#[must_use]
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_format() {
        let sig = sign(b"{}", "x1x2x3x4x5");
        assert!(sig.starts_with("sha256="));
        assert_eq!(sig.len(), "sha256=".len() + 64);
        assert!(sig["sha256=".len()..].bytes().all(|b| b.is_ascii_hexdigit()));
    }

    #[test]
    fn test_round_trip() {
        let body = br#"{"event":"issue.created"}"#;
        let secret = "x1x2x3x4x5";

        let sig = sign(body, secret);
        assert!(verify(body, &sig, secret));
    }

    #[test]
    fn test_tampered_body_rejected() {
        let secret = "x1x2x3x4x5";
        let sig = sign(b"original", secret);
        assert!(!verify(b"tampered", &sig, secret));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let sig = sign(b"body", "secret-one");
        assert!(!verify(b"body", &sig, "secret-two"));
    }

    #[test]
    fn test_signature_is_deterministic() {
        assert_eq!(sign(b"body", "s3cr3t-key"), sign(b"body", "s3cr3t-key"));
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
    }
}
