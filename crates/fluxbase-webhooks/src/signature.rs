//! Delivery signatures.
//!
//! Outbound deliveries carry `X-Webhook-Signature: hex(HMAC-SHA256(secret,
//! body))`. Receivers that want replay protection use the timestamped
//! scheme: `t=<unix>,v1=<hex>` where the signature covers
//! `"<timestamp>.<body>"`. Verification always compares in constant time.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Default verification tolerance: five minutes either way.
pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

/// Hex HMAC-SHA256 of `body` under `secret`.
pub fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts any key length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Build a timestamped signature header value.
pub fn timestamped_signature(secret: &str, timestamp: i64, body: &[u8]) -> String {
    let mut message = timestamp.to_string().into_bytes();
    message.push(b'.');
    message.extend_from_slice(body);
    format!("t={},v1={}", timestamp, sign(secret, &message))
}

/// Why a timestamped signature failed to verify.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum VerifyError {
    #[error("malformed signature header")]
    Malformed,
    #[error("timestamp outside tolerance")]
    TimestampOutOfRange,
    #[error("no matching signature")]
    NoMatch,
}

/// Verify a `t=...,v1=...[,v1=...]` header against `body`.
///
/// The timestamp must be within `tolerance_secs` of `now_unix`, and at
/// least one `v1` entry must match.
pub fn verify_timestamped(
    header: &str,
    body: &[u8],
    secret: &str,
    tolerance_secs: i64,
    now_unix: i64,
) -> Result<(), VerifyError> {
    let mut timestamp: Option<i64> = None;
    let mut candidates: Vec<&str> = Vec::new();

    for part in header.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else {
            return Err(VerifyError::Malformed);
        };
        match key {
            "t" => timestamp = value.parse().ok(),
            "v1" => candidates.push(value),
            // Unknown schemes are ignored for forward compatibility.
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(VerifyError::Malformed)?;
    if candidates.is_empty() {
        return Err(VerifyError::Malformed);
    }
    if (now_unix - timestamp).abs() > tolerance_secs {
        return Err(VerifyError::TimestampOutOfRange);
    }

    let mut message = timestamp.to_string().into_bytes();
    message.push(b'.');
    message.extend_from_slice(body);
    let expected = sign(secret, &message);

    if candidates
        .iter()
        .any(|candidate| constant_time_eq(candidate, &expected))
    {
        Ok(())
    } else {
        Err(VerifyError::NoMatch)
    }
}

/// Constant-time string comparison to prevent timing attacks.
fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes()
        .zip(b.bytes())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signing_is_deterministic() {
        let body = br#"{"event":"INSERT"}"#;
        assert_eq!(sign("k", body), sign("k", body));
    }

    #[test]
    fn signature_matches_known_vector() {
        // HMAC-SHA256("key", "The quick brown fox jumps over the lazy dog")
        let expected = "f7bc83f430538424b13298e6aa6fb143ef4d59a14946175997479dbc2d1a3cd8";
        assert_eq!(
            sign("key", b"The quick brown fox jumps over the lazy dog"),
            expected
        );
    }

    #[test]
    fn tampered_body_changes_signature() {
        let original = sign("k", br#"{"event":"INSERT"}"#);
        let tampered = sign("k", br#"{"event":"iNSERT"}"#);
        assert_ne!(original, tampered);
        // The hex output should differ almost everywhere, not in one spot.
        let differing = original
            .bytes()
            .zip(tampered.bytes())
            .filter(|(a, b)| a != b)
            .count();
        assert!(differing > 16, "only {differing} hex chars changed");
    }

    #[test]
    fn different_secrets_differ() {
        let body = b"payload";
        assert_ne!(sign("a", body), sign("b", body));
    }

    #[test]
    fn timestamped_round_trip() {
        let body = br#"{"event":"UPDATE"}"#;
        let header = timestamped_signature("secret", 1_700_000_000, body);
        verify_timestamped(&header, body, "secret", DEFAULT_TOLERANCE_SECS, 1_700_000_100)
            .unwrap();
    }

    #[test]
    fn stale_timestamp_is_rejected() {
        let body = b"x";
        let header = timestamped_signature("secret", 1_700_000_000, body);
        let result = verify_timestamped(&header, body, "secret", 300, 1_700_000_400);
        assert_eq!(result, Err(VerifyError::TimestampOutOfRange));

        // Future timestamps beyond tolerance are equally invalid.
        let result = verify_timestamped(&header, body, "secret", 300, 1_699_999_600);
        assert_eq!(result, Err(VerifyError::TimestampOutOfRange));
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let body = b"x";
        let header = timestamped_signature("secret", 1_700_000_000, body);
        let result = verify_timestamped(&header, body, "other", 300, 1_700_000_000);
        assert_eq!(result, Err(VerifyError::NoMatch));
    }

    #[test]
    fn any_matching_v1_passes() {
        let body = b"x";
        let good = timestamped_signature("secret", 1_700_000_000, body);
        let good_sig = good.split("v1=").nth(1).unwrap();
        let header = format!("t=1700000000,v1={},v1={}", "0".repeat(64), good_sig);
        verify_timestamped(&header, body, "secret", 300, 1_700_000_000).unwrap();
    }

    #[test]
    fn malformed_headers_are_rejected() {
        assert_eq!(
            verify_timestamped("", b"x", "s", 300, 0),
            Err(VerifyError::Malformed)
        );
        assert_eq!(
            verify_timestamped("t=123", b"x", "s", 300, 123),
            Err(VerifyError::Malformed)
        );
        assert_eq!(
            verify_timestamped("v1=abc", b"x", "s", 300, 0),
            Err(VerifyError::Malformed)
        );
        assert_eq!(
            verify_timestamped("garbage", b"x", "s", 300, 0),
            Err(VerifyError::Malformed)
        );
    }
}
