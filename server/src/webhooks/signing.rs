//! HMAC-SHA256 Webhook Signing
//!
//! Canonicalizes and signs outbound event payloads.

use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the payload signature.
pub const SIGNATURE_HEADER: &str = "X-Go-Wa-Signature";

/// Canonical JSON encoding: compact, object keys sorted at every depth.
pub fn canonical_json(payload: &Value) -> Vec<u8> {
    // Serializing a `Value` cannot fail
    serde_json::to_vec(&sorted(payload)).unwrap_or_default()
}

/// Rebuild objects in key order so the output does not depend on whether
/// `serde_json` preserves insertion order.
fn sorted(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.clone(), sorted(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
        other => other.clone(),
    }
}

/// Sign a payload with HMAC-SHA256 and return the hex-encoded signature.
pub fn sign_payload(secret: &str, payload: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Value of [`SIGNATURE_HEADER`]: `sha256=<hex>`.
pub fn signature_header(secret: &str, payload: &[u8]) -> String {
    format!("sha256={}", sign_payload(secret, payload))
}

/// Verify a [`SIGNATURE_HEADER`] value (with or without the `sha256=` prefix).
pub fn verify_signature(secret: &str, payload: &[u8], signature: &str) -> bool {
    let signature = signature.strip_prefix("sha256=").unwrap_or(signature);
    let expected = sign_payload(secret, payload);
    // Constant-time comparison
    expected.len() == signature.len()
        && expected
            .as_bytes()
            .iter()
            .zip(signature.as_bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sign_and_verify() {
        let secret = "test_secret_12345";
        let payload = b"hello world";
        let header = signature_header(secret, payload);
        assert!(header.starts_with("sha256="));
        assert!(verify_signature(secret, payload, &header));
        assert!(verify_signature(secret, payload, &sign_payload(secret, payload)));
        assert!(!verify_signature("wrong_secret", payload, &header));
        assert!(!verify_signature(secret, b"wrong payload", &header));
    }

    #[test]
    fn known_vector() {
        // RFC 4231 test case 2
        assert_eq!(
            sign_payload("Jefe", b"what do ya want for nothing?"),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn canonical_form_ignores_key_order() {
        let a = json!({"type": "message", "agentId": "a1", "data": {"z": 1, "a": 2}});
        let b = json!({"data": {"a": 2, "z": 1}, "agentId": "a1", "type": "message"});
        assert_eq!(canonical_json(&a), canonical_json(&b));
        assert_eq!(
            canonical_json(&a),
            br#"{"agentId":"a1","data":{"a":2,"z":1},"type":"message"}"#.to_vec()
        );
    }
}
