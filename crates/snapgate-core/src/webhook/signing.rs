//! HMAC-SHA256 signatures over canonical webhook payloads.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::canonical::to_canonical_string;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, thiserror::Error)]
#[error("invalid webhook secret: {0}")]
pub struct SigningError(String);

fn mac_for(secret: &str, payload: &serde_json::Value) -> Result<HmacSha256, SigningError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|err| SigningError(err.to_string()))?;
    mac.update(to_canonical_string(payload).as_bytes());
    Ok(mac)
}

/// Hex-encoded HMAC-SHA256 of the canonical serialization of `payload`.
pub fn sign(payload: &serde_json::Value, secret: &str) -> Result<String, SigningError> {
    Ok(hex::encode(mac_for(secret, payload)?.finalize().into_bytes()))
}

/// Check `signature` (hex) against `payload` in constant time.
///
/// Malformed hex is simply a mismatch.
pub fn verify(payload: &serde_json::Value, signature: &str, secret: &str) -> bool {
    let Ok(provided) = hex::decode(signature.trim()) else {
        return false;
    };
    match mac_for(secret, payload) {
        Ok(mac) => mac.verify_slice(&provided).is_ok(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload() -> serde_json::Value {
        json!({
            "job_id": "job-01HZY0000000000000000000AB",
            "job_type": "screenshot",
            "status": "completed",
            "result": {"artifact": "cache/abc.png"},
            "error": null,
        })
    }

    #[test]
    fn signature_round_trips() {
        let sig = sign(&payload(), "s3cret").unwrap();
        assert_eq!(sig.len(), 64);
        assert!(verify(&payload(), &sig, "s3cret"));
    }

    #[test]
    fn signature_ignores_key_order() {
        let reordered: serde_json::Value = serde_json::from_str(
            r#"{"error":null,"result":{"artifact":"cache/abc.png"},"status":"completed","job_type":"screenshot","job_id":"job-01HZY0000000000000000000AB"}"#,
        )
        .unwrap();
        assert_eq!(sign(&payload(), "k").unwrap(), sign(&reordered, "k").unwrap());
    }

    #[test]
    fn mutated_payload_or_wrong_secret_fails() {
        let sig = sign(&payload(), "s3cret").unwrap();
        let mut tampered = payload();
        tampered["status"] = json!("failed");
        assert!(!verify(&tampered, &sig, "s3cret"));
        assert!(!verify(&payload(), &sig, "other"));
    }

    #[test]
    fn malformed_signatures_fail() {
        assert!(!verify(&payload(), "not-hex", "k"));
        assert!(!verify(&payload(), "", "k"));
        let sig = sign(&payload(), "k").unwrap();
        assert!(!verify(&payload(), &sig[..62], "k"));
    }

    #[test]
    fn matches_known_vector() {
        // HMAC-SHA256(key="key", msg="{\"a\":1}")
        let expected = {
            let mut mac = HmacSha256::new_from_slice(b"key").unwrap();
            mac.update(br#"{"a":1}"#);
            hex::encode(mac.finalize().into_bytes())
        };
        assert_eq!(sign(&json!({"a": 1}), "key").unwrap(), expected);
    }
}
