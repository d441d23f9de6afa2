use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 of raw bytes. Used as the unique key for ingested
/// payloads and as the basis for spool file names.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Content hash of one provider response item.
///
/// serde_json maps are ordered (BTreeMap), so serializing the item yields a
/// canonical key order and the hash is stable across re-serializations of
/// the same logical content.
pub fn item_sha(item: &serde_json::Value) -> Option<String> {
    serde_json::to_vec(item).ok().map(|bytes| sha256_hex(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_hex_known_vector() {
        // sha256("") is a well-known constant.
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn item_sha_stable_across_key_order() {
        let a: serde_json::Value = serde_json::from_str(r#"{"b":2,"a":1}"#).unwrap();
        let b: serde_json::Value = serde_json::from_str(r#"{"a":1,"b":2}"#).unwrap();
        assert_eq!(item_sha(&a), item_sha(&b));
    }

    #[test]
    fn item_sha_differs_on_content() {
        let a = serde_json::json!({"number": "RR1", "carrier": 3011});
        let b = serde_json::json!({"number": "RR1", "carrier": 3012});
        assert_ne!(item_sha(&a), item_sha(&b));
    }
}
