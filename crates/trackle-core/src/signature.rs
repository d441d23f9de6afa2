//! Webhook signature verification.
//!
//! 17TRACK signs webhook deliveries with `sha256(body + "/" + secret)` in
//! hex, delivered in a request header whose exact name varies between
//! integrations. Header lookup scans an ordered candidate list
//! case-insensitively; "no header found" is a distinct outcome from
//! "header present but value mismatched".

use std::collections::HashMap;

use crate::hash::sha256_hex;

/// Accepted signature header names, in lookup order.
pub const SIGNATURE_HEADERS: &[&str] = &["signature", "sign", "x-signature", "x-17track-signature"];

/// Result of scanning request headers for a signature.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SignatureHeader {
    Absent,
    Present { name: String, value: String },
}

/// Verdict for one delivery, recorded alongside the payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignatureVerdict {
    /// No shared secret configured; verification skipped.
    NotConfigured,
    /// Secret configured but no signature header found.
    Absent,
    Valid,
    Invalid,
}

impl SignatureVerdict {
    /// Tri-state for the payloads table: NULL = never checked / absent.
    pub fn as_column(&self) -> Option<bool> {
        match self {
            Self::Valid => Some(true),
            Self::Invalid => Some(false),
            Self::NotConfigured | Self::Absent => None,
        }
    }
}

/// Outcome of checking one request.
#[derive(Clone, Debug)]
pub struct SignatureCheck {
    pub verdict: SignatureVerdict,
    pub header: Option<String>,
    pub value: Option<String>,
}

/// Expected signature for a body and secret: `hex(sha256(body + "/" + secret))`.
pub fn expected_signature(body: &[u8], secret: &str) -> String {
    let text = String::from_utf8_lossy(body);
    sha256_hex(format!("{text}/{secret}").as_bytes())
}

/// Find the signature header, if any, by case-insensitive scan of the
/// candidate list in order.
pub fn find_signature(headers: &HashMap<String, String>) -> SignatureHeader {
    for candidate in SIGNATURE_HEADERS {
        for (name, value) in headers {
            if name.eq_ignore_ascii_case(candidate) && !value.is_empty() {
                return SignatureHeader::Present {
                    name: name.clone(),
                    value: value.clone(),
                };
            }
        }
    }
    SignatureHeader::Absent
}

/// Verify one delivery. A mismatch is reported, never fatal: the payload is
/// still stored and reconciled, annotated for audit.
pub fn check(headers: &HashMap<String, String>, body: &[u8], secret: Option<&str>) -> SignatureCheck {
    let found = find_signature(headers);
    let (header, value) = match found {
        SignatureHeader::Present { name, value } => (Some(name), Some(value)),
        SignatureHeader::Absent => (None, None),
    };

    let verdict = match (secret, &value) {
        (None, _) => SignatureVerdict::NotConfigured,
        (Some(_), None) => SignatureVerdict::Absent,
        (Some(secret), Some(value)) => {
            if expected_signature(body, secret).eq_ignore_ascii_case(value) {
                SignatureVerdict::Valid
            } else {
                SignatureVerdict::Invalid
            }
        }
    };

    SignatureCheck { verdict, header, value }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn expected_matches_formula() {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(br#"{"x":1}"#);
        hasher.update(b"/s3cr3t");
        let manual: String = hasher.finalize().iter().map(|b| format!("{b:02x}")).collect();

        assert_eq!(expected_signature(br#"{"x":1}"#, "s3cr3t"), manual);
    }

    #[test]
    fn valid_signature_accepted() {
        let body = br#"{"x":1}"#;
        let sig = expected_signature(body, "s3cr3t");
        let check = check(&headers(&[("signature", &sig)]), body, Some("s3cr3t"));
        assert_eq!(check.verdict, SignatureVerdict::Valid);
        assert_eq!(check.header.as_deref(), Some("signature"));
    }

    #[test]
    fn mismatch_is_invalid_not_rejected() {
        let body = br#"{"x":1}"#;
        let check = check(&headers(&[("signature", "deadbeef")]), body, Some("s3cr3t"));
        assert_eq!(check.verdict, SignatureVerdict::Invalid);
        // Still carries the observed value for the audit record.
        assert_eq!(check.value.as_deref(), Some("deadbeef"));
    }

    #[test]
    fn missing_header_is_absent_not_invalid() {
        let check = check(&headers(&[("content-type", "application/json")]), b"{}", Some("s"));
        assert_eq!(check.verdict, SignatureVerdict::Absent);
        assert!(check.header.is_none());
    }

    #[test]
    fn no_secret_means_not_configured() {
        let check = check(&headers(&[("signature", "abc")]), b"{}", None);
        assert_eq!(check.verdict, SignatureVerdict::NotConfigured);
        assert_eq!(check.verdict.as_column(), None);
    }

    #[test]
    fn header_lookup_is_case_insensitive_and_ordered() {
        let h = headers(&[("X-17Track-Signature", "aa"), ("Signature", "bb")]);
        // "signature" comes first in the candidate list.
        match find_signature(&h) {
            SignatureHeader::Present { name, value } => {
                assert_eq!(name, "Signature");
                assert_eq!(value, "bb");
            }
            SignatureHeader::Absent => panic!("expected header"),
        }
    }

    #[test]
    fn empty_header_value_treated_as_absent() {
        let h = headers(&[("signature", "")]);
        assert_eq!(find_signature(&h), SignatureHeader::Absent);
    }

    #[test]
    fn comparison_ignores_hex_case() {
        let body = b"body";
        let sig = expected_signature(body, "k").to_uppercase();
        let check = check(&headers(&[("sign", &sig)]), body, Some("k"));
        assert_eq!(check.verdict, SignatureVerdict::Valid);
    }
}
