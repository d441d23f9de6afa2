//! Raw payload ingestion: archive first, then parse and reconcile.
//!
//! The payload row is written before any JSON parsing so a malformed or
//! duplicate delivery is still captured for audit and replay.

use std::collections::HashMap;

use serde_json::Value;
use tracing::{instrument, warn};

use trackle_core::hash::sha256_hex;
use trackle_core::signature::{self, SignatureVerdict};
use trackle_core::trackinfo::scalar_str;
use trackle_store::payloads::{NewPayload, PayloadInsert, Source};

use crate::error::EngineError;
use crate::reconcile::Engine;

/// What ingesting one raw payload did.
#[derive(Clone, Debug)]
pub struct IngestReport {
    pub sha256: String,
    pub duplicate: bool,
    pub signature: SignatureVerdict,
    pub changed: bool,
    pub new_events: usize,
    pub summary: String,
}

impl Engine {
    /// Ingest one raw delivery (webhook body or replayed inbox file).
    /// Steps: verify signature, archive the payload keyed by its sha-256,
    /// parse, then route the embedded item through `reconcile`.
    #[instrument(skip_all, fields(source = %source, bytes = raw.len()))]
    pub fn ingest_payload(
        &self,
        raw: &[u8],
        headers: &HashMap<String, String>,
        source: Source,
        secret: Option<&str>,
    ) -> Result<IngestReport, EngineError> {
        let check = signature::check(headers, raw, secret);
        let sha = sha256_hex(raw);

        let inserted = self.payloads.insert_ignore(&NewPayload {
            source,
            event_type: None,
            number: None,
            carrier: None,
            signature: check.value.clone(),
            signature_valid: check.verdict.as_column(),
            sha256: sha.clone(),
            raw_json: String::from_utf8_lossy(raw).into_owned(),
        })?;
        let duplicate = inserted == PayloadInsert::Duplicate;

        let parsed: Value = serde_json::from_slice(raw)
            .map_err(|e| EngineError::MalformedPayload(format!("payload {sha}: {e}")))?;

        let event_type = parsed.get("event").and_then(scalar_str);
        let data = parsed.get("data").filter(|d| d.is_object());

        let number = data.and_then(|d| d.get("number")).and_then(scalar_str);
        let carrier = data
            .and_then(|d| d.get("carrier"))
            .and_then(Value::as_i64);

        self.payloads
            .annotate(&sha, event_type.as_deref(), number.as_deref(), carrier)?;

        let Some(data) = data else {
            warn!(sha = %sha, "payload carries no data object");
            return Ok(IngestReport {
                sha256: sha,
                duplicate,
                signature: check.verdict,
                changed: false,
                new_events: 0,
                summary: prefixed(&check, secret, "payload carried no tracking data"),
            });
        };
        let Some(number) = number else {
            warn!(sha = %sha, "payload data has no tracking number");
            return Ok(IngestReport {
                sha256: sha,
                duplicate,
                signature: check.verdict,
                changed: false,
                new_events: 0,
                summary: prefixed(&check, secret, "payload data had no tracking number"),
            });
        };

        let param = data
            .get("param")
            .and_then(scalar_str)
            .unwrap_or_default();
        let tag = data.get("tag").and_then(scalar_str);

        let pkg = self.resolve_package(&number, carrier.unwrap_or(0), &param, tag.as_deref())?;
        let outcome = self.reconcile(&pkg, data, Some(&sha), source)?;

        Ok(IngestReport {
            sha256: sha,
            duplicate,
            signature: check.verdict,
            changed: outcome.changed,
            new_events: outcome.new_events,
            summary: prefixed(&check, secret, &outcome.summary),
        })
    }
}

/// Prepend the signature verdict when a secret is configured, so summaries
/// surface unauthenticated deliveries.
fn prefixed(check: &signature::SignatureCheck, secret: Option<&str>, summary: &str) -> String {
    if secret.is_none() {
        return summary.to_owned();
    }
    match (&check.verdict, &check.header) {
        (SignatureVerdict::Valid, Some(name)) => format!("[valid signature via {name}] {summary}"),
        (SignatureVerdict::Invalid, Some(name)) => {
            format!("[INVALID signature via {name}] {summary}")
        }
        _ => format!("[no signature header] {summary}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use trackle_store::Database;

    fn engine() -> Engine {
        Engine::new(Database::in_memory().unwrap(), "en")
    }

    fn webhook_body() -> Vec<u8> {
        serde_json::to_vec(&json!({
            "event": "TRACKING_UPDATED",
            "data": {
                "number": "RR1",
                "carrier": 3011,
                "param": "",
                "tag": "",
                "tracking_status": "Tracking",
                "track_info": {
                    "latest_status": {"status": "InTransit"},
                    "latest_event": {
                        "time_utc": "2026-08-20T10:00:00Z",
                        "description": "Departed facility"
                    },
                    "tracking": {"providers": [{"key": 100003, "events": [
                        {"time_utc": "2026-08-20T10:00:00Z", "description": "Departed facility"}
                    ]}]}
                }
            }
        }))
        .unwrap()
    }

    fn signed_headers(body: &[u8], secret: &str) -> HashMap<String, String> {
        let mut headers = HashMap::new();
        headers.insert(
            "signature".to_owned(),
            signature::expected_signature(body, secret),
        );
        headers
    }

    #[test]
    fn ingests_and_creates_package() {
        let engine = engine();
        let body = webhook_body();
        let report = engine
            .ingest_payload(&body, &HashMap::new(), Source::Webhook, None)
            .unwrap();

        assert!(!report.duplicate);
        assert!(report.changed);
        assert_eq!(report.new_events, 1);
        assert_eq!(report.signature, SignatureVerdict::NotConfigured);
        assert!(report.summary.contains("RR1: InTransit"));

        let pkg = engine.packages.find("RR1").unwrap().unwrap();
        assert_eq!(pkg.carrier, 3011);
        assert_eq!(pkg.last_status.as_deref(), Some("InTransit"));
    }

    #[test]
    fn duplicate_delivery_is_flagged_and_harmless() {
        let engine = engine();
        let body = webhook_body();

        let first = engine
            .ingest_payload(&body, &HashMap::new(), Source::Webhook, None)
            .unwrap();
        assert!(!first.duplicate);

        let second = engine
            .ingest_payload(&body, &HashMap::new(), Source::Webhook, None)
            .unwrap();
        assert!(second.duplicate);
        assert!(!second.changed);
        assert_eq!(second.new_events, 0);
    }

    #[test]
    fn valid_signature_is_reported() {
        let engine = engine();
        let body = webhook_body();
        let headers = signed_headers(&body, "s3cr3t");

        let report = engine
            .ingest_payload(&body, &headers, Source::Webhook, Some("s3cr3t"))
            .unwrap();
        assert_eq!(report.signature, SignatureVerdict::Valid);
        assert!(report.summary.starts_with("[valid signature via signature]"));

        let stored = engine.payloads.get(&report.sha256).unwrap().unwrap();
        assert_eq!(stored.signature_valid, Some(true));
        assert_eq!(stored.event_type.as_deref(), Some("TRACKING_UPDATED"));
        assert_eq!(stored.number.as_deref(), Some("RR1"));
    }

    #[test]
    fn invalid_signature_still_processes() {
        let engine = engine();
        let body = webhook_body();
        let mut headers = HashMap::new();
        headers.insert("signature".to_owned(), "deadbeef".to_owned());

        let report = engine
            .ingest_payload(&body, &headers, Source::Webhook, Some("s3cr3t"))
            .unwrap();
        assert_eq!(report.signature, SignatureVerdict::Invalid);
        assert!(report.summary.starts_with("[INVALID signature via signature]"));
        assert!(report.changed);

        let stored = engine.payloads.get(&report.sha256).unwrap().unwrap();
        assert_eq!(stored.signature_valid, Some(false));
    }

    #[test]
    fn missing_header_with_secret_is_flagged() {
        let engine = engine();
        let body = webhook_body();

        let report = engine
            .ingest_payload(&body, &HashMap::new(), Source::Webhook, Some("s3cr3t"))
            .unwrap();
        assert_eq!(report.signature, SignatureVerdict::Absent);
        assert!(report.summary.starts_with("[no signature header]"));
    }

    #[test]
    fn malformed_payload_is_archived_then_rejected() {
        let engine = engine();
        let body = b"not json at all";

        let err = engine
            .ingest_payload(body, &HashMap::new(), Source::Webhook, None)
            .unwrap_err();
        assert!(matches!(err, EngineError::MalformedPayload(_)));

        // The raw bytes were still archived before the parse failed.
        let sha = sha256_hex(body);
        assert!(engine.payloads.get(&sha).unwrap().is_some());
    }

    #[test]
    fn payload_without_data_is_recorded() {
        let engine = engine();
        let body = serde_json::to_vec(&json!({"event": "PING"})).unwrap();

        let report = engine
            .ingest_payload(&body, &HashMap::new(), Source::Webhook, None)
            .unwrap();
        assert!(!report.changed);
        assert_eq!(report.new_events, 0);
        assert!(report.summary.contains("no tracking data"));
    }
}
