//! The reconciliation core: turn one provider-or-webhook response item into
//! a store mutation and report whether anything observable changed.
//!
//! This is the single code path behind both the sync command (poll stream)
//! and webhook ingestion (push stream); either stream alone keeps the store
//! eventually consistent because the merge is idempotent.

use serde_json::Value;
use tracing::instrument;

use trackle_core::hash::item_sha;
use trackle_core::trackinfo::{self, scalar_str};
use trackle_store::events::{EventRepo, NewEvent};
use trackle_store::packages::{PackageKey, PackagePatch, PackageRepo, PackageRow, StatusPatch};
use trackle_store::payloads::{PayloadRepo, Source};
use trackle_store::Database;

use crate::error::EngineError;

/// Repositories plus defaults, shared by every ingestion path.
pub struct Engine {
    pub packages: PackageRepo,
    pub events: EventRepo,
    pub payloads: PayloadRepo,
    default_lang: String,
}

/// What one reconciliation did, for user-facing summaries.
#[derive(Clone, Debug)]
pub struct ReconcileOutcome {
    pub changed: bool,
    pub new_events: usize,
    pub summary: String,
}

impl Engine {
    pub fn new(db: Database, default_lang: &str) -> Self {
        Self {
            packages: PackageRepo::new(db.clone()),
            events: EventRepo::new(db.clone()),
            payloads: PayloadRepo::new(db),
            default_lang: default_lang.to_owned(),
        }
    }

    pub fn default_lang(&self) -> &str {
        &self.default_lang
    }

    /// Content hash for a poll-path response item (webhook items use the
    /// raw payload's sha-256 instead).
    pub fn item_hash(item: &Value) -> Option<String> {
        item_sha(item)
    }

    /// Find the package a response item belongs to, creating it on a
    /// dedup-miss and applying carrier correction when the provider has
    /// resolved a previously auto-detected carrier.
    #[instrument(skip(self, tag))]
    pub fn resolve_package(
        &self,
        number: &str,
        carrier: i64,
        param: &str,
        tag: Option<&str>,
    ) -> Result<PackageRow, EngineError> {
        let key = PackageKey::new(number, carrier, param);

        if let Some(row) = self.packages.get_by_key(&key)? {
            return Ok(row);
        }

        // A provisional carrier-0 registration for the same number is this
        // shipment before the provider resolved its carrier: migrate it
        // instead of growing a second active row.
        if carrier != 0 {
            let provisional = PackageKey::new(number, 0, param);
            if let Some(row) = self.packages.get_by_key(&provisional)? {
                return Ok(self.packages.resolve_carrier(row.id, carrier)?);
            }
        }

        let patch = PackagePatch {
            tag: tag.map(str::to_owned),
            api_registered: Some(true),
            ..Default::default()
        };
        Ok(self.packages.upsert(&key, &patch, &self.default_lang)?)
    }

    /// Apply one response item to its package. See module docs; steps:
    /// extract → detect change (content-hash first) → merge fill-if-present
    /// → expand events idempotently → summarize.
    #[instrument(skip_all, fields(package_id = pkg.id, source = %source))]
    pub fn reconcile(
        &self,
        pkg: &PackageRow,
        item: &Value,
        payload_sha: Option<&str>,
        source: Source,
    ) -> Result<ReconcileOutcome, EngineError> {
        let tracking_status = item.get("tracking_status").and_then(scalar_str);
        let package_status = item.get("package_status").and_then(scalar_str);

        let empty = Value::Object(Default::default());
        let track_info = match item.get("track_info") {
            Some(v) if v.is_object() => v,
            _ => &empty,
        };

        let latest = trackinfo::extract_latest(track_info);

        // Change detection: content hash when available; otherwise compare
        // the latest fields against what is stored.
        let prev = self.packages.get(pkg.id)?;
        let changed = match payload_sha {
            Some(sha) => prev.last_payload_sha.as_deref() != Some(sha),
            None => {
                fn differs(new: &Option<String>, old: &Option<String>) -> bool {
                    new.is_some() && new != old
                }
                differs(&latest.event_time, &prev.last_event_time_utc)
                    || differs(&latest.event_desc, &prev.last_event_desc)
                    || differs(&latest.status, &prev.last_status)
                    || differs(&latest.sub_status, &prev.last_sub_status)
            }
        };

        self.packages.merge_status(
            pkg.id,
            &StatusPatch {
                tracking_status: tracking_status.clone(),
                package_status: package_status.clone(),
                last_status: latest.status.clone(),
                last_sub_status: latest.sub_status.clone(),
                last_event_time_utc: latest.event_time.clone(),
                last_event_desc: latest.event_desc.clone(),
                last_location: latest.location.clone(),
                last_payload_sha: payload_sha.map(str::to_owned),
            },
        )?;

        let mut new_events = 0;
        for event in trackinfo::events_of(track_info) {
            let new_event = NewEvent {
                provider_key: event.provider_key,
                time_utc: event.time_utc.clone(),
                time_iso: event.time_iso.clone(),
                description: event.description.clone(),
                location: event.location.as_ref().and_then(|l| l.stored()),
                stage: event.stage.clone(),
                sub_status: event.sub_status.clone(),
                raw_json: serde_json::to_string(&event.raw).ok(),
                event_hash: event.hash(),
            };
            if self.events.insert_ignore(pkg.id, &new_event)? {
                new_events += 1;
            }
        }

        let summary = summarize(
            pkg,
            &latest,
            tracking_status.as_deref(),
            package_status.as_deref(),
            new_events,
            changed,
            source,
        );

        Ok(ReconcileOutcome {
            changed,
            new_events,
            summary,
        })
    }
}

fn summarize(
    pkg: &PackageRow,
    latest: &trackinfo::LatestFields,
    tracking_status: Option<&str>,
    package_status: Option<&str>,
    new_events: usize,
    changed: bool,
    source: Source,
) -> String {
    let label = pkg.label.as_deref().unwrap_or(&pkg.number);
    let status = latest
        .status
        .as_deref()
        .or(package_status)
        .or(tracking_status)
        .unwrap_or("unknown");

    let mut summary = format!("{label}: {status}");
    if let Some(time) = &latest.event_time {
        summary.push_str(&format!(" @ {time}"));
    }
    if let Some(desc) = &latest.event_desc {
        summary.push_str(&format!(" - {desc}"));
    }
    if new_events > 0 && changed {
        summary.push_str(&format!(" (+{new_events} events)"));
    }
    if source == Source::Webhook {
        summary = format!("[webhook] {summary}");
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn engine() -> Engine {
        Engine::new(Database::in_memory().unwrap(), "en")
    }

    fn item(desc: &str) -> Value {
        json!({
            "number": "RR1",
            "carrier": 3011,
            "tracking_status": "Tracking",
            "package_status": "InTransit",
            "track_info": {
                "latest_status": {"status": "InTransit", "sub_status": "InTransit_Other"},
                "latest_event": {
                    "time_utc": "2026-08-20T10:00:00Z",
                    "description": desc,
                    "location": "Shenzhen"
                },
                "tracking": {"providers": [{"key": 100003, "events": [
                    {"time_utc": "2026-08-20T10:00:00Z", "description": desc, "location": "Shenzhen"},
                    {"time_utc": "2026-08-19T08:00:00Z", "description": "Accepted", "location": "Shenzhen"}
                ]}]}
            }
        })
    }

    #[test]
    fn first_reconcile_marks_changed_and_inserts_events() {
        let engine = engine();
        let pkg = engine.resolve_package("RR1", 3011, "", None).unwrap();

        let item = item("Departed facility");
        let sha = Engine::item_hash(&item);
        let out = engine
            .reconcile(&pkg, &item, sha.as_deref(), Source::Poll)
            .unwrap();

        assert!(out.changed);
        assert_eq!(out.new_events, 2);
        assert!(out.summary.contains("RR1: InTransit"));
        assert!(out.summary.contains("Departed facility"));
        assert!(out.summary.contains("(+2 events)"));

        let row = engine.packages.get(pkg.id).unwrap();
        assert_eq!(row.last_status.as_deref(), Some("InTransit"));
        assert_eq!(row.last_payload_sha, sha);
    }

    #[test]
    fn same_item_twice_is_idempotent() {
        let engine = engine();
        let pkg = engine.resolve_package("RR1", 3011, "", None).unwrap();
        let item = item("Departed facility");
        let sha = Engine::item_hash(&item);

        let first = engine.reconcile(&pkg, &item, sha.as_deref(), Source::Poll).unwrap();
        assert!(first.changed);
        assert_eq!(first.new_events, 2);

        let second = engine.reconcile(&pkg, &item, sha.as_deref(), Source::Poll).unwrap();
        assert!(!second.changed);
        assert_eq!(second.new_events, 0);
        assert_eq!(engine.events.count(pkg.id).unwrap(), 2);
    }

    #[test]
    fn merge_never_regresses_to_absent() {
        let engine = engine();
        let pkg = engine.resolve_package("RR1", 3011, "", None).unwrap();
        let full = item("Departed facility");
        engine
            .reconcile(&pkg, &full, Engine::item_hash(&full).as_deref(), Source::Poll)
            .unwrap();

        // Partial item with no latest_event: description must survive.
        let partial = json!({
            "number": "RR1",
            "carrier": 3011,
            "track_info": {"latest_status": {"status": "Delivered"}}
        });
        engine
            .reconcile(&pkg, &partial, Engine::item_hash(&partial).as_deref(), Source::Poll)
            .unwrap();

        let row = engine.packages.get(pkg.id).unwrap();
        assert_eq!(row.last_status.as_deref(), Some("Delivered"));
        assert_eq!(row.last_event_desc.as_deref(), Some("Departed facility"));
    }

    #[test]
    fn field_comparison_fallback_when_no_hash() {
        let engine = engine();
        let pkg = engine.resolve_package("RR1", 3011, "", None).unwrap();

        let out = engine
            .reconcile(&pkg, &item("Departed facility"), None, Source::Poll)
            .unwrap();
        assert!(out.changed);

        // Identical fields, still no hash: nothing observable changed.
        let out = engine
            .reconcile(&pkg, &item("Departed facility"), None, Source::Poll)
            .unwrap();
        assert!(!out.changed);

        let out = engine
            .reconcile(&pkg, &item("Arrived at destination hub"), None, Source::Poll)
            .unwrap();
        assert!(out.changed);
    }

    #[test]
    fn resolve_package_migrates_provisional_carrier() {
        let engine = engine();
        // User registered with auto-detect.
        let provisional = engine.resolve_package("RR1", 0, "", None).unwrap();
        assert_eq!(provisional.carrier, 0);

        // Provider answers with the resolved carrier.
        let resolved = engine.resolve_package("RR1", 7, "", None).unwrap();
        assert_eq!(resolved.carrier, 7);
        assert_eq!(resolved.id, provisional.id);

        let active = engine.packages.list(false).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].carrier, 7);
    }

    #[test]
    fn resolve_package_creates_on_dedup_miss() {
        let engine = engine();
        let row = engine.resolve_package("RR9", 21051, "", Some("gift")).unwrap();
        assert_eq!(row.tag, "gift");
        assert!(row.api_registered);
    }

    #[test]
    fn webhook_source_tags_summary() {
        let engine = engine();
        let pkg = engine.resolve_package("RR1", 3011, "", None).unwrap();
        let out = engine
            .reconcile(&pkg, &item("x"), Some("sha"), Source::Webhook)
            .unwrap();
        assert!(out.summary.starts_with("[webhook] "));
    }
}
