//! Schema-tolerant extraction of provider track-info structures.
//!
//! Poll responses and webhook payloads share one `track_info` shape, but the
//! provider is not consistent about it: descriptions arrive as plain strings
//! or nested translation objects, locations as strings or structured dicts,
//! event times under `time_utc` or `time_iso`. All variant handling lives
//! here as tagged types with pure extraction functions, so the merge
//! algorithm never branches on shape itself.

use serde_json::Value;

use crate::hash::sha256_hex;

/// Tracking numbers are compared with all whitespace stripped.
pub fn normalize_number(n: &str) -> String {
    n.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Scalar-to-string coercion: the provider is loose about whether status
/// codes arrive as strings or numbers.
pub fn scalar_str(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

use self::scalar_str as str_of;

/// Event description: a bare string, or a translation object carrying the
/// original and/or translated text.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Description {
    Plain(String),
    Translated {
        description: Option<String>,
        translated: Option<String>,
    },
}

impl Description {
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Plain(s) => Some(s),
            Self::Translated { description, translated } => {
                description.as_deref().or(translated.as_deref())
            }
        }
    }
}

/// Extract a description from an event-like object, preferring the
/// translation object over the raw field when both are present.
pub fn description_of(obj: &Value) -> Option<Description> {
    for key in ["description_translation", "description"] {
        match obj.get(key) {
            Some(Value::Object(map)) => {
                return Some(Description::Translated {
                    description: map.get("description").and_then(str_of),
                    translated: map.get("translated").and_then(str_of),
                });
            }
            Some(v) => {
                if let Some(s) = str_of(v) {
                    return Some(Description::Plain(s));
                }
            }
            None => {}
        }
    }
    None
}

/// Event location: a bare string, or a structured dict with
/// address/city/country parts.
#[derive(Clone, Debug, PartialEq)]
pub enum Location {
    Text(String),
    Structured(Value),
}

impl Location {
    /// Human-readable form: address, then city, then country.
    pub fn display(&self) -> Option<String> {
        match self {
            Self::Text(s) => Some(s.clone()),
            Self::Structured(v) => ["address", "city", "country"]
                .iter()
                .find_map(|k| v.get(k).and_then(str_of)),
        }
    }

    /// Form persisted in the events table: text as-is, dicts as JSON so
    /// nothing is lost.
    pub fn stored(&self) -> Option<String> {
        match self {
            Self::Text(s) => Some(s.clone()),
            Self::Structured(v) => serde_json::to_string(v).ok(),
        }
    }
}

pub fn location_of(obj: &Value) -> Option<Location> {
    match obj.get("location") {
        Some(Value::Object(_)) => Some(Location::Structured(obj.get("location")?.clone())),
        Some(v) => str_of(v).map(Location::Text),
        None => None,
    }
}

/// `track_info.latest_status`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LatestStatus {
    pub status: Option<String>,
    pub sub_status: Option<String>,
}

pub fn latest_status_of(track_info: &Value) -> Option<LatestStatus> {
    let obj = track_info.get("latest_status")?;
    obj.is_object().then(|| LatestStatus {
        status: obj.get("status").and_then(str_of),
        sub_status: obj.get("sub_status").and_then(str_of),
    })
}

/// `track_info.latest_event`.
#[derive(Clone, Debug, Default)]
pub struct LatestEvent {
    pub time: Option<String>,
    pub description: Option<Description>,
    pub location: Option<Location>,
}

pub fn latest_event_of(track_info: &Value) -> Option<LatestEvent> {
    let obj = track_info.get("latest_event")?;
    obj.is_object().then(|| LatestEvent {
        time: obj
            .get("time_utc")
            .and_then(str_of)
            .or_else(|| obj.get("time_iso").and_then(str_of)),
        description: description_of(obj),
        location: location_of(obj),
    })
}

/// The four "latest" package fields plus status, flattened for the merge.
/// `None` means "the item did not carry this field", never "clear it".
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LatestFields {
    pub status: Option<String>,
    pub sub_status: Option<String>,
    pub event_time: Option<String>,
    pub event_desc: Option<String>,
    pub location: Option<String>,
}

pub fn extract_latest(track_info: &Value) -> LatestFields {
    let status = latest_status_of(track_info).unwrap_or_default();
    let event = latest_event_of(track_info).unwrap_or_default();
    LatestFields {
        status: status.status,
        sub_status: status.sub_status,
        event_time: event.time,
        event_desc: event.description.as_ref().and_then(|d| d.text().map(str::to_string)),
        location: event.location.as_ref().and_then(Location::display),
    }
}

/// One carrier event pulled out of `track_info.tracking.providers[].events[]`.
#[derive(Clone, Debug)]
pub struct RawEvent {
    pub provider_key: Option<i64>,
    pub time_utc: Option<String>,
    pub time_iso: Option<String>,
    pub description: Option<String>,
    pub location: Option<Location>,
    pub stage: Option<String>,
    pub sub_status: Option<String>,
    pub raw: Value,
}

impl RawEvent {
    /// Deterministic identity for idempotent insertion, scoped to the owning
    /// package by the unique index: sha-256 over provider key, event time,
    /// description, and location.
    pub fn hash(&self) -> String {
        let key = self.provider_key.map(|k| k.to_string()).unwrap_or_default();
        let time = self
            .time_utc
            .as_deref()
            .or(self.time_iso.as_deref())
            .unwrap_or_default();
        let desc = self.description.as_deref().unwrap_or_default();
        let loc = self
            .location
            .as_ref()
            .and_then(Location::display)
            .unwrap_or_default();
        sha256_hex(format!("{key}|{time}|{desc}|{loc}").as_bytes())
    }
}

/// All events nested in a track_info, tolerating missing or oddly-shaped
/// sub-structures (non-list providers, non-object events are skipped).
pub fn events_of(track_info: &Value) -> Vec<RawEvent> {
    let providers = match track_info.get("tracking").and_then(|t| t.get("providers")) {
        Some(Value::Array(providers)) => providers,
        _ => return Vec::new(),
    };

    let mut out = Vec::new();
    for provider in providers {
        let provider_key = provider.get("key").and_then(Value::as_i64);
        let events = match provider.get("events") {
            Some(Value::Array(events)) => events,
            _ => continue,
        };
        for event in events {
            if !event.is_object() {
                continue;
            }
            out.push(RawEvent {
                provider_key,
                time_utc: event.get("time_utc").and_then(str_of),
                time_iso: event.get("time_iso").and_then(str_of),
                description: description_of(event).as_ref().and_then(|d| d.text().map(str::to_string)),
                location: location_of(event),
                stage: event.get("stage").and_then(str_of),
                sub_status: event.get("sub_status").and_then(str_of),
                raw: event.clone(),
            });
        }
    }
    out
}
