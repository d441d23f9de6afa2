use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::database::Database;
use crate::error::StoreError;
use crate::packages::now_iso;
use crate::row_helpers;

/// Which stream delivered a payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Poll,
    Webhook,
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Poll => write!(f, "poll"),
            Self::Webhook => write!(f, "webhook"),
        }
    }
}

impl std::str::FromStr for Source {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "poll" => Ok(Self::Poll),
            "webhook" => Ok(Self::Webhook),
            other => Err(format!("unknown payload source: {other}")),
        }
    }
}

/// A raw ingested message, kept immutable for audit and replay.
#[derive(Clone, Debug)]
pub struct NewPayload {
    pub source: Source,
    pub event_type: Option<String>,
    pub number: Option<String>,
    pub carrier: Option<i64>,
    pub signature: Option<String>,
    pub signature_valid: Option<bool>,
    /// sha-256 of the raw bytes; globally unique.
    pub sha256: String,
    pub raw_json: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PayloadRow {
    pub id: i64,
    pub received_at: String,
    pub source: Source,
    pub event_type: Option<String>,
    pub number: Option<String>,
    pub carrier: Option<i64>,
    pub signature: Option<String>,
    pub signature_valid: Option<bool>,
    pub sha256: String,
    pub raw_json: String,
}

/// Outcome of an insert attempt: a duplicate is a recognized no-op,
/// never an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PayloadInsert {
    Inserted,
    Duplicate,
}

pub struct PayloadRepo {
    db: Database,
}

impl PayloadRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert-or-ignore keyed by content hash.
    #[instrument(skip(self, payload), fields(sha = %payload.sha256, source = %payload.source))]
    pub fn insert_ignore(&self, payload: &NewPayload) -> Result<PayloadInsert, StoreError> {
        let now = now_iso();
        self.db.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO payloads (
                    received_at, source, event_type, number, carrier,
                    signature, signature_valid, sha256, raw_json
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                rusqlite::params![
                    now,
                    payload.source.to_string(),
                    payload.event_type,
                    payload.number,
                    payload.carrier,
                    payload.signature,
                    payload.signature_valid.map(|b| b as i64),
                    payload.sha256,
                    payload.raw_json,
                ],
            )?;
            Ok(if inserted == 1 {
                PayloadInsert::Inserted
            } else {
                PayloadInsert::Duplicate
            })
        })
    }

    /// Fill in fields extracted after parsing (event type, number, carrier).
    pub fn annotate(
        &self,
        sha256: &str,
        event_type: Option<&str>,
        number: Option<&str>,
        carrier: Option<i64>,
    ) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE payloads SET event_type = ?1, number = ?2, carrier = ?3 WHERE sha256 = ?4",
                rusqlite::params![event_type, number, carrier, sha256],
            )?;
            Ok(())
        })
    }

    pub fn get(&self, sha256: &str) -> Result<Option<PayloadRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, received_at, source, event_type, number, carrier,
                        signature, signature_valid, sha256, raw_json
                 FROM payloads WHERE sha256 = ?1",
            )?;
            let mut rows = stmt.query([sha256])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_payload(row)?)),
                None => Ok(None),
            }
        })
    }
}

fn row_to_payload(row: &rusqlite::Row<'_>) -> Result<PayloadRow, StoreError> {
    let source_str: String = row_helpers::get(row, 2, "payloads", "source")?;
    Ok(PayloadRow {
        id: row_helpers::get(row, 0, "payloads", "id")?,
        received_at: row_helpers::get(row, 1, "payloads", "received_at")?,
        source: row_helpers::parse_enum(&source_str, "payloads", "source")?,
        event_type: row_helpers::get_opt(row, 3, "payloads", "event_type")?,
        number: row_helpers::get_opt(row, 4, "payloads", "number")?,
        carrier: row_helpers::get_opt(row, 5, "payloads", "carrier")?,
        signature: row_helpers::get_opt(row, 6, "payloads", "signature")?,
        signature_valid: row_helpers::get_opt::<i64>(row, 7, "payloads", "signature_valid")?.map(|v| v != 0),
        sha256: row_helpers::get(row, 8, "payloads", "sha256")?,
        raw_json: row_helpers::get(row, 9, "payloads", "raw_json")?,
    })
}
