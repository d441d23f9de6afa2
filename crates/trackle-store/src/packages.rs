use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use trackle_core::trackinfo::normalize_number;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// Identity of one tracked shipment: (number, carrier, param) is unique.
/// carrier 0 means unresolved/auto-detect and is corrected later by the
/// provider (see `resolve_carrier`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PackageKey {
    pub number: String,
    pub carrier: i64,
    pub param: String,
}

impl PackageKey {
    pub fn new(number: &str, carrier: i64, param: &str) -> Self {
        Self {
            number: normalize_number(number),
            carrier,
            param: param.to_owned(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PackageRow {
    pub id: i64,
    pub created_at: String,
    pub updated_at: String,
    pub label: Option<String>,
    pub number: String,
    pub carrier: i64,
    pub param: String,
    pub tag: String,
    pub lang: String,
    pub api_registered: bool,
    pub tracking_status: Option<String>,
    pub package_status: Option<String>,
    pub last_status: Option<String>,
    pub last_sub_status: Option<String>,
    pub last_event_time_utc: Option<String>,
    pub last_event_desc: Option<String>,
    pub last_location: Option<String>,
    pub last_update_at: Option<String>,
    pub last_payload_sha: Option<String>,
    pub archived: bool,
}

/// Caller-supplied fields for upsert. `None` = leave untouched / default.
#[derive(Clone, Debug, Default)]
pub struct PackagePatch {
    pub label: Option<String>,
    pub tag: Option<String>,
    pub lang: Option<String>,
    pub api_registered: Option<bool>,
}

/// One reconciliation's worth of status updates. Every field merges
/// fill-if-present-else-keep: `None` never clears a stored value.
#[derive(Clone, Debug, Default)]
pub struct StatusPatch {
    pub tracking_status: Option<String>,
    pub package_status: Option<String>,
    pub last_status: Option<String>,
    pub last_sub_status: Option<String>,
    pub last_event_time_utc: Option<String>,
    pub last_event_desc: Option<String>,
    pub last_location: Option<String>,
    pub last_payload_sha: Option<String>,
}

const SELECT_COLS: &str = "id, created_at, updated_at, label, number, carrier, param, tag, lang, \
     api_registered, tracking_status, package_status, last_status, last_sub_status, \
     last_event_time_utc, last_event_desc, last_location, last_update_at, last_payload_sha, archived";

pub struct PackageRepo {
    db: Database,
}

impl PackageRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create the row if absent (defaulted fields), else update only the
    /// fields supplied in the patch. Always refreshes updated_at.
    #[instrument(skip(self, patch), fields(number = %key.number, carrier = key.carrier))]
    pub fn upsert(
        &self,
        key: &PackageKey,
        patch: &PackagePatch,
        default_lang: &str,
    ) -> Result<PackageRow, StoreError> {
        let now = now_iso();

        self.db.with_conn(|conn| {
            let existing = query_by_key(conn, key)?;

            match existing {
                Some(row) => {
                    conn.execute(
                        "UPDATE packages SET
                            label = COALESCE(?1, label),
                            tag = COALESCE(?2, tag),
                            lang = COALESCE(?3, lang),
                            api_registered = COALESCE(?4, api_registered),
                            updated_at = ?5
                         WHERE id = ?6",
                        rusqlite::params![
                            patch.label,
                            patch.tag,
                            patch.lang,
                            patch.api_registered.map(|b| b as i64),
                            now,
                            row.id,
                        ],
                    )?;
                    query_by_id(conn, row.id)?
                        .ok_or_else(|| StoreError::NotFound(format!("package {}", row.id)))
                }
                None => {
                    conn.execute(
                        "INSERT INTO packages (
                            created_at, updated_at, label, number, carrier, param, tag, lang, api_registered
                         ) VALUES (?1, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                        rusqlite::params![
                            now,
                            patch.label,
                            key.number,
                            key.carrier,
                            key.param,
                            patch.tag.clone().unwrap_or_default(),
                            patch.lang.clone().unwrap_or_else(|| default_lang.to_owned()),
                            patch.api_registered.unwrap_or(false) as i64,
                        ],
                    )?;
                    query_by_key(conn, key)?
                        .ok_or_else(|| StoreError::NotFound(format!("package {}", key.number)))
                }
            }
        })
    }

    pub fn get(&self, id: i64) -> Result<PackageRow, StoreError> {
        self.db.with_conn(|conn| {
            query_by_id(conn, id)?.ok_or_else(|| StoreError::NotFound(format!("package {id}")))
        })
    }

    pub fn get_by_key(&self, key: &PackageKey) -> Result<Option<PackageRow>, StoreError> {
        self.db.with_conn(|conn| query_by_key(conn, key))
    }

    /// Resolve a user-supplied key: numeric id first, then normalized
    /// tracking number (most recent row wins when several match).
    #[instrument(skip(self))]
    pub fn find(&self, key: &str) -> Result<Option<PackageRow>, StoreError> {
        let trimmed = key.trim();
        self.db.with_conn(|conn| {
            if let Ok(id) = trimmed.parse::<i64>() {
                if let Some(row) = query_by_id(conn, id)? {
                    return Ok(Some(row));
                }
            }

            let number = normalize_number(trimmed);
            let sql = format!(
                "SELECT {SELECT_COLS} FROM packages WHERE number = ?1 ORDER BY id DESC LIMIT 1"
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query([number])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_package(row)?)),
                None => Ok(None),
            }
        })
    }

    /// List packages, most-recently-updated first. Archived rows are
    /// excluded unless requested, in which case they sort last.
    pub fn list(&self, include_archived: bool) -> Result<Vec<PackageRow>, StoreError> {
        self.db.with_conn(|conn| {
            let sql = if include_archived {
                format!("SELECT {SELECT_COLS} FROM packages ORDER BY archived ASC, updated_at DESC")
            } else {
                format!("SELECT {SELECT_COLS} FROM packages WHERE archived = 0 ORDER BY updated_at DESC")
            };
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query([])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_package(row)?);
            }
            Ok(results)
        })
    }

    /// Apply one reconciliation to the stored "latest" fields. COALESCE
    /// keeps the stored value wherever the patch carries None, so a partial
    /// response can never erase known state.
    #[instrument(skip(self, patch), fields(package_id = id))]
    pub fn merge_status(&self, id: i64, patch: &StatusPatch) -> Result<(), StoreError> {
        let now = now_iso();
        self.db.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE packages SET
                    tracking_status = COALESCE(?1, tracking_status),
                    package_status = COALESCE(?2, package_status),
                    last_status = COALESCE(?3, last_status),
                    last_sub_status = COALESCE(?4, last_sub_status),
                    last_event_time_utc = COALESCE(?5, last_event_time_utc),
                    last_event_desc = COALESCE(?6, last_event_desc),
                    last_location = COALESCE(?7, last_location),
                    last_payload_sha = COALESCE(?8, last_payload_sha),
                    last_update_at = ?9,
                    updated_at = ?9
                 WHERE id = ?10",
                rusqlite::params![
                    patch.tracking_status,
                    patch.package_status,
                    patch.last_status,
                    patch.last_sub_status,
                    patch.last_event_time_utc,
                    patch.last_event_desc,
                    patch.last_location,
                    patch.last_payload_sha,
                    now,
                    id,
                ],
            )?;
            if updated == 0 {
                return Err(StoreError::NotFound(format!("package {id}")));
            }
            Ok(())
        })
    }

    /// Apply a provider carrier correction to a row registered with a
    /// provisional carrier (typically 0 = auto-detect).
    ///
    /// If a row already exists under (number, new_carrier, param), that row
    /// is adopted: missing label/tag are filled from the provisional row,
    /// which is archived. Otherwise the carrier is renamed in place. Either
    /// way exactly one active row remains for the resolved identity.
    #[instrument(skip(self), fields(package_id = id))]
    pub fn resolve_carrier(&self, id: i64, new_carrier: i64) -> Result<PackageRow, StoreError> {
        let now = now_iso();
        self.db.with_conn(|conn| {
            let row = query_by_id(conn, id)?
                .ok_or_else(|| StoreError::NotFound(format!("package {id}")))?;

            if row.carrier == new_carrier {
                conn.execute(
                    "UPDATE packages SET api_registered = 1, updated_at = ?1 WHERE id = ?2",
                    rusqlite::params![now, id],
                )?;
                return query_by_id(conn, id)?
                    .ok_or_else(|| StoreError::NotFound(format!("package {id}")));
            }

            let resolved_key = PackageKey {
                number: row.number.clone(),
                carrier: new_carrier,
                param: row.param.clone(),
            };

            match query_by_key(conn, &resolved_key)? {
                Some(existing) => {
                    conn.execute(
                        "UPDATE packages SET
                            label = COALESCE(label, ?1),
                            tag = CASE WHEN tag = '' THEN ?2 ELSE tag END,
                            api_registered = 1,
                            archived = 0,
                            updated_at = ?3
                         WHERE id = ?4",
                        rusqlite::params![row.label, row.tag, now, existing.id],
                    )?;
                    conn.execute(
                        "UPDATE packages SET archived = 1, updated_at = ?1 WHERE id = ?2",
                        rusqlite::params![now, row.id],
                    )?;
                    query_by_id(conn, existing.id)?
                        .ok_or_else(|| StoreError::NotFound(format!("package {}", existing.id)))
                }
                None => {
                    conn.execute(
                        "UPDATE packages SET carrier = ?1, api_registered = 1, updated_at = ?2 WHERE id = ?3",
                        rusqlite::params![new_carrier, now, row.id],
                    )?;
                    query_by_id(conn, row.id)?
                        .ok_or_else(|| StoreError::NotFound(format!("package {}", row.id)))
                }
            }
        })
    }

    #[instrument(skip(self), fields(package_id = id))]
    pub fn set_tracking_status(&self, id: i64, status: &str) -> Result<(), StoreError> {
        let now = now_iso();
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE packages SET tracking_status = ?1, updated_at = ?2 WHERE id = ?3",
                rusqlite::params![status, now, id],
            )?;
            Ok(())
        })
    }

    #[instrument(skip(self), fields(package_id = id))]
    pub fn archive(&self, id: i64) -> Result<(), StoreError> {
        let now = now_iso();
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE packages SET archived = 1, updated_at = ?1 WHERE id = ?2",
                rusqlite::params![now, id],
            )?;
            Ok(())
        })
    }

    /// Hard removal by explicit user action; events cascade.
    #[instrument(skip(self), fields(package_id = id))]
    pub fn delete(&self, id: i64) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute("DELETE FROM packages WHERE id = ?1", [id])?;
            Ok(())
        })
    }
}

pub(crate) fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn query_by_id(conn: &rusqlite::Connection, id: i64) -> Result<Option<PackageRow>, StoreError> {
    let sql = format!("SELECT {SELECT_COLS} FROM packages WHERE id = ?1");
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([id])?;
    match rows.next()? {
        Some(row) => Ok(Some(row_to_package(row)?)),
        None => Ok(None),
    }
}

fn query_by_key(conn: &rusqlite::Connection, key: &PackageKey) -> Result<Option<PackageRow>, StoreError> {
    let sql = format!(
        "SELECT {SELECT_COLS} FROM packages WHERE number = ?1 AND carrier = ?2 AND param = ?3"
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(rusqlite::params![key.number, key.carrier, key.param])?;
    match rows.next()? {
        Some(row) => Ok(Some(row_to_package(row)?)),
        None => Ok(None),
    }
}

fn row_to_package(row: &rusqlite::Row<'_>) -> Result<PackageRow, StoreError> {
    Ok(PackageRow {
        id: row_helpers::get(row, 0, "packages", "id")?,
        created_at: row_helpers::get(row, 1, "packages", "created_at")?,
        updated_at: row_helpers::get(row, 2, "packages", "updated_at")?,
        label: row_helpers::get_opt(row, 3, "packages", "label")?,
        number: row_helpers::get(row, 4, "packages", "number")?,
        carrier: row_helpers::get(row, 5, "packages", "carrier")?,
        param: row_helpers::get(row, 6, "packages", "param")?,
        tag: row_helpers::get(row, 7, "packages", "tag")?,
        lang: row_helpers::get(row, 8, "packages", "lang")?,
        api_registered: row_helpers::get::<i64>(row, 9, "packages", "api_registered")? != 0,
        tracking_status: row_helpers::get_opt(row, 10, "packages", "tracking_status")?,
        package_status: row_helpers::get_opt(row, 11, "packages", "package_status")?,
        last_status: row_helpers::get_opt(row, 12, "packages", "last_status")?,
        last_sub_status: row_helpers::get_opt(row, 13, "packages", "last_sub_status")?,
        last_event_time_utc: row_helpers::get_opt(row, 14, "packages", "last_event_time_utc")?,
        last_event_desc: row_helpers::get_opt(row, 15, "packages", "last_event_desc")?,
        last_location: row_helpers::get_opt(row, 16, "packages", "last_location")?,
        last_update_at: row_helpers::get_opt(row, 17, "packages", "last_update_at")?,
        last_payload_sha: row_helpers::get_opt(row, 18, "packages", "last_payload_sha")?,
        archived: row_helpers::get::<i64>(row, 19, "packages", "archived")? != 0,
    })
}
