use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::database::Database;
use crate::error::StoreError;
use crate::packages::now_iso;
use crate::row_helpers;

/// One carrier-reported tracking event, ready for insertion. `event_hash`
/// is the deterministic identity computed from provider key, time,
/// description, and location; the (package_id, event_hash) unique index
/// makes insertion idempotent.
#[derive(Clone, Debug)]
pub struct NewEvent {
    pub provider_key: Option<i64>,
    pub time_utc: Option<String>,
    pub time_iso: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub stage: Option<String>,
    pub sub_status: Option<String>,
    pub raw_json: Option<String>,
    pub event_hash: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventRow {
    pub id: i64,
    pub package_id: i64,
    pub provider_key: Option<i64>,
    pub time_utc: Option<String>,
    pub time_iso: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub stage: Option<String>,
    pub sub_status: Option<String>,
    pub raw_json: Option<String>,
    pub event_hash: String,
    pub created_at: String,
}

pub struct EventRepo {
    db: Database,
}

impl EventRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Append-only, idempotent insert. Returns true when a new row was
    /// written, false when the event was already known.
    #[instrument(skip(self, event))]
    pub fn insert_ignore(&self, package_id: i64, event: &NewEvent) -> Result<bool, StoreError> {
        let now = now_iso();
        self.db.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO events (
                    package_id, provider_key, time_utc, time_iso, description, location,
                    stage, sub_status, raw_json, event_hash, created_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                rusqlite::params![
                    package_id,
                    event.provider_key,
                    event.time_utc,
                    event.time_iso,
                    event.description,
                    event.location,
                    event.stage,
                    event.sub_status,
                    event.raw_json,
                    event.event_hash,
                    now,
                ],
            )?;
            Ok(inserted == 1)
        })
    }

    /// Most recent events for a package, ordered by event time for display.
    pub fn list_recent(&self, package_id: i64, limit: u32) -> Result<Vec<EventRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, package_id, provider_key, time_utc, time_iso, description, location,
                        stage, sub_status, raw_json, event_hash, created_at
                 FROM events WHERE package_id = ?1
                 ORDER BY time_utc DESC, id DESC LIMIT ?2",
            )?;
            let mut rows = stmt.query(rusqlite::params![package_id, limit])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_event(row)?);
            }
            Ok(results)
        })
    }

    pub fn count(&self, package_id: i64) -> Result<u64, StoreError> {
        self.db.with_conn(|conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM events WHERE package_id = ?1",
                [package_id],
                |row| row.get(0),
            )?;
            Ok(n as u64)
        })
    }
}

fn row_to_event(row: &rusqlite::Row<'_>) -> Result<EventRow, StoreError> {
    Ok(EventRow {
        id: row_helpers::get(row, 0, "events", "id")?,
        package_id: row_helpers::get(row, 1, "events", "package_id")?,
        provider_key: row_helpers::get_opt(row, 2, "events", "provider_key")?,
        time_utc: row_helpers::get_opt(row, 3, "events", "time_utc")?,
        time_iso: row_helpers::get_opt(row, 4, "events", "time_iso")?,
        description: row_helpers::get_opt(row, 5, "events", "description")?,
        location: row_helpers::get_opt(row, 6, "events", "location")?,
        stage: row_helpers::get_opt(row, 7, "events", "stage")?,
        sub_status: row_helpers::get_opt(row, 8, "events", "sub_status")?,
        raw_json: row_helpers::get_opt(row, 9, "events", "raw_json")?,
        event_hash: row_helpers::get(row, 10, "events", "event_hash")?,
        created_at: row_helpers::get(row, 11, "events", "created_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packages::{PackageKey, PackagePatch, PackageRepo};

    fn setup() -> (EventRepo, i64) {
        let db = Database::in_memory().unwrap();
        let packages = PackageRepo::new(db.clone());
        let pkg = packages
            .upsert(&PackageKey::new("RR1", 0, ""), &PackagePatch::default(), "en")
            .unwrap();
        (EventRepo::new(db), pkg.id)
    }

    fn event(hash: &str, time: &str) -> NewEvent {
        NewEvent {
            provider_key: Some(3011),
            time_utc: Some(time.into()),
            time_iso: None,
            description: Some("Departed facility".into()),
            location: Some("Shenzhen".into()),
            stage: Some("InTransit".into()),
            sub_status: None,
            raw_json: None,
            event_hash: hash.into(),
        }
    }

    #[test]
    fn insert_then_duplicate_is_noop() {
        let (repo, pkg) = setup();
        assert!(repo.insert_ignore(pkg, &event("h1", "2026-08-20T10:00:00Z")).unwrap());
        assert!(!repo.insert_ignore(pkg, &event("h1", "2026-08-20T10:00:00Z")).unwrap());
        assert_eq!(repo.count(pkg).unwrap(), 1);
    }

    #[test]
    fn same_hash_different_package_both_insert() {
        let db = Database::in_memory().unwrap();
        let packages = PackageRepo::new(db.clone());
        let a = packages.upsert(&PackageKey::new("RR1", 0, ""), &PackagePatch::default(), "en").unwrap();
        let b = packages.upsert(&PackageKey::new("RR2", 0, ""), &PackagePatch::default(), "en").unwrap();
        let repo = EventRepo::new(db);

        assert!(repo.insert_ignore(a.id, &event("h1", "t")).unwrap());
        assert!(repo.insert_ignore(b.id, &event("h1", "t")).unwrap());
    }

    #[test]
    fn list_recent_orders_by_time_desc() {
        let (repo, pkg) = setup();
        repo.insert_ignore(pkg, &event("h1", "2026-08-19T10:00:00Z")).unwrap();
        repo.insert_ignore(pkg, &event("h2", "2026-08-21T10:00:00Z")).unwrap();
        repo.insert_ignore(pkg, &event("h3", "2026-08-20T10:00:00Z")).unwrap();

        let events = repo.list_recent(pkg, 10).unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].event_hash, "h2");
        assert_eq!(events[2].event_hash, "h1");

        let limited = repo.list_recent(pkg, 1).unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[test]
    fn cascade_delete_with_package() {
        let db = Database::in_memory().unwrap();
        let packages = PackageRepo::new(db.clone());
        let pkg = packages.upsert(&PackageKey::new("RR1", 0, ""), &PackagePatch::default(), "en").unwrap();
        let repo = EventRepo::new(db);
        repo.insert_ignore(pkg.id, &event("h1", "t")).unwrap();

        packages.delete(pkg.id).unwrap();
        assert_eq!(repo.count(pkg.id).unwrap(), 0);
    }
}
