/// SQL DDL for the trackle database.
/// WAL mode + foreign keys enabled at connection time.
pub const SCHEMA_VERSION: u32 = 1;

pub const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS packages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,

    label TEXT,

    number TEXT NOT NULL,
    carrier INTEGER NOT NULL DEFAULT 0,
    param TEXT NOT NULL DEFAULT '',
    tag TEXT NOT NULL DEFAULT '',
    lang TEXT NOT NULL DEFAULT 'en',

    api_registered INTEGER NOT NULL DEFAULT 0,

    tracking_status TEXT,
    package_status TEXT,

    last_status TEXT,
    last_sub_status TEXT,
    last_event_time_utc TEXT,
    last_event_desc TEXT,
    last_location TEXT,

    last_update_at TEXT,
    last_payload_sha TEXT,

    archived INTEGER NOT NULL DEFAULT 0,

    UNIQUE(number, carrier, param)
);

CREATE TABLE IF NOT EXISTS events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    package_id INTEGER NOT NULL REFERENCES packages(id) ON DELETE CASCADE,
    provider_key INTEGER,
    time_utc TEXT,
    time_iso TEXT,
    description TEXT,
    location TEXT,
    stage TEXT,
    sub_status TEXT,
    raw_json TEXT,
    event_hash TEXT NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE(package_id, event_hash)
);

CREATE TABLE IF NOT EXISTS payloads (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    received_at TEXT NOT NULL,
    source TEXT NOT NULL,
    event_type TEXT,
    number TEXT,
    carrier INTEGER,
    signature TEXT,
    signature_valid INTEGER,
    sha256 TEXT NOT NULL UNIQUE,
    raw_json TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_packages_number ON packages(number);
CREATE INDEX IF NOT EXISTS idx_packages_archived ON packages(archived);
CREATE INDEX IF NOT EXISTS idx_events_package ON events(package_id);
CREATE INDEX IF NOT EXISTS idx_events_time ON events(package_id, time_utc);
CREATE INDEX IF NOT EXISTS idx_payloads_number ON payloads(number);

CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL
);
"#;

pub const PRAGMAS: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;
PRAGMA busy_timeout = 5000;
PRAGMA synchronous = NORMAL;
"#;
