//! Disk spool for webhook deliveries. The server only writes files here;
//! parsing and reconciliation happen later when the inbox drains, so a
//! burst of deliveries never blocks the response path.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, instrument, warn};

use trackle_core::hash::sha256_hex;

use crate::error::EngineError;

/// Bound on queued deliveries; the oldest is evicted when full.
pub const DEFAULT_CAPACITY: usize = 5000;

/// FIFO file queue: inbox/ holds pending deliveries, processed/ keeps them
/// after a successful drain. Filenames sort chronologically.
pub struct Spool {
    inbox: PathBuf,
    processed: PathBuf,
    capacity: usize,
}

/// One pending delivery on disk.
#[derive(Clone, Debug)]
pub struct SpoolEntry {
    pub path: PathBuf,
    pub name: String,
}

impl SpoolEntry {
    pub fn read_body(&self) -> Result<Vec<u8>, EngineError> {
        Ok(fs::read(&self.path)?)
    }

    /// Headers captured at delivery time, if the sidecar survived.
    pub fn read_headers(&self) -> HashMap<String, String> {
        let sidecar = sidecar_path(&self.path);
        fs::read(&sidecar)
            .ok()
            .and_then(|bytes| serde_json::from_slice(&bytes).ok())
            .unwrap_or_default()
    }
}

impl Spool {
    pub fn new(inbox: PathBuf, processed: PathBuf) -> Self {
        Self {
            inbox,
            processed,
            capacity: DEFAULT_CAPACITY,
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Write one delivery to the inbox, evicting the oldest entries first
    /// when at capacity. Returns the filename, or `None` when an identical
    /// delivery is already queued.
    #[instrument(skip(self, body, headers), fields(bytes = body.len()))]
    pub fn enqueue(
        &self,
        body: &[u8],
        headers: &HashMap<String, String>,
    ) -> Result<Option<String>, EngineError> {
        fs::create_dir_all(&self.inbox)?;

        let sha = sha256_hex(body);
        let suffix = format!("_{}.json", &sha[..16]);

        let mut pending = self.entries()?;
        if pending.iter().any(|e| e.name.ends_with(&suffix)) {
            debug!(sha = %sha, "duplicate delivery already spooled");
            return Ok(None);
        }
        while pending.len() >= self.capacity {
            let oldest = pending.remove(0);
            warn!(name = %oldest.name, "inbox full, evicting oldest delivery");
            let _ = fs::remove_file(sidecar_path(&oldest.path));
            fs::remove_file(&oldest.path)?;
        }

        // Microsecond stamp keeps filename order equal to arrival order.
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%.6fZ");
        let name = format!("{stamp}{suffix}");
        let path = self.inbox.join(&name);

        fs::write(&path, body)?;
        if !headers.is_empty() {
            let sidecar = sidecar_path(&path);
            fs::write(&sidecar, serde_json::to_vec(headers)?)?;
        }

        debug!(name = %name, "delivery spooled");
        Ok(Some(name))
    }

    /// Pending deliveries in arrival order. Header sidecars are not
    /// entries themselves.
    pub fn entries(&self) -> Result<Vec<SpoolEntry>, EngineError> {
        if !self.inbox.is_dir() {
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        for dirent in fs::read_dir(&self.inbox)? {
            let path = dirent?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !name.ends_with(".json") || name.ends_with(".headers.json") {
                continue;
            }
            entries.push(SpoolEntry {
                name: name.to_owned(),
                path,
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    /// Move a drained entry (and its sidecar) into processed/.
    pub fn mark_processed(&self, entry: &SpoolEntry) -> Result<(), EngineError> {
        fs::create_dir_all(&self.processed)?;
        fs::rename(&entry.path, self.processed.join(&entry.name))?;

        let sidecar = sidecar_path(&entry.path);
        if sidecar.exists() {
            let sidecar_name = sidecar_path(Path::new(&entry.name));
            fs::rename(&sidecar, self.processed.join(sidecar_name))?;
        }
        Ok(())
    }
}

fn sidecar_path(path: &Path) -> PathBuf {
    path.with_extension("headers.json")
}
