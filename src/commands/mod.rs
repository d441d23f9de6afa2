//! One module per command group; each command gets the resolved
//! configuration and opens what it needs.

pub mod packages;
pub mod sync;
pub mod webhook;

use trackle_client::{TrackItem, TrackingClient};
use trackle_core::Config;
use trackle_engine::Engine;
use trackle_store::packages::PackageRow;
use trackle_store::Database;

use crate::error::CliResult;

pub struct Ctx {
    pub config: Config,
}

impl Ctx {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Open the store under the data directory, creating the tree first.
    pub fn open_engine(&self) -> CliResult<Engine> {
        let paths = self.config.paths();
        paths.ensure()?;
        let db = Database::open(&paths.db)?;
        Ok(Engine::new(db, &self.config.lang))
    }

    pub fn client(&self) -> CliResult<TrackingClient> {
        Ok(TrackingClient::new(self.config.token.clone())?)
    }

    /// Wire item for a stored package. Zero carrier and empty strings are
    /// omitted so the provider applies its defaults.
    pub fn track_item(&self, row: &PackageRow) -> TrackItem {
        TrackItem {
            number: row.number.clone(),
            carrier: (row.carrier != 0).then_some(row.carrier),
            param: Some(row.param.clone()).filter(|p| !p.is_empty()),
            tag: None,
            lang: Some(row.lang.clone()).filter(|l| !l.is_empty()),
        }
    }
}
