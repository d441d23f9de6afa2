pub mod error;
pub mod inbox;
pub mod ingest;
pub mod reconcile;
pub mod spool;

pub use error::EngineError;
pub use inbox::InboxReport;
pub use ingest::IngestReport;
pub use reconcile::{Engine, ReconcileOutcome};
pub use spool::{Spool, SpoolEntry};
