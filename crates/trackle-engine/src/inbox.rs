//! Sequential inbox drain: every spooled delivery is routed through
//! `Engine::ingest_payload`, then moved to the processed directory.

use tracing::{error, info, instrument};

use trackle_store::payloads::Source;

use crate::reconcile::Engine;
use crate::spool::Spool;

/// Result of one drain pass.
#[derive(Clone, Debug, Default)]
pub struct InboxReport {
    pub processed: usize,
    pub changed: usize,
    pub summaries: Vec<String>,
    /// (filename, error message) per file left in the inbox.
    pub failures: Vec<(String, String)>,
}

impl Engine {
    /// Drain the spool once, in filename (arrival) order. A failing file is
    /// reported and left in place; the pass continues with the rest.
    #[instrument(skip(self, spool, secret))]
    pub fn process_inbox(
        &self,
        spool: &Spool,
        secret: Option<&str>,
    ) -> Result<InboxReport, crate::error::EngineError> {
        let mut report = InboxReport::default();

        for entry in spool.entries()? {
            let outcome = entry.read_body().and_then(|body| {
                let headers = entry.read_headers();
                let ingest = self.ingest_payload(&body, &headers, Source::Webhook, secret)?;
                spool.mark_processed(&entry)?;
                Ok(ingest)
            });

            match outcome {
                Ok(ingest) => {
                    report.processed += 1;
                    if ingest.changed {
                        report.changed += 1;
                        report.summaries.push(ingest.summary);
                    }
                }
                Err(e) => {
                    error!(name = %entry.name, error = %e, "failed to process delivery");
                    report.failures.push((entry.name, e.to_string()));
                }
            }
        }

        info!(
            processed = report.processed,
            changed = report.changed,
            failed = report.failures.len(),
            "inbox drained"
        );
        Ok(report)
    }
}
