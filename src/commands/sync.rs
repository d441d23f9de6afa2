//! Batch poll of every locally tracked package, plus the quota query.

use serde_json::Value;

use trackle_client::{Rejection, PAGE_SIZE};
use trackle_core::trackinfo::scalar_str;
use trackle_engine::Engine;
use trackle_store::payloads::Source;

use crate::cli::SyncArgs;
use crate::commands::Ctx;
use crate::error::CliResult;

pub async fn sync(ctx: &Ctx, args: SyncArgs) -> CliResult<()> {
    let engine = ctx.open_engine()?;
    let client = ctx.client()?;

    let mut rows = engine.packages.list(false)?;
    if args.active_only {
        rows.retain(|r| {
            r.tracking_status
                .as_deref()
                .map(|s| !s.eq_ignore_ascii_case("stopped"))
                .unwrap_or(true)
        });
    }
    if rows.is_empty() {
        println!("No packages to sync.");
        return Ok(());
    }
    let checked = rows.len();

    let mut summaries: Vec<String> = Vec::new();
    let mut rejected: Vec<Rejection> = Vec::new();

    for chunk in rows.chunks(PAGE_SIZE) {
        let items: Vec<_> = chunk.iter().map(|r| ctx.track_item(r)).collect();
        let reply = client.get_track_info(&items).await?;
        rejected.extend(reply.rejected);

        for acc in &reply.accepted {
            let Some(number) = acc.get("number").and_then(scalar_str) else {
                continue;
            };
            let carrier = acc.get("carrier").and_then(Value::as_i64).unwrap_or(0);
            let param = acc.get("param").and_then(scalar_str).unwrap_or_default();
            let tag = acc.get("tag").and_then(scalar_str);

            let pkg = engine.resolve_package(&number, carrier, &param, tag.as_deref())?;
            let sha = Engine::item_hash(acc);
            let outcome = engine.reconcile(&pkg, acc, sha.as_deref(), Source::Poll)?;
            if outcome.changed {
                summaries.push(outcome.summary);
            }
        }
    }

    if !rejected.is_empty() {
        println!("Some items were rejected by the provider ({}):", rejected.len());
        for rejection in rejected.iter().take(10) {
            println!("  - {rejection}");
        }
        if rejected.len() > 10 {
            println!("  ... ({} more)", rejected.len() - 10);
        }
    }

    if summaries.is_empty() {
        println!("Sync complete. No changes ({checked} packages checked).");
    } else {
        println!("Sync complete. {} package(s) updated:", summaries.len());
        for summary in &summaries {
            println!("- {summary}");
        }
    }
    Ok(())
}

pub async fn quota(ctx: &Ctx) -> CliResult<()> {
    let client = ctx.client()?;
    let data = client.get_quota().await?;
    println!("{}", serde_json::to_string_pretty(&data).unwrap_or_default());
    Ok(())
}
