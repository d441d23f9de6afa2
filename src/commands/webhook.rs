//! Push-path commands: one-shot ingestion, inbox drain, and the server.

use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;

use secrecy::ExposeSecret;
use trackle_engine::Spool;
use trackle_server::ServerConfig;
use trackle_store::payloads::Source;

use crate::cli::{IngestWebhookArgs, ServeArgs};
use crate::commands::Ctx;
use crate::error::CliResult;

pub async fn ingest_webhook(ctx: &Ctx, args: IngestWebhookArgs) -> CliResult<()> {
    let engine = ctx.open_engine()?;

    let raw = match &args.file {
        Some(path) => std::fs::read(path)?,
        None => {
            let mut buf = Vec::new();
            std::io::stdin().read_to_end(&mut buf)?;
            buf
        }
    };

    let report = engine.ingest_payload(
        &raw,
        &HashMap::new(),
        Source::Webhook,
        ctx.config.webhook_secret.as_ref().map(ExposeSecret::expose_secret),
    )?;
    println!("{}", report.summary);
    Ok(())
}

pub async fn process_inbox(ctx: &Ctx) -> CliResult<()> {
    let engine = ctx.open_engine()?;
    let paths = ctx.config.paths();
    let spool = Spool::new(paths.inbox, paths.processed);

    let report = engine.process_inbox(
        &spool,
        ctx.config.webhook_secret.as_ref().map(ExposeSecret::expose_secret),
    )?;

    if report.processed == 0 && report.failures.is_empty() {
        println!("Inbox is empty.");
        return Ok(());
    }

    println!(
        "Processed {} payload(s), {} package(s) changed.",
        report.processed, report.changed
    );
    for summary in &report.summaries {
        println!("- {summary}");
    }
    for (name, error) in &report.failures {
        println!("! {name}: {error}");
    }
    Ok(())
}

pub async fn serve(ctx: &Ctx, args: ServeArgs) -> CliResult<()> {
    let paths = ctx.config.paths();
    paths.ensure()?;
    let spool = Arc::new(Spool::new(paths.inbox, paths.processed));

    let config = ServerConfig {
        bind: args.bind.clone(),
        port: args.port,
    };
    let handle = trackle_server::start(config, spool).await?;
    println!(
        "Webhook server listening on {}:{} (POST /webhook)",
        args.bind, handle.port
    );
    println!("Drain spooled payloads with: trackle process-inbox");

    handle.wait().await;
    Ok(())
}
