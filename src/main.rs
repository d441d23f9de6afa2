use clap::Parser;
use trackle_core::Config;

mod cli;
mod commands;
mod error;

use cli::{Cli, Commands};
use commands::Ctx;
use error::CliResult;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Cli::parse();
    let config = Config::from_env();
    tracing::debug!(data_dir = %config.data_dir.display(), lang = %config.lang, "configuration resolved");
    let ctx = Ctx::new(config);

    match run(&ctx, args.command).await {
        Ok(()) => {}
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(e.exit_code());
        }
    }
}

async fn run(ctx: &Ctx, command: Commands) -> CliResult<()> {
    match command {
        Commands::Init => commands::packages::init(ctx),
        Commands::Add(args) => commands::packages::add(ctx, args).await,
        Commands::List(args) => commands::packages::list(ctx, args),
        Commands::Sync(args) => commands::sync::sync(ctx, args).await,
        Commands::Status(args) => commands::packages::status(ctx, args).await,
        Commands::Stop(args) => commands::packages::stop(ctx, args).await,
        Commands::Retrack(args) => commands::packages::retrack(ctx, args).await,
        Commands::Remove(args) => commands::packages::remove(ctx, args).await,
        Commands::Quota => commands::sync::quota(ctx).await,
        Commands::IngestWebhook(args) => commands::webhook::ingest_webhook(ctx, args).await,
        Commands::ProcessInbox => commands::webhook::process_inbox(ctx).await,
        Commands::Serve(args) => commands::webhook::serve(ctx, args).await,
    }
}
