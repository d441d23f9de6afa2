use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Local parcel tracking mirror for the 17TRACK API.
#[derive(Parser)]
#[command(name = "trackle")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialise the database and data directories
    Init,

    /// Add and register a tracking number
    Add(AddArgs),

    /// List locally tracked packages
    List(ListArgs),

    /// Poll the provider for updates for all packages
    Sync(SyncArgs),

    /// Show status for one package
    Status(StatusArgs),

    /// Stop tracking a package at the provider
    Stop(KeyArgs),

    /// Restart tracking for a stopped package
    Retrack(KeyArgs),

    /// Remove a package from the local database
    Remove(RemoveArgs),

    /// Show provider API quota info
    Quota,

    /// Ingest a single webhook payload (stdin or --file)
    IngestWebhook(IngestWebhookArgs),

    /// Process all spooled payloads in the inbox directory
    ProcessInbox,

    /// Run the webhook receiver server
    Serve(ServeArgs),
}

#[derive(Args)]
pub struct AddArgs {
    /// Tracking number
    pub number: String,

    /// Human-readable label
    #[arg(long)]
    pub label: Option<String>,

    /// Carrier code (0 = auto-detect)
    #[arg(long, default_value_t = 0)]
    pub carrier: i64,

    /// Provider disambiguation parameter
    #[arg(long)]
    pub param: Option<String>,

    /// Provider tag (defaults to a label prefix)
    #[arg(long)]
    pub tag: Option<String>,

    /// Translation language for events
    #[arg(long)]
    pub lang: Option<String>,

    /// Fetch status immediately after registering
    #[arg(long)]
    pub status: bool,
}

#[derive(Args)]
pub struct ListArgs {
    /// Include archived packages
    #[arg(long)]
    pub all: bool,
}

#[derive(Args)]
pub struct SyncArgs {
    /// Skip packages whose tracking is stopped
    #[arg(long)]
    pub active_only: bool,
}

#[derive(Args)]
pub struct StatusArgs {
    /// Package id or tracking number
    pub key: String,

    /// Poll the provider before displaying
    #[arg(long)]
    pub refresh: bool,

    /// Number of recent events to show
    #[arg(long, default_value_t = 10)]
    pub events: u32,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args)]
pub struct KeyArgs {
    /// Package id or tracking number
    pub key: String,
}

#[derive(Args)]
pub struct RemoveArgs {
    /// Package id or tracking number
    pub key: String,

    /// Also delete the registration at the provider
    #[arg(long)]
    pub delete_remote: bool,
}

#[derive(Args)]
pub struct IngestWebhookArgs {
    /// Read the payload from a file instead of stdin
    #[arg(long)]
    pub file: Option<PathBuf>,
}

#[derive(Args)]
pub struct ServeArgs {
    /// Address to bind
    #[arg(long, default_value = "0.0.0.0")]
    pub bind: String,

    /// Port to listen on
    #[arg(long, default_value_t = 8190)]
    pub port: u16,
}
