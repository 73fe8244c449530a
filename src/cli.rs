use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "tickdump")]
#[command(about = "A CLI tool for downloading historical market data streams")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Download a formatted stream of filtered data using parallel minute requests
    Rapid(RapidArgs),

    /// Directly interact with the HTTP API
    #[command(subcommand)]
    Http(HttpCommands),

    /// Set up the API credentials used to access the service
    Configure,
}

#[derive(Args)]
pub struct RapidArgs {
    /// Target exchange
    #[arg(long)]
    pub exchange: String,

    /// Target channel of the target exchange
    #[arg(long)]
    pub channel: String,

    /// Start datetime of the stream (Unix nanoseconds or RFC3339)
    #[arg(long)]
    pub start: String,

    /// End datetime of the stream (Unix nanoseconds or RFC3339)
    #[arg(long)]
    pub end: String,

    /// Output format: 'json' or 'csv'
    #[arg(long, default_value = "json")]
    pub format: String,

    /// How many filter requests run in parallel
    #[arg(long, default_value_t = 50)]
    pub parallel: usize,

    /// Comma-separated list of fields to include
    #[arg(long)]
    pub fields: Option<String>,
}

#[derive(Subcommand)]
pub enum HttpCommands {
    /// Call the Filter HTTP endpoint and print the raw response
    Filter(HttpFilterArgs),

    /// Call the Snapshot HTTP endpoint and print the raw response
    Snapshot(HttpSnapshotArgs),
}

#[derive(Args)]
pub struct HttpFilterArgs {
    /// Target exchange
    #[arg(long)]
    pub exchange: String,

    /// Channels to filter in, separated by ','
    #[arg(long)]
    pub channels: String,

    /// Target minute (Unix nanoseconds or RFC3339); fractions of a minute are floored
    #[arg(long)]
    pub minute: String,

    /// Response format requested from the server
    #[arg(long, default_value = "json")]
    pub format: String,
}

#[derive(Args)]
pub struct HttpSnapshotArgs {
    /// Target exchange
    #[arg(long)]
    pub exchange: String,

    /// Channels to include, separated by ','
    #[arg(long)]
    pub channels: String,

    /// Target datetime (Unix nanoseconds or RFC3339)
    #[arg(long)]
    pub at: String,

    /// Response format requested from the server
    #[arg(long, default_value = "json")]
    pub format: String,
}
