use crate::cli::{Cli, Commands, HttpCommands};
use crate::error::Result;

mod configure;
mod http;
mod rapid;

pub async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Rapid(args) => rapid::run(&args).await,
        Commands::Http(HttpCommands::Filter(args)) => http::filter(&args).await,
        Commands::Http(HttpCommands::Snapshot(args)) => http::snapshot(&args).await,
        Commands::Configure => configure::run(),
    }
}
