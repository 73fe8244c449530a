use clap::Parser;

use tickdump::cli::Cli;

#[tokio::main]
async fn main() {
    env_logger::init();
    let cli = Cli::parse();
    if let Err(err) = tickdump::commands::run(cli).await {
        eprintln!("Error occurred: {}", err);
        std::process::exit(1);
    }
}
