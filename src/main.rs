mod cli;
mod config;
mod docker;
mod utils;

use anyhow::Result;
use clap::Parser;
use cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    utils::logger::init(cli.verbose())?;

    cli.execute().await
}
