//! Firmscope CLI: company information aggregation.
//!
//! Reads a list of companies, gathers what public sources know about each,
//! and writes one structured CSV row per company location.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli)?;
    commands::run(cli).await
}
