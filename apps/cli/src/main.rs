//! CouncilWatch CLI — incremental ingestion of municipal meeting records.
//!
//! Crawls meeting listings and agendas into a content-addressed store, then
//! fetches and extracts the documents those agendas link to.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
