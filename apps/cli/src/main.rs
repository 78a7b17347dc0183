//! BookForge CLI — research-to-manuscript pipeline for non-fiction books.
//!
//! Queues sources, ingests them into an 11-chapter draft structure, and
//! drafts chapters in parallel with LLM backends.

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
