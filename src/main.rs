// SPDX-License-Identifier: MIT OR Apache-2.0

//! starsearch - Semantic search over your GitHub stars
//!
//! Syncs starred repositories into SQLite, summarizes their READMEs, and
//! answers natural-language queries against a per-backend vector index.

mod cli;
mod commands;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Commands};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    // Initialize tracing with STARSEARCH_LOG env var (e.g., STARSEARCH_LOG=debug starsearch sync)
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_env("STARSEARCH_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let format = cli.format;

    let mut config = starsearch::config::Config::load();
    if let Some(dir) = cli.data_dir {
        config.data_dir = Some(dir);
    }

    match cli.command {
        Commands::Sync { to_page } => {
            commands::sync(&config, to_page, format)?;
        }
        Commands::CreateIndex { reset } => {
            commands::create_index(&config, reset, format)?;
        }
        Commands::Search { query, k } => {
            commands::search(&config, &query, k, format)?;
        }
        Commands::Status => {
            commands::status(&config, format)?;
        }
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "starsearch", &mut std::io::stdout());
        }
    }

    Ok(())
}
