// SPDX-License-Identifier: MIT OR Apache-2.0

//! CLI argument parsing using clap

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

/// starsearch - Semantic search over your GitHub stars
///
/// Syncs starred repositories into a local store, summarizes them, and
/// builds a vector index per embedding backend for natural-language search.
#[derive(Parser, Debug)]
#[command(name = "starsearch")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Output format (text or json)
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    /// Directory holding the database and index files
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Output format for results
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fetch starred repositories, resuming after the last synced page
    Sync {
        /// Last page to fetch (inclusive)
        #[arg(long)]
        to_page: Option<u32>,
    },

    /// Embed new summaries into the configured backend's index
    CreateIndex {
        /// Delete the index and its markers, then rebuild from scratch
        #[arg(long)]
        reset: bool,
    },

    /// Search starred repositories by meaning
    Search {
        /// Natural-language query
        query: String,

        /// Number of results to return
        #[arg(short, long, default_value_t = 5)]
        k: usize,
    },

    /// Show sync cursor, record count, and per-backend index state
    Status,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}
