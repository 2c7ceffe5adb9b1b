// SPDX-License-Identifier: MIT OR Apache-2.0

//! Subcommand runners: wire configuration into the library components and
//! render their results.

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::PathBuf;

use crate::cli::OutputFormat;
use starsearch::config::Config;
use starsearch::embedding::{create_provider, EmbeddingBackend};
use starsearch::errors::StarsError;
use starsearch::indexer::{BuildOutcome, IndexBuilder};
use starsearch::output::{
    colorize_dim, colorize_name, colorize_ok, colorize_score, colorize_url, colorize_warn,
    print_json, use_colors,
};
use starsearch::query::{SearchEngine, SearchHit};
use starsearch::remote::{ChatSummarizer, GithubClient, Summarizer};
use starsearch::storage::RecordStore;
use starsearch::sync::{StopReason, SyncOptions, Synchronizer};

fn configured_backend(config: &Config) -> Result<EmbeddingBackend> {
    Ok(config.embeddings().backend().parse()?)
}

fn open_store(config: &Config) -> Result<RecordStore> {
    let path = config.db_path();
    RecordStore::open(&path).with_context(|| format!("Failed to open {}", path.display()))
}

pub fn sync(config: &Config, to_page: Option<u32>, format: OutputFormat) -> Result<()> {
    let github = GithubClient::new(config.github(), config.remote())?;
    let summarizer = ChatSummarizer::from_config(config.summarizer(), config.remote())?;
    if summarizer.is_none() {
        tracing::warn!("DEEPSEEK_API_KEY not set; summaries will be empty");
    }
    let mut store = open_store(config)?;

    let options = SyncOptions {
        to_page,
        per_page: config.github().per_page(),
        concurrency: config.sync().concurrency(),
    };

    let use_color = use_colors() && format == OutputFormat::Text;
    let synchronizer = Synchronizer::new(
        &github,
        summarizer.as_ref().map(|s| s as &dyn Summarizer),
        options,
    )
    .on_page(move |page| {
        if format == OutputFormat::Text {
            println!(
                "{} page {}: {} fetched, {} new, {} stored",
                colorize_ok("✓", use_color),
                page.page,
                page.fetched,
                page.new_items,
                page.inserted
            );
        }
    });

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;
    let report = runtime.block_on(synchronizer.run(&mut store))?;

    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Text => {
            let stop = match &report.stop {
                StopReason::Exhausted => "no more stars".to_string(),
                StopReason::ReachedPageLimit(limit) => format!("reached page {}", limit),
                StopReason::Aborted(message) => format!("aborted: {}", message),
            };
            println!(
                "Synced {} page(s), {} new star(s) ({})",
                report.pages_synced(),
                report.stars_inserted(),
                colorize_dim(&stop, use_color)
            );
        }
    }

    if let StopReason::Aborted(message) = report.stop {
        return Err(StarsError::RemoteTransient(message).into());
    }
    Ok(())
}

#[derive(Serialize)]
struct IndexReport<'a> {
    backend: &'a str,
    index_path: &'a std::path::Path,
    #[serde(flatten)]
    outcome: IndexOutcomeJson,
}

#[derive(Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
enum IndexOutcomeJson {
    NothingToBuild,
    UpToDate,
    Created { added: usize },
    Added { added: usize, total: usize },
}

impl From<&BuildOutcome> for IndexOutcomeJson {
    fn from(outcome: &BuildOutcome) -> Self {
        match *outcome {
            BuildOutcome::NothingToBuild => Self::NothingToBuild,
            BuildOutcome::UpToDate => Self::UpToDate,
            BuildOutcome::Created { added } => Self::Created { added },
            BuildOutcome::Added { added, total } => Self::Added { added, total },
        }
    }
}

pub fn create_index(config: &Config, reset: bool, format: OutputFormat) -> Result<()> {
    let backend = configured_backend(config)?;
    let namespace = backend.namespace(&config.data_dir());
    let index_path = namespace.index_path.clone();
    let mut store = open_store(config)?;

    let mut builder =
        IndexBuilder::new(&mut store, namespace).with_progress(format == OutputFormat::Text);
    if reset {
        builder.reset()?;
    }
    let outcome = builder.build(|| create_provider(backend, config))?;

    match format {
        OutputFormat::Json => print_json(&IndexReport {
            backend: backend.name(),
            index_path: &index_path,
            outcome: IndexOutcomeJson::from(&outcome),
        })?,
        OutputFormat::Text => {
            let use_color = use_colors();
            match outcome {
                BuildOutcome::NothingToBuild => {
                    println!("Nothing to build: no summarized stars yet. Run `starsearch sync` first.")
                }
                BuildOutcome::UpToDate => {
                    println!("Index for {} is up to date.", colorize_name(backend.name(), use_color))
                }
                BuildOutcome::Created { added } => println!(
                    "{} Created {} index with {} star(s) at {}",
                    colorize_ok("✓", use_color),
                    colorize_name(backend.name(), use_color),
                    added,
                    index_path.display()
                ),
                BuildOutcome::Added { added, total } => println!(
                    "{} Added {} star(s) to {} index ({} total)",
                    colorize_ok("✓", use_color),
                    added,
                    colorize_name(backend.name(), use_color),
                    total
                ),
            }
        }
    }
    Ok(())
}

pub fn search(config: &Config, query: &str, k: usize, format: OutputFormat) -> Result<()> {
    let backend = configured_backend(config)?;
    let namespace = backend.namespace(&config.data_dir());
    if !namespace.index_path.exists() {
        return print_missing_index(&namespace.index_path, backend, format);
    }
    let db_path = config.db_path();
    let store = RecordStore::open_read_only(&db_path)
        .with_context(|| format!("Failed to open {}", db_path.display()))?;

    let engine = SearchEngine::new(&store, namespace);
    let hits = match engine.search(query, k, || create_provider(backend, config)) {
        Ok(hits) => hits,
        Err(err) => {
            if let Some(StarsError::IndexNotFound(path)) = StarsError::classify(&err) {
                print_missing_index(path, backend, format)?;
                return Ok(());
            }
            return Err(err);
        }
    };

    match format {
        OutputFormat::Json => print_json(&hits)?,
        OutputFormat::Text => print_hits(&hits),
    }
    Ok(())
}

fn print_missing_index(
    path: &std::path::Path,
    backend: EmbeddingBackend,
    format: OutputFormat,
) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "results": [],
            "message": format!("no index for backend '{}' at {}", backend, path.display()),
        })),
        OutputFormat::Text => {
            println!(
                "{} No index for backend '{}' at {}",
                colorize_warn("!", use_colors()),
                backend,
                path.display()
            );
            println!("Run `starsearch create-index` to build it.");
            Ok(())
        }
    }
}

fn print_hits(hits: &[SearchHit]) {
    let use_color = use_colors();
    if hits.is_empty() {
        println!("No results.");
        return;
    }
    for (rank, hit) in hits.iter().enumerate() {
        println!(
            "{}. {} [{}]",
            rank + 1,
            colorize_name(&hit.record.name, use_color),
            colorize_score(hit.score, use_color)
        );
        println!("   {}", colorize_url(&hit.record.url, use_color));
        if !hit.record.summary.is_empty() {
            println!("   {}", hit.record.summary);
        } else if !hit.record.description.is_empty() {
            println!("   {}", colorize_dim(&hit.record.description, use_color));
        }
    }
}

#[derive(Serialize)]
struct BackendStatus {
    backend: &'static str,
    index_path: PathBuf,
    index_exists: bool,
    indexed: usize,
}

#[derive(Serialize)]
struct StatusReport {
    database: PathBuf,
    last_synced_page: u32,
    stars: u64,
    active_backend: String,
    backends: Vec<BackendStatus>,
}

pub fn status(config: &Config, format: OutputFormat) -> Result<()> {
    let db_path = config.db_path();
    let data_dir = config.data_dir();
    // A store that was never synced reports zeros instead of being created.
    let store = if db_path.exists() {
        Some(RecordStore::open_read_only(&db_path)?)
    } else {
        None
    };

    let mut backends = Vec::with_capacity(EmbeddingBackend::ALL.len());
    for backend in EmbeddingBackend::ALL {
        let namespace = backend.namespace(&data_dir);
        let indexed = match &store {
            Some(store) => store.indexed_count(backend)?,
            None => 0,
        };
        backends.push(BackendStatus {
            backend: backend.name(),
            index_exists: namespace.index_path.exists(),
            index_path: namespace.index_path,
            indexed,
        });
    }

    let (last_synced_page, stars) = match &store {
        Some(store) => (store.last_synced_page()?, store.count_stars()?),
        None => (0, 0),
    };
    let report = StatusReport {
        database: db_path,
        last_synced_page,
        stars,
        active_backend: config.embeddings().backend().to_string(),
        backends,
    };

    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Text => {
            let use_color = use_colors();
            println!("Database:         {}", report.database.display());
            println!("Last synced page: {}", report.last_synced_page);
            println!("Stars:            {}", report.stars);
            println!("Active backend:   {}", colorize_name(&report.active_backend, use_color));
            for b in &report.backends {
                let state = if b.index_exists {
                    colorize_ok("index present", use_color)
                } else {
                    colorize_dim("no index", use_color)
                };
                println!("  {:<22} {:>6} indexed  {}", b.backend, b.indexed, state);
            }
        }
    }
    Ok(())
}
