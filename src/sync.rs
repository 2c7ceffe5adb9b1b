// SPDX-License-Identifier: MIT OR Apache-2.0

//! Resumable ingestion of starred repositories.
//!
//! Pages are fetched strictly in order starting after the stored cursor.
//! For each page, items not yet in the record store are enriched
//! concurrently (README fetch, then summarization), and the whole page is
//! committed together with the cursor advance. A failed listing call ends
//! the run without touching the cursor, so the next run retries that page.

use anyhow::Result;
use futures::stream::{self, StreamExt};
use serde::Serialize;

use crate::remote::{StarItem, StarSource, Summarizer};
use crate::storage::{RecordStore, StarRecord};

/// Knobs for one sync run.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Last page to fetch, inclusive
    pub to_page: Option<u32>,
    pub per_page: u32,
    /// Maximum enrichments in flight within a page
    pub concurrency: usize,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            to_page: None,
            per_page: 30,
            concurrency: 8,
        }
    }
}

/// Why a sync run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum StopReason {
    /// The API returned an empty page
    Exhausted,
    /// The next page would exceed `to_page`
    ReachedPageLimit(u32),
    /// The listing call failed after retries; committed pages are kept
    Aborted(String),
}

/// Per-page outcome, reported as each page commits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageSummary {
    pub page: u32,
    pub fetched: usize,
    pub new_items: usize,
    pub inserted: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// First page this run asked for
    pub start_page: u32,
    pub pages: Vec<PageSummary>,
    pub stop: StopReason,
}

impl SyncReport {
    pub fn pages_synced(&self) -> usize {
        self.pages.len()
    }

    pub fn stars_inserted(&self) -> usize {
        self.pages.iter().map(|p| p.inserted).sum()
    }

    pub fn aborted(&self) -> bool {
        matches!(self.stop, StopReason::Aborted(_))
    }
}

pub struct Synchronizer<'a> {
    source: &'a dyn StarSource,
    summarizer: Option<&'a dyn Summarizer>,
    options: SyncOptions,
    on_page: Option<Box<dyn Fn(&PageSummary) + 'a>>,
}

impl<'a> Synchronizer<'a> {
    pub fn new(
        source: &'a dyn StarSource,
        summarizer: Option<&'a dyn Summarizer>,
        options: SyncOptions,
    ) -> Self {
        Self {
            source,
            summarizer,
            options,
            on_page: None,
        }
    }

    /// Registers a callback invoked after each page commits.
    pub fn on_page(mut self, callback: impl Fn(&PageSummary) + 'a) -> Self {
        self.on_page = Some(Box::new(callback));
        self
    }

    /// Runs the page loop until the source is exhausted, the page limit is
    /// reached, or a listing call fails.
    ///
    /// Store errors are returned as errors; remote listing failures are
    /// reported through [`StopReason::Aborted`].
    pub async fn run(&self, store: &mut RecordStore) -> Result<SyncReport> {
        let start_page = store.last_synced_page()? + 1;
        let mut page = start_page;
        let mut pages = Vec::new();

        tracing::info!(start_page, to_page = ?self.options.to_page, "sync starting");

        let stop = loop {
            if let Some(limit) = self.options.to_page {
                if page > limit {
                    break StopReason::ReachedPageLimit(limit);
                }
            }

            let items = match self.source.list_starred(page, self.options.per_page).await {
                Ok(items) => items,
                Err(failure) => {
                    tracing::warn!(page, error = %failure, "listing failed, stopping sync");
                    break StopReason::Aborted(failure.message);
                }
            };
            if items.is_empty() {
                break StopReason::Exhausted;
            }

            let fetched = items.len();
            let ids: Vec<i64> = items.iter().map(|item| item.id).collect();
            let existing = store.existing_ids(&ids)?;
            let new_items: Vec<StarItem> = items
                .into_iter()
                .filter(|item| !existing.contains(&item.id))
                .collect();
            let new_count = new_items.len();

            let records: Vec<StarRecord> = stream::iter(new_items)
                .map(|item| self.enrich(item))
                .buffer_unordered(self.options.concurrency.max(1))
                .collect()
                .await;

            let inserted = store.commit_page(page, &records)?;
            let summary = PageSummary {
                page,
                fetched,
                new_items: new_count,
                inserted,
            };
            tracing::info!(page, fetched, new_items = new_count, inserted, "page committed");
            if let Some(callback) = &self.on_page {
                callback(&summary);
            }
            pages.push(summary);

            page += 1;
        };

        Ok(SyncReport {
            start_page,
            pages,
            stop,
        })
    }

    /// Builds a record for one item. Never fails: a missing README falls back
    /// to the description, and a failed summary is left empty.
    async fn enrich(&self, item: StarItem) -> StarRecord {
        let description = item.description.unwrap_or_default();

        let readme = match self.source.fetch_readme(&item.full_name).await {
            Ok(readme) => readme,
            Err(failure) => {
                tracing::warn!(repo = %item.full_name, error = %failure, "README fetch failed");
                None
            }
        };
        let text = readme
            .as_deref()
            .filter(|text| !text.trim().is_empty())
            .unwrap_or(&description);

        let summary = match self.summarizer {
            Some(summarizer) if !text.trim().is_empty() => match summarizer.summarize(text).await {
                Ok(summary) => summary,
                Err(failure) => {
                    tracing::warn!(repo = %item.full_name, error = %failure, "summary failed");
                    String::new()
                }
            },
            _ => String::new(),
        };

        StarRecord {
            id: item.id,
            name: item.full_name,
            description,
            url: item.html_url,
            summary,
        }
    }
}
