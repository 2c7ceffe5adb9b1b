// SPDX-License-Identifier: MIT OR Apache-2.0

//! Incremental vector index builder
//!
//! Brings one backend's index up to date with the record store. Only
//! records with a summary that are missing from the backend's marker table
//! are embedded. The index file is persisted before the markers commit, so a
//! crash in between leaves ids unmarked and the next build re-adds them
//! (the index replaces vectors for ids it already holds).

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

use crate::embedding::{l2_normalize, BackendNamespace, EmbeddingProvider, VectorIndex};
use crate::errors::StarsError;
use crate::storage::RecordStore;

/// Result of one build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutcome {
    /// No summaries to embed and no index on disk
    NothingToBuild,
    /// No new summaries; the existing index is current
    UpToDate,
    /// A new index file was written
    Created { added: usize },
    /// Vectors were appended to an existing index
    Added { added: usize, total: usize },
}

pub struct IndexBuilder<'a> {
    store: &'a mut RecordStore,
    namespace: BackendNamespace,
    show_progress: bool,
}

impl<'a> IndexBuilder<'a> {
    pub fn new(store: &'a mut RecordStore, namespace: BackendNamespace) -> Self {
        Self {
            store,
            namespace,
            show_progress: false,
        }
    }

    /// Shows a spinner on stderr while embedding.
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn namespace(&self) -> &BackendNamespace {
        &self.namespace
    }

    /// Clears the marker set and deletes the index file, forcing a full rebuild.
    ///
    /// Markers go first: an interrupted reset leaves unmarked ids in a live
    /// index, which the next build re-embeds and replaces.
    pub fn reset(&mut self) -> Result<()> {
        self.store.reset_markers(self.namespace.backend)?;
        tracing::info!(table = self.namespace.marker_table, "reset marker table");

        let path = &self.namespace.index_path;
        if path.exists() {
            std::fs::remove_file(path)
                .with_context(|| format!("Failed to remove index: {}", path.display()))?;
            tracing::info!(path = %path.display(), "removed index file");
        }
        Ok(())
    }

    /// Embeds and indexes every pending summary.
    ///
    /// `make_provider` is only called when there is something to embed.
    pub fn build<F>(&mut self, make_provider: F) -> Result<BuildOutcome>
    where
        F: FnOnce() -> Result<Box<dyn EmbeddingProvider>>,
    {
        let backend = self.namespace.backend;
        let index_path = self.namespace.index_path.clone();
        let pending = self.store.unindexed_summaries(backend)?;

        if pending.is_empty() {
            return Ok(if index_path.exists() {
                BuildOutcome::UpToDate
            } else {
                BuildOutcome::NothingToBuild
            });
        }

        let (ids, texts): (Vec<i64>, Vec<String>) = pending.into_iter().unzip();
        tracing::info!(backend = %backend, pending = ids.len(), "embedding summaries");

        let mut provider = make_provider()?;
        let mut vectors = self.embed(provider.as_mut(), &texts)?;
        for vector in vectors.iter_mut() {
            l2_normalize(vector);
        }

        let existing = index_path.exists();
        let mut index = if existing {
            let index = VectorIndex::load(&index_path)?;
            if index.backend() != backend.name() {
                return Err(StarsError::Configuration(format!(
                    "index {} was built by backend '{}', not '{}'",
                    index_path.display(),
                    index.backend(),
                    backend
                ))
                .into());
            }
            index
        } else {
            let dim = vectors.first().map(Vec::len).unwrap_or_default();
            VectorIndex::new(backend.name(), dim)
        };

        let replaced = index.add_with_ids(&ids, &vectors)?;
        if replaced > 0 {
            tracing::warn!(replaced, "re-added ids already present in the index");
        }

        index.save(&index_path)?;
        self.store.mark_indexed(backend, &ids)?;

        Ok(if existing {
            BuildOutcome::Added {
                added: ids.len(),
                total: index.len(),
            }
        } else {
            BuildOutcome::Created { added: ids.len() }
        })
    }

    fn embed(&self, provider: &mut dyn EmbeddingProvider, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let spinner = if self.show_progress {
            let pb = ProgressBar::new_spinner();
            if let Ok(style) = ProgressStyle::default_spinner().template("{spinner} {msg}") {
                pb.set_style(style);
            }
            pb.set_message(format!(
                "Embedding {} summaries with {}",
                texts.len(),
                provider.model_id()
            ));
            pb.enable_steady_tick(Duration::from_millis(120));
            Some(pb)
        } else {
            None
        };

        let result = provider.embed_texts(texts);
        if let Some(pb) = spinner {
            pb.finish_and_clear();
        }
        let vectors = result?;

        if vectors.len() != texts.len() {
            anyhow::bail!(
                "provider returned {} vectors for {} summaries",
                vectors.len(),
                texts.len()
            );
        }
        Ok(vectors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::EmbeddingBackend;
    use crate::storage::StarRecord;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    /// Maps each text to a one-hot vector keyed by its length.
    struct LengthProvider {
        calls: Arc<AtomicUsize>,
    }

    impl EmbeddingProvider for LengthProvider {
        fn model_id(&self) -> &str {
            "length"
        }

        fn batch_size(&self) -> usize {
            64
        }

        fn embed_texts(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(texts
                .iter()
                .map(|t| {
                    let mut v = vec![0.5; 8];
                    v[t.len() % 8] = 3.0;
                    v
                })
                .collect())
        }
    }

    fn record(id: i64, summary: &str) -> StarRecord {
        StarRecord {
            id,
            name: format!("o/r{}", id),
            description: String::new(),
            url: String::new(),
            summary: summary.to_string(),
        }
    }

    fn provider(calls: &Arc<AtomicUsize>) -> Result<Box<dyn EmbeddingProvider>> {
        Ok(Box::new(LengthProvider {
            calls: Arc::clone(calls),
        }))
    }

    #[test]
    fn nothing_to_build_skips_provider() {
        let dir = TempDir::new().unwrap();
        let mut store = RecordStore::open_in_memory().unwrap();
        let ns = EmbeddingBackend::Command.namespace(dir.path());
        let mut builder = IndexBuilder::new(&mut store, ns);

        let outcome = builder
            .build(|| panic!("provider must not be constructed"))
            .unwrap();
        assert_eq!(outcome, BuildOutcome::NothingToBuild);
    }

    #[test]
    fn incremental_build_marks_and_appends() {
        let dir = TempDir::new().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let mut store = RecordStore::open_in_memory().unwrap();
        store
            .commit_page(1, &[record(1, "a"), record(2, "bb"), record(3, "")])
            .unwrap();
        let ns = EmbeddingBackend::Command.namespace(dir.path());

        let outcome = IndexBuilder::new(&mut store, ns.clone())
            .build(|| provider(&calls))
            .unwrap();
        assert_eq!(outcome, BuildOutcome::Created { added: 2 });

        let outcome = IndexBuilder::new(&mut store, ns.clone())
            .build(|| provider(&calls))
            .unwrap();
        assert_eq!(outcome, BuildOutcome::UpToDate);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        store.commit_page(2, &[record(4, "dddd")]).unwrap();
        let outcome = IndexBuilder::new(&mut store, ns.clone())
            .build(|| provider(&calls))
            .unwrap();
        assert_eq!(outcome, BuildOutcome::Added { added: 1, total: 3 });

        let index = VectorIndex::load(&ns.index_path).unwrap();
        let mut in_index: Vec<i64> = index.ids().to_vec();
        in_index.sort();
        let mut marked: Vec<i64> = store
            .indexed_ids(EmbeddingBackend::Command)
            .unwrap()
            .into_iter()
            .collect();
        marked.sort();
        assert_eq!(in_index, marked);
        assert_eq!(in_index, vec![1, 2, 4]);

        let norm: f32 = index.get(4).unwrap().iter().map(|v| v * v).sum();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn lost_markers_heal_without_duplicates() {
        let dir = TempDir::new().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let mut store = RecordStore::open_in_memory().unwrap();
        store.commit_page(1, &[record(1, "a"), record(2, "bb")]).unwrap();
        let ns = EmbeddingBackend::Command.namespace(dir.path());

        IndexBuilder::new(&mut store, ns.clone())
            .build(|| provider(&calls))
            .unwrap();

        // Simulate a crash after the index write but before markers commit.
        store.reset_markers(EmbeddingBackend::Command).unwrap();

        let outcome = IndexBuilder::new(&mut store, ns.clone())
            .build(|| provider(&calls))
            .unwrap();
        assert_eq!(outcome, BuildOutcome::Added { added: 2, total: 2 });
        assert_eq!(VectorIndex::load(&ns.index_path).unwrap().len(), 2);
    }

    #[test]
    fn reset_forces_full_rebuild() {
        let dir = TempDir::new().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let mut store = RecordStore::open_in_memory().unwrap();
        store.commit_page(1, &[record(1, "a")]).unwrap();
        let ns = EmbeddingBackend::Command.namespace(dir.path());

        IndexBuilder::new(&mut store, ns.clone())
            .build(|| provider(&calls))
            .unwrap();
        assert!(ns.index_path.exists());

        let mut builder = IndexBuilder::new(&mut store, ns.clone());
        builder.reset().unwrap();
        assert!(!ns.index_path.exists());
        let outcome = builder.build(|| provider(&calls)).unwrap();
        assert_eq!(outcome, BuildOutcome::Created { added: 1 });
    }

    #[test]
    fn interrupted_reset_leaves_no_stale_markers() {
        let dir = TempDir::new().unwrap();
        let mut store = RecordStore::open_in_memory().unwrap();
        store.commit_page(1, &[record(1, "a")]).unwrap();
        store.mark_indexed(EmbeddingBackend::Command, &[1]).unwrap();
        let ns = EmbeddingBackend::Command.namespace(dir.path());
        // A directory where the index file should be makes the removal fail.
        std::fs::create_dir_all(&ns.index_path).unwrap();

        assert!(IndexBuilder::new(&mut store, ns.clone()).reset().is_err());
        assert!(store
            .indexed_ids(EmbeddingBackend::Command)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn foreign_index_is_rejected() {
        let dir = TempDir::new().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let mut store = RecordStore::open_in_memory().unwrap();
        store.commit_page(1, &[record(1, "a")]).unwrap();
        let ns = EmbeddingBackend::Command.namespace(dir.path());
        VectorIndex::new("voyageai", 8).save(&ns.index_path).unwrap();

        let err = IndexBuilder::new(&mut store, ns)
            .build(|| provider(&calls))
            .unwrap_err();
        assert!(matches!(
            StarsError::classify(&err),
            Some(StarsError::Configuration(_))
        ));
    }
}
