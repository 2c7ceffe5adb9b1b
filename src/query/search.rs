// SPDX-License-Identifier: MIT OR Apache-2.0

//! Semantic search over the vector index

use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::HashMap;

use crate::embedding::{l2_normalize, BackendNamespace, EmbeddingProvider, VectorIndex, NO_ID};
use crate::errors::StarsError;
use crate::storage::{RecordStore, StarRecord};

/// One ranked result.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    #[serde(flatten)]
    pub record: StarRecord,
    /// Inner product between the query and the stored vector
    pub score: f32,
}

pub struct SearchEngine<'a> {
    store: &'a RecordStore,
    namespace: BackendNamespace,
}

impl<'a> SearchEngine<'a> {
    pub fn new(store: &'a RecordStore, namespace: BackendNamespace) -> Self {
        Self { store, namespace }
    }

    /// Returns up to `k` records, most similar first.
    ///
    /// Fails with [`StarsError::IndexNotFound`] before `make_provider` runs
    /// when the backend has no index on disk.
    pub fn search<F>(&self, query: &str, k: usize, make_provider: F) -> Result<Vec<SearchHit>>
    where
        F: FnOnce() -> Result<Box<dyn EmbeddingProvider>>,
    {
        let index_path = &self.namespace.index_path;
        if !index_path.exists() {
            return Err(StarsError::IndexNotFound(index_path.clone()).into());
        }

        let index = VectorIndex::load(index_path)?;
        let backend = self.namespace.backend;
        if index.backend() != backend.name() {
            return Err(StarsError::Configuration(format!(
                "index {} was built by backend '{}', not '{}'",
                index_path.display(),
                index.backend(),
                backend
            ))
            .into());
        }
        if k == 0 || index.is_empty() {
            return Ok(Vec::new());
        }

        let mut provider = make_provider()?;
        let mut embedding = provider
            .embed_one(query)
            .context("Failed to embed query")?;
        l2_normalize(&mut embedding);

        let hits = index.search(&embedding, k.min(index.len()))?;
        let ranked: Vec<(i64, f32)> = hits
            .ids
            .iter()
            .copied()
            .zip(hits.scores.iter().copied())
            .filter(|(id, _)| *id != NO_ID)
            .collect();

        let ids: Vec<i64> = ranked.iter().map(|(id, _)| *id).collect();
        let mut by_id: HashMap<i64, StarRecord> = self
            .store
            .get_stars(&ids)?
            .into_iter()
            .map(|record| (record.id, record))
            .collect();

        let mut results = Vec::with_capacity(ranked.len());
        for (id, score) in ranked {
            match by_id.remove(&id) {
                Some(record) => results.push(SearchHit { record, score }),
                None => tracing::warn!(id, "indexed id missing from record store"),
            }
        }
        Ok(results)
    }
}
