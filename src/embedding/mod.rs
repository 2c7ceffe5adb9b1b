// SPDX-License-Identifier: MIT OR Apache-2.0

//! Embedding module - backends, providers, and the per-backend vector index
//!
//! A backend is chosen once from configuration. It determines the provider
//! used to turn summaries into vectors and the namespace (index file and
//! marker table) those vectors are tracked under.

pub mod backend;
pub mod provider;
pub mod vector_index;

pub use backend::{BackendNamespace, EmbeddingBackend};
pub use provider::{
    create_provider, l2_normalize, CommandProvider, EmbeddingProvider, FastEmbedder,
    VoyageProvider,
};
pub use vector_index::{SearchHits, VectorIndex, NO_ID};
