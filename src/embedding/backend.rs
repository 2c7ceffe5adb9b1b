// SPDX-License-Identifier: MIT OR Apache-2.0

//! Supported embedding backends and the storage namespace each one owns.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::errors::StarsError;

/// Embedding backend, selected once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EmbeddingBackend {
    /// Local sentence-transformers/all-MiniLM-L6-v2 through fastembed
    SentenceTransformers,
    /// Voyage AI embeddings API
    VoyageAi,
    /// External command speaking JSON over stdin/stdout
    Command,
}

impl EmbeddingBackend {
    pub const ALL: [EmbeddingBackend; 3] = [
        EmbeddingBackend::SentenceTransformers,
        EmbeddingBackend::VoyageAi,
        EmbeddingBackend::Command,
    ];

    /// Canonical configuration name.
    pub fn name(self) -> &'static str {
        match self {
            EmbeddingBackend::SentenceTransformers => "sentence-transformers",
            EmbeddingBackend::VoyageAi => "voyageai",
            EmbeddingBackend::Command => "command",
        }
    }

    /// SQLite table holding the ids already present in this backend's index.
    pub fn marker_table(self) -> &'static str {
        match self {
            EmbeddingBackend::SentenceTransformers => "indexed_star_sentence_transformers",
            EmbeddingBackend::VoyageAi => "indexed_star_voyageai",
            EmbeddingBackend::Command => "indexed_star_command",
        }
    }

    /// Where this backend's index file and marker table live.
    pub fn namespace(self, data_dir: &Path) -> BackendNamespace {
        BackendNamespace {
            backend: self,
            index_path: data_dir.join(format!("index_{}.vec", self.name())),
            marker_table: self.marker_table(),
        }
    }
}

impl fmt::Display for EmbeddingBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EmbeddingBackend {
    type Err = StarsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sentence-transformers" | "sentence_transformers" | "minilm" => {
                Ok(EmbeddingBackend::SentenceTransformers)
            }
            "voyageai" | "voyage" => Ok(EmbeddingBackend::VoyageAi),
            "command" => Ok(EmbeddingBackend::Command),
            other => Err(StarsError::Configuration(format!(
                "unknown embedding implementation '{}'. Supported values: {}",
                other,
                EmbeddingBackend::ALL
                    .iter()
                    .map(|b| b.name())
                    .collect::<Vec<_>>()
                    .join(", ")
            ))),
        }
    }
}

/// Per-backend resource names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendNamespace {
    pub backend: EmbeddingBackend,
    pub index_path: PathBuf,
    pub marker_table: &'static str,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_names() {
        assert_eq!(
            "sentence-transformers".parse::<EmbeddingBackend>().unwrap(),
            EmbeddingBackend::SentenceTransformers
        );
        assert_eq!(
            " VoyageAI ".parse::<EmbeddingBackend>().unwrap(),
            EmbeddingBackend::VoyageAi
        );
    }

    #[test]
    fn unknown_name_is_configuration_error() {
        let err = "openai".parse::<EmbeddingBackend>().unwrap_err();
        assert!(matches!(err, StarsError::Configuration(_)));
        assert!(err.to_string().contains("sentence-transformers"));
    }

    #[test]
    fn namespaces_are_distinct() {
        let dir = Path::new("data");
        let a = EmbeddingBackend::SentenceTransformers.namespace(dir);
        let b = EmbeddingBackend::VoyageAi.namespace(dir);
        assert_ne!(a.index_path, b.index_path);
        assert_ne!(a.marker_table, b.marker_table);
        assert_eq!(a.index_path, dir.join("index_sentence-transformers.vec"));
    }

    #[test]
    fn marker_tables_are_plain_identifiers() {
        for backend in EmbeddingBackend::ALL {
            assert!(backend
                .marker_table()
                .chars()
                .all(|c| c.is_ascii_lowercase() || c == '_'));
        }
    }
}
