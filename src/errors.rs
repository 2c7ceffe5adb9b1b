// SPDX-License-Identifier: MIT OR Apache-2.0

//! Classified errors that callers need to tell apart.
//!
//! Everything else travels as `anyhow::Error` with context attached; these
//! variants are raised through it and recovered with `downcast_ref`.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StarsError {
    /// Unknown or unconfigured backend, missing credentials, dimension mismatch.
    /// Fatal and never retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A remote call that still failed after the retry policy gave up.
    #[error("remote request failed: {0}")]
    RemoteTransient(String),

    /// No index file exists for the configured backend.
    #[error("index not found at {}. Run `starsearch create-index` first.", .0.display())]
    IndexNotFound(PathBuf),

    /// The index file failed validation while loading.
    #[error("index file is corrupt: {0}")]
    CorruptIndex(String),
}

impl StarsError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Returns the classified error behind an `anyhow::Error`, if any.
    pub fn classify(err: &anyhow::Error) -> Option<&StarsError> {
        err.downcast_ref::<StarsError>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_finds_variant_through_anyhow() {
        let err: anyhow::Error = StarsError::config("unknown backend 'foo'").into();
        let err = err.context("while building index");
        assert!(matches!(
            StarsError::classify(&err),
            Some(StarsError::Configuration(_))
        ));
    }

    #[test]
    fn index_not_found_mentions_create_index() {
        let err = StarsError::IndexNotFound(PathBuf::from("data/index_voyageai.vec"));
        let message = err.to_string();
        assert!(message.contains("data/index_voyageai.vec"));
        assert!(message.contains("create-index"));
    }
}
