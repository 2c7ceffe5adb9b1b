// SPDX-License-Identifier: MIT OR Apache-2.0

//! Query module - semantic search over indexed stars

pub mod search;

pub use search::{SearchEngine, SearchHit};
