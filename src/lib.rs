// SPDX-License-Identifier: MIT OR Apache-2.0

//! starsearch - Semantic search over your GitHub stars
//!
//! Shared modules for the starsearch CLI tool: ingestion of starred
//! repositories, per-backend vector indexes, and query-time retrieval.

pub mod config;
pub mod embedding;
pub mod errors;
pub mod indexer;
pub mod output;
pub mod query;
pub mod remote;
pub mod storage;
pub mod sync;
