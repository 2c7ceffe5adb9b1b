// SPDX-License-Identifier: MIT OR Apache-2.0

//! Remote collaborators of the sync pipeline: the GitHub API and the summarizer.

pub mod github;
pub mod retry;
pub mod summarizer;

pub use github::{GithubClient, StarItem, StarSource};
pub use retry::{RemoteFailure, RetryPolicy};
pub use summarizer::{ChatSummarizer, Summarizer};
