// SPDX-License-Identifier: MIT OR Apache-2.0

//! Vector index construction

pub mod index;

pub use index::{BuildOutcome, IndexBuilder};
