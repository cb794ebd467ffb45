//! Commit DAG storage and ancestry queries.
//!
//! - `commit_graph`: the append-only per-project commit DAG with traversal,
//!   ancestry checks and history slicing
//! - `base_finder`: best-common-ancestor search used as the merge base for
//!   three-way merges

pub mod base_finder;
pub mod commit_graph;

pub use base_finder::BaseFinder;
pub use commit_graph::{Ancestors, CommitGraph};
