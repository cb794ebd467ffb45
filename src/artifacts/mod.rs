//! Domain types and algorithms of the version-control core:
//!
//! - `core`: record ids, actors, cancellation
//! - `objects`: content-addressed blobs, tree snapshots, commits
//! - `graph`: the append-only commit DAG and merge-base finding
//! - `diff`: line diffs and tree-level change tracking
//! - `branch`: named heads, protection rules, compare-and-swap advancement
//! - `merge`: three-way merge planning, conflicts, execution
//! - `pull_request`: the review/merge state machine
//! - `tag`: immutable release pointers

pub mod branch;
pub mod core;
pub mod diff;
pub mod graph;
pub mod merge;
pub mod objects;
pub mod pull_request;
pub mod tag;
