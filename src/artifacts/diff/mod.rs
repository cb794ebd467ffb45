//! Change computation.
//!
//! - `line_diff`: Myers shortest-edit diff over lines, hunk extraction and
//!   the three-way text merge built on top of it
//! - `tree_diff`: tree-to-tree change tracking with rename/move detection

pub mod line_diff;
pub mod tree_diff;

pub use line_diff::{merge_three_way, Edit, Hunk, MyersDiff, ThreeWayOutcome};
pub use tree_diff::{ChangeTracker, ChangeType, ConflictStatus, DiffFilter, FileChange};
