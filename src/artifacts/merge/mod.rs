//! Three-way merge: planning, conflict resolution and execution.
//!
//! Merging is two-phase. `plan_merge` computes a [`engine::MergePlan`]
//! against the branch heads it observed; `execute` replays that plan only if
//! the heads are still where the plan saw them, so a concurrent head move
//! surfaces as a stale-head conflict instead of a silently wrong merge.

pub mod conflict;
pub mod engine;

pub use conflict::{ConflictState, ConflictType, MergeConflict, Resolution};
pub use engine::{MergeContext, MergeEngine, MergeMethod, MergePlan};
