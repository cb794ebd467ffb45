//! Merge conflicts and their resolutions.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::artifacts::core::{ActorId, ConflictId};
use crate::artifacts::objects::object_id::ObjectId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    /// Both sides edited overlapping lines of a text file.
    Content,
    /// Both sides changed a binary file; there is nothing to merge line-wise.
    Binary,
    /// One side deleted what the other modified.
    DeleteModify,
    /// Both sides renamed the same file to different paths.
    Rename,
    /// The two heads share no history at all.
    History,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictState {
    Unresolved,
    Resolved,
}

/// One conflicted path in a merge plan.
///
/// `auto_resolvable` conflicts carry a prefilled `resolved_content` computed
/// by the hunk merge, but stay `Unresolved` until a caller accepts them; the
/// engine never commits content nobody has seen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeConflict {
    pub id: ConflictId,
    pub path: String,
    pub conflict_type: ConflictType,
    pub base_blob: Option<ObjectId>,
    pub source_blob: Option<ObjectId>,
    pub target_blob: Option<ObjectId>,
    pub state: ConflictState,
    pub auto_resolvable: bool,
    #[serde(skip)]
    pub resolved_content: Option<Bytes>,
    pub resolved_by: Option<ActorId>,
    /// For rename conflicts: where each side put the file.
    pub source_path: Option<String>,
    pub target_path: Option<String>,
}

impl MergeConflict {
    pub fn is_resolved(&self) -> bool {
        self.state == ConflictState::Resolved
    }

    /// The path a resolution must name: the source side's path for renames,
    /// the conflicted path otherwise.
    pub fn resolution_path(&self) -> &str {
        self.source_path.as_deref().unwrap_or(&self.path)
    }
}

/// Caller-supplied resolution for one conflicted path. `content: None` keeps
/// the file deleted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub path: String,
    pub content: Option<Bytes>,
}
