//! Commit records.
//!
//! Commits are immutable once created and content-addressed: the id is the
//! hash of the serialized record, so two commits with identical trees,
//! parents, author, timestamp and message are the same commit. The DAG they
//! form is append-only — no deletion, no rewriting.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

use crate::artifacts::core::{ActorId, BranchId, ProjectId};
use crate::artifacts::objects::object_id::ObjectId;

/// Aggregate change counts against the first parent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitStats {
    pub files_changed: usize,
    pub lines_added: usize,
    pub lines_removed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    id: ObjectId,
    project_id: ProjectId,
    branch_id: BranchId,
    author: ActorId,
    message: String,
    timestamp: DateTime<FixedOffset>,
    parents: Vec<ObjectId>,
    tree_id: ObjectId,
    stats: CommitStats,
}

impl Commit {
    /// Create a commit; `parents` is empty only for a project's root commit,
    /// has one element for a normal commit and two or more for a merge.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        project_id: ProjectId,
        branch_id: BranchId,
        author: ActorId,
        message: String,
        timestamp: DateTime<FixedOffset>,
        parents: Vec<ObjectId>,
        tree_id: ObjectId,
        stats: CommitStats,
    ) -> Self {
        let id = Self::compute_id(&tree_id, &parents, &author, timestamp, &message);

        Commit {
            id,
            project_id,
            branch_id,
            author,
            message,
            timestamp,
            parents,
            tree_id,
            stats,
        }
    }

    fn compute_id(
        tree_id: &ObjectId,
        parents: &[ObjectId],
        author: &ActorId,
        timestamp: DateTime<FixedOffset>,
        message: &str,
    ) -> ObjectId {
        let mut content = Vec::new();
        content.push(format!("tree {}", tree_id.as_ref()));
        for parent in parents {
            content.push(format!("parent {}", parent.as_ref()));
        }
        content.push(format!(
            "author {} {} {}",
            author,
            timestamp.timestamp(),
            timestamp.format("%z")
        ));
        content.push(String::new());
        content.push(message.to_string());

        ObjectId::hash("commit", content.join("\n").as_bytes())
    }

    pub fn id(&self) -> &ObjectId {
        &self.id
    }

    pub fn project_id(&self) -> ProjectId {
        self.project_id
    }

    pub fn branch_id(&self) -> BranchId {
        self.branch_id
    }

    pub fn author(&self) -> &ActorId {
        &self.author
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// First line of the message, for one-line listings.
    pub fn short_message(&self) -> &str {
        self.message.lines().next().unwrap_or("")
    }

    pub fn timestamp(&self) -> DateTime<FixedOffset> {
        self.timestamp
    }

    pub fn parents(&self) -> &[ObjectId] {
        &self.parents
    }

    pub fn tree_id(&self) -> &ObjectId {
        &self.tree_id
    }

    pub fn stats(&self) -> &CommitStats {
        &self.stats
    }

    pub fn is_root(&self) -> bool {
        self.parents.is_empty()
    }

    pub fn is_merge(&self) -> bool {
        self.parents.len() >= 2
    }

    pub fn slim(&self) -> SlimCommit {
        SlimCommit {
            id: self.id.clone(),
            parents: self.parents.clone(),
            timestamp: self.timestamp,
        }
    }
}

/// Just enough of a commit for graph traversal: id, parents, timestamp.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct SlimCommit {
    pub id: ObjectId,
    pub parents: Vec<ObjectId>,
    pub timestamp: DateTime<FixedOffset>,
}

impl PartialOrd for SlimCommit {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SlimCommit {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.timestamp.cmp(&other.timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn fixed_time(offset: i64) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(0)
            .unwrap()
            .timestamp_opt(1_700_000_000 + offset, 0)
            .unwrap()
    }

    fn commit(message: &str, parents: Vec<ObjectId>, at: i64) -> Commit {
        Commit::new(
            ProjectId(1),
            BranchId(1),
            ActorId::new("eng-1"),
            message.to_string(),
            fixed_time(at),
            parents,
            ObjectId::hash("tree", b""),
            CommitStats::default(),
        )
    }

    #[test]
    fn id_is_content_addressed() {
        let a = commit("add enclosure", vec![], 0);
        let b = commit("add enclosure", vec![], 0);
        let c = commit("add enclosure", vec![], 60);

        assert_eq!(a.id(), b.id());
        assert_ne!(a.id(), c.id());
    }

    #[test]
    fn parent_count_classifies_the_commit() {
        let root = commit("root", vec![], 0);
        assert!(root.is_root());
        assert!(!root.is_merge());

        let merge = commit(
            "merge",
            vec![root.id().clone(), ObjectId::hash("commit", b"other")],
            120,
        );
        assert!(merge.is_merge());
    }

    #[test]
    fn short_message_is_the_first_line() {
        let c = commit("rev A\n\ndetails of the revision", vec![], 0);
        assert_eq!(c.short_message(), "rev A");
    }
}
