//! The append-only commit DAG of one project.
//!
//! Commits are immutable and inserts are the only mutation, so the graph can
//! hand out clones freely and answer ancestry questions from a read lock.
//! Every parent must already be present when a commit is inserted, which keeps
//! the arena closed under parent lookup.

use parking_lot::RwLock;
use std::collections::{HashMap, HashSet, VecDeque};

use crate::artifacts::core::CancelToken;
use crate::artifacts::graph::base_finder::BaseFinder;
use crate::artifacts::objects::commit::{Commit, SlimCommit};
use crate::artifacts::objects::object_id::ObjectId;
use crate::errors::{CoreError, Result};

#[derive(Debug, Default)]
struct GraphInner {
    arena: Vec<Commit>,
    index: HashMap<ObjectId, usize>,
    root: Option<ObjectId>,
}

#[derive(Debug, Default)]
pub struct CommitGraph {
    inner: RwLock<GraphInner>,
}

impl CommitGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a commit. Inserting an id that is already present is a noop
    /// (content addressing guarantees it is the same commit). All parents must
    /// already be in the graph, and only one root commit is ever accepted.
    pub fn insert(&self, commit: Commit) -> Result<()> {
        let mut inner = self.inner.write();

        if inner.index.contains_key(commit.id()) {
            return Ok(());
        }

        for parent in commit.parents() {
            if !inner.index.contains_key(parent) {
                return Err(CoreError::not_found("commit", parent));
            }
        }
        if commit.is_root() && inner.root.is_some() {
            return Err(CoreError::validation(
                "project already has a root commit",
            ));
        }

        if commit.is_root() {
            inner.root = Some(commit.id().clone());
        }
        let slot = inner.arena.len();
        inner.index.insert(commit.id().clone(), slot);
        inner.arena.push(commit);
        Ok(())
    }

    pub fn get(&self, id: &ObjectId) -> Result<Commit> {
        self.try_get(id)
            .ok_or_else(|| CoreError::not_found("commit", id))
    }

    pub fn try_get(&self, id: &ObjectId) -> Option<Commit> {
        let inner = self.inner.read();
        inner.index.get(id).map(|&slot| inner.arena[slot].clone())
    }

    pub fn slim(&self, id: &ObjectId) -> Option<SlimCommit> {
        let inner = self.inner.read();
        inner.index.get(id).map(|&slot| inner.arena[slot].slim())
    }

    pub fn contains(&self, id: &ObjectId) -> bool {
        self.inner.read().index.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.inner.read().arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().arena.is_empty()
    }

    pub fn root(&self) -> Option<ObjectId> {
        self.inner.read().root.clone()
    }

    /// `true` when `ancestor` is reachable from `descendant` (a commit is its
    /// own ancestor).
    pub fn is_ancestor(&self, ancestor: &ObjectId, descendant: &ObjectId) -> bool {
        if ancestor == descendant {
            return true;
        }

        let inner = self.inner.read();
        let mut visited = HashSet::new();
        let mut queue = VecDeque::from([descendant.clone()]);

        while let Some(current) = queue.pop_front() {
            if !visited.insert(current.clone()) {
                continue;
            }
            if &current == ancestor {
                return true;
            }
            if let Some(&slot) = inner.index.get(&current) {
                queue.extend(inner.arena[slot].parents().iter().cloned());
            }
        }

        false
    }

    /// Lazy depth-first walk over the ancestors of `start`, parents before
    /// grandparents and no commit yielded twice. `start` itself is not
    /// yielded. The walk takes the graph lock per step, so it stays valid
    /// across concurrent inserts; build a fresh one to restart.
    pub fn ancestors(&self, start: &ObjectId) -> Ancestors<'_> {
        let stack = self
            .slim(start)
            .map(|slim| slim.parents.into_iter().rev().collect())
            .unwrap_or_default();
        Ancestors {
            graph: self,
            stack,
            seen: HashSet::new(),
        }
    }

    /// Full history reachable from `head`, newest first.
    pub fn history(&self, head: &ObjectId) -> Result<Vec<Commit>> {
        let mut commits = vec![self.get(head)?];
        for id in self.ancestors(head) {
            commits.push(self.get(&id)?);
        }

        commits.sort_by(|a, b| b.timestamp().cmp(&a.timestamp()));
        Ok(commits)
    }

    /// Commits reachable from `head` but not from `base`, newest first. With
    /// no base the whole history of `head` is returned.
    pub fn commits_between(&self, base: Option<&ObjectId>, head: &ObjectId) -> Result<Vec<Commit>> {
        let mut commits = self.history(head)?;

        if let Some(base) = base {
            let excluded: HashSet<ObjectId> = self
                .history(base)?
                .into_iter()
                .map(|commit| commit.id().clone())
                .collect();
            commits.retain(|commit| !excluded.contains(commit.id()));
        }

        Ok(commits)
    }

    /// The merge base of two commits, or `None` for disconnected histories.
    pub fn merge_base(
        &self,
        a: &ObjectId,
        b: &ObjectId,
        cancel: &CancelToken,
    ) -> Result<Option<ObjectId>> {
        self.get(a)?;
        self.get(b)?;

        // Snapshot the slim view so the search never holds the graph lock.
        let slims: HashMap<ObjectId, SlimCommit> = {
            let inner = self.inner.read();
            inner
                .arena
                .iter()
                .map(|commit| (commit.id().clone(), commit.slim()))
                .collect()
        };

        BaseFinder::new(|id: &ObjectId| slims.get(id).cloned())
            .find_best_common_ancestor(a, b, cancel)
    }
}

/// See [`CommitGraph::ancestors`]. First parents are explored before later
/// ones, so a linear history comes out newest first.
pub struct Ancestors<'g> {
    graph: &'g CommitGraph,
    stack: Vec<ObjectId>,
    seen: HashSet<ObjectId>,
}

impl Iterator for Ancestors<'_> {
    type Item = ObjectId;

    fn next(&mut self) -> Option<ObjectId> {
        while let Some(id) = self.stack.pop() {
            if !self.seen.insert(id.clone()) {
                continue;
            }
            if let Some(slim) = self.graph.slim(&id) {
                self.stack.extend(slim.parents.into_iter().rev());
            }
            return Some(id);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::core::{ActorId, BranchId, ProjectId};
    use crate::artifacts::objects::commit::CommitStats;
    use chrono::{FixedOffset, TimeZone};
    use pretty_assertions::assert_eq;
    use rstest::*;

    fn commit(message: &str, parents: Vec<ObjectId>, at: i64) -> Commit {
        let timestamp = FixedOffset::east_opt(0)
            .unwrap()
            .timestamp_opt(1_700_000_000 + at * 60, 0)
            .unwrap();
        Commit::new(
            ProjectId(1),
            BranchId(1),
            ActorId::new("eng-1"),
            message.to_string(),
            timestamp,
            parents,
            ObjectId::hash("tree", message.as_bytes()),
            CommitStats::default(),
        )
    }

    /// root <- a <- b, with c branching off a.
    #[fixture]
    fn small_graph() -> (CommitGraph, Commit, Commit, Commit, Commit) {
        let graph = CommitGraph::new();
        let root = commit("root", vec![], 0);
        let a = commit("a", vec![root.id().clone()], 1);
        let b = commit("b", vec![a.id().clone()], 2);
        let c = commit("c", vec![a.id().clone()], 3);

        for node in [&root, &a, &b, &c] {
            graph.insert(node.clone()).unwrap();
        }
        (graph, root, a, b, c)
    }

    #[rstest]
    fn insert_is_idempotent_for_the_same_commit(small_graph: (CommitGraph, Commit, Commit, Commit, Commit)) {
        let (graph, root, ..) = small_graph;
        let before = graph.len();
        graph.insert(root.clone()).unwrap();
        assert_eq!(graph.len(), before);
    }

    #[rstest]
    fn insert_rejects_unknown_parents() {
        let graph = CommitGraph::new();
        let orphan = commit("orphan", vec![ObjectId::hash("commit", b"ghost")], 0);
        assert!(matches!(
            graph.insert(orphan),
            Err(CoreError::NotFound { kind: "commit", .. })
        ));
    }

    #[rstest]
    fn only_one_root_is_accepted(small_graph: (CommitGraph, Commit, Commit, Commit, Commit)) {
        let (graph, ..) = small_graph;
        let second_root = commit("another root", vec![], 10);
        assert!(matches!(
            graph.insert(second_root),
            Err(CoreError::Validation(_))
        ));
    }

    #[rstest]
    fn ancestry_follows_parent_edges(small_graph: (CommitGraph, Commit, Commit, Commit, Commit)) {
        let (graph, root, a, b, c) = small_graph;

        assert!(graph.is_ancestor(root.id(), b.id()));
        assert!(graph.is_ancestor(a.id(), c.id()));
        assert!(graph.is_ancestor(b.id(), b.id()));
        assert!(!graph.is_ancestor(b.id(), c.id()));
    }

    #[rstest]
    fn ancestors_walk_first_parents_first_without_repeats(
        small_graph: (CommitGraph, Commit, Commit, Commit, Commit),
    ) {
        let (graph, root, a, b, c) = small_graph;
        let merge = commit("merge", vec![b.id().clone(), c.id().clone()], 4);
        graph.insert(merge.clone()).unwrap();

        let walk: Vec<ObjectId> = graph.ancestors(merge.id()).collect();
        assert_eq!(
            walk,
            vec![
                b.id().clone(),
                a.id().clone(),
                root.id().clone(),
                c.id().clone()
            ]
        );

        // A fresh iterator restarts the walk from scratch.
        let again: Vec<ObjectId> = graph.ancestors(merge.id()).collect();
        assert_eq!(walk, again);

        assert_eq!(graph.ancestors(root.id()).count(), 0);
    }

    #[rstest]
    fn history_is_newest_first(small_graph: (CommitGraph, Commit, Commit, Commit, Commit)) {
        let (graph, root, a, b, _) = small_graph;
        let history = graph.history(b.id()).unwrap();

        let ids: Vec<_> = history.iter().map(Commit::id).collect();
        assert_eq!(ids, vec![b.id(), a.id(), root.id()]);
    }

    #[rstest]
    fn commits_between_excludes_the_base_history(
        small_graph: (CommitGraph, Commit, Commit, Commit, Commit),
    ) {
        let (graph, _, a, _, c) = small_graph;
        let between = graph.commits_between(Some(a.id()), c.id()).unwrap();

        assert_eq!(between.len(), 1);
        assert_eq!(between[0].id(), c.id());
    }

    #[rstest]
    fn merge_base_of_two_branches_is_the_fork_point(
        small_graph: (CommitGraph, Commit, Commit, Commit, Commit),
    ) {
        let (graph, _, a, b, c) = small_graph;
        let base = graph
            .merge_base(b.id(), c.id(), &CancelToken::new())
            .unwrap();
        assert_eq!(base, Some(a.id().clone()));
    }
}
