//! Best common ancestor search over the commit DAG.
//!
//! The merge base of two heads is any common ancestor that is not itself an
//! ancestor of another common ancestor. The search runs in two phases:
//!
//! 1. A bidirectional traversal walks both histories newest-first (priority
//!    queue keyed by timestamp), tagging each commit with the side(s) it was
//!    reached from. A commit reached from both sides is a common ancestor, and
//!    everything it can reach is marked stale to prune the walk.
//! 2. Common ancestors that are reachable from another common ancestor are
//!    filtered out as redundant; one of the survivors is returned.
//!
//! Criss-cross histories can leave several survivors. Those merges are rare
//! enough here that picking one deterministically is acceptable, so the finder
//! returns whichever survivor comes first.

use bitflags::bitflags;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::fmt;

use crate::artifacts::core::CancelToken;
use crate::artifacts::objects::commit::SlimCommit;
use crate::artifacts::objects::object_id::ObjectId;
use crate::errors::{CoreError, Result};

bitflags! {
    #[derive(Clone, Copy, PartialEq, Eq, Hash)]
    struct VisitState: u8 {
        const NONE = 0b00;
        const VISITED_FROM_SOURCE = 0b01;
        const VISITED_FROM_TARGET = 0b10;
        const VISITED_FROM_BOTH =
            Self::VISITED_FROM_SOURCE.bits() | Self::VISITED_FROM_TARGET.bits();
        const STALE = 0b100;
        const RESULT = 0b1000;
    }
}

impl fmt::Debug for VisitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut flags = Vec::new();
        if self.contains(VisitState::VISITED_FROM_SOURCE) {
            flags.push("SOURCE");
        }
        if self.contains(VisitState::VISITED_FROM_TARGET) {
            flags.push("TARGET");
        }
        if self.contains(VisitState::STALE) {
            flags.push("STALE");
        }
        if self.contains(VisitState::RESULT) {
            flags.push("RESULT");
        }
        if flags.is_empty() {
            write!(f, "NONE")
        } else {
            write!(f, "{}", flags.join("|"))
        }
    }
}

/// Finds the merge base of two commits, loading commit data through a caller
/// supplied closure so the search works against any commit source.
pub struct BaseFinder<Loader>
where
    Loader: Fn(&ObjectId) -> Option<SlimCommit>,
{
    commit_loader: Loader,
}

impl<Loader> BaseFinder<Loader>
where
    Loader: Fn(&ObjectId) -> Option<SlimCommit>,
{
    pub fn new(commit_loader: Loader) -> Self {
        Self { commit_loader }
    }

    fn load(&self, commit_id: &ObjectId) -> Result<SlimCommit> {
        (self.commit_loader)(commit_id).ok_or_else(|| {
            CoreError::integrity(anyhow::anyhow!(
                "commit {commit_id} referenced but not present in the graph"
            ))
        })
    }

    fn find_common_ancestors(
        &self,
        source_commit_id: &ObjectId,
        target_commit_ids: HashSet<&ObjectId>,
        cancel: &CancelToken,
    ) -> Result<HashMap<ObjectId, VisitState>> {
        if target_commit_ids.contains(source_commit_id) {
            return Ok(HashMap::from([(
                source_commit_id.clone(),
                VisitState::RESULT,
            )]));
        }

        let mut ancestors_states = HashMap::<ObjectId, VisitState>::new();
        let mut priority_queue = BinaryHeap::new();

        let source_commit = self.load(source_commit_id)?;
        ancestors_states.insert(source_commit_id.clone(), VisitState::VISITED_FROM_SOURCE);
        priority_queue.push((source_commit.timestamp, source_commit.id));

        for &target_commit_id in target_commit_ids.iter() {
            ancestors_states.insert(target_commit_id.clone(), VisitState::VISITED_FROM_TARGET);

            let target_commit = self.load(target_commit_id)?;
            priority_queue.push((target_commit.timestamp, target_commit.id));
        }

        // Newest first: a commit is only popped once everything that could
        // still reach it has propagated its visit state.
        while let Some((_, commit_id)) = priority_queue.pop() {
            cancel.check()?;

            let current_state = ancestors_states
                .get(&commit_id)
                .copied()
                .unwrap_or(VisitState::NONE);

            if current_state.contains(VisitState::STALE) {
                continue;
            }

            let is_common_ancestor = if current_state.contains(VisitState::VISITED_FROM_BOTH) {
                ancestors_states
                    .entry(commit_id.clone())
                    .and_modify(|state| *state |= VisitState::RESULT);
                true
            } else {
                false
            };

            let current_commit = self.load(&commit_id)?;

            for parent_id in &current_commit.parents {
                let parent_commit = self.load(parent_id)?;
                let parent_state = ancestors_states
                    .get(parent_id)
                    .copied()
                    .unwrap_or(VisitState::NONE);

                let mut new_state = parent_state | current_state;
                if is_common_ancestor {
                    new_state |= VisitState::STALE;
                }

                if !parent_state.contains(current_state) {
                    ancestors_states.insert(parent_id.clone(), new_state);
                    priority_queue.push((parent_commit.timestamp, parent_commit.id));
                }
            }
        }

        Ok(ancestors_states
            .into_iter()
            .filter(|(_, state)| {
                !state.contains(VisitState::STALE) && state.contains(VisitState::RESULT)
            })
            .collect())
    }

    /// The merge base of `source` and `target`, or `None` when their
    /// histories share no commit at all.
    pub fn find_best_common_ancestor(
        &self,
        source_commit_id: &ObjectId,
        target_commit_id: &ObjectId,
        cancel: &CancelToken,
    ) -> Result<Option<ObjectId>> {
        let target_commit_ids = HashSet::from([target_commit_id]);
        let common_ancestors = self
            .find_common_ancestors(source_commit_id, target_commit_ids, cancel)?
            .into_keys()
            .collect::<HashSet<_>>();

        if common_ancestors.is_empty() {
            return Ok(None);
        }

        let mut redundant_ancestors = HashSet::<ObjectId>::new();
        for commit in &common_ancestors {
            cancel.check()?;

            if redundant_ancestors.contains(commit) {
                continue;
            }

            let others = common_ancestors
                .iter()
                .filter(|other| *other != commit && !redundant_ancestors.contains(*other))
                .collect::<HashSet<_>>();
            let common_states = self.find_common_ancestors(commit, others.clone(), cancel)?;

            // Reachable from another candidate means redundant, in either
            // direction.
            if common_states
                .get(commit)
                .unwrap_or(&VisitState::NONE)
                .contains(VisitState::VISITED_FROM_TARGET)
            {
                redundant_ancestors.insert(commit.clone());
            }

            for other in others {
                if common_states
                    .get(other)
                    .unwrap_or(&VisitState::NONE)
                    .contains(VisitState::VISITED_FROM_SOURCE)
                {
                    redundant_ancestors.insert(other.clone());
                }
            }
        }

        let mut best_common_ancestors = common_ancestors
            .into_iter()
            .filter(|commit| !redundant_ancestors.contains(commit))
            .collect::<Vec<_>>();
        best_common_ancestors.sort();

        Ok(best_common_ancestors.into_iter().next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, FixedOffset, TimeZone};
    use pretty_assertions::assert_eq;
    use rstest::*;

    #[derive(Debug, Default)]
    struct TestGraph {
        commits: HashMap<ObjectId, SlimCommit>,
    }

    impl TestGraph {
        fn add(&mut self, id: &ObjectId, parents: Vec<ObjectId>) {
            // Incrementing timestamps keep the traversal order deterministic.
            let timestamp = ts(self.commits.len() as i64);
            self.commits.insert(
                id.clone(),
                SlimCommit {
                    id: id.clone(),
                    parents,
                    timestamp,
                },
            );
        }

        fn loader(&self) -> impl Fn(&ObjectId) -> Option<SlimCommit> + '_ {
            |id| self.commits.get(id).cloned()
        }
    }

    fn ts(offset: i64) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(0)
            .unwrap()
            .timestamp_opt(1_700_000_000 + offset * 3600, 0)
            .unwrap()
    }

    fn oid(name: &str) -> ObjectId {
        ObjectId::hash("commit", name.as_bytes())
    }

    fn base_of(graph: &TestGraph, a: &str, b: &str) -> Option<ObjectId> {
        BaseFinder::new(graph.loader())
            .find_best_common_ancestor(&oid(a), &oid(b), &CancelToken::new())
            .unwrap()
    }

    #[fixture]
    fn linear() -> TestGraph {
        // a <- b <- c <- d
        let mut graph = TestGraph::default();
        graph.add(&oid("a"), vec![]);
        graph.add(&oid("b"), vec![oid("a")]);
        graph.add(&oid("c"), vec![oid("b")]);
        graph.add(&oid("d"), vec![oid("c")]);
        graph
    }

    #[fixture]
    fn forked() -> TestGraph {
        //     a
        //    / \
        //   b   c
        let mut graph = TestGraph::default();
        graph.add(&oid("a"), vec![]);
        graph.add(&oid("b"), vec![oid("a")]);
        graph.add(&oid("c"), vec![oid("a")]);
        graph
    }

    #[rstest]
    fn linear_history_base_is_the_older_commit(linear: TestGraph) {
        assert_eq!(base_of(&linear, "b", "d"), Some(oid("b")));
        assert_eq!(base_of(&linear, "d", "b"), Some(oid("b")));
        assert_eq!(base_of(&linear, "c", "c"), Some(oid("c")));
    }

    #[rstest]
    fn forked_history_base_is_the_fork_point(forked: TestGraph) {
        assert_eq!(base_of(&forked, "b", "c"), Some(oid("a")));
    }

    #[rstest]
    fn disconnected_histories_have_no_base() {
        let mut graph = TestGraph::default();
        graph.add(&oid("a"), vec![]);
        graph.add(&oid("b"), vec![oid("a")]);
        graph.add(&oid("x"), vec![]);
        graph.add(&oid("y"), vec![oid("x")]);

        assert_eq!(base_of(&graph, "b", "y"), None);
    }

    #[rstest]
    fn merge_commits_do_not_confuse_the_base() {
        //     a
        //    / \
        //   b   c
        //    \ /
        //     d (merge)
        //     |
        //     e
        let mut graph = TestGraph::default();
        graph.add(&oid("a"), vec![]);
        graph.add(&oid("b"), vec![oid("a")]);
        graph.add(&oid("c"), vec![oid("a")]);
        graph.add(&oid("d"), vec![oid("b"), oid("c")]);
        graph.add(&oid("e"), vec![oid("d")]);

        assert_eq!(base_of(&graph, "e", "b"), Some(oid("b")));
        assert_eq!(base_of(&graph, "e", "c"), Some(oid("c")));
    }

    #[rstest]
    fn criss_cross_yields_one_of_the_tied_bases() {
        //     a
        //    / \
        //   b   c
        //   |\ /|
        //   | X |
        //   |/ \|
        //   d   e
        //   |   |
        //   f   g
        let mut graph = TestGraph::default();
        graph.add(&oid("a"), vec![]);
        graph.add(&oid("b"), vec![oid("a")]);
        graph.add(&oid("c"), vec![oid("a")]);
        graph.add(&oid("d"), vec![oid("b"), oid("c")]);
        graph.add(&oid("e"), vec![oid("c"), oid("b")]);
        graph.add(&oid("f"), vec![oid("d")]);
        graph.add(&oid("g"), vec![oid("e")]);

        let base = base_of(&graph, "f", "g").unwrap();
        assert!(base == oid("b") || base == oid("c"), "got {base}");
    }

    #[rstest]
    fn cancelled_search_stops_with_cancelled(linear: TestGraph) {
        let cancel = CancelToken::new();
        cancel.cancel();

        let result = BaseFinder::new(linear.loader()).find_best_common_ancestor(
            &oid("b"),
            &oid("d"),
            &cancel,
        );
        assert!(matches!(result, Err(CoreError::Cancelled)));
    }

    #[rstest]
    fn missing_parent_is_an_integrity_error() {
        let mut graph = TestGraph::default();
        graph.add(&oid("a"), vec![oid("ghost")]);
        graph.add(&oid("b"), vec![oid("a")]);

        let result = BaseFinder::new(graph.loader()).find_best_common_ancestor(
            &oid("a"),
            &oid("b"),
            &CancelToken::new(),
        );
        assert!(matches!(result, Err(CoreError::Integrity(_))));
    }
}
