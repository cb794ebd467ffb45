//! Pull requests: records, review decisions and the backing store.
//!
//! A pull request's mergeability is a cached verdict, valid only for the
//! `(source_head, target_head)` pair it was computed against. Any head
//! movement on either branch drops the verdict back to `Unknown`; merging
//! recomputes before it gates.

pub mod workflow;

use chrono::{DateTime, FixedOffset, Local};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::artifacts::branch::ref_name::RefName;
use crate::artifacts::core::{ActorId, PlanId, ProjectId, PullRequestId};
use crate::artifacts::objects::object_id::ObjectId;
use crate::errors::{CoreError, Result};

pub use workflow::OpenPullRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrStatus {
    Draft,
    Open,
    Merged,
    Closed,
}

impl PrStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PrStatus::Merged | PrStatus::Closed)
    }
}

/// Cached mergeability verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeableStatus {
    /// No conflicts and no failing gates at the computed heads.
    Clean,
    /// The merge plan has conflicts.
    Dirty,
    /// Conflict-free, but a protection gate fails.
    Blocked,
    /// Not computed yet, or invalidated by a head move.
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewState {
    Pending,
    Approved,
    ChangesRequested,
    Commented,
}

/// One reviewer's latest verdict, pinned to the source head it reviewed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewDecision {
    pub reviewer: ActorId,
    pub state: ReviewState,
    pub decided_at: DateTime<FixedOffset>,
    pub source_head: ObjectId,
    pub dismissed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    pub id: PullRequestId,
    /// Human-facing per-project sequence number.
    pub number: u64,
    pub project_id: ProjectId,
    pub title: String,
    pub description: String,
    pub author: ActorId,
    pub source_branch: RefName,
    pub target_branch: RefName,
    pub status: PrStatus,
    pub mergeable_status: MergeableStatus,
    pub reviewers: Vec<ActorId>,
    pub reviews: Vec<ReviewDecision>,
    /// Heads the current verdict and plan were computed against.
    pub computed_against: Option<(ObjectId, ObjectId)>,
    #[serde(skip)]
    pub plan: Option<PlanId>,
    /// Recorded CI verdict, `None` until anything reports.
    pub checks_passed: Option<bool>,
    pub merge_commit: Option<ObjectId>,
    pub created_at: DateTime<FixedOffset>,
    pub updated_at: DateTime<FixedOffset>,
}

impl PullRequest {
    /// The latest non-dismissed decision per reviewer.
    pub fn active_reviews(&self) -> Vec<&ReviewDecision> {
        let mut latest: HashMap<&ActorId, &ReviewDecision> = HashMap::new();
        for review in &self.reviews {
            if !review.dismissed {
                latest.insert(&review.reviewer, review);
            }
        }
        let mut reviews: Vec<&ReviewDecision> = latest.into_values().collect();
        reviews.sort_by(|a, b| a.reviewer.cmp(&b.reviewer));
        reviews
    }

    pub fn approvals(&self) -> u32 {
        self.active_reviews()
            .iter()
            .filter(|review| review.state == ReviewState::Approved)
            .count() as u32
    }
}

/// All pull requests of one project, indexed by id and by number.
pub struct PullRequestStore {
    inner: RwLock<HashMap<PullRequestId, PullRequest>>,
    next_id: AtomicU64,
    next_number: AtomicU64,
}

impl PullRequestStore {
    pub fn new() -> Self {
        PullRequestStore {
            inner: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            next_number: AtomicU64::new(1),
        }
    }

    pub fn allocate(&self) -> (PullRequestId, u64) {
        (
            PullRequestId(self.next_id.fetch_add(1, Ordering::Relaxed)),
            self.next_number.fetch_add(1, Ordering::Relaxed),
        )
    }

    pub fn insert(&self, pull: PullRequest) {
        self.inner.write().insert(pull.id, pull);
    }

    pub fn get_by_number(&self, number: u64) -> Result<PullRequest> {
        self.inner
            .read()
            .values()
            .find(|pull| pull.number == number)
            .cloned()
            .ok_or_else(|| CoreError::not_found("pull request", number))
    }

    /// All pull requests, newest number first.
    pub fn list(&self) -> Vec<PullRequest> {
        let mut pulls: Vec<PullRequest> = self.inner.read().values().cloned().collect();
        pulls.sort_by(|a, b| b.number.cmp(&a.number));
        pulls
    }

    /// Mutate one record under the store lock.
    pub fn update<R>(
        &self,
        number: u64,
        mutate: impl FnOnce(&mut PullRequest) -> Result<R>,
    ) -> Result<R> {
        let mut inner = self.inner.write();
        let pull = inner
            .values_mut()
            .find(|pull| pull.number == number)
            .ok_or_else(|| CoreError::not_found("pull request", number))?;
        let result = mutate(pull)?;
        pull.updated_at = Local::now().fixed_offset();
        Ok(result)
    }

    /// Open pull requests touching `branch` on either side.
    pub fn open_for_branch(&self, branch: &RefName) -> Vec<u64> {
        self.inner
            .read()
            .values()
            .filter(|pull| {
                !pull.status.is_terminal()
                    && (&pull.source_branch == branch || &pull.target_branch == branch)
            })
            .map(|pull| pull.number)
            .collect()
    }

    /// Invalidate the cached verdict of every open pull request touching
    /// `branch`. A source-side move also voids the recorded status-check
    /// verdict, which only ever covered the old head. Called from the
    /// head-change hook.
    pub fn invalidate_for_branch(&self, branch: &RefName) {
        let mut inner = self.inner.write();
        for pull in inner.values_mut() {
            if pull.status.is_terminal() {
                continue;
            }
            if &pull.source_branch == branch {
                pull.mergeable_status = MergeableStatus::Unknown;
                pull.checks_passed = None;
            } else if &pull.target_branch == branch {
                pull.mergeable_status = MergeableStatus::Unknown;
            }
        }
    }
}

impl Default for PullRequestStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn decision(reviewer: &str, state: ReviewState, dismissed: bool) -> ReviewDecision {
        ReviewDecision {
            reviewer: ActorId::new(reviewer),
            state,
            decided_at: Local::now().fixed_offset(),
            source_head: ObjectId::hash("commit", reviewer.as_bytes()),
            dismissed,
        }
    }

    fn pull_with_reviews(reviews: Vec<ReviewDecision>) -> PullRequest {
        let now = Local::now().fixed_offset();
        PullRequest {
            id: PullRequestId(1),
            number: 1,
            project_id: ProjectId(1),
            title: "rev B".into(),
            description: String::new(),
            author: ActorId::new("eng-1"),
            source_branch: RefName::try_parse("rev-b").unwrap(),
            target_branch: RefName::try_parse("main").unwrap(),
            status: PrStatus::Open,
            mergeable_status: MergeableStatus::Unknown,
            reviewers: vec![],
            reviews,
            computed_against: None,
            plan: None,
            checks_passed: None,
            merge_commit: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn later_decisions_supersede_earlier_ones() {
        let pull = pull_with_reviews(vec![
            decision("lead", ReviewState::ChangesRequested, false),
            decision("lead", ReviewState::Approved, false),
            decision("peer", ReviewState::Commented, false),
        ]);

        assert_eq!(pull.active_reviews().len(), 2);
        assert_eq!(pull.approvals(), 1);
    }

    #[test]
    fn dismissed_decisions_do_not_count() {
        let pull = pull_with_reviews(vec![
            decision("lead", ReviewState::Approved, true),
            decision("peer", ReviewState::Approved, false),
        ]);

        assert_eq!(pull.approvals(), 1);
    }

    #[test]
    fn invalidation_targets_open_pulls_on_the_branch() {
        let store = PullRequestStore::new();
        let mut open = pull_with_reviews(vec![]);
        open.mergeable_status = MergeableStatus::Clean;
        open.checks_passed = Some(true);
        store.insert(open);

        let mut merged = pull_with_reviews(vec![]);
        merged.id = PullRequestId(2);
        merged.number = 2;
        merged.status = PrStatus::Merged;
        merged.mergeable_status = MergeableStatus::Clean;
        store.insert(merged);

        store.invalidate_for_branch(&RefName::try_parse("rev-b").unwrap());

        let invalidated = store.get_by_number(1).unwrap();
        assert_eq!(invalidated.mergeable_status, MergeableStatus::Unknown);
        assert_eq!(invalidated.checks_passed, None);
        assert_eq!(
            store.get_by_number(2).unwrap().mergeable_status,
            MergeableStatus::Clean
        );
    }
}
