//! Pull-request operations on a [`Repository`].
//!
//! Merging a pull request is the merge engine's two-phase flow wrapped in
//! review gating: the request carries a cached merge plan pinned to the heads
//! it saw, and `merge_pull_request` recomputes that plan when stale, collects
//! every blocking reason at once, and only then executes. Gates are read from
//! the target branch's protection rules at merge time, not at open time.

use chrono::Local;
use tracing::info;

use crate::areas::repository::Repository;
use crate::artifacts::branch::manager::Branch;
use crate::artifacts::core::{ActorId, CancelToken};
use crate::artifacts::branch::ref_name::RefName;
use crate::artifacts::merge::conflict::Resolution;
use crate::artifacts::merge::engine::{MergeMethod, MergePlan};
use crate::artifacts::objects::commit::Commit;
use crate::artifacts::pull_request::{
    MergeableStatus, PrStatus, PullRequest, ReviewDecision, ReviewState,
};
use crate::errors::{BlockReason, ConflictError, CoreError, Result};
use crate::events::CoreEvent;

/// Everything needed to open a pull request.
#[derive(Debug, Clone)]
pub struct OpenPullRequest {
    pub title: String,
    pub description: String,
    pub author: ActorId,
    pub source_branch: RefName,
    pub target_branch: RefName,
    pub draft: bool,
    pub reviewers: Vec<ActorId>,
}

impl Repository {
    pub fn open_pull_request(
        &self,
        request: OpenPullRequest,
        cancel: &CancelToken,
    ) -> Result<PullRequest> {
        if request.source_branch == request.target_branch {
            return Err(CoreError::validation(
                "a pull request needs two distinct branches",
            ));
        }
        if request.reviewers.contains(&request.author) {
            return Err(CoreError::validation(
                "the author cannot review their own pull request",
            ));
        }

        let source = self.branches().get(&request.source_branch)?;
        self.branches().get(&request.target_branch)?;
        if source.head.is_none() {
            return Err(CoreError::validation(format!(
                "branch {} has no commits to merge",
                request.source_branch
            )));
        }

        let open_duplicate = self.pulls().list().into_iter().any(|pull| {
            !pull.status.is_terminal()
                && pull.source_branch == request.source_branch
                && pull.target_branch == request.target_branch
        });
        if open_duplicate {
            return Err(ConflictError::Duplicate {
                kind: "pull request",
                name: format!("{} -> {}", request.source_branch, request.target_branch),
            }
            .into());
        }

        let (id, number) = self.pulls().allocate();
        let now = Local::now().fixed_offset();
        let mut reviewers = request.reviewers;
        reviewers.dedup();

        self.pulls().insert(PullRequest {
            id,
            number,
            project_id: self.project_id(),
            title: request.title,
            description: request.description,
            author: request.author,
            source_branch: request.source_branch.clone(),
            target_branch: request.target_branch.clone(),
            status: if request.draft {
                PrStatus::Draft
            } else {
                PrStatus::Open
            },
            mergeable_status: MergeableStatus::Unknown,
            reviewers,
            reviews: Vec::new(),
            computed_against: None,
            plan: None,
            checks_passed: None,
            merge_commit: None,
            created_at: now,
            updated_at: now,
        });

        let pull = self.refresh_mergeability(number, cancel)?;
        info!(
            number,
            source = %request.source_branch,
            target = %request.target_branch,
            "pull request opened"
        );
        self.notify(CoreEvent::PullRequestOpened {
            project_id: self.project_id(),
            pull_request: id,
            number,
        });
        Ok(pull)
    }

    pub fn pull_request(&self, number: u64) -> Result<PullRequest> {
        self.pulls().get_by_number(number)
    }

    /// Commits the pull request would land on its target, newest first.
    pub fn pull_request_commits(
        &self,
        number: u64,
        cancel: &CancelToken,
    ) -> Result<Vec<Commit>> {
        let pull = self.pulls().get_by_number(number)?;
        let source_head = self
            .branches()
            .get(&pull.source_branch)?
            .head
            .ok_or_else(|| {
                CoreError::validation(format!(
                    "branch {} has no commits to merge",
                    pull.source_branch
                ))
            })?;
        let target_head = self.branches().get(&pull.target_branch)?.head;

        let base = match &target_head {
            Some(target) => self.graph().merge_base(&source_head, target, cancel)?,
            None => None,
        };
        self.graph().commits_between(base.as_ref(), &source_head)
    }

    pub fn mark_ready(&self, number: u64) -> Result<PullRequest> {
        self.pulls().update(number, |pull| {
            if pull.status != PrStatus::Draft {
                return Err(CoreError::validation(
                    "only draft pull requests can be marked ready",
                ));
            }
            pull.status = PrStatus::Open;
            Ok(pull.clone())
        })
    }

    pub fn add_reviewer(&self, number: u64, reviewer: ActorId) -> Result<PullRequest> {
        self.pulls().update(number, |pull| {
            if pull.status.is_terminal() {
                return Err(closed_pull(pull));
            }
            if reviewer == pull.author {
                return Err(CoreError::validation(
                    "the author cannot review their own pull request",
                ));
            }
            if !pull.reviewers.contains(&reviewer) {
                pull.reviewers.push(reviewer);
            }
            Ok(pull.clone())
        })
    }

    /// Record a review verdict, pinned to the source head under review.
    pub fn submit_review(
        &self,
        number: u64,
        reviewer: &ActorId,
        state: ReviewState,
    ) -> Result<PullRequest> {
        if state == ReviewState::Pending {
            return Err(CoreError::validation(
                "pending is not a submittable review state",
            ));
        }

        let pull = self.pulls().get_by_number(number)?;
        if pull.status.is_terminal() {
            return Err(closed_pull(&pull));
        }
        if reviewer == &pull.author {
            return Err(CoreError::validation(
                "the author cannot review their own pull request",
            ));
        }
        if !pull.reviewers.contains(reviewer) {
            return Err(ConflictError::ProtectionViolation {
                subject: format!("pull request #{number}"),
                rule: "not_a_reviewer",
            }
            .into());
        }

        let source_head = self
            .branches()
            .get(&pull.source_branch)?
            .head
            .ok_or_else(|| {
                CoreError::integrity(anyhow::anyhow!(
                    "pull request #{number} source branch lost its head"
                ))
            })?;

        self.pulls().update(number, |pull| {
            pull.reviews.push(ReviewDecision {
                reviewer: reviewer.clone(),
                state,
                decided_at: Local::now().fixed_offset(),
                source_head: source_head.clone(),
                dismissed: false,
            });
            Ok(pull.clone())
        })
    }

    /// Record the external status-check verdict.
    pub fn set_status_checks(&self, number: u64, passed: bool) -> Result<PullRequest> {
        self.pulls().update(number, |pull| {
            if pull.status.is_terminal() {
                return Err(closed_pull(pull));
            }
            pull.checks_passed = Some(passed);
            Ok(pull.clone())
        })
    }

    /// Recompute the cached mergeability verdict against the current heads.
    ///
    /// A plan whose heads are still current is kept, so conflict resolutions
    /// recorded against it survive the refresh.
    pub fn refresh_mergeability(&self, number: u64, cancel: &CancelToken) -> Result<PullRequest> {
        let pull = self.pulls().get_by_number(number)?;
        if pull.status.is_terminal() {
            return Ok(pull);
        }

        let source_head = self.branches().get(&pull.source_branch)?.head;
        let target_head = self.branches().get(&pull.target_branch)?.head;
        let current = source_head.zip(target_head);

        let plan = match pull.plan {
            Some(plan_id)
                if pull.computed_against.is_some() && pull.computed_against == current =>
            {
                self.engine().get_plan(plan_id)?
            }
            _ => {
                if let Some(stale_plan) = pull.plan {
                    self.engine().discard_plan(stale_plan);
                }
                self.engine().plan_merge(
                    &self.merge_ctx(),
                    &pull.source_branch,
                    &pull.target_branch,
                    cancel,
                )?
            }
        };

        let target = self.branches().get(&pull.target_branch)?;
        let dismiss_stale = target.is_protected && target.protection.dismiss_stale_reviews;

        self.pulls().update(number, |pull| {
            if dismiss_stale {
                for review in &mut pull.reviews {
                    if review.source_head != plan.source_head {
                        review.dismissed = true;
                    }
                }
            }

            let reasons = gate_reasons(pull, &plan, &target);
            pull.mergeable_status = if !plan.is_fully_resolved() {
                MergeableStatus::Dirty
            } else if reasons.is_empty() {
                MergeableStatus::Clean
            } else {
                MergeableStatus::Blocked
            };
            pull.computed_against = Some((plan.source_head.clone(), plan.target_head.clone()));
            pull.plan = Some(plan.id);
            Ok(pull.clone())
        })
    }

    /// Resolve conflicts on the request's current merge plan.
    pub fn resolve_pull_request_conflicts(
        &self,
        number: u64,
        resolutions: &[Resolution],
        actor: &ActorId,
        cancel: &CancelToken,
    ) -> Result<PullRequest> {
        let pull = self.refresh_mergeability(number, cancel)?;
        let plan_id = pull.plan.ok_or_else(|| {
            CoreError::integrity(anyhow::anyhow!(
                "refreshed pull request #{number} has no merge plan"
            ))
        })?;

        self.engine().resolve_conflicts(plan_id, resolutions, actor)?;
        self.refresh_mergeability(number, cancel)
    }

    /// Merge an open pull request, collecting every blocking reason at once.
    pub fn merge_pull_request(
        &self,
        number: u64,
        actor: &ActorId,
        method: MergeMethod,
        message: Option<&str>,
        cancel: &CancelToken,
    ) -> Result<PullRequest> {
        let pull = self.pulls().get_by_number(number)?;
        match pull.status {
            PrStatus::Draft => return Err(blocked(BlockReason::Draft)),
            PrStatus::Closed => return Err(blocked(BlockReason::Closed)),
            PrStatus::Merged => return Err(blocked(BlockReason::AlreadyMerged)),
            PrStatus::Open => {}
        }

        let pull = self.refresh_mergeability(number, cancel)?;
        let plan_id = pull.plan.ok_or_else(|| {
            CoreError::integrity(anyhow::anyhow!(
                "refreshed pull request #{number} has no merge plan"
            ))
        })?;
        let plan = self.engine().get_plan(plan_id)?;
        let target = self.branches().get(&pull.target_branch)?;

        let mut reasons = gate_reasons(&pull, &plan, &target);
        if !plan.is_fully_resolved() {
            reasons.insert(0, BlockReason::NotMergeable);
        }
        if !reasons.is_empty() {
            return Err(ConflictError::MergeBlocked { reasons }.into());
        }

        let default_message = format!(
            "Merge pull request #{number} from {}",
            pull.source_branch
        );
        let merge_commit = self.engine().execute(
            &self.merge_ctx(),
            plan_id,
            actor,
            Some(message.unwrap_or(&default_message)),
            method,
            true,
            cancel,
        )?;

        self.branches().mark_merged(&pull.source_branch)?;
        let updated = self.pulls().update(number, |pull| {
            pull.status = PrStatus::Merged;
            pull.merge_commit = Some(merge_commit.id().clone());
            pull.mergeable_status = MergeableStatus::Clean;
            Ok(pull.clone())
        })?;

        info!(
            number,
            merge_commit = %merge_commit.id().to_short(),
            ?method,
            "pull request merged"
        );
        self.notify(CoreEvent::MergeExecuted {
            project_id: self.project_id(),
            target_branch: target.id,
            merge_commit: merge_commit.id().clone(),
        });
        self.notify(CoreEvent::PullRequestMerged {
            project_id: self.project_id(),
            pull_request: updated.id,
            merge_commit: merge_commit.id().clone(),
        });
        Ok(updated)
    }

    pub fn close_pull_request(&self, number: u64) -> Result<PullRequest> {
        let updated = self.pulls().update(number, |pull| {
            if pull.status.is_terminal() {
                return Err(closed_pull(pull));
            }
            pull.status = PrStatus::Closed;
            Ok(pull.clone())
        })?;

        if let Some(plan_id) = updated.plan {
            self.engine().discard_plan(plan_id);
        }
        self.notify(CoreEvent::PullRequestClosed {
            project_id: self.project_id(),
            pull_request: updated.id,
        });
        Ok(updated)
    }
}

/// Protection gates for merging `pull` under `target`'s rules. Conflict state
/// is the caller's to check; this only covers reviews, checks and freshness.
fn gate_reasons(pull: &PullRequest, plan: &MergePlan, target: &Branch) -> Vec<BlockReason> {
    let mut reasons = Vec::new();
    if !target.is_protected {
        return reasons;
    }
    let rules = &target.protection;

    if rules.require_reviews {
        let approved = pull
            .active_reviews()
            .iter()
            .filter(|review| {
                review.state == ReviewState::Approved
                    && (!rules.dismiss_stale_reviews || review.source_head == plan.source_head)
            })
            .count() as u32;
        if approved < rules.min_reviewers {
            reasons.push(BlockReason::InsufficientReviews {
                required: rules.min_reviewers,
                approved,
            });
        }
        for review in pull.active_reviews() {
            if review.state == ReviewState::ChangesRequested {
                reasons.push(BlockReason::ChangesRequested {
                    reviewer: review.reviewer.to_string(),
                });
            }
        }
    }
    if rules.require_status_checks && pull.checks_passed != Some(true) {
        reasons.push(BlockReason::StatusChecksMissing);
    }
    if rules.require_up_to_date && plan.base.as_ref() != Some(&plan.target_head) {
        reasons.push(BlockReason::OutOfDate);
    }
    reasons
}

fn blocked(reason: BlockReason) -> CoreError {
    ConflictError::MergeBlocked {
        reasons: vec![reason],
    }
    .into()
}

fn closed_pull(pull: &PullRequest) -> CoreError {
    CoreError::validation(format!(
        "pull request #{} is no longer open",
        pull.number
    ))
}
