//! Review gating end to end: open, review, gate, merge.

mod common;

use common::{actor, name, World};
use pretty_assertions::assert_eq;
use rivet::artifacts::branch::protection::BranchProtectionRules;
use rivet::artifacts::merge::engine::MergeMethod;
use rivet::artifacts::pull_request::{MergeableStatus, PrStatus, ReviewState};
use rivet::errors::{BlockReason, ConflictError, CoreError};
use rivet::events::CoreEvent;

fn merge(world: &World, number: u64) -> rivet::errors::Result<rivet::artifacts::pull_request::PullRequest> {
    world.repo.merge_pull_request(
        number,
        &actor("eng-1"),
        MergeMethod::Merge,
        None,
        &world.cancel,
    )
}

/// One approval of two required is not enough.
#[test]
fn two_reviewer_rule_blocks_a_single_approval() {
    let world = World::new();
    world.commit_on("main", &[("bom.csv", "R1,2\n")]);
    world.branch("feature", "main");
    world.commit_on("feature", &[("bom.csv", "R1,2\n"), ("motor.step", "solid\n")]);
    world
        .repo
        .branches()
        .set_protection(
            &name("main"),
            BranchProtectionRules {
                require_reviews: true,
                min_reviewers: 2,
                ..BranchProtectionRules::strict()
            },
        )
        .unwrap();

    let pull = world.open_pull("feature", "main", &["lead", "peer"]);
    world
        .repo
        .submit_review(pull.number, &actor("lead"), ReviewState::Approved)
        .unwrap();

    let err = merge(&world, pull.number).unwrap_err();
    assert!(matches!(
        err,
        CoreError::Conflict(ConflictError::MergeBlocked { ref reasons })
            if reasons == &[BlockReason::InsufficientReviews { required: 2, approved: 1 }]
    ));

    world
        .repo
        .submit_review(pull.number, &actor("peer"), ReviewState::Approved)
        .unwrap();
    let merged = merge(&world, pull.number).unwrap();
    assert_eq!(merged.status, PrStatus::Merged);
}

/// A commit after approval invalidates the approval when the target dismisses
/// stale reviews; re-approval unblocks.
#[test]
fn stale_approvals_must_be_renewed_after_new_commits() {
    let world = World::new();
    world.commit_on("main", &[("bom.csv", "R1,2\n")]);
    world.branch("feature", "main");
    world.commit_on("feature", &[("bom.csv", "R1,2\n"), ("fw/main.c", "int a;\n")]);
    world
        .repo
        .branches()
        .set_protection(&name("main"), BranchProtectionRules::strict())
        .unwrap();

    let pull = world.open_pull("feature", "main", &["lead"]);
    world
        .repo
        .submit_review(pull.number, &actor("lead"), ReviewState::Approved)
        .unwrap();

    world.commit_on(
        "feature",
        &[("bom.csv", "R1,2\n"), ("fw/main.c", "int a;\nint b;\n")],
    );

    let err = merge(&world, pull.number).unwrap_err();
    assert!(matches!(
        err,
        CoreError::Conflict(ConflictError::MergeBlocked { ref reasons })
            if reasons == &[BlockReason::InsufficientReviews { required: 1, approved: 0 }]
    ));

    // The stale decision is now recorded as dismissed.
    let refreshed = world.repo.pull_request(pull.number).unwrap();
    assert!(refreshed.reviews.iter().all(|review| review.dismissed));

    world
        .repo
        .submit_review(pull.number, &actor("lead"), ReviewState::Approved)
        .unwrap();
    let merged = merge(&world, pull.number).unwrap();
    assert_eq!(merged.status, PrStatus::Merged);
    assert_eq!(
        world.file_text(merged.merge_commit.as_ref().unwrap(), "fw/main.c"),
        "int a;\nint b;\n"
    );
}

#[test]
fn merged_pull_leaves_a_complete_event_trail() {
    let world = World::new();
    world.commit_on("main", &[("bom.csv", "R1,2\n")]);
    world.branch("feature", "main");
    world.commit_on("feature", &[("bom.csv", "R1,2\nR2,1\n")]);

    let pull = world.open_pull("feature", "main", &[]);
    let merged = merge(&world, pull.number).unwrap();

    let events = world.notifier.events();
    let opened_at = events
        .iter()
        .position(|event| matches!(event, CoreEvent::PullRequestOpened { number: 1, .. }))
        .unwrap();
    let merged_at = events
        .iter()
        .position(|event| matches!(
            event,
            CoreEvent::PullRequestMerged { merge_commit, .. }
                if Some(merge_commit) == merged.merge_commit.as_ref()
        ))
        .unwrap();
    assert!(opened_at < merged_at);
    assert!(events
        .iter()
        .any(|event| matches!(event, CoreEvent::MergeExecuted { .. })));
}

#[test]
fn pull_merge_satisfies_a_pull_request_only_branch() {
    let world = World::new();
    world.commit_on("main", &[("a.md", "one\n")]);
    world.branch("feature", "main");
    world.commit_on("feature", &[("a.md", "one\ntwo\n")]);
    world
        .repo
        .branches()
        .set_protection(
            &name("main"),
            BranchProtectionRules {
                require_pull_request: true,
                ..Default::default()
            },
        )
        .unwrap();

    // Direct commits to the protected target are refused.
    let head = world.repo.branches().get(&name("main")).unwrap().head;
    let err = world
        .repo
        .commit(
            &name("main"),
            &actor("eng-1"),
            "direct push",
            world.tree(&[("a.md", "one\nelse\n")]),
            head.as_ref(),
            &world.cancel,
        )
        .unwrap_err();
    assert!(matches!(
        err,
        CoreError::Conflict(ConflictError::ProtectionViolation {
            rule: "require_pull_request",
            ..
        })
    ));

    let pull = world.open_pull("feature", "main", &[]);
    let merged = merge(&world, pull.number).unwrap();
    assert_eq!(merged.status, PrStatus::Merged);
}

#[test]
fn conflicting_pull_reports_dirty_then_merges_after_resolution() {
    let world = World::new();
    world.commit_on("main", &[("bom.csv", "C1,100nF\n")]);
    world.branch("feature", "main");
    world.commit_on("feature", &[("bom.csv", "C1,220nF\n")]);
    world.commit_on("main", &[("bom.csv", "C1,470nF\n")]);

    let pull = world.open_pull("feature", "main", &[]);
    assert_eq!(pull.mergeable_status, MergeableStatus::Dirty);

    let resolved = world
        .repo
        .resolve_pull_request_conflicts(
            pull.number,
            &[rivet::artifacts::merge::conflict::Resolution {
                path: "bom.csv".into(),
                content: Some(bytes::Bytes::from_static(b"C1,330nF\n")),
            }],
            &actor("eng-1"),
            &world.cancel,
        )
        .unwrap();
    assert_eq!(resolved.mergeable_status, MergeableStatus::Clean);

    let merged = merge(&world, pull.number).unwrap();
    assert_eq!(
        world.file_text(merged.merge_commit.as_ref().unwrap(), "bom.csv"),
        "C1,330nF\n"
    );
}
