//! Fire-and-forget core events.
//!
//! The core hands a [`CoreEvent`] to the configured [`Notifier`] after a
//! mutation commits. Delivery is best-effort by contract: implementations must
//! swallow their own failures, and the core never blocks on them.

use serde::Serialize;

use crate::artifacts::core::{ActorId, BranchId, ProjectId, PullRequestId, TagId};
use crate::artifacts::objects::object_id::ObjectId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CoreEvent {
    ProjectCreated {
        project_id: ProjectId,
        name: String,
    },
    BranchCreated {
        project_id: ProjectId,
        branch_id: BranchId,
        name: String,
    },
    BranchDeleted {
        project_id: ProjectId,
        branch_id: BranchId,
        name: String,
    },
    CommitCreated {
        project_id: ProjectId,
        branch_id: BranchId,
        commit_id: ObjectId,
        author: ActorId,
    },
    MergeExecuted {
        project_id: ProjectId,
        target_branch: BranchId,
        merge_commit: ObjectId,
    },
    PullRequestOpened {
        project_id: ProjectId,
        pull_request: PullRequestId,
        number: u64,
    },
    PullRequestMerged {
        project_id: ProjectId,
        pull_request: PullRequestId,
        merge_commit: ObjectId,
    },
    PullRequestClosed {
        project_id: ProjectId,
        pull_request: PullRequestId,
    },
    TagCreated {
        project_id: ProjectId,
        tag_id: TagId,
        name: String,
        commit_id: ObjectId,
    },
}

/// External notification collaborator (activity feeds, webhooks, email).
pub trait Notifier: Send + Sync {
    fn notify(&self, event: &CoreEvent);
}

/// Default collaborator: drops every event.
#[derive(Debug, Default)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify(&self, _event: &CoreEvent) {}
}

/// Test collaborator that records everything it is handed.
#[derive(Debug, Default)]
pub struct CollectingNotifier {
    events: parking_lot::Mutex<Vec<CoreEvent>>,
}

impl CollectingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<CoreEvent> {
        self.events.lock().clone()
    }
}

impl Notifier for CollectingNotifier {
    fn notify(&self, event: &CoreEvent) {
        self.events.lock().push(event.clone());
    }
}
