//! The per-project aggregate and the vault that owns all of them.
//!
//! A [`Repository`] wires one project's object store, commit graph, branch
//! table, merge engine, pull requests and tags together and is the only
//! surface callers mutate through. The [`Vault`] hands out `Arc<Repository>`
//! handles keyed by project id.
//!
//! Every mutation notifies the configured [`Notifier`] after it commits;
//! delivery is best-effort and never rolls a mutation back.

use chrono::Local;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::info;

use crate::areas::object_store::ObjectStore;
use crate::artifacts::branch::manager::{AdvanceContext, Branch, BranchManager};
use crate::artifacts::branch::protection::BranchProtectionRules;
use crate::artifacts::branch::ref_name::RefName;
use crate::artifacts::core::{ActorId, CancelToken, PlanId, ProjectId};
use crate::artifacts::diff::tree_diff::{ChangeTracker, DiffFilter, FileChange};
use crate::artifacts::graph::CommitGraph;
use crate::artifacts::merge::engine::{MergeContext, MergeEngine, MergeMethod, MergePlan};
use crate::artifacts::merge::conflict::Resolution;
use crate::artifacts::objects::commit::Commit;
use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::objects::tree::TreeSnapshot;
use crate::artifacts::pull_request::PullRequestStore;
use crate::artifacts::tag::{Tag, TagManager, TagType};
use crate::errors::{ConflictError, CoreError, Result};
use crate::events::{CoreEvent, Notifier};

pub const DEFAULT_BRANCH: &str = "main";

pub struct Repository {
    project_id: ProjectId,
    name: String,
    store: ObjectStore,
    graph: CommitGraph,
    branches: Arc<BranchManager>,
    engine: MergeEngine,
    pulls: Arc<PullRequestStore>,
    tags: TagManager,
    notifier: Arc<dyn Notifier>,
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("project_id", &self.project_id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl Repository {
    /// A fresh project with an unborn default branch. Head movement on any
    /// branch invalidates the cached mergeability of the pull requests
    /// touching it, via a head-change subscription registered here.
    pub fn new(
        project_id: ProjectId,
        name: impl Into<String>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self> {
        let branches = Arc::new(BranchManager::new(project_id));
        let pulls = Arc::new(PullRequestStore::new());

        branches.create_default(
            RefName::try_parse(DEFAULT_BRANCH)?,
            BranchProtectionRules::default(),
        )?;

        let hook = Arc::clone(&pulls);
        branches.subscribe(move |event| {
            hook.invalidate_for_branch(&event.branch_name);
        });

        Ok(Repository {
            project_id,
            name: name.into(),
            store: ObjectStore::in_memory(),
            graph: CommitGraph::new(),
            branches,
            engine: MergeEngine::new(),
            pulls,
            tags: TagManager::new(project_id),
            notifier,
        })
    }

    pub fn project_id(&self) -> ProjectId {
        self.project_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn store(&self) -> &ObjectStore {
        &self.store
    }

    pub fn graph(&self) -> &CommitGraph {
        &self.graph
    }

    pub fn branches(&self) -> &BranchManager {
        &self.branches
    }

    pub fn engine(&self) -> &MergeEngine {
        &self.engine
    }

    pub fn pulls(&self) -> &PullRequestStore {
        &self.pulls
    }

    pub fn tags(&self) -> &TagManager {
        &self.tags
    }

    pub(crate) fn merge_ctx(&self) -> MergeContext<'_> {
        MergeContext {
            store: &self.store,
            graph: &self.graph,
            branches: &self.branches,
        }
    }

    pub(crate) fn notify(&self, event: CoreEvent) {
        self.notifier.notify(&event);
    }

    /// Record a full snapshot as a new commit on `branch` and fast-forward its
    /// head, guarded by `expected_head`. A lost compare-and-swap may leave the
    /// commit unreferenced in the append-only graph, which is harmless.
    pub fn commit(
        &self,
        branch: &RefName,
        author: &ActorId,
        message: impl Into<String>,
        tree: TreeSnapshot,
        expected_head: Option<&ObjectId>,
        cancel: &CancelToken,
    ) -> Result<Commit> {
        let branch_rec = self.branches.get(branch)?;
        if branch_rec.head.as_ref() != expected_head {
            return Err(ConflictError::StaleHead {
                branch: branch.to_string(),
                expected: expected_head.map(ToString::to_string),
                actual: branch_rec.head.as_ref().map(ToString::to_string),
            }
            .into());
        }

        let parent_tree = match expected_head {
            Some(parent) => {
                let parent_commit = self.graph.get(parent)?;
                self.store.get_tree(parent_commit.tree_id())?
            }
            None => TreeSnapshot::empty(),
        };
        let changes = ChangeTracker::new(&self.store).diff(&parent_tree, &tree, cancel)?;
        let stats = ChangeTracker::stats(&changes);

        let tree_id = self.store.put_tree(&tree)?;
        let commit = Commit::new(
            self.project_id,
            branch_rec.id,
            author.clone(),
            message.into(),
            Local::now().fixed_offset(),
            expected_head.cloned().into_iter().collect(),
            tree_id,
            stats,
        );

        self.graph.insert(commit.clone())?;
        self.branches.advance_head(
            &self.graph,
            branch,
            commit.id(),
            expected_head,
            &AdvanceContext {
                actor: author,
                via_pull_request: false,
            },
        )?;

        self.notify(CoreEvent::CommitCreated {
            project_id: self.project_id,
            branch_id: branch_rec.id,
            commit_id: commit.id().clone(),
            author: author.clone(),
        });
        Ok(commit)
    }

    pub fn create_branch(&self, name: RefName, from: Option<&RefName>) -> Result<Branch> {
        let branch = self.branches.create_branch(name, from)?;
        self.notify(CoreEvent::BranchCreated {
            project_id: self.project_id,
            branch_id: branch.id,
            name: branch.name.to_string(),
        });
        Ok(branch)
    }

    pub fn delete_branch(&self, name: &RefName) -> Result<()> {
        let branch = self.branches.get(name)?;
        self.branches.delete_branch(name)?;
        self.notify(CoreEvent::BranchDeleted {
            project_id: self.project_id,
            branch_id: branch.id,
            name: branch.name.to_string(),
        });
        Ok(())
    }

    /// Commits reachable from the branch head, newest first.
    pub fn history(&self, branch: &RefName) -> Result<Vec<Commit>> {
        match self.branches.get(branch)?.head {
            Some(head) => self.graph.history(&head),
            None => Ok(Vec::new()),
        }
    }

    /// The snapshot a commit points at.
    pub fn snapshot(&self, commit_id: &ObjectId) -> Result<TreeSnapshot> {
        let commit = self.graph.get(commit_id)?;
        self.store.get_tree(commit.tree_id())
    }

    /// File-level changes between two commits, filterable by change type.
    /// `from: None` diffs against the empty tree.
    pub fn changed_files(
        &self,
        from: Option<&ObjectId>,
        to: &ObjectId,
        filter: DiffFilter,
        cancel: &CancelToken,
    ) -> Result<Vec<FileChange>> {
        let before = match from {
            Some(commit_id) => self.snapshot(commit_id)?,
            None => TreeSnapshot::empty(),
        };
        let after = self.snapshot(to)?;

        let changes = ChangeTracker::new(&self.store).diff(&before, &after, cancel)?;
        Ok(changes
            .into_iter()
            .filter(|change| filter.matches(change.change_type))
            .collect())
    }

    pub fn plan_merge(
        &self,
        source: &RefName,
        target: &RefName,
        cancel: &CancelToken,
    ) -> Result<MergePlan> {
        self.engine.plan_merge(&self.merge_ctx(), source, target, cancel)
    }

    pub fn resolve_merge_conflicts(
        &self,
        plan_id: PlanId,
        resolutions: &[Resolution],
        actor: &ActorId,
    ) -> Result<MergePlan> {
        self.engine.resolve_conflicts(plan_id, resolutions, actor)
    }

    pub fn accept_auto_resolutions(&self, plan_id: PlanId, actor: &ActorId) -> Result<MergePlan> {
        self.engine.accept_auto_resolutions(plan_id, actor)
    }

    /// Execute a planned merge directly, outside any pull request.
    pub fn execute_merge(
        &self,
        plan_id: PlanId,
        actor: &ActorId,
        message: Option<&str>,
        method: MergeMethod,
        cancel: &CancelToken,
    ) -> Result<Commit> {
        let plan = self.engine.get_plan(plan_id)?;
        let target = self.branches.get(&plan.target_branch)?;

        let commit = self.engine.execute(
            &self.merge_ctx(),
            plan_id,
            actor,
            message,
            method,
            false,
            cancel,
        )?;

        self.notify(CoreEvent::MergeExecuted {
            project_id: self.project_id,
            target_branch: target.id,
            merge_commit: commit.id().clone(),
        });
        Ok(commit)
    }

    pub fn create_tag(
        &self,
        name: RefName,
        commit_id: ObjectId,
        tag_type: TagType,
        is_prerelease: bool,
        created_by: ActorId,
    ) -> Result<Tag> {
        let tag = self.tags.create_tag(
            &self.graph,
            name,
            commit_id,
            tag_type,
            is_prerelease,
            created_by,
        )?;
        self.notify(CoreEvent::TagCreated {
            project_id: self.project_id,
            tag_id: tag.id,
            name: tag.name.to_string(),
            commit_id: tag.commit_id.clone(),
        });
        Ok(tag)
    }
}

/// All projects, keyed by id.
pub struct Vault {
    projects: RwLock<HashMap<ProjectId, Arc<Repository>>>,
    next_id: AtomicU64,
    notifier: Arc<dyn Notifier>,
}

impl Vault {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Vault {
            projects: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            notifier,
        }
    }

    pub fn create_project(&self, name: impl Into<String>) -> Result<Arc<Repository>> {
        let name = name.into();

        let repo = {
            let mut projects = self.projects.write();
            if projects.values().any(|project| project.name() == name) {
                return Err(ConflictError::Duplicate {
                    kind: "project",
                    name,
                }
                .into());
            }

            let id = ProjectId(self.next_id.fetch_add(1, Ordering::Relaxed));
            let repo = Arc::new(Repository::new(id, name.clone(), Arc::clone(&self.notifier))?);
            projects.insert(id, Arc::clone(&repo));
            repo
        };

        info!(project = %repo.project_id(), %name, "project created");
        self.notifier.notify(&CoreEvent::ProjectCreated {
            project_id: repo.project_id(),
            name,
        });
        Ok(repo)
    }

    pub fn project(&self, id: ProjectId) -> Result<Arc<Repository>> {
        self.projects
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| CoreError::not_found("project", id))
    }

    /// All projects, id-sorted.
    pub fn list(&self) -> Vec<Arc<Repository>> {
        let mut projects: Vec<Arc<Repository>> =
            self.projects.read().values().cloned().collect();
        projects.sort_by_key(|project| project.project_id());
        projects
    }
}

impl Default for Vault {
    fn default() -> Self {
        Vault::new(Arc::new(crate::events::NoopNotifier))
    }
}
