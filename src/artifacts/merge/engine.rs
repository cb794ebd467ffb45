//! Merge planning and execution.
//!
//! A plan pins the source and target heads it was computed from. Execution
//! re-checks those heads under the branch lock's compare-and-swap, so the only
//! way a merge lands is against exactly the state the plan described. Plans
//! whose heads moved are discarded and re-planned by the caller.

use bytes::Bytes;
use chrono::{DateTime, FixedOffset, Local};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

use crate::areas::object_store::ObjectStore;
use crate::artifacts::branch::manager::{AdvanceContext, BranchManager};
use crate::artifacts::branch::ref_name::RefName;
use crate::artifacts::core::{ActorId, CancelToken, ConflictId, PlanId, ProjectId};
use crate::artifacts::diff::line_diff;
use crate::artifacts::diff::tree_diff::{ChangeTracker, ChangeType, FileChange};
use crate::artifacts::graph::CommitGraph;
use crate::artifacts::merge::conflict::{
    ConflictState, ConflictType, MergeConflict, Resolution,
};
use crate::artifacts::objects::blob::Blob;
use crate::artifacts::objects::commit::Commit;
use crate::artifacts::objects::file_kind::FileKind;
use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::objects::tree::{TreeEntry, TreeSnapshot};
use crate::errors::{ConflictError, CoreError, Result};

/// Borrowed collaborators a merge runs against.
#[derive(Clone, Copy)]
pub struct MergeContext<'a> {
    pub store: &'a ObjectStore,
    pub graph: &'a CommitGraph,
    pub branches: &'a BranchManager,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeMethod {
    /// Two-parent merge commit.
    Merge,
    /// Single squash commit on the target, authored by the merging actor.
    Squash,
    /// Move the target head to the source head; only when the target has not
    /// diverged since the base.
    FastForward,
}

/// A computed merge, valid against the exact heads it names.
#[derive(Debug, Clone, Serialize)]
pub struct MergePlan {
    pub id: PlanId,
    pub project_id: ProjectId,
    pub source_branch: RefName,
    pub target_branch: RefName,
    pub source_head: ObjectId,
    pub target_head: ObjectId,
    /// Merge base, `None` for disconnected histories.
    pub base: Option<ObjectId>,
    pub conflicts: Vec<MergeConflict>,
    /// Source-side changes relative to the base, for review listings.
    pub changes: Vec<FileChange>,
    pub created_at: DateTime<FixedOffset>,
    #[serde(skip)]
    merged: BTreeMap<String, TreeEntry>,
}

impl MergePlan {
    pub fn is_mergeable(&self) -> bool {
        self.conflicts.is_empty()
    }

    pub fn unresolved_paths(&self) -> Vec<String> {
        self.conflicts
            .iter()
            .filter(|conflict| !conflict.is_resolved())
            .map(|conflict| conflict.path.clone())
            .collect()
    }

    /// Every conflict either resolved or carrying an accepted auto-merge.
    pub fn is_fully_resolved(&self) -> bool {
        self.conflicts.iter().all(MergeConflict::is_resolved)
    }
}

#[derive(Default)]
pub struct MergeEngine {
    plans: RwLock<HashMap<PlanId, MergePlan>>,
    next_plan: AtomicU64,
    next_conflict: AtomicU64,
}

impl MergeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compute a merge plan for `source` into `target` at their current heads.
    pub fn plan_merge(
        &self,
        ctx: &MergeContext<'_>,
        source: &RefName,
        target: &RefName,
        cancel: &CancelToken,
    ) -> Result<MergePlan> {
        let source_head = head_of(ctx, source)?;
        let target_head = head_of(ctx, target)?;

        let base = ctx.graph.merge_base(&source_head, &target_head, cancel)?;

        let mut plan = MergePlan {
            id: PlanId(self.next_plan.fetch_add(1, Ordering::Relaxed) + 1),
            project_id: ctx.branches.get(source)?.project_id,
            source_branch: source.clone(),
            target_branch: target.clone(),
            source_head: source_head.clone(),
            target_head: target_head.clone(),
            base: base.clone(),
            conflicts: Vec::new(),
            changes: Vec::new(),
            created_at: Local::now().fixed_offset(),
            merged: BTreeMap::new(),
        };

        match base {
            None => {
                // Nothing to reason about file-by-file; the histories are
                // unrelated and merging is a deliberate caller decision.
                plan.conflicts.push(MergeConflict {
                    id: self.allocate_conflict(),
                    path: String::new(),
                    conflict_type: ConflictType::History,
                    base_blob: None,
                    source_blob: None,
                    target_blob: None,
                    state: ConflictState::Unresolved,
                    auto_resolvable: false,
                    resolved_content: None,
                    resolved_by: None,
                    source_path: None,
                    target_path: None,
                });
            }
            Some(base_id) => {
                self.plan_trees(ctx, &mut plan, &base_id, cancel)?;
            }
        }

        debug!(
            source = %source,
            target = %target,
            conflicts = plan.conflicts.len(),
            mergeable = plan.is_mergeable(),
            "merge planned"
        );

        let snapshot = plan.clone();
        self.plans.write().insert(plan.id, plan);
        Ok(snapshot)
    }

    fn plan_trees(
        &self,
        ctx: &MergeContext<'_>,
        plan: &mut MergePlan,
        base_id: &ObjectId,
        cancel: &CancelToken,
    ) -> Result<()> {
        let base_tree = tree_of(ctx, base_id)?;
        let source_tree = tree_of(ctx, &plan.source_head)?;
        let target_tree = tree_of(ctx, &plan.target_head)?;

        let tracker = ChangeTracker::new(ctx.store);
        plan.changes = tracker.diff(&base_tree, &source_tree, cancel)?;
        let target_changes = tracker.diff(&base_tree, &target_tree, cancel)?;

        let paths: BTreeSet<&String> = base_tree
            .paths()
            .chain(source_tree.paths())
            .chain(target_tree.paths())
            .collect();

        for path in paths {
            cancel.check()?;

            let base_entry = base_tree.get(path);
            let source_entry = source_tree.get(path);
            let target_entry = target_tree.get(path);

            if source_entry == target_entry {
                // Agreement, including both sides deleting.
                if let Some(entry) = source_entry {
                    plan.merged.insert(path.clone(), entry.clone());
                }
            } else if source_entry == base_entry {
                if let Some(entry) = target_entry {
                    plan.merged.insert(path.clone(), entry.clone());
                }
            } else if target_entry == base_entry {
                if let Some(entry) = source_entry {
                    plan.merged.insert(path.clone(), entry.clone());
                }
            } else {
                let conflict =
                    self.classify(ctx, path, base_entry, source_entry, target_entry)?;
                plan.conflicts.push(conflict);
            }
        }

        self.fold_rename_conflicts(plan, &base_tree, &source_tree, &target_tree, &target_changes);
        Ok(())
    }

    /// Both sides changed `path` and neither matches the base.
    fn classify(
        &self,
        ctx: &MergeContext<'_>,
        path: &str,
        base_entry: Option<&TreeEntry>,
        source_entry: Option<&TreeEntry>,
        target_entry: Option<&TreeEntry>,
    ) -> Result<MergeConflict> {
        let mut conflict = MergeConflict {
            id: self.allocate_conflict(),
            path: path.to_string(),
            conflict_type: ConflictType::Content,
            base_blob: base_entry.map(|e| e.blob_id.clone()),
            source_blob: source_entry.map(|e| e.blob_id.clone()),
            target_blob: target_entry.map(|e| e.blob_id.clone()),
            state: ConflictState::Unresolved,
            auto_resolvable: false,
            resolved_content: None,
            resolved_by: None,
            source_path: None,
            target_path: None,
        };

        if source_entry.is_none() || target_entry.is_none() {
            conflict.conflict_type = ConflictType::DeleteModify;
            return Ok(conflict);
        }

        let texts = [base_entry, source_entry, target_entry]
            .into_iter()
            .map(|entry| match entry {
                None => Ok(Some(String::new())),
                Some(entry) if entry.binary => Ok(None),
                Some(entry) => {
                    let blob = Blob::new(ctx.store.get_blob(&entry.blob_id)?);
                    Ok(blob.as_text().map(str::to_string))
                }
            })
            .collect::<Result<Vec<Option<String>>>>()?;

        let (Some(base), Some(source), Some(target)) = (&texts[0], &texts[1], &texts[2]) else {
            conflict.conflict_type = ConflictType::Binary;
            return Ok(conflict);
        };

        let outcome = line_diff::merge_three_way(base, source, target);
        if let Some(content) = outcome.content {
            conflict.auto_resolvable = true;
            conflict.resolved_content = Some(Bytes::from(content));
        }

        Ok(conflict)
    }

    /// Both sides renaming the same base path to different destinations is a
    /// conflict; the plain union pass would happily keep both copies.
    fn fold_rename_conflicts(
        &self,
        plan: &mut MergePlan,
        base_tree: &TreeSnapshot,
        source_tree: &TreeSnapshot,
        target_tree: &TreeSnapshot,
        target_changes: &[FileChange],
    ) {
        let renames = |changes: &[FileChange]| -> HashMap<String, String> {
            changes
                .iter()
                .filter(|change| {
                    matches!(change.change_type, ChangeType::Renamed | ChangeType::Moved)
                })
                .filter_map(|change| {
                    change
                        .old_path
                        .clone()
                        .map(|old| (old, change.path.clone()))
                })
                .collect()
        };

        let source_renames = renames(&plan.changes);
        let target_renames = renames(target_changes);

        for (old_path, source_dest) in &source_renames {
            let Some(target_dest) = target_renames.get(old_path) else {
                continue;
            };
            if target_dest == source_dest {
                continue;
            }

            plan.merged.remove(source_dest);
            plan.merged.remove(target_dest);
            plan.conflicts.push(MergeConflict {
                id: self.allocate_conflict(),
                path: old_path.clone(),
                conflict_type: ConflictType::Rename,
                base_blob: base_tree.get(old_path).map(|e| e.blob_id.clone()),
                source_blob: source_tree.get(source_dest).map(|e| e.blob_id.clone()),
                target_blob: target_tree.get(target_dest).map(|e| e.blob_id.clone()),
                state: ConflictState::Unresolved,
                auto_resolvable: false,
                resolved_content: None,
                resolved_by: None,
                source_path: Some(source_dest.clone()),
                target_path: Some(target_dest.clone()),
            });
        }
    }

    pub fn get_plan(&self, plan_id: PlanId) -> Result<MergePlan> {
        self.plans
            .read()
            .get(&plan_id)
            .cloned()
            .ok_or_else(|| CoreError::not_found("merge plan", plan_id))
    }

    /// Drop a plan that will not be executed (superseded or abandoned).
    pub fn discard_plan(&self, plan_id: PlanId) {
        self.plans.write().remove(&plan_id);
    }

    /// Record caller resolutions. Each resolution must name a conflicted
    /// path; `content: None` keeps a deletion.
    pub fn resolve_conflicts(
        &self,
        plan_id: PlanId,
        resolutions: &[Resolution],
        actor: &ActorId,
    ) -> Result<MergePlan> {
        let mut plans = self.plans.write();
        let plan = plans
            .get_mut(&plan_id)
            .ok_or_else(|| CoreError::not_found("merge plan", plan_id))?;

        for resolution in resolutions {
            let conflict = plan
                .conflicts
                .iter_mut()
                .find(|conflict| {
                    conflict.path == resolution.path
                        || conflict.resolution_path() == resolution.path
                })
                .ok_or_else(|| CoreError::not_found("conflict", &resolution.path))?;

            conflict.resolved_content = resolution.content.clone();
            conflict.state = ConflictState::Resolved;
            conflict.resolved_by = Some(actor.clone());
        }

        Ok(plan.clone())
    }

    /// Accept every auto-resolvable conflict's prefilled content at once.
    pub fn accept_auto_resolutions(&self, plan_id: PlanId, actor: &ActorId) -> Result<MergePlan> {
        let mut plans = self.plans.write();
        let plan = plans
            .get_mut(&plan_id)
            .ok_or_else(|| CoreError::not_found("merge plan", plan_id))?;

        for conflict in &mut plan.conflicts {
            if conflict.auto_resolvable && !conflict.is_resolved() {
                conflict.state = ConflictState::Resolved;
                conflict.resolved_by = Some(actor.clone());
            }
        }

        Ok(plan.clone())
    }

    /// Execute a fully resolved plan against its pinned heads.
    #[allow(clippy::too_many_arguments)]
    pub fn execute(
        &self,
        ctx: &MergeContext<'_>,
        plan_id: PlanId,
        actor: &ActorId,
        message: Option<&str>,
        method: MergeMethod,
        via_pull_request: bool,
        cancel: &CancelToken,
    ) -> Result<Commit> {
        let plan = self.get_plan(plan_id)?;

        let source_branch = ctx.branches.get(&plan.source_branch)?;
        let target_branch = ctx.branches.get(&plan.target_branch)?;
        if source_branch.head.as_ref() != Some(&plan.source_head) {
            return Err(stale(&plan.source_branch, &plan.source_head, &source_branch.head));
        }
        if target_branch.head.as_ref() != Some(&plan.target_head) {
            return Err(stale(&plan.target_branch, &plan.target_head, &target_branch.head));
        }

        let unresolved = plan.unresolved_paths();
        if !unresolved.is_empty() {
            return Err(ConflictError::ConflictsRemain { paths: unresolved }.into());
        }

        // Source already contained in target: nothing to merge.
        if plan.base.as_ref() == Some(&plan.source_head) {
            let head = ctx.graph.get(&plan.target_head)?;
            self.discard_plan(plan_id);
            return Ok(head);
        }

        let advance = AdvanceContext {
            actor,
            via_pull_request,
        };

        if method == MergeMethod::FastForward {
            if plan.base.as_ref() != Some(&plan.target_head) {
                return Err(CoreError::validation(format!(
                    "cannot fast-forward: branch {} has diverged",
                    plan.target_branch
                )));
            }
            ctx.branches.advance_head(
                ctx.graph,
                &plan.target_branch,
                &plan.source_head,
                Some(&plan.target_head),
                &advance,
            )?;
            let head = ctx.graph.get(&plan.source_head)?;
            self.discard_plan(plan_id);
            return Ok(head);
        }

        let tree = self.build_tree(ctx, &plan)?;
        let tree_id = ctx.store.put_tree(&tree)?;

        let target_tree = tree_of(ctx, &plan.target_head)?;
        let changes = ChangeTracker::new(ctx.store).diff(&target_tree, &tree, cancel)?;
        let stats = ChangeTracker::stats(&changes);

        let parents = match method {
            MergeMethod::Merge => vec![plan.target_head.clone(), plan.source_head.clone()],
            MergeMethod::Squash => vec![plan.target_head.clone()],
            MergeMethod::FastForward => unreachable!("handled above"),
        };
        let message = message.map(str::to_string).unwrap_or_else(|| {
            format!(
                "Merge branch '{}' into '{}'",
                plan.source_branch, plan.target_branch
            )
        });

        let commit = Commit::new(
            plan.project_id,
            target_branch.id,
            actor.clone(),
            message,
            Local::now().fixed_offset(),
            parents,
            tree_id,
            stats,
        );
        ctx.graph.insert(commit.clone())?;
        ctx.branches.advance_head(
            ctx.graph,
            &plan.target_branch,
            commit.id(),
            Some(&plan.target_head),
            &advance,
        )?;

        debug!(
            source = %plan.source_branch,
            target = %plan.target_branch,
            merge_commit = %commit.id().to_short(),
            ?method,
            "merge executed"
        );

        self.discard_plan(plan_id);
        Ok(commit)
    }

    /// The merged snapshot: the clean union plus every conflict's resolution.
    fn build_tree(&self, ctx: &MergeContext<'_>, plan: &MergePlan) -> Result<TreeSnapshot> {
        let mut entries = plan.merged.clone();

        for conflict in &plan.conflicts {
            let path = conflict.resolution_path().to_string();
            match &conflict.resolved_content {
                Some(content) => {
                    let blob = Blob::new(content.clone());
                    let blob_id = ctx.store.put_blob(content.clone())?;
                    entries.insert(
                        path.clone(),
                        TreeEntry::new(blob_id, FileKind::from_path(&path), blob.is_binary()),
                    );
                }
                None => {
                    entries.remove(&path);
                }
            }
        }

        TreeSnapshot::from_entries(entries)
    }

    fn allocate_conflict(&self) -> ConflictId {
        ConflictId(self.next_conflict.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

fn head_of(ctx: &MergeContext<'_>, branch: &RefName) -> Result<ObjectId> {
    ctx.branches.get(branch)?.head.ok_or_else(|| {
        CoreError::validation(format!("branch {branch} has no commits to merge"))
    })
}

fn tree_of(ctx: &MergeContext<'_>, commit_id: &ObjectId) -> Result<TreeSnapshot> {
    let commit = ctx.graph.get(commit_id)?;
    ctx.store.get_tree(commit.tree_id())
}

fn stale(branch: &RefName, expected: &ObjectId, actual: &Option<ObjectId>) -> CoreError {
    ConflictError::StaleHead {
        branch: branch.to_string(),
        expected: Some(expected.to_string()),
        actual: actual.as_ref().map(ToString::to_string),
    }
    .into()
}
