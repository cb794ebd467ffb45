//! The branch table of one project.
//!
//! All head movement goes through compare-and-swap: the caller states the head
//! it last observed and loses with [`ConflictError::StaleHead`] if someone got
//! there first. `advance_head` is strictly fast-forward; anything else must go
//! through `reset_head`, which is the force-push path and gated separately.
//!
//! Head-change subscribers run after the branch lock is released, so a
//! subscriber may call back into the manager.

use chrono::{DateTime, FixedOffset, Local};
use parking_lot::RwLock;
use regex::Regex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock};

use crate::artifacts::branch::protection::BranchProtectionRules;
use crate::artifacts::branch::ref_name::RefName;
use crate::artifacts::branch::BRANCH_NAME_REGEX;
use crate::artifacts::core::{ActorId, BranchId, ProjectId};
use crate::artifacts::graph::CommitGraph;
use crate::artifacts::objects::object_id::ObjectId;
use crate::errors::{ConflictError, CoreError, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchStatus {
    Active,
    Merged,
    Archived,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Branch {
    pub id: BranchId,
    pub project_id: ProjectId,
    pub name: RefName,
    /// `None` until the first commit lands (unborn branch).
    pub head: Option<ObjectId>,
    pub parent_branch: Option<BranchId>,
    pub is_default: bool,
    pub is_protected: bool,
    pub protection: BranchProtectionRules,
    pub status: BranchStatus,
    pub created_at: DateTime<FixedOffset>,
}

/// Fired after a branch head moved. `new_head` is `None` after a reset to
/// nothing, `old_head` is `None` for a branch's first commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadChanged {
    pub project_id: ProjectId,
    pub branch_id: BranchId,
    pub branch_name: RefName,
    pub old_head: Option<ObjectId>,
    pub new_head: Option<ObjectId>,
}

/// Who is moving a head, and through which door.
#[derive(Debug, Clone, Copy)]
pub struct AdvanceContext<'a> {
    pub actor: &'a ActorId,
    pub via_pull_request: bool,
}

type HeadSubscriber = Arc<dyn Fn(&HeadChanged) + Send + Sync>;

#[derive(Debug, Default)]
struct BranchesInner {
    by_id: HashMap<BranchId, Branch>,
    by_name: HashMap<RefName, BranchId>,
    default_branch: Option<BranchId>,
}

pub struct BranchManager {
    project_id: ProjectId,
    inner: RwLock<BranchesInner>,
    next_id: AtomicU64,
    subscribers: RwLock<Vec<HeadSubscriber>>,
}

impl BranchManager {
    pub fn new(project_id: ProjectId) -> Self {
        BranchManager {
            project_id,
            inner: RwLock::new(BranchesInner::default()),
            next_id: AtomicU64::new(1),
            subscribers: RwLock::new(Vec::new()),
        }
    }

    /// Register the project's default branch, unborn and carrying `protection`.
    pub fn create_default(
        &self,
        name: RefName,
        protection: BranchProtectionRules,
    ) -> Result<Branch> {
        validate_branch_name(&name)?;
        let mut inner = self.inner.write();
        if inner.default_branch.is_some() {
            return Err(CoreError::validation(
                "project already has a default branch",
            ));
        }
        if inner.by_name.contains_key(&name) {
            return Err(ConflictError::Duplicate {
                kind: "branch",
                name: name.to_string(),
            }
            .into());
        }

        let branch = Branch {
            id: self.allocate_id(),
            project_id: self.project_id,
            name: name.clone(),
            head: None,
            parent_branch: None,
            is_default: true,
            is_protected: true,
            protection,
            status: BranchStatus::Active,
            created_at: Local::now().fixed_offset(),
        };

        inner.default_branch = Some(branch.id);
        inner.by_name.insert(name, branch.id);
        inner.by_id.insert(branch.id, branch.clone());
        Ok(branch)
    }

    /// Create a branch at the head of `from` (the default branch when `from`
    /// is `None`). The source must have at least one commit.
    pub fn create_branch(&self, name: RefName, from: Option<&RefName>) -> Result<Branch> {
        validate_branch_name(&name)?;
        let mut inner = self.inner.write();
        if inner.by_name.contains_key(&name) {
            return Err(ConflictError::Duplicate {
                kind: "branch",
                name: name.to_string(),
            }
            .into());
        }

        let source = match from {
            Some(from_name) => {
                let id = *inner
                    .by_name
                    .get(from_name)
                    .ok_or_else(|| CoreError::not_found("branch", from_name))?;
                &inner.by_id[&id]
            }
            None => {
                let id = inner
                    .default_branch
                    .ok_or_else(|| CoreError::not_found("branch", "default"))?;
                &inner.by_id[&id]
            }
        };

        let head = source.head.clone().ok_or_else(|| {
            CoreError::validation(format!("branch {} has no commits to branch from", source.name))
        })?;
        let parent_branch = Some(source.id);

        let branch = Branch {
            id: self.allocate_id(),
            project_id: self.project_id,
            name: name.clone(),
            head: Some(head),
            parent_branch,
            is_default: false,
            is_protected: false,
            protection: BranchProtectionRules::default(),
            status: BranchStatus::Active,
            created_at: Local::now().fixed_offset(),
        };

        inner.by_name.insert(name, branch.id);
        inner.by_id.insert(branch.id, branch.clone());
        Ok(branch)
    }

    pub fn get(&self, name: &RefName) -> Result<Branch> {
        let inner = self.inner.read();
        inner
            .by_name
            .get(name)
            .and_then(|id| inner.by_id.get(id))
            .cloned()
            .ok_or_else(|| CoreError::not_found("branch", name))
    }

    pub fn get_by_id(&self, id: BranchId) -> Result<Branch> {
        self.inner
            .read()
            .by_id
            .get(&id)
            .cloned()
            .ok_or_else(|| CoreError::not_found("branch", id))
    }

    pub fn default_branch(&self) -> Result<Branch> {
        let inner = self.inner.read();
        inner
            .default_branch
            .and_then(|id| inner.by_id.get(&id))
            .cloned()
            .ok_or_else(|| CoreError::not_found("branch", "default"))
    }

    /// All branches, name-sorted.
    pub fn list(&self) -> Vec<Branch> {
        let mut branches: Vec<Branch> = self.inner.read().by_id.values().cloned().collect();
        branches.sort_by(|a, b| a.name.cmp(&b.name));
        branches
    }

    /// Fast-forward the head to `new_head`, with `expected` as the
    /// compare-and-swap guard.
    pub fn advance_head(
        &self,
        graph: &CommitGraph,
        name: &RefName,
        new_head: &ObjectId,
        expected: Option<&ObjectId>,
        ctx: &AdvanceContext<'_>,
    ) -> Result<Branch> {
        if !graph.contains(new_head) {
            return Err(CoreError::not_found("commit", new_head));
        }

        let (branch, event) = {
            let mut inner = self.inner.write();
            let branch = Self::get_active_mut(&mut inner, name)?;

            if branch.head.as_ref() != expected {
                return Err(stale_head(branch, expected));
            }
            if branch.is_protected {
                if branch.protection.require_pull_request && !ctx.via_pull_request {
                    return Err(protection(branch, "require_pull_request"));
                }
                if !ctx.via_pull_request && !branch.protection.may_push(ctx.actor) {
                    return Err(protection(branch, "restrict_pushes"));
                }
            }
            if let Some(current) = &branch.head {
                if !graph.is_ancestor(current, new_head) {
                    return Err(CoreError::validation(format!(
                        "non-fast-forward update of branch {name}"
                    )));
                }
            }

            let old_head = branch.head.replace(new_head.clone());
            let event = HeadChanged {
                project_id: branch.project_id,
                branch_id: branch.id,
                branch_name: branch.name.clone(),
                old_head,
                new_head: Some(new_head.clone()),
            };
            (branch.clone(), event)
        };

        self.notify(&event);
        Ok(branch)
    }

    /// Force-move the head anywhere in the graph (or back to unborn). The
    /// force-push door: closed on protected branches unless
    /// `allow_force_pushes` is set.
    pub fn reset_head(
        &self,
        graph: &CommitGraph,
        name: &RefName,
        new_head: Option<ObjectId>,
        ctx: &AdvanceContext<'_>,
    ) -> Result<Branch> {
        if let Some(target) = &new_head {
            if !graph.contains(target) {
                return Err(CoreError::not_found("commit", target));
            }
        }

        let (branch, event) = {
            let mut inner = self.inner.write();
            let branch = Self::get_active_mut(&mut inner, name)?;

            if branch.is_protected && !branch.protection.allow_force_pushes {
                return Err(protection(branch, "allow_force_pushes"));
            }
            if branch.is_protected && !branch.protection.may_push(ctx.actor) {
                return Err(protection(branch, "restrict_pushes"));
            }

            let old_head = std::mem::replace(&mut branch.head, new_head.clone());
            let event = HeadChanged {
                project_id: branch.project_id,
                branch_id: branch.id,
                branch_name: branch.name.clone(),
                old_head,
                new_head,
            };
            (branch.clone(), event)
        };

        self.notify(&event);
        Ok(branch)
    }

    pub fn delete_branch(&self, name: &RefName) -> Result<()> {
        let mut inner = self.inner.write();
        let id = *inner
            .by_name
            .get(name)
            .ok_or_else(|| CoreError::not_found("branch", name))?;
        let branch = &inner.by_id[&id];

        if branch.is_default {
            return Err(CoreError::validation(
                "the default branch cannot be deleted",
            ));
        }
        if branch.is_protected && !branch.protection.allow_deletions {
            return Err(protection(branch, "allow_deletions"));
        }

        inner.by_name.remove(name);
        inner.by_id.remove(&id);
        Ok(())
    }

    pub fn mark_merged(&self, name: &RefName) -> Result<()> {
        let mut inner = self.inner.write();
        let branch = Self::get_mut(&mut inner, name)?;
        branch.status = BranchStatus::Merged;
        Ok(())
    }

    pub fn archive(&self, name: &RefName) -> Result<()> {
        let mut inner = self.inner.write();
        let branch = Self::get_mut(&mut inner, name)?;
        if branch.is_default {
            return Err(CoreError::validation(
                "the default branch cannot be archived",
            ));
        }
        branch.status = BranchStatus::Archived;
        Ok(())
    }

    /// Attach (or replace) protection on a branch.
    pub fn set_protection(&self, name: &RefName, rules: BranchProtectionRules) -> Result<Branch> {
        let mut inner = self.inner.write();
        let branch = Self::get_mut(&mut inner, name)?;
        branch.is_protected = true;
        branch.protection = rules;
        Ok(branch.clone())
    }

    pub fn clear_protection(&self, name: &RefName) -> Result<Branch> {
        let mut inner = self.inner.write();
        let branch = Self::get_mut(&mut inner, name)?;
        if branch.is_default {
            return Err(CoreError::validation(
                "the default branch cannot be unprotected",
            ));
        }
        branch.is_protected = false;
        branch.protection = BranchProtectionRules::default();
        Ok(branch.clone())
    }

    pub fn subscribe(&self, subscriber: impl Fn(&HeadChanged) + Send + Sync + 'static) {
        self.subscribers.write().push(Arc::new(subscriber));
    }

    /// The list is cloned out of the lock first, so a subscriber may call
    /// back into the manager, including `subscribe` itself.
    fn notify(&self, event: &HeadChanged) {
        let subscribers: Vec<HeadSubscriber> = self.subscribers.read().clone();
        for subscriber in subscribers {
            subscriber(event);
        }
    }

    fn allocate_id(&self) -> BranchId {
        BranchId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn get_mut<'i>(inner: &'i mut BranchesInner, name: &RefName) -> Result<&'i mut Branch> {
        let id = *inner
            .by_name
            .get(name)
            .ok_or_else(|| CoreError::not_found("branch", name))?;
        inner
            .by_id
            .get_mut(&id)
            .ok_or_else(|| CoreError::not_found("branch", name))
    }

    fn get_active_mut<'i>(inner: &'i mut BranchesInner, name: &RefName) -> Result<&'i mut Branch> {
        let branch = Self::get_mut(inner, name)?;
        if branch.status == BranchStatus::Archived {
            return Err(CoreError::validation(format!(
                "branch {name} is archived"
            )));
        }
        Ok(branch)
    }
}

static BRANCH_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(BRANCH_NAME_REGEX).expect("hard-coded branch name pattern"));

fn validate_branch_name(name: &RefName) -> Result<()> {
    if !BRANCH_NAME.is_match(name.as_ref()) {
        return Err(CoreError::validation(format!(
            "invalid branch name: {name}"
        )));
    }
    Ok(())
}

fn stale_head(branch: &Branch, expected: Option<&ObjectId>) -> CoreError {
    ConflictError::StaleHead {
        branch: branch.name.to_string(),
        expected: expected.map(ToString::to_string),
        actual: branch.head.as_ref().map(ToString::to_string),
    }
    .into()
}

fn protection(branch: &Branch, rule: &'static str) -> CoreError {
    ConflictError::ProtectionViolation {
        subject: branch.name.to_string(),
        rule,
    }
    .into()
}
