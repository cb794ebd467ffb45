//! Caller-facing seam for the excluded presentation layer.
//!
//! The HTTP/CLI surface lives outside this crate; what it needs from the core
//! is an authenticated-actor resolver, a stable error payload shape, and view
//! types that bundle what one screen renders. [`CoreApi`] is the thin facade
//! a transport adapter wires its handlers to.

use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

use crate::areas::repository::{Repository, Vault};
use crate::artifacts::branch::ref_name::RefName;
use crate::artifacts::core::{Actor, ActorId, ProjectId};
use crate::artifacts::objects::commit::Commit;
use crate::artifacts::tag::Tag;
use crate::errors::{ConflictError, CoreError, Result};
use crate::events::Notifier;

/// Wire shape of every error leaving the core.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorResponse {
    pub status: u16,
    pub code: &'static str,
    pub message: String,
    /// Structured detail for conflicts the caller can act on.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl From<&CoreError> for ErrorResponse {
    fn from(err: &CoreError) -> Self {
        let details = match err {
            CoreError::Conflict(ConflictError::ConflictsRemain { paths }) => {
                Some(json!({ "paths": paths }))
            }
            CoreError::Conflict(ConflictError::MergeBlocked { reasons }) => {
                Some(json!({ "reasons": reasons }))
            }
            CoreError::Conflict(ConflictError::StaleHead {
                branch,
                expected,
                actual,
            }) => Some(json!({
                "branch": branch,
                "expected": expected,
                "actual": actual,
            })),
            _ => None,
        };

        ErrorResponse {
            status: err.status(),
            code: err.code(),
            message: err.to_string(),
            details,
        }
    }
}

/// Resolves a session token to an authenticated actor. Implemented by the
/// external auth collaborator; [`StaticResolver`] serves tests and tools.
pub trait ActorResolver: Send + Sync {
    fn resolve(&self, token: &str) -> Result<Actor>;
}

#[derive(Debug, Default)]
pub struct StaticResolver {
    actors: HashMap<String, Actor>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_actor(mut self, token: impl Into<String>, id: &str, display_name: &str) -> Self {
        self.actors.insert(
            token.into(),
            Actor {
                id: ActorId::new(id),
                display_name: display_name.to_string(),
            },
        );
        self
    }
}

impl ActorResolver for StaticResolver {
    fn resolve(&self, token: &str) -> Result<Actor> {
        self.actors
            .get(token)
            .cloned()
            .ok_or_else(|| CoreError::not_found("session", token))
    }
}

/// One commit as a listing renders it: the record plus the tags pointing at it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommitView {
    pub commit: Commit,
    pub tags: Vec<Tag>,
}

/// The facade a transport adapter talks to.
pub struct CoreApi {
    vault: Vault,
    resolver: Arc<dyn ActorResolver>,
}

impl CoreApi {
    pub fn new(notifier: Arc<dyn Notifier>, resolver: Arc<dyn ActorResolver>) -> Self {
        CoreApi {
            vault: Vault::new(notifier),
            resolver,
        }
    }

    pub fn vault(&self) -> &Vault {
        &self.vault
    }

    pub fn actor(&self, token: &str) -> Result<Actor> {
        self.resolver.resolve(token)
    }

    pub fn create_project(&self, token: &str, name: &str) -> Result<Arc<Repository>> {
        self.resolver.resolve(token)?;
        self.vault.create_project(name)
    }

    pub fn project(&self, id: ProjectId) -> Result<Arc<Repository>> {
        self.vault.project(id)
    }

    /// Branch history decorated with tags, newest commit first.
    pub fn history(&self, project: ProjectId, branch: &RefName) -> Result<Vec<CommitView>> {
        let repo = self.vault.project(project)?;
        let commits = repo.history(branch)?;

        Ok(commits
            .into_iter()
            .map(|commit| {
                let tags = repo.tags().tags_for_commit(commit.id());
                CommitView { commit, tags }
            })
            .collect())
    }
}
