//! Error taxonomy for the version-control core.
//!
//! Four classes, mapped onto the caller-facing status codes by [`CoreError::status`]:
//!
//! - `Validation`: caller-fixable input problems, surfaced verbatim.
//! - `NotFound`: unknown branch/commit/tag/pull-request ids.
//! - `Conflict`: semantic conflicts (stale heads, unresolved merge conflicts,
//!   protection rules, duplicates). Retry is the caller's decision; the core
//!   never retries on its own.
//! - `Integrity`: a core invariant was violated upstream. Non-retryable, logged
//!   loudly, never patched over.

use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    #[error(transparent)]
    Conflict(#[from] ConflictError),

    #[error("integrity violation: {0}")]
    Integrity(#[source] anyhow::Error),

    #[error("operation cancelled")]
    Cancelled,
}

impl CoreError {
    pub fn validation(message: impl Into<String>) -> Self {
        CoreError::Validation(message.into())
    }

    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        CoreError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub fn integrity(error: impl Into<anyhow::Error>) -> Self {
        CoreError::Integrity(error.into())
    }

    /// HTTP-equivalent status for the excluded presentation layer.
    pub fn status(&self) -> u16 {
        match self {
            CoreError::Validation(_) => 400,
            CoreError::NotFound { .. } => 404,
            CoreError::Conflict(conflict) => conflict.status(),
            CoreError::Integrity(_) => 500,
            CoreError::Cancelled => 499,
        }
    }

    /// Stable machine-readable code for API error payloads.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::Validation(_) => "validation",
            CoreError::NotFound { .. } => "not_found",
            CoreError::Conflict(conflict) => conflict.code(),
            CoreError::Integrity(_) => "integrity",
            CoreError::Cancelled => "cancelled",
        }
    }
}

/// Semantic conflicts carry enough structured detail (which paths, which rule)
/// for the caller to decide between retry and manual resolution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConflictError {
    /// Compare-and-swap failure: the branch head moved since the caller read it.
    #[error("stale head on branch {branch}: expected {expected:?}, found {actual:?}")]
    StaleHead {
        branch: String,
        expected: Option<String>,
        actual: Option<String>,
    },

    #[error("merge has unresolved conflicts: {}", paths.join(", "))]
    ConflictsRemain { paths: Vec<String> },

    #[error("protection rule {rule} forbids this operation on {subject}")]
    ProtectionViolation { subject: String, rule: &'static str },

    #[error("{kind} {name} already exists")]
    Duplicate { kind: &'static str, name: String },

    #[error("merge blocked: {reasons:?}")]
    MergeBlocked { reasons: Vec<BlockReason> },
}

impl ConflictError {
    pub fn status(&self) -> u16 {
        match self {
            ConflictError::ProtectionViolation { .. } => 403,
            _ => 409,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ConflictError::StaleHead { .. } => "stale_head",
            ConflictError::ConflictsRemain { .. } => "conflicts_remain",
            ConflictError::ProtectionViolation { .. } => "protection_violation",
            ConflictError::Duplicate { .. } => "duplicate",
            ConflictError::MergeBlocked { .. } => "blocked",
        }
    }
}

/// Why a pull-request merge was refused. Returned inside
/// [`ConflictError::MergeBlocked`] so callers can render actionable messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    Draft,
    Closed,
    AlreadyMerged,
    NotMergeable,
    InsufficientReviews { required: u32, approved: u32 },
    ChangesRequested { reviewer: String },
    OutOfDate,
    StatusChecksMissing,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn status_mapping_follows_the_taxonomy() {
        assert_eq!(CoreError::validation("bad name").status(), 400);
        assert_eq!(CoreError::not_found("branch", 7).status(), 404);
        assert_eq!(
            CoreError::from(ConflictError::Duplicate {
                kind: "tag",
                name: "v1".into(),
            })
            .status(),
            409
        );
        assert_eq!(
            CoreError::from(ConflictError::ProtectionViolation {
                subject: "main".into(),
                rule: "allow_deletions",
            })
            .status(),
            403
        );
        assert_eq!(
            CoreError::integrity(anyhow::anyhow!("corrupt tree")).status(),
            500
        );
    }

    #[test]
    fn conflict_errors_keep_structured_detail() {
        let err = ConflictError::ConflictsRemain {
            paths: vec!["bom.csv".into(), "enclosure.step".into()],
        };
        assert_eq!(err.to_string().contains("bom.csv"), true);
        assert_eq!(err.code(), "conflicts_remain");
    }
}
