//! Branch protection rules.
//!
//! A protected branch carries one rule set; every mutating branch operation
//! consults it before touching the head. Defaults are the permissive
//! configuration of an unprotected branch, so `BranchProtectionRules::default()`
//! is safe to attach anywhere.

use serde::{Deserialize, Serialize};

use crate::artifacts::core::ActorId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BranchProtectionRules {
    /// Head may only advance through a pull-request merge.
    pub require_pull_request: bool,
    /// Pull requests need approving reviews before merging.
    pub require_reviews: bool,
    pub min_reviewers: u32,
    /// Pull requests need a recorded passing status check verdict.
    pub require_status_checks: bool,
    /// The source branch must contain the target head at merge time.
    pub require_up_to_date: bool,
    /// Only `allowed_pushers` may advance the head directly.
    pub restrict_pushes: bool,
    pub allowed_pushers: Vec<ActorId>,
    pub allow_force_pushes: bool,
    pub allow_deletions: bool,
    /// Approvals recorded against an older source head are discarded.
    pub dismiss_stale_reviews: bool,
}

impl Default for BranchProtectionRules {
    fn default() -> Self {
        BranchProtectionRules {
            require_pull_request: false,
            require_reviews: false,
            min_reviewers: 1,
            require_status_checks: false,
            require_up_to_date: false,
            restrict_pushes: false,
            allowed_pushers: Vec::new(),
            allow_force_pushes: false,
            allow_deletions: true,
            dismiss_stale_reviews: false,
        }
    }
}

impl BranchProtectionRules {
    /// The usual configuration for a default branch: merges through reviewed
    /// pull requests only, no force pushes, no deletion.
    pub fn strict() -> Self {
        BranchProtectionRules {
            require_pull_request: true,
            require_reviews: true,
            min_reviewers: 1,
            require_status_checks: false,
            require_up_to_date: false,
            restrict_pushes: false,
            allowed_pushers: Vec::new(),
            allow_force_pushes: false,
            allow_deletions: false,
            dismiss_stale_reviews: true,
        }
    }

    pub fn may_push(&self, actor: &ActorId) -> bool {
        !self.restrict_pushes || self.allowed_pushers.contains(actor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unrestricted_rules_let_anyone_push() {
        let rules = BranchProtectionRules::default();
        assert!(rules.may_push(&ActorId::new("anyone")));
    }

    #[test]
    fn restricted_rules_check_the_allow_list() {
        let rules = BranchProtectionRules {
            restrict_pushes: true,
            allowed_pushers: vec![ActorId::new("lead")],
            ..Default::default()
        };

        assert!(rules.may_push(&ActorId::new("lead")));
        assert!(!rules.may_push(&ActorId::new("intern")));
    }
}
