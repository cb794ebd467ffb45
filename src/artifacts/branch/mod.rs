//! Branches: validated names, protection rules and the head table.

pub mod manager;
pub mod protection;
pub mod ref_name;

pub use manager::{AdvanceContext, Branch, BranchManager, BranchStatus, HeadChanged};
pub use protection::BranchProtectionRules;
pub use ref_name::RefName;

/// Deny-list for general ref names: leading dot or slash, `..`, trailing
/// slash or `.lock`, `@{`, and control/special characters. Tags use this
/// alone, so dotted release names like `v1.0` stay valid.
pub const INVALID_REF_NAME_REGEX: &str =
    r"^\.|\/\.|\.\.|^\/|\/$|\.lock$|@\{|[\x00-\x20\*:\?\[\\~\^\x7f]";

/// Branch names are held to a stricter allow-list: alphanumerics,
/// underscore, hyphen and slash-separated segments.
pub const BRANCH_NAME_REGEX: &str = r"^[A-Za-z0-9_\-/]+$";
