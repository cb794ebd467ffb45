//! Validated branch and tag names.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

use crate::artifacts::branch::INVALID_REF_NAME_REGEX;
use crate::errors::{CoreError, Result};

static INVALID_REF_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(INVALID_REF_NAME_REGEX).expect("hard-coded ref name pattern"));

/// A validated ref name, shared by branches and tags.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, Default, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct RefName(String);

impl RefName {
    pub fn try_parse(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(CoreError::validation("ref name cannot be empty"));
        }

        if INVALID_REF_NAME.is_match(&name) {
            return Err(CoreError::validation(format!("invalid ref name: {name}")));
        }
        if name.split('/').any(str::is_empty) {
            return Err(CoreError::validation(format!("invalid ref name: {name}")));
        }

        Ok(Self(name))
    }
}

impl AsRef<str> for RefName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RefName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::proptest;

    proptest! {
        #[test]
        fn plain_names_are_valid(name in "[a-zA-Z0-9_-]+") {
            assert!(RefName::try_parse(name).is_ok());
        }

        #[test]
        fn hierarchical_names_are_valid(
            prefix in "[a-zA-Z0-9_-]+",
            suffix in "[a-zA-Z0-9_-]+"
        ) {
            assert!(RefName::try_parse(format!("{}/{}", prefix, suffix)).is_ok());
        }

        #[test]
        fn leading_dot_is_rejected(suffix in "[a-zA-Z0-9_-]+") {
            assert!(RefName::try_parse(format!(".{}", suffix)).is_err());
        }

        #[test]
        fn whitespace_is_rejected(
            prefix in "[a-zA-Z0-9_-]+",
            suffix in "[a-zA-Z0-9_-]+"
        ) {
            assert!(RefName::try_parse(format!("{} {}", prefix, suffix)).is_err());
        }

        #[test]
        fn trailing_slash_is_rejected(prefix in "[a-zA-Z0-9_-]+") {
            assert!(RefName::try_parse(format!("{}/", prefix)).is_err());
        }
    }

    #[test]
    fn double_slash_and_special_names_are_rejected() {
        for name in ["", "a//b", "..", "wip..next", "release.lock", "a@{b}", "v1?"] {
            assert!(RefName::try_parse(name).is_err(), "accepted {name:?}");
        }
    }
}
