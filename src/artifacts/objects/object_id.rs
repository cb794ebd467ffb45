//! Object identifier (SHA-1 hash).
//!
//! Identical content always hashes to the same id, which is what makes every
//! store write an insert-or-noop.

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::fmt::Write as _;
use std::path::PathBuf;

use crate::artifacts::objects::OBJECT_ID_LENGTH;
use crate::errors::{CoreError, Result};

/// 40-character lowercase hexadecimal SHA-1 identifying a blob, tree or commit.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, Default, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ObjectId(String);

impl ObjectId {
    /// Hash framed content: `<object_type> <len>\0<content>`.
    pub fn hash(object_type: &str, content: &[u8]) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(format!("{} {}\0", object_type, content.len()).as_bytes());
        hasher.update(content);

        let digest = hasher.finalize();
        let mut hex = String::with_capacity(OBJECT_ID_LENGTH);
        for byte in digest {
            let _ = write!(hex, "{:02x}", byte);
        }

        ObjectId(hex)
    }

    /// Parse and validate an id received from outside the core.
    pub fn try_parse(id: String) -> Result<Self> {
        if id.len() != OBJECT_ID_LENGTH {
            return Err(CoreError::validation(format!(
                "invalid object id length: {}",
                id.len()
            )));
        }
        if !id.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(CoreError::validation(format!(
                "invalid object id characters: {id}"
            )));
        }

        Ok(ObjectId(id.to_lowercase()))
    }

    /// Fan-out path for on-disk storage: `XX/YYYY...` (first 2 chars as dir).
    pub fn to_path(&self) -> PathBuf {
        let (dir, file) = self.0.split_at(2);
        PathBuf::from(dir).join(file)
    }

    /// First 7 characters, for log output.
    pub fn to_short(&self) -> &str {
        &self.0[..7]
    }
}

impl AsRef<str> for ObjectId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
