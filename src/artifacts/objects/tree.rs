//! Tree snapshots.
//!
//! A `TreeSnapshot` is the full file state at one commit: a flat, sorted
//! mapping from repository path to blob id plus file metadata. The canonical
//! encoding is hashed, so identical directory states collapse to the same
//! tree id regardless of how the mapping was built.
//!
//! ## Encoding
//!
//! One line per entry, paths sorted:
//!
//! ```text
//! <blob-sha> <kind> <0|1>\t<path>\n
//! ```

use bytes::Bytes;
use derive_new::new;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::artifacts::objects::file_kind::FileKind;
use crate::artifacts::objects::object_id::ObjectId;
use crate::errors::{CoreError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, new)]
pub struct TreeEntry {
    pub blob_id: ObjectId,
    pub kind: FileKind,
    pub binary: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeSnapshot {
    entries: BTreeMap<String, TreeEntry>,
}

impl TreeSnapshot {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: impl IntoIterator<Item = (String, TreeEntry)>) -> Result<Self> {
        let mut tree = Self::empty();
        for (path, entry) in entries {
            tree.insert(path, entry)?;
        }
        Ok(tree)
    }

    /// Insert or replace the entry at `path`.
    pub fn insert(&mut self, path: String, entry: TreeEntry) -> Result<()> {
        validate_path(&path)?;
        self.entries.insert(path, entry);
        Ok(())
    }

    /// Remove the entry at `path`; `true` when something was removed.
    pub fn remove(&mut self, path: &str) -> bool {
        self.entries.remove(path).is_some()
    }

    pub fn get(&self, path: &str) -> Option<&TreeEntry> {
        self.entries.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    /// Entries in canonical (path-sorted) order.
    pub fn entries(&self) -> impl Iterator<Item = (&String, &TreeEntry)> {
        self.entries.iter()
    }

    pub fn paths(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Canonical byte encoding; input to the tree id hash.
    pub fn encode(&self) -> Bytes {
        let mut out = String::new();
        for (path, entry) in &self.entries {
            out.push_str(entry.blob_id.as_ref());
            out.push(' ');
            out.push_str(entry.kind.as_str());
            out.push(' ');
            out.push(if entry.binary { '1' } else { '0' });
            out.push('\t');
            out.push_str(path);
            out.push('\n');
        }
        Bytes::from(out)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(bytes)
            .map_err(|err| CoreError::integrity(anyhow::anyhow!("corrupt tree object: {err}")))?;

        let mut tree = Self::empty();
        for line in text.lines() {
            let (meta, path) = line.split_once('\t').ok_or_else(|| {
                CoreError::integrity(anyhow::anyhow!("corrupt tree entry: {line}"))
            })?;

            let mut fields = meta.split(' ');
            let (blob, kind, binary) = match (fields.next(), fields.next(), fields.next()) {
                (Some(blob), Some(kind), Some(binary)) => (blob, kind, binary),
                _ => {
                    return Err(CoreError::integrity(anyhow::anyhow!(
                        "corrupt tree entry: {line}"
                    )))
                }
            };

            let entry = TreeEntry {
                blob_id: ObjectId::try_parse(blob.to_string())
                    .map_err(|err| CoreError::integrity(anyhow::anyhow!("{err}")))?,
                kind: FileKind::try_parse(kind).ok_or_else(|| {
                    CoreError::integrity(anyhow::anyhow!("unknown file kind: {kind}"))
                })?,
                binary: binary == "1",
            };
            tree.entries.insert(path.to_string(), entry);
        }

        Ok(tree)
    }

    /// Content-addressed id of this snapshot.
    pub fn id(&self) -> ObjectId {
        ObjectId::hash("tree", &self.encode())
    }
}

fn validate_path(path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(CoreError::validation("file path cannot be empty"));
    }
    if path.starts_with('/') || path.ends_with('/') {
        return Err(CoreError::validation(format!(
            "file path must be relative: {path}"
        )));
    }
    if path.split('/').any(|segment| segment.is_empty() || segment == "..") {
        return Err(CoreError::validation(format!(
            "file path contains an invalid segment: {path}"
        )));
    }
    if path.chars().any(|c| c.is_control()) {
        return Err(CoreError::validation(
            "file path contains control characters",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn entry(content: &str) -> TreeEntry {
        TreeEntry::new(ObjectId::hash("blob", content.as_bytes()), FileKind::Doc, false)
    }

    #[test]
    fn insertion_order_does_not_change_the_id() {
        let mut forward = TreeSnapshot::empty();
        forward.insert("a.txt".into(), entry("a")).unwrap();
        forward.insert("b/c.txt".into(), entry("c")).unwrap();

        let mut reverse = TreeSnapshot::empty();
        reverse.insert("b/c.txt".into(), entry("c")).unwrap();
        reverse.insert("a.txt".into(), entry("a")).unwrap();

        assert_eq!(forward.id(), reverse.id());
    }

    #[test]
    fn decode_restores_the_canonical_encoding() {
        let mut tree = TreeSnapshot::empty();
        tree.insert("mech/bracket.step".into(), entry("geometry")).unwrap();
        tree.insert("docs/bom.csv".into(), entry("bom")).unwrap();

        let decoded = TreeSnapshot::decode(&tree.encode()).unwrap();
        assert_eq!(decoded, tree);
        assert_eq!(decoded.id(), tree.id());
    }

    #[rstest]
    #[case("")]
    #[case("/abs.txt")]
    #[case("trailing/")]
    #[case("a//b.txt")]
    #[case("../escape.txt")]
    #[case("bad\npath")]
    fn invalid_paths_are_rejected(#[case] path: &str) {
        let mut tree = TreeSnapshot::empty();
        assert!(tree.insert(path.into(), entry("x")).is_err());
    }

    #[test]
    fn empty_snapshot_has_a_stable_id() {
        assert_eq!(TreeSnapshot::empty().id(), TreeSnapshot::empty().id());
        assert!(TreeSnapshot::empty().is_empty());
    }
}
