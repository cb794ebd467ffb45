//! Tree-to-tree change tracking.
//!
//! Compares two tree snapshots and reports per-file changes, with a second
//! pass that folds added/deleted pairs into renames and moves. Identical blob
//! ids short-circuit without touching content, so unchanged CAD files are
//! never read.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::areas::object_store::ObjectStore;
use crate::artifacts::core::CancelToken;
use crate::artifacts::diff::line_diff;
use crate::artifacts::objects::blob::Blob;
use crate::artifacts::objects::commit::CommitStats;
use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::objects::tree::{TreeEntry, TreeSnapshot};
use crate::errors::{CoreError, Result};

/// Content similarity (shared-line fraction) above which an added/deleted
/// pair with different blobs is still treated as a rename.
pub const RENAME_SIMILARITY_THRESHOLD: f64 = 0.5;

bitflags! {
    /// Which change kinds a diff listing should include.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DiffFilter: u8 {
        const ADDED = 0b00001;
        const DELETED = 0b00010;
        const MODIFIED = 0b00100;
        const RENAMED = 0b01000;
        const MOVED = 0b10000;
        const ALL = Self::ADDED.bits()
            | Self::DELETED.bits()
            | Self::MODIFIED.bits()
            | Self::RENAMED.bits()
            | Self::MOVED.bits();
    }
}

impl DiffFilter {
    /// Parse a comma-separated filter such as `"added,modified"`.
    pub fn try_parse(spec: &str) -> Result<Self> {
        let mut filter = DiffFilter::empty();
        for token in spec.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            filter |= match token {
                "added" => DiffFilter::ADDED,
                "deleted" => DiffFilter::DELETED,
                "modified" => DiffFilter::MODIFIED,
                "renamed" => DiffFilter::RENAMED,
                "moved" => DiffFilter::MOVED,
                "all" => DiffFilter::ALL,
                other => {
                    return Err(CoreError::validation(format!(
                        "unknown diff filter: {other}"
                    )))
                }
            };
        }

        if filter.is_empty() {
            Ok(DiffFilter::ALL)
        } else {
            Ok(filter)
        }
    }

    pub fn matches(&self, change_type: ChangeType) -> bool {
        self.contains(match change_type {
            ChangeType::Added => DiffFilter::ADDED,
            ChangeType::Deleted => DiffFilter::DELETED,
            ChangeType::Modified => DiffFilter::MODIFIED,
            ChangeType::Renamed => DiffFilter::RENAMED,
            ChangeType::Moved => DiffFilter::MOVED,
        })
    }
}

impl Default for DiffFilter {
    fn default() -> Self {
        DiffFilter::ALL
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Added,
    Modified,
    Deleted,
    Renamed,
    Moved,
}

/// Resolution state carried on changes that were part of a conflicted merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStatus {
    Unresolved,
    Resolved,
}

/// One file-level change between two trees.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    pub path: String,
    pub change_type: ChangeType,
    /// Previous path for renames and moves.
    pub old_path: Option<String>,
    pub blob_before: Option<ObjectId>,
    pub blob_after: Option<ObjectId>,
    pub lines_added: usize,
    pub lines_removed: usize,
    pub binary: bool,
    pub conflict_status: Option<ConflictStatus>,
}

/// Computes file changes between tree snapshots against one object store.
pub struct ChangeTracker<'s> {
    store: &'s ObjectStore,
}

impl<'s> ChangeTracker<'s> {
    pub fn new(store: &'s ObjectStore) -> Self {
        ChangeTracker { store }
    }

    /// All changes turning `before` into `after`, path-sorted, with renames
    /// and moves folded.
    pub fn diff(
        &self,
        before: &TreeSnapshot,
        after: &TreeSnapshot,
        cancel: &CancelToken,
    ) -> Result<Vec<FileChange>> {
        let mut changes = BTreeMap::<String, FileChange>::new();

        for (path, entry) in before.entries() {
            cancel.check()?;
            match after.get(path) {
                None => {
                    changes.insert(path.clone(), self.deleted(path, entry)?);
                }
                Some(after_entry) if after_entry.blob_id != entry.blob_id => {
                    changes.insert(path.clone(), self.modified(path, entry, after_entry)?);
                }
                Some(_) => {}
            }
        }

        for (path, entry) in after.entries() {
            cancel.check()?;
            if !before.contains(path) {
                changes.insert(path.clone(), self.added(path, entry)?);
            }
        }

        self.fold_renames(&mut changes, cancel)?;
        Ok(changes.into_values().collect())
    }

    /// Aggregate counts over a change list, as recorded on commits.
    pub fn stats(changes: &[FileChange]) -> CommitStats {
        CommitStats {
            files_changed: changes.len(),
            lines_added: changes.iter().map(|c| c.lines_added).sum(),
            lines_removed: changes.iter().map(|c| c.lines_removed).sum(),
        }
    }

    fn load(&self, id: &ObjectId) -> Result<Blob> {
        Ok(Blob::new(self.store.get_blob(id)?))
    }

    fn added(&self, path: &str, entry: &TreeEntry) -> Result<FileChange> {
        let blob = self.load(&entry.blob_id)?;
        let binary = entry.binary || blob.is_binary();
        let lines_added = blob.text_lines().map(|lines| lines.len()).unwrap_or(0);

        Ok(FileChange {
            path: path.to_string(),
            change_type: ChangeType::Added,
            old_path: None,
            blob_before: None,
            blob_after: Some(entry.blob_id.clone()),
            lines_added: if binary { 0 } else { lines_added },
            lines_removed: 0,
            binary,
            conflict_status: None,
        })
    }

    fn deleted(&self, path: &str, entry: &TreeEntry) -> Result<FileChange> {
        let blob = self.load(&entry.blob_id)?;
        let binary = entry.binary || blob.is_binary();
        let lines_removed = blob.text_lines().map(|lines| lines.len()).unwrap_or(0);

        Ok(FileChange {
            path: path.to_string(),
            change_type: ChangeType::Deleted,
            old_path: None,
            blob_before: Some(entry.blob_id.clone()),
            blob_after: None,
            lines_added: 0,
            lines_removed: if binary { 0 } else { lines_removed },
            binary,
            conflict_status: None,
        })
    }

    fn modified(&self, path: &str, before: &TreeEntry, after: &TreeEntry) -> Result<FileChange> {
        let old_blob = self.load(&before.blob_id)?;
        let new_blob = self.load(&after.blob_id)?;
        let binary =
            before.binary || after.binary || old_blob.is_binary() || new_blob.is_binary();

        let (lines_added, lines_removed) = if binary {
            (0, 0)
        } else {
            match (old_blob.text_lines(), new_blob.text_lines()) {
                (Some(old_lines), Some(new_lines)) => {
                    line_diff::diff_counts(&old_lines, &new_lines)
                }
                _ => (0, 0),
            }
        };

        Ok(FileChange {
            path: path.to_string(),
            change_type: ChangeType::Modified,
            old_path: None,
            blob_before: Some(before.blob_id.clone()),
            blob_after: Some(after.blob_id.clone()),
            lines_added,
            lines_removed,
            binary,
            conflict_status: None,
        })
    }

    /// Fold added/deleted pairs into renames (same directory) or moves
    /// (different directory): first by exact blob id, then by content
    /// similarity for text files.
    fn fold_renames(
        &self,
        changes: &mut BTreeMap<String, FileChange>,
        cancel: &CancelToken,
    ) -> Result<()> {
        let added: Vec<String> = changes
            .values()
            .filter(|c| c.change_type == ChangeType::Added)
            .map(|c| c.path.clone())
            .collect();
        let mut deleted: Vec<String> = changes
            .values()
            .filter(|c| c.change_type == ChangeType::Deleted)
            .map(|c| c.path.clone())
            .collect();

        for added_path in added {
            cancel.check()?;

            let added_blob = changes[&added_path].blob_after.clone();
            let mut matched: Option<String> = None;

            // Exact content match wins when it is unambiguous.
            let exact: Vec<&String> = deleted
                .iter()
                .filter(|path| changes[*path].blob_before == added_blob)
                .collect();
            if exact.len() == 1 {
                matched = Some(exact[0].clone());
            }

            if matched.is_none() && !changes[&added_path].binary {
                if let Some(blob_after) = &added_blob {
                    let new_lines = self.load(blob_after)?.text_lines();
                    if let Some(new_lines) = new_lines {
                        matched = self.best_similar(&deleted, &new_lines, changes)?;
                    }
                }
            }

            let (Some(old_path), Some(removed)) = (
                matched.clone(),
                matched.and_then(|path| changes.remove(&path)),
            ) else {
                continue;
            };
            deleted.retain(|path| path != &old_path);

            let (lines_added, lines_removed) =
                match (&removed.blob_before, &added_blob) {
                    (Some(before), Some(after)) if before == after => (0, 0),
                    (Some(before), Some(after)) if !changes[&added_path].binary => {
                        let old = self.load(before)?.text_lines();
                        let new = self.load(after)?.text_lines();
                        match (old, new) {
                            (Some(old), Some(new)) => line_diff::diff_counts(&old, &new),
                            _ => (0, 0),
                        }
                    }
                    _ => (0, 0),
                };

            if let Some(change) = changes.get_mut(&added_path) {
                change.change_type = classify_rename(&old_path, &added_path);
                change.old_path = Some(old_path);
                change.blob_before = removed.blob_before;
                change.lines_added = lines_added;
                change.lines_removed = lines_removed;
            }
        }

        Ok(())
    }

    fn best_similar(
        &self,
        deleted: &[String],
        new_lines: &[String],
        changes: &BTreeMap<String, FileChange>,
    ) -> Result<Option<String>> {
        let mut best: Option<(String, f64)> = None;

        for path in deleted {
            let change = &changes[path];
            if change.binary {
                continue;
            }
            let Some(blob_before) = &change.blob_before else {
                continue;
            };
            let Some(old_lines) = self.load(blob_before)?.text_lines() else {
                continue;
            };

            let score = line_diff::similarity(&old_lines, new_lines);
            if score >= RENAME_SIMILARITY_THRESHOLD
                && best.as_ref().map(|(_, s)| score > *s).unwrap_or(true)
            {
                best = Some((path.clone(), score));
            }
        }

        Ok(best.map(|(path, _)| path))
    }
}

fn classify_rename(old_path: &str, new_path: &str) -> ChangeType {
    let (old_dir, old_name) = old_path.rsplit_once('/').unwrap_or(("", old_path));
    let (new_dir, new_name) = new_path.rsplit_once('/').unwrap_or(("", new_path));

    if old_dir != new_dir && old_name == new_name {
        ChangeType::Moved
    } else {
        ChangeType::Renamed
    }
}
