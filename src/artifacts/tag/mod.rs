//! Tags: immutable named pointers into the commit DAG.
//!
//! A tag never moves once created; retagging a name is delete-and-recreate,
//! which keeps the audit trail honest. Release bookkeeping (notes, download
//! counts) lives on the tag record itself.

use chrono::{DateTime, FixedOffset, Local};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::artifacts::branch::ref_name::RefName;
use crate::artifacts::core::{ActorId, ProjectId, TagId};
use crate::artifacts::graph::CommitGraph;
use crate::artifacts::objects::object_id::ObjectId;
use crate::errors::{ConflictError, CoreError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagType {
    Release,
    Milestone,
    Checkpoint,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: TagId,
    pub project_id: ProjectId,
    pub name: RefName,
    pub commit_id: ObjectId,
    pub tag_type: TagType,
    pub is_prerelease: bool,
    pub release_notes: Option<String>,
    pub download_count: u64,
    pub created_by: ActorId,
    pub created_at: DateTime<FixedOffset>,
}

pub struct TagManager {
    project_id: ProjectId,
    tags: RwLock<HashMap<RefName, Tag>>,
    next_id: AtomicU64,
}

impl TagManager {
    pub fn new(project_id: ProjectId) -> Self {
        TagManager {
            project_id,
            tags: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Tag `commit_id` with `name`. The commit must exist and the name must
    /// be free.
    pub fn create_tag(
        &self,
        graph: &CommitGraph,
        name: RefName,
        commit_id: ObjectId,
        tag_type: TagType,
        is_prerelease: bool,
        created_by: ActorId,
    ) -> Result<Tag> {
        if !graph.contains(&commit_id) {
            return Err(CoreError::not_found("commit", &commit_id));
        }

        let mut tags = self.tags.write();
        if tags.contains_key(&name) {
            return Err(ConflictError::Duplicate {
                kind: "tag",
                name: name.to_string(),
            }
            .into());
        }

        let tag = Tag {
            id: TagId(self.next_id.fetch_add(1, Ordering::Relaxed)),
            project_id: self.project_id,
            name: name.clone(),
            commit_id,
            tag_type,
            is_prerelease,
            release_notes: None,
            download_count: 0,
            created_by,
            created_at: Local::now().fixed_offset(),
        };
        tags.insert(name, tag.clone());
        Ok(tag)
    }

    pub fn get(&self, name: &RefName) -> Result<Tag> {
        self.tags
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::not_found("tag", name))
    }

    /// All tags, name-sorted.
    pub fn list(&self) -> Vec<Tag> {
        let mut tags: Vec<Tag> = self.tags.read().values().cloned().collect();
        tags.sort_by(|a, b| a.name.cmp(&b.name));
        tags
    }

    pub fn delete_tag(&self, name: &RefName) -> Result<()> {
        self.tags
            .write()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| CoreError::not_found("tag", name))
    }

    /// Tags pointing at `commit_id`, name-sorted.
    pub fn tags_for_commit(&self, commit_id: &ObjectId) -> Vec<Tag> {
        let mut tags: Vec<Tag> = self
            .tags
            .read()
            .values()
            .filter(|tag| &tag.commit_id == commit_id)
            .cloned()
            .collect();
        tags.sort_by(|a, b| a.name.cmp(&b.name));
        tags
    }

    pub fn set_release_notes(&self, name: &RefName, notes: impl Into<String>) -> Result<Tag> {
        let mut tags = self.tags.write();
        let tag = tags
            .get_mut(name)
            .ok_or_else(|| CoreError::not_found("tag", name))?;
        tag.release_notes = Some(notes.into());
        Ok(tag.clone())
    }

    /// Bump and return the download counter.
    pub fn record_download(&self, name: &RefName) -> Result<u64> {
        let mut tags = self.tags.write();
        let tag = tags
            .get_mut(name)
            .ok_or_else(|| CoreError::not_found("tag", name))?;
        tag.download_count += 1;
        Ok(tag.download_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::core::BranchId;
    use crate::artifacts::objects::commit::{Commit, CommitStats};
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use rstest::*;

    fn name(raw: &str) -> RefName {
        RefName::try_parse(raw).unwrap()
    }

    #[fixture]
    fn world() -> (TagManager, CommitGraph, Commit) {
        let graph = CommitGraph::new();
        let timestamp = FixedOffset::east_opt(0)
            .unwrap()
            .timestamp_opt(1_700_000_000, 0)
            .unwrap();
        let commit = Commit::new(
            ProjectId(1),
            BranchId(1),
            ActorId::new("eng-1"),
            "rev A".into(),
            timestamp,
            vec![],
            ObjectId::hash("tree", b""),
            CommitStats::default(),
        );
        graph.insert(commit.clone()).unwrap();

        (TagManager::new(ProjectId(1)), graph, commit)
    }

    #[rstest]
    fn tags_point_at_existing_commits_only(world: (TagManager, CommitGraph, Commit)) {
        let (tags, graph, _) = world;
        let ghost = ObjectId::hash("commit", b"ghost");

        let err = tags
            .create_tag(
                &graph,
                name("v1.0"),
                ghost,
                TagType::Release,
                false,
                ActorId::new("eng-1"),
            )
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound { kind: "commit", .. }));
    }

    #[rstest]
    fn duplicate_tag_names_are_rejected(world: (TagManager, CommitGraph, Commit)) {
        let (tags, graph, commit) = world;
        tags.create_tag(
            &graph,
            name("v1.0"),
            commit.id().clone(),
            TagType::Release,
            false,
            ActorId::new("eng-1"),
        )
        .unwrap();

        let err = tags
            .create_tag(
                &graph,
                name("v1.0"),
                commit.id().clone(),
                TagType::Release,
                false,
                ActorId::new("eng-2"),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::Conflict(ConflictError::Duplicate { kind: "tag", .. })
        ));
    }

    #[rstest]
    fn commit_lookup_finds_all_its_tags(world: (TagManager, CommitGraph, Commit)) {
        let (tags, graph, commit) = world;
        for (tag_name, tag_type, pre) in [
            ("v1.0-rc1", TagType::Release, true),
            ("v1.0", TagType::Release, false),
            ("design-review", TagType::Milestone, false),
        ] {
            tags.create_tag(
                &graph,
                name(tag_name),
                commit.id().clone(),
                tag_type,
                pre,
                ActorId::new("eng-1"),
            )
            .unwrap();
        }

        let found = tags.tags_for_commit(commit.id());
        let names: Vec<&str> = found.iter().map(|tag| tag.name.as_ref()).collect();
        assert_eq!(names, vec!["design-review", "v1.0", "v1.0-rc1"]);
    }

    #[rstest]
    fn release_bookkeeping_sticks_to_the_tag(world: (TagManager, CommitGraph, Commit)) {
        let (tags, graph, commit) = world;
        tags.create_tag(
            &graph,
            name("v1.0"),
            commit.id().clone(),
            TagType::Release,
            false,
            ActorId::new("eng-1"),
        )
        .unwrap();

        tags.set_release_notes(&name("v1.0"), "First production run").unwrap();
        assert_eq!(tags.record_download(&name("v1.0")).unwrap(), 1);
        assert_eq!(tags.record_download(&name("v1.0")).unwrap(), 2);

        let tag = tags.get(&name("v1.0")).unwrap();
        assert_eq!(tag.release_notes.as_deref(), Some("First production run"));
        assert_eq!(tag.download_count, 2);
    }

    #[rstest]
    fn deleted_tags_are_gone(world: (TagManager, CommitGraph, Commit)) {
        let (tags, graph, commit) = world;
        tags.create_tag(
            &graph,
            name("checkpoint-1"),
            commit.id().clone(),
            TagType::Checkpoint,
            false,
            ActorId::new("eng-1"),
        )
        .unwrap();

        tags.delete_tag(&name("checkpoint-1")).unwrap();
        assert!(tags.get(&name("checkpoint-1")).is_err());
        assert!(tags.delete_tag(&name("checkpoint-1")).is_err());
    }
}
