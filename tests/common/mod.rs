//! Shared world for the integration suites: one project with helpers for
//! committing snapshots, branching and opening pull requests.

#![allow(dead_code)]

use std::sync::Arc;

use rivet::areas::repository::{Repository, Vault};
use rivet::artifacts::branch::ref_name::RefName;
use rivet::artifacts::core::{ActorId, CancelToken};
use rivet::artifacts::objects::blob::Blob;
use rivet::artifacts::objects::commit::Commit;
use rivet::artifacts::objects::file_kind::FileKind;
use rivet::artifacts::objects::tree::{TreeEntry, TreeSnapshot};
use rivet::artifacts::pull_request::{OpenPullRequest, PullRequest};
use rivet::events::CollectingNotifier;

pub struct World {
    pub vault: Vault,
    pub repo: Arc<Repository>,
    pub notifier: Arc<CollectingNotifier>,
    pub cancel: CancelToken,
}

impl World {
    pub fn new() -> Self {
        let notifier = Arc::new(CollectingNotifier::new());
        let vault = Vault::new(notifier.clone());
        let repo = vault.create_project("drone-controller").unwrap();
        World {
            vault,
            repo,
            notifier,
            cancel: CancelToken::new(),
        }
    }

    pub fn tree(&self, files: &[(&str, &str)]) -> TreeSnapshot {
        let mut tree = TreeSnapshot::empty();
        for (path, content) in files {
            let blob = Blob::from_text(content);
            let id = self.repo.store().put_blob(blob.data().clone()).unwrap();
            tree.insert(
                path.to_string(),
                TreeEntry::new(id, FileKind::from_path(path), blob.is_binary()),
            )
            .unwrap();
        }
        tree
    }

    /// Commit a full snapshot on `branch` as `author`, against its current head.
    pub fn commit_as(&self, author: &str, branch: &str, files: &[(&str, &str)]) -> Commit {
        let branch_name = name(branch);
        let head = self.repo.branches().get(&branch_name).unwrap().head;
        self.repo
            .commit(
                &branch_name,
                &ActorId::new(author),
                format!("snapshot on {branch}"),
                self.tree(files),
                head.as_ref(),
                &self.cancel,
            )
            .unwrap()
    }

    pub fn commit_on(&self, branch: &str, files: &[(&str, &str)]) -> Commit {
        self.commit_as("eng-1", branch, files)
    }

    pub fn branch(&self, new: &str, from: &str) {
        self.repo
            .create_branch(name(new), Some(&name(from)))
            .unwrap();
    }

    pub fn open_pull(&self, source: &str, target: &str, reviewers: &[&str]) -> PullRequest {
        self.repo
            .open_pull_request(
                OpenPullRequest {
                    title: format!("merge {source}"),
                    description: String::new(),
                    author: ActorId::new("eng-1"),
                    source_branch: name(source),
                    target_branch: name(target),
                    draft: false,
                    reviewers: reviewers.iter().map(|r| ActorId::new(*r)).collect(),
                },
                &self.cancel,
            )
            .unwrap()
    }

    pub fn file_text(&self, commit: &rivet::artifacts::objects::object_id::ObjectId, path: &str) -> String {
        let tree = self.repo.snapshot(commit).unwrap();
        let entry = tree.get(path).unwrap();
        String::from_utf8(self.repo.store().get_blob(&entry.blob_id).unwrap().to_vec()).unwrap()
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

pub fn name(raw: &str) -> RefName {
    RefName::try_parse(raw).unwrap()
}

pub fn actor(id: &str) -> ActorId {
    ActorId::new(id)
}
