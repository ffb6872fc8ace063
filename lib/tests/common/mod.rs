// Copyright 2024 The Grit Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Shared scaffolding for the integration tests.

#![allow(dead_code)]

use std::fs;

use grit_lib::cancel::CancellationToken;
use grit_lib::commit_builder;
use grit_lib::commit_builder::CommitOptions;
use grit_lib::commit_builder::CommitOutcome;
use grit_lib::index::IndexEntry;
use grit_lib::object::Blob;
use grit_lib::object::FileMode;
use grit_lib::object::Object;
use grit_lib::object::Signature;
use grit_lib::object::Timestamp;
use grit_lib::object_id::ObjectId;
use grit_lib::repo::Repo;
use grit_lib::repo_path::RepoPathBuf;

/// A repository in a temp directory that lives as long as this value.
pub struct TestRepo {
    pub repo: Repo,
    _temp_dir: tempfile::TempDir,
}

impl TestRepo {
    pub fn init() -> Self {
        let temp_dir = tempfile::tempdir().unwrap();
        let repo = Repo::init(temp_dir.path()).unwrap();
        Self {
            repo,
            _temp_dir: temp_dir,
        }
    }
}

pub fn repo_path(value: &str) -> RepoPathBuf {
    RepoPathBuf::new(value).unwrap()
}

pub fn test_signature() -> Signature {
    Signature::new(
        "Test User",
        "test@example.com",
        Timestamp {
            seconds: 1_700_000_000,
            tz_offset_minutes: 0,
        },
    )
    .unwrap()
}

/// The id the store assigns to a blob with these bytes.
pub fn blob_id(content: &[u8]) -> ObjectId {
    grit_lib::object::hash(&grit_lib::object::serialize(&Object::Blob(Blob::new(
        content.to_vec(),
    ))))
}

/// Writes `content` into the working copy, stores the blob, and stages it.
pub fn stage_file(repo: &Repo, path: &str, content: &[u8]) -> ObjectId {
    let path = repo_path(path);
    let disk_path = path.to_fs_path(repo.root());
    if let Some(parent) = disk_path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&disk_path, content).unwrap();
    let id = repo
        .store()
        .write(&Object::Blob(Blob::new(content.to_vec())))
        .unwrap();
    let metadata = fs::metadata(&disk_path).unwrap();
    let mut index = repo.read_index().unwrap().unwrap_or_default();
    index.add(IndexEntry::from_fs(path, id, FileMode::Normal, &metadata));
    repo.write_index(&index).unwrap();
    id
}

/// Removes `path` from both the index and the working copy.
pub fn unstage_file(repo: &Repo, path: &str) {
    let path = repo_path(path);
    let mut index = repo.read_index().unwrap().unwrap_or_default();
    index.remove(&path);
    repo.write_index(&index).unwrap();
    let disk_path = path.to_fs_path(repo.root());
    if disk_path.exists() {
        fs::remove_file(disk_path).unwrap();
    }
}

/// Commits the staged state with a fixed test author.
pub fn commit_with_message(repo: &Repo, message: &str) -> CommitOutcome {
    commit_builder::commit(
        repo,
        &CommitOptions {
            message: message.to_owned(),
            author: Some(test_signature()),
            ..CommitOptions::default()
        },
        &CancellationToken::new(),
    )
    .unwrap()
}

/// Reads a working-copy file.
pub fn read_work_file(repo: &Repo, path: &str) -> Vec<u8> {
    fs::read(repo_path(path).to_fs_path(repo.root())).unwrap()
}

/// Overwrites a working-copy file without touching the index.
pub fn write_work_file(repo: &Repo, path: &str, content: &[u8]) {
    let disk_path = repo_path(path).to_fs_path(repo.root());
    if let Some(parent) = disk_path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(disk_path, content).unwrap();
}

pub fn work_file_exists(repo: &Repo, path: &str) -> bool {
    repo_path(path).to_fs_path(repo.root()).exists()
}

/// Looks up a tree entry id by entry name.
pub fn tree_entry_id(repo: &Repo, tree_id: &ObjectId, name: &str) -> ObjectId {
    let tree = repo.store().read_tree(tree_id).unwrap();
    tree.entry(name)
        .unwrap_or_else(|| panic!("no tree entry named {name}"))
        .id
}

/// The paths currently in the index, in order.
pub fn index_paths(repo: &Repo) -> Vec<String> {
    repo.read_index()
        .unwrap()
        .unwrap_or_default()
        .paths()
        .map(|path| path.as_str().to_owned())
        .collect()
}
