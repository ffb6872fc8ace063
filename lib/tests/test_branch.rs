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

mod common;

use std::fs;

use assert_matches::assert_matches;
use grit_lib::branch::BranchError;
use grit_lib::branch::Branches;
use grit_lib::object::Blob;
use grit_lib::object::Object;

use crate::common::commit_with_message;
use crate::common::stage_file;
use crate::common::TestRepo;

#[test]
fn test_create_list_delete() {
    let test_repo = TestRepo::init();
    let repo = &test_repo.repo;
    stage_file(repo, "file.txt", b"x");
    let outcome = commit_with_message(repo, "first");
    let branches = Branches::new(repo.refs(), repo.store());

    branches.create("feature/one", &outcome.id).unwrap();
    branches.create("feature/two", &outcome.id).unwrap();
    assert_eq!(
        branches.list().unwrap(),
        ["feature/one", "feature/two", "master"]
    );

    assert_matches!(
        branches.create("feature/one", &outcome.id),
        Err(BranchError::AlreadyExists { .. })
    );

    branches.delete("feature/two").unwrap();
    assert_eq!(branches.list().unwrap(), ["feature/one", "master"]);
    assert_matches!(
        branches.delete("feature/two"),
        Err(BranchError::NotFound { .. })
    );
}

#[test]
fn test_current_branch_cannot_be_deleted() {
    let test_repo = TestRepo::init();
    let repo = &test_repo.repo;
    stage_file(repo, "file.txt", b"x");
    commit_with_message(repo, "first");
    let branches = Branches::new(repo.refs(), repo.store());

    assert_eq!(branches.current().unwrap().as_deref(), Some("master"));
    assert_matches!(
        branches.delete("master"),
        Err(BranchError::IsCurrent { .. })
    );
}

#[test]
fn test_rename_moves_head() {
    let test_repo = TestRepo::init();
    let repo = &test_repo.repo;
    stage_file(repo, "file.txt", b"x");
    let outcome = commit_with_message(repo, "first");
    let branches = Branches::new(repo.refs(), repo.store());

    branches.rename("master", "main", false).unwrap();

    assert_eq!(repo.refs().read_ref("refs/heads/master").unwrap(), None);
    assert_eq!(
        repo.refs().resolve_to_id("refs/heads/main").unwrap(),
        Some(outcome.id)
    );
    assert_eq!(
        fs::read_to_string(repo.git_dir().join("HEAD")).unwrap(),
        "ref: refs/heads/main\n"
    );
    assert_eq!(branches.current().unwrap().as_deref(), Some("main"));
}

#[test]
fn test_rename_respects_force() {
    let test_repo = TestRepo::init();
    let repo = &test_repo.repo;
    stage_file(repo, "file.txt", b"v1");
    let first = commit_with_message(repo, "first");
    let branches = Branches::new(repo.refs(), repo.store());
    branches.create("other", &first.id).unwrap();

    stage_file(repo, "file.txt", b"v2");
    let second = commit_with_message(repo, "second");

    assert_matches!(
        branches.rename("master", "other", false),
        Err(BranchError::AlreadyExists { .. })
    );
    branches.rename("master", "other", true).unwrap();
    assert_eq!(
        repo.refs().resolve_to_id("refs/heads/other").unwrap(),
        Some(second.id)
    );
}

#[test]
fn test_update_moves_existing_branch_only_with_force() {
    let test_repo = TestRepo::init();
    let repo = &test_repo.repo;
    stage_file(repo, "file.txt", b"v1");
    let first = commit_with_message(repo, "first");
    stage_file(repo, "file.txt", b"v2");
    let second = commit_with_message(repo, "second");
    let branches = Branches::new(repo.refs(), repo.store());

    branches.create("pin", &first.id).unwrap();
    assert_matches!(
        branches.update("pin", &second.id, false),
        Err(BranchError::AlreadyExists { .. })
    );
    branches.update("pin", &second.id, true).unwrap();
    assert_eq!(
        repo.refs().resolve_to_id("refs/heads/pin").unwrap(),
        Some(second.id)
    );
}

#[test]
fn test_branch_target_must_be_commit() {
    let test_repo = TestRepo::init();
    let repo = &test_repo.repo;
    let blob = repo
        .store()
        .write(&Object::Blob(Blob::new(b"not a commit".to_vec())))
        .unwrap();
    let branches = Branches::new(repo.refs(), repo.store());
    assert_matches!(
        branches.create("bad", &blob),
        Err(BranchError::NotACommit { .. })
    );
}

#[test]
fn test_detached_head_has_no_current_branch() {
    let test_repo = TestRepo::init();
    let repo = &test_repo.repo;
    stage_file(repo, "file.txt", b"x");
    let outcome = commit_with_message(repo, "first");
    repo.refs().set_head_detached(&outcome.id).unwrap();

    let branches = Branches::new(repo.refs(), repo.store());
    assert_eq!(branches.current().unwrap(), None);
    // With HEAD detached, even the default branch may be deleted.
    branches.delete("master").unwrap();
}

#[test]
fn test_list_with_targets() {
    let test_repo = TestRepo::init();
    let repo = &test_repo.repo;
    stage_file(repo, "file.txt", b"v1");
    let first = commit_with_message(repo, "first");
    stage_file(repo, "file.txt", b"v2");
    let second = commit_with_message(repo, "second");
    let branches = Branches::new(repo.refs(), repo.store());
    branches.create("pin", &first.id).unwrap();

    let infos = branches.list_with_targets().unwrap();
    let summary: Vec<(&str, &str)> = infos
        .iter()
        .map(|info| (info.name.as_str(), if info.target == first.id { "first" } else { "second" }))
        .collect();
    assert_eq!(summary, [("master", "second"), ("pin", "first")]);
}
