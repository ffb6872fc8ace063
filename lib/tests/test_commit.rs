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
use grit_lib::cancel::CancellationToken;
use grit_lib::commit_builder;
use grit_lib::commit_builder::CommitError;
use grit_lib::commit_builder::CommitOptions;
use grit_lib::object::FileMode;
use grit_lib::refs::RefTarget;
use grit_lib::refs::HEAD;

use crate::common::blob_id;
use crate::common::commit_with_message;
use crate::common::stage_file;
use crate::common::test_signature;
use crate::common::TestRepo;

#[test]
fn test_initial_commit() {
    let test_repo = TestRepo::init();
    let repo = &test_repo.repo;
    stage_file(repo, "README.md", b"# Test Project\n");

    let outcome = commit_with_message(repo, "Initial commit");

    // The commit is reachable through the default branch, and HEAD stays
    // attached to it.
    assert_eq!(
        repo.refs().resolve_to_id("refs/heads/master").unwrap(),
        Some(outcome.id)
    );
    assert_eq!(
        fs::read_to_string(repo.git_dir().join("HEAD")).unwrap(),
        "ref: refs/heads/master\n"
    );
    assert_eq!(outcome.branch.as_deref(), Some("master"));

    let commit = repo.store().read_commit(&outcome.id).unwrap();
    assert_eq!(commit.parents, []);
    assert_eq!(commit.message, "Initial commit");
    assert_eq!(commit.author, test_signature());

    let tree = repo.store().read_tree(&commit.tree).unwrap();
    assert_eq!(tree.entries().len(), 1);
    let entry = &tree.entries()[0];
    assert_eq!(entry.name.as_str(), "README.md");
    assert_eq!(entry.mode, FileMode::Normal);
    assert_eq!(entry.id, blob_id(b"# Test Project\n"));
}

#[test]
fn test_second_commit_links_to_first() {
    let test_repo = TestRepo::init();
    let repo = &test_repo.repo;
    stage_file(repo, "README.md", b"# Test Project\n");
    let first = commit_with_message(repo, "Initial commit");

    stage_file(repo, "main.go", b"package main\n");
    let second = commit_with_message(repo, "Add main.go");

    let commit = repo.store().read_commit(&second.id).unwrap();
    assert_eq!(commit.parents, [first.id]);

    let tree = repo.store().read_tree(&commit.tree).unwrap();
    let names: Vec<_> = tree
        .entries()
        .iter()
        .map(|entry| entry.name.as_str())
        .collect();
    assert_eq!(names, ["README.md", "main.go"]);

    assert_eq!(
        repo.refs().resolve_to_id("refs/heads/master").unwrap(),
        Some(second.id)
    );
}

#[test]
fn test_commit_tree_matches_index() {
    // For every committed state, HEAD's tree expands to the index at commit
    // time.
    let test_repo = TestRepo::init();
    let repo = &test_repo.repo;
    stage_file(repo, "a.txt", b"a");
    stage_file(repo, "dir/b.txt", b"b");
    stage_file(repo, "dir/sub/c.txt", b"c");
    let outcome = commit_with_message(repo, "snapshot");

    let head_id = repo.refs().resolve_to_id(HEAD).unwrap().unwrap();
    assert_eq!(head_id, outcome.id);
    let expanded = grit_lib::working_copy::expand_commit(
        repo.store(),
        &head_id,
        &CancellationToken::new(),
    )
    .unwrap();
    let index = repo.read_index().unwrap().unwrap();
    assert_eq!(expanded.len(), index.len());
    for entry in index.entries() {
        let target = expanded.get(&entry.path).unwrap();
        assert_eq!(target.id, entry.id);
        assert_eq!(target.mode, entry.mode);
    }
}

#[test]
fn test_empty_index_is_rejected() {
    let test_repo = TestRepo::init();
    let repo = &test_repo.repo;
    let result = commit_builder::commit(
        repo,
        &CommitOptions {
            message: "empty".to_owned(),
            author: Some(test_signature()),
            ..CommitOptions::default()
        },
        &CancellationToken::new(),
    );
    assert_matches!(result, Err(CommitError::NoChanges));

    // Explicitly allowed, the empty tree commits fine.
    let outcome = commit_builder::commit(
        repo,
        &CommitOptions {
            message: "empty".to_owned(),
            author: Some(test_signature()),
            allow_empty: true,
            ..CommitOptions::default()
        },
        &CancellationToken::new(),
    )
    .unwrap();
    let commit = repo.store().read_commit(&outcome.id).unwrap();
    assert_eq!(commit.tree, *grit_lib::object::EMPTY_TREE_ID);
}

#[test]
fn test_unchanged_tree_is_rejected() {
    let test_repo = TestRepo::init();
    let repo = &test_repo.repo;
    stage_file(repo, "file.txt", b"content");
    commit_with_message(repo, "first");

    let result = commit_builder::commit(
        repo,
        &CommitOptions {
            message: "same tree".to_owned(),
            author: Some(test_signature()),
            ..CommitOptions::default()
        },
        &CancellationToken::new(),
    );
    assert_matches!(result, Err(CommitError::NoTreeChanges));
}

#[test]
fn test_amend_replaces_head() {
    let test_repo = TestRepo::init();
    let repo = &test_repo.repo;
    stage_file(repo, "file.txt", b"v1");
    let first = commit_with_message(repo, "first");
    stage_file(repo, "file.txt", b"v2");
    let second = commit_with_message(repo, "second");

    let amended = commit_builder::commit(
        repo,
        &CommitOptions {
            message: "second, reworded".to_owned(),
            author: Some(test_signature()),
            amend: true,
            ..CommitOptions::default()
        },
        &CancellationToken::new(),
    )
    .unwrap();

    // The amended commit takes the old commit's parents, not the old commit.
    assert_eq!(amended.parents, [first.id]);
    assert_eq!(
        repo.refs().resolve_to_id(HEAD).unwrap(),
        Some(amended.id)
    );
    // The replaced commit stays in the store, unreachable.
    assert!(repo.store().contains(&second.id));
}

#[test]
fn test_commit_on_detached_head() {
    let test_repo = TestRepo::init();
    let repo = &test_repo.repo;
    stage_file(repo, "file.txt", b"v1");
    let first = commit_with_message(repo, "first");

    repo.refs().set_head_detached(&first.id).unwrap();
    stage_file(repo, "file.txt", b"v2");
    let second = commit_with_message(repo, "detached");

    assert_eq!(second.branch, None);
    assert_eq!(
        repo.refs().head().unwrap(),
        Some(RefTarget::Direct(second.id))
    );
    // The branch did not move.
    assert_eq!(
        repo.refs().resolve_to_id("refs/heads/master").unwrap(),
        Some(first.id)
    );
}

#[test]
fn test_default_branch_from_configuration() {
    let test_repo = TestRepo::init();
    let repo = &test_repo.repo;
    let config_path = repo.git_dir().join("config.json");
    fs::write(&config_path, r#"{"init.defaultbranch": "trunk"}"#).unwrap();
    repo.settings().reload(&config_path).unwrap();
    // Point HEAD at the configured default, as init would have.
    repo.refs().set_head_symbolic("refs/heads/trunk").unwrap();

    stage_file(repo, "file.txt", b"x");
    let outcome = commit_with_message(repo, "first");
    assert_eq!(outcome.branch.as_deref(), Some("trunk"));
    assert_eq!(
        repo.refs().resolve_to_id("refs/heads/trunk").unwrap(),
        Some(outcome.id)
    );
}

#[test]
fn test_configured_identity_is_used() {
    let test_repo = TestRepo::init();
    let repo = &test_repo.repo;
    let config_path = repo.git_dir().join("config.json");
    fs::write(
        &config_path,
        r#"{"user": {"name": "Config User", "email": "config@example.com"}}"#,
    )
    .unwrap();
    repo.settings().reload(&config_path).unwrap();

    stage_file(repo, "file.txt", b"x");
    let outcome = commit_builder::commit(
        repo,
        &CommitOptions::with_message("configured"),
        &CancellationToken::new(),
    )
    .unwrap();
    assert!(!outcome.used_placeholder_identity);

    let commit = repo.store().read_commit(&outcome.id).unwrap();
    assert_eq!(commit.author.name(), "Config User");
    assert_eq!(commit.author.email(), "config@example.com");
    // Committer defaults to the author.
    assert_eq!(commit.committer, commit.author);
}

#[test]
fn test_cancelled_commit() {
    let test_repo = TestRepo::init();
    let repo = &test_repo.repo;
    stage_file(repo, "file.txt", b"x");
    let cancel = CancellationToken::new();
    cancel.cancel();
    let result = commit_builder::commit(
        repo,
        &CommitOptions::with_message("never"),
        &cancel,
    );
    assert_matches!(result, Err(CommitError::Cancelled(_)));
    // Nothing moved.
    assert_eq!(repo.refs().resolve_to_id(HEAD).unwrap(), None);
}

#[test]
fn test_stage_error_names_the_stage() {
    let test_repo = TestRepo::init();
    let repo = &test_repo.repo;
    // Corrupt the index so the first stage fails.
    fs::write(repo.index_path(), b"DIRCgarbage").unwrap();
    let result = commit_builder::commit(
        repo,
        &CommitOptions::with_message("broken"),
        &CancellationToken::new(),
    );
    assert_matches!(result, Err(CommitError::Stage { stage: "read index", .. }));
}
