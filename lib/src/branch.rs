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

//! Branch lifecycle, layered on the reference store.
//!
//! A branch is a validated name plus the reference `refs/heads/<name>`
//! pointing at a commit. Names may contain `/`, so a branch namespace is a
//! directory tree under `refs/heads/`.

use rayon::prelude::*;
use thiserror::Error;

use crate::object_id::ObjectId;
use crate::object_store::ObjectStore;
use crate::object_store::ObjectStoreError;
use crate::refs::RefError;
use crate::refs::RefStore;
use crate::refs::RefTarget;
use crate::refs::HEADS_PREFIX;

#[derive(Debug, Error)]
pub enum BranchError {
    #[error("Invalid branch name {name:?}: {reason}")]
    InvalidName { name: String, reason: &'static str },
    #[error("Branch {name} already exists")]
    AlreadyExists { name: String },
    #[error("Branch {name} not found")]
    NotFound { name: String },
    #[error("Branch {name} is checked out and cannot be deleted")]
    IsCurrent { name: String },
    #[error("Branch target {hash} is not a commit")]
    NotACommit { hash: String },
    #[error(transparent)]
    Ref(#[from] RefError),
    #[error(transparent)]
    Store(#[from] ObjectStoreError),
}

pub type BranchResult<T> = Result<T, BranchError>;

/// A branch name and the commit it points at.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BranchInfo {
    pub name: String,
    pub target: ObjectId,
}

/// Branch operations over a repository's references and objects.
#[derive(Clone, Copy, Debug)]
pub struct Branches<'a> {
    refs: &'a RefStore,
    store: &'a ObjectStore,
}

impl<'a> Branches<'a> {
    pub fn new(refs: &'a RefStore, store: &'a ObjectStore) -> Self {
        Self { refs, store }
    }

    fn ref_path(name: &str) -> String {
        format!("{HEADS_PREFIX}/{name}")
    }

    fn require_commit(&self, target: &ObjectId) -> BranchResult<()> {
        self.store
            .read_commit(target)
            .map_err(|err| match err {
                ObjectStoreError::UnexpectedKind { hash, .. } => {
                    BranchError::NotACommit { hash }
                }
                other => BranchError::Store(other),
            })
            .map(|_| ())
    }

    /// Creates a branch pointing at `target`. Fails if the branch exists.
    pub fn create(&self, name: &str, target: &ObjectId) -> BranchResult<()> {
        validate_branch_name(name)?;
        self.require_commit(target)?;
        let ref_path = Self::ref_path(name);
        if self.refs.read_ref(&ref_path)?.is_some() {
            return Err(BranchError::AlreadyExists {
                name: name.to_owned(),
            });
        }
        self.refs.update_ref(&ref_path, target)?;
        tracing::debug!(name, target = %target, "created branch");
        Ok(())
    }

    /// Moves a branch to `target`. With `force`, an existing branch is
    /// overwritten; without it, the branch must not exist.
    pub fn update(&self, name: &str, target: &ObjectId, force: bool) -> BranchResult<()> {
        validate_branch_name(name)?;
        self.require_commit(target)?;
        let ref_path = Self::ref_path(name);
        if !force && self.refs.read_ref(&ref_path)?.is_some() {
            return Err(BranchError::AlreadyExists {
                name: name.to_owned(),
            });
        }
        self.refs.update_ref(&ref_path, target)?;
        Ok(())
    }

    /// Deletes a branch. The branch HEAD is attached to cannot be deleted.
    pub fn delete(&self, name: &str) -> BranchResult<()> {
        validate_branch_name(name)?;
        if self.current()?.as_deref() == Some(name) {
            return Err(BranchError::IsCurrent {
                name: name.to_owned(),
            });
        }
        if !self.refs.delete_ref(&Self::ref_path(name))? {
            return Err(BranchError::NotFound {
                name: name.to_owned(),
            });
        }
        Ok(())
    }

    /// Renames `old` to `new`, moving the stored hash. If HEAD was attached
    /// to `old`, it is re-attached to `new`.
    pub fn rename(&self, old: &str, new: &str, force: bool) -> BranchResult<()> {
        validate_branch_name(old)?;
        validate_branch_name(new)?;
        let old_ref = Self::ref_path(old);
        let new_ref = Self::ref_path(new);
        let target = match self.refs.read_ref(&old_ref)? {
            Some(RefTarget::Direct(id)) => id,
            _ => {
                return Err(BranchError::NotFound {
                    name: old.to_owned(),
                })
            }
        };
        if !force && self.refs.read_ref(&new_ref)?.is_some() {
            return Err(BranchError::AlreadyExists {
                name: new.to_owned(),
            });
        }
        let head_was_old = self.current()?.as_deref() == Some(old);
        self.refs.update_ref(&new_ref, &target)?;
        self.refs.delete_ref(&old_ref)?;
        if head_was_old {
            self.refs.set_head_symbolic(&new_ref)?;
        }
        tracing::debug!(old, new, "renamed branch");
        Ok(())
    }

    /// The branch HEAD is attached to, or `None` when HEAD is detached.
    pub fn current(&self) -> BranchResult<Option<String>> {
        match self.refs.head()? {
            Some(RefTarget::Symbolic(target)) => Ok(target
                .strip_prefix(&format!("{HEADS_PREFIX}/"))
                .map(str::to_owned)),
            _ => Ok(None),
        }
    }

    /// All branch names, with directory separators preserved, sorted.
    pub fn list(&self) -> BranchResult<Vec<String>> {
        let prefix = format!("{HEADS_PREFIX}/");
        Ok(self
            .refs
            .list_refs(HEADS_PREFIX)?
            .into_iter()
            .filter_map(|name| name.strip_prefix(&prefix).map(str::to_owned))
            .collect())
    }

    /// All branches with their resolved tips. Tips are read-only lookups, so
    /// they are resolved in parallel and gathered in name order.
    pub fn list_with_targets(&self) -> BranchResult<Vec<BranchInfo>> {
        let names = self.list()?;
        names
            .into_par_iter()
            .map(|name| {
                let target = self
                    .refs
                    .resolve_to_id(&Self::ref_path(&name))?
                    .ok_or_else(|| BranchError::NotFound { name: name.clone() })?;
                Ok(BranchInfo { name, target })
            })
            .collect()
    }
}

/// Validates a branch name, naming the first violated rule.
pub fn validate_branch_name(name: &str) -> BranchResult<()> {
    let fail = |reason| {
        Err(BranchError::InvalidName {
            name: name.to_owned(),
            reason,
        })
    };
    if name.is_empty() {
        return fail("name must not be empty");
    }
    if name.starts_with('.') {
        return fail("name must not start with '.'");
    }
    if name.ends_with('/') {
        return fail("name must not end with '/'");
    }
    if name.ends_with(".lock") {
        return fail("name must not end with '.lock'");
    }
    if name.contains("..") {
        return fail("name must not contain '..'");
    }
    if name.contains("@{") {
        return fail("name must not contain '@{'");
    }
    if name.contains("//") {
        return fail("name must not contain consecutive slashes");
    }
    if name
        .chars()
        .any(|c| c.is_ascii_control() || " ~^:?*[\\".contains(c))
    {
        return fail("name contains a forbidden character");
    }
    // Embedded directory levels re-apply the leading-dot and lock rules.
    if name
        .split('/')
        .any(|c| c.is_empty() || c.starts_with('.') || c.ends_with(".lock"))
    {
        return fail("name contains an invalid path segment");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use test_case::test_case;

    use super::*;

    #[test_case("main", true; "simple")]
    #[test_case("feature/nested/name", true; "nested")]
    #[test_case("v1.0-rc2", true; "dots and dashes")]
    #[test_case("", false; "empty")]
    #[test_case("with space", false; "space")]
    #[test_case("tilde~1", false; "tilde")]
    #[test_case("caret^", false; "caret")]
    #[test_case("colon:", false; "colon")]
    #[test_case("question?", false; "question mark")]
    #[test_case("star*", false; "star")]
    #[test_case("bracket[", false; "bracket")]
    #[test_case("back\\slash", false; "backslash")]
    #[test_case("double..dot", false; "double dot")]
    #[test_case("at@{brace", false; "reflog syntax")]
    #[test_case(".hidden", false; "leading dot")]
    #[test_case("trailing/", false; "trailing slash")]
    #[test_case("name.lock", false; "lock suffix")]
    #[test_case("a//b", false; "consecutive slashes")]
    #[test_case("a/.b", false; "hidden segment")]
    fn test_validate_branch_name(name: &str, valid: bool) {
        assert_eq!(validate_branch_name(name).is_ok(), valid, "{name:?}");
    }

    #[test]
    fn test_invalid_name_reports_reason() {
        assert_matches!(
            validate_branch_name("bad name"),
            Err(BranchError::InvalidName { reason, .. })
                if reason.contains("forbidden character")
        );
    }
}
