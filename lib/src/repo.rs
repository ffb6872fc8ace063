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

//! The repository handle: control-directory layout and store accessors.
//!
//! HEAD and the index are one-per-repository; every mutation of them goes
//! through this handle's stores and their atomic write primitives. There is
//! no process-global state.

use std::path::Path;
use std::path::PathBuf;

use thiserror::Error;

use crate::branch::validate_branch_name;
use crate::file_util;
use crate::file_util::IoResultExt as _;
use crate::file_util::PathError;
use crate::index::Index;
use crate::index::IndexResult;
use crate::object_id::HexPrefix;
use crate::object_id::ObjectId;
use crate::object_id::PrefixResolution;
use crate::object_store::ObjectStore;
use crate::object_store::ObjectStoreError;
use crate::refs::RefError;
use crate::refs::RefStore;
use crate::refs::HEAD;
use crate::refs::HEADS_PREFIX;
use crate::settings::UserSettings;

/// Name of the control directory under the workspace root.
pub const CONTROL_DIR: &str = ".git";

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("No repository found at {path}", path = path.display())]
    NotARepository { path: PathBuf },
    #[error(transparent)]
    Store(#[from] ObjectStoreError),
    #[error(transparent)]
    Ref(#[from] RefError),
    #[error(transparent)]
    Io(#[from] PathError),
}

pub type RepoResult<T> = Result<T, RepoError>;

/// Error resolving user-provided revision text to a commit.
#[derive(Debug, Error)]
pub enum RevisionError {
    #[error("Revision {rev:?} not found")]
    NotFound { rev: String },
    #[error("Revision {rev:?} is ambiguous")]
    Ambiguous { rev: String },
    #[error(transparent)]
    Ref(#[from] RefError),
    #[error(transparent)]
    Store(#[from] ObjectStoreError),
}

/// An opened repository.
#[derive(Debug)]
pub struct Repo {
    root: PathBuf,
    git_dir: PathBuf,
    store: ObjectStore,
    refs: RefStore,
    settings: UserSettings,
}

impl Repo {
    /// Creates the control directory layout under `root` and attaches HEAD to
    /// the (unborn) default branch. Re-initializing an existing repository is
    /// a no-op that re-opens it.
    pub fn init(root: &Path) -> RepoResult<Self> {
        let git_dir = root.join(CONTROL_DIR);
        file_util::create_or_reuse_dir(&git_dir).context(&git_dir)?;
        let refs_dir = git_dir.join("refs");
        file_util::create_or_reuse_dir(&refs_dir).context(&refs_dir)?;
        for subdir in ["heads", "tags"] {
            let dir = refs_dir.join(subdir);
            file_util::create_or_reuse_dir(&dir).context(&dir)?;
        }
        let store = ObjectStore::init(&git_dir.join("objects"))?;
        let refs = RefStore::new(&git_dir);
        let settings = UserSettings::load(&git_dir.join("config.json"))?;
        if refs.head()?.is_none() {
            let branch = settings.default_branch();
            refs.set_head_symbolic(&format!("{HEADS_PREFIX}/{branch}"))?;
        }
        tracing::info!(path = %root.display(), "initialized repository");
        Ok(Self {
            root: root.to_path_buf(),
            git_dir,
            store,
            refs,
            settings,
        })
    }

    /// Opens an existing repository rooted at `root`.
    pub fn load(root: &Path) -> RepoResult<Self> {
        let git_dir = root.join(CONTROL_DIR);
        if !git_dir.join("objects").is_dir() || !git_dir.join(HEAD).is_file() {
            return Err(RepoError::NotARepository {
                path: root.to_path_buf(),
            });
        }
        let settings = UserSettings::load(&git_dir.join("config.json"))?;
        Ok(Self {
            root: root.to_path_buf(),
            store: ObjectStore::load(&git_dir.join("objects")),
            refs: RefStore::new(&git_dir),
            git_dir,
            settings,
        })
    }

    /// The working-copy root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The control directory (`.git`).
    pub fn git_dir(&self) -> &Path {
        &self.git_dir
    }

    pub fn store(&self) -> &ObjectStore {
        &self.store
    }

    pub fn refs(&self) -> &RefStore {
        &self.refs
    }

    pub fn settings(&self) -> &UserSettings {
        &self.settings
    }

    pub fn index_path(&self) -> PathBuf {
        self.git_dir.join("index")
    }

    /// Reads the staging index; `None` for a fresh repository.
    pub fn read_index(&self) -> IndexResult<Option<Index>> {
        Index::read(&self.index_path())
    }

    /// Replaces the staging index atomically.
    pub fn write_index(&self, index: &Index) -> IndexResult<()> {
        index.write(&self.index_path())
    }

    /// Resolves revision text: `HEAD`, a branch name, a full 40-hex id, or a
    /// unique hex prefix of at least 4 digits.
    pub fn resolve_commit_ish(&self, rev: &str) -> Result<ObjectId, RevisionError> {
        let not_found = || RevisionError::NotFound {
            rev: rev.to_owned(),
        };
        if rev == HEAD {
            return self.refs.resolve_to_id(HEAD)?.ok_or_else(not_found);
        }
        if validate_branch_name(rev).is_ok() {
            if let Some(id) = self.refs.resolve_to_id(&format!("{HEADS_PREFIX}/{rev}"))? {
                return Ok(id);
            }
        }
        if let Some(id) = ObjectId::try_from_hex(rev) {
            if self.store.contains(&id) {
                return Ok(id);
            }
            return Err(not_found());
        }
        if let Some(prefix) = HexPrefix::try_from_hex(rev) {
            match self.store.resolve_prefix(&prefix) {
                Ok(PrefixResolution::Unique(id)) => return Ok(id),
                Ok(PrefixResolution::Ambiguous) => {
                    return Err(RevisionError::Ambiguous {
                        rev: rev.to_owned(),
                    });
                }
                Ok(PrefixResolution::NotFound) => return Err(not_found()),
                Err(ObjectStoreError::PrefixTooShort { .. }) => return Err(not_found()),
                Err(err) => return Err(err.into()),
            }
        }
        Err(not_found())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::refs::RefTarget;

    #[test]
    fn test_init_layout() {
        let temp_dir = tempfile::tempdir().unwrap();
        let repo = Repo::init(temp_dir.path()).unwrap();

        assert!(repo.git_dir().join("objects").is_dir());
        assert!(repo.git_dir().join("refs/heads").is_dir());
        assert!(repo.git_dir().join("refs/tags").is_dir());
        assert_eq!(
            repo.refs().head().unwrap(),
            Some(RefTarget::Symbolic("refs/heads/master".to_owned()))
        );
        // No commits yet: the branch is unborn and the index absent.
        assert_eq!(repo.refs().resolve_to_id(HEAD).unwrap(), None);
        assert!(repo.read_index().unwrap().is_none());
    }

    #[test]
    fn test_init_is_reentrant() {
        let temp_dir = tempfile::tempdir().unwrap();
        Repo::init(temp_dir.path()).unwrap();
        Repo::init(temp_dir.path()).unwrap();
        Repo::load(temp_dir.path()).unwrap();
    }

    #[test]
    fn test_load_requires_layout() {
        let temp_dir = tempfile::tempdir().unwrap();
        assert_matches!(
            Repo::load(temp_dir.path()),
            Err(RepoError::NotARepository { .. })
        );
    }
}
