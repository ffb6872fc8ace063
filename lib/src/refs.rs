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

//! Loose references and the HEAD pointer.
//!
//! A reference is either the literal `HEAD` or a `refs/<category>/<name>`
//! path, stored as a file holding `<40-hex>\n` (direct) or
//! `ref: <refpath>\n` (symbolic). Updates replace the whole file atomically;
//! there is no partial overwrite.

use std::fs;
use std::io::Write as _;
use std::path::Path;
use std::path::PathBuf;

use tempfile::NamedTempFile;
use thiserror::Error;

use crate::file_util;
use crate::file_util::IoResultExt as _;
use crate::file_util::PathError;
use crate::object_id::ObjectId;

/// The name of the current-position pointer.
pub const HEAD: &str = "HEAD";

/// Prefix of the branch namespace.
pub const HEADS_PREFIX: &str = "refs/heads";

/// Maximum number of symbolic hops followed by [`RefStore::resolve_to_id`].
const MAX_SYMBOLIC_HOPS: usize = 5;

#[derive(Debug, Error)]
pub enum RefError {
    #[error("Invalid reference path {name:?}")]
    InvalidRefPath { name: String },
    #[error("Reference {name} not found")]
    NotFound { name: String },
    #[error("Reference {name} is corrupt: {reason}")]
    Corrupt { name: String, reason: &'static str },
    #[error("Symbolic reference chain starting at {name} exceeds {MAX_SYMBOLIC_HOPS} hops")]
    ChainTooLong { name: String },
    #[error(transparent)]
    Io(#[from] PathError),
}

pub type RefResult<T> = Result<T, RefError>;

/// What a reference file points at.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RefTarget {
    Direct(ObjectId),
    Symbolic(String),
}

/// Loose reference storage rooted at a repository's control directory.
#[derive(Clone, Debug)]
pub struct RefStore {
    git_dir: PathBuf,
}

impl RefStore {
    pub fn new(git_dir: impl Into<PathBuf>) -> Self {
        Self {
            git_dir: git_dir.into(),
        }
    }

    fn ref_file_path(&self, name: &str) -> RefResult<PathBuf> {
        validate_ref_path(name)?;
        Ok(self.git_dir.join(name))
    }

    fn write_ref_file(&self, name: &str, content: &str) -> RefResult<()> {
        let path = self.ref_file_path(name)?;
        let dir = path.parent().unwrap();
        fs::create_dir_all(dir).context(dir)?;
        let mut temp_file = NamedTempFile::new_in(dir).context(dir)?;
        temp_file
            .write_all(content.as_bytes())
            .context(temp_file.path())?;
        file_util::persist_temp_file(temp_file, &path).context(&path)?;
        Ok(())
    }

    /// Points `name` directly at `id`, creating parent directories as needed.
    pub fn update_ref(&self, name: &str, id: &ObjectId) -> RefResult<()> {
        self.write_ref_file(name, &format!("{}\n", id.hex()))
    }

    /// Points `name` symbolically at `target`.
    pub fn update_symbolic_ref(&self, name: &str, target: &str) -> RefResult<()> {
        validate_ref_path(target)?;
        self.write_ref_file(name, &format!("ref: {target}\n"))
    }

    /// Reads the target of `name`, or `None` if the reference does not exist.
    pub fn read_ref(&self, name: &str) -> RefResult<Option<RefTarget>> {
        let path = self.ref_file_path(name)?;
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(RefError::Io(PathError { path, source: err })),
        };
        if let Some(target) = content.strip_prefix("ref: ") {
            return Ok(Some(RefTarget::Symbolic(target.trim_end().to_owned())));
        }
        let id = ObjectId::try_from_hex(content.trim()).ok_or(RefError::Corrupt {
            name: name.to_owned(),
            reason: "expected a 40-hex hash or a symbolic target",
        })?;
        Ok(Some(RefTarget::Direct(id)))
    }

    /// Follows symbolic targets from `name` to a direct reference.
    ///
    /// `Ok(None)` means the chain ends at a reference that does not exist yet
    /// (e.g. HEAD on a branch with no commits). Chains longer than
    /// [`MAX_SYMBOLIC_HOPS`], which includes any cycle, are an error.
    pub fn resolve_to_id(&self, name: &str) -> RefResult<Option<ObjectId>> {
        let mut current = name.to_owned();
        for _ in 0..=MAX_SYMBOLIC_HOPS {
            match self.read_ref(&current)? {
                None => return Ok(None),
                Some(RefTarget::Direct(id)) => return Ok(Some(id)),
                Some(RefTarget::Symbolic(target)) => current = target,
            }
        }
        Err(RefError::ChainTooLong {
            name: name.to_owned(),
        })
    }

    /// Deletes `name`. Returns whether the reference existed.
    pub fn delete_ref(&self, name: &str) -> RefResult<bool> {
        let path = self.ref_file_path(name)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(RefError::Io(PathError { path, source: err })),
        }
    }

    /// Enumerates references under `prefix` (e.g. `refs/heads`) depth-first,
    /// with directory entries visited in name order.
    pub fn list_refs(&self, prefix: &str) -> RefResult<Vec<String>> {
        let root = self.git_dir.join(prefix);
        let mut result = Vec::new();
        if root.is_dir() {
            list_refs_dir(&root, prefix, &mut result)?;
        }
        Ok(result)
    }

    /// Reads the HEAD pointer. `None` means the repository has no HEAD file,
    /// which only happens before initialization completes.
    pub fn head(&self) -> RefResult<Option<RefTarget>> {
        self.read_ref(HEAD)
    }

    /// Attaches HEAD to the given branch reference.
    pub fn set_head_symbolic(&self, target: &str) -> RefResult<()> {
        self.update_symbolic_ref(HEAD, target)
    }

    /// Detaches HEAD onto a commit.
    pub fn set_head_detached(&self, id: &ObjectId) -> RefResult<()> {
        self.update_ref(HEAD, id)
    }
}

fn list_refs_dir(dir: &Path, prefix: &str, result: &mut Vec<String>) -> RefResult<()> {
    let mut entries: Vec<_> = dir
        .read_dir()
        .context(dir)?
        .collect::<Result<_, _>>()
        .context(dir)?;
    entries.sort_by_key(std::fs::DirEntry::file_name);
    for entry in entries {
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        let qualified = format!("{prefix}/{name}");
        let file_type = entry.file_type().context(entry.path())?;
        if file_type.is_dir() {
            list_refs_dir(&entry.path(), &qualified, result)?;
        } else {
            result.push(qualified);
        }
    }
    Ok(())
}

/// Validates a reference path: the literal `HEAD`, or `refs/` followed by at
/// least a category and a name, each component passing the shared name rules.
pub fn validate_ref_path(name: &str) -> RefResult<()> {
    if name == HEAD {
        return Ok(());
    }
    let invalid = || RefError::InvalidRefPath {
        name: name.to_owned(),
    };
    let mut components = name.split('/');
    if components.next() != Some("refs") {
        return Err(invalid());
    }
    let mut count = 0;
    for component in components {
        if !is_valid_ref_component(component) {
            return Err(invalid());
        }
        count += 1;
    }
    if count < 2 {
        return Err(invalid());
    }
    Ok(())
}

pub(crate) fn is_valid_ref_component(component: &str) -> bool {
    !component.is_empty()
        && !component.starts_with('.')
        && !component.ends_with(".lock")
        && !component.contains("..")
        && !component.contains("@{")
        && !component
            .bytes()
            .any(|b| b.is_ascii_control() || b" ~^:?*[\\".contains(&b))
}
