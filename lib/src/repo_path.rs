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

//! Typed repository-relative paths.
//!
//! Internally a repository path is the `/`-joined sequence of its elements,
//! with the root being the empty string. Validation happens once at the type
//! boundary: every element must be a plain name (non-empty, no separator, no
//! NUL, not `.` or `..`), which is what makes `to_fs_path` incapable of
//! escaping its base directory. The borrowed/owned pair exists so sorted
//! maps keyed by `RepoPathBuf` can be probed with a borrowed `&RepoPath`.

use std::borrow::Borrow;
use std::fmt;
use std::ops::Deref;
use std::path::Component;
use std::path::Path;
use std::path::PathBuf;

use ref_cast::ref_cast_custom;
use ref_cast::RefCastCustom;
use thiserror::Error;

/// The input could not be used as a repository path or path element.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
#[error("Invalid repository path {value:?}")]
pub struct InvalidRepoPathError {
    value: String,
}

impl InvalidRepoPathError {
    /// The rejected input.
    pub fn input(&self) -> &str {
        &self.value
    }
}

fn invalid(value: impl Into<String>) -> InvalidRepoPathError {
    InvalidRepoPathError {
        value: value.into(),
    }
}

/// True for a name usable as a single path element.
fn is_valid_element(name: &str) -> bool {
    !matches!(name, "" | "." | "..") && !name.contains(['/', '\0'])
}

/// True for a whole stored path: empty (the root), or `/`-joined valid
/// elements. Leading, trailing, and doubled separators all surface as an
/// empty element and fail.
fn is_valid_path(value: &str) -> bool {
    value.is_empty() || value.split('/').all(is_valid_element)
}

/// One validated path element: a file or directory name.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RepoPathComponentBuf(String);

impl RepoPathComponentBuf {
    pub fn new(name: impl Into<String>) -> Result<Self, InvalidRepoPathError> {
        let name = name.into();
        if is_valid_element(&name) {
            Ok(Self(name))
        } else {
            Err(invalid(name))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RepoPathComponentBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Borrowed repository path.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash, RefCastCustom, serde::Serialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct RepoPath(str);

/// Owned repository path.
// The single field keeps the derived Eq/Ord/Hash identical to RepoPath's,
// which Borrow-based map lookups rely on.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
#[serde(transparent)]
pub struct RepoPathBuf(String);

impl RepoPath {
    #[ref_cast_custom]
    const fn wrap(value: &str) -> &Self;

    /// The empty path, naming the top of the repository.
    pub const fn root() -> &'static Self {
        Self::wrap("")
    }

    /// Validates and wraps a stored string form.
    pub fn new(value: &str) -> Result<&Self, InvalidRepoPathError> {
        if is_valid_path(value) {
            Ok(Self::wrap(value))
        } else {
            Err(invalid(value))
        }
    }

    /// The stored string form, also used in serialized formats.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Path elements from the top down. The root has none.
    pub fn components(&self) -> impl DoubleEndedIterator<Item = &str> + '_ {
        self.0.split('/').filter(|name| !name.is_empty())
    }

    /// Splits off the final element. `None` only for the root.
    pub fn split(&self) -> Option<(&Self, &str)> {
        if self.0.is_empty() {
            return None;
        }
        match self.0.rsplit_once('/') {
            Some((parent, name)) => Some((Self::wrap(parent), name)),
            None => Some((Self::root(), &self.0)),
        }
    }

    /// The directory holding this path. `None` only for the root.
    pub fn parent(&self) -> Option<&Self> {
        Some(self.split()?.0)
    }

    /// This path, then each directory above it, ending at the root.
    pub fn ancestors(&self) -> impl Iterator<Item = &Self> + '_ {
        std::iter::successors(Some(self), |path| path.parent())
    }

    /// Extends this path by one element.
    pub fn join(&self, name: &RepoPathComponentBuf) -> RepoPathBuf {
        if self.0.is_empty() {
            RepoPathBuf(name.as_str().to_owned())
        } else {
            RepoPathBuf(format!("{}/{}", &self.0, name.as_str()))
        }
    }

    /// Where this path lives on disk, under `base`.
    ///
    /// Elements were validated at construction, so the result stays inside
    /// `base`. The root maps to `base` itself (or `.` when `base` is empty).
    pub fn to_fs_path(&self, base: &Path) -> PathBuf {
        let mut result = base.to_path_buf();
        result.extend(self.components());
        if result.as_os_str().is_empty() {
            result.push(".");
        }
        result
    }
}

impl RepoPathBuf {
    /// The empty path, naming the top of the repository.
    pub const fn root() -> Self {
        Self(String::new())
    }

    /// Validates and takes ownership of a stored string form.
    pub fn new(value: impl Into<String>) -> Result<Self, InvalidRepoPathError> {
        let value = value.into();
        if is_valid_path(&value) {
            Ok(Self(value))
        } else {
            Err(invalid(value))
        }
    }

    /// Converts a relative filesystem path. The input must consist of plain
    /// name components; `.` alone means the root.
    pub fn from_relative_path(path: impl AsRef<Path>) -> Result<Self, InvalidRepoPathError> {
        let path = path.as_ref();
        if path == Path::new(".") {
            return Ok(Self::root());
        }
        let mut names = Vec::new();
        for component in path.components() {
            let Component::Normal(name) = component else {
                return Err(invalid(path.to_string_lossy()));
            };
            let Some(name) = name.to_str() else {
                return Err(invalid(path.to_string_lossy()));
            };
            names.push(name);
        }
        Self::new(names.join("/"))
    }

    /// Consumes this and returns the stored string form.
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for RepoPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for RepoPathBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Deref for RepoPathBuf {
    type Target = RepoPath;

    fn deref(&self) -> &RepoPath {
        RepoPath::wrap(&self.0)
    }
}

impl Borrow<RepoPath> for RepoPathBuf {
    fn borrow(&self) -> &RepoPath {
        self
    }
}

impl AsRef<RepoPath> for RepoPathBuf {
    fn as_ref(&self) -> &RepoPath {
        self
    }
}

impl AsRef<RepoPath> for RepoPath {
    fn as_ref(&self) -> &RepoPath {
        self
    }
}

impl ToOwned for RepoPath {
    type Owned = RepoPathBuf;

    fn to_owned(&self) -> RepoPathBuf {
        RepoPathBuf(self.0.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(value: &str) -> &RepoPath {
        RepoPath::new(value).unwrap()
    }

    #[test]
    fn test_validation() {
        assert!(RepoPathBuf::new("").is_ok());
        assert!(RepoPathBuf::new("file.txt").is_ok());
        assert!(RepoPathBuf::new("dir/sub/file.txt").is_ok());
        for bad in ["/", "/abs", "rel/", "a//b", "a/./b", "a/../b", ".", "..", "nul\0"] {
            let err = RepoPathBuf::new(bad).unwrap_err();
            assert_eq!(err.input(), bad);
        }
    }

    #[test]
    fn test_element_validation() {
        assert!(RepoPathComponentBuf::new("file.txt").is_ok());
        assert!(RepoPathComponentBuf::new(".hidden").is_ok());
        for bad in ["", ".", "..", "a/b"] {
            assert!(RepoPathComponentBuf::new(bad).is_err(), "{bad:?}");
        }
    }

    #[test]
    fn test_root() {
        assert!(RepoPath::root().is_root());
        assert!(RepoPathBuf::root().is_root());
        assert_eq!(RepoPath::root().components().count(), 0);
        assert_eq!(RepoPath::root().split(), None);
        assert_eq!(RepoPath::root().parent(), None);
    }

    #[test]
    fn test_components_both_directions() {
        let p = path("a/b/c");
        let forward: Vec<_> = p.components().collect();
        assert_eq!(forward, ["a", "b", "c"]);
        let backward: Vec<_> = p.components().rev().collect();
        assert_eq!(backward, ["c", "b", "a"]);
    }

    #[test]
    fn test_split_parent_join() {
        let p = path("dir/sub/leaf.rs");
        assert_eq!(p.split(), Some((path("dir/sub"), "leaf.rs")));
        assert_eq!(p.parent(), Some(path("dir/sub")));
        assert_eq!(path("top").split(), Some((RepoPath::root(), "top")));

        let name = RepoPathComponentBuf::new("leaf.rs").unwrap();
        assert_eq!(path("dir/sub").join(&name), p.to_owned());
        assert_eq!(
            RepoPath::root().join(&name),
            RepoPathBuf::new("leaf.rs").unwrap()
        );
    }

    #[test]
    fn test_ancestors() {
        let chain: Vec<_> = path("x/y/z").ancestors().map(RepoPath::as_str).collect();
        assert_eq!(chain, ["x/y/z", "x/y", "x", ""]);
    }

    #[test]
    fn test_to_fs_path() {
        let base = Path::new("work/tree");
        assert_eq!(path("").to_fs_path(base), base);
        assert_eq!(path("").to_fs_path(Path::new("")), Path::new("."));
        assert_eq!(
            path("a/b.txt").to_fs_path(base),
            Path::new("work/tree/a/b.txt")
        );
    }

    #[test]
    fn test_from_relative_path() {
        assert!(RepoPathBuf::from_relative_path(".").unwrap().is_root());
        assert_eq!(
            RepoPathBuf::from_relative_path("a/b").unwrap().as_str(),
            "a/b"
        );
        assert!(RepoPathBuf::from_relative_path("../escape").is_err());
        assert!(RepoPathBuf::from_relative_path("/abs").is_err());
    }

    #[test]
    fn test_map_lookup_through_borrow() {
        // The owned and borrowed forms must order and hash alike.
        let mut map = std::collections::BTreeMap::new();
        map.insert(RepoPathBuf::new("b/inner").unwrap(), 1);
        map.insert(RepoPathBuf::new("a.txt").unwrap(), 2);
        assert_eq!(map.get(path("b/inner")), Some(&1));
        let keys: Vec<_> = map.keys().map(|k| k.as_str()).collect();
        assert_eq!(keys, ["a.txt", "b/inner"]);
    }
}
