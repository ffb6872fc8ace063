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

//! Filesystem helpers shared by the on-disk stores.

use std::fs;
use std::fs::File;
use std::io;
use std::path::Path;
use std::path::PathBuf;

use tempfile::NamedTempFile;
use tempfile::PersistError;
use thiserror::Error;

pub use self::platform::check_symlink_support;
pub use self::platform::try_symlink;

/// An I/O error annotated with the path that failed.
#[derive(Debug, Error)]
#[error("Cannot access {path}", path = path.display())]
pub struct PathError {
    pub path: PathBuf,
    pub source: io::Error,
}

pub trait IoResultExt<T> {
    fn context(self, path: impl AsRef<Path>) -> Result<T, PathError>;
}

impl<T> IoResultExt<T> for io::Result<T> {
    fn context(self, path: impl AsRef<Path>) -> Result<T, PathError> {
        self.map_err(|error| PathError {
            path: path.as_ref().to_path_buf(),
            source: error,
        })
    }
}

/// Creates a directory or does nothing if the directory already exists.
///
/// The function will fail if intermediate directories on the path do not
/// already exist.
pub fn create_or_reuse_dir(dirname: &Path) -> io::Result<()> {
    match fs::create_dir(dirname) {
        Ok(()) => Ok(()),
        Err(_) if dirname.is_dir() => Ok(()),
        Err(e) => Err(e),
    }
}

/// Creates the chain of directories from `base` down to the parent of
/// `relative`, refusing to traverse anything that is not a directory.
///
/// Returns the filesystem path of `relative` itself, or `None` if some
/// ancestor exists but is not a directory.
pub fn create_parent_dirs(base: &Path, relative: &Path) -> Result<Option<PathBuf>, PathError> {
    let mut dir = base.to_path_buf();
    let mut components = relative.components().peekable();
    while let Some(c) = components.next() {
        if components.peek().is_none() {
            // The last component is the file itself.
            dir.push(c);
            return Ok(Some(dir));
        }
        dir.push(c);
        match fs::create_dir(&dir) {
            Ok(()) => {}
            Err(_) if dir.is_dir() => {}
            Err(_) if dir.exists() => return Ok(None),
            Err(err) => return Err(io::Result::<()>::Err(err).context(&dir).unwrap_err()),
        }
    }
    Ok(Some(dir))
}

/// Removes empty ancestor directories of `path` up to (excluding) `stop_at`.
///
/// Stops silently at the first non-empty or otherwise unremovable ancestor.
pub fn prune_empty_dirs(path: &Path, stop_at: &Path) {
    let mut dir = path.parent();
    while let Some(d) = dir {
        if d == stop_at || fs::remove_dir(d).is_err() {
            break;
        }
        dir = d.parent();
    }
}

/// Persists the temporary file after synchronizing the content.
///
/// After system crash, the persisted file should have a valid content if
/// existed. However, the persisted file name (or directory entry) could be
/// lost. It's up to caller to synchronize the directory entries.
pub fn persist_temp_file<P: AsRef<Path>>(
    temp_file: NamedTempFile,
    new_path: P,
) -> io::Result<File> {
    temp_file.as_file().sync_data()?;
    temp_file
        .persist(new_path)
        .map_err(|PersistError { error, file: _ }| error)
}

/// Like [`persist_temp_file()`], but doesn't try to overwrite the existing
/// target on Windows.
///
/// Content-addressed targets are immutable, so a pre-existing file at the
/// destination already holds the bytes being persisted.
pub fn persist_content_addressed_temp_file<P: AsRef<Path>>(
    temp_file: NamedTempFile,
    new_path: P,
) -> io::Result<File> {
    temp_file.as_file().sync_data()?;
    if cfg!(windows) {
        match temp_file.persist_noclobber(&new_path) {
            Ok(file) => Ok(file),
            Err(PersistError { error, file: _ }) => {
                if let Ok(existing_file) = File::open(new_path) {
                    Ok(existing_file)
                } else {
                    Err(error)
                }
            }
        }
    } else {
        // On Unix, rename() is atomic and should succeed even if the
        // destination file exists. Checking if the target exists might involve
        // non-atomic operation, so don't use persist_noclobber().
        temp_file
            .persist(new_path)
            .map_err(|PersistError { error, file: _ }| error)
    }
}

#[cfg(unix)]
mod platform {
    use std::io;
    use std::os::unix::fs::symlink;
    use std::path::Path;

    /// Symlinks are always available on Unix.
    pub fn check_symlink_support() -> io::Result<bool> {
        Ok(true)
    }

    pub fn try_symlink<P: AsRef<Path>, Q: AsRef<Path>>(original: P, link: Q) -> io::Result<()> {
        symlink(original, link)
    }
}

#[cfg(windows)]
mod platform {
    use std::io;
    use std::os::windows::fs::symlink_file;
    use std::path::Path;

    /// Creating symlinks on Windows requires Developer Mode or elevated
    /// privileges, so probe by creating one in a scratch directory.
    pub fn check_symlink_support() -> io::Result<bool> {
        let temp_dir = tempfile::tempdir()?;
        let target = temp_dir.path().join("target");
        let link = temp_dir.path().join("link");
        std::fs::write(&target, b"")?;
        Ok(symlink_file(&target, &link).is_ok())
    }

    pub fn try_symlink<P: AsRef<Path>, Q: AsRef<Path>>(original: P, link: Q) -> io::Result<()> {
        symlink_file(original, link)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use super::*;

    #[test]
    fn test_persist_no_existing_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let target = temp_dir.path().join("file");
        let mut temp_file = NamedTempFile::new_in(&temp_dir).unwrap();
        temp_file.write_all(b"contents").unwrap();
        assert!(persist_content_addressed_temp_file(temp_file, target).is_ok());
    }

    #[test]
    fn test_persist_target_exists() {
        let temp_dir = tempfile::tempdir().unwrap();
        let target = temp_dir.path().join("file");
        let mut temp_file = NamedTempFile::new_in(&temp_dir).unwrap();
        temp_file.write_all(b"contents").unwrap();
        fs::write(&target, b"contents").unwrap();
        assert!(persist_content_addressed_temp_file(temp_file, &target).is_ok());
    }

    #[test]
    fn test_create_parent_dirs() {
        let temp_dir = tempfile::tempdir().unwrap();
        let base = temp_dir.path();
        let file_path = create_parent_dirs(base, Path::new("a/b/c.txt"))
            .unwrap()
            .unwrap();
        assert_eq!(file_path, base.join("a").join("b").join("c.txt"));
        assert!(base.join("a/b").is_dir());
        assert!(!file_path.exists());

        // A file standing in for an intermediate directory aborts the walk.
        fs::write(base.join("a/b/c.txt"), b"").unwrap();
        assert_eq!(
            create_parent_dirs(base, Path::new("a/b/c.txt/nested")).unwrap(),
            None
        );
    }

    #[test]
    fn test_prune_empty_dirs() {
        let temp_dir = tempfile::tempdir().unwrap();
        let base = temp_dir.path();
        fs::create_dir_all(base.join("a/b/c")).unwrap();
        fs::write(base.join("a/keep.txt"), b"").unwrap();
        prune_empty_dirs(&base.join("a/b/c/removed.txt"), base);
        assert!(!base.join("a/b").exists());
        // "a" still holds keep.txt
        assert!(base.join("a").is_dir());
    }
}
