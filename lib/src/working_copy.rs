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

//! The working-directory update engine.
//!
//! Moving the working copy between committed snapshots runs as a pipeline:
//! flatten the target commit's tree, diff it against the index, refuse to
//! clobber local edits unless forced, then apply the operations atomically
//! with per-file backups that are replayed in reverse on failure. The index
//! is rewritten only after the filesystem update succeeded, so a crash
//! leaves either the old state or a consistent new one, never a working
//! directory referencing objects that do not exist.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fs;
use std::io::Write as _;
use std::path::Path;
use std::path::PathBuf;

use tempfile::NamedTempFile;
use thiserror::Error;

use crate::cancel::CancellationToken;
use crate::cancel::Cancelled;
use crate::file_util;
use crate::file_util::IoResultExt as _;
use crate::file_util::PathError;
use crate::index::Index;
use crate::index::IndexEntry;
use crate::index::IndexError;
use crate::object;
use crate::object::Blob;
use crate::object::FileMode;
use crate::object::Object;
use crate::object_id::ObjectId;
use crate::object_store::ObjectStore;
use crate::object_store::ObjectStoreError;
use crate::refs::RefError;
use crate::repo::Repo;
use crate::repo_path::RepoPathBuf;

/// How many offending paths a `WouldOverwrite` error enumerates.
const MAX_REPORTED_CONFLICTS: usize = 10;

#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error(
        "Update would overwrite local changes to {} path(s){}",
        paths.len() + truncated,
        if *truncated > 0 { " (list truncated)" } else { "" }
    )]
    WouldOverwrite {
        paths: Vec<RepoPathBuf>,
        truncated: usize,
    },
    #[error("Operation list is invalid: {}", violations.join("; "))]
    InvalidOperations { violations: Vec<String> },
    #[error("Applied {applied} of {total} operations, then rolled back")]
    PartialFailure {
        applied: usize,
        total: usize,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error(transparent)]
    Store(#[from] ObjectStoreError),
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    Ref(#[from] RefError),
    #[error(transparent)]
    Io(#[from] PathError),
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

pub type CheckoutResult<T> = Result<T, CheckoutError>;

/// A file in a flattened tree: blob id plus mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TargetEntry {
    pub id: ObjectId,
    pub mode: FileMode,
}

/// A commit's tree flattened to `path → {id, mode}`.
pub type TargetTree = BTreeMap<RepoPathBuf, TargetEntry>;

/// Reads `commit_id` and recursively flattens its tree.
///
/// Gitlink entries are carried in trees but never materialized, so they do
/// not appear in the result.
pub fn expand_commit(
    store: &ObjectStore,
    commit_id: &ObjectId,
    cancel: &CancellationToken,
) -> CheckoutResult<TargetTree> {
    let commit = store.read_commit(commit_id)?;
    let mut target = TargetTree::new();
    expand_tree(store, &commit.tree, RepoPathBuf::root(), &mut target, cancel)?;
    Ok(target)
}

fn expand_tree(
    store: &ObjectStore,
    tree_id: &ObjectId,
    dir: RepoPathBuf,
    target: &mut TargetTree,
    cancel: &CancellationToken,
) -> CheckoutResult<()> {
    cancel.check()?;
    let tree = store.read_tree(tree_id)?;
    for entry in tree.entries() {
        let path = dir.join(&entry.name);
        match entry.mode {
            FileMode::Tree => {
                expand_tree(store, &entry.id, path, target, cancel)?;
            }
            FileMode::Gitlink => {}
            mode => {
                target.insert(
                    path,
                    TargetEntry {
                        id: entry.id,
                        mode,
                    },
                );
            }
        }
    }
    Ok(())
}

/// What an operation does to its path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpAction {
    Create,
    Modify,
    Delete,
}

/// One working-copy mutation. `target` carries the blob to materialize and
/// is `None` exactly for deletes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Operation {
    pub path: RepoPathBuf,
    pub action: OpAction,
    pub target: Option<TargetEntry>,
}

/// Classifies every path as create, modify, or delete and returns the
/// ordered operation list: deletes first (in reverse path order, so a
/// directory's contents drain before anything after it), then modifies,
/// then creates. Deleting before creating keeps directories from being
/// left empty-but-present mid-apply.
pub fn diff_against_index(target: &TargetTree, index: &Index, filemode: bool) -> Vec<Operation> {
    let mut deletes = Vec::new();
    let mut modifies = Vec::new();
    let mut creates = Vec::new();

    for (path, entry) in target {
        match index.get(path) {
            None => creates.push(Operation {
                path: path.clone(),
                action: OpAction::Create,
                target: Some(*entry),
            }),
            Some(index_entry) => {
                if index_entry.id != entry.id || modes_differ(index_entry.mode, entry.mode, filemode)
                {
                    modifies.push(Operation {
                        path: path.clone(),
                        action: OpAction::Modify,
                        target: Some(*entry),
                    });
                }
            }
        }
    }
    for entry in index.entries() {
        if !target.contains_key(&entry.path) {
            deletes.push(Operation {
                path: entry.path.clone(),
                action: OpAction::Delete,
                target: None,
            });
        }
    }

    deletes.reverse();
    let mut ops = deletes;
    ops.append(&mut modifies);
    ops.append(&mut creates);
    ops
}

/// Whether a mode change is significant. With `core.filemode` off, the
/// executable bit is noise from the filesystem and is ignored.
fn modes_differ(a: FileMode, b: FileMode, filemode: bool) -> bool {
    if a == b {
        return false;
    }
    if !filemode {
        let exec_pair = |x, y| x == FileMode::Normal && y == FileMode::Executable;
        if exec_pair(a, b) || exec_pair(b, a) {
            return false;
        }
    }
    true
}

/// Local working-copy state relative to the index.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CleanlinessReport {
    pub modified: BTreeSet<RepoPathBuf>,
    pub deleted: BTreeSet<RepoPathBuf>,
    pub details: Vec<String>,
}

impl CleanlinessReport {
    pub fn is_clean(&self) -> bool {
        self.modified.is_empty() && self.deleted.is_empty()
    }
}

/// Compares every index entry against the working copy.
///
/// A file whose stat matches is clean. A file whose size matches but whose
/// mtime drifted is re-hashed; if the content still matches, the entry's
/// cached mtime is refreshed and the file is clean.
pub fn check_cleanliness(
    root: &Path,
    index: &mut Index,
    cancel: &CancellationToken,
) -> CheckoutResult<CleanlinessReport> {
    let mut report = CleanlinessReport::default();
    let paths: Vec<RepoPathBuf> = index.paths().cloned().collect();
    for path in paths {
        cancel.check()?;
        let disk_path = path.to_fs_path(root);
        let entry = index.get(&path).unwrap().clone();
        let metadata = match fs::symlink_metadata(&disk_path) {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                report.details.push(format!("deleted: {path}"));
                report.deleted.insert(path);
                continue;
            }
            Err(err) => {
                return Err(CheckoutError::Io(PathError {
                    path: disk_path,
                    source: err,
                }));
            }
        };
        if entry.mode != FileMode::Symlink && entry.stat_matches(&metadata) {
            continue;
        }
        if entry.mode != FileMode::Symlink && !entry.size_matches(&metadata) {
            report.details.push(format!("modified (size): {path}"));
            report.modified.insert(path);
            continue;
        }
        // Same size, different mtime (or a symlink, whose stat cache is not
        // meaningful): fall back to content comparison.
        let disk_id = hash_disk_content(&disk_path, entry.mode)?;
        if disk_id == Some(entry.id) {
            if let Some(entry) = index.get_mut(&path) {
                entry.refresh_stat(&metadata);
            }
            continue;
        }
        report.details.push(format!("modified (content): {path}"));
        report.modified.insert(path);
    }
    Ok(report)
}

/// Hashes on-disk content as the blob it would be stored as. Symlinks hash
/// their target path. `None` when the path is not readable as the expected
/// kind (e.g. a directory now stands where a file was).
fn hash_disk_content(disk_path: &Path, mode: FileMode) -> CheckoutResult<Option<ObjectId>> {
    let data = if mode == FileMode::Symlink {
        match fs::read_link(disk_path) {
            Ok(target) => target.to_string_lossy().into_owned().into_bytes(),
            // A symlink materialized as a regular file (fallback) hashes as
            // its file content.
            Err(_) => match fs::read(disk_path) {
                Ok(data) => data,
                Err(_) => return Ok(None),
            },
        }
    } else {
        match fs::read(disk_path) {
            Ok(data) => data,
            Err(_) => return Ok(None),
        }
    };
    let canonical = object::serialize(&Object::Blob(Blob::new(data)));
    Ok(Some(object::hash(&canonical)))
}

/// Saved pre-state of one path, replayed on rollback.
#[derive(Debug)]
enum Backup {
    DidNotExist,
    File { data: Vec<u8>, executable: bool },
    Symlink { target: PathBuf },
}

/// Result of a successful atomic apply.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ApplyStats {
    pub applied: usize,
    pub total: usize,
}

/// Progress callback payload: one call per applied operation.
#[derive(Clone, Debug)]
pub struct Progress {
    pub path: RepoPathBuf,
    pub action: OpAction,
    pub applied: usize,
    pub total: usize,
}

/// Checks structural validity of an operation list before any filesystem
/// work: recognized shapes and no two operations on one path. All
/// violations are reported at once.
pub fn validate_operations(ops: &[Operation]) -> CheckoutResult<()> {
    let mut violations = Vec::new();
    let mut seen = BTreeSet::new();
    for op in ops {
        if !seen.insert(&op.path) {
            violations.push(format!("conflicting operations on {}", op.path));
        }
        match op.action {
            OpAction::Create | OpAction::Modify => {
                if op.target.is_none() {
                    violations.push(format!("{:?} operation on {} has no target", op.action, op.path));
                }
            }
            OpAction::Delete => {
                if op.target.is_some() {
                    violations.push(format!("delete operation on {} carries a target", op.path));
                }
            }
        }
    }
    if violations.is_empty() {
        Ok(())
    } else {
        Err(CheckoutError::InvalidOperations { violations })
    }
}

/// A dry-run plan: what an apply would do, plus conflicts it would hit.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UpdatePlan {
    pub will_create: Vec<RepoPathBuf>,
    pub will_modify: Vec<RepoPathBuf>,
    pub will_delete: Vec<RepoPathBuf>,
    pub conflicts: Vec<String>,
}

/// Produces the plan for `ops` without touching the filesystem. A create
/// whose path already exists is a conflict.
pub fn plan_operations(root: &Path, ops: &[Operation]) -> UpdatePlan {
    let mut plan = UpdatePlan::default();
    for op in ops {
        match op.action {
            OpAction::Create => {
                if op.path.to_fs_path(root).exists() {
                    plan.conflicts
                        .push(format!("create target already exists: {}", op.path));
                }
                plan.will_create.push(op.path.clone());
            }
            OpAction::Modify => plan.will_modify.push(op.path.clone()),
            OpAction::Delete => plan.will_delete.push(op.path.clone()),
        }
    }
    plan
}

/// Applies `ops` in order with backup/rollback.
///
/// Before the first mutation, the pre-state of every touched path is
/// captured. If any operation fails, the captured backups are replayed in
/// reverse and `PartialFailure` is returned; the filesystem then byte-equals
/// its pre-state. A failure while restoring is logged and restoration
/// continues with the remaining backups.
pub fn execute_atomically(
    root: &Path,
    store: &ObjectStore,
    ops: &[Operation],
    cancel: &CancellationToken,
    mut on_progress: Option<&mut dyn FnMut(Progress)>,
) -> CheckoutResult<ApplyStats> {
    validate_operations(ops)?;

    let mut backups = Vec::with_capacity(ops.len());
    for op in ops {
        backups.push(capture_backup(&op.path.to_fs_path(root))?);
    }

    let mut applied = 0;
    for op in ops {
        let failure: Box<dyn std::error::Error + Send + Sync> = match cancel.check() {
            Err(cancelled) => {
                rollback(root, ops, &backups, applied);
                return Err(cancelled.into());
            }
            Ok(()) => match apply_operation(root, store, op) {
                Ok(()) => {
                    applied += 1;
                    if let Some(on_progress) = on_progress.as_deref_mut() {
                        on_progress(Progress {
                            path: op.path.clone(),
                            action: op.action,
                            applied,
                            total: ops.len(),
                        });
                    }
                    continue;
                }
                Err(err) => Box::new(err),
            },
        };
        tracing::warn!(path = %op.path, err = %failure, "operation failed, rolling back");
        rollback(root, ops, &backups, applied);
        return Err(CheckoutError::PartialFailure {
            applied,
            total: ops.len(),
            source: failure,
        });
    }
    Ok(ApplyStats {
        applied,
        total: ops.len(),
    })
}

fn capture_backup(disk_path: &Path) -> CheckoutResult<Backup> {
    let metadata = match fs::symlink_metadata(disk_path) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Backup::DidNotExist),
        Err(err) => {
            return Err(CheckoutError::Io(PathError {
                path: disk_path.to_path_buf(),
                source: err,
            }));
        }
    };
    if metadata.file_type().is_symlink() {
        let target = fs::read_link(disk_path).context(disk_path)?;
        return Ok(Backup::Symlink { target });
    }
    let data = fs::read(disk_path).context(disk_path)?;
    Ok(Backup::File {
        data,
        executable: is_executable(&metadata),
    })
}

#[cfg(unix)]
fn is_executable(metadata: &fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt as _;
    metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_metadata: &fs::Metadata) -> bool {
    false
}

fn apply_operation(root: &Path, store: &ObjectStore, op: &Operation) -> CheckoutResult<()> {
    match op.action {
        OpAction::Create | OpAction::Modify => {
            let entry = op.target.expect("validated: create/modify carries a target");
            let data = store.read_blob(&entry.id)?;
            let Some(disk_path) = file_util::create_parent_dirs(
                root,
                Path::new(op.path.as_str()),
            )?
            else {
                return Err(CheckoutError::Io(PathError {
                    path: op.path.to_fs_path(root),
                    source: std::io::Error::new(
                        std::io::ErrorKind::Other,
                        "an ancestor of the path is not a directory",
                    ),
                }));
            };
            match entry.mode {
                FileMode::Symlink => write_symlink(&disk_path, &data)?,
                mode => write_file(&disk_path, &data, mode == FileMode::Executable)?,
            }
        }
        OpAction::Delete => {
            let disk_path = op.path.to_fs_path(root);
            fs::remove_file(&disk_path).context(&disk_path)?;
            file_util::prune_empty_dirs(&disk_path, root);
        }
    }
    Ok(())
}

fn write_file(disk_path: &Path, data: &[u8], executable: bool) -> CheckoutResult<()> {
    let dir = disk_path.parent().unwrap();
    let mut temp_file = NamedTempFile::new_in(dir).context(dir)?;
    temp_file.write_all(data).context(temp_file.path())?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt as _;
        let mode = if executable { 0o755 } else { 0o644 };
        temp_file
            .as_file()
            .set_permissions(fs::Permissions::from_mode(mode))
            .context(temp_file.path())?;
    }
    #[cfg(not(unix))]
    let _ = executable;
    file_util::persist_temp_file(temp_file, disk_path).context(disk_path)?;
    Ok(())
}

/// Materializes a symlink whose target is the blob's content. Falls back to
/// a regular file holding the target text when symlinks are unsupported;
/// the index updater then records the entry as a regular file so the next
/// cleanliness check stays consistent.
fn write_symlink(disk_path: &Path, data: &[u8]) -> CheckoutResult<()> {
    let supported = file_util::check_symlink_support().unwrap_or(false);
    let target = match std::str::from_utf8(data) {
        Ok(target) if supported => target,
        _ => {
            tracing::warn!(path = %disk_path.display(), "materializing symlink as a regular file");
            return write_file(disk_path, data, false);
        }
    };
    match fs::remove_file(disk_path) {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => {
            return Err(CheckoutError::Io(PathError {
                path: disk_path.to_path_buf(),
                source: err,
            }));
        }
    }
    if let Err(err) = file_util::try_symlink(Path::new(target), disk_path) {
        tracing::warn!(path = %disk_path.display(), %err, "symlink failed, writing a regular file");
        return write_file(disk_path, data, false);
    }
    Ok(())
}

fn rollback(root: &Path, ops: &[Operation], backups: &[Backup], applied: usize) {
    for (op, backup) in ops.iter().zip(backups).take(applied).rev() {
        let disk_path = op.path.to_fs_path(root);
        let result = match backup {
            Backup::DidNotExist => match fs::remove_file(&disk_path) {
                Ok(()) => {
                    file_util::prune_empty_dirs(&disk_path, root);
                    Ok(())
                }
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(err) => Err(CheckoutError::Io(PathError {
                    path: disk_path.clone(),
                    source: err,
                })),
            },
            Backup::File { data, executable } => file_util::create_parent_dirs(
                root,
                Path::new(op.path.as_str()),
            )
            .map_err(CheckoutError::Io)
            .and_then(|_| write_file(&disk_path, data, *executable)),
            Backup::Symlink { target } => {
                let _ = fs::remove_file(&disk_path);
                file_util::try_symlink(target, &disk_path)
                    .context(&disk_path)
                    .map_err(CheckoutError::Io)
            }
        };
        if let Err(err) = result {
            // Keep restoring whatever can be restored.
            tracing::error!(path = %op.path, %err, "failed to restore backup");
        }
    }
}

/// Rewrites `index` so its entries exactly mirror `target`, with stat caches
/// captured from the files just materialized.
pub fn update_index_to_match(root: &Path, target: &TargetTree) -> CheckoutResult<Index> {
    let mut index = Index::new();
    for (path, entry) in target {
        let disk_path = path.to_fs_path(root);
        let metadata = fs::symlink_metadata(&disk_path).context(&disk_path)?;
        // A symlink that fell back to a regular file is recorded as one, so
        // later checks compare it consistently.
        let mode = if entry.mode == FileMode::Symlink && !metadata.file_type().is_symlink() {
            FileMode::Normal
        } else {
            entry.mode
        };
        index.add(IndexEntry::from_fs(path.clone(), entry.id, mode, &metadata));
    }
    Ok(index)
}

/// Options for [`update_to_commit`].
#[derive(Default)]
pub struct UpdateOptions<'a> {
    /// Overwrite local modifications instead of failing.
    pub force: bool,
    /// Produce a plan without touching the filesystem.
    pub dry_run: bool,
    /// Detach HEAD onto the target commit after a successful update.
    pub detach_head: bool,
    /// Invoked once per applied operation.
    pub on_progress: Option<&'a mut dyn FnMut(Progress)>,
}

/// Result of [`update_to_commit`].
#[derive(Clone, Debug)]
pub enum UpdateOutcome {
    /// Dry run: the plan that would have been applied.
    Planned(UpdatePlan),
    Applied(UpdateStats),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UpdateStats {
    pub files_changed: usize,
    pub applied: usize,
    pub index_entries: usize,
    pub head_detached: bool,
}

/// Moves the working directory to match `commit_id`'s tree.
///
/// Pipeline: expand → diff → cleanliness (unless forced) → apply → index
/// update → optional HEAD move. The index write happens strictly after the
/// working directory was updated.
#[tracing::instrument(skip_all, fields(commit = %commit_id))]
pub fn update_to_commit(
    repo: &Repo,
    commit_id: &ObjectId,
    mut options: UpdateOptions<'_>,
    cancel: &CancellationToken,
) -> CheckoutResult<UpdateOutcome> {
    cancel.check()?;
    let target = expand_commit(repo.store(), commit_id, cancel)?;
    let mut index = repo.read_index()?.unwrap_or_default();
    let ops = diff_against_index(&target, &index, repo.settings().core_filemode());

    if !options.force {
        let report = check_cleanliness(repo.root(), &mut index, cancel)?;
        let mut offending: Vec<RepoPathBuf> = ops
            .iter()
            .filter(|op| matches!(op.action, OpAction::Modify | OpAction::Delete))
            .filter(|op| report.modified.contains(&op.path))
            .map(|op| op.path.clone())
            .collect();
        if !offending.is_empty() {
            let truncated = offending.len().saturating_sub(MAX_REPORTED_CONFLICTS);
            offending.truncate(MAX_REPORTED_CONFLICTS);
            return Err(CheckoutError::WouldOverwrite {
                paths: offending,
                truncated,
            });
        }
    }

    if options.dry_run {
        return Ok(UpdateOutcome::Planned(plan_operations(repo.root(), &ops)));
    }

    let stats = execute_atomically(
        repo.root(),
        repo.store(),
        &ops,
        cancel,
        options.on_progress.take(),
    )?;

    // Filesystem is in the new state; now the index may say so.
    let new_index = update_index_to_match(repo.root(), &target)?;
    repo.write_index(&new_index)?;

    if options.detach_head {
        repo.refs().set_head_detached(commit_id)?;
    }

    tracing::info!(files_changed = stats.applied, "updated working copy");
    Ok(UpdateOutcome::Applied(UpdateStats {
        files_changed: ops.len(),
        applied: stats.applied,
        index_entries: new_index.len(),
        head_detached: options.detach_head,
    }))
}
