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

//! The staging index: the next commit's candidate tree in flat form.
//!
//! On disk this is the binary `DIRC` version-2 format: a header, one record
//! per tracked file sorted by path, and a trailing SHA-1 over everything
//! before it. Each record carries the blob id, the file mode, and a stat
//! cache used to decide cheaply whether the working-copy file still matches.

use std::collections::btree_map;
use std::collections::BTreeMap;
use std::fs;
use std::fs::Metadata;
use std::io::Write as _;
use std::path::Path;

use digest::Digest as _;
use sha1::Sha1;
use tempfile::NamedTempFile;
use thiserror::Error;

use crate::file_util;
use crate::file_util::IoResultExt as _;
use crate::file_util::PathError;
use crate::object::FileMode;
use crate::object_id::ObjectId;
use crate::object_id::OBJECT_ID_LENGTH;
use crate::repo_path::InvalidRepoPathError;
use crate::repo_path::RepoPath;
use crate::repo_path::RepoPathBuf;

const INDEX_SIGNATURE: &[u8; 4] = b"DIRC";
const INDEX_VERSION: u32 = 2;
// Fixed-width prefix of an entry: 10 u32 stat/mode words, the blob hash, and
// the u16 flags.
const ENTRY_FIXED_LEN: usize = 10 * 4 + OBJECT_ID_LENGTH + 2;
const FLAGS_EXTENDED: u16 = 0x4000;
const FLAGS_STAGE_SHIFT: u16 = 12;
const FLAGS_NAME_MASK: u16 = 0x0fff;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("Index file has a bad signature")]
    BadSignature,
    #[error("Index file version {version} is not supported")]
    UnsupportedVersion { version: u32 },
    #[error("Index file checksum does not match its contents")]
    ChecksumMismatch,
    #[error("Index file is corrupt: {reason}")]
    Corrupt { reason: &'static str },
    #[error("Index file contains an invalid path")]
    InvalidPath(#[from] InvalidRepoPathError),
    #[error(transparent)]
    Io(#[from] PathError),
}

pub type IndexResult<T> = Result<T, IndexError>;

/// Cached file metadata used to detect working-copy changes without reading
/// file content. All values are truncated to 32 bits, like the on-disk form.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FileStat {
    pub ctime_sec: u32,
    pub ctime_nsec: u32,
    pub mtime_sec: u32,
    pub mtime_nsec: u32,
    pub dev: u32,
    pub ino: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u32,
}

impl FileStat {
    #[cfg(unix)]
    pub fn from_metadata(metadata: &Metadata) -> Self {
        use std::os::unix::fs::MetadataExt as _;
        Self {
            ctime_sec: metadata.ctime() as u32,
            ctime_nsec: metadata.ctime_nsec() as u32,
            mtime_sec: metadata.mtime() as u32,
            mtime_nsec: metadata.mtime_nsec() as u32,
            dev: metadata.dev() as u32,
            ino: metadata.ino() as u32,
            uid: metadata.uid(),
            gid: metadata.gid(),
            size: metadata.len() as u32,
        }
    }

    #[cfg(not(unix))]
    pub fn from_metadata(metadata: &Metadata) -> Self {
        use std::time::UNIX_EPOCH;
        let mtime = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .unwrap_or_default();
        Self {
            mtime_sec: mtime.as_secs() as u32,
            mtime_nsec: mtime.subsec_nanos(),
            size: metadata.len() as u32,
            ..Self::default()
        }
    }
}

/// One tracked file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexEntry {
    pub path: RepoPathBuf,
    pub id: ObjectId,
    pub mode: FileMode,
    pub stage: u8,
    pub stat: FileStat,
}

impl IndexEntry {
    /// Builds an entry for `path` from the file's current metadata.
    pub fn from_fs(path: RepoPathBuf, id: ObjectId, mode: FileMode, metadata: &Metadata) -> Self {
        Self {
            path,
            id,
            mode,
            stage: 0,
            stat: FileStat::from_metadata(metadata),
        }
    }

    /// Whether the cached size matches the on-disk size.
    pub fn size_matches(&self, metadata: &Metadata) -> bool {
        self.stat.size == metadata.len() as u32
    }

    /// Whether the cached size and full-resolution mtime both match, i.e. the
    /// file is clean without reading its content.
    pub fn stat_matches(&self, metadata: &Metadata) -> bool {
        let current = FileStat::from_metadata(metadata);
        self.stat.size == current.size
            && self.stat.mtime_sec == current.mtime_sec
            && self.stat.mtime_nsec == current.mtime_nsec
    }

    /// Refreshes the cached stat after the content was re-hashed and found
    /// unchanged.
    pub fn refresh_stat(&mut self, metadata: &Metadata) {
        self.stat = FileStat::from_metadata(metadata);
    }
}

/// In-memory staging snapshot: entries unique by path, iterated in sorted
/// path order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Index {
    entries: BTreeMap<RepoPathBuf, IndexEntry>,
}

impl Index {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads the index file at `path`. A missing file yields `Ok(None)`: a
    /// fresh repository has no index, and the caller decides what that means.
    pub fn read(path: &Path) -> IndexResult<Option<Self>> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(IndexError::Io(PathError {
                    path: path.to_path_buf(),
                    source: err,
                }));
            }
        };
        Self::parse(&bytes).map(Some)
    }

    fn parse(bytes: &[u8]) -> IndexResult<Self> {
        if bytes.len() < 12 + OBJECT_ID_LENGTH {
            return Err(IndexError::Corrupt {
                reason: "file is shorter than the header and trailer",
            });
        }
        let (content, trailer) = bytes.split_at(bytes.len() - OBJECT_ID_LENGTH);
        let actual: [u8; OBJECT_ID_LENGTH] = Sha1::digest(content).into();
        if actual != trailer {
            return Err(IndexError::ChecksumMismatch);
        }

        if &content[..4] != INDEX_SIGNATURE {
            return Err(IndexError::BadSignature);
        }
        let version = read_u32(content, 4)?;
        if version != INDEX_VERSION {
            return Err(IndexError::UnsupportedVersion { version });
        }
        let count = read_u32(content, 8)? as usize;

        let mut entries = BTreeMap::new();
        let mut offset = 12;
        for _ in 0..count {
            let (entry, entry_len) = parse_entry(content, offset)?;
            entries.insert(entry.path.clone(), entry);
            offset += entry_len;
        }
        if entries.len() != count {
            return Err(IndexError::Corrupt {
                reason: "duplicate paths",
            });
        }
        Ok(Self { entries })
    }

    /// Writes the index to `path` via a sibling temp file and atomic rename.
    pub fn write(&self, path: &Path) -> IndexResult<()> {
        let mut content = Vec::new();
        content.extend_from_slice(INDEX_SIGNATURE);
        content.extend_from_slice(&INDEX_VERSION.to_be_bytes());
        content.extend_from_slice(&(self.entries.len() as u32).to_be_bytes());
        for entry in self.entries.values() {
            serialize_entry(&mut content, entry);
        }
        let trailer: [u8; OBJECT_ID_LENGTH] = Sha1::digest(&content).into();
        content.extend_from_slice(&trailer);

        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let mut temp_file = NamedTempFile::new_in(dir).context(dir)?;
        temp_file.write_all(&content).context(temp_file.path())?;
        file_util::persist_temp_file(temp_file, path).context(path)?;
        Ok(())
    }

    /// Inserts or replaces the entry keyed by its path.
    pub fn add(&mut self, entry: IndexEntry) {
        self.entries.insert(entry.path.clone(), entry);
    }

    /// Removes the entry for `path` and returns it if present.
    pub fn remove(&mut self, path: &RepoPath) -> Option<IndexEntry> {
        self.entries.remove(path)
    }

    pub fn get(&self, path: &RepoPath) -> Option<&IndexEntry> {
        self.entries.get(path)
    }

    pub fn get_mut(&mut self, path: &RepoPath) -> Option<&mut IndexEntry> {
        self.entries.get_mut(path)
    }

    pub fn contains(&self, path: &RepoPath) -> bool {
        self.entries.contains_key(path)
    }

    /// Iterates entries in sorted path order.
    pub fn entries(&self) -> impl ExactSizeIterator<Item = &IndexEntry> {
        self.entries.values()
    }

    pub fn paths(&self) -> btree_map::Keys<'_, RepoPathBuf, IndexEntry> {
        self.entries.keys()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn read_u32(bytes: &[u8], offset: usize) -> IndexResult<u32> {
    let slice = bytes.get(offset..offset + 4).ok_or(IndexError::Corrupt {
        reason: "truncated entry",
    })?;
    Ok(u32::from_be_bytes(slice.try_into().unwrap()))
}

fn read_u16(bytes: &[u8], offset: usize) -> IndexResult<u16> {
    let slice = bytes.get(offset..offset + 2).ok_or(IndexError::Corrupt {
        reason: "truncated entry",
    })?;
    Ok(u16::from_be_bytes(slice.try_into().unwrap()))
}

fn parse_entry(bytes: &[u8], offset: usize) -> IndexResult<(IndexEntry, usize)> {
    let stat = FileStat {
        ctime_sec: read_u32(bytes, offset)?,
        ctime_nsec: read_u32(bytes, offset + 4)?,
        mtime_sec: read_u32(bytes, offset + 8)?,
        mtime_nsec: read_u32(bytes, offset + 12)?,
        dev: read_u32(bytes, offset + 16)?,
        ino: read_u32(bytes, offset + 20)?,
        uid: read_u32(bytes, offset + 28)?,
        gid: read_u32(bytes, offset + 32)?,
        size: read_u32(bytes, offset + 36)?,
    };
    let mode_word = read_u32(bytes, offset + 24)?;
    let mode = FileMode::from_index_mode(mode_word).ok_or(IndexError::Corrupt {
        reason: "unrecognized entry mode",
    })?;
    let hash_offset = offset + 40;
    let id = bytes
        .get(hash_offset..hash_offset + OBJECT_ID_LENGTH)
        .and_then(ObjectId::try_from_bytes)
        .ok_or(IndexError::Corrupt {
            reason: "truncated entry",
        })?;
    let flags = read_u16(bytes, hash_offset + OBJECT_ID_LENGTH)?;
    if flags & FLAGS_EXTENDED != 0 {
        return Err(IndexError::Corrupt {
            reason: "extended flag is not valid in version 2",
        });
    }
    let stage = ((flags >> FLAGS_STAGE_SHIFT) & 0b11) as u8;

    let name_offset = offset + ENTRY_FIXED_LEN;
    let name_len = usize::from(flags & FLAGS_NAME_MASK);
    let name_end = if name_len < usize::from(FLAGS_NAME_MASK) {
        let end = name_offset + name_len;
        if bytes.get(end) != Some(&0) {
            return Err(IndexError::Corrupt {
                reason: "entry path is not NUL-terminated",
            });
        }
        end
    } else {
        // Paths of 0xFFF bytes or more store a clamped length; scan for the
        // terminator instead.
        bytes[name_offset..]
            .iter()
            .position(|&b| b == 0)
            .map(|i| name_offset + i)
            .ok_or(IndexError::Corrupt {
                reason: "entry path is not NUL-terminated",
            })?
    };
    let name =
        std::str::from_utf8(&bytes[name_offset..name_end]).map_err(|_| IndexError::Corrupt {
            reason: "entry path is not UTF-8",
        })?;
    let path = RepoPathBuf::new(name)?;

    // Trailing NUL plus zero padding to the next multiple of 8.
    let unpadded = ENTRY_FIXED_LEN + (name_end - name_offset) + 1;
    let entry_len = unpadded.div_ceil(8) * 8;
    if offset + entry_len > bytes.len() {
        return Err(IndexError::Corrupt {
            reason: "truncated entry",
        });
    }

    let entry = IndexEntry {
        path,
        id,
        mode,
        stage,
        stat,
    };
    Ok((entry, entry_len))
}

fn serialize_entry(out: &mut Vec<u8>, entry: &IndexEntry) {
    let start = out.len();
    out.extend_from_slice(&entry.stat.ctime_sec.to_be_bytes());
    out.extend_from_slice(&entry.stat.ctime_nsec.to_be_bytes());
    out.extend_from_slice(&entry.stat.mtime_sec.to_be_bytes());
    out.extend_from_slice(&entry.stat.mtime_nsec.to_be_bytes());
    out.extend_from_slice(&entry.stat.dev.to_be_bytes());
    out.extend_from_slice(&entry.stat.ino.to_be_bytes());
    out.extend_from_slice(&entry.mode.as_index_mode().to_be_bytes());
    out.extend_from_slice(&entry.stat.uid.to_be_bytes());
    out.extend_from_slice(&entry.stat.gid.to_be_bytes());
    out.extend_from_slice(&entry.stat.size.to_be_bytes());
    out.extend_from_slice(entry.id.as_bytes());

    let name = entry.path.as_str().as_bytes();
    let name_len = name.len().min(usize::from(FLAGS_NAME_MASK)) as u16;
    let flags = (u16::from(entry.stage & 0b11) << FLAGS_STAGE_SHIFT) | name_len;
    out.extend_from_slice(&flags.to_be_bytes());
    out.extend_from_slice(name);
    out.push(0);
    while (out.len() - start) % 8 != 0 {
        out.push(0);
    }
}
