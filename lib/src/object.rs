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

//! The logical object model and its canonical byte codec.
//!
//! Every object serializes to an ASCII header `<type> <size>\0` followed by a
//! typed payload. The object's identity is the SHA-1 of that whole byte
//! sequence; storage keeps the zlib compression of the same sequence. Byte
//! shape is identity here: any change to the serialization changes every
//! object hash downstream.

use std::fmt;
use std::io::Read as _;
use std::io::Write as _;

use digest::Digest as _;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use itertools::Itertools as _;
use once_cell::sync::Lazy;
use sha1::Sha1;
use thiserror::Error;

use crate::object_id::ObjectId;
use crate::object_id::OBJECT_ID_LENGTH;
use crate::repo_path::RepoPathComponentBuf;

/// Id of the tree with no entries. Every conforming encoder produces it for
/// an empty index.
pub static EMPTY_TREE_ID: Lazy<ObjectId> =
    Lazy::new(|| ObjectId::from_hex("4b825dc642cb6eb9a060e54bf8d69288fbee4904"));

/// Error raised by the codec on malformed canonical bytes.
#[derive(Debug, Error)]
pub enum ObjectError {
    #[error("Malformed object header")]
    MalformedObject,
    #[error("Unknown object type {kind:?}")]
    UnknownType { kind: String },
    #[error("Object size mismatch (declared {declared}, got {actual})")]
    SizeMismatch { declared: usize, actual: usize },
    #[error("Unknown tree entry mode {mode:?}")]
    UnknownMode { mode: String },
    #[error("Malformed tree payload: {reason}")]
    MalformedTree { reason: &'static str },
    #[error("Malformed commit payload: {reason}")]
    MalformedCommit { reason: &'static str },
    #[error("Malformed signature line: {reason}")]
    MalformedSignature { reason: &'static str },
    #[error("Commit timestamp out of range")]
    TimestampOutOfRange,
    #[error("Failed to decompress object bytes")]
    Decompress(#[source] std::io::Error),
}

/// The three stored object kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Blob,
    Tree,
    Commit,
}

impl ObjectKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Blob => "blob",
            Self::Tree => "tree",
            Self::Commit => "commit",
        }
    }

    fn from_token(token: &[u8]) -> Option<Self> {
        match token {
            b"blob" => Some(Self::Blob),
            b"tree" => Some(Self::Tree),
            b"commit" => Some(Self::Commit),
            _ => None,
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// File mode of a tree entry.
///
/// The wire token carries no leading zero (`40000`, not `040000`), matching
/// the canonical Git encoding; `040000` is still accepted on input.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FileMode {
    /// Regular file, `100644`.
    Normal,
    /// Regular file with the executable bit, `100755`.
    Executable,
    /// Symbolic link whose blob holds the target path, `120000`.
    Symlink,
    /// Subdirectory, `40000`.
    Tree,
    /// Commit reference in a foreign repository, `160000`. Stored verbatim,
    /// never materialized by the working-copy engine.
    Gitlink,
}

impl FileMode {
    pub fn as_wire_str(self) -> &'static str {
        match self {
            Self::Normal => "100644",
            Self::Executable => "100755",
            Self::Symlink => "120000",
            Self::Tree => "40000",
            Self::Gitlink => "160000",
        }
    }

    pub fn from_wire_token(token: &[u8]) -> Result<Self, ObjectError> {
        match token {
            b"100644" => Ok(Self::Normal),
            b"100755" => Ok(Self::Executable),
            b"120000" => Ok(Self::Symlink),
            b"40000" | b"040000" => Ok(Self::Tree),
            b"160000" => Ok(Self::Gitlink),
            _ => Err(ObjectError::UnknownMode {
                mode: String::from_utf8_lossy(token).into_owned(),
            }),
        }
    }

    /// The numeric form stored in index entries.
    pub fn as_index_mode(self) -> u32 {
        match self {
            Self::Normal => 0o100644,
            Self::Executable => 0o100755,
            Self::Symlink => 0o120000,
            Self::Tree => 0o040000,
            Self::Gitlink => 0o160000,
        }
    }

    pub fn from_index_mode(mode: u32) -> Option<Self> {
        match mode {
            0o100644 => Some(Self::Normal),
            0o100755 => Some(Self::Executable),
            0o120000 => Some(Self::Symlink),
            0o040000 => Some(Self::Tree),
            0o160000 => Some(Self::Gitlink),
            _ => None,
        }
    }

    pub fn is_tree(self) -> bool {
        self == Self::Tree
    }
}

/// Seconds since the Unix epoch plus the author's UTC offset.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp {
    pub seconds: i64,
    pub tz_offset_minutes: i32,
}

impl Timestamp {
    pub fn now() -> Self {
        let now = chrono::Local::now();
        Self {
            seconds: now.timestamp(),
            tz_offset_minutes: now.offset().local_minus_utc() / 60,
        }
    }

    fn tz_wire_string(&self) -> String {
        let sign = if self.tz_offset_minutes < 0 { '-' } else { '+' };
        let abs = self.tz_offset_minutes.unsigned_abs();
        format!("{sign}{:02}{:02}", abs / 60, abs % 60)
    }

    fn parse_wire(seconds: &str, tz: &str) -> Result<Self, ObjectError> {
        let seconds: i64 = seconds
            .parse()
            .map_err(|_| ObjectError::TimestampOutOfRange)?;
        if seconds < 0 {
            return Err(ObjectError::TimestampOutOfRange);
        }
        let tz_bytes = tz.as_bytes();
        if tz_bytes.len() != 5 || !matches!(tz_bytes[0], b'+' | b'-') {
            return Err(ObjectError::MalformedSignature {
                reason: "timezone must be ±HHMM",
            });
        }
        let digits = &tz[1..];
        if !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ObjectError::MalformedSignature {
                reason: "timezone must be ±HHMM",
            });
        }
        let hours: i32 = digits[..2].parse().unwrap();
        let minutes: i32 = digits[2..].parse().unwrap();
        let mut offset = hours * 60 + minutes;
        if tz_bytes[0] == b'-' {
            offset = -offset;
        }
        Ok(Self {
            seconds,
            tz_offset_minutes: offset,
        })
    }
}

/// The name/email pair rejected by [`Signature::new`].
#[derive(Debug, Error)]
#[error("Invalid signature {name:?} <{email}>: {reason}")]
pub struct InvalidSignatureError {
    pub name: String,
    pub email: String,
    pub reason: &'static str,
}

/// An author or committer identity with its timestamp.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Signature {
    name: String,
    email: String,
    pub timestamp: Timestamp,
}

impl Signature {
    pub fn new(
        name: impl Into<String>,
        email: impl Into<String>,
        timestamp: Timestamp,
    ) -> Result<Self, InvalidSignatureError> {
        let name = name.into();
        let email = email.into();
        let bad = |reason| InvalidSignatureError {
            name: name.clone(),
            email: email.clone(),
            reason,
        };
        if name.is_empty() {
            return Err(bad("name must not be empty"));
        }
        if email.is_empty() {
            return Err(bad("email must not be empty"));
        }
        if name.contains(['<', '>', '\n']) || email.contains(['<', '>', '\n']) {
            return Err(bad("name and email must not contain '<', '>' or newline"));
        }
        Ok(Self {
            name,
            email,
            timestamp,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    fn to_wire_string(&self) -> String {
        format!(
            "{} <{}> {} {}",
            self.name,
            self.email,
            self.timestamp.seconds,
            self.timestamp.tz_wire_string()
        )
    }

    fn parse_wire(line: &str) -> Result<Self, ObjectError> {
        let (name, rest) = line.split_once(" <").ok_or(ObjectError::MalformedSignature {
            reason: "missing '<'",
        })?;
        let (email, rest) = rest.split_once("> ").ok_or(ObjectError::MalformedSignature {
            reason: "missing '>'",
        })?;
        let (seconds, tz) = rest.split_once(' ').ok_or(ObjectError::MalformedSignature {
            reason: "missing timestamp or timezone",
        })?;
        let timestamp = Timestamp::parse_wire(seconds, tz)?;
        Self::new(name, email, timestamp).map_err(|_| ObjectError::MalformedSignature {
            reason: "invalid name or email",
        })
    }
}

/// Opaque file content.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Blob {
    pub data: Vec<u8>,
}

impl Blob {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }
}

/// One row of a tree: a named blob, subtree, symlink, or gitlink.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TreeEntry {
    pub name: RepoPathComponentBuf,
    pub id: ObjectId,
    pub mode: FileMode,
}

/// Compares entries in the canonical tree order: ascending by name, where a
/// subdirectory name sorts as if it had a trailing `/`.
pub fn canonical_entry_cmp(a: &TreeEntry, b: &TreeEntry) -> std::cmp::Ordering {
    fn key(entry: &TreeEntry) -> impl Iterator<Item = u8> + '_ {
        let suffix = if entry.mode.is_tree() { &b"/"[..] } else { b"" };
        entry
            .name
            .as_str()
            .bytes()
            .chain(suffix.iter().copied())
    }
    key(a).cmp(key(b))
}

/// A directory snapshot: entries in canonical order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Tree {
    entries: Vec<TreeEntry>,
}

impl Tree {
    /// Builds a tree from entries in any order.
    pub fn from_entries(mut entries: Vec<TreeEntry>) -> Self {
        entries.sort_unstable_by(canonical_entry_cmp);
        Self { entries }
    }

    /// Wraps entries already in canonical order.
    pub fn from_sorted_entries(entries: Vec<TreeEntry>) -> Self {
        debug_assert!(entries
            .iter()
            .tuple_windows()
            .all(|(a, b)| canonical_entry_cmp(a, b).is_lt()));
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[TreeEntry] {
        &self.entries
    }

    pub fn entry(&self, name: &str) -> Option<&TreeEntry> {
        self.entries.iter().find(|entry| entry.name.as_str() == name)
    }
}

/// A point-in-time snapshot with its ancestry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Commit {
    pub tree: ObjectId,
    pub parents: Vec<ObjectId>,
    pub author: Signature,
    pub committer: Signature,
    /// Header lines between `committer` and the blank line (e.g. `encoding`),
    /// preserved verbatim but not interpreted.
    pub extra_headers: Vec<(String, String)>,
    /// Raw UTF-8 message, trailing newline preserved.
    pub message: String,
}

/// A parsed object of any kind.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Object {
    Blob(Blob),
    Tree(Tree),
    Commit(Commit),
}

impl Object {
    pub fn kind(&self) -> ObjectKind {
        match self {
            Self::Blob(_) => ObjectKind::Blob,
            Self::Tree(_) => ObjectKind::Tree,
            Self::Commit(_) => ObjectKind::Commit,
        }
    }
}

/// Computes the identity of canonical object bytes.
pub fn hash(canonical: &[u8]) -> ObjectId {
    let digest: [u8; OBJECT_ID_LENGTH] = Sha1::digest(canonical).into();
    ObjectId::new(digest)
}

/// Serializes `object` to its canonical byte form: header then payload.
pub fn serialize(object: &Object) -> Vec<u8> {
    let payload = match object {
        Object::Blob(blob) => blob.data.clone(),
        Object::Tree(tree) => serialize_tree_payload(tree),
        Object::Commit(commit) => serialize_commit_payload(commit),
    };
    let mut bytes = Vec::with_capacity(payload.len() + 16);
    bytes.extend_from_slice(object.kind().as_str().as_bytes());
    bytes.push(b' ');
    bytes.extend_from_slice(payload.len().to_string().as_bytes());
    bytes.push(0);
    bytes.extend_from_slice(&payload);
    bytes
}

fn serialize_tree_payload(tree: &Tree) -> Vec<u8> {
    let mut payload = Vec::new();
    for entry in tree.entries() {
        payload.extend_from_slice(entry.mode.as_wire_str().as_bytes());
        payload.push(b' ');
        payload.extend_from_slice(entry.name.as_str().as_bytes());
        payload.push(0);
        payload.extend_from_slice(entry.id.as_bytes());
    }
    payload
}

fn serialize_commit_payload(commit: &Commit) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(format!("tree {}\n", commit.tree.hex()).as_bytes());
    for parent in &commit.parents {
        payload.extend_from_slice(format!("parent {}\n", parent.hex()).as_bytes());
    }
    payload.extend_from_slice(format!("author {}\n", commit.author.to_wire_string()).as_bytes());
    payload
        .extend_from_slice(format!("committer {}\n", commit.committer.to_wire_string()).as_bytes());
    for (key, value) in &commit.extra_headers {
        // Value newlines continue on the next line with a leading space.
        let value = value.replace('\n', "\n ");
        payload.extend_from_slice(format!("{key} {value}\n").as_bytes());
    }
    payload.push(b'\n');
    payload.extend_from_slice(commit.message.as_bytes());
    payload
}

/// Compresses canonical bytes for storage. Empty input yields a stable
/// (non-empty) zlib stream, not an error.
pub fn compress(bytes: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::best());
    encoder.write_all(bytes).expect("writing to Vec cannot fail");
    encoder.finish().expect("writing to Vec cannot fail")
}

/// Decompresses stored bytes back to the canonical form.
pub fn decompress(compressed: &[u8]) -> Result<Vec<u8>, ObjectError> {
    let mut decoder = ZlibDecoder::new(compressed);
    let mut bytes = Vec::new();
    decoder
        .read_to_end(&mut bytes)
        .map_err(ObjectError::Decompress)?;
    Ok(bytes)
}

/// The parsed object header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ObjectHeader {
    pub kind: ObjectKind,
    pub declared_size: usize,
    pub content_offset: usize,
}

/// Parses the leading `<type> <size>\0` header of canonical bytes.
pub fn parse_header(bytes: &[u8]) -> Result<ObjectHeader, ObjectError> {
    let space = bytes
        .iter()
        .position(|&b| b == b' ')
        .ok_or(ObjectError::MalformedObject)?;
    let nul = bytes[space..]
        .iter()
        .position(|&b| b == 0)
        .map(|i| i + space)
        .ok_or(ObjectError::MalformedObject)?;
    let kind = ObjectKind::from_token(&bytes[..space]).ok_or_else(|| ObjectError::UnknownType {
        kind: String::from_utf8_lossy(&bytes[..space]).into_owned(),
    })?;
    let declared_size = std::str::from_utf8(&bytes[space + 1..nul])
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(ObjectError::MalformedObject)?;
    Ok(ObjectHeader {
        kind,
        declared_size,
        content_offset: nul + 1,
    })
}

/// Parses canonical bytes into a typed object.
pub fn parse(bytes: &[u8]) -> Result<Object, ObjectError> {
    let header = parse_header(bytes)?;
    let payload = &bytes[header.content_offset..];
    if payload.len() != header.declared_size {
        return Err(ObjectError::SizeMismatch {
            declared: header.declared_size,
            actual: payload.len(),
        });
    }
    match header.kind {
        ObjectKind::Blob => Ok(Object::Blob(Blob::new(payload.to_vec()))),
        ObjectKind::Tree => Ok(Object::Tree(parse_tree_payload(payload)?)),
        ObjectKind::Commit => Ok(Object::Commit(parse_commit_payload(payload)?)),
    }
}

/// Decompresses and parses stored bytes.
///
/// Round-trip law: `decode(compress(serialize(x)))` returns an object whose
/// serialization is byte-equal to `serialize(x)`.
pub fn decode(compressed: &[u8]) -> Result<Object, ObjectError> {
    parse(&decompress(compressed)?)
}

fn parse_tree_payload(payload: &[u8]) -> Result<Tree, ObjectError> {
    let mut entries = Vec::new();
    let mut rest = payload;
    while !rest.is_empty() {
        let space = rest
            .iter()
            .position(|&b| b == b' ')
            .ok_or(ObjectError::MalformedTree {
                reason: "entry is missing the mode separator",
            })?;
        let mode = FileMode::from_wire_token(&rest[..space])?;
        rest = &rest[space + 1..];
        let nul = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(ObjectError::MalformedTree {
                reason: "entry name is not NUL-terminated",
            })?;
        let name = std::str::from_utf8(&rest[..nul]).map_err(|_| ObjectError::MalformedTree {
            reason: "entry name is not UTF-8",
        })?;
        let name = RepoPathComponentBuf::new(name).map_err(|_| ObjectError::MalformedTree {
            reason: "entry name is not a valid path component",
        })?;
        rest = &rest[nul + 1..];
        if rest.len() < OBJECT_ID_LENGTH {
            return Err(ObjectError::MalformedTree {
                reason: "entry hash is truncated",
            });
        }
        let id = ObjectId::try_from_bytes(&rest[..OBJECT_ID_LENGTH]).unwrap();
        rest = &rest[OBJECT_ID_LENGTH..];
        entries.push(TreeEntry { name, id, mode });
    }
    // Entries are returned in the byte order they appeared, which equals the
    // canonical order for trees produced by a conforming encoder.
    Ok(Tree { entries })
}

fn parse_commit_payload(payload: &[u8]) -> Result<Commit, ObjectError> {
    let text = std::str::from_utf8(payload).map_err(|_| ObjectError::MalformedCommit {
        reason: "payload is not UTF-8",
    })?;
    let (headers, message) =
        text.split_once("\n\n")
            .map(|(h, m)| (h, m.to_owned()))
            .ok_or(ObjectError::MalformedCommit {
                reason: "missing blank line before message",
            })?;

    // Fold continuation lines (leading space) into the preceding header.
    let mut header_lines: Vec<(String, String)> = Vec::new();
    for line in headers.split('\n') {
        if let Some(continuation) = line.strip_prefix(' ') {
            let (_, value) = header_lines
                .last_mut()
                .ok_or(ObjectError::MalformedCommit {
                    reason: "continuation line without header",
                })?;
            value.push('\n');
            value.push_str(continuation);
        } else {
            let (key, value) = line.split_once(' ').ok_or(ObjectError::MalformedCommit {
                reason: "header line is missing a value",
            })?;
            header_lines.push((key.to_owned(), value.to_owned()));
        }
    }

    let mut lines = header_lines.into_iter().peekable();
    let tree = match lines.next() {
        Some((key, value)) if key == "tree" => {
            ObjectId::try_from_hex(&value).ok_or(ObjectError::MalformedCommit {
                reason: "tree header is not a 40-hex hash",
            })?
        }
        _ => {
            return Err(ObjectError::MalformedCommit {
                reason: "first header must be tree",
            })
        }
    };
    let mut parents = Vec::new();
    while matches!(lines.peek(), Some((key, _)) if key == "parent") {
        let (_, value) = lines.next().unwrap();
        parents.push(
            ObjectId::try_from_hex(&value).ok_or(ObjectError::MalformedCommit {
                reason: "parent header is not a 40-hex hash",
            })?,
        );
    }
    let author = match lines.next() {
        Some((key, value)) if key == "author" => Signature::parse_wire(&value)?,
        _ => {
            return Err(ObjectError::MalformedCommit {
                reason: "missing author header",
            })
        }
    };
    let committer = match lines.next() {
        Some((key, value)) if key == "committer" => Signature::parse_wire(&value)?,
        _ => {
            return Err(ObjectError::MalformedCommit {
                reason: "missing committer header",
            })
        }
    };
    let extra_headers: Vec<_> = lines.collect();
    if extra_headers
        .iter()
        .any(|(key, _)| matches!(key.as_str(), "tree" | "parent" | "author" | "committer"))
    {
        return Err(ObjectError::MalformedCommit {
            reason: "structural header out of order",
        });
    }

    Ok(Commit {
        tree,
        parents,
        author,
        committer,
        extra_headers,
        message,
    })
}
