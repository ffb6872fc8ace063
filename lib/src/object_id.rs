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

//! Object identity: the 20-byte SHA-1 of an object's canonical bytes.

use std::fmt;
use std::fmt::Debug;

use crate::hex_util;

/// The number of raw bytes in an [`ObjectId`].
pub const OBJECT_ID_LENGTH: usize = 20;

/// The shortest hex prefix accepted when resolving abbreviated ids.
pub const MIN_PREFIX_LENGTH: usize = 4;

/// Identifier for a stored object, computed from its canonical serialization.
///
/// Equality is bytewise; ordering is lexicographic on the bytes, which equals
/// ordering on the hex form.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId([u8; OBJECT_ID_LENGTH]);

impl ObjectId {
    pub fn new(value: [u8; OBJECT_ID_LENGTH]) -> Self {
        Self(value)
    }

    /// Wraps `bytes` as an `ObjectId`, or returns `None` if the length is not
    /// exactly [`OBJECT_ID_LENGTH`].
    pub fn try_from_bytes(bytes: &[u8]) -> Option<Self> {
        bytes.try_into().ok().map(Self)
    }

    /// Parses the given hex string into an `ObjectId`.
    ///
    /// The given string must be valid. A static str is required to prevent
    /// API misuse.
    pub fn from_hex(hex: &'static str) -> Self {
        Self::try_from_hex(hex).unwrap()
    }

    /// Parses the given hex string into an `ObjectId`.
    pub fn try_from_hex(hex: impl AsRef<[u8]>) -> Option<Self> {
        let bytes = hex_util::decode_hex(hex)?;
        Self::try_from_bytes(&bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_bytes(self) -> [u8; OBJECT_ID_LENGTH] {
        self.0
    }

    /// The 40-character lowercase hex form.
    pub fn hex(&self) -> String {
        hex_util::encode_hex(&self.0)
    }

    /// The hex digit at position `index` (0 is the most significant).
    fn hex_digit(&self, index: usize) -> u8 {
        let byte = self.0[index / 2];
        if index % 2 == 0 {
            byte >> 4
        } else {
            byte & 0xf
        }
    }
}

impl Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        f.debug_tuple("ObjectId").field(&self.hex()).finish()
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        f.pad(&self.hex())
    }
}

impl serde::Serialize for ObjectId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        if serializer.is_human_readable() {
            self.hex().serialize(serializer)
        } else {
            self.as_bytes().serialize(serializer)
        }
    }
}

/// An abbreviated id: some leading hex digits of a full [`ObjectId`].
///
/// Kept as one value per digit rather than packed bytes, so odd lengths need
/// no special casing anywhere: a 5-digit prefix simply holds 5 entries.
#[derive(Clone, PartialEq, Eq)]
pub struct HexPrefix {
    digits: Vec<u8>,
}

impl HexPrefix {
    /// Parses a run of hex digits. Rejects non-hex input and anything longer
    /// than a full id. Length floors (e.g. [`MIN_PREFIX_LENGTH`]) are the
    /// resolver's policy, not this type's.
    pub fn try_from_hex(prefix: impl AsRef<[u8]>) -> Option<Self> {
        let input = prefix.as_ref();
        if input.len() > OBJECT_ID_LENGTH * 2 {
            return None;
        }
        let digits = input
            .iter()
            .map(|&b| match b {
                b'0'..=b'9' => Some(b - b'0'),
                b'a'..=b'f' => Some(b - b'a' + 10),
                _ => None,
            })
            .collect::<Option<Vec<u8>>>()?;
        Some(Self { digits })
    }

    /// Number of hex digits in this prefix.
    pub fn hex_len(&self) -> usize {
        self.digits.len()
    }

    /// Renders the digits back as a hex string.
    pub fn hex(&self) -> String {
        self.digits
            .iter()
            .map(|&d| char::from_digit(u32::from(d), 16).unwrap())
            .collect()
    }

    /// Whether `id`'s hex form starts with this prefix.
    pub fn matches(&self, id: &ObjectId) -> bool {
        self.digits
            .iter()
            .enumerate()
            .all(|(i, &digit)| id.hex_digit(i) == digit)
    }
}

impl Debug for HexPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        write!(f, "HexPrefix({:?})", self.hex())
    }
}

/// Outcome of resolving an abbreviated id against a set of stored objects.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PrefixResolution {
    NotFound,
    Unique(ObjectId),
    Ambiguous,
}

impl PrefixResolution {
    /// Folds one more matching candidate into the outcome: a first match
    /// makes it unique, a second makes it ambiguous for good.
    #[must_use]
    pub fn with_candidate(self, id: ObjectId) -> Self {
        match self {
            Self::NotFound => Self::Unique(id),
            Self::Unique(_) | Self::Ambiguous => Self::Ambiguous,
        }
    }
}
