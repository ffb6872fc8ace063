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

//! Read-only view of the configuration the core consumes.
//!
//! The hierarchical multi-level configuration store itself is an external
//! collaborator; this module only reads the repository-level `config.json`
//! and the identity environment variables. Values are the usual recursive
//! JSON variant, and dotted keys resolve against either nested tables or
//! flat `"user.name"`-style keys, whichever the file uses.

use std::path::Path;
use std::sync::RwLock;

use serde_json::Value;

use crate::file_util::IoResultExt as _;
use crate::file_util::PathError;
use crate::object::Signature;
use crate::object::Timestamp;

/// Environment fallbacks consulted when the configuration has no identity.
pub const ENV_AUTHOR_NAME: &str = "GIT_AUTHOR_NAME";
pub const ENV_AUTHOR_EMAIL: &str = "GIT_AUTHOR_EMAIL";

/// Identity used when neither configuration nor environment provides one.
pub const PLACEHOLDER_NAME: &str = "Unknown User";
pub const PLACEHOLDER_EMAIL: &str = "unknown@example.com";

/// The default branch name when `init.defaultbranch` is not configured.
pub const DEFAULT_BRANCH: &str = "master";

/// The identity to commit with, and whether it fell back to the placeholder.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedIdentity {
    pub name: String,
    pub email: String,
    /// True when the placeholder stood in for a missing name or email. The
    /// commit is still accepted; surfaces are expected to warn.
    pub used_placeholder: bool,
}

impl ResolvedIdentity {
    /// Converts to a signature stamped with the given timestamp.
    pub fn to_signature(&self, timestamp: Timestamp) -> Signature {
        // The placeholder and any configured value passed validation, so this
        // cannot fail for identities produced by resolve_identity().
        Signature::new(&self.name, &self.email, timestamp)
            .expect("resolved identity must be a valid signature")
    }
}

/// Settings sourced from a repository's `config.json`.
///
/// The in-memory map is guarded by a read-write lock; `reload` swaps the map
/// within the write-lock window.
#[derive(Debug, Default)]
pub struct UserSettings {
    values: RwLock<Value>,
}

impl UserSettings {
    /// Loads `config.json` from the control directory. A missing file is an
    /// empty configuration, not an error.
    pub fn load(config_path: &Path) -> Result<Self, PathError> {
        let settings = Self::default();
        settings.reload(config_path)?;
        Ok(settings)
    }

    /// Creates settings from an in-memory value. Used by tests and by
    /// callers embedding the core without an on-disk repository.
    pub fn from_value(value: Value) -> Self {
        Self {
            values: RwLock::new(value),
        }
    }

    /// Re-reads the configuration file, replacing the in-memory map.
    pub fn reload(&self, config_path: &Path) -> Result<(), PathError> {
        let value = match std::fs::read(config_path) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|err| {
                tracing::warn!(
                    path = %config_path.display(),
                    %err,
                    "ignoring unparsable configuration file"
                );
                Value::Null
            }),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Value::Null,
            Err(err) => return std::io::Result::Err(err).context(config_path),
        };
        *self.values.write().unwrap() = value;
        Ok(())
    }

    /// Looks up a dotted key, trying the nested table form first and the
    /// flat dotted form second.
    pub fn get(&self, key: &str) -> Option<Value> {
        let values = self.values.read().unwrap();
        let mut nested = Some(&*values);
        for part in key.split('.') {
            nested = nested.and_then(|v| v.as_object()).and_then(|o| o.get(part));
        }
        match nested {
            Some(value) if !value.is_null() => Some(value.clone()),
            _ => values.as_object()?.get(key).cloned(),
        }
    }

    pub fn get_str(&self, key: &str) -> Option<String> {
        self.get(key)?.as_str().map(str::to_owned)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key)?.as_bool()
    }

    /// The branch created by the first commit in a fresh repository.
    pub fn default_branch(&self) -> String {
        self.get_str("init.defaultbranch")
            .unwrap_or_else(|| DEFAULT_BRANCH.to_owned())
    }

    /// Whether executable-bit differences are significant.
    pub fn core_filemode(&self) -> bool {
        self.get_bool("core.filemode").unwrap_or(true)
    }

    pub fn core_ignorecase(&self) -> bool {
        self.get_bool("core.ignorecase").unwrap_or(false)
    }

    pub fn core_autocrlf(&self) -> bool {
        self.get_bool("core.autocrlf").unwrap_or(false)
    }

    /// Resolves the committing identity: configuration, then environment,
    /// then the placeholder. The fallback is recorded, never silent.
    pub fn resolve_identity(&self) -> ResolvedIdentity {
        // Values that could not be stamped into a signature line count as
        // unset rather than poisoning every later commit.
        let usable = |value: String| {
            if value.is_empty() || value.contains(['<', '>', '\n']) {
                tracing::warn!(%value, "ignoring malformed identity value");
                None
            } else {
                Some(value)
            }
        };
        let name = self
            .get_str("user.name")
            .or_else(|| std::env::var(ENV_AUTHOR_NAME).ok())
            .and_then(usable);
        let email = self
            .get_str("user.email")
            .or_else(|| std::env::var(ENV_AUTHOR_EMAIL).ok())
            .and_then(usable);
        let used_placeholder = name.is_none() || email.is_none();
        if used_placeholder {
            tracing::warn!("no user identity configured, using placeholder");
        }
        ResolvedIdentity {
            name: name.unwrap_or_else(|| PLACEHOLDER_NAME.to_owned()),
            email: email.unwrap_or_else(|| PLACEHOLDER_EMAIL.to_owned()),
            used_placeholder,
        }
    }
}
