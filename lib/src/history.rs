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

//! Commit history traversal.

use std::collections::HashSet;
use std::collections::VecDeque;

use crate::object::Commit;
use crate::object_id::ObjectId;
use crate::object_store::ObjectStore;
use crate::refs::RefError;
use crate::refs::HEAD;
use crate::repo::Repo;

/// One visited commit.
#[derive(Clone, Debug)]
pub struct HistoryEntry {
    pub id: ObjectId,
    pub commit: Commit,
}

/// Breadth-first walk from `start` over each commit's first parent, then its
/// remaining parents. A visited set keeps merge ancestries from being
/// reported twice. Unreadable commits are skipped, not fatal: a partially
/// garbage-collected ancestry still yields the readable prefix.
pub fn walk(store: &ObjectStore, start: &ObjectId, limit: Option<usize>) -> Vec<HistoryEntry> {
    let mut entries = Vec::new();
    let mut visited: HashSet<ObjectId> = HashSet::from([*start]);
    let mut queue: VecDeque<ObjectId> = VecDeque::from([*start]);
    while let Some(id) = queue.pop_front() {
        if limit.is_some_and(|limit| entries.len() >= limit) {
            break;
        }
        let commit = match store.read_commit(&id) {
            Ok(commit) => commit,
            Err(err) => {
                tracing::warn!(id = %id, %err, "skipping unreadable commit");
                continue;
            }
        };
        for parent in &commit.parents {
            if visited.insert(*parent) {
                queue.push_back(*parent);
            }
        }
        entries.push(HistoryEntry { id, commit });
    }
    entries
}

/// [`walk`] starting from the current HEAD. An unborn HEAD yields an empty
/// history.
pub fn walk_head(repo: &Repo, limit: Option<usize>) -> Result<Vec<HistoryEntry>, RefError> {
    match repo.refs().resolve_to_id(HEAD)? {
        Some(start) => Ok(walk(repo.store(), &start, limit)),
        None => Ok(vec![]),
    }
}
