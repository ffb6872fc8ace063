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

//! Folds the flat index into nested tree objects.
//!
//! Index paths are split into a directory trie, then trees are emitted
//! bottom-up so every child hash exists before its parent references it.
//! Sibling subtrees are independent, so a node with enough child directories
//! builds them in parallel; the results are assembled in deterministic order
//! and the output hash never depends on scheduling.

use std::collections::BTreeMap;

use rayon::prelude::*;
use thiserror::Error;

use crate::cancel::CancellationToken;
use crate::cancel::Cancelled;
use crate::index::Index;
use crate::object::FileMode;
use crate::object::Object;
use crate::object::Tree;
use crate::object::TreeEntry;
use crate::object_id::ObjectId;
use crate::object_store::ObjectStore;
use crate::object_store::ObjectStoreError;
use crate::repo_path::RepoPathComponentBuf;

/// Minimum number of child directories before siblings build in parallel.
const PARALLEL_SUBTREE_THRESHOLD: usize = 4;

#[derive(Debug, Error)]
pub enum TreeBuilderError {
    #[error(transparent)]
    Store(#[from] ObjectStoreError),
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

pub type TreeBuilderResult<T> = Result<T, TreeBuilderError>;

#[derive(Debug, Default)]
struct TrieNode {
    files: BTreeMap<String, (ObjectId, FileMode)>,
    dirs: BTreeMap<String, TrieNode>,
}

/// Writes every tree in an index snapshot's hierarchy and returns the root
/// tree's id.
#[derive(Clone, Copy, Debug)]
pub struct TreeBuilder<'a> {
    store: &'a ObjectStore,
}

impl<'a> TreeBuilder<'a> {
    pub fn new(store: &'a ObjectStore) -> Self {
        Self { store }
    }

    /// Builds and stores the tree hierarchy for `index`.
    ///
    /// An empty index produces the well-known empty tree.
    pub fn write_index_tree(
        &self,
        index: &Index,
        cancel: &CancellationToken,
    ) -> TreeBuilderResult<ObjectId> {
        let mut root = TrieNode::default();
        for entry in index.entries() {
            let mut components = entry.path.components().peekable();
            let mut node = &mut root;
            while let Some(component) = components.next() {
                let name = component.to_owned();
                if components.peek().is_some() {
                    node = node.dirs.entry(name).or_default();
                } else {
                    node.files.insert(name, (entry.id, entry.mode));
                }
            }
        }
        self.write_node(&root, cancel)
    }

    fn write_node(&self, node: &TrieNode, cancel: &CancellationToken) -> TreeBuilderResult<ObjectId> {
        cancel.check()?;

        let subtrees: Vec<(&String, ObjectId)> =
            if node.dirs.len() >= PARALLEL_SUBTREE_THRESHOLD {
                node.dirs
                    .par_iter()
                    .map(|(name, child)| Ok((name, self.write_node(child, cancel)?)))
                    .collect::<TreeBuilderResult<_>>()?
            } else {
                node.dirs
                    .iter()
                    .map(|(name, child)| Ok((name, self.write_node(child, cancel)?)))
                    .collect::<TreeBuilderResult<_>>()?
            };

        let mut entries = Vec::with_capacity(node.files.len() + subtrees.len());
        for (name, (id, mode)) in &node.files {
            entries.push(TreeEntry {
                name: RepoPathComponentBuf::new(name.clone())
                    .expect("index paths have valid components"),
                id: *id,
                mode: *mode,
            });
        }
        for (name, id) in subtrees {
            entries.push(TreeEntry {
                name: RepoPathComponentBuf::new(name.clone())
                    .expect("index paths have valid components"),
                id,
                mode: FileMode::Tree,
            });
        }
        let tree = Tree::from_entries(entries);
        Ok(self.store.write(&Object::Tree(tree))?)
    }
}
