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

//! The commit pipeline: index → trees → commit object → reference advance.
//!
//! All object writes complete before the reference moves. A failure after
//! the commit object is written leaves it unreachable in the store, which is
//! harmless (collectable by a future GC).

use thiserror::Error;

use crate::cancel::CancellationToken;
use crate::cancel::Cancelled;
use crate::index::Index;
use crate::object::Commit;
use crate::object::Object;
use crate::object::Signature;
use crate::object::Timestamp;
use crate::object_id::ObjectId;
use crate::refs::RefTarget;
use crate::refs::HEADS_PREFIX;
use crate::repo::Repo;
use crate::tree_builder::TreeBuilder;

#[derive(Debug, Error)]
pub enum CommitError {
    #[error("Nothing staged to commit")]
    NoChanges,
    #[error("Staged tree is identical to the parent commit's tree")]
    NoTreeChanges,
    #[error("Commit stage {stage:?} failed")]
    Stage {
        stage: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

pub type CommitResult<T> = Result<T, CommitError>;

fn at_stage<T, E>(stage: &'static str, result: Result<T, E>) -> CommitResult<T>
where
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    result.map_err(|err| CommitError::Stage {
        stage,
        source: err.into(),
    })
}

/// Options accepted by [`commit`].
#[derive(Clone, Debug, Default)]
pub struct CommitOptions {
    pub message: String,
    /// Author override; defaults to the configured identity.
    pub author: Option<Signature>,
    /// Committer override; defaults to the author.
    pub committer: Option<Signature>,
    /// Permit a commit with an empty index or an unchanged tree.
    pub allow_empty: bool,
    /// Replace the current HEAD commit instead of appending to it.
    pub amend: bool,
}

impl CommitOptions {
    pub fn with_message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }
}

/// What [`commit`] produced.
#[derive(Clone, Debug)]
pub struct CommitOutcome {
    pub id: ObjectId,
    pub tree: ObjectId,
    pub parents: Vec<ObjectId>,
    /// The branch that was advanced, or `None` for a detached HEAD.
    pub branch: Option<String>,
    /// True when the identity fell back to the placeholder. The commit is
    /// accepted; the surface decides whether to warn.
    pub used_placeholder_identity: bool,
}

/// Runs the commit pipeline against `repo`.
#[tracing::instrument(skip_all, fields(amend = options.amend))]
pub fn commit(
    repo: &Repo,
    options: &CommitOptions,
    cancel: &CancellationToken,
) -> CommitResult<CommitOutcome> {
    // 1. Load the staged snapshot. A missing index file is an empty stage.
    cancel.check()?;
    let index = at_stage("read index", repo.read_index())?.unwrap_or_else(Index::new);
    if index.is_empty() && !options.allow_empty {
        return Err(CommitError::NoChanges);
    }

    // 2. Fold the index into trees.
    cancel.check()?;
    let tree = at_stage(
        "build tree",
        TreeBuilder::new(repo.store()).write_index_tree(&index, cancel),
    )?;

    // 3. Resolve parents from HEAD.
    cancel.check()?;
    let head_id = at_stage("resolve parents", repo.refs().resolve_to_id(crate::refs::HEAD))?;
    let head_commit = match &head_id {
        Some(id) => Some(at_stage("resolve parents", repo.store().read_commit(id))?),
        None => None,
    };
    let parents = match (&head_id, &head_commit) {
        (Some(_), Some(head_commit)) if options.amend => head_commit.parents.clone(),
        (Some(id), _) => vec![*id],
        (None, _) => vec![],
    };

    // 4. An unchanged tree is only a commit when explicitly allowed. Amending
    // legitimately keeps the tree (e.g. rewording), so it is exempt.
    if let Some(head_commit) = &head_commit {
        if !options.amend && !options.allow_empty && head_commit.tree == tree {
            return Err(CommitError::NoTreeChanges);
        }
    }

    // 5. Determine identities.
    let mut used_placeholder_identity = false;
    let author = match &options.author {
        Some(author) => author.clone(),
        None => {
            let identity = repo.settings().resolve_identity();
            used_placeholder_identity = identity.used_placeholder;
            identity.to_signature(Timestamp::now())
        }
    };
    let committer = options.committer.clone().unwrap_or_else(|| author.clone());

    // 6. Assemble and store the commit object.
    cancel.check()?;
    let commit = Commit {
        tree,
        parents: parents.clone(),
        author,
        committer,
        extra_headers: vec![],
        message: options.message.clone(),
    };
    let id = at_stage("write commit", repo.store().write(&Object::Commit(commit)))?;

    // 7. Advance the current reference. Object writes are all done by now.
    cancel.check()?;
    let branch = at_stage("advance reference", advance_head(repo, &id))?;

    tracing::info!(id = %id, branch = branch.as_deref(), "created commit");
    Ok(CommitOutcome {
        id,
        tree,
        parents,
        branch,
        used_placeholder_identity,
    })
}

/// Moves the current position to `id` and returns the branch that moved.
fn advance_head(repo: &Repo, id: &ObjectId) -> Result<Option<String>, crate::refs::RefError> {
    let refs = repo.refs();
    match refs.head()? {
        Some(RefTarget::Symbolic(target)) => {
            refs.update_ref(&target, id)?;
            Ok(target
                .strip_prefix(&format!("{HEADS_PREFIX}/"))
                .map(str::to_owned))
        }
        Some(RefTarget::Direct(_)) => {
            // Detached HEAD advances in place.
            refs.set_head_detached(id)?;
            Ok(None)
        }
        None => {
            // Unborn repository without even a HEAD file: create the default
            // branch and attach HEAD to it.
            let branch = repo.settings().default_branch();
            let target = format!("{HEADS_PREFIX}/{branch}");
            refs.update_ref(&target, id)?;
            refs.set_head_symbolic(&target)?;
            Ok(Some(branch))
        }
    }
}
