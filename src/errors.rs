//! Typed error kinds for failures the engine must recognize by class.
//!
//! Most plumbing uses `anyhow` directly; these variants exist where the
//! caller's behavior (exit code, abort-before-mutation, warning vs failure)
//! depends on which failure occurred.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Two commits in one stack carry the same commit-id trailer. Fatal:
    /// the stack model is keyed by commit-id, so no mutation is safe.
    #[error(
        "duplicate commit-id {commit_id} on commits {first_hash} and {second_hash}; \
         this usually happens when a commit is cherry-picked across branches \
         without re-rolling its trailer. Remove the stale trailer and retry."
    )]
    DuplicateCommitId {
        commit_id: String,
        first_hash: String,
        second_hash: String,
    },

    /// The repository requires a merge queue but the PR could not be queued.
    #[error("repository requires merge queue but PR #{number} could not be added to it")]
    MergeQueueRequired { number: u64 },

    /// Running outside a git repository, or the forge client has no credentials.
    #[error("{0}")]
    Environment(String),
}

impl Error {
    /// Exit code for the top-level process, per command contract:
    /// 2 for environment problems, 1 for operation failures.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Environment(_) => 2,
            _ => 1,
        }
    }
}
