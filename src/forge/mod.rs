//! Forge abstraction: the narrow capability set the engine consumes.
//!
//! The engine never talks to GitHub directly; it goes through [`Forge`],
//! which the `gh`-backed client in [`github`] implements for real runs and
//! the in-memory double implements for tests. Commands hold a
//! `&dyn Forge`, so nothing in the core branches on which one it is.

pub mod github;
#[cfg(test)]
pub mod memory;

use anyhow::Result;
use std::fmt;

use crate::commit::Commit;
use crate::config::MergeMethod;

/// One commit inside a PR, as reported by the forge.
#[derive(Debug, Clone)]
pub struct CommitRecord {
    pub oid: String,
    pub headline: String,
    /// Full message body; carries the `commit-id:` trailer when present.
    pub message: String,
}

/// Raw PR data as the forge reports it, oldest commit first.
#[derive(Debug, Clone)]
pub struct PrRecord {
    pub number: u64,
    pub title: String,
    pub body: String,
    pub base_ref: String,
    pub head_ref: String,
    pub mergeable: bool,
    pub in_queue: bool,
    pub merged: bool,
    pub commits: Vec<CommitRecord>,
}

/// A PR bound into the stack model, keyed by commit identity.
#[derive(Debug, Clone)]
pub struct PullRequest {
    pub number: u64,
    pub title: String,
    pub body: String,
    pub base_ref: String,
    pub from_branch: String,
    /// The top commit the PR currently carries.
    pub commit: Commit,
    /// All commits in the PR that decode to a commit id, oldest first.
    pub commits: Vec<Commit>,
    pub in_queue: bool,
    pub merged: bool,
    mergeable_flag: bool,
}

impl PullRequest {
    pub fn from_parts(
        record: &PrRecord,
        commit: Commit,
        commits: Vec<Commit>,
    ) -> Self {
        PullRequest {
            number: record.number,
            title: record.title.clone(),
            body: record.body.clone(),
            base_ref: record.base_ref.clone(),
            from_branch: record.head_ref.clone(),
            commit,
            commits,
            in_queue: record.in_queue,
            merged: record.merged,
            mergeable_flag: record.mergeable,
        }
    }

    /// Forge says mergeable and the commit is not WIP; nothing stronger.
    pub fn mergeable(&self) -> bool {
        self.mergeable_flag && !self.commit.wip
    }
}

impl fmt::Display for PullRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PR #{} - {}", self.number, self.commit.subject)?;
        if self.in_queue {
            write!(f, " ⏳ in merge queue")?;
        }
        Ok(())
    }
}

/// Fields to change on an existing PR; `None` leaves the field alone.
#[derive(Debug, Clone, Default)]
pub struct PrUpdate {
    pub title: Option<String>,
    pub body: Option<String>,
    pub base: Option<String>,
}

/// Outcome of a create call: the forge either made the PR or told us one
/// already exists for the head branch.
#[derive(Debug)]
pub enum CreateResult {
    Created(PrRecord),
    AlreadyExists,
}

/// Capability surface the engine requires from a code-review forge.
pub trait Forge: Send + Sync {
    /// Login of the authenticated user.
    fn viewer(&self) -> Result<String>;

    /// Open PRs authored by the current user in the given repository,
    /// commits included.
    fn fetch_open_prs_for_user(&self, owner: &str, repo: &str) -> Result<Vec<PrRecord>>;

    fn create_pr(&self, title: &str, body: &str, base: &str, head: &str)
        -> Result<CreateResult>;

    fn update_pr(&self, number: u64, update: &PrUpdate) -> Result<()>;

    fn close_pr(&self, number: u64) -> Result<()>;

    fn add_labels(&self, number: u64, labels: &[String]) -> Result<()>;

    fn add_comment(&self, number: u64, body: &str) -> Result<()>;

    fn request_reviewers(&self, number: u64, logins: &[String]) -> Result<()>;

    fn list_assignable_users(&self) -> Result<Vec<String>>;

    fn merge_pr(&self, number: u64, method: MergeMethod) -> Result<()>;

    fn enable_automerge(&self, number: u64, method: MergeMethod) -> Result<()>;

    /// Look up the open PR whose head is `branch`, if any.
    fn get_pr_for_branch(&self, branch: &str) -> Result<Option<PrRecord>>;
}
