//! Branch naming: the contract between the engine and the forge.
//!
//! Stacked-PR branches are `spr/<trunk>/<commit_id>`; breakup branches are
//! `<branch_prefix>cp/<trunk>/<commit_id>` (so `pyspr/cp/main/abcd1234` with
//! the default prefix). The branch name encodes the commit identity, and
//! parsing a head-branch name back to its commit id is authoritative when
//! mapping forge PRs onto local commits.

use regex::Regex;

use crate::config::RepoConfig;

/// Head branch for a stacked PR.
pub fn pr_branch_name(repo: &RepoConfig, commit_id: &str) -> String {
    format!("spr/{}/{}", repo.github_branch, commit_id)
}

/// Head branch for an independent breakup PR.
pub fn breakup_branch_name(repo: &RepoConfig, commit_id: &str) -> String {
    format!("{}cp/{}/{}", repo.branch_prefix, repo.github_branch, commit_id)
}

pub fn is_breakup_branch(repo: &RepoConfig, branch: &str) -> bool {
    branch.starts_with(&format!("{}cp/", repo.branch_prefix))
}

/// Single pattern matching both naming schemes, capturing the commit id.
pub fn branch_pattern(repo: &RepoConfig) -> Regex {
    let prefix = regex::escape(repo.branch_prefix.trim_end_matches('/'));
    Regex::new(&format!(
        r"^(?:spr|{}/cp)/[^/]+/([a-f0-9]{{8}})$",
        prefix
    ))
    .expect("branch pattern is a valid regex")
}

/// Decode the commit id a branch name carries, if it is one of ours.
pub fn commit_id_from_branch(repo: &RepoConfig, branch: &str) -> Option<String> {
    branch_pattern(repo)
        .captures(branch)
        .map(|c| c[1].to_string())
}
