//! Local commit stack and commit identity.
//!
//! Every commit that can become a PR carries a stable `commit-id:<8hex>`
//! trailer in its message. The trailer survives amends and cherry-picks that
//! keep the message body, which is what lets a PR follow "the same change"
//! across history rewrites. This module reads the stack `trunk..HEAD` and
//! installs missing trailers with a minimal reset + cherry-pick rewrite.

use anyhow::{anyhow, Context, Result};
use regex::Regex;
use std::collections::HashMap;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::Config;
use crate::errors::Error;
use crate::git::Git;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    /// Stable 8-hex identity from the `commit-id:` trailer.
    pub commit_id: String,
    /// Current content hash; changes on every amend.
    pub commit_hash: String,
    pub subject: String,
    pub body: String,
    pub wip: bool,
}

impl Commit {
    pub fn new(commit_id: &str, commit_hash: &str, subject: &str, body: &str) -> Self {
        Commit {
            commit_id: commit_id.to_string(),
            commit_hash: commit_hash.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
            wip: is_wip_subject(subject),
        }
    }
}

pub fn is_wip_subject(subject: &str) -> bool {
    subject.to_uppercase().starts_with("WIP")
}

pub fn commit_id_pattern() -> Regex {
    Regex::new(r"commit-id:([a-f0-9]{8})").expect("trailer pattern is a valid regex")
}

/// Extract the commit-id trailer from a full commit message, if present.
pub fn commit_id_from_message(message: &str) -> Option<String> {
    commit_id_pattern()
        .captures(message)
        .map(|c| c[1].to_string())
}

/// The longest prefix of the stack below the first WIP commit.
pub fn non_wip_prefix(commits: &[Commit]) -> Vec<Commit> {
    let mut out = vec![];
    for commit in commits {
        if commit.wip {
            break;
        }
        out.push(commit.clone());
    }
    out
}

/// The ref the stack is measured against: the branch upstream if set,
/// otherwise the configured remote/branch.
pub fn upstream_ref(config: &Config, git: &Git) -> String {
    match git.read(&["rev-parse", "--abbrev-ref", "@{upstream}"]) {
        Ok(out) if !out.trim().is_empty() => out.trim().to_string(),
        _ => format!(
            "{}/{}",
            config.repo.github_remote, config.repo.github_branch
        ),
    }
}

struct RawCommit {
    hash: String,
    message: String,
}

/// Read `range` as raw (hash, message) records, oldest first.
fn read_log(git: &Git, range: &str) -> Result<Vec<RawCommit>> {
    let raw = git.read(&["log", "--format=%H%x00%B%x1e", "--reverse", range])?;
    let mut out = vec![];
    for chunk in raw.split('\u{001e}') {
        let chunk = chunk.trim_matches('\n');
        if chunk.trim().is_empty() {
            continue;
        }
        let mut parts = chunk.splitn(2, '\0');
        let hash = parts.next().unwrap_or_default().trim().to_string();
        let message = parts.next().unwrap_or_default().to_string();
        if hash.is_empty() {
            continue;
        }
        out.push(RawCommit { hash, message });
    }
    Ok(out)
}

fn commit_from_raw(raw: &RawCommit, commit_id: &str) -> Commit {
    let mut lines = raw.message.lines();
    let subject = lines.next().unwrap_or_default().trim().to_string();
    let body = lines.collect::<Vec<_>>().join("\n").trim().to_string();
    Commit::new(commit_id, &raw.hash, &subject, &body)
}

fn check_unique_ids(commits: &[Commit]) -> Result<()> {
    let mut seen: HashMap<&str, &str> = HashMap::new();
    for commit in commits {
        if let Some(first) = seen.insert(&commit.commit_id, &commit.commit_hash) {
            return Err(anyhow!(Error::DuplicateCommitId {
                commit_id: commit.commit_id.clone(),
                first_hash: first.to_string(),
                second_hash: commit.commit_hash.clone(),
            }));
        }
    }
    Ok(())
}

fn fresh_commit_id(taken: &mut Vec<String>) -> String {
    loop {
        let id = Uuid::new_v4().simple().to_string()[..8].to_string();
        if !taken.contains(&id) {
            taken.push(id.clone());
            return id;
        }
    }
}

/// Parse the stack without touching history; commits that have no trailer
/// yet keep an empty commit id. Read-only commands use this.
pub fn read_stack_lenient(config: &Config, git: &Git) -> Result<Vec<Commit>> {
    let upstream = upstream_ref(config, git);
    let raw = read_log(git, &format!("{}..HEAD", upstream))?;
    Ok(raw
        .iter()
        .map(|r| {
            let id = commit_id_from_message(&r.message).unwrap_or_default();
            commit_from_raw(r, &id)
        })
        .collect())
}

/// Read the local commit stack `trunk..HEAD`, installing `commit-id`
/// trailers on any commit that lacks one. Returns commits bottom-up.
///
/// When trailers need installing, the branch is reset back to just below
/// the oldest unidentified commit and the remainder is cherry-picked
/// forward, amending messages along the way. Any failure restores the
/// branch to the pre-operation head before the error propagates.
pub fn local_commit_stack(config: &Config, git: &Git) -> Result<Vec<Commit>> {
    let upstream = upstream_ref(config, git);
    let range = format!("{}..HEAD", upstream);
    let raw = read_log(git, &range)
        .with_context(|| format!("failed to read commit log for {}", range))?;
    if raw.is_empty() {
        return Ok(vec![]);
    }

    let ids: Vec<Option<String>> = raw
        .iter()
        .map(|r| commit_id_from_message(&r.message))
        .collect();

    if ids.iter().all(|id| id.is_some()) {
        let commits: Vec<Commit> = raw
            .iter()
            .zip(&ids)
            .map(|(r, id)| commit_from_raw(r, id.as_deref().unwrap_or_default()))
            .collect();
        check_unique_ids(&commits)?;
        return Ok(commits);
    }

    // Duplicates among already-present trailers are fatal before any
    // rewrite happens.
    {
        let mut seen: HashMap<&str, &str> = HashMap::new();
        for (r, id) in raw.iter().zip(&ids) {
            if let Some(id) = id {
                if let Some(first) = seen.insert(id.as_str(), r.hash.as_str()) {
                    return Err(anyhow!(Error::DuplicateCommitId {
                        commit_id: id.clone(),
                        first_hash: first.to_string(),
                        second_hash: r.hash.clone(),
                    }));
                }
            }
        }
    }

    let mut taken: Vec<String> = ids.iter().flatten().cloned().collect();
    let first_missing = ids
        .iter()
        .position(|id| id.is_none())
        .unwrap_or(raw.len());

    info!(
        "Installing commit-id trailers on {} commit(s)",
        ids.iter().filter(|id| id.is_none()).count()
    );

    let branch = git.current_branch()?;
    let original_head = git.head()?;
    let mut rewrite = || -> Result<Vec<Commit>> {
        // Keep everything below the oldest unidentified commit untouched.
        let reset_to = if first_missing == 0 {
            format!("{}^", raw[0].hash)
        } else {
            raw[first_missing - 1].hash.clone()
        };
        git.write(&["reset", "--hard", &reset_to])?;

        let mut commits: Vec<Commit> = raw[..first_missing]
            .iter()
            .zip(&ids[..first_missing])
            .map(|(r, id)| commit_from_raw(r, id.as_deref().unwrap_or_default()))
            .collect();

        for (r, id) in raw[first_missing..].iter().zip(&ids[first_missing..]) {
            git.write(&["cherry-pick", &r.hash])?;
            let commit_id = match id {
                Some(id) => id.clone(),
                None => {
                    let new_id = fresh_commit_id(&mut taken);
                    debug!("commit {} gets commit-id {}", &r.hash[..8], new_id);
                    let new_msg =
                        format!("{}\n\ncommit-id:{}", r.message.trim_end(), new_id);
                    git.write(&["commit", "--amend", "-m", &new_msg])?;
                    new_id
                }
            };
            let new_hash = git.head()?;
            let new_msg = git.read(&["log", "-1", "--format=%B", &new_hash])?;
            commits.push(commit_from_raw(
                &RawCommit {
                    hash: new_hash,
                    message: new_msg,
                },
                &commit_id,
            ));
        }
        Ok(commits)
    };

    match rewrite() {
        Ok(commits) => {
            check_unique_ids(&commits)?;
            Ok(commits)
        }
        Err(e) => {
            let _ = git.write(&["cherry-pick", "--abort"]);
            let _ = git.write(&["checkout", &branch]);
            let _ = git.write(&["reset", "--hard", &original_head]);
            Err(e.context("failed to install commit-id trailers; branch restored"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{init_repo_with_origin, RepoFixture};

    fn stack(fixture: &RepoFixture) -> Vec<Commit> {
        let git = fixture.git();
        let config = fixture.config();
        local_commit_stack(&config, &git).unwrap()
    }

    #[test]
    fn trailers_installed_once_and_preserved() {
        let fixture = init_repo_with_origin();
        fixture.commit_file("a.txt", "a\n", "Add alpha");
        fixture.commit_file("b.txt", "b\n", "Add beta\n\nLonger body here.");

        let commits = stack(&fixture);
        assert_eq!(commits.len(), 2);
        assert_eq!(commits[0].subject, "Add alpha");
        for c in &commits {
            assert_eq!(c.commit_id.len(), 8);
            assert!(c.body.contains(&format!("commit-id:{}", c.commit_id)));
        }
        assert_ne!(commits[0].commit_id, commits[1].commit_id);

        // A second read is a no-op: same ids, same hashes.
        let again = stack(&fixture);
        assert_eq!(again, commits);
    }

    #[test]
    fn amend_preserves_identity_and_changes_hash() {
        let fixture = init_repo_with_origin();
        fixture.commit_file("a.txt", "a\n", "Add alpha");
        let before = stack(&fixture);

        // Amend content only; the message (and trailer) stays intact.
        std::fs::write(fixture.path().join("a.txt"), "a2\n").unwrap();
        fixture.run_git(&["add", "."]);
        fixture.run_git(&["commit", "--amend", "--no-edit"]);

        let after = stack(&fixture);
        assert_eq!(after[0].commit_id, before[0].commit_id);
        assert_ne!(after[0].commit_hash, before[0].commit_hash);
    }

    #[test]
    fn partial_stack_only_rewrites_the_tail() {
        let fixture = init_repo_with_origin();
        fixture.commit_file("a.txt", "a\n", "Add alpha");
        let first = stack(&fixture);
        // New commit on top has no trailer yet.
        fixture.commit_file("b.txt", "b\n", "Add beta");

        let commits = stack(&fixture);
        assert_eq!(commits.len(), 2);
        // The bottom commit kept its hash: the rewrite started above it.
        assert_eq!(commits[0].commit_hash, first[0].commit_hash);
        assert_eq!(commits[0].commit_id, first[0].commit_id);
        assert_eq!(commits[1].commit_id.len(), 8);
    }

    #[test]
    fn duplicate_trailers_are_a_hard_error() {
        let fixture = init_repo_with_origin();
        fixture.commit_file("a.txt", "a\n", "Add alpha\n\ncommit-id:aaaabbbb");
        fixture.commit_file("b.txt", "b\n", "Add beta\n\ncommit-id:aaaabbbb");

        let git = fixture.git();
        let config = fixture.config();
        let err = local_commit_stack(&config, &git).unwrap_err();
        let typed = err.downcast_ref::<Error>().expect("typed error");
        match typed {
            Error::DuplicateCommitId {
                commit_id,
                first_hash,
                second_hash,
            } => {
                assert_eq!(commit_id, "aaaabbbb");
                assert_ne!(first_hash, second_hash);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.to_string().contains("cherry-picked"));
    }

    #[test]
    fn wip_detection_and_prefix() {
        let fixture = init_repo_with_origin();
        fixture.commit_file("a.txt", "a\n", "Add alpha");
        fixture.commit_file("w.txt", "w\n", "WIP: experiment");
        fixture.commit_file("b.txt", "b\n", "Add beta");

        let commits = stack(&fixture);
        assert_eq!(commits.len(), 3);
        assert!(!commits[0].wip);
        assert!(commits[1].wip);
        let eligible = non_wip_prefix(&commits);
        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].subject, "Add alpha");
    }

    #[test]
    fn empty_range_is_empty_stack() {
        let fixture = init_repo_with_origin();
        let commits = stack(&fixture);
        assert!(commits.is_empty());
    }
}
