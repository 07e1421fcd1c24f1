//! Forge snapshot: the one-shot view of the user's open PRs, keyed by
//! commit id.
//!
//! The head-branch name and the `commit-id:` trailer in the PR's top commit
//! both encode the identity; when they disagree the trailer wins, since the
//! trailer travels with the commit while a branch can be re-pointed.

use anyhow::Result;
use std::collections::HashMap;
use tracing::debug;

use crate::branches::commit_id_from_branch;
use crate::commit::{commit_id_from_message, Commit};
use crate::config::Config;
use crate::forge::{Forge, PrRecord, PullRequest};

/// Immutable within one command invocation.
#[derive(Debug, Default)]
pub struct Snapshot {
    by_id: HashMap<String, PullRequest>,
}

impl Snapshot {
    pub fn get(&self, commit_id: &str) -> Option<&PullRequest> {
        self.by_id.get(commit_id)
    }

    pub fn contains(&self, commit_id: &str) -> bool {
        self.by_id.contains_key(commit_id)
    }

    pub fn prs(&self) -> impl Iterator<Item = &PullRequest> {
        self.by_id.values()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

fn bind_record(record: &PrRecord, branch_id: &str) -> Option<PullRequest> {
    let top = record.commits.last()?;
    // Trailer beats branch name when both are present.
    let commit_id =
        commit_id_from_message(&top.message).unwrap_or_else(|| branch_id.to_string());
    let commit = Commit::new(&commit_id, &top.oid, &top.headline, &top.message);

    let commits: Vec<Commit> = record
        .commits
        .iter()
        .filter_map(|c| {
            commit_id_from_message(&c.message)
                .map(|id| Commit::new(&id, &c.oid, &c.headline, &c.message))
        })
        .collect();

    Some(PullRequest::from_parts(record, commit, commits))
}

/// Fetch the user's open PRs and decode the ones whose head branch belongs
/// to this tool into a `commit_id -> PullRequest` mapping.
pub fn take_snapshot(config: &Config, forge: &dyn Forge) -> Result<Snapshot> {
    let records = forge.fetch_open_prs_for_user(
        &config.repo.github_repo_owner,
        &config.repo.github_repo_name,
    )?;
    Ok(snapshot_from_records(config, &records))
}

/// Decode raw records into the snapshot mapping.
pub fn snapshot_from_records(config: &Config, records: &[PrRecord]) -> Snapshot {
    let mut by_id = HashMap::new();
    for record in records {
        let Some(branch_id) = commit_id_from_branch(&config.repo, &record.head_ref) else {
            continue;
        };
        let Some(pr) = bind_record(record, &branch_id) else {
            debug!("PR #{} has no commits, skipping", record.number);
            continue;
        };
        debug!(
            "snapshot: PR #{} head={} commit_id={}",
            pr.number, pr.from_branch, pr.commit.commit_id
        );
        by_id.insert(pr.commit.commit_id.clone(), pr);
    }
    Snapshot { by_id }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use crate::forge::CommitRecord;

    fn record(number: u64, head: &str, base: &str, commits: Vec<CommitRecord>) -> PrRecord {
        PrRecord {
            number,
            title: format!("PR {}", number),
            body: String::new(),
            base_ref: base.to_string(),
            head_ref: head.to_string(),
            mergeable: true,
            in_queue: false,
            merged: false,
            commits,
        }
    }

    fn commit(oid: &str, headline: &str, id: &str) -> CommitRecord {
        CommitRecord {
            oid: oid.to_string(),
            headline: headline.to_string(),
            message: format!("{}\n\ncommit-id:{}", headline, id),
        }
    }

    struct FakeForge(Vec<PrRecord>);

    impl Forge for FakeForge {
        fn viewer(&self) -> Result<String> {
            Ok("testuser".to_string())
        }
        fn fetch_open_prs_for_user(&self, _: &str, _: &str) -> Result<Vec<PrRecord>> {
            Ok(self.0.clone())
        }
        fn create_pr(
            &self,
            _: &str,
            _: &str,
            _: &str,
            _: &str,
        ) -> Result<crate::forge::CreateResult> {
            unimplemented!()
        }
        fn update_pr(&self, _: u64, _: &crate::forge::PrUpdate) -> Result<()> {
            unimplemented!()
        }
        fn close_pr(&self, _: u64) -> Result<()> {
            unimplemented!()
        }
        fn add_labels(&self, _: u64, _: &[String]) -> Result<()> {
            unimplemented!()
        }
        fn add_comment(&self, _: u64, _: &str) -> Result<()> {
            unimplemented!()
        }
        fn request_reviewers(&self, _: u64, _: &[String]) -> Result<()> {
            unimplemented!()
        }
        fn list_assignable_users(&self) -> Result<Vec<String>> {
            unimplemented!()
        }
        fn merge_pr(&self, _: u64, _: crate::config::MergeMethod) -> Result<()> {
            unimplemented!()
        }
        fn enable_automerge(&self, _: u64, _: crate::config::MergeMethod) -> Result<()> {
            unimplemented!()
        }
        fn get_pr_for_branch(&self, _: &str) -> Result<Option<PrRecord>> {
            unimplemented!()
        }
    }

    #[test]
    fn foreign_branches_are_ignored() {
        let config = test_config();
        let forge = FakeForge(vec![
            record(1, "spr/main/aaaa1111", "main", vec![commit("c1", "one", "aaaa1111")]),
            record(2, "feature/login", "main", vec![commit("c2", "two", "bbbb2222")]),
        ]);
        let snapshot = take_snapshot(&config, &forge).unwrap();
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.contains("aaaa1111"));
        assert!(!snapshot.contains("bbbb2222"));
    }

    #[test]
    fn trailer_wins_over_branch_name() {
        let config = test_config();
        // Branch says aaaa1111 but the top commit's trailer says cccc3333.
        let forge = FakeForge(vec![record(
            7,
            "spr/main/aaaa1111",
            "main",
            vec![commit("c9", "renamed", "cccc3333")],
        )]);
        let snapshot = take_snapshot(&config, &forge).unwrap();
        assert!(snapshot.contains("cccc3333"));
        assert!(!snapshot.contains("aaaa1111"));
    }

    #[test]
    fn top_commit_is_the_newest() {
        let config = test_config();
        let forge = FakeForge(vec![record(
            3,
            "spr/main/bbbb2222",
            "spr/main/aaaa1111",
            vec![
                commit("c1", "older", "aaaa1111"),
                commit("c2", "newer", "bbbb2222"),
            ],
        )]);
        let snapshot = take_snapshot(&config, &forge).unwrap();
        let pr = snapshot.get("bbbb2222").unwrap();
        assert_eq!(pr.commit.commit_hash, "c2");
        assert_eq!(pr.commits.len(), 2);
    }

    #[test]
    fn breakup_branches_decode_too() {
        let config = test_config();
        let forge = FakeForge(vec![record(
            4,
            "pyspr/cp/main/dddd4444",
            "main",
            vec![commit("c4", "solo", "dddd4444")],
        )]);
        let snapshot = take_snapshot(&config, &forge).unwrap();
        assert!(snapshot.contains("dddd4444"));
    }
}
