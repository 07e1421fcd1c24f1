//! Push planner: compute the minimal set of ref updates and deliver them.
//!
//! A commit needs a push when it has no PR yet or its hash differs from the
//! PR's top commit. Delivery is one atomic forced push by default, falling
//! back to individual pushes when configured, with bounded parallelism when
//! `tool.concurrency` is set.

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;
use tracing::{error, info};

use crate::branches::pr_branch_name;
use crate::commit::{non_wip_prefix, Commit};
use crate::config::Config;
use crate::git::Git;
use crate::pool::run_bounded;
use crate::snapshot::Snapshot;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefUpdate {
    pub commit_hash: String,
    pub branch: String,
}

impl RefUpdate {
    pub fn refspec(&self) -> String {
        format!("{}:refs/heads/{}", self.commit_hash, self.branch)
    }
}

/// Ref updates for every non-WIP commit that is new or whose content moved.
pub fn plan_updates(config: &Config, commits: &[Commit], snapshot: &Snapshot) -> Vec<RefUpdate> {
    let mut updates = vec![];
    for commit in non_wip_prefix(commits) {
        let changed = match snapshot.get(&commit.commit_id) {
            Some(pr) => pr.commit.commit_hash != commit.commit_hash,
            None => true,
        };
        if changed {
            updates.push(RefUpdate {
                commit_hash: commit.commit_hash.clone(),
                branch: pr_branch_name(&config.repo, &commit.commit_id),
            });
        }
    }
    updates
}

fn push_spinner(count: usize) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner} Pushing {pos} branch(es)…")
            .unwrap()
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    pb.set_position(count as u64);
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}

fn deliver(config: &Config, git: &Git, updates: &[RefUpdate]) -> Result<()> {
    let remote = config.repo.github_remote.as_str();
    let individually =
        config.repo.branch_push_individually || config.tool.concurrency > 0;
    let pb = push_spinner(updates.len());

    let result = if !individually {
        let mut argv: Vec<String> =
            vec!["push".into(), "--force".into(), "--atomic".into(), remote.into()];
        argv.extend(updates.iter().map(|u| u.refspec()));
        let args: Vec<&str> = argv.iter().map(|s| s.as_str()).collect();
        git.write(&args).map(|_| ())
    } else if config.tool.concurrency > 0 && updates.len() > 1 {
        let best_effort = config.user.best_effort;
        let jobs: Vec<_> = updates
            .iter()
            .map(|update| {
                let refspec = update.refspec();
                move || -> Result<()> {
                    match git.write(&["push", "--force", remote, &refspec]) {
                        Ok(_) => Ok(()),
                        Err(e) if best_effort => {
                            error!("Push failed (continuing): {}", e);
                            Ok(())
                        }
                        Err(e) => Err(e),
                    }
                }
            })
            .collect();
        run_bounded(config.tool.concurrency, jobs).map(|_| ())
    } else {
        let mut result = Ok(());
        for update in updates {
            match git.write(&["push", "--force", remote, &update.refspec()]) {
                Ok(_) => {}
                Err(e) if config.user.best_effort => {
                    error!("Push failed (continuing): {}", e);
                }
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }
        result
    };

    pb.finish_and_clear();
    result
}

/// Synchronize stack branches to the remote.
///
/// Dirty working trees are stashed for the duration and always unstashed.
/// In pretend mode the plan is printed and nothing is pushed.
pub fn sync_stack(
    config: &Config,
    git: &Git,
    commits: &[Commit],
    snapshot: &Snapshot,
) -> Result<()> {
    let updates = plan_updates(config, commits, snapshot);
    if updates.is_empty() {
        info!("All stack branches up to date; nothing to push");
        return Ok(());
    }

    if config.tool.pretend {
        info!("[PRETEND] Would push the following branches:");
        for update in &updates {
            info!("  {} ({})", update.branch, &update.commit_hash[..8]);
        }
        return Ok(());
    }

    git.with_stash(|| deliver(config, git, &updates))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{init_repo_with_origin, snapshot_of, stub_record};

    #[test]
    fn plans_only_new_or_moved_commits() {
        let config = crate::config::test_config();
        let commits = vec![
            Commit::new("aaaa1111", "hash-a", "one", ""),
            Commit::new("bbbb2222", "hash-b-new", "two", ""),
            Commit::new("cccc3333", "hash-c", "three", ""),
        ];
        let snapshot = snapshot_of(
            &config,
            vec![
                stub_record(1, "spr/main/aaaa1111", "main", "aaaa1111", "hash-a"),
                stub_record(2, "spr/main/bbbb2222", "spr/main/aaaa1111", "bbbb2222", "hash-b-old"),
            ],
        );
        let updates = plan_updates(&config, &commits, &snapshot);
        assert_eq!(
            updates.iter().map(|u| u.branch.as_str()).collect::<Vec<_>>(),
            vec!["spr/main/bbbb2222", "spr/main/cccc3333"]
        );
        assert_eq!(updates[0].refspec(), "hash-b-new:refs/heads/spr/main/bbbb2222");
    }

    #[test]
    fn wip_and_above_are_never_pushed() {
        let config = crate::config::test_config();
        let mut wip = Commit::new("bbbb2222", "hash-b", "WIP: two", "");
        wip.wip = true;
        let commits = vec![
            Commit::new("aaaa1111", "hash-a", "one", ""),
            wip,
            Commit::new("cccc3333", "hash-c", "three", ""),
        ];
        let updates = plan_updates(&config, &commits, &snapshot_of(&config, vec![]));
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].branch, "spr/main/aaaa1111");
    }

    #[test]
    fn atomic_push_lands_all_refs_on_origin() {
        let fixture = init_repo_with_origin();
        fixture.commit_file("a.txt", "a\n", "one");
        fixture.commit_file("b.txt", "b\n", "two");
        let config = fixture.config();
        let git = fixture.git();
        let commits = crate::commit::local_commit_stack(&config, &git).unwrap();

        sync_stack(&config, &git, &commits, &snapshot_of(&config, vec![])).unwrap();

        for commit in &commits {
            let branch = pr_branch_name(&config.repo, &commit.commit_id);
            let sha = fixture.origin_rev_parse(&branch);
            assert_eq!(sha, commit.commit_hash);
        }
    }

    #[test]
    fn individual_and_parallel_pushes_land_the_same_refs() {
        let fixture = init_repo_with_origin();
        fixture.commit_file("a.txt", "a\n", "one");
        fixture.commit_file("b.txt", "b\n", "two");
        fixture.commit_file("c.txt", "c\n", "three");
        let mut config = fixture.config();
        config.tool.concurrency = 2;
        let git = fixture.git();
        let commits = crate::commit::local_commit_stack(&config, &git).unwrap();

        sync_stack(&config, &git, &commits, &snapshot_of(&config, vec![])).unwrap();
        for commit in &commits {
            let branch = pr_branch_name(&config.repo, &commit.commit_id);
            assert_eq!(fixture.origin_rev_parse(&branch), commit.commit_hash);
        }
    }

    #[test]
    fn pretend_pushes_nothing() {
        let fixture = init_repo_with_origin();
        fixture.commit_file("a.txt", "a\n", "one");
        let mut config = fixture.config();
        let git = fixture.git();
        let commits = crate::commit::local_commit_stack(&config, &git).unwrap();
        config.tool.pretend = true;

        sync_stack(&config, &git, &commits, &snapshot_of(&config, vec![])).unwrap();
        let branch = pr_branch_name(&config.repo, &commits[0].commit_id);
        assert!(!fixture.origin_has_branch(&branch));
    }
}
