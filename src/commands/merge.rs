//! `spr merge`: collapse the stack onto the target branch in dependency
//! order.
//!
//! The bottom PR is located by `github_branch_target`; the chain above it is
//! walked with branch names composed from `github_branch`. The two defaults
//! coincide but the keys are distinct on purpose and kept separate here.

use anyhow::Result;
use tracing::{info, warn};

use crate::commands::common::{pr_url, preflight_fetch_and_rebase};
use crate::commit::local_commit_stack;
use crate::config::Config;
use crate::errors::Error;
use crate::forge::{Forge, PrUpdate, PullRequest};
use crate::git::Git;
use crate::pretty::print_header;
use crate::snapshot::take_snapshot;
use crate::stack::match_stack;

/// Order the matched PRs bottom-up by chasing base pointers.
fn stack_order(config: &Config, prs: &[PullRequest]) -> Vec<PullRequest> {
    let target = &config.repo.github_branch_target;
    let Some(base_pr) = prs.iter().find(|pr| &pr.base_ref == target) else {
        return vec![];
    };

    let mut ordered = vec![base_pr.clone()];
    let mut current = base_pr;
    while let Some(next) = prs.iter().find(|pr| {
        pr.base_ref
            == format!(
                "spr/{}/{}",
                config.repo.github_branch, current.commit.commit_id
            )
    }) {
        ordered.push(next.clone());
        current = next;
    }
    ordered
}

/// Merge the PR on the forge, routing through the merge queue when
/// configured. A repository that requires the queue but refuses the PR is a
/// hard failure; a queue that is merely unsupported falls back to a direct
/// merge.
fn merge_on_forge(config: &Config, forge: &dyn Forge, number: u64) -> Result<()> {
    let method = config.repo.merge_method;
    if config.repo.merge_queue {
        match forge.enable_automerge(number, method) {
            Ok(()) => {
                let msg = format!("PR #{} added to merge queue", number);
                info!("{}", msg);
                println!("{}", msg);
                return Ok(());
            }
            Err(e) => {
                if e.downcast_ref::<Error>()
                    .is_some_and(|e| matches!(e, Error::MergeQueueRequired { .. }))
                {
                    return Err(e);
                }
                warn!("Merge queue not supported here: {}; merging directly", e);
            }
        }
    }
    forge.merge_pr(number, method)
}

pub fn merge_pull_requests(
    config: &Config,
    git: &Git,
    forge: &dyn Forge,
    count: Option<usize>,
) -> Result<()> {
    preflight_fetch_and_rebase(config, git)?;

    let local_commits = local_commit_stack(config, git)?;
    let snapshot = take_snapshot(config, forge)?;
    let matched = match_stack(&config.repo.github_branch, &local_commits, &snapshot);
    if matched.is_empty() {
        info!("No pull requests to merge");
        return Ok(());
    }

    let ordered = stack_order(config, &matched);
    if ordered.is_empty() {
        info!("No PR targets {}; nothing to merge", config.repo.github_branch_target);
        return Ok(());
    }

    // Highest mergeable PR, bounded by --count from the bottom.
    let mut index = ordered.len() as isize - 1;
    while index >= 0 {
        let pr = &ordered[index as usize];
        if pr.mergeable() {
            if count.is_some_and(|n| index as usize + 1 > n) {
                index -= 1;
                continue;
            }
            break;
        }
        index -= 1;
    }
    if index < 0 {
        info!("No mergeable pull request in the stack");
        return Ok(());
    }
    let index = index as usize;
    let pr_to_merge = &ordered[index];

    let target = &config.repo.github_branch_target;
    print_header("Merging Pull Requests");
    println!();
    println!("   Merging PR #{} to {}", pr_to_merge.number, target);
    println!(
        "   This will merge {} PR{}",
        index + 1,
        if index > 0 { "s" } else { "" }
    );
    println!();

    // Retarget the top of the merged prefix onto the trunk, then merge it.
    forge.update_pr(
        pr_to_merge.number,
        &PrUpdate {
            base: Some(target.clone()),
            ..PrUpdate::default()
        },
    )?;
    merge_on_forge(config, forge, pr_to_merge.number)?;

    // Everything below was carried in by that merge; close with a pointer.
    for pr in &ordered[..index] {
        let comment = format!(
            "✓ Commit merged in pull request [#{}]({})",
            pr_to_merge.number,
            pr_url(config, pr_to_merge.number)
        );
        forge.add_comment(pr.number, &comment)?;
        forge.close_pr(pr.number)?;
    }

    for pr in &ordered[..=index] {
        let mut merged = pr.clone();
        merged.merged = true;
        println!("{} ✅ merged", merged);
    }
    Ok(())
}
