//! Stack matcher: reconcile local commits with snapshot PRs into an
//! ordered, connected stack.

use regex::Regex;
use tracing::debug;

use crate::commit::Commit;
use crate::forge::PullRequest;
use crate::snapshot::Snapshot;

/// Pattern the chain walk uses to step from a PR's base ref to the PR below
/// it. Only primary stack branches chain; breakup branches never do.
fn base_step_pattern() -> Regex {
    Regex::new(r"^spr/[^/]+/([a-f0-9]{8})$").expect("base pattern is a valid regex")
}

/// Build the current stack of PRs for the given local commits.
///
/// Policy, in priority order:
/// 1. If every local commit has a snapshot PR, the stack is those PRs in
///    local order.
/// 2. Otherwise walk the chain: start from the topmost local commit that
///    has a PR and follow `base_ref` pointers downward while they decode to
///    known commit ids, assembling bottom-up.
pub fn match_stack(
    target_branch: &str,
    local_commits: &[Commit],
    snapshot: &Snapshot,
) -> Vec<PullRequest> {
    if local_commits.is_empty() || snapshot.is_empty() {
        return vec![];
    }

    let direct: Vec<&PullRequest> = local_commits
        .iter()
        .filter_map(|c| snapshot.get(&c.commit_id))
        .collect();
    if direct.len() == local_commits.len() {
        debug!("match_stack: full direct match ({} PRs)", direct.len());
        return direct.into_iter().cloned().collect();
    }

    // Partial match: follow branch relationships from the top down.
    let mut stack: Vec<PullRequest> = vec![];
    let mut current = local_commits
        .iter()
        .rev()
        .find_map(|c| snapshot.get(&c.commit_id));
    let pattern = base_step_pattern();
    while let Some(pr) = current {
        stack.insert(0, pr.clone());
        debug!(
            "match_stack: added PR #{} ({}), base {}",
            pr.number, pr.commit.commit_id, pr.base_ref
        );
        if pr.base_ref == target_branch {
            break;
        }
        current = pattern
            .captures(&pr.base_ref)
            .and_then(|caps| snapshot.get(&caps[1]));
    }
    stack
}

/// Order `prs` by the position of their commit id in the local stack,
/// dropping WIP commits and PRs with no local counterpart.
pub fn sort_by_local_order(prs: &[PullRequest], local_commits: &[Commit]) -> Vec<PullRequest> {
    let mut out = vec![];
    for commit in local_commits {
        if commit.wip {
            continue;
        }
        if let Some(pr) = prs.iter().find(|pr| pr.commit.commit_id == commit.commit_id) {
            out.push(pr.clone());
        }
    }
    out
}
