//! `spr update`: the full sync pass.
//!
//! Pipeline: preflight fetch/rebase → commit identity → forge snapshot →
//! stack match → close-on-disappear → branch pushes → per-PR reconcile
//! (create-if-absent or update-in-place, base recompute, body re-render)
//! → reviewer requests. Cross-PR state is computed once from the matched
//! stack, so the PR fan-out can run out of order safely.

use anyhow::{anyhow, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;
use tracing::{error, info, warn};

use crate::branches::{is_breakup_branch, pr_branch_name};
use crate::commands::common::{filter_reviewers, preflight_fetch_and_rebase, reject_pr_branch};
use crate::commands::status;
use crate::commit::{local_commit_stack, non_wip_prefix, Commit};
use crate::config::Config;
use crate::forge::{CreateResult, Forge, PrUpdate, PullRequest};
use crate::git::Git;
use crate::pool::run_bounded;
use crate::push::sync_stack;
use crate::render::format_body;
use crate::snapshot::take_snapshot;
use crate::stack::match_stack;

/// Base ref a commit's PR should have, given its predecessor.
fn desired_base(config: &Config, prev: Option<&Commit>) -> String {
    match prev {
        Some(prev) => pr_branch_name(&config.repo, &prev.commit_id),
        None => config.repo.github_branch_target.clone(),
    }
}

fn create_pr_for_commit(
    config: &Config,
    forge: &dyn Forge,
    commit: &Commit,
    prev: Option<&Commit>,
) -> Result<PullRequest> {
    let head = pr_branch_name(&config.repo, &commit.commit_id);
    let base = desired_base(config, prev);
    info!("> github create : {}", commit.subject);

    let created = forge.create_pr(&commit.subject, "Creating...", &base, &head)?;
    let record = match created {
        CreateResult::Created(record) => record,
        CreateResult::AlreadyExists => {
            warn!("PR already exists for branch {}, reusing it", head);
            forge
                .get_pr_for_branch(&head)?
                .ok_or_else(|| anyhow!("forge reported an existing PR for {} but none was found", head))?
        }
    };
    Ok(PullRequest::from_parts(
        &record,
        commit.clone(),
        vec![commit.clone()],
    ))
}

fn reconcile_spinner(label: &str, total: usize) -> ProgressBar {
    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::with_template(&format!("{{spinner}} {} {{pos}}/{{len}} PR(s)…", label))
            .unwrap()
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}

pub fn update_pull_requests(
    config: &Config,
    git: &Git,
    forge: &dyn Forge,
    reviewers: &[String],
    count: Option<usize>,
    labels: &[String],
) -> Result<()> {
    let mut all_labels = config.repo.labels.clone();
    all_labels.extend(labels.iter().cloned());
    let pretend = config.tool.pretend;

    preflight_fetch_and_rebase(config, git)?;
    reject_pr_branch(config, git)?;

    let local_commits = local_commit_stack(config, git)?;
    let snapshot = take_snapshot(config, forge)?;
    let matched = match_stack(&config.repo.github_branch, &local_commits, &snapshot);

    // PRs whose commit disappeared locally are closed only when configured;
    // otherwise they are preserved (they may belong to another branch).
    let mut valid: Vec<PullRequest> = vec![];
    for pr in matched {
        let still_local = local_commits
            .iter()
            .any(|c| c.commit_id == pr.commit.commit_id);
        if still_local {
            valid.push(pr);
        } else if config.repo.auto_close_prs {
            if pretend {
                info!(
                    "[PRETEND] Would close PR #{} - commit {} has gone away",
                    pr.number, pr.commit.commit_id
                );
            } else {
                info!(
                    "Closing PR #{} - commit {} has gone away",
                    pr.number, pr.commit.commit_id
                );
                if let Err(e) =
                    forge.add_comment(pr.number, "Closing pull request: commit has gone away")
                {
                    error!("Failed to comment on PR #{}: {}", pr.number, e);
                }
                forge.close_pr(pr.number)?;
            }
        } else {
            info!("Not closing PR #{} - auto_close_prs is disabled", pr.number);
            valid.push(pr);
        }
    }

    let non_wip = non_wip_prefix(&local_commits);

    sync_stack(config, git, &local_commits, &snapshot)?;

    // Walk commits in order, pairing each with its PR (created on demand),
    // to rebuild the stack bottom-up.
    let mut stack: Vec<PullRequest> = vec![];
    let mut queue: Vec<(PullRequest, Commit, Option<Commit>)> = vec![];
    for (index, commit) in non_wip.iter().enumerate() {
        if count == Some(index) {
            break;
        }
        let prev = if index > 0 {
            Some(non_wip[index - 1].clone())
        } else {
            None
        };

        let existing = valid
            .iter()
            .position(|pr| pr.commit.commit_id == commit.commit_id);
        let pr = match existing {
            Some(pos) => {
                let mut pr = valid.remove(pos);
                pr.commit = commit.clone();
                pr
            }
            None => {
                if pretend {
                    let branch = pr_branch_name(&config.repo, &commit.commit_id);
                    info!(
                        "[PRETEND] Would create PR for commit {} ({}): head {}, base {}",
                        &commit.commit_hash[..8],
                        commit.subject,
                        branch,
                        desired_base(config, prev.as_ref())
                    );
                    continue;
                }
                create_pr_for_commit(config, forge, commit, prev.as_ref())?
            }
        };
        stack.push(pr.clone());
        queue.push((pr, commit.clone(), prev));
    }

    if pretend {
        for (pr, _, prev) in &queue {
            let base = desired_base(config, prev.as_ref());
            if pr.base_ref != base {
                info!("[PRETEND] PR #{}: would update base to {}", pr.number, base);
            }
        }
        return status::status_pull_requests(config, git, forge);
    }

    // Reconcile fan-out: each call targets a distinct PR; ordering is
    // irrelevant because the stack was computed above.
    let pb = reconcile_spinner("Updating", queue.len());
    let jobs: Vec<_> = queue
        .iter()
        .map(|(pr, commit, prev)| {
            let pb = pb.clone();
            let stack = &stack;
            let all_labels = &all_labels;
            move || -> Result<()> {
                let is_breakup = is_breakup_branch(&config.repo, &pr.from_branch);
                let mut update = PrUpdate::default();
                if pr.title != commit.subject {
                    update.title = Some(commit.subject.clone());
                }
                update.body = Some(format_body(config, commit, stack, is_breakup));
                let base = desired_base(config, prev.as_ref());
                if pr.base_ref != base && !pr.in_queue && !is_breakup {
                    update.base = Some(base);
                }
                info!("> github update #{} : {}", pr.number, commit.subject);
                forge.update_pr(pr.number, &update)?;
                if !all_labels.is_empty() {
                    if let Err(e) = forge.add_labels(pr.number, all_labels) {
                        error!("Failed to add labels to PR #{}: {}", pr.number, e);
                    }
                }
                pb.inc(1);
                Ok(())
            }
        })
        .collect();
    let result = run_bounded(config.tool.concurrency, jobs);
    pb.finish_and_clear();
    result?;

    // Reviewers apply to the whole reconciled stack, not just new PRs.
    let filtered = filter_reviewers(forge, reviewers);
    if !filtered.is_empty() {
        let jobs: Vec<_> = stack
            .iter()
            .map(|pr| {
                let filtered = &filtered;
                move || -> Result<()> {
                    info!("> github add reviewers #{} : {:?}", pr.number, filtered);
                    if let Err(e) = forge.request_reviewers(pr.number, filtered) {
                        error!("Adding reviewers to PR #{} failed: {}", pr.number, e);
                    }
                    Ok(())
                }
            })
            .collect();
        run_bounded(config.tool.concurrency, jobs)?;
    }

    status::status_pull_requests(config, git, forge)
}
