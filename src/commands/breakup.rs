//! `spr breakup`: project a linear history into independent PRs (or small
//! independent stacks) by cherry-pick probing.
//!
//! Every commit is probed against the trunk; the ones that apply cleanly
//! get a `…/cp/…` branch and a PR targeting the trunk. With `--stacks` the
//! commits are grouped first and each group is rebuilt as a chain whose PRs
//! point at their predecessor's breakup branch.

use anyhow::Result;
use tracing::{error, info, warn};

use crate::branches::breakup_branch_name;
use crate::commands::analyze::{group_commits, probe_cherry_pick, StackMode};
use crate::commands::common::{filter_reviewers, pr_url};
use crate::commit::{local_commit_stack, non_wip_prefix, Commit};
use crate::config::Config;
use crate::forge::{CreateResult, Forge, PrUpdate};
use crate::git::Git;
use crate::pretty::print_header;
use crate::render::format_body;

/// Git refuses atomic pushes past this many refs in one transaction.
const PUSH_BATCH_SIZE: usize = 5;

struct BranchPlan {
    commit: Commit,
    branch: String,
    base: String,
}

/// Point the breakup branch at `new_hash` unless its tree already matches.
/// Tree comparison (not hash comparison) keeps CI quiet when content did
/// not actually change.
fn point_branch(config: &Config, git: &Git, branch: &str, new_hash: &str) -> Result<()> {
    if git.branch_exists(branch)? {
        let existing_tree = git.tree_of(branch)?;
        let new_tree = git.tree_of(new_hash)?;
        if existing_tree == new_tree {
            info!("  Branch {} already up to date (same content)", branch);
        } else if config.tool.pretend {
            info!("[PRETEND] Would update branch {} to {}", branch, &new_hash[..8]);
        } else {
            git.write(&["branch", "-f", branch, new_hash])?;
            info!("  Updated branch {}", branch);
        }
    } else if config.tool.pretend {
        info!("[PRETEND] Would create branch {} at {}", branch, &new_hash[..8]);
    } else {
        git.write(&["branch", branch, new_hash])?;
        info!("  Created branch {}", branch);
    }
    Ok(())
}

/// The revision breakup branches are built from: the remote trunk, or the
/// local trunk when rebasing is disabled and it exists.
fn breakup_base_rev(config: &Config, git: &Git) -> Result<String> {
    let target = &config.repo.github_branch_target;
    if config.user.no_rebase && git.branch_exists(target)? {
        return Ok(target.clone());
    }
    Ok(format!("{}/{}", config.repo.github_remote, target))
}

/// Probe each commit against the trunk independently.
fn plan_independent(
    config: &Config,
    git: &Git,
    base_rev: &str,
    commits: &[Commit],
) -> Result<(Vec<BranchPlan>, Vec<Commit>)> {
    let mut planned = vec![];
    let mut skipped = vec![];
    for (index, commit) in commits.iter().enumerate() {
        info!(
            "\nProcessing commit {}/{}: {}",
            index + 1,
            commits.len(),
            commit.subject
        );
        match probe_cherry_pick(git, base_rev, &commit.commit_hash, &commit.commit_id)? {
            Some(new_hash) => {
                let branch = breakup_branch_name(&config.repo, &commit.commit_id);
                point_branch(config, git, &branch, &new_hash)?;
                planned.push(BranchPlan {
                    commit: commit.clone(),
                    branch,
                    base: config.repo.github_branch_target.clone(),
                });
            }
            None => {
                info!("  Skipping - cannot cherry-pick independently");
                skipped.push(commit.clone());
            }
        }
    }
    Ok((planned, skipped))
}

/// Rebuild each group as a chain on a scratch branch; each commit's PR will
/// target its predecessor's breakup branch. Commits that conflict during
/// chain recreation fall out as orphans.
fn plan_stacked(
    config: &Config,
    git: &Git,
    base_rev: &str,
    groups: &[Vec<Commit>],
    orphans: &mut Vec<Commit>,
) -> Result<Vec<BranchPlan>> {
    let original = git.current_branch()?;
    let scratch = "pyspr-stack-temp";
    let mut planned = vec![];

    for group in groups {
        let _ = git.write(&["branch", "-D", scratch]);
        git.write(&["checkout", "-b", scratch, base_rev])?;
        let mut prev_branch: Option<String> = None;

        for commit in group {
            match git.write(&["cherry-pick", &commit.commit_hash]) {
                Ok(_) => {
                    let new_hash = git.head()?;
                    let branch = breakup_branch_name(&config.repo, &commit.commit_id);
                    point_branch(config, git, &branch, &new_hash)?;
                    planned.push(BranchPlan {
                        commit: commit.clone(),
                        branch: branch.clone(),
                        base: prev_branch
                            .clone()
                            .unwrap_or_else(|| config.repo.github_branch_target.clone()),
                    });
                    prev_branch = Some(branch);
                }
                Err(e) => {
                    warn!(
                        "  {} fell out of its chain: {}",
                        &commit.commit_hash[..8],
                        e
                    );
                    let _ = git.write(&["cherry-pick", "--abort"]);
                    orphans.push(commit.clone());
                }
            }
        }

        if git.write(&["checkout", &original]).is_err() {
            git.write(&["checkout", "-f", &original])?;
        }
        let _ = git.write(&["branch", "-D", scratch]);
    }
    Ok(planned)
}

/// Push planned branches in batches; a batch failure retries individually.
/// Returns the branches that made it to the remote.
fn push_planned(config: &Config, git: &Git, planned: &[BranchPlan]) -> Result<Vec<String>> {
    let remote = &config.repo.github_remote;
    let mut pushed = vec![];
    let mut failed: Vec<(String, String)> = vec![];

    info!("\nPushing {} branches to remote...", planned.len());
    for (batch_index, batch) in planned.chunks(PUSH_BATCH_SIZE).enumerate() {
        let refspecs: Vec<String> = batch
            .iter()
            .map(|p| format!("{}:refs/heads/{}", p.branch, p.branch))
            .collect();
        let mut argv: Vec<String> = vec!["push".into(), "--force".into(), remote.clone()];
        argv.extend(refspecs);
        let args: Vec<&str> = argv.iter().map(|s| s.as_str()).collect();

        match git.write(&args) {
            Ok(_) => {
                pushed.extend(batch.iter().map(|p| p.branch.clone()));
                info!(
                    "Pushed batch {}/{} ({} branches)",
                    batch_index + 1,
                    planned.len().div_ceil(PUSH_BATCH_SIZE),
                    batch.len()
                );
            }
            Err(e) => {
                warn!("Batch push failed, trying individually: {}", e);
                for plan in batch {
                    let refspec = format!("{}:refs/heads/{}", plan.branch, plan.branch);
                    match git.write(&["push", "--force", remote, &refspec]) {
                        Ok(_) => pushed.push(plan.branch.clone()),
                        Err(e) => {
                            let msg = e.to_string();
                            if msg.contains("has been added to a merge queue") {
                                warn!("  {} is in merge queue, skipping update", plan.branch);
                            } else {
                                error!("  Failed to push {}: {}", plan.branch, msg);
                            }
                            failed.push((plan.branch.clone(), msg));
                        }
                    }
                }
            }
        }
    }

    if failed.is_empty() {
        info!("Pushed all {} branches successfully", planned.len());
    } else {
        info!(
            "Pushed {} branches successfully, {} failed",
            pushed.len(),
            failed.len()
        );
    }
    Ok(pushed)
}

/// Create or refresh the PR for each pushed branch. Breakup PRs carry no
/// stack section; existing PRs only get their base moved in stacked mode.
fn upsert_prs(
    config: &Config,
    forge: &dyn Forge,
    planned: &[BranchPlan],
    pushed: &[String],
    reviewers: &[String],
    stacked: bool,
) -> Result<Vec<(u64, String)>> {
    let mut created = vec![];
    let filtered_reviewers = if reviewers.is_empty() {
        vec![]
    } else {
        filter_reviewers(forge, reviewers)
    };

    for plan in planned {
        if !pushed.contains(&plan.branch) {
            continue;
        }
        if config.tool.pretend {
            info!(
                "[PRETEND] Would create/update PR for {}: {} (base {})",
                plan.branch, plan.commit.subject, plan.base
            );
            continue;
        }
        let body = format_body(config, &plan.commit, &[], true);
        match forge.get_pr_for_branch(&plan.branch)? {
            Some(existing) => {
                info!("  PR #{} already exists for {}", existing.number, plan.branch);
                let mut update = PrUpdate {
                    body: Some(body),
                    ..PrUpdate::default()
                };
                if existing.title != plan.commit.subject {
                    update.title = Some(plan.commit.subject.clone());
                }
                if stacked && existing.base_ref != plan.base {
                    update.base = Some(plan.base.clone());
                }
                forge.update_pr(existing.number, &update)?;
                created.push((existing.number, existing.title.clone()));
            }
            None => {
                let record = match forge.create_pr(
                    &plan.commit.subject,
                    &body,
                    &plan.base,
                    &plan.branch,
                )? {
                    CreateResult::Created(record) => record,
                    CreateResult::AlreadyExists => {
                        // Raced with ourselves; fall back to lookup.
                        match forge.get_pr_for_branch(&plan.branch)? {
                            Some(record) => record,
                            None => continue,
                        }
                    }
                };
                info!("  Created PR #{} for {}", record.number, plan.branch);
                if !filtered_reviewers.is_empty() {
                    if let Err(e) =
                        forge.request_reviewers(record.number, &filtered_reviewers)
                    {
                        error!("  Failed to add reviewers: {}", e);
                    }
                }
                created.push((record.number, record.title.clone()));
            }
        }
    }
    Ok(created)
}

pub fn breakup_pull_requests(
    config: &Config,
    git: &Git,
    forge: &dyn Forge,
    reviewers: &[String],
    count: Option<usize>,
    only_ids: Option<&[String]>,
    stacks: bool,
    stack_mode: StackMode,
) -> Result<()> {
    let all_commits = local_commit_stack(config, git)?;
    let mut commits = non_wip_prefix(&all_commits);
    if commits.is_empty() {
        info!("No non-WIP commits to break up");
        return Ok(());
    }
    if let Some(n) = count {
        commits.truncate(n);
    }
    if let Some(ids) = only_ids {
        commits.retain(|c| ids.iter().any(|id| id == &c.commit_id));
    }

    info!(
        "Breaking up {} commits into independent branches/PRs",
        commits.len()
    );
    let base_rev = breakup_base_rev(config, git)?;

    let (planned, skipped) = if stacks {
        let (groups, mut orphans) = group_commits(config, git, &commits, stack_mode)?;
        let planned = plan_stacked(config, git, &base_rev, &groups, &mut orphans)?;
        (planned, orphans)
    } else {
        plan_independent(config, git, &base_rev, &commits)?
    };

    let pushed = if planned.is_empty() || config.tool.pretend {
        planned.iter().map(|p| p.branch.clone()).collect()
    } else {
        push_planned(config, git, &planned)?
    };

    let created = upsert_prs(config, forge, &planned, &pushed, reviewers, stacks)?;

    print_header("Breakup Summary");
    println!("\nProcessed {} commits:", commits.len());
    println!(
        "  ✅ Successfully created/updated: {} branches",
        pushed.len()
    );
    println!("  ⏭️  Skipped (dependent commits): {}", skipped.len());
    if !created.is_empty() {
        println!("\nCreated/updated {} pull requests:", created.len());
        for (number, title) in &created {
            println!("  PR #{}: {}", number, title);
            println!("    {}", pr_url(config, *number));
        }
    }
    if !skipped.is_empty() {
        println!("\nSkipped {} commits that depend on earlier commits:", skipped.len());
        for commit in &skipped {
            println!("  {} {}", &commit.commit_hash[..8], commit.subject);
        }
    }
    Ok(())
}
