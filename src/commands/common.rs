//! Shared preflight and helper logic for the commands.

use anyhow::{bail, Context, Result};
use tracing::{debug, error, info};

use crate::branches::branch_pattern;
use crate::config::Config;
use crate::forge::Forge;
use crate::git::Git;

/// Validate the remote, fetch, and (unless no-rebase) rebase onto the
/// remote trunk before reading the stack.
pub fn preflight_fetch_and_rebase(config: &Config, git: &Git) -> Result<()> {
    let remote = &config.repo.github_remote;
    let branch = &config.repo.github_branch;

    let remotes = git.read(&["remote"])?;
    if !remotes.split_whitespace().any(|r| r == remote) {
        bail!(
            "remote '{}' not found; available remotes: {}",
            remote,
            remotes.split_whitespace().collect::<Vec<_>>().join(", ")
        );
    }

    git.read(&["fetch", remote])
        .with_context(|| format!("failed to fetch from {}", remote))?;

    let remote_ref = format!("{}/{}", remote, branch);
    if git.read(&["rev-parse", "--verify", &remote_ref]).is_err() {
        bail!(
            "branch '{}' not found on remote '{}'; push it first",
            branch,
            remote
        );
    }

    if config.user.no_rebase {
        debug!("Skipping rebase (no_rebase set)");
        return Ok(());
    }

    if let Err(e) = git.write(&["rebase", &remote_ref, "--autostash"]) {
        let status = git.read(&["status"]).unwrap_or_default();
        if status.contains("You have unmerged paths") || status.contains("fix conflicts") {
            let _ = git.write(&["rebase", "--abort"]);
            bail!(
                "rebase onto {} stopped on conflicts; resolve and rerun",
                remote_ref
            );
        }
        return Err(e.context(format!("rebase onto {} failed", remote_ref)));
    }
    Ok(())
}

/// Refuse to operate from a checked-out PR branch: running there creates
/// duplicate pull requests.
pub fn reject_pr_branch(config: &Config, git: &Git) -> Result<()> {
    let branch = git.current_branch()?;
    if branch_pattern(&config.repo).is_match(&branch) {
        error!("error: don't run spr from a remote pr branch");
        error!(" use a local branch and run `spr update` to sync the stack instead");
        bail!("current branch {} is a PR branch", branch);
    }
    Ok(())
}

pub fn pr_url(config: &Config, number: u64) -> String {
    format!(
        "https://{}/{}/{}/pull/{}",
        config.repo.github_host,
        config.repo.github_repo_owner,
        config.repo.github_repo_name,
        number
    )
}

/// Reduce requested reviewer logins to the ones the forge will accept:
/// assignable in this repository and not the current user. Login case from
/// the request is preserved.
pub fn filter_reviewers(forge: &dyn Forge, requested: &[String]) -> Vec<String> {
    if requested.is_empty() {
        return vec![];
    }
    let assignable = match forge.list_assignable_users() {
        Ok(users) => users,
        Err(e) => {
            error!("Failed to list assignable users: {}", e);
            return vec![];
        }
    };
    let viewer = forge.viewer().unwrap_or_default().to_lowercase();
    let mut out = vec![];
    for login in requested {
        let lower = login.to_lowercase();
        if lower == viewer {
            info!("Skipping self-review request for {}", login);
            continue;
        }
        if assignable.iter().any(|u| u.to_lowercase() == lower) {
            out.push(login.clone());
        } else {
            info!("Reviewer {} is not assignable here; skipping", login);
        }
    }
    out
}
