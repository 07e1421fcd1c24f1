//! State-restoration guard.
//!
//! Mutating commands record `(branch, HEAD)` up front and run inside
//! [`with_restore`]; on failure the working tree is put back where it was,
//! including aborting any cherry-pick/rebase/merge left in progress.

use anyhow::Result;
use tracing::{error, info};

use crate::git::Git;

#[derive(Debug, Clone)]
pub struct GitState {
    pub branch: String,
    pub head: String,
}

pub fn save_state(git: &Git) -> Result<GitState> {
    Ok(GitState {
        branch: git.current_branch()?,
        head: git.head()?,
    })
}

/// Best-effort restore to the saved branch and head.
pub fn restore_state(git: &Git, state: &GitState) {
    info!("Attempting to restore repository state...");

    for abort in [
        ["cherry-pick", "--abort"],
        ["rebase", "--abort"],
        ["merge", "--abort"],
    ] {
        let _ = git.write(&abort);
    }

    if git.write(&["checkout", &state.branch]).is_err() {
        if git.write(&["checkout", "-f", &state.branch]).is_err() {
            error!("Failed to checkout {}", state.branch);
        }
    }

    match git.write(&["reset", "--hard", &state.head]) {
        Ok(_) => info!("Repository restored to original state"),
        Err(e) => {
            error!("Failed to reset to {}: {}", state.head, e);
            error!("Repository may be in an inconsistent state");
            error!(
                "To manually restore: git checkout {} && git reset --hard {}",
                state.branch, state.head
            );
        }
    }
}

/// Run `f`; on failure restore the saved state before propagating.
pub fn with_restore<T>(git: &Git, f: impl FnOnce() -> Result<T>) -> Result<T> {
    let state = save_state(git)?;
    match f() {
        Ok(v) => Ok(v),
        Err(e) => {
            restore_state(git, &state);
            Err(e)
        }
    }
}
