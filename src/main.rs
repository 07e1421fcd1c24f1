use anyhow::{anyhow, Result};
use clap::Parser;
use tracing::error;

mod branches;
mod cli;
mod commands;
mod commit;
mod config;
mod errors;
mod forge;
mod git;
mod guard;
mod pool;
mod pretty;
mod push;
mod render;
mod snapshot;
mod stack;
#[cfg(test)]
mod testutil;

use crate::cli::{Cli, Cmd};
use crate::config::Config;
use crate::errors::Error;
use crate::forge::github::GithubForge;
use crate::forge::Forge;
use crate::git::Git;

fn setup_logging(verbose: u8) {
    let filter = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(false)
        .compact();
    if verbose == 0 {
        builder.without_time().init();
    } else {
        builder.init();
    }
}

/// Build the forge client, failing early (exit code 2) when `gh` is absent
/// or unauthenticated.
fn make_forge(config: &Config) -> Result<GithubForge> {
    crate::git::ensure_tool("gh")
        .map_err(|e| anyhow!(Error::Environment(format!("{:#}", e))))?;
    let forge = GithubForge::new(config);
    forge.viewer().map_err(|e| {
        anyhow!(Error::Environment(format!(
            "no GitHub credentials: {:#}; run `gh auth login`",
            e
        )))
    })?;
    Ok(forge)
}

fn run(cli: Cli) -> Result<()> {
    crate::git::ensure_tool("git")?;

    let bare_git = Git::new(cli.directory.clone());
    if bare_git.read(&["rev-parse", "--git-dir"]).is_err() {
        return Err(anyhow!(Error::Environment(
            "not in a git repository".to_string()
        )));
    }

    let mut config = config::load_config(&bare_git)?;

    match cli.cmd {
        Cmd::Update {
            reviewer,
            count,
            no_rebase,
            label,
            pretend,
        } => {
            config.user.no_rebase |= no_rebase;
            config.tool.pretend |= pretend;
            let git = bare_git.with_config(&config);
            let forge = make_forge(&config)?;
            guard::with_restore(&git, || {
                commands::update_pull_requests(&config, &git, &forge, &reviewer, count, &label)
            })
        }
        Cmd::Status {} => {
            let git = bare_git.with_config(&config);
            let forge = make_forge(&config)?;
            commands::status_pull_requests(&config, &git, &forge)
        }
        Cmd::Merge { count, no_rebase } => {
            config.user.no_rebase |= no_rebase;
            let git = bare_git.with_config(&config);
            let forge = make_forge(&config)?;
            guard::with_restore(&git, || {
                commands::merge_pull_requests(&config, &git, &forge, count)
            })
        }
        Cmd::Breakup {
            count,
            reviewer,
            update_only_these_ids,
            stacks,
            stack_mode,
            no_rebase,
            pretend,
        } => {
            config.user.no_rebase |= no_rebase;
            config.tool.pretend |= pretend;
            let git = bare_git.with_config(&config);
            let forge = make_forge(&config)?;
            let only_ids: Option<Vec<String>> = update_only_these_ids.map(|raw| {
                raw.split(',')
                    .map(|id| id.trim().to_string())
                    .filter(|id| !id.is_empty())
                    .collect()
            });
            guard::with_restore(&git, || {
                commands::breakup_pull_requests(
                    &config,
                    &git,
                    &forge,
                    &reviewer,
                    count,
                    only_ids.as_deref(),
                    stacks,
                    stack_mode,
                )
            })
        }
        Cmd::Analyze {} => {
            let git = bare_git.with_config(&config);
            // Analysis probes only scratch branches, but the tree is put
            // back unconditionally the way every mutating command is.
            let state = guard::save_state(&git)?;
            let result = commands::analyze(&config, &git);
            guard::restore_state(&git, &state);
            result
        }
    }
}

fn main() {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    if let Err(e) = run(cli) {
        error!("{:#}", e);
        let code = e
            .downcast_ref::<Error>()
            .map(Error::exit_code)
            .unwrap_or(1);
        std::process::exit(code);
    }
}
