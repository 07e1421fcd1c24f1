//! `spr status`: read-only snapshot and stack render.

use anyhow::Result;

use crate::commands::common::pr_url;
use crate::commit::read_stack_lenient;
use crate::config::Config;
use crate::forge::Forge;
use crate::git::Git;
use crate::pretty::print_header;
use crate::snapshot::take_snapshot;
use crate::stack::match_stack;

pub fn status_pull_requests(config: &Config, git: &Git, forge: &dyn Forge) -> Result<()> {
    let local_commits = read_stack_lenient(config, git)?;
    let snapshot = take_snapshot(config, forge)?;
    let stack = match_stack(&config.repo.github_branch, &local_commits, &snapshot);

    print_header("Pull Requests");
    if stack.is_empty() {
        println!("\npull request stack is empty\n");
        return Ok(());
    }

    println!();
    for pr in stack.iter().rev() {
        let status = if pr.merged { "✅ merged" } else { "" };
        println!("   {} {}", pr, status);
        println!("      {}", pr_url(config, pr.number));
    }
    println!();
    Ok(())
}
