//! PR body rendering: the stack table and its warning boilerplate.

use crate::commit::Commit;
use crate::config::Config;
use crate::forge::PullRequest;

const STACK_WARNING: &str = "\n\n⚠️ *Part of a stacked-PR chain. \
Do not merge manually using the UI - doing so may have unexpected results.*";

/// Render the stack as a markdown list, top PR first, with the current PR
/// marked by an arrow.
pub fn format_stack_markdown(config: &Config, commit: &Commit, stack: &[PullRequest]) -> String {
    let show_titles = config.repo.show_pr_titles_in_stack;
    let mut lines = vec![];
    for pr in stack.iter().rev() {
        let suffix = if pr.commit.commit_id == commit.commit_id {
            " ⬅"
        } else {
            ""
        };
        let title_part = if show_titles && !pr.title.is_empty() {
            format!("{} ", pr.title)
        } else {
            String::new()
        };
        lines.push(format!("- {}#{}{}", title_part, pr.number, suffix));
    }
    lines.join("\n")
}

/// Assemble a PR body: the commit body, then the stack section when the
/// stack has more than one PR. Breakup PRs never get a stack section.
pub fn format_body(
    config: &Config,
    commit: &Commit,
    stack: &[PullRequest],
    is_breakup: bool,
) -> String {
    let body = commit.body.trim().to_string();

    if is_breakup || stack.len() <= 1 {
        return body;
    }

    let table = format_stack_markdown(config, commit, stack);
    if body.is_empty() {
        format!("**Stack**:\n{}{}", table, STACK_WARNING)
    } else {
        format!("{}\n\n---\n\n**Stack**:\n{}{}", body, table, STACK_WARNING)
    }
}
