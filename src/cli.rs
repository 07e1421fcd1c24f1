use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

use crate::commands::analyze::StackMode;

#[derive(Subcommand, Debug)]
pub enum Cmd {
    /// Update and create pull requests for updated commits in the stack
    #[command(alias = "up")]
    Update {
        /// Add the specified reviewer to the pull requests in the stack
        #[arg(short = 'r', long = "reviewer")]
        reviewer: Vec<String>,

        /// Update a specified number of pull requests from the bottom of the stack
        #[arg(short = 'c', long = "count")]
        count: Option<usize>,

        /// Disable rebasing onto the remote trunk
        #[arg(long = "no-rebase", visible_alias = "nr")]
        no_rebase: bool,

        /// Add the specified label to the pull requests
        #[arg(short = 'l', long = "label")]
        label: Vec<String>,

        /// Don't push or touch pull requests, just show what would happen
        #[arg(long)]
        pretend: bool,
    },

    /// Show status of open pull requests
    #[command(alias = "st")]
    Status {},

    /// Merge all mergeable pull requests
    Merge {
        /// Merge a specified number of pull requests from the bottom of the stack
        #[arg(short = 'c', long = "count")]
        count: Option<usize>,

        /// Disable rebasing onto the remote trunk
        #[arg(long = "no-rebase", visible_alias = "nr")]
        no_rebase: bool,
    },

    /// Break up the current commit stack into independent branches/PRs
    Breakup {
        /// Break up a specified number of commits from the bottom of the stack
        #[arg(short = 'c', long = "count")]
        count: Option<usize>,

        /// Add the specified reviewer to newly created pull requests
        #[arg(short = 'r', long = "reviewer")]
        reviewer: Vec<String>,

        /// Only update PRs for specific commit IDs (comma-separated)
        #[arg(long = "update-only-these-ids", value_name = "IDS")]
        update_only_these_ids: Option<String>,

        /// Create multiple PR stacks based on commit dependencies
        #[arg(long)]
        stacks: bool,

        /// Grouping algorithm for --stacks
        #[arg(long = "stack-mode", value_enum, default_value = "components")]
        stack_mode: StackMode,

        /// Use the local trunk instead of the remote one as the base
        #[arg(long = "no-rebase", visible_alias = "nr")]
        no_rebase: bool,

        /// Don't push or touch pull requests, just show what would happen
        #[arg(long)]
        pretend: bool,
    },

    /// Analyze which commits can be independently submitted without stacking
    Analyze {},
}

#[derive(Parser, Debug)]
#[command(
    name = "spr",
    version,
    about = "Stacked pull requests, one per commit, from a linear history"
)]
pub struct Cli {
    /// Run as if spr was started in DIRECTORY instead of the current directory
    #[arg(short = 'C', long = "directory", global = true, value_name = "DIRECTORY")]
    pub directory: Option<PathBuf>,

    /// Increase verbosity (repeat for more)
    #[arg(short = 'v', long = "verbose", global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub cmd: Cmd,
}
