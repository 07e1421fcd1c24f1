//! `spr analyze`: classify commits by cherry-pick reachability and report
//! the two stacking scenarios.
//!
//! Every probe is a real cherry-pick onto a scratch branch; git is the
//! oracle for "does this commit depend on that one". The caller's branch is
//! restored after every probe.

use anyhow::Result;
use tracing::{debug, info};

use crate::commit::{local_commit_stack, non_wip_prefix, upstream_ref, Commit};
use crate::config::Config;
use crate::git::Git;
use crate::pretty::print_header;

/// Grouping algorithm for `breakup --stacks`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
#[value(rename_all = "lowercase")]
pub enum StackMode {
    /// Connected components of the single-parent reachability forest,
    /// each flattened in local commit order.
    Components,
    /// Single-parent trees, traversed parents-first.
    Trees,
    /// Linear stacks extended at their tips.
    Stacks,
}

#[derive(Debug)]
pub struct TreeNode {
    pub commit: Commit,
    /// Hash of the commit as relocated onto its parent chain.
    pub relocated: String,
    pub children: Vec<TreeNode>,
}

#[derive(Debug, Default)]
pub struct Analysis {
    pub total: usize,
    pub independent: Vec<Commit>,
    pub dependent: Vec<Commit>,
    pub orphans: Vec<Commit>,
    pub trees: Vec<TreeNode>,
    pub stacks: Vec<Vec<Commit>>,
    pub stack_orphans: Vec<Commit>,
}

/// Try to cherry-pick `commit_hash` onto `base_rev` on a scratch branch.
///
/// Returns the relocated commit hash on success, `None` on conflict. The
/// original branch is always restored and the scratch branch deleted.
pub(crate) fn probe_cherry_pick(
    git: &Git,
    base_rev: &str,
    commit_hash: &str,
    scratch_tag: &str,
) -> Result<Option<String>> {
    let original = git.current_branch()?;
    let scratch = format!("pyspr-temp-{}", scratch_tag);
    let _ = git.write(&["branch", "-D", &scratch]);
    git.write(&["checkout", "-b", &scratch, base_rev])?;

    let outcome = match git.write(&["cherry-pick", commit_hash]) {
        Ok(_) => Some(git.head()?),
        Err(e) => {
            debug!("cherry-pick of {} onto {} failed: {}", commit_hash, base_rev, e);
            let _ = git.write(&["cherry-pick", "--abort"]);
            None
        }
    };

    if git.write(&["checkout", &original]).is_err() {
        if git.write(&["checkout", "-f", &original]).is_err() {
            git.write(&["reset", "--hard", "HEAD"])?;
            git.write(&["checkout", &original])?;
        }
    }
    let _ = git.write(&["branch", "-D", &scratch]);
    Ok(outcome)
}

/// The base revision probes relocate onto: where the local stack diverges
/// from the upstream trunk.
pub(crate) fn analysis_base(config: &Config, git: &Git) -> Result<String> {
    let upstream = upstream_ref(config, git);
    Ok(git
        .read(&["merge-base", &upstream, "HEAD"])?
        .trim()
        .to_string())
}

struct FlatNode {
    commit: Commit,
    relocated: String,
    parent: Option<usize>,
    children: Vec<usize>,
}

/// Trees pass: relocate each commit bottom-up onto the base or the first
/// prior relocated commit that takes it cleanly.
fn build_trees(
    git: &Git,
    base: &str,
    commits: &[Commit],
) -> Result<(Vec<FlatNode>, Vec<usize>, Vec<Commit>)> {
    let mut nodes: Vec<FlatNode> = vec![];
    let mut roots: Vec<usize> = vec![];
    let mut orphans: Vec<Commit> = vec![];

    for commit in commits {
        if let Some(hash) =
            probe_cherry_pick(git, base, &commit.commit_hash, &commit.commit_id)?
        {
            let index = nodes.len();
            nodes.push(FlatNode {
                commit: commit.clone(),
                relocated: hash,
                parent: None,
                children: vec![],
            });
            roots.push(index);
            continue;
        }

        let mut placed = false;
        for parent in 0..nodes.len() {
            let parent_tip = nodes[parent].relocated.clone();
            if let Some(hash) =
                probe_cherry_pick(git, &parent_tip, &commit.commit_hash, &commit.commit_id)?
            {
                let index = nodes.len();
                nodes.push(FlatNode {
                    commit: commit.clone(),
                    relocated: hash,
                    parent: Some(parent),
                    children: vec![],
                });
                nodes[parent].children.push(index);
                placed = true;
                break;
            }
        }
        if !placed {
            orphans.push(commit.clone());
        }
    }
    Ok((nodes, roots, orphans))
}

/// Stacks pass: relocate each commit onto the base or the first stack tip
/// that takes it cleanly, extending that stack.
fn build_stacks(
    git: &Git,
    base: &str,
    commits: &[Commit],
) -> Result<(Vec<Vec<(Commit, String)>>, Vec<Commit>)> {
    let mut stacks: Vec<Vec<(Commit, String)>> = vec![];
    let mut orphans: Vec<Commit> = vec![];

    'next: for commit in commits {
        if let Some(hash) =
            probe_cherry_pick(git, base, &commit.commit_hash, &commit.commit_id)?
        {
            stacks.push(vec![(commit.clone(), hash)]);
            continue;
        }
        for stack in stacks.iter_mut() {
            let tip = stack.last().map(|(_, h)| h.clone()).unwrap_or_default();
            if let Some(hash) =
                probe_cherry_pick(git, &tip, &commit.commit_hash, &commit.commit_id)?
            {
                stack.push((commit.clone(), hash));
                continue 'next;
            }
        }
        orphans.push(commit.clone());
    }
    Ok((stacks, orphans))
}

fn to_tree(nodes: &[FlatNode], index: usize) -> TreeNode {
    TreeNode {
        commit: nodes[index].commit.clone(),
        relocated: nodes[index].relocated.clone(),
        children: nodes[index]
            .children
            .iter()
            .map(|&child| to_tree(nodes, child))
            .collect(),
    }
}

/// Run both passes over the non-WIP prefix of the given commits.
pub fn analyze_commits(config: &Config, git: &Git, commits: &[Commit]) -> Result<Analysis> {
    let eligible = non_wip_prefix(commits);
    let base = analysis_base(config, git)?;
    info!("Analyzing {} commit(s) against {}", eligible.len(), &base[..8.min(base.len())]);

    let (nodes, roots, tree_orphans) = build_trees(git, &base, &eligible)?;
    let (stacks, stack_orphans) = build_stacks(git, &base, &eligible)?;

    let independent: Vec<Commit> = roots.iter().map(|&r| nodes[r].commit.clone()).collect();
    let dependent: Vec<Commit> = nodes
        .iter()
        .filter(|n| n.parent.is_some())
        .map(|n| n.commit.clone())
        .collect();

    Ok(Analysis {
        total: eligible.len(),
        independent,
        dependent,
        orphans: tree_orphans,
        trees: roots.iter().map(|&r| to_tree(&nodes, r)).collect(),
        stacks: stacks
            .into_iter()
            .map(|s| s.into_iter().map(|(c, _)| c).collect())
            .collect(),
        stack_orphans,
    })
}

/// Group commits for `breakup --stacks` according to the chosen mode.
/// Returns the groups (each in an order that respects dependencies) and the
/// orphans that fit no group.
pub fn group_commits(
    config: &Config,
    git: &Git,
    commits: &[Commit],
    mode: StackMode,
) -> Result<(Vec<Vec<Commit>>, Vec<Commit>)> {
    let analysis = analyze_commits(config, git, commits)?;
    match mode {
        StackMode::Trees => {
            let groups = analysis
                .trees
                .iter()
                .map(|tree| {
                    let mut out = vec![];
                    flatten_tree(tree, &mut |c| out.push(c.clone()));
                    out
                })
                .collect();
            Ok((groups, analysis.orphans))
        }
        StackMode::Components => {
            // Same membership as the trees, ordered as the commits appear
            // locally; orphans never join a component.
            let groups = analysis
                .trees
                .iter()
                .map(|tree| {
                    let mut members = vec![];
                    flatten_tree(tree, &mut |c| members.push(c.commit_id.clone()));
                    commits
                        .iter()
                        .filter(|c| members.contains(&c.commit_id))
                        .cloned()
                        .collect()
                })
                .collect();
            Ok((groups, analysis.orphans))
        }
        StackMode::Stacks => Ok((analysis.stacks, analysis.stack_orphans)),
    }
}

fn flatten_tree(node: &TreeNode, visit: &mut impl FnMut(&Commit)) {
    visit(&node.commit);
    for child in &node.children {
        flatten_tree(child, visit);
    }
}

fn print_commit_line(indent: usize, commit: &Commit) {
    println!("{}- {} {}", " ".repeat(indent), commit.commit_id, commit.subject);
}

fn print_tree(node: &TreeNode, depth: usize) {
    print_commit_line(2 * (depth + 1), &node.commit);
    for child in &node.children {
        print_tree(child, depth + 1);
    }
}

fn print_report(analysis: &Analysis) {
    println!("Total commits: {}", analysis.total);
    println!();
    println!("✅ Independent commits ({}):", analysis.independent.len());
    for commit in &analysis.independent {
        print_commit_line(2, commit);
    }
    println!();
    println!("❌ Dependent commits ({}):", analysis.dependent.len());
    for commit in &analysis.dependent {
        print_commit_line(2, commit);
    }
    println!();
    println!("⚠️  Orphaned commits ({}):", analysis.orphans.len());
    for commit in &analysis.orphans {
        print_commit_line(2, commit);
    }
    println!();
    println!("🏗️ Stacking Scenarios");
    println!();
    println!("🌳 Trees: Best-Effort Single-Parent Trees");
    println!(
        "Created {} tree(s) and {} orphan(s)",
        analysis.trees.len(),
        analysis.orphans.len()
    );
    for (index, tree) in analysis.trees.iter().enumerate() {
        println!("Tree {}:", index + 1);
        print_tree(tree, 0);
    }
    for (index, orphan) in analysis.orphans.iter().enumerate() {
        println!("Orphan {}:", index + 1);
        print_commit_line(2, orphan);
    }
    println!();
    println!("📚 Stacks: Stack-Based Approach");
    println!(
        "Created {} stack(s) and {} orphan(s)",
        analysis.stacks.len(),
        analysis.stack_orphans.len()
    );
    for (index, stack) in analysis.stacks.iter().enumerate() {
        println!("Stack {}:", index + 1);
        for commit in stack {
            print_commit_line(2, commit);
        }
    }
    for (index, orphan) in analysis.stack_orphans.iter().enumerate() {
        println!("Orphan {}:", index + 1);
        print_commit_line(2, orphan);
    }
}

pub fn analyze(config: &Config, git: &Git) -> Result<()> {
    let commits = local_commit_stack(config, git)?;
    if commits.is_empty() {
        info!("No commits to analyze");
        return Ok(());
    }
    let analysis = analyze_commits(config, git, &commits)?;
    print_header("Commit Analysis");
    println!();
    print_report(&analysis);
    Ok(())
}
