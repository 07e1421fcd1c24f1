//! Repository and user configuration for `spr`.
//!
//! Configuration is loaded from `<repo-root>/.spr.yaml`, merged over the
//! built-in defaults. Repository coordinates (`github_repo_owner`,
//! `github_repo_name`) fall back to parsing the configured remote's URL.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::git::Git;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeMethod {
    Merge,
    Squash,
    Rebase,
}

impl MergeMethod {
    /// Wire form used by the forge client.
    pub fn as_str(self) -> &'static str {
        match self {
            MergeMethod::Merge => "merge",
            MergeMethod::Squash => "squash",
            MergeMethod::Rebase => "rebase",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RepoConfig {
    pub github_remote: String,
    pub github_branch: String,
    pub github_branch_target: String,
    pub github_repo_owner: String,
    pub github_repo_name: String,
    pub github_host: String,
    pub branch_prefix: String,
    pub merge_queue: bool,
    pub merge_method: MergeMethod,
    pub show_pr_titles_in_stack: bool,
    pub branch_push_individually: bool,
    pub auto_close_prs: bool,
    pub labels: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct UserConfig {
    pub no_rebase: bool,
    pub best_effort: bool,
}

#[derive(Debug, Clone)]
pub struct ToolConfig {
    pub concurrency: usize,
    pub pretend: bool,
    pub index_lock_wait_enabled: bool,
    pub index_lock_max_wait_secs: u64,
    pub index_lock_check_interval_ms: u64,
    pub index_lock_stale_threshold_secs: u64,
}

impl Default for ToolConfig {
    fn default() -> Self {
        ToolConfig {
            concurrency: 0,
            pretend: false,
            index_lock_wait_enabled: true,
            index_lock_max_wait_secs: 30,
            index_lock_check_interval_ms: 100,
            index_lock_stale_threshold_secs: 10,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub repo: RepoConfig,
    pub user: UserConfig,
    pub tool: ToolConfig,
}

/* ------------------ file schema ------------------ */

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileRepo {
    github_remote: Option<String>,
    github_branch: Option<String>,
    github_branch_target: Option<String>,
    github_repo_owner: Option<String>,
    github_repo_name: Option<String>,
    github_host: Option<String>,
    branch_prefix: Option<String>,
    merge_queue: Option<bool>,
    merge_method: Option<MergeMethod>,
    show_pr_titles_in_stack: Option<bool>,
    branch_push_individually: Option<bool>,
    auto_close_prs: Option<bool>,
    labels: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileUser {
    no_rebase: Option<bool>,
    best_effort: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileTool {
    concurrency: Option<usize>,
    pretend: Option<bool>,
    index_lock_wait_enabled: Option<bool>,
    index_lock_max_wait_secs: Option<u64>,
    index_lock_check_interval_ms: Option<u64>,
    index_lock_stale_threshold_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    repo: Option<FileRepo>,
    user: Option<FileUser>,
    tool: Option<FileTool>,
}

fn default_repo() -> RepoConfig {
    RepoConfig {
        github_remote: "origin".to_string(),
        github_branch: "main".to_string(),
        github_branch_target: "main".to_string(),
        github_repo_owner: String::new(),
        github_repo_name: String::new(),
        github_host: "github.com".to_string(),
        branch_prefix: "pyspr/".to_string(),
        merge_queue: false,
        merge_method: MergeMethod::Squash,
        show_pr_titles_in_stack: false,
        branch_push_individually: false,
        auto_close_prs: false,
        labels: vec![],
    }
}

fn apply_overrides(config: &mut Config, file: FileConfig) {
    if let Some(repo) = file.repo {
        let r = &mut config.repo;
        if let Some(v) = repo.github_remote {
            r.github_remote = v;
        }
        if let Some(v) = repo.github_branch {
            r.github_branch = v;
        }
        if let Some(v) = repo.github_branch_target {
            r.github_branch_target = v;
        }
        if let Some(v) = repo.github_repo_owner {
            r.github_repo_owner = v;
        }
        if let Some(v) = repo.github_repo_name {
            r.github_repo_name = v;
        }
        if let Some(v) = repo.github_host {
            r.github_host = v;
        }
        if let Some(v) = repo.branch_prefix {
            r.branch_prefix = v;
        }
        if let Some(v) = repo.merge_queue {
            r.merge_queue = v;
        }
        if let Some(v) = repo.merge_method {
            r.merge_method = v;
        }
        if let Some(v) = repo.show_pr_titles_in_stack {
            r.show_pr_titles_in_stack = v;
        }
        if let Some(v) = repo.branch_push_individually {
            r.branch_push_individually = v;
        }
        if let Some(v) = repo.auto_close_prs {
            r.auto_close_prs = v;
        }
        if let Some(v) = repo.labels {
            r.labels = v;
        }
    }
    if let Some(user) = file.user {
        if let Some(v) = user.no_rebase {
            config.user.no_rebase = v;
        }
        if let Some(v) = user.best_effort {
            config.user.best_effort = v;
        }
    }
    if let Some(tool) = file.tool {
        let t = &mut config.tool;
        if let Some(v) = tool.concurrency {
            t.concurrency = v;
        }
        if let Some(v) = tool.pretend {
            t.pretend = v;
        }
        if let Some(v) = tool.index_lock_wait_enabled {
            t.index_lock_wait_enabled = v;
        }
        if let Some(v) = tool.index_lock_max_wait_secs {
            t.index_lock_max_wait_secs = v;
        }
        if let Some(v) = tool.index_lock_check_interval_ms {
            t.index_lock_check_interval_ms = v;
        }
        if let Some(v) = tool.index_lock_stale_threshold_secs {
            t.index_lock_stale_threshold_secs = v;
        }
    }
}

/// Extract `(owner, name)` from a git remote URL.
///
/// Handles both SSH (`git@github.com:owner/name.git`) and HTTPS
/// (`https://github.com/owner/name.git`) forms.
pub fn parse_remote_url(url: &str) -> Result<(String, String)> {
    let url = url.trim();
    let repo_part = if let Some(idx) = url.find("://") {
        let rest = &url[idx + 3..];
        match rest.find('/') {
            Some(slash) => &rest[slash + 1..],
            None => bail!("unable to parse remote url: {}", url),
        }
    } else if let Some(pos) = url.find(':') {
        &url[pos + 1..]
    } else {
        bail!("unable to parse remote url: {}", url);
    };
    let repo_part = repo_part.trim_end_matches('/');
    let repo_part = repo_part.strip_suffix(".git").unwrap_or(repo_part);
    let mut parts = repo_part.rsplitn(2, '/');
    let name = parts.next().unwrap_or_default();
    let owner = parts.next().unwrap_or_default();
    if owner.is_empty() || name.is_empty() {
        bail!("unable to parse remote url: {}", url);
    }
    Ok((owner.to_string(), name.to_string()))
}

fn read_config_file(path: &Path) -> Result<Option<FileConfig>> {
    if !path.exists() {
        return Ok(None);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let cfg: FileConfig = serde_yaml::from_str(&content)
        .with_context(|| format!("invalid config in {}", path.display()))?;
    Ok(Some(cfg))
}

fn normalize(config: &mut Config) {
    let mut prefix = config.repo.branch_prefix.trim_end_matches('/').to_string();
    prefix.push('/');
    config.repo.branch_prefix = prefix;
}

/// Load config: defaults, then `.spr.yaml` at the repository root, then repo
/// coordinates derived from the remote URL when the file leaves them unset.
pub fn load_config(git: &Git) -> Result<Config> {
    let mut config = Config {
        repo: default_repo(),
        user: UserConfig::default(),
        tool: ToolConfig::default(),
    };

    let root = git.repo_root()?;
    let path = Path::new(&root).join(".spr.yaml");
    if let Some(file) = read_config_file(&path)? {
        apply_overrides(&mut config, file);
    }

    if config.repo.github_repo_owner.is_empty() || config.repo.github_repo_name.is_empty() {
        let url = git.read(&["remote", "get-url", &config.repo.github_remote])?;
        let (owner, name) = parse_remote_url(&url).with_context(|| {
            format!(
                "set repo.github_repo_owner and repo.github_repo_name in .spr.yaml; \
                 remote '{}' url was not recognized",
                config.repo.github_remote
            )
        })?;
        if config.repo.github_repo_owner.is_empty() {
            config.repo.github_repo_owner = owner;
        }
        if config.repo.github_repo_name.is_empty() {
            config.repo.github_repo_name = name;
        }
    }

    normalize(&mut config);
    Ok(config)
}

#[cfg(test)]
pub fn test_config() -> Config {
    let mut config = Config {
        repo: default_repo(),
        user: UserConfig::default(),
        tool: ToolConfig::default(),
    };
    config.repo.github_repo_owner = "octo".to_string();
    config.repo.github_repo_name = "widgets".to_string();
    normalize(&mut config);
    config
}
