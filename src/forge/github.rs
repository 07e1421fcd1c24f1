//! GitHub client driving the `gh` CLI.
//!
//! The snapshot path is a single GraphQL search returning every open PR by
//! the current user with its commits; if that fails the client falls back
//! to REST enumeration and per-PR commit fetches. Mutations go through the
//! REST endpoints except auto-merge, which is GraphQL-only.

use anyhow::{anyhow, bail, Context, Result};
use serde_json::Value;
use std::process::Command;
use tracing::{debug, info, warn};

use crate::config::{Config, MergeMethod};
use crate::errors::Error;
use crate::git::shellish;

use super::{CommitRecord, CreateResult, Forge, PrRecord, PrUpdate};

const SNAPSHOT_QUERY: &str = "\
query($searchQuery: String!) {
  search(type: ISSUE, first: 100, query: $searchQuery) {
    nodes {
      __typename
      ... on PullRequest {
        number
        title
        body
        baseRefName
        headRefName
        mergeable
        autoMergeRequest { enabledAt }
        commits(first: 100) {
          nodes { commit { oid messageHeadline messageBody } }
        }
      }
    }
  }
}";

pub struct GithubForge {
    owner: String,
    name: String,
}

fn gh(args: &[&str]) -> Result<String> {
    debug!("gh {}", shellish(args));
    let out = Command::new("gh")
        .args(args)
        .output()
        .with_context(|| "failed to spawn gh")?;
    if !out.status.success() {
        let stderr = String::from_utf8_lossy(&out.stderr);
        let stdout = String::from_utf8_lossy(&out.stdout);
        bail!(
            "gh {} failed: {}{}",
            shellish(args),
            stderr.trim(),
            stdout.trim()
        );
    }
    Ok(String::from_utf8_lossy(&out.stdout).to_string())
}

fn str_field(v: &Value, key: &str) -> String {
    v[key].as_str().unwrap_or_default().to_string()
}

impl GithubForge {
    pub fn new(config: &Config) -> Self {
        GithubForge {
            owner: config.repo.github_repo_owner.clone(),
            name: config.repo.github_repo_name.clone(),
        }
    }

    fn api_path(&self, tail: &str) -> String {
        format!("repos/{}/{}/{}", self.owner, self.name, tail)
    }

    /// Commits of one PR via REST, oldest first.
    fn fetch_commits(&self, number: u64) -> Result<Vec<CommitRecord>> {
        let json = gh(&[
            "api",
            &self.api_path(&format!("pulls/{}/commits?per_page=100", number)),
        ])?;
        let v: Value = serde_json::from_str(&json)?;
        let mut commits = vec![];
        for node in v.as_array().into_iter().flatten() {
            let message = str_field(&node["commit"], "message");
            let headline = message.lines().next().unwrap_or_default().to_string();
            commits.push(CommitRecord {
                oid: str_field(node, "sha"),
                headline,
                message,
            });
        }
        Ok(commits)
    }

    fn record_from_rest(&self, v: &Value, commits: Vec<CommitRecord>) -> PrRecord {
        PrRecord {
            number: v["number"].as_u64().unwrap_or_default(),
            title: str_field(v, "title"),
            body: str_field(v, "body"),
            base_ref: str_field(&v["base"], "ref"),
            head_ref: str_field(&v["head"], "ref"),
            // REST reports `mergeable: null` while GitHub is still computing;
            // treat only an explicit false as blocked.
            mergeable: v["mergeable"].as_bool().unwrap_or(true),
            in_queue: !v["auto_merge"].is_null(),
            merged: v["merged"].as_bool().unwrap_or(false),
            commits,
        }
    }

    fn snapshot_graphql(&self, viewer: &str) -> Result<Vec<PrRecord>> {
        let search = format!(
            "author:{} is:pr is:open repo:{}/{} sort:updated-desc",
            viewer, self.owner, self.name
        );
        let json = gh(&[
            "api",
            "graphql",
            "-f",
            &format!("query={}", SNAPSHOT_QUERY),
            "-f",
            &format!("searchQuery={}", search),
        ])?;
        let v: Value = serde_json::from_str(&json)?;
        let nodes = v["data"]["search"]["nodes"]
            .as_array()
            .ok_or_else(|| anyhow!("malformed search response"))?;

        let mut records = vec![];
        for node in nodes {
            if node["__typename"].as_str() != Some("PullRequest") {
                continue;
            }
            let mut commits = vec![];
            for c in node["commits"]["nodes"].as_array().into_iter().flatten() {
                let commit = &c["commit"];
                commits.push(CommitRecord {
                    oid: str_field(commit, "oid"),
                    headline: str_field(commit, "messageHeadline"),
                    message: str_field(commit, "messageBody"),
                });
            }
            records.push(PrRecord {
                number: node["number"].as_u64().unwrap_or_default(),
                title: str_field(node, "title"),
                body: str_field(node, "body"),
                base_ref: str_field(node, "baseRefName"),
                head_ref: str_field(node, "headRefName"),
                mergeable: node["mergeable"].as_str() != Some("CONFLICTING"),
                in_queue: !node["autoMergeRequest"].is_null(),
                merged: false,
                commits,
            });
        }
        info!("github returned {} open PR(s)", records.len());
        Ok(records)
    }

    fn snapshot_rest(&self, viewer: &str) -> Result<Vec<PrRecord>> {
        let json = gh(&["api", &self.api_path("pulls?state=open&per_page=100")])?;
        let v: Value = serde_json::from_str(&json)?;
        let mut records = vec![];
        for pr in v.as_array().into_iter().flatten() {
            if str_field(&pr["user"], "login") != viewer {
                continue;
            }
            let number = pr["number"].as_u64().unwrap_or_default();
            let commits = self.fetch_commits(number)?;
            records.push(self.record_from_rest(pr, commits));
        }
        info!("github REST fallback returned {} open PR(s)", records.len());
        Ok(records)
    }

    /// Resolve a PR's GraphQL node id, required by the auto-merge mutation.
    fn node_id(&self, number: u64) -> Result<String> {
        let json = gh(&[
            "api",
            "graphql",
            "-f",
            &format!(
                "query=query {{ repository(owner:\"{}\", name:\"{}\") {{ pullRequest(number: {}) {{ id }} }} }}",
                self.owner, self.name, number
            ),
        ])?;
        let v: Value = serde_json::from_str(&json)?;
        let id = str_field(&v["data"]["repository"]["pullRequest"], "id");
        if id.is_empty() {
            bail!("could not resolve node id for PR #{}", number);
        }
        Ok(id)
    }
}

impl Forge for GithubForge {
    fn viewer(&self) -> Result<String> {
        let out = gh(&["api", "user", "--jq", ".login"])?;
        let login = out.trim().to_string();
        if login.is_empty() {
            return Err(anyhow!(Error::Environment(
                "gh is not authenticated; run `gh auth login`".to_string()
            )));
        }
        Ok(login)
    }

    fn fetch_open_prs_for_user(&self, _owner: &str, _repo: &str) -> Result<Vec<PrRecord>> {
        let viewer = self.viewer()?;
        match self.snapshot_graphql(&viewer) {
            Ok(records) => Ok(records),
            Err(e) => {
                warn!("GraphQL query failed: {}; falling back to REST", e);
                self.snapshot_rest(&viewer)
            }
        }
    }

    fn create_pr(
        &self,
        title: &str,
        body: &str,
        base: &str,
        head: &str,
    ) -> Result<CreateResult> {
        let result = gh(&[
            "api",
            &self.api_path("pulls"),
            "-X",
            "POST",
            "-f",
            &format!("head={}", head),
            "-f",
            &format!("base={}", base),
            "-f",
            &format!("title={}", title),
            "-f",
            &format!("body={}", body),
        ]);
        match result {
            Ok(json) => {
                let v: Value = serde_json::from_str(&json)?;
                let number = v["number"].as_u64().unwrap_or_default();
                let commits = self.fetch_commits(number)?;
                Ok(CreateResult::Created(self.record_from_rest(&v, commits)))
            }
            Err(e) if e.to_string().contains("A pull request already exists") => {
                Ok(CreateResult::AlreadyExists)
            }
            Err(e) => Err(e),
        }
    }

    fn update_pr(&self, number: u64, update: &PrUpdate) -> Result<()> {
        let path = self.api_path(&format!("pulls/{}", number));
        let mut args: Vec<String> = vec![
            "api".into(),
            path,
            "-X".into(),
            "PATCH".into(),
        ];
        if let Some(title) = &update.title {
            args.push("-f".into());
            args.push(format!("title={}", title));
        }
        if let Some(body) = &update.body {
            args.push("-f".into());
            args.push(format!("body={}", body));
        }
        if let Some(base) = &update.base {
            args.push("-f".into());
            args.push(format!("base={}", base));
        }
        if args.len() == 4 {
            return Ok(());
        }
        let argv: Vec<&str> = args.iter().map(|s| s.as_str()).collect();
        gh(&argv)?;
        Ok(())
    }

    fn close_pr(&self, number: u64) -> Result<()> {
        gh(&[
            "api",
            &self.api_path(&format!("pulls/{}", number)),
            "-X",
            "PATCH",
            "-f",
            "state=closed",
        ])?;
        Ok(())
    }

    fn add_labels(&self, number: u64, labels: &[String]) -> Result<()> {
        if labels.is_empty() {
            return Ok(());
        }
        let path = self.api_path(&format!("issues/{}/labels", number));
        let mut args: Vec<String> = vec!["api".into(), path, "-X".into(), "POST".into()];
        for label in labels {
            args.push("-f".into());
            args.push(format!("labels[]={}", label));
        }
        let argv: Vec<&str> = args.iter().map(|s| s.as_str()).collect();
        gh(&argv)?;
        Ok(())
    }

    fn add_comment(&self, number: u64, body: &str) -> Result<()> {
        gh(&[
            "api",
            &self.api_path(&format!("issues/{}/comments", number)),
            "-X",
            "POST",
            "-f",
            &format!("body={}", body),
        ])?;
        Ok(())
    }

    fn request_reviewers(&self, number: u64, logins: &[String]) -> Result<()> {
        if logins.is_empty() {
            return Ok(());
        }
        let path = self.api_path(&format!("pulls/{}/requested_reviewers", number));
        let mut args: Vec<String> = vec!["api".into(), path, "-X".into(), "POST".into()];
        for login in logins {
            args.push("-f".into());
            args.push(format!("reviewers[]={}", login));
        }
        let argv: Vec<&str> = args.iter().map(|s| s.as_str()).collect();
        gh(&argv)?;
        Ok(())
    }

    fn list_assignable_users(&self) -> Result<Vec<String>> {
        let out = gh(&[
            "api",
            &self.api_path("assignees"),
            "--paginate",
            "--jq",
            ".[].login",
        ])?;
        Ok(out.lines().map(|l| l.trim().to_string()).filter(|l| !l.is_empty()).collect())
    }

    fn merge_pr(&self, number: u64, method: MergeMethod) -> Result<()> {
        let result = gh(&[
            "api",
            &self.api_path(&format!("pulls/{}/merge", number)),
            "-X",
            "PUT",
            "-f",
            &format!("merge_method={}", method.as_str()),
        ]);
        match result {
            Ok(_) => Ok(()),
            Err(e) if e.to_string().contains("Changes must be made through the merge queue") => {
                Err(anyhow!(Error::MergeQueueRequired { number }))
            }
            Err(e) => Err(e),
        }
    }

    fn enable_automerge(&self, number: u64, method: MergeMethod) -> Result<()> {
        let id = self.node_id(number)?;
        let mutation = format!(
            "mutation {{ enablePullRequestAutoMerge(input:{{pullRequestId:\"{}\", mergeMethod:{}}}) {{ clientMutationId }} }}",
            id,
            method.as_str().to_uppercase()
        );
        gh(&["api", "graphql", "-f", &format!("query={}", mutation)])?;
        Ok(())
    }

    fn get_pr_for_branch(&self, branch: &str) -> Result<Option<PrRecord>> {
        let json = gh(&[
            "api",
            &self.api_path(&format!(
                "pulls?state=open&head={}:{}",
                self.owner, branch
            )),
        ])?;
        let v: Value = serde_json::from_str(&json)?;
        let Some(pr) = v.as_array().and_then(|a| a.first()) else {
            return Ok(None);
        };
        if str_field(&pr["head"], "ref") != branch {
            return Ok(None);
        }
        let number = pr["number"].as_u64().unwrap_or_default();
        let commits = self.fetch_commits(number)?;
        Ok(Some(self.record_from_rest(pr, commits)))
    }
}
