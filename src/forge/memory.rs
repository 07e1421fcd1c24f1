//! In-memory forge double backed by a real bare "origin" repository.
//!
//! PR metadata lives in a mutex-guarded store; PR commit listings are
//! derived from the origin's actual refs, so a test that pushes branches and
//! then asks for a snapshot sees exactly what a hosted forge would see.
//! Merges move the target ref in origin so post-merge trees are inspectable.

use anyhow::{anyhow, bail, Result};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;

use crate::config::MergeMethod;
use crate::errors::Error;

use super::{CommitRecord, CreateResult, Forge, PrRecord, PrUpdate};

#[derive(Debug, Clone)]
pub struct StoredPr {
    pub number: u64,
    pub title: String,
    pub body: String,
    pub base_ref: String,
    pub head_ref: String,
    pub open: bool,
    pub merged: bool,
    pub in_queue: bool,
    pub mergeable: bool,
    pub labels: Vec<String>,
    pub comments: Vec<String>,
    pub reviewers: Vec<String>,
}

#[derive(Default)]
struct State {
    prs: Vec<StoredPr>,
    next_number: u64,
    assignable: Vec<String>,
    automerge_supported: bool,
}

pub struct MemoryForge {
    origin: PathBuf,
    viewer: String,
    state: Mutex<State>,
}

fn git_in(dir: &Path, args: &[&str]) -> Result<String> {
    let out = Command::new("git").arg("-C").arg(dir).args(args).output()?;
    if !out.status.success() {
        bail!(
            "git {:?} failed in {}: {}",
            args,
            dir.display(),
            String::from_utf8_lossy(&out.stderr).trim()
        );
    }
    Ok(String::from_utf8_lossy(&out.stdout).to_string())
}

impl MemoryForge {
    pub fn new(origin: &Path) -> Self {
        MemoryForge {
            origin: origin.to_path_buf(),
            viewer: "testuser".to_string(),
            state: Mutex::new(State {
                next_number: 1,
                assignable: vec!["testuser".to_string(), "reviewer1".to_string()],
                automerge_supported: true,
                ..State::default()
            }),
        }
    }

    pub fn set_assignable(&self, logins: &[&str]) {
        let mut state = self.state.lock().unwrap();
        state.assignable = logins.iter().map(|s| s.to_string()).collect();
    }

    pub fn set_mergeable(&self, number: u64, mergeable: bool) {
        let mut state = self.state.lock().unwrap();
        if let Some(pr) = state.prs.iter_mut().find(|p| p.number == number) {
            pr.mergeable = mergeable;
        }
    }

    pub fn set_in_queue(&self, number: u64, in_queue: bool) {
        let mut state = self.state.lock().unwrap();
        if let Some(pr) = state.prs.iter_mut().find(|p| p.number == number) {
            pr.in_queue = in_queue;
        }
    }

    pub fn set_automerge_supported(&self, supported: bool) {
        self.state.lock().unwrap().automerge_supported = supported;
    }

    /// All PRs ever stored, open and closed, for assertions.
    pub fn all_prs(&self) -> Vec<StoredPr> {
        self.state.lock().unwrap().prs.clone()
    }

    pub fn pr(&self, number: u64) -> Option<StoredPr> {
        self.state
            .lock()
            .unwrap()
            .prs
            .iter()
            .find(|p| p.number == number)
            .cloned()
    }

    pub fn open_prs(&self) -> Vec<StoredPr> {
        self.state
            .lock()
            .unwrap()
            .prs
            .iter()
            .filter(|p| p.open)
            .cloned()
            .collect()
    }

    fn ref_exists(&self, name: &str) -> bool {
        git_in(
            &self.origin,
            &["rev-parse", "--verify", "--quiet", &format!("refs/heads/{}", name)],
        )
        .is_ok()
    }

    /// Commits `base..head` in origin, oldest first.
    fn commits_between(&self, base: &str, head: &str) -> Vec<CommitRecord> {
        if !self.ref_exists(head) {
            return vec![];
        }
        let range = if self.ref_exists(base) {
            format!("{}..{}", base, head)
        } else {
            head.to_string()
        };
        let Ok(raw) = git_in(
            &self.origin,
            &["log", "--format=%H%x00%B%x1e", "--reverse", &range],
        ) else {
            return vec![];
        };
        let mut commits = vec![];
        for chunk in raw.split('\u{001e}') {
            let chunk = chunk.trim_matches('\n');
            if chunk.trim().is_empty() {
                continue;
            }
            let mut parts = chunk.splitn(2, '\0');
            let oid = parts.next().unwrap_or_default().trim().to_string();
            let message = parts.next().unwrap_or_default().to_string();
            let headline = message.lines().next().unwrap_or_default().to_string();
            commits.push(CommitRecord {
                oid,
                headline,
                message,
            });
        }
        commits
    }

    fn record(&self, pr: &StoredPr) -> PrRecord {
        PrRecord {
            number: pr.number,
            title: pr.title.clone(),
            body: pr.body.clone(),
            base_ref: pr.base_ref.clone(),
            head_ref: pr.head_ref.clone(),
            mergeable: pr.mergeable,
            in_queue: pr.in_queue,
            merged: pr.merged,
            commits: self.commits_between(&pr.base_ref, &pr.head_ref),
        }
    }
}

impl Forge for MemoryForge {
    fn viewer(&self) -> Result<String> {
        Ok(self.viewer.clone())
    }

    fn fetch_open_prs_for_user(&self, _owner: &str, _repo: &str) -> Result<Vec<PrRecord>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .prs
            .iter()
            .filter(|p| p.open)
            .map(|p| self.record(p))
            .collect())
    }

    fn create_pr(
        &self,
        title: &str,
        body: &str,
        base: &str,
        head: &str,
    ) -> Result<CreateResult> {
        let mut state = self.state.lock().unwrap();
        if state.prs.iter().any(|p| p.open && p.head_ref == head) {
            return Ok(CreateResult::AlreadyExists);
        }
        let number = state.next_number;
        state.next_number += 1;
        let pr = StoredPr {
            number,
            title: title.to_string(),
            body: body.to_string(),
            base_ref: base.to_string(),
            head_ref: head.to_string(),
            open: true,
            merged: false,
            in_queue: false,
            mergeable: true,
            labels: vec![],
            comments: vec![],
            reviewers: vec![],
        };
        state.prs.push(pr.clone());
        Ok(CreateResult::Created(self.record(&pr)))
    }

    fn update_pr(&self, number: u64, update: &PrUpdate) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let pr = state
            .prs
            .iter_mut()
            .find(|p| p.number == number)
            .ok_or_else(|| anyhow!("no PR #{}", number))?;
        if let Some(title) = &update.title {
            pr.title = title.clone();
        }
        if let Some(body) = &update.body {
            pr.body = body.clone();
        }
        if let Some(base) = &update.base {
            pr.base_ref = base.clone();
        }
        Ok(())
    }

    fn close_pr(&self, number: u64) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let pr = state
            .prs
            .iter_mut()
            .find(|p| p.number == number)
            .ok_or_else(|| anyhow!("no PR #{}", number))?;
        pr.open = false;
        Ok(())
    }

    fn add_labels(&self, number: u64, labels: &[String]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let pr = state
            .prs
            .iter_mut()
            .find(|p| p.number == number)
            .ok_or_else(|| anyhow!("no PR #{}", number))?;
        for label in labels {
            if !pr.labels.contains(label) {
                pr.labels.push(label.clone());
            }
        }
        Ok(())
    }

    fn add_comment(&self, number: u64, body: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let pr = state
            .prs
            .iter_mut()
            .find(|p| p.number == number)
            .ok_or_else(|| anyhow!("no PR #{}", number))?;
        pr.comments.push(body.to_string());
        Ok(())
    }

    fn request_reviewers(&self, number: u64, logins: &[String]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let pr = state
            .prs
            .iter_mut()
            .find(|p| p.number == number)
            .ok_or_else(|| anyhow!("no PR #{}", number))?;
        for login in logins {
            if !pr.reviewers.contains(login) {
                pr.reviewers.push(login.clone());
            }
        }
        Ok(())
    }

    fn list_assignable_users(&self) -> Result<Vec<String>> {
        Ok(self.state.lock().unwrap().assignable.clone())
    }

    fn merge_pr(&self, number: u64, _method: MergeMethod) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let pr = state
            .prs
            .iter_mut()
            .find(|p| p.number == number)
            .ok_or_else(|| anyhow!("no PR #{}", number))?;
        if !pr.mergeable {
            bail!("PR #{} is not mergeable", number);
        }
        let head_sha = git_in(&self.origin, &["rev-parse", &pr.head_ref])?
            .trim()
            .to_string();
        git_in(
            &self.origin,
            &[
                "update-ref",
                &format!("refs/heads/{}", pr.base_ref),
                &head_sha,
            ],
        )?;
        pr.merged = true;
        pr.open = false;
        Ok(())
    }

    fn enable_automerge(&self, number: u64, _method: MergeMethod) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if !state.automerge_supported {
            return Err(anyhow!(Error::MergeQueueRequired { number }));
        }
        let pr = state
            .prs
            .iter_mut()
            .find(|p| p.number == number)
            .ok_or_else(|| anyhow!("no PR #{}", number))?;
        pr.in_queue = true;
        Ok(())
    }

    fn get_pr_for_branch(&self, branch: &str) -> Result<Option<PrRecord>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .prs
            .iter()
            .find(|p| p.open && p.head_ref == branch)
            .map(|p| self.record(p)))
    }
}
