//! Shared test fixtures: a scratch repository wired to a bare origin,
//! driven through the real git binary.

use std::path::Path;
use std::process::Command;
use tempfile::TempDir;

use crate::config::{test_config, Config};
use crate::forge::memory::MemoryForge;
use crate::forge::{CommitRecord, PrRecord};
use crate::git::Git;
use crate::snapshot::Snapshot;

pub struct RepoFixture {
    work: TempDir,
    origin: TempDir,
}

fn git_at(dir: &Path, args: &[&str]) -> String {
    let out = Command::new("git")
        .current_dir(dir)
        .args(args)
        .output()
        .expect("spawn git");
    assert!(
        out.status.success(),
        "git {:?} failed\nstdout:\n{}\nstderr:\n{}",
        args,
        String::from_utf8_lossy(&out.stdout),
        String::from_utf8_lossy(&out.stderr)
    );
    String::from_utf8_lossy(&out.stdout).to_string()
}

impl RepoFixture {
    pub fn path(&self) -> &Path {
        self.work.path()
    }

    pub fn origin_path(&self) -> &Path {
        self.origin.path()
    }

    pub fn git(&self) -> Git {
        Git::new(Some(self.work.path().to_path_buf()))
    }

    pub fn config(&self) -> Config {
        test_config()
    }

    pub fn forge(&self) -> MemoryForge {
        MemoryForge::new(self.origin.path())
    }

    pub fn run_git(&self, args: &[&str]) -> String {
        git_at(self.work.path(), args)
    }

    pub fn commit_file(&self, name: &str, content: &str, message: &str) {
        let path = self.work.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create parent dirs");
        }
        std::fs::write(&path, content).expect("write file");
        self.run_git(&["add", "."]);
        self.run_git(&["commit", "-m", message]);
    }

    pub fn append_file(&self, name: &str, content: &str, message: &str) {
        let path = self.work.path().join(name);
        let mut existing = std::fs::read_to_string(&path).unwrap_or_default();
        existing.push_str(content);
        std::fs::write(&path, existing).expect("write file");
        self.run_git(&["add", "."]);
        self.run_git(&["commit", "-m", message]);
    }

    pub fn origin_rev_parse(&self, rev: &str) -> String {
        git_at(self.origin.path(), &["rev-parse", rev])
            .trim()
            .to_string()
    }

    pub fn origin_has_branch(&self, name: &str) -> bool {
        Command::new("git")
            .current_dir(self.origin.path())
            .args(["rev-parse", "--verify", "--quiet", &format!("refs/heads/{}", name)])
            .output()
            .expect("spawn git")
            .status
            .success()
    }

    /// File listing of a commit's tree in origin.
    pub fn origin_tree_files(&self, rev: &str) -> Vec<String> {
        git_at(self.origin.path(), &["ls-tree", "-r", "--name-only", rev])
            .lines()
            .map(|l| l.to_string())
            .collect()
    }
}

/// Working repository with one pushed `main` commit and a bare origin.
pub fn init_repo_with_origin() -> RepoFixture {
    let work = tempfile::tempdir().expect("create work dir");
    let origin = tempfile::tempdir().expect("create origin dir");

    git_at(origin.path(), &["init", "--bare", "--initial-branch=main"]);

    git_at(work.path(), &["init", "--initial-branch=main"]);
    git_at(work.path(), &["config", "user.email", "spr@example.com"]);
    git_at(work.path(), &["config", "user.name", "SPR Tests"]);
    git_at(work.path(), &["config", "commit.gpgsign", "false"]);
    std::fs::write(work.path().join("README.md"), "# fixture\n").expect("write file");
    git_at(work.path(), &["add", "."]);
    git_at(work.path(), &["commit", "-m", "init"]);
    git_at(
        work.path(),
        &["remote", "add", "origin", origin.path().to_str().expect("utf8 path")],
    );
    git_at(work.path(), &["push", "-u", "origin", "main"]);

    RepoFixture { work, origin }
}

/// Alias used by tests that never touch the remote.
pub fn init_repo() -> RepoFixture {
    init_repo_with_origin()
}

pub fn stub_record(
    number: u64,
    head: &str,
    base: &str,
    commit_id: &str,
    oid: &str,
) -> PrRecord {
    PrRecord {
        number,
        title: format!("PR {}", number),
        body: String::new(),
        base_ref: base.to_string(),
        head_ref: head.to_string(),
        mergeable: true,
        in_queue: false,
        merged: false,
        commits: vec![CommitRecord {
            oid: oid.to_string(),
            headline: format!("subject {}", commit_id),
            message: format!("subject {}\n\ncommit-id:{}", commit_id, commit_id),
        }],
    }
}

pub fn snapshot_of(config: &Config, records: Vec<PrRecord>) -> Snapshot {
    crate::snapshot::snapshot_from_records(config, &records)
}
