//! Process-level git driver.
//!
//! All git invocations go through [`Git`], which centralizes command
//! execution, pretend-mode gating, the bounded retry policy for GPG signing
//! flakes, and the stale `index.lock` workaround. Commands are passed as
//! argv slices, never as shell strings.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, info, warn};

use crate::config::{Config, ToolConfig};

/// Substrings that identify a transient GPG-signing failure worth retrying.
const GPG_FLAKE_MARKERS: &[&str] = &[
    "Another git process",
    "communication with agent failed",
    "Couldn't sign message",
    "failed to write commit object",
    "Signing file",
];

const GPG_FLAKE_MAX_RETRIES: u32 = 3;

#[derive(Debug, Clone)]
struct LockSettings {
    wait_enabled: bool,
    max_wait: Duration,
    check_interval: Duration,
    stale_threshold: Duration,
}

impl LockSettings {
    fn from_tool(tool: &ToolConfig) -> Self {
        LockSettings {
            wait_enabled: tool.index_lock_wait_enabled,
            max_wait: Duration::from_secs(tool.index_lock_max_wait_secs),
            check_interval: Duration::from_millis(tool.index_lock_check_interval_ms),
            stale_threshold: Duration::from_secs(tool.index_lock_stale_threshold_secs),
        }
    }
}

/// Git driver bound to one repository.
#[derive(Debug, Clone)]
pub struct Git {
    dir: Option<PathBuf>,
    pretend: bool,
    no_rebase: bool,
    lock: LockSettings,
}

pub fn ensure_tool(name: &str) -> Result<()> {
    let status = Command::new(name)
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .with_context(|| format!("{} not found in PATH", name))?;
    if !status.success() {
        bail!("{} appears to be installed but not runnable", name);
    }
    Ok(())
}

pub fn shellish(args: &[&str]) -> String {
    args.iter()
        .map(|a| {
            if a.chars()
                .any(|c| c.is_whitespace() || c == '"' || c == '\'')
            {
                format!("{:?}", a)
            } else {
                a.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

impl Git {
    /// Driver with default policies, before config is available.
    pub fn new(dir: Option<PathBuf>) -> Self {
        Git {
            dir,
            pretend: false,
            no_rebase: false,
            lock: LockSettings::from_tool(&ToolConfig::default()),
        }
    }

    /// Re-bind policies from loaded config.
    pub fn with_config(&self, config: &Config) -> Self {
        Git {
            dir: self.dir.clone(),
            pretend: config.tool.pretend,
            no_rebase: config.user.no_rebase,
            lock: LockSettings::from_tool(&config.tool),
        }
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new("git");
        if let Some(dir) = &self.dir {
            cmd.arg("-C").arg(dir);
        }
        cmd.args(args);
        cmd
    }

    fn run_once(&self, args: &[&str]) -> Result<String> {
        debug!("git {}", shellish(args));
        let out = self
            .command(args)
            .output()
            .with_context(|| "failed to spawn git")?;
        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr);
            bail!(
                "git {} failed: {}",
                shellish(args),
                stderr.trim()
            );
        }
        Ok(String::from_utf8_lossy(&out.stdout).to_string())
    }

    /// Run a read-only git command and return stdout.
    pub fn read(&self, args: &[&str]) -> Result<String> {
        self.run_once(args)
    }

    /// Run a mutating git command.
    ///
    /// Applies the pretend gate for pushes, the no-rebase gate for rebases,
    /// the index.lock wait, and the GPG-flake retry for cherry-picks.
    pub fn write(&self, args: &[&str]) -> Result<String> {
        let sub = args.first().copied().unwrap_or("");
        if self.no_rebase && sub == "rebase" {
            info!("Skipping `git {}` due to --no-rebase", shellish(args));
            return Ok(String::new());
        }
        if self.pretend && sub == "push" {
            info!("[PRETEND] git {}", shellish(args));
            return Ok(String::new());
        }

        self.wait_for_index_lock();

        let retry = sub == "cherry-pick" && !args.contains(&"--no-gpg-sign");
        if !retry {
            return self.run_once(args);
        }

        let mut last_err = None;
        for attempt in 0..GPG_FLAKE_MAX_RETRIES {
            match self.run_once(args) {
                Ok(out) => return Ok(out),
                Err(e) => {
                    let msg = e.to_string();
                    let flake = GPG_FLAKE_MARKERS.iter().any(|m| msg.contains(m));
                    if flake && attempt + 1 < GPG_FLAKE_MAX_RETRIES {
                        warn!(
                            "GPG signing failed during cherry-pick, attempt {}/{}: {}",
                            attempt + 1,
                            GPG_FLAKE_MAX_RETRIES,
                            msg
                        );
                        // A half-applied pick must be aborted before retrying.
                        let _ = self.run_once(&["cherry-pick", "--abort"]);
                        std::thread::sleep(Duration::from_millis(500 * (1 << attempt)));
                        last_err = Some(e);
                        continue;
                    }
                    return Err(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("cherry-pick retries exhausted")))
    }

    pub fn repo_root(&self) -> Result<String> {
        Ok(self
            .read(&["rev-parse", "--show-toplevel"])?
            .trim()
            .to_string())
    }

    pub fn git_dir(&self) -> Result<PathBuf> {
        let out = self.read(&["rev-parse", "--absolute-git-dir"])?;
        Ok(PathBuf::from(out.trim()))
    }

    pub fn current_branch(&self) -> Result<String> {
        Ok(self
            .read(&["rev-parse", "--abbrev-ref", "HEAD"])?
            .trim()
            .to_string())
    }

    pub fn head(&self) -> Result<String> {
        Ok(self.read(&["rev-parse", "HEAD"])?.trim().to_string())
    }

    pub fn rev_parse(&self, rev: &str) -> Result<String> {
        Ok(self.read(&["rev-parse", rev])?.trim().to_string())
    }

    /// Tree object id of a commit, for content-equality checks.
    pub fn tree_of(&self, rev: &str) -> Result<String> {
        self.rev_parse(&format!("{}^{{tree}}", rev))
    }

    pub fn branch_exists(&self, name: &str) -> Result<bool> {
        Ok(self
            .command(&["rev-parse", "--verify", "--quiet", &format!("refs/heads/{}", name)])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .with_context(|| "failed to spawn git")?
            .success())
    }

    /// Dirty working tree, ignoring untracked files.
    pub fn is_dirty(&self) -> Result<bool> {
        let out = self.read(&["status", "--porcelain", "--untracked-files=no"])?;
        Ok(!out.trim().is_empty())
    }

    /// Run `f` with local changes stashed away; the stash is always popped,
    /// on success and on failure alike.
    pub fn with_stash<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        if !self.is_dirty()? {
            return f();
        }
        self.write(&["stash"])
            .with_context(|| "failed to stash local changes")?;
        let result = f();
        let pop = self.write(&["stash", "pop"]);
        match (result, pop) {
            (Ok(v), Ok(_)) => Ok(v),
            (Ok(_), Err(e)) => Err(e.context("operation succeeded but unstash failed")),
            (Err(e), _) => Err(e),
        }
    }

    /// Wait for `.git/index.lock` to be released; remove it once it is
    /// provably stale or the wait budget is exhausted.
    fn wait_for_index_lock(&self) {
        if !self.lock.wait_enabled {
            return;
        }
        let Ok(git_dir) = self.git_dir() else {
            return;
        };
        let lock_path = git_dir.join("index.lock");
        if !lock_path.exists() {
            return;
        }

        debug!("Detected index.lock, waiting for it to be released");
        let start = Instant::now();
        while lock_path.exists() {
            if lock_age(&lock_path).is_some_and(|age| age > self.lock.stale_threshold) {
                warn!("index.lock is stale, removing it");
                remove_lock(&lock_path);
                return;
            }
            if start.elapsed() > self.lock.max_wait {
                warn!(
                    "index.lock still present after {:?}, removing it",
                    self.lock.max_wait
                );
                remove_lock(&lock_path);
                return;
            }
            std::thread::sleep(self.lock.check_interval);
        }
        debug!("index.lock released after {:?}", start.elapsed());
    }
}

fn lock_age(path: &Path) -> Option<Duration> {
    let mtime = std::fs::metadata(path).ok()?.modified().ok()?;
    SystemTime::now().duration_since(mtime).ok()
}

fn remove_lock(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => info!("Removed index.lock at {}", path.display()),
        Err(e) => warn!("Failed to remove index.lock: {}, proceeding anyway", e),
    }
}
