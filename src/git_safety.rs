//! Git safety layer: selective staging, sensitive-pattern filtering,
//! checkpoint/commit distinction, and WAL-guarded rollback.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use regex::Regex;

use crate::error::{GitError, GitResult};
use crate::state::git::GitState;

const DEFAULT_MAX_RETRIES: u32 = 3;
const RETRY_BASE_DELAY_MS: u64 = 100;
const DEFAULT_SAFE_DIRS: &[&str] = &["src", "tests", "test", "lib", "docs"];

pub struct GitSafety {
    working_dir: PathBuf,
    commit_prefix: String,
    max_retries: u32,
}

impl GitSafety {
    pub fn new(working_dir: impl AsRef<Path>, commit_prefix: impl Into<String>) -> Self {
        Self {
            working_dir: working_dir.as_ref().to_path_buf(),
            commit_prefix: commit_prefix.into(),
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    fn run_git(&self, args: &[&str]) -> GitResult<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.working_dir)
            .output()
            .map_err(GitError::Io)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(GitError::command_failed(args.join(" "), stderr.to_string()));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn run_git_with_retry(&self, args: &[&str]) -> GitResult<String> {
        let mut last_error = None;
        for attempt in 0..=self.max_retries {
            match self.run_git(args) {
                Ok(out) => return Ok(out),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    let delay = RETRY_BASE_DELAY_MS * (1 << attempt);
                    std::thread::sleep(Duration::from_millis(delay));
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_error.unwrap_or_else(|| GitError::command_failed("retry", "max retries exceeded")))
    }

    pub fn current_branch(&self) -> GitResult<String> {
        self.run_git(&["rev-parse", "--abbrev-ref", "HEAD"])
    }

    pub fn current_commit(&self) -> GitResult<String> {
        self.run_git(&["rev-parse", "HEAD"])
    }

    pub fn has_uncommitted_changes(&self) -> GitResult<bool> {
        Ok(!self.run_git(&["status", "--porcelain"])?.is_empty())
    }

    /// Startup ritual: refuse a protected branch, stash dirty work, create
    /// `sprint-<name>-<timestamp>` from HEAD.
    pub fn start_sprint(
        &self,
        sprint_name: &str,
        timestamp: &str,
        protected: &std::collections::BTreeSet<String>,
    ) -> GitResult<GitState> {
        let original_branch = self.current_branch()?;
        if protected.contains(&original_branch) {
            return Err(GitError::ProtectedBranch {
                branch: original_branch,
            });
        }
        let stash_ref = if self.has_uncommitted_changes()? {
            self.run_git_with_retry(&["stash", "push", "-u", "-m", "pre-sprint-stash"])?;
            Some("stash@{0}".to_string())
        } else {
            None
        };
        let branch = format!("sprint-{sprint_name}-{timestamp}");
        self.run_git_with_retry(&["checkout", "-b", &branch])?;

        let mut state = GitState::new(branch, original_branch);
        state.stash_ref = stash_ref;
        Ok(state)
    }

    /// Stage only tracked modifications plus files under the configured safe
    /// directories, never `git add -A`, then strip anything matching a
    /// sensitive pattern.
    pub fn stage_selectively(&self, extra_safe_dirs: &[String]) -> GitResult<Vec<String>> {
        self.run_git_with_retry(&["add", "-u"])?;
        for dir in DEFAULT_SAFE_DIRS.iter().map(|s| s.to_string()).chain(extra_safe_dirs.iter().cloned()) {
            let path = self.working_dir.join(&dir);
            if path.exists() {
                self.run_git_with_retry(&["add", &dir])?;
            }
        }
        let staged = self.staged_paths()?;
        let sensitive = self.unstage_sensitive(&staged)?;
        Ok(staged.into_iter().filter(|p| !sensitive.contains(p)).collect())
    }

    fn staged_paths(&self) -> GitResult<Vec<String>> {
        let out = self.run_git(&["diff", "--cached", "--name-only"])?;
        Ok(out.lines().map(str::to_string).filter(|l| !l.is_empty()).collect())
    }

    fn unstage_sensitive(&self, staged: &[String]) -> GitResult<Vec<String>> {
        let patterns: Vec<Regex> = crate::state::git::default_sensitive_patterns()
            .iter()
            .map(|p| Regex::new(&glob_to_regex(p)).expect("built-in sensitive patterns compile"))
            .collect();
        let mut unstaged = Vec::new();
        for path in staged {
            let basename = Path::new(path)
                .file_name()
                .map(|f| f.to_string_lossy().to_string())
                .unwrap_or_else(|| path.clone());
            if patterns.iter().any(|re| re.is_match(&basename)) {
                self.run_git(&["reset", "HEAD", "--", path])?;
                tracing::warn!(path = %path, "unstaged sensitive file before commit");
                unstaged.push(path.clone());
            }
        }
        Ok(unstaged)
    }

    /// Commit currently-staged changes; returns `Ok(None)` if nothing is staged.
    pub fn commit(&self, message: &str) -> GitResult<Option<String>> {
        if self.staged_paths()?.is_empty() {
            return Ok(None);
        }
        let full_message = format!("{}: {message}", self.commit_prefix);
        self.run_git_with_retry(&["commit", "-m", &full_message])?;
        Ok(Some(self.current_commit()?))
    }

    pub fn rollback_reset(&self, to_hash: &str) -> GitResult<()> {
        self.run_git_with_retry(&["reset", "--hard", to_hash])?;
        self.run_git_with_retry(&["clean", "-fd"])?;
        Ok(())
    }
}

/// Minimal glob-to-regex translation sufficient for the fixed sensitive-file
/// pattern set (`*`, literal segments, no character classes).
fn glob_to_regex(glob: &str) -> String {
    let mut out = String::from("^");
    for ch in glob.chars() {
        match ch {
            '*' => out.push_str(".*"),
            '.' => out.push_str("\\."),
            c => out.push(c),
        }
    }
    out.push('$');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_to_regex_matches_env_files() {
        let re = Regex::new(&glob_to_regex(".env.*")).unwrap();
        assert!(re.is_match(".env.production"));
        assert!(!re.is_match("envfile.txt"));
    }

    #[test]
    fn glob_to_regex_matches_secret_wildcard() {
        let re = Regex::new(&glob_to_regex("*secret*")).unwrap();
        assert!(re.is_match("my_secret_key.json"));
        assert!(!re.is_match("main.rs"));
    }
}
