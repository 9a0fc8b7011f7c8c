use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use crate::command::GitCli;
use crate::error::GitError;
use crate::repo::{head_sha, RepoHandle};

pub const WORKTREE_ROOT: &str = ".worktrees";

/// Derives the plan branch from a plan filename:
/// `"2026-02-21-auth.md"` → `"plan/auth"`.
pub fn plan_branch_from_file(plan_file: &str) -> String {
    let name = plan_file.strip_suffix(".md").unwrap_or(plan_file);
    let bytes = name.as_bytes();
    let title = if bytes.len() > 11
        && bytes[4] == b'-'
        && bytes[7] == b'-'
        && bytes[10] == b'-'
        && bytes[..4].iter().all(u8::is_ascii_digit)
    {
        &name[11..]
    } else {
        name
    };
    format!("plan/{title}")
}

/// Branch for one task of a plan wave: `"plan/auth/task-3"`.
pub fn task_branch(plan_branch: &str, task_number: u32) -> String {
    format!("{plan_branch}/task-{task_number}")
}

/// Worktree directory for a branch, slashes flattened to dashes:
/// `plan/auth` → `<repo>/.worktrees/plan-auth`.
pub fn worktree_path(repo_root: &Path, branch: &str) -> PathBuf {
    repo_root.join(WORKTREE_ROOT).join(branch.replace('/', "-"))
}

/// Diff statistics for a worktree relative to its recorded base commit.
#[derive(Debug, Default)]
pub struct DiffStats {
    pub content: String,
    pub added: usize,
    pub removed: usize,
    /// Set when the diff could not be computed (e.g. the worktree directory
    /// disappeared); the stats themselves stay empty.
    pub error: Option<GitError>,
}

impl DiffStats {
    pub fn is_empty(&self) -> bool {
        self.added == 0 && self.removed == 0 && self.content.is_empty()
    }
}

/// A git worktree bound to one branch under `.worktrees/`.
///
/// `setup()` records the base commit SHA at creation time; `diff()` compares
/// against that SHA rather than the live branch tip, so commits landing on
/// the main branch mid-flight do not pollute the diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanWorktree {
    git: GitCli,
    repo_root: PathBuf,
    branch: String,
    path: PathBuf,
    base_sha: Option<String>,
}

impl PlanWorktree {
    pub fn new(git: GitCli, repo: &RepoHandle, branch: impl Into<String>) -> Self {
        let branch = branch.into();
        let path = worktree_path(&repo.root, &branch);
        Self {
            git,
            repo_root: repo.root.clone(),
            branch,
            path,
            base_sha: None,
        }
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn base_sha(&self) -> Option<&str> {
        self.base_sha.as_deref()
    }

    /// Creates the worktree, branching off HEAD when the branch does not
    /// exist yet, and records the base commit SHA.
    pub fn setup(&mut self) -> Result<(), GitError> {
        let root = self.repo_root.join(WORKTREE_ROOT);
        fs::create_dir_all(&root).map_err(|source| GitError::Io {
            command: format!("create_dir_all {}", root.display()),
            source,
        })?;

        let repo = RepoHandle {
            root: self.repo_root.clone(),
            git_dir: self.repo_root.join(".git"),
        };
        let base = head_sha(&repo, &self.git)?;

        let args = if self.branch_exists()? {
            vec![
                OsString::from("worktree"),
                OsString::from("add"),
                self.path.as_os_str().to_os_string(),
                OsString::from(self.branch.as_str()),
            ]
        } else {
            vec![
                OsString::from("worktree"),
                OsString::from("add"),
                OsString::from("-b"),
                OsString::from(self.branch.as_str()),
                self.path.as_os_str().to_os_string(),
            ]
        };
        self.git.run(&self.repo_root, args)?;

        self.base_sha = Some(base);
        Ok(())
    }

    /// Removes the worktree. An already-gone directory is not an error.
    pub fn cleanup(&self) -> Result<(), GitError> {
        if !self.path.exists() {
            // Still prune the registration if git kept one.
            let _ = self.git.run(&self.repo_root, ["worktree", "prune"]);
            return Ok(());
        }

        let args = vec![
            OsString::from("worktree"),
            OsString::from("remove"),
            OsString::from("--force"),
            self.path.as_os_str().to_os_string(),
        ];
        self.git.run(&self.repo_root, args)?;
        Ok(())
    }

    /// Diffs the worktree against the recorded base SHA and counts changed
    /// lines. A missing worktree directory or base SHA yields empty stats
    /// with the error recorded, so a periodic caller does not log-spam.
    pub fn diff(&self) -> DiffStats {
        let mut stats = DiffStats::default();

        if !self.path.exists() {
            stats.error = Some(GitError::WorktreeGone {
                path: self.path.clone(),
            });
            return stats;
        }

        let Some(base) = self.base_sha.as_deref() else {
            stats.error = Some(GitError::Parse {
                context: "no base commit SHA recorded for worktree".to_string(),
            });
            return stats;
        };

        let output = match self.git.run(&self.path, ["--no-pager", "diff", base]) {
            Ok(output) => output,
            Err(err) => {
                stats.error = Some(err);
                return stats;
            }
        };

        for line in output.stdout.lines() {
            if line.starts_with('+') && !line.starts_with("+++") {
                stats.added += 1;
            } else if line.starts_with('-') && !line.starts_with("---") {
                stats.removed += 1;
            }
        }
        stats.content = output.stdout;
        stats
    }

    fn branch_exists(&self) -> Result<bool, GitError> {
        let reference = format!("refs/heads/{}", self.branch);
        match self.git.run(
            &self.repo_root,
            ["rev-parse", "--verify", "--quiet", reference.as_str()],
        ) {
            Ok(_) => Ok(true),
            Err(GitError::CommandFailed { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }
}
