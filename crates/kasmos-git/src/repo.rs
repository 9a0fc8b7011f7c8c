use std::path::{Path, PathBuf};

use crate::command::GitCli;
use crate::error::GitError;

/// A discovered git repository: its worktree root and `.git` directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoHandle {
    pub root: PathBuf,
    pub git_dir: PathBuf,
}

pub fn discover_repo(path: &Path, git: &GitCli) -> Result<RepoHandle, GitError> {
    let toplevel = match git.run(path, ["rev-parse", "--show-toplevel"]) {
        Ok(output) => output.stdout.trim().to_string(),
        Err(GitError::CommandFailed { .. }) => {
            return Err(GitError::NotARepository {
                path: path.to_path_buf(),
            })
        }
        Err(err) => return Err(err),
    };
    if toplevel.is_empty() {
        return Err(GitError::NotARepository {
            path: path.to_path_buf(),
        });
    }

    let git_dir_raw = git.run(path, ["rev-parse", "--git-dir"])?.stdout;
    let git_dir = PathBuf::from(git_dir_raw.trim());
    let root = PathBuf::from(toplevel);
    let git_dir = if git_dir.is_absolute() {
        git_dir
    } else {
        root.join(git_dir)
    };

    Ok(RepoHandle { root, git_dir })
}

pub fn head_sha(repo: &RepoHandle, git: &GitCli) -> Result<String, GitError> {
    let output = git.run(&repo.root, ["rev-parse", "HEAD"])?;
    Ok(output.stdout.trim().to_string())
}

pub fn current_branch(repo: &RepoHandle, git: &GitCli) -> Result<String, GitError> {
    let output = git.run(&repo.root, ["rev-parse", "--abbrev-ref", "HEAD"])?;
    Ok(output.stdout.trim().to_string())
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::process::Command;
    use std::time::{SystemTime, UNIX_EPOCH};

    use super::{current_branch, discover_repo, head_sha};
    use crate::command::GitCli;
    use crate::error::GitError;

    fn unique_temp_dir(prefix: &str) -> PathBuf {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos();
        let path = std::env::temp_dir().join(format!("kasmos-git-repo-{prefix}-{now}"));
        fs::create_dir_all(&path).expect("create temp dir");
        path
    }

    fn run_git(cwd: &Path, args: &[&str]) {
        let output = Command::new("git")
            .args(args)
            .current_dir(cwd)
            .output()
            .expect("spawn git");
        assert!(
            output.status.success(),
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
    }

    fn init_repo() -> PathBuf {
        let root = unique_temp_dir("repo");
        run_git(&root, &["init"]);
        run_git(&root, &["config", "user.name", "Test User"]);
        run_git(&root, &["config", "user.email", "test@example.com"]);
        fs::write(root.join("README.md"), "init\n").expect("write file");
        run_git(&root, &["add", "README.md"]);
        run_git(&root, &["commit", "-m", "init"]);
        root
    }

    #[test]
    fn discover_repo_finds_root_and_git_dir() {
        let root = init_repo();
        let git = GitCli::default();

        let repo = discover_repo(&root, &git).expect("discover repo");
        assert_eq!(
            repo.root.canonicalize().expect("canonical root"),
            root.canonicalize().expect("canonical temp")
        );
        assert!(repo.git_dir.exists());

        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn discover_repo_rejects_non_repository_dirs() {
        let dir = unique_temp_dir("not-a-repo");
        let git = GitCli::default();

        let err = discover_repo(&dir, &git).expect_err("not a repo");
        assert!(matches!(err, GitError::NotARepository { .. }));

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn head_sha_and_current_branch_resolve() {
        let root = init_repo();
        let git = GitCli::default();
        let repo = discover_repo(&root, &git).expect("discover repo");

        let sha = head_sha(&repo, &git).expect("head sha");
        assert_eq!(sha.len(), 40);

        let branch = current_branch(&repo, &git).expect("current branch");
        assert!(!branch.is_empty());

        let _ = fs::remove_dir_all(root);
    }
}
