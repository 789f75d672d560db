//! Git subprocess layer.
//!
//! Every interaction with version control goes through `git -C <path> ...`.
//! The orchestrator depends on exact command-line behavior (linked
//! worktrees, reading blobs at a ref, remote HEAD detection), so the
//! plumbing commands are the interface.

pub mod worktree;

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

/// Error type for git operations.
#[derive(Debug, thiserror::Error)]
pub enum GitError {
    #[error("not a git repository: {0}")]
    NotARepository(PathBuf),

    #[error("git {command} failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("failed to run git: {0}")]
    Io(#[from] std::io::Error),
}

/// Run a git command in `repo`, returning the raw output.
fn run(repo: &Path, args: &[&str]) -> Result<Output, GitError> {
    let output = Command::new("git").arg("-C").arg(repo).args(args).output()?;
    Ok(output)
}

/// Run a git command, requiring success and returning trimmed stdout.
fn run_checked(repo: &Path, args: &[&str]) -> Result<String, GitError> {
    let output = run(repo, args)?;
    if !output.status.success() {
        return Err(GitError::CommandFailed {
            command: args.join(" "),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Repository root (`--show-toplevel`) for any path inside it.
pub fn repo_root(path: &Path) -> Result<PathBuf, GitError> {
    run_checked(path, &["rev-parse", "--show-toplevel"])
        .map(PathBuf::from)
        .map_err(|_| GitError::NotARepository(path.to_path_buf()))
}

/// The `.git` location git reports for a path (`--git-dir`).
pub fn git_dir(path: &Path) -> Result<String, GitError> {
    run_checked(path, &["rev-parse", "--git-dir"])
        .map_err(|_| GitError::NotARepository(path.to_path_buf()))
}

/// Whether a ref resolves in the repository.
pub fn ref_exists(repo: &Path, name: &str) -> bool {
    run(repo, &["rev-parse", "--verify", "--quiet", name])
        .map(|output| output.status.success())
        .unwrap_or(false)
}

/// Short name of the branch HEAD is on.
pub fn current_branch(repo: &Path) -> Result<String, GitError> {
    run_checked(repo, &["rev-parse", "--abbrev-ref", "HEAD"])
}

/// Branch the remote `origin` points its HEAD at, when known.
pub fn origin_head_branch(repo: &Path) -> Option<String> {
    run_checked(repo, &["symbolic-ref", "refs/remotes/origin/HEAD"])
        .ok()
        .map(|r| r.trim_start_matches("refs/remotes/origin/").to_string())
}

/// URL of the `origin` remote.
pub fn origin_url(repo: &Path) -> Result<String, GitError> {
    run_checked(repo, &["remote", "get-url", "origin"])
}

/// File paths under a tree-ish, relative to it.
pub fn ls_tree(repo: &Path, treeish: &str) -> Result<Vec<String>, GitError> {
    let output = run_checked(repo, &["ls-tree", "-r", "--name-only", treeish])?;
    Ok(output.lines().filter(|l| !l.is_empty()).map(str::to_string).collect())
}

/// Read a blob at `<reference>:<file>`. A path that does not exist at the
/// ref comes back as `None`; other failures are errors.
pub fn show_file(repo: &Path, reference: &str, file: &str) -> Result<Option<String>, GitError> {
    let object = format!("{reference}:{file}");
    let output = run(repo, &["show", &object])?;
    if output.status.success() {
        return Ok(Some(String::from_utf8_lossy(&output.stdout).into_owned()));
    }
    // Exit code 128 is how git reports a path missing at the ref.
    if output.status.code() == Some(128) {
        return Ok(None);
    }
    Err(GitError::CommandFailed {
        command: format!("show {object}"),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    })
}
