//! Worktree lifecycle.
//!
//! Every agent works in a linked worktree so parallel agents never touch
//! the same checkout. Worktrees live next to the repository at
//! `<parent>/<repo>-worktrees/<feature>` on a `feature/<feature>` branch.

use std::path::{Path, PathBuf};

use super::GitError;

/// Whether `path` is the primary checkout rather than a linked worktree,
/// plus the repository root.
///
/// A linked worktree has a `.git` *file* pointing back at the main
/// repository; only the primary checkout has a `.git` directory.
pub fn is_main_repo(path: &Path) -> Result<(bool, PathBuf), GitError> {
    let git_dir = super::git_dir(path)?;
    let repo_root = super::repo_root(path)?;

    let dot_git = path.join(".git");
    let is_main = match std::fs::metadata(&dot_git) {
        Ok(meta) => meta.is_dir(),
        // No `.git` at this level: trust what git reported for the path.
        Err(_) => git_dir == ".git" || Path::new(&git_dir) == dot_git.as_path(),
    };

    Ok((is_main, repo_root))
}

/// Base branch for new worktrees: origin's HEAD, then local `main`, then
/// local `master`, then whatever HEAD currently is. The order is part of
/// the contract; changing it changes which commit new work starts from.
fn base_branch(repo_root: &Path) -> Result<String, GitError> {
    if let Some(branch) = super::origin_head_branch(repo_root) {
        return Ok(branch);
    }
    for candidate in ["main", "master"] {
        if super::ref_exists(repo_root, candidate) {
            return Ok(candidate.to_string());
        }
    }
    super::current_branch(repo_root)
}

/// Create an isolated worktree for a feature, returning its path and the
/// branch it is on. The `bots/` directory is created inside the new
/// worktree; if that fails the worktree and branch are torn down again.
pub fn create_worktree(
    repo_root: &Path,
    feature_name: &str,
) -> Result<(PathBuf, String), GitError> {
    let repo_name = repo_root
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let worktrees_dir = repo_root
        .parent()
        .unwrap_or(repo_root)
        .join(format!("{repo_name}-worktrees"));
    let worktree_path = worktrees_dir.join(feature_name);
    let branch_name = format!("feature/{feature_name}");

    let base = base_branch(repo_root)?;

    std::fs::create_dir_all(&worktrees_dir)?;

    let path_arg = worktree_path.to_string_lossy().into_owned();
    super::run_checked(
        repo_root,
        &["worktree", "add", "-b", &branch_name, &path_arg, &base],
    )?;

    if let Err(err) = std::fs::create_dir_all(worktree_path.join("bots")) {
        // Roll back the half-made worktree so a retry starts clean.
        let _ = super::run(repo_root, &["worktree", "remove", &path_arg, "--force"]);
        let _ = super::run(repo_root, &["branch", "-D", &branch_name]);
        return Err(GitError::Io(err));
    }

    Ok((worktree_path, branch_name))
}
