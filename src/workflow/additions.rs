//! Repository prompt additions.
//!
//! Projects can append guidance to any phase prompt by committing
//! `.bob/additions/<workflow>/<STEP>.md` to a branch named `bob`. The
//! branch is read once per repository and cached for the life of the
//! process; all access is safe under concurrent tool calls.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::git;

/// Branch-relative directory the additions live in.
pub const ADDITIONS_ROOT: &str = ".bob/additions";

/// Branch the additions (and tasks) are committed to.
pub const SIDE_BRANCH: &str = "bob";

/// Upper bound on per-repository caches held by one process.
pub const MAX_CACHED_REPOS: usize = 100;

/// Error type for cache construction.
#[derive(Debug, thiserror::Error)]
pub enum AdditionsError {
    #[error("repository path cannot be empty")]
    EmptyPath,

    #[error("repository path must be absolute: {0}")]
    RelativePath(PathBuf),

    #[error("repository path contains traversal: {0}")]
    Traversal(PathBuf),
}

#[derive(Default)]
struct Inner {
    loaded: bool,
    additions: HashMap<String, HashMap<String, String>>,
}

/// Cached additions for one repository.
pub struct AdditionsCache {
    repo_path: PathBuf,
    inner: RwLock<Inner>,
}

impl AdditionsCache {
    pub fn new(repo_path: impl Into<PathBuf>) -> Result<Self, AdditionsError> {
        let repo_path = validate_repo_path(repo_path.into())?;
        Ok(Self {
            repo_path,
            inner: RwLock::new(Inner::default()),
        })
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    pub fn is_loaded(&self) -> bool {
        self.inner.read().loaded
    }

    /// Populate the cache from the `bob` branch. Safe to call from any
    /// number of threads; the git work runs at most once. A repository
    /// without a `bob` branch stays empty and unloaded so a later call
    /// can pick the branch up once it appears.
    pub fn load(&self) {
        if self.inner.read().loaded {
            return;
        }

        let mut inner = self.inner.write();
        if inner.loaded {
            return;
        }

        if !git::ref_exists(&self.repo_path, SIDE_BRANCH) {
            return;
        }

        let listing = format!("{SIDE_BRANCH}:{ADDITIONS_ROOT}/");
        let files = match git::ls_tree(&self.repo_path, &listing) {
            Ok(files) => files,
            // No additions directory on the branch.
            Err(_) => {
                inner.loaded = true;
                return;
            }
        };

        for file in files {
            let Some((workflow, step)) = parse_addition_path(&file) else {
                continue;
            };
            let blob_path = format!("{ADDITIONS_ROOT}/{workflow}/{step}.md");
            match git::show_file(&self.repo_path, SIDE_BRANCH, &blob_path) {
                Ok(Some(content)) if !content.is_empty() => {
                    inner
                        .additions
                        .entry(workflow)
                        .or_default()
                        .insert(step, content);
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!("skipping addition {blob_path}: {err}");
                }
            }
        }

        inner.loaded = true;
    }

    /// The addition for a workflow step, if one was committed.
    pub fn get(&self, workflow: &str, step: &str) -> Option<String> {
        self.inner.read().additions.get(workflow)?.get(step).cloned()
    }
}

fn validate_repo_path(path: PathBuf) -> Result<PathBuf, AdditionsError> {
    if path.as_os_str().is_empty() {
        return Err(AdditionsError::EmptyPath);
    }
    if path.to_string_lossy().contains("..") {
        return Err(AdditionsError::Traversal(path));
    }
    if !path.is_absolute() {
        return Err(AdditionsError::RelativePath(path));
    }
    Ok(path)
}

/// Split `workflow/STEP.md` into its parts, rejecting anything that could
/// escape the additions root. Entries that fail are skipped, not fatal.
fn parse_addition_path(file: &str) -> Option<(String, String)> {
    let (workflow, rest) = file.split_once('/')?;
    let step = rest.strip_suffix(".md")?;

    if !is_safe_component(workflow) || !is_safe_component(step) {
        return None;
    }

    // The joined path must stay strictly under the additions root.
    let joined = Path::new(ADDITIONS_ROOT)
        .join(workflow)
        .join(format!("{step}.md"));
    if !joined
        .components()
        .all(|c| matches!(c, Component::Normal(_)))
    {
        return None;
    }
    if !joined.starts_with(ADDITIONS_ROOT) {
        return None;
    }

    Some((workflow.to_string(), step.to_string()))
}

fn is_safe_component(component: &str) -> bool {
    !component.is_empty()
        && !component.contains("..")
        && !component.contains('/')
        && !component.contains('\\')
}

/// Process-wide pool of per-repository caches.
///
/// Bounded at [`MAX_CACHED_REPOS`]: when full, an arbitrary entry is
/// dropped to make room and the evicted repository simply reloads on its
/// next access. The pool lock is never held across a git call; at-most-
/// once loading is the per-cache lock's job.
pub struct CacheRegistry {
    caches: RwLock<HashMap<PathBuf, Arc<AdditionsCache>>>,
}

impl Default for CacheRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheRegistry {
    pub fn new() -> Self {
        Self {
            caches: RwLock::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.caches.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.caches.read().is_empty()
    }

    /// Fetch the cache for a repository, creating and loading it on first
    /// access. Returns `None` when the repository path is invalid.
    pub fn get_or_load(&self, repo_path: &Path) -> Option<Arc<AdditionsCache>> {
        let existing = self.caches.read().get(repo_path).cloned();
        if let Some(cache) = existing {
            cache.load();
            return Some(cache);
        }

        let cache = match AdditionsCache::new(repo_path) {
            Ok(cache) => Arc::new(cache),
            Err(err) => {
                tracing::warn!(
                    "refusing additions cache for {}: {err}",
                    repo_path.display()
                );
                return None;
            }
        };

        {
            let mut caches = self.caches.write();
            // Another thread may have inserted while we validated.
            if let Some(existing) = caches.get(repo_path) {
                let existing = existing.clone();
                drop(caches);
                existing.load();
                return Some(existing);
            }
            if caches.len() >= MAX_CACHED_REPOS {
                if let Some(victim) = caches.keys().next().cloned() {
                    caches.remove(&victim);
                    tracing::info!(
                        "evicted additions cache for {} (pool full)",
                        victim.display()
                    );
                }
            }
            caches.insert(repo_path.to_path_buf(), cache.clone());
        }

        cache.load();
        Some(cache)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::testutil::{current_branch, git, init_repo};
    use tempfile::TempDir;

    /// Commit additions onto an orphan `bob` branch without disturbing the
    /// working tree, the way a project would.
    fn setup_repo_with_additions(dir: &Path, entries: &[(&str, &str, &str)]) {
        init_repo(dir);
        let original_branch = current_branch(dir);
        git(dir, &["checkout", "--quiet", "--orphan", SIDE_BRANCH]);
        git(dir, &["rm", "-rf", "--quiet", "."]);
        for (workflow, step, content) in entries {
            let path = dir.join(ADDITIONS_ROOT).join(workflow);
            std::fs::create_dir_all(&path).unwrap();
            std::fs::write(path.join(format!("{step}.md")), content).unwrap();
        }
        git(dir, &["add", ADDITIONS_ROOT]);
        git(dir, &["commit", "--quiet", "-m", "additions"]);
        git(dir, &["checkout", "--quiet", &original_branch]);
    }

    #[test]
    fn test_new_cache_validates_path() {
        assert!(matches!(
            AdditionsCache::new(""),
            Err(AdditionsError::EmptyPath)
        ));
        assert!(matches!(
            AdditionsCache::new("relative/path"),
            Err(AdditionsError::RelativePath(_))
        ));
        assert!(matches!(
            AdditionsCache::new("/tmp/../etc"),
            Err(AdditionsError::Traversal(_))
        ));

        let cache = AdditionsCache::new("/tmp/some-repo").unwrap();
        assert!(!cache.is_loaded());
    }

    #[test]
    fn test_load_without_bob_branch_is_silent_and_retryable() {
        let tmp = TempDir::new().unwrap();
        init_repo(tmp.path());

        let cache = AdditionsCache::new(tmp.path()).unwrap();
        cache.load();

        assert!(!cache.is_loaded());
        assert!(cache.get("work", "PLAN").is_none());
    }

    #[test]
    fn test_load_with_branch_but_no_additions_marks_loaded() {
        let tmp = TempDir::new().unwrap();
        init_repo(tmp.path());
        git(tmp.path(), &["branch", SIDE_BRANCH]);

        let cache = AdditionsCache::new(tmp.path()).unwrap();
        cache.load();

        assert!(cache.is_loaded());
        assert!(cache.get("work", "PLAN").is_none());
    }

    #[test]
    fn test_load_reads_committed_additions() {
        let tmp = TempDir::new().unwrap();
        setup_repo_with_additions(
            tmp.path(),
            &[
                ("work", "PLAN", "## Project rule\nAlways plan twice."),
                ("work", "REVIEW", "Check the changelog."),
                ("code-review", "FIX", "Squash fixups."),
            ],
        );

        let cache = AdditionsCache::new(tmp.path()).unwrap();
        cache.load();

        assert!(cache.is_loaded());
        assert_eq!(
            cache.get("work", "PLAN").as_deref(),
            Some("## Project rule\nAlways plan twice.")
        );
        assert_eq!(
            cache.get("code-review", "FIX").as_deref(),
            Some("Squash fixups.")
        );
        assert!(cache.get("work", "EXECUTE").is_none());
        assert!(cache.get("nope", "PLAN").is_none());
    }

    #[test]
    fn test_concurrent_loads_converge() {
        let tmp = TempDir::new().unwrap();
        setup_repo_with_additions(tmp.path(), &[("work", "PLAN", "shared content here")]);

        let cache = std::sync::Arc::new(AdditionsCache::new(tmp.path()).unwrap());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    cache.load();
                    cache.get("work", "PLAN")
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(
                handle.join().unwrap().as_deref(),
                Some("shared content here")
            );
        }
        assert!(cache.is_loaded());
    }

    #[test]
    fn test_parse_addition_path_filters_unsafe_entries() {
        assert_eq!(
            parse_addition_path("work/PLAN.md"),
            Some(("work".into(), "PLAN".into()))
        );
        assert!(parse_addition_path("PLAN.md").is_none());
        assert!(parse_addition_path("work/sub/PLAN.md").is_none());
        assert!(parse_addition_path("../escape/PLAN.md").is_none());
        assert!(parse_addition_path("work/..escape.md").is_none());
        assert!(parse_addition_path("work\\evil/PLAN.md").is_none());
        assert!(parse_addition_path("work/PLAN.txt").is_none());
    }

    #[test]
    fn test_registry_returns_same_cache_for_same_repo() {
        let tmp = TempDir::new().unwrap();
        init_repo(tmp.path());

        let registry = CacheRegistry::new();
        let first = registry.get_or_load(tmp.path()).unwrap();
        let second = registry.get_or_load(tmp.path()).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_registry_rejects_invalid_paths() {
        let registry = CacheRegistry::new();
        assert!(registry.get_or_load(Path::new("relative")).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_registry_concurrent_first_access_shares_one_cache() {
        let tmp = TempDir::new().unwrap();
        setup_repo_with_additions(tmp.path(), &[("work", "PLAN", "concurrent content")]);

        let registry = std::sync::Arc::new(CacheRegistry::new());
        let repo = tmp.path().to_path_buf();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                let repo = repo.clone();
                std::thread::spawn(move || registry.get_or_load(&repo).unwrap())
            })
            .collect();

        let caches: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(registry.len(), 1);
        for cache in &caches {
            assert!(Arc::ptr_eq(&caches[0], cache));
            assert_eq!(
                cache.get("work", "PLAN").as_deref(),
                Some("concurrent content")
            );
        }
    }

    #[test]
    fn test_registry_evicts_at_capacity() {
        let tmp = TempDir::new().unwrap();
        let registry = CacheRegistry::new();

        for i in 0..=MAX_CACHED_REPOS {
            let repo = tmp.path().join(format!("repo-{i}"));
            std::fs::create_dir_all(&repo).unwrap();
            registry.get_or_load(&repo).unwrap();
        }

        // The 101st insertion evicted exactly one arbitrary victim.
        assert_eq!(registry.len(), MAX_CACHED_REPOS);
    }
}
