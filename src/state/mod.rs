//! Workflow instance state.
//!
//! One JSON record per workflow instance, stored under
//! `<home>/.bob/state/`. The filename is the URL-escaped workflow id, so
//! ids round-trip through the filesystem and ids that differ only in
//! separator placement never collide.

pub mod machine;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Error type for the state store.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("workflow state not found: {0}")]
    NotFound(String),

    #[error("failed to serialize workflow state: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("state store I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// The persisted record for one workflow instance. Everything else an
/// agent produces lives in markdown files under the worktree's `bots/`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowState {
    pub workflow_id: String,
    pub workflow: String,
    pub worktree_path: PathBuf,
    pub current_step: String,
}

/// Directory-backed store of [`WorkflowState`] records.
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    /// Store under `<home>/.bob/state/`.
    pub fn new() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self::at(home.join(".bob").join("state"))
    }

    /// Store rooted at an explicit directory. Tests run in parallel
    /// against temp dirs; nothing here may assume the home directory.
    pub fn at(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        if let Err(err) = std::fs::create_dir_all(&dir) {
            tracing::warn!("failed to create state dir {}: {err}", dir.display());
        }
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, workflow_id: &str) -> PathBuf {
        self.dir.join(filename_for(workflow_id))
    }

    pub fn exists(&self, workflow_id: &str) -> bool {
        self.path_for(workflow_id).is_file()
    }

    /// Load one record. A missing file and an unparseable file both
    /// surface as not-found; the latter is logged.
    pub fn load(&self, workflow_id: &str) -> Result<WorkflowState, StateError> {
        let path = self.path_for(workflow_id);
        let data = std::fs::read_to_string(&path)
            .map_err(|_| StateError::NotFound(workflow_id.to_string()))?;
        serde_json::from_str(&data).map_err(|err| {
            tracing::warn!("corrupt state file {}: {err}", path.display());
            StateError::NotFound(workflow_id.to_string())
        })
    }

    pub fn save(&self, state: &WorkflowState) -> Result<(), StateError> {
        let path = self.path_for(&state.workflow_id);
        let data = serde_json::to_string_pretty(state)?;
        std::fs::write(&path, data)?;
        Ok(())
    }

    pub fn delete(&self, workflow_id: &str) -> Result<(), StateError> {
        std::fs::remove_file(self.path_for(workflow_id))
            .map_err(|_| StateError::NotFound(workflow_id.to_string()))
    }

    /// Every parseable record in the store. Corrupt files are skipped with
    /// a warning rather than failing the listing.
    pub fn list(&self) -> Vec<WorkflowState> {
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return Vec::new();
        };

        let mut states = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.ends_with(".json") {
                continue;
            }
            let Ok(data) = std::fs::read_to_string(entry.path()) else {
                continue;
            };
            match serde_json::from_str::<WorkflowState>(&data) {
                Ok(state) => states.push(state),
                Err(err) => {
                    tracing::warn!("skipping corrupt state file {name}: {err}");
                }
            }
        }
        states
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Filesystem-safe, reversible filename for a workflow id.
///
/// Plain separator substitution would map `foo/bar-baz` and `foo-bar/baz`
/// to the same file; URL escaping keeps them apart and unescapes back to
/// the exact id.
pub fn filename_for(workflow_id: &str) -> String {
    format!("{}.json", urlencoding::encode(workflow_id))
}

/// Derive the workflow id for a worktree.
///
/// Paths shaped `<parent>/<repo>-worktrees/<name>` map to `<repo>/<name>`;
/// anything else gets a hash prefix of the absolute path. Session and
/// agent ids, when present, extend the base id.
pub fn worktree_to_id(worktree_path: &Path, session_id: &str, agent_id: &str) -> String {
    let path = worktree_path.to_string_lossy();

    let segments: Vec<&str> = path.split("-worktrees/").collect();
    let mut base_id = if segments.len() == 2 {
        let repo = Path::new(segments[0].trim_end_matches('/'))
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let name = segments[1].trim_end_matches('/');
        format!("{repo}/{name}")
    } else {
        let digest = Sha256::digest(path.as_bytes());
        digest[..8].iter().map(|b| format!("{b:02x}")).collect()
    };

    if !session_id.is_empty() {
        base_id = format!("{base_id}-session-{session_id}");
    }
    if !agent_id.is_empty() {
        base_id = format!("{base_id}-agent-{agent_id}");
    }

    base_id
}
