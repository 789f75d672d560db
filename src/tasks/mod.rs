//! Task records and the task manager.
//!
//! One JSON file per task at `.bob/issues/<id>.json` on the `bob` branch,
//! shared by every agent working the repository. The dependency graph is
//! kept symmetric: `B in A.blocks` exactly when `A in B.blockedBy`, and
//! deleting a task first scrubs it out of every other record.

mod contents;

pub use contents::{ContentsStore, FileContent, GitHubContents};

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::git;

/// Branch-relative directory the task files live in.
pub const ISSUES_DIR: &str = ".bob/issues";

/// Branch the task files are committed to.
pub const TASK_BRANCH: &str = "bob";

const VALID_TYPES: &[&str] = &["feature", "bug", "chore", "refactor", "docs", "test"];
const VALID_PRIORITIES: &[&str] = &["high", "medium", "low"];

/// Error type for task operations.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("task not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    InvalidInput(String),

    #[error("not a git repository: {0}")]
    NotARepository(String),

    #[error("not a GitHub repository or invalid remote URL: {0}")]
    InvalidRemote(String),

    #[error("GITHUB_TOKEN environment variable not set")]
    MissingToken,

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("hosting API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("failed to decode file: {0}")]
    Decode(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// A user-visible work item.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub title: String,
    pub description: String,
    #[serde(rename = "type")]
    pub task_type: String,
    pub priority: String,
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Task ids this task blocks.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blocks: Vec<String>,
    /// Task ids blocking this task.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blocked_by: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub comments: Vec<Comment>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    /// Free-form key-value state workflows attach to the task.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub workflow_state: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// A comment on a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: String,
    pub author: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// Filters for listing tasks. Empty fields match everything; the tag
/// filter matches tasks sharing at least one tag with it.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub state: Option<String>,
    pub priority: Option<String>,
    pub task_type: Option<String>,
    pub assignee: Option<String>,
    pub tags: Vec<String>,
}

impl TaskFilter {
    fn matches(&self, task: &Task) -> bool {
        if let Some(state) = &self.state {
            if &task.state != state {
                return false;
            }
        }
        if let Some(priority) = &self.priority {
            if &task.priority != priority {
                return false;
            }
        }
        if let Some(task_type) = &self.task_type {
            if &task.task_type != task_type {
                return false;
            }
        }
        if let Some(assignee) = &self.assignee {
            if task.assignee.as_deref() != Some(assignee.as_str()) {
                return false;
            }
        }
        if !self.tags.is_empty() && !self.tags.iter().any(|tag| task.tags.contains(tag)) {
            return false;
        }
        true
    }
}

/// Partial update for a task. `None` leaves a field untouched.
#[derive(Debug, Clone, Default)]
pub struct TaskUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub task_type: Option<String>,
    pub priority: Option<String>,
    pub state: Option<String>,
    pub assignee: Option<String>,
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    pub task: Task,
    pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteTaskResult {
    pub task_id: String,
    pub title: String,
    pub message: String,
    pub dependencies_cleaned_up: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentResult {
    pub comment: Comment,
    pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStateResult {
    pub task_id: String,
    pub workflow_state: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Task manager over a [`ContentsStore`].
pub struct TaskManager {
    issues_dir: String,
    store: Option<Arc<dyn ContentsStore>>,
}

impl TaskManager {
    /// Resolve a GitHub store from each repository's `origin` remote.
    pub fn new() -> Self {
        Self {
            issues_dir: ISSUES_DIR.to_string(),
            store: None,
        }
    }

    /// Use a fixed backing store instead of resolving one per repository
    /// (tests, local mirrors).
    pub fn with_store(store: Arc<dyn ContentsStore>) -> Self {
        Self {
            issues_dir: ISSUES_DIR.to_string(),
            store: Some(store),
        }
    }

    fn contents_for(&self, repo_path: &Path) -> Result<Arc<dyn ContentsStore>, TaskError> {
        if let Some(store) = &self.store {
            return Ok(store.clone());
        }
        let repo_root = git::repo_root(repo_path)
            .map_err(|_| TaskError::NotARepository(repo_path.display().to_string()))?;
        Ok(Arc::new(GitHubContents::from_repo(&repo_root, TASK_BRANCH)?))
    }

    fn task_path(&self, task_id: &str) -> String {
        format!("{}/{task_id}.json", self.issues_dir)
    }

    fn read_task(
        &self,
        store: &dyn ContentsStore,
        task_id: &str,
    ) -> Result<Option<(Task, String)>, TaskError> {
        match store.read_file(&self.task_path(task_id))? {
            Some(file) => {
                let task: Task = serde_json::from_str(&file.content)?;
                Ok(Some((task, file.sha)))
            }
            None => Ok(None),
        }
    }

    fn require_task(
        &self,
        store: &dyn ContentsStore,
        task_id: &str,
    ) -> Result<(Task, String), TaskError> {
        self.read_task(store, task_id)?
            .ok_or_else(|| TaskError::NotFound(task_id.to_string()))
    }

    fn write_task(
        &self,
        store: &dyn ContentsStore,
        task: &Task,
        sha: Option<&str>,
    ) -> Result<(), TaskError> {
        let data = serde_json::to_string_pretty(task)?;
        let message = if sha.is_some() {
            format!("Update task {}", task.id)
        } else {
            format!("Create task {}", task.id)
        };
        store.write_file(&self.task_path(&task.id), &data, &message, sha)
    }

    /// Every parseable task in the store. Unreadable files are skipped
    /// with a warning.
    fn load_tasks(&self, store: &dyn ContentsStore) -> Result<Vec<Task>, TaskError> {
        store.ensure_branch()?;
        let mut tasks = Vec::new();
        for name in store.list_files(&self.issues_dir)? {
            let Some(id) = name.strip_suffix(".json") else {
                continue;
            };
            match self.read_task(store, id) {
                Ok(Some((task, _))) => tasks.push(task),
                Ok(None) => {}
                Err(err) => tracing::warn!("skipping unreadable task {name}: {err}"),
            }
        }
        Ok(tasks)
    }

    pub fn create_task(
        &self,
        repo_path: &Path,
        title: &str,
        description: &str,
        task_type: &str,
        priority: &str,
        tags: Vec<String>,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) -> Result<TaskResult, TaskError> {
        if title.is_empty() {
            return Err(TaskError::InvalidInput("title is required".to_string()));
        }

        let store = self.contents_for(repo_path)?;
        let tasks = self.load_tasks(store.as_ref())?;

        let now = Utc::now();
        let task = Task {
            id: next_task_id(&tasks),
            title: title.to_string(),
            description: description.to_string(),
            task_type: normalize(task_type, VALID_TYPES, "feature"),
            priority: normalize(priority, VALID_PRIORITIES, "medium"),
            state: "pending".to_string(),
            assignee: None,
            tags,
            blocks: Vec::new(),
            blocked_by: Vec::new(),
            comments: Vec::new(),
            metadata,
            workflow_state: HashMap::new(),
            created_at: now,
            updated_at: now,
            completed_at: None,
        };

        self.write_task(store.as_ref(), &task, None)?;

        Ok(TaskResult {
            message: format!("Created task {}: {}", task.id, task.title),
            task,
        })
    }

    pub fn get_task(&self, repo_path: &Path, task_id: &str) -> Result<Task, TaskError> {
        let store = self.contents_for(repo_path)?;
        let (task, _) = self.require_task(store.as_ref(), task_id)?;
        Ok(task)
    }

    /// Tasks matching the filter, priority-descending then oldest-first.
    pub fn list_tasks(
        &self,
        repo_path: &Path,
        filter: &TaskFilter,
    ) -> Result<Vec<Task>, TaskError> {
        let store = self.contents_for(repo_path)?;
        let mut tasks: Vec<Task> = self
            .load_tasks(store.as_ref())?
            .into_iter()
            .filter(|task| filter.matches(task))
            .collect();
        sort_by_priority(&mut tasks);
        Ok(tasks)
    }

    pub fn update_task(
        &self,
        repo_path: &Path,
        task_id: &str,
        update: &TaskUpdate,
    ) -> Result<TaskResult, TaskError> {
        let store = self.contents_for(repo_path)?;
        let (mut task, sha) = self.require_task(store.as_ref(), task_id)?;

        if let Some(title) = update.title.as_deref().filter(|t| !t.is_empty()) {
            task.title = title.to_string();
        }
        if let Some(description) = &update.description {
            task.description = description.clone();
        }
        if let Some(task_type) = update.task_type.as_deref().filter(|t| !t.is_empty()) {
            task.task_type = task_type.to_string();
        }
        if let Some(priority) = update.priority.as_deref().filter(|p| !p.is_empty()) {
            task.priority = priority.to_string();
        }
        if let Some(state) = update.state.as_deref().filter(|s| !s.is_empty()) {
            task.state = state.to_string();
            if state == "completed" {
                task.completed_at = Some(Utc::now());
            }
        }
        if let Some(assignee) = &update.assignee {
            task.assignee = Some(assignee.clone());
        }
        if let Some(tags) = &update.tags {
            task.tags = tags.clone();
        }

        task.updated_at = Utc::now();
        self.write_task(store.as_ref(), &task, Some(&sha))?;

        Ok(TaskResult {
            message: format!("Updated task {task_id}"),
            task,
        })
    }

    /// Delete a task, scrubbing it from every other task's dependency
    /// lists first so a failure mid-way leaves at most the target stale.
    pub fn delete_task(
        &self,
        repo_path: &Path,
        task_id: &str,
    ) -> Result<DeleteTaskResult, TaskError> {
        let store = self.contents_for(repo_path)?;
        let (target, target_sha) = self.require_task(store.as_ref(), task_id)?;

        let all_tasks = self.load_tasks(store.as_ref())?;
        let mut cleaned = 0;
        for task in all_tasks {
            if task.id == task_id {
                continue;
            }
            if !task.blocks.contains(&task_id.to_string())
                && !task.blocked_by.contains(&task_id.to_string())
            {
                continue;
            }

            // Re-read for the current blob id, then rewrite without the
            // deleted task.
            let (mut fresh, sha) = self.require_task(store.as_ref(), &task.id)?;
            fresh.blocks.retain(|id| id != task_id);
            fresh.blocked_by.retain(|id| id != task_id);
            fresh.updated_at = Utc::now();
            self.write_task(store.as_ref(), &fresh, Some(&sha))?;
            cleaned += 1;
        }

        store.delete_file(
            &self.task_path(task_id),
            &format!("Delete task {task_id}"),
            &target_sha,
        )?;

        Ok(DeleteTaskResult {
            task_id: task_id.to_string(),
            title: target.title,
            message: format!(
                "Deleted task {task_id} and cleaned up {cleaned} dependent task(s)"
            ),
            dependencies_cleaned_up: cleaned,
        })
    }

    /// Record that `task_id` blocks `blocks_task_id`. Idempotent: both
    /// sides are appended only when absent.
    pub fn add_dependency(
        &self,
        repo_path: &Path,
        task_id: &str,
        blocks_task_id: &str,
    ) -> Result<String, TaskError> {
        let store = self.contents_for(repo_path)?;
        let (mut blocker, blocker_sha) = self.require_task(store.as_ref(), task_id)?;
        let (mut blocked, blocked_sha) = self.require_task(store.as_ref(), blocks_task_id)?;

        if !blocker.blocks.contains(&blocks_task_id.to_string()) {
            blocker.blocks.push(blocks_task_id.to_string());
        }
        if !blocked.blocked_by.contains(&task_id.to_string()) {
            blocked.blocked_by.push(task_id.to_string());
        }

        let now = Utc::now();
        blocker.updated_at = now;
        blocked.updated_at = now;

        self.write_task(store.as_ref(), &blocker, Some(&blocker_sha))?;
        self.write_task(store.as_ref(), &blocked, Some(&blocked_sha))?;

        Ok(format!("Task {task_id} now blocks {blocks_task_id}"))
    }

    pub fn add_comment(
        &self,
        repo_path: &Path,
        task_id: &str,
        author: &str,
        text: &str,
    ) -> Result<CommentResult, TaskError> {
        let store = self.contents_for(repo_path)?;
        let (mut task, sha) = self.require_task(store.as_ref(), task_id)?;

        let comment = Comment {
            id: format!("comment-{}", task.comments.len() + 1),
            author: author.to_string(),
            text: text.to_string(),
            created_at: Utc::now(),
        };
        task.comments.push(comment.clone());
        task.updated_at = Utc::now();

        self.write_task(store.as_ref(), &task, Some(&sha))?;

        Ok(CommentResult {
            comment,
            message: format!("Added comment to task {task_id}"),
        })
    }

    /// Pending tasks with nothing blocking them, priority-descending then
    /// oldest-first.
    pub fn get_ready_tasks(&self, repo_path: &Path) -> Result<Vec<Task>, TaskError> {
        let store = self.contents_for(repo_path)?;
        let mut ready: Vec<Task> = self
            .load_tasks(store.as_ref())?
            .into_iter()
            .filter(|task| task.state == "pending" && task.blocked_by.is_empty())
            .collect();
        sort_by_priority(&mut ready);
        Ok(ready)
    }

    /// Merge key-value pairs into a task's workflow state. Non-string
    /// values are stringified.
    pub fn set_workflow_state(
        &self,
        repo_path: &Path,
        task_id: &str,
        entries: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<WorkflowStateResult, TaskError> {
        let store = self.contents_for(repo_path)?;
        let (mut task, sha) = self.require_task(store.as_ref(), task_id)?;

        for (key, value) in entries {
            task.workflow_state
                .insert(key.clone(), value_to_string(value));
        }
        task.updated_at = Utc::now();

        self.write_task(store.as_ref(), &task, Some(&sha))?;

        Ok(WorkflowStateResult {
            task_id: task_id.to_string(),
            workflow_state: task.workflow_state,
            message: Some(format!("Updated workflow state for task {task_id}")),
        })
    }

    pub fn get_workflow_state(
        &self,
        repo_path: &Path,
        task_id: &str,
    ) -> Result<WorkflowStateResult, TaskError> {
        let store = self.contents_for(repo_path)?;
        let (task, _) = self.require_task(store.as_ref(), task_id)?;

        Ok(WorkflowStateResult {
            task_id: task_id.to_string(),
            workflow_state: task.workflow_state,
            message: None,
        })
    }

    pub fn delete_workflow_state_key(
        &self,
        repo_path: &Path,
        task_id: &str,
        key: &str,
    ) -> Result<WorkflowStateResult, TaskError> {
        let store = self.contents_for(repo_path)?;
        let (mut task, sha) = self.require_task(store.as_ref(), task_id)?;

        task.workflow_state.remove(key);
        task.updated_at = Utc::now();

        self.write_task(store.as_ref(), &task, Some(&sha))?;

        Ok(WorkflowStateResult {
            task_id: task_id.to_string(),
            workflow_state: task.workflow_state,
            message: Some(format!(
                "Deleted key '{key}' from task {task_id} workflow state"
            )),
        })
    }
}

impl Default for TaskManager {
    fn default() -> Self {
        Self::new()
    }
}

fn next_task_id(tasks: &[Task]) -> String {
    let max = tasks
        .iter()
        .filter_map(|task| task.id.strip_prefix("task-")?.parse::<u64>().ok())
        .max()
        .unwrap_or(0);
    format!("task-{}", max + 1)
}

fn normalize(value: &str, valid: &[&str], default: &str) -> String {
    if valid.contains(&value) {
        value.to_string()
    } else {
        default.to_string()
    }
}

fn priority_score(priority: &str) -> u8 {
    match priority {
        "high" => 3,
        "medium" => 2,
        "low" => 1,
        _ => 0,
    }
}

fn sort_by_priority(tasks: &mut [Task]) {
    tasks.sort_by(|a, b| {
        priority_score(&b.priority)
            .cmp(&priority_score(&a.priority))
            .then_with(|| a.created_at.cmp(&b.created_at))
    });
}

fn value_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// In-memory [`ContentsStore`]: path -> (content, revision).
    #[derive(Default)]
    pub struct MemoryStore {
        files: Mutex<HashMap<String, (String, u64)>>,
    }

    impl ContentsStore for MemoryStore {
        fn ensure_branch(&self) -> Result<(), TaskError> {
            Ok(())
        }

        fn list_files(&self, dir: &str) -> Result<Vec<String>, TaskError> {
            let prefix = format!("{dir}/");
            Ok(self
                .files
                .lock()
                .keys()
                .filter_map(|path| path.strip_prefix(&prefix))
                .filter(|rest| !rest.contains('/'))
                .map(String::from)
                .collect())
        }

        fn read_file(&self, path: &str) -> Result<Option<FileContent>, TaskError> {
            Ok(self.files.lock().get(path).map(|(content, rev)| FileContent {
                content: content.clone(),
                sha: rev.to_string(),
            }))
        }

        fn write_file(
            &self,
            path: &str,
            content: &str,
            _message: &str,
            _sha: Option<&str>,
        ) -> Result<(), TaskError> {
            let mut files = self.files.lock();
            let rev = files.get(path).map(|(_, rev)| rev + 1).unwrap_or(1);
            files.insert(path.to_string(), (content.to_string(), rev));
            Ok(())
        }

        fn delete_file(&self, path: &str, _message: &str, _sha: &str) -> Result<(), TaskError> {
            self.files
                .lock()
                .remove(path)
                .map(|_| ())
                .ok_or_else(|| TaskError::NotFound(path.to_string()))
        }
    }

    fn manager() -> (TaskManager, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::default());
        (TaskManager::with_store(store.clone()), store)
    }

    fn repo() -> &'static Path {
        Path::new("/repo")
    }

    #[test]
    fn test_create_assigns_monotonic_ids() {
        let (manager, _) = manager();

        let first = manager
            .create_task(repo(), "A", "first", "", "", vec![], Default::default())
            .unwrap();
        let second = manager
            .create_task(repo(), "B", "second", "bug", "high", vec![], Default::default())
            .unwrap();

        assert_eq!(first.task.id, "task-1");
        assert_eq!(second.task.id, "task-2");
        assert_eq!(first.task.state, "pending");
        assert!(first.task.blocks.is_empty());
        assert!(first.task.blocked_by.is_empty());
    }

    #[test]
    fn test_create_normalizes_type_and_priority() {
        let (manager, _) = manager();

        let task = manager
            .create_task(repo(), "A", "", "bogus", "urgent", vec![], Default::default())
            .unwrap()
            .task;
        assert_eq!(task.task_type, "feature");
        assert_eq!(task.priority, "medium");

        let task = manager
            .create_task(repo(), "B", "", "bug", "high", vec![], Default::default())
            .unwrap()
            .task;
        assert_eq!(task.task_type, "bug");
        assert_eq!(task.priority, "high");
    }

    #[test]
    fn test_create_requires_title() {
        let (manager, _) = manager();
        let result = manager.create_task(repo(), "", "", "", "", vec![], Default::default());
        assert!(matches!(result, Err(TaskError::InvalidInput(_))));
    }

    #[test]
    fn test_task_file_round_trips() {
        let (manager, store) = manager();
        manager
            .create_task(
                repo(),
                "A",
                "desc",
                "bug",
                "high",
                vec!["backend".into()],
                Default::default(),
            )
            .unwrap();

        let file = store.read_file(".bob/issues/task-1.json").unwrap().unwrap();
        let parsed: Task = serde_json::from_str(&file.content).unwrap();
        assert_eq!(parsed.id, "task-1");
        assert_eq!(parsed.tags, vec!["backend"]);

        let fetched = manager.get_task(repo(), "task-1").unwrap();
        assert_eq!(fetched.title, "A");
    }

    #[test]
    fn test_get_missing_task() {
        let (manager, _) = manager();
        assert!(matches!(
            manager.get_task(repo(), "task-9"),
            Err(TaskError::NotFound(_))
        ));
    }

    #[test]
    fn test_list_filters_and_sorts() {
        let (manager, _) = manager();
        manager
            .create_task(repo(), "low", "", "chore", "low", vec!["x".into()], Default::default())
            .unwrap();
        manager
            .create_task(repo(), "high", "", "bug", "high", vec![], Default::default())
            .unwrap();
        manager
            .create_task(repo(), "med", "", "bug", "medium", vec!["x".into()], Default::default())
            .unwrap();

        let all = manager.list_tasks(repo(), &TaskFilter::default()).unwrap();
        assert_eq!(
            all.iter().map(|t| t.title.as_str()).collect::<Vec<_>>(),
            vec!["high", "med", "low"]
        );

        let bugs = manager
            .list_tasks(
                repo(),
                &TaskFilter {
                    task_type: Some("bug".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(bugs.len(), 2);

        let tagged = manager
            .list_tasks(
                repo(),
                &TaskFilter {
                    tags: vec!["x".into()],
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(tagged.len(), 2);
    }

    #[test]
    fn test_update_fields_and_completion_stamp() {
        let (manager, _) = manager();
        manager
            .create_task(repo(), "A", "", "", "", vec![], Default::default())
            .unwrap();

        let updated = manager
            .update_task(
                repo(),
                "task-1",
                &TaskUpdate {
                    state: Some("in_progress".into()),
                    assignee: Some("agent-7".into()),
                    ..Default::default()
                },
            )
            .unwrap()
            .task;
        assert_eq!(updated.state, "in_progress");
        assert_eq!(updated.assignee.as_deref(), Some("agent-7"));
        assert!(updated.completed_at.is_none());

        let completed = manager
            .update_task(
                repo(),
                "task-1",
                &TaskUpdate {
                    state: Some("completed".into()),
                    ..Default::default()
                },
            )
            .unwrap()
            .task;
        assert!(completed.completed_at.is_some());
    }

    #[test]
    fn test_add_dependency_is_symmetric_and_idempotent() {
        let (manager, _) = manager();
        manager
            .create_task(repo(), "A", "", "", "", vec![], Default::default())
            .unwrap();
        manager
            .create_task(repo(), "B", "", "", "", vec![], Default::default())
            .unwrap();

        manager.add_dependency(repo(), "task-1", "task-2").unwrap();
        manager.add_dependency(repo(), "task-1", "task-2").unwrap();

        let blocker = manager.get_task(repo(), "task-1").unwrap();
        let blocked = manager.get_task(repo(), "task-2").unwrap();
        assert_eq!(blocker.blocks, vec!["task-2"]);
        assert_eq!(blocked.blocked_by, vec!["task-1"]);
    }

    #[test]
    fn test_add_dependency_missing_task() {
        let (manager, _) = manager();
        manager
            .create_task(repo(), "A", "", "", "", vec![], Default::default())
            .unwrap();
        assert!(matches!(
            manager.add_dependency(repo(), "task-1", "task-9"),
            Err(TaskError::NotFound(_))
        ));
    }

    #[test]
    fn test_delete_scrubs_back_references() {
        let (manager, store) = manager();
        manager
            .create_task(repo(), "A", "", "", "", vec![], Default::default())
            .unwrap();
        manager
            .create_task(repo(), "B", "", "", "", vec![], Default::default())
            .unwrap();
        manager.add_dependency(repo(), "task-1", "task-2").unwrap();

        let result = manager.delete_task(repo(), "task-1").unwrap();
        assert_eq!(result.dependencies_cleaned_up, 1);

        let survivor = manager.get_task(repo(), "task-2").unwrap();
        assert!(survivor.blocked_by.is_empty());
        assert!(survivor.blocks.is_empty());
        assert!(store.read_file(".bob/issues/task-1.json").unwrap().is_none());
    }

    #[test]
    fn test_dependency_graph_stays_symmetric() {
        let (manager, _) = manager();
        for title in ["A", "B", "C"] {
            manager
                .create_task(repo(), title, "", "", "", vec![], Default::default())
                .unwrap();
        }
        manager.add_dependency(repo(), "task-1", "task-2").unwrap();
        manager.add_dependency(repo(), "task-1", "task-3").unwrap();
        manager.add_dependency(repo(), "task-2", "task-3").unwrap();
        manager.delete_task(repo(), "task-2").unwrap();

        let tasks = manager.list_tasks(repo(), &TaskFilter::default()).unwrap();
        for task in &tasks {
            for blocked in &task.blocks {
                let other = tasks.iter().find(|t| &t.id == blocked).unwrap();
                assert!(other.blocked_by.contains(&task.id));
            }
            for blocker in &task.blocked_by {
                let other = tasks.iter().find(|t| &t.id == blocker).unwrap();
                assert!(other.blocks.contains(&task.id));
            }
        }
    }

    #[test]
    fn test_get_ready_skips_blocked_and_non_pending() {
        let (manager, _) = manager();
        manager
            .create_task(repo(), "free", "", "", "low", vec![], Default::default())
            .unwrap();
        manager
            .create_task(repo(), "blocked", "", "", "high", vec![], Default::default())
            .unwrap();
        manager
            .create_task(repo(), "started", "", "", "high", vec![], Default::default())
            .unwrap();

        manager.add_dependency(repo(), "task-1", "task-2").unwrap();
        manager
            .update_task(
                repo(),
                "task-3",
                &TaskUpdate {
                    state: Some("in_progress".into()),
                    ..Default::default()
                },
            )
            .unwrap();

        let ready = manager.get_ready_tasks(repo()).unwrap();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].title, "free");
    }

    #[test]
    fn test_comments_accumulate() {
        let (manager, _) = manager();
        manager
            .create_task(repo(), "A", "", "", "", vec![], Default::default())
            .unwrap();

        let first = manager
            .add_comment(repo(), "task-1", "alice", "first note")
            .unwrap();
        let second = manager
            .add_comment(repo(), "task-1", "", "second note")
            .unwrap();
        assert_eq!(first.comment.id, "comment-1");
        assert_eq!(second.comment.id, "comment-2");

        let task = manager.get_task(repo(), "task-1").unwrap();
        assert_eq!(task.comments.len(), 2);
        assert_eq!(task.comments[0].text, "first note");
    }

    #[test]
    fn test_workflow_state_round_trip() {
        let (manager, _) = manager();
        manager
            .create_task(repo(), "A", "", "", "", vec![], Default::default())
            .unwrap();

        let mut entries = serde_json::Map::new();
        entries.insert("workflow".into(), serde_json::json!("work"));
        entries.insert("loopCount".into(), serde_json::json!(2));
        manager.set_workflow_state(repo(), "task-1", &entries).unwrap();

        let state = manager.get_workflow_state(repo(), "task-1").unwrap();
        assert_eq!(state.workflow_state.get("workflow").unwrap(), "work");
        assert_eq!(state.workflow_state.get("loopCount").unwrap(), "2");

        let after = manager
            .delete_workflow_state_key(repo(), "task-1", "loopCount")
            .unwrap();
        assert!(!after.workflow_state.contains_key("loopCount"));
        assert!(after.workflow_state.contains_key("workflow"));
    }

    #[test]
    fn test_id_generation_survives_deletions() {
        let (manager, _) = manager();
        manager
            .create_task(repo(), "A", "", "", "", vec![], Default::default())
            .unwrap();
        manager
            .create_task(repo(), "B", "", "", "", vec![], Default::default())
            .unwrap();
        manager.delete_task(repo(), "task-1").unwrap();

        let third = manager
            .create_task(repo(), "C", "", "", "", vec![], Default::default())
            .unwrap();
        assert_eq!(third.task.id, "task-3");
    }
}
