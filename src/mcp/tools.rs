//! Tool surface.
//!
//! Declares the MCP tools and routes calls into the state machine and the
//! task manager. Argument validation happens here: required fields must
//! be present with the declared type, unknown fields are ignored, and
//! arrays are coerced by dropping elements of the wrong type. Every
//! failure becomes a tool-error result, never a transport error.

use std::path::PathBuf;

use serde_json::{json, Map, Value};

use super::protocol::{CallToolResult, ToolDefinition};
use crate::state::machine::StateManager;
use crate::tasks::{TaskFilter, TaskManager, TaskUpdate};
use crate::workflow;

type ToolOutcome = Result<Value, String>;

/// Routes tool calls to the orchestration core.
pub struct Dispatcher {
    state: StateManager,
    tasks: TaskManager,
}

impl Dispatcher {
    pub fn new(state: StateManager, tasks: TaskManager) -> Self {
        Self { state, tasks }
    }

    /// The advertised tool list.
    pub fn tools(&self) -> Vec<ToolDefinition> {
        tool_definitions()
    }

    /// Invoke a tool by name. The result is always a single JSON-encoded
    /// text content block.
    pub fn call(&self, name: &str, args: &Map<String, Value>) -> CallToolResult {
        let outcome = match name {
            "workflow_list_workflows" => self.list_workflows(args),
            "workflow_get_definition" => self.get_definition(args),
            "workflow_register" => self.register(args),
            "workflow_report_progress" => self.report_progress(args),
            "workflow_get_guidance" => self.get_guidance(args),
            "workflow_record_issues" => self.record_issues(args),
            "workflow_get_status" => self.get_status(args),
            "workflow_list_agents" => self.list_agents(args),
            "workflow_get_session_status" => self.get_session_status(args),
            "task_create" => self.task_create(args),
            "task_get" => self.task_get(args),
            "task_list" => self.task_list(args),
            "task_update" => self.task_update(args),
            "task_add_dependency" => self.task_add_dependency(args),
            "task_add_comment" => self.task_add_comment(args),
            "task_get_ready" => self.task_get_ready(args),
            "task_set_workflow_state" => self.task_set_workflow_state(args),
            "task_get_workflow_state" => self.task_get_workflow_state(args),
            "task_delete_workflow_state_key" => self.task_delete_workflow_state_key(args),
            other => Err(format!("unknown tool: {other}")),
        };

        match outcome {
            Ok(value) => match serde_json::to_string(&value) {
                Ok(text) => CallToolResult::text(text),
                Err(err) => CallToolResult::error(format!("failed to encode result: {err}")),
            },
            Err(message) => CallToolResult::error(message),
        }
    }

    // Workflow tools

    fn list_workflows(&self, args: &Map<String, Value>) -> ToolOutcome {
        let repo_path = opt_path(args, "repoPath")?;
        let workflows = workflow::list_workflows(repo_path.as_deref());
        Ok(json!({ "workflows": workflows }))
    }

    fn get_definition(&self, args: &Map<String, Value>) -> ToolOutcome {
        let keyword = require_str(args, "workflow")?;
        let repo_path = opt_path(args, "repoPath")?;
        let def = workflow::get_definition(keyword, repo_path.as_deref())
            .map_err(|err| err.to_string())?;
        serde_json::to_value(&def).map_err(|err| err.to_string())
    }

    fn register(&self, args: &Map<String, Value>) -> ToolOutcome {
        let keyword = require_str(args, "workflow")?;
        let worktree_path = require_path(args, "worktreePath")?;
        let result = self
            .state
            .register(
                keyword,
                &worktree_path,
                opt_str(args, "taskDescription"),
                opt_str(args, "featureName"),
                opt_str(args, "sessionID"),
                opt_str(args, "agentID"),
            )
            .map_err(|err| err.to_string())?;
        serde_json::to_value(&result).map_err(|err| err.to_string())
    }

    fn report_progress(&self, args: &Map<String, Value>) -> ToolOutcome {
        let worktree_path = require_path(args, "worktreePath")?;
        let current_step = require_str(args, "currentStep")?;
        let metadata = args.get("metadata").filter(|v| v.is_object());
        let result = self
            .state
            .report_progress(
                &worktree_path,
                current_step,
                metadata,
                opt_str(args, "sessionID"),
                opt_str(args, "agentID"),
            )
            .map_err(|err| err.to_string())?;
        serde_json::to_value(&result).map_err(|err| err.to_string())
    }

    fn get_guidance(&self, args: &Map<String, Value>) -> ToolOutcome {
        let worktree_path = require_path(args, "worktreePath")?;
        let result = self
            .state
            .get_guidance(
                &worktree_path,
                opt_str(args, "sessionID"),
                opt_str(args, "agentID"),
            )
            .map_err(|err| err.to_string())?;
        serde_json::to_value(&result).map_err(|err| err.to_string())
    }

    fn record_issues(&self, args: &Map<String, Value>) -> ToolOutcome {
        require_path(args, "worktreePath")?;
        require_str(args, "currentStep")?;
        if !args.get("issues").is_some_and(Value::is_array) {
            return Err("missing required parameter 'issues'".to_string());
        }
        serde_json::to_value(self.state.record_issues()).map_err(|err| err.to_string())
    }

    fn get_status(&self, args: &Map<String, Value>) -> ToolOutcome {
        let worktree_path = require_path(args, "worktreePath")?;
        let result = self
            .state
            .get_status(
                &worktree_path,
                opt_str(args, "sessionID"),
                opt_str(args, "agentID"),
            )
            .map_err(|err| err.to_string())?;
        serde_json::to_value(&result).map_err(|err| err.to_string())
    }

    fn list_agents(&self, args: &Map<String, Value>) -> ToolOutcome {
        let worktree_path = opt_path(args, "worktreePath")?;
        let result = self.state.list_agents(worktree_path.as_deref());
        serde_json::to_value(&result).map_err(|err| err.to_string())
    }

    fn get_session_status(&self, args: &Map<String, Value>) -> ToolOutcome {
        let session_id = require_str(args, "sessionID")?;
        serde_json::to_value(self.state.get_session_status(session_id))
            .map_err(|err| err.to_string())
    }

    // Task tools

    fn task_create(&self, args: &Map<String, Value>) -> ToolOutcome {
        let repo_path = require_path(args, "repoPath")?;
        let title = require_str(args, "title")?;
        let description = require_str(args, "description")?;
        let metadata = args
            .get("metadata")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        let result = self
            .tasks
            .create_task(
                &repo_path,
                title,
                description,
                opt_str(args, "taskType"),
                opt_str(args, "priority"),
                opt_string_vec(args, "labels"),
                metadata,
            )
            .map_err(|err| err.to_string())?;

        // The new task is blocked by each listed dependency.
        let task_id = result.task.id.clone();
        let mut dependency_errors = Vec::new();
        for dependency in opt_string_vec(args, "dependencies") {
            if let Err(err) = self.tasks.add_dependency(&repo_path, &dependency, &task_id) {
                dependency_errors.push(err.to_string());
            }
        }

        let mut value = serde_json::to_value(&result).map_err(|err| err.to_string())?;
        if !dependency_errors.is_empty() {
            value["dependencyErrors"] = json!(dependency_errors);
        }
        Ok(value)
    }

    fn task_get(&self, args: &Map<String, Value>) -> ToolOutcome {
        let repo_path = require_path(args, "repoPath")?;
        let task_id = require_str(args, "taskId")?;
        let task = self
            .tasks
            .get_task(&repo_path, task_id)
            .map_err(|err| err.to_string())?;
        Ok(json!({ "task": task }))
    }

    fn task_list(&self, args: &Map<String, Value>) -> ToolOutcome {
        let repo_path = require_path(args, "repoPath")?;
        let filter = TaskFilter {
            state: opt_owned(args, "status"),
            priority: opt_owned(args, "priority"),
            task_type: opt_owned(args, "taskType"),
            assignee: opt_owned(args, "assignee"),
            tags: opt_string_vec(args, "labels"),
        };
        let tasks = self
            .tasks
            .list_tasks(&repo_path, &filter)
            .map_err(|err| err.to_string())?;
        let count = tasks.len();
        Ok(json!({ "tasks": tasks, "count": count }))
    }

    fn task_update(&self, args: &Map<String, Value>) -> ToolOutcome {
        let repo_path = require_path(args, "repoPath")?;
        let task_id = require_str(args, "taskId")?;
        let update = TaskUpdate {
            title: opt_owned(args, "title"),
            description: opt_owned(args, "description"),
            task_type: opt_owned(args, "taskType"),
            priority: opt_owned(args, "priority"),
            state: opt_owned(args, "status"),
            assignee: opt_owned(args, "assignee"),
            tags: args
                .get("labels")
                .filter(|v| v.is_array())
                .map(|_| opt_string_vec(args, "labels")),
        };
        let result = self
            .tasks
            .update_task(&repo_path, task_id, &update)
            .map_err(|err| err.to_string())?;
        serde_json::to_value(&result).map_err(|err| err.to_string())
    }

    fn task_add_dependency(&self, args: &Map<String, Value>) -> ToolOutcome {
        let repo_path = require_path(args, "repoPath")?;
        let task_id = require_str(args, "taskId")?;
        let blocks = require_str(args, "blocks")?;
        let message = self
            .tasks
            .add_dependency(&repo_path, task_id, blocks)
            .map_err(|err| err.to_string())?;
        Ok(json!({ "message": message }))
    }

    fn task_add_comment(&self, args: &Map<String, Value>) -> ToolOutcome {
        let repo_path = require_path(args, "repoPath")?;
        let task_id = require_str(args, "taskId")?;
        let comment = require_str(args, "comment")?;
        let result = self
            .tasks
            .add_comment(&repo_path, task_id, opt_str(args, "author"), comment)
            .map_err(|err| err.to_string())?;
        serde_json::to_value(&result).map_err(|err| err.to_string())
    }

    fn task_get_ready(&self, args: &Map<String, Value>) -> ToolOutcome {
        let repo_path = require_path(args, "repoPath")?;
        let tasks = self
            .tasks
            .get_ready_tasks(&repo_path)
            .map_err(|err| err.to_string())?;
        let count = tasks.len();
        Ok(json!({ "tasks": tasks, "count": count }))
    }

    fn task_set_workflow_state(&self, args: &Map<String, Value>) -> ToolOutcome {
        let repo_path = require_path(args, "repoPath")?;
        let task_id = require_str(args, "taskId")?;
        let entries = args
            .get("state")
            .and_then(Value::as_object)
            .ok_or_else(|| "missing required parameter 'state'".to_string())?;
        let result = self
            .tasks
            .set_workflow_state(&repo_path, task_id, entries)
            .map_err(|err| err.to_string())?;
        serde_json::to_value(&result).map_err(|err| err.to_string())
    }

    fn task_get_workflow_state(&self, args: &Map<String, Value>) -> ToolOutcome {
        let repo_path = require_path(args, "repoPath")?;
        let task_id = require_str(args, "taskId")?;
        let result = self
            .tasks
            .get_workflow_state(&repo_path, task_id)
            .map_err(|err| err.to_string())?;
        serde_json::to_value(&result).map_err(|err| err.to_string())
    }

    fn task_delete_workflow_state_key(&self, args: &Map<String, Value>) -> ToolOutcome {
        let repo_path = require_path(args, "repoPath")?;
        let task_id = require_str(args, "taskId")?;
        let key = require_str(args, "key")?;
        let result = self
            .tasks
            .delete_workflow_state_key(&repo_path, task_id, key)
            .map_err(|err| err.to_string())?;
        serde_json::to_value(&result).map_err(|err| err.to_string())
    }
}

// Argument extraction

fn require_str<'a>(args: &'a Map<String, Value>, key: &str) -> Result<&'a str, String> {
    match args.get(key) {
        Some(Value::String(s)) => Ok(s),
        Some(_) => Err(format!("parameter '{key}' must be a string")),
        None => Err(format!("missing required parameter '{key}'")),
    }
}

fn opt_str<'a>(args: &'a Map<String, Value>, key: &str) -> &'a str {
    args.get(key).and_then(Value::as_str).unwrap_or("")
}

fn opt_owned(args: &Map<String, Value>, key: &str) -> Option<String> {
    args.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

/// Coerce a JSON array to strings, dropping non-conforming elements.
fn opt_string_vec(args: &Map<String, Value>, key: &str) -> Vec<String> {
    args.get(key)
        .and_then(Value::as_array)
        .map(|array| {
            array
                .iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default()
}

fn validate_path(key: &str, raw: &str) -> Result<PathBuf, String> {
    if raw.contains("..") {
        return Err(format!("parameter '{key}' must not contain '..'"));
    }
    let path = PathBuf::from(raw);
    if !path.is_absolute() {
        return Err(format!("parameter '{key}' must be an absolute path"));
    }
    Ok(path)
}

fn require_path(args: &Map<String, Value>, key: &str) -> Result<PathBuf, String> {
    validate_path(key, require_str(args, key)?)
}

fn opt_path(args: &Map<String, Value>, key: &str) -> Result<Option<PathBuf>, String> {
    match args.get(key).and_then(Value::as_str) {
        Some(raw) if !raw.is_empty() => validate_path(key, raw).map(Some),
        _ => Ok(None),
    }
}

// Tool declarations

fn string_prop(description: &str) -> Value {
    json!({ "type": "string", "description": description })
}

fn string_array_prop(description: &str) -> Value {
    json!({ "type": "array", "items": { "type": "string" }, "description": description })
}

fn object_prop(description: &str) -> Value {
    json!({ "type": "object", "description": description })
}

fn tool(name: &str, description: &str, properties: Value, required: &[&str]) -> ToolDefinition {
    ToolDefinition {
        name: name.to_string(),
        description: description.to_string(),
        input_schema: json!({
            "type": "object",
            "properties": properties,
            "required": required,
        }),
    }
}

fn tool_definitions() -> Vec<ToolDefinition> {
    vec![
        tool(
            "workflow_list_workflows",
            "List all available workflow types (keywords), embedded plus any custom \
             definitions under .bob/workflows/ when repoPath is given.",
            json!({
                "repoPath": string_prop("Optional: repository path to check for custom workflows"),
            }),
            &[],
        ),
        tool(
            "workflow_get_definition",
            "Get the full definition of a workflow by keyword (e.g. 'work').",
            json!({
                "workflow": string_prop("Workflow keyword (e.g. 'work', 'code-review')"),
                "repoPath": string_prop("Optional: repository path to check for custom workflows"),
            }),
            &["workflow"],
        ),
        tool(
            "workflow_register",
            "Register a workflow instance in a git worktree. From a main checkout, pass \
             featureName to auto-create an isolated worktree.",
            json!({
                "workflow": string_prop("Workflow keyword"),
                "worktreePath": string_prop("Absolute path to the worktree (or main checkout)"),
                "taskDescription": string_prop("Optional: description of the task"),
                "featureName": string_prop("Optional: feature name for worktree auto-creation"),
                "sessionID": string_prop("Optional: session identifier"),
                "agentID": string_prop("Optional: agent identifier"),
            }),
            &["workflow", "worktreePath"],
        ),
        tool(
            "workflow_report_progress",
            "Report progress on a step. Reporting the current step is a checkpoint query: \
             checkpoint phases classify bots/<step>.md and route accordingly, other phases \
             advance.",
            json!({
                "worktreePath": string_prop("Absolute path to the worktree"),
                "currentStep": string_prop("Name of the step being reported"),
                "metadata": object_prop("Optional: key-value metadata"),
                "sessionID": string_prop("Optional: session identifier"),
                "agentID": string_prop("Optional: agent identifier"),
            }),
            &["worktreePath", "currentStep"],
        ),
        tool(
            "workflow_get_guidance",
            "Get the guidance prompt for the current step, including project additions and \
             findings carried over from checkpoint loops.",
            json!({
                "worktreePath": string_prop("Absolute path to the worktree"),
                "sessionID": string_prop("Optional: session identifier"),
                "agentID": string_prop("Optional: agent identifier"),
            }),
            &["worktreePath"],
        ),
        tool(
            "workflow_record_issues",
            "Deprecated no-op. Write findings to bots/<step>.md instead.",
            json!({
                "worktreePath": string_prop("Absolute path to the worktree"),
                "currentStep": string_prop("Step where issues were found"),
                "issues": json!({ "type": "array", "description": "Issue objects" }),
            }),
            &["worktreePath", "currentStep", "issues"],
        ),
        tool(
            "workflow_get_status",
            "Get current workflow status for a worktree.",
            json!({
                "worktreePath": string_prop("Absolute path to the worktree"),
                "sessionID": string_prop("Optional: session identifier"),
                "agentID": string_prop("Optional: agent identifier"),
            }),
            &["worktreePath"],
        ),
        tool(
            "workflow_list_agents",
            "List registered workflow instances, optionally filtered by worktree.",
            json!({
                "worktreePath": string_prop("Optional: filter to one worktree"),
            }),
            &[],
        ),
        tool(
            "workflow_get_session_status",
            "Deprecated: session tracking was removed. Use workflow_list_agents.",
            json!({
                "sessionID": string_prop("Session identifier"),
            }),
            &["sessionID"],
        ),
        tool(
            "task_create",
            "Create a task under .bob/issues/ on the bob branch.",
            json!({
                "repoPath": string_prop("Repository path"),
                "title": string_prop("Task title"),
                "description": string_prop("Task description"),
                "taskType": string_prop("Type: feature, bug, chore, refactor, docs, test"),
                "priority": string_prop("Priority: high, medium, low"),
                "labels": string_array_prop("Tags for the task"),
                "dependencies": string_array_prop("Task ids this task depends on"),
                "metadata": object_prop("Optional: arbitrary metadata"),
            }),
            &["repoPath", "title", "description"],
        ),
        tool(
            "task_get",
            "Get a task by id.",
            json!({
                "repoPath": string_prop("Repository path"),
                "taskId": string_prop("Task id (e.g. 'task-1')"),
            }),
            &["repoPath", "taskId"],
        ),
        tool(
            "task_list",
            "List tasks with optional filters, sorted by priority then age.",
            json!({
                "repoPath": string_prop("Repository path"),
                "status": string_prop("Filter: pending, in_progress, blocked, completed, cancelled"),
                "priority": string_prop("Filter: high, medium, low"),
                "taskType": string_prop("Filter: feature, bug, chore, refactor, docs, test"),
                "assignee": string_prop("Filter by assignee"),
                "labels": string_array_prop("Filter: tasks sharing at least one tag"),
            }),
            &["repoPath"],
        ),
        tool(
            "task_update",
            "Update task fields. Setting status to 'completed' stamps completedAt.",
            json!({
                "repoPath": string_prop("Repository path"),
                "taskId": string_prop("Task id"),
                "title": string_prop("New title"),
                "description": string_prop("New description"),
                "taskType": string_prop("New type"),
                "priority": string_prop("New priority"),
                "status": string_prop("New state"),
                "assignee": string_prop("New assignee"),
                "labels": string_array_prop("Replacement tag list"),
            }),
            &["repoPath", "taskId"],
        ),
        tool(
            "task_add_dependency",
            "Record that one task blocks another. Both records are updated.",
            json!({
                "repoPath": string_prop("Repository path"),
                "taskId": string_prop("Task id doing the blocking"),
                "blocks": string_prop("Task id that is blocked"),
            }),
            &["repoPath", "taskId", "blocks"],
        ),
        tool(
            "task_add_comment",
            "Add a comment to a task.",
            json!({
                "repoPath": string_prop("Repository path"),
                "taskId": string_prop("Task id"),
                "comment": string_prop("Comment text"),
                "author": string_prop("Optional: author name"),
            }),
            &["repoPath", "taskId", "comment"],
        ),
        tool(
            "task_get_ready",
            "Get pending tasks with no blockers, sorted by priority then age.",
            json!({
                "repoPath": string_prop("Repository path"),
            }),
            &["repoPath"],
        ),
        tool(
            "task_set_workflow_state",
            "Merge key-value pairs into a task's workflow state.",
            json!({
                "repoPath": string_prop("Repository path"),
                "taskId": string_prop("Task id"),
                "state": object_prop("Key-value pairs to set"),
            }),
            &["repoPath", "taskId", "state"],
        ),
        tool(
            "task_get_workflow_state",
            "Get a task's workflow state.",
            json!({
                "repoPath": string_prop("Repository path"),
                "taskId": string_prop("Task id"),
            }),
            &["repoPath", "taskId"],
        ),
        tool(
            "task_delete_workflow_state_key",
            "Delete one key from a task's workflow state.",
            json!({
                "repoPath": string_prop("Repository path"),
                "taskId": string_prop("Task id"),
                "key": string_prop("State key to delete"),
            }),
            &["repoPath", "taskId", "key"],
        ),
    ]
}
