//! Workflow state machine.
//!
//! The orchestration core: registers workflow instances (creating
//! worktrees when asked to start from a main checkout), routes progress
//! reports, and assembles step guidance. Routing is driven entirely by
//! artifacts the agent leaves on disk:
//!
//! - a report naming a *different* step is a transition the agent already
//!   made and is recorded as-is;
//! - a report naming the *current* step is a checkpoint query. Checkpoint
//!   phases read the step artifact and classify it, looping back when it
//!   describes issues; every other phase simply advances.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::ai::{Classifier, ClaudeClassifier};
use crate::git::{self, worktree, GitError};
use crate::workflow::{self, additions::CacheRegistry, findings, guidance, prompts, WorkflowError};

use super::{worktree_to_id, StateError, StateStore, WorkflowState};

/// Steps whose same-step report triggers artifact classification.
const CHECKPOINT_PHASES: &[&str] = &["REVIEW", "TEST", "MONITOR", "PROMPT"];

fn is_checkpoint_phase(step: &str) -> bool {
    CHECKPOINT_PHASES.contains(&step)
}

/// Error type for state machine operations.
#[derive(Debug, thiserror::Error)]
pub enum MachineError {
    #[error("workflow not found (did you register it first?)")]
    NotRegistered,

    #[error("workflow already registered for this worktree")]
    AlreadyRegistered,

    #[error(
        "cannot register a workflow on the main repository without a feature name; \
         provide featureName to auto-create a worktree, or use an existing worktree path"
    )]
    MainWithoutFeatureName,

    #[error("workflow '{0}' has no steps defined")]
    NoSteps(String),

    #[error("invalid step '{step}' for workflow '{workflow}'")]
    InvalidStep { step: String, workflow: String },

    #[error(
        "findings file not found for checkpoint step {step}; \
         agents must write findings before reporting progress (expected file: {file})"
    )]
    MissingFindings { step: String, file: String },

    #[error("failed to read findings file: {0}")]
    FindingsIo(std::io::Error),

    #[error("failed to create worktree: {0}")]
    WorktreeCreate(#[source] GitError),

    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error(transparent)]
    Prompt(#[from] prompts::PromptNotFound),

    #[error(transparent)]
    State(#[from] StateError),
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResult {
    pub workflow_id: String,
    pub workflow: String,
    pub current_step: String,
    pub steps: Vec<workflow::Step>,
    pub registered_at: DateTime<Utc>,
    pub worktree_path: PathBuf,
    pub created_worktree: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressResult {
    pub recorded: bool,
    pub current_step: String,
    pub previous_step: String,
    pub loop_count: u32,
    pub timestamp: DateTime<Utc>,
    pub auto_routed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GuidanceResult {
    pub current_step: String,
    pub prompt: String,
    pub can_loop_back: Vec<String>,
    pub loop_count: u32,
}

/// Complete status for one instance. The trailing fields are read-only
/// legacy surfaces from the richer schema and are always empty.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResult {
    pub workflow_id: String,
    pub workflow: String,
    pub worktree_path: PathBuf,
    pub current_step: String,
    pub task_description: String,
    pub loop_count: u32,
    pub progress_history: Vec<serde_json::Value>,
    pub updated_at: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSummary {
    pub workflow_id: String,
    pub workflow: String,
    pub worktree_path: PathBuf,
    pub current_step: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentsResult {
    pub agents: Vec<AgentSummary>,
    pub count: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RejoinResult {
    pub rejoined: bool,
    pub workflow_id: String,
    pub from_step: String,
    pub current_step: String,
    /// Accepted for compatibility; the minimal schema has no history to
    /// truncate.
    pub reset_subsequent: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetResult {
    pub reset: bool,
    pub workflow_id: String,
    pub archived: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordIssuesResult {
    pub recorded: bool,
    pub issue_count: usize,
    pub should_loop: bool,
    pub loop_back_to: String,
    pub total_issues: usize,
    pub deprecated: bool,
    pub warning: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatusResult {
    pub session_id: String,
    pub agent_count: usize,
    pub agents: Vec<serde_json::Value>,
    pub deprecated: String,
}

/// Drives workflow instances through their phases.
pub struct StateManager {
    store: StateStore,
    additions: CacheRegistry,
    classifier: Box<dyn Classifier>,
}

impl StateManager {
    pub fn new() -> Self {
        Self::with_store(StateStore::new())
    }

    /// Build against an explicit store (tests point this at a temp dir).
    pub fn with_store(store: StateStore) -> Self {
        Self {
            store,
            additions: CacheRegistry::new(),
            classifier: Box::new(ClaudeClassifier::from_env()),
        }
    }

    /// Replace the findings classifier.
    pub fn with_classifier(mut self, classifier: Box<dyn Classifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Register a new workflow instance for a worktree.
    ///
    /// When `worktree_path` is a main checkout and a feature name is
    /// given, an isolated worktree is created first and the instance is
    /// bound to it; a main checkout without a feature name is an error.
    pub fn register(
        &self,
        workflow: &str,
        worktree_path: &Path,
        _task_description: &str,
        feature_name: &str,
        session_id: &str,
        agent_id: &str,
    ) -> Result<RegisterResult, MachineError> {
        let (is_main, repo_root) = worktree::is_main_repo(worktree_path)?;

        let mut created_worktree = false;
        let mut branch = None;
        let mut actual_path = worktree_path.to_path_buf();

        if is_main {
            if feature_name.is_empty() {
                return Err(MachineError::MainWithoutFeatureName);
            }
            let (path, branch_name) = worktree::create_worktree(&repo_root, feature_name)
                .map_err(MachineError::WorktreeCreate)?;
            actual_path = path;
            branch = Some(branch_name);
            created_worktree = true;
        }

        let workflow_id = worktree_to_id(&actual_path, session_id, agent_id);
        if self.store.exists(&workflow_id) {
            return Err(MachineError::AlreadyRegistered);
        }

        let def = workflow::get_definition(workflow, Some(&actual_path))?;
        let Some(first_step) = def.steps.first() else {
            return Err(MachineError::NoSteps(workflow.to_string()));
        };

        let state = WorkflowState {
            workflow_id: workflow_id.clone(),
            workflow: workflow.to_string(),
            worktree_path: actual_path.clone(),
            current_step: first_step.name.clone(),
        };
        self.store.save(&state)?;

        let message = branch.as_ref().map(|b| {
            format!(
                "Created worktree at: {path}\nBranch: {b}\nRun: cd {path}",
                path = actual_path.display()
            )
        });

        Ok(RegisterResult {
            workflow_id,
            workflow: workflow.to_string(),
            current_step: state.current_step,
            steps: def.steps,
            registered_at: Utc::now(),
            worktree_path: actual_path,
            created_worktree,
            branch,
            message,
            session_id: (!session_id.is_empty()).then(|| session_id.to_string()),
            agent_id: (!agent_id.is_empty()).then(|| agent_id.to_string()),
        })
    }

    /// Record progress and resolve the next step.
    pub fn report_progress(
        &self,
        worktree_path: &Path,
        reported_step: &str,
        _metadata: Option<&serde_json::Value>,
        session_id: &str,
        agent_id: &str,
    ) -> Result<ProgressResult, MachineError> {
        let workflow_id = worktree_to_id(worktree_path, session_id, agent_id);
        let mut state = self
            .store
            .load(&workflow_id)
            .map_err(|_| MachineError::NotRegistered)?;

        let previous_step = state.current_step.clone();
        let auto_routed = reported_step == previous_step;
        let mut next_step = reported_step.to_string();
        let mut completed = false;

        if auto_routed {
            if is_checkpoint_phase(reported_step) {
                (next_step, completed) =
                    self.route_checkpoint(&state, worktree_path, reported_step)?;
            } else {
                (next_step, completed) =
                    self.try_advance(&state.workflow, reported_step, worktree_path);
            }
        }

        state.current_step = next_step;
        self.store.save(&state)?;

        Ok(ProgressResult {
            recorded: true,
            current_step: state.current_step,
            previous_step,
            loop_count: 0,
            timestamp: Utc::now(),
            auto_routed,
            completed: completed.then_some(true),
            message: completed.then(|| "Workflow completed".to_string()),
        })
    }

    /// Checkpoint query: read the step artifact and classify it.
    fn route_checkpoint(
        &self,
        state: &WorkflowState,
        worktree_path: &Path,
        step: &str,
    ) -> Result<(String, bool), MachineError> {
        let artifact = findings::artifact_path(worktree_path, step);
        let content = match std::fs::read(&artifact) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                // Contract: agents write findings before checkpointing.
                return Err(MachineError::MissingFindings {
                    step: step.to_string(),
                    file: artifact.display().to_string(),
                });
            }
            Err(err) => return Err(MachineError::FindingsIo(err)),
        };

        // A file too short to mean anything counts as "nothing to report".
        if content.len() < findings::MIN_FINDINGS_LEN {
            return Ok(self.try_advance(&state.workflow, step, worktree_path));
        }

        let text = String::from_utf8_lossy(&content);
        match self.classifier.has_issues(&text) {
            Ok(true) => {
                // Loop back to the step's first target; a step without
                // targets holds position.
                let target = workflow::get_definition(&state.workflow, Some(worktree_path))
                    .ok()
                    .and_then(|def| {
                        def.step(step)
                            .and_then(|s| s.can_loop_to.first().cloned())
                    });
                Ok((target.unwrap_or_else(|| step.to_string()), false))
            }
            Ok(false) => Ok(self.try_advance(&state.workflow, step, worktree_path)),
            Err(err) => {
                tracing::warn!("findings classification failed, advancing: {err}");
                Ok(self.try_advance(&state.workflow, step, worktree_path))
            }
        }
    }

    /// Next step in the workflow, or the current step plus the completion
    /// flag when the final step is reached.
    fn try_advance(&self, workflow: &str, current: &str, worktree_path: &Path) -> (String, bool) {
        match workflow::next_step(workflow, current, Some(worktree_path)) {
            Ok(next) => (next, false),
            Err(WorkflowError::FinalStep) => (current.to_string(), true),
            Err(err) => {
                tracing::warn!("failed to advance from step {current}: {err}");
                (current.to_string(), false)
            }
        }
    }

    /// Assemble the guidance prompt for the current step: embedded
    /// template, then any project addition, then dynamic context.
    pub fn get_guidance(
        &self,
        worktree_path: &Path,
        session_id: &str,
        agent_id: &str,
    ) -> Result<GuidanceResult, MachineError> {
        let workflow_id = worktree_to_id(worktree_path, session_id, agent_id);
        let state = self
            .store
            .load(&workflow_id)
            .map_err(|_| MachineError::NotRegistered)?;

        let mut prompt = prompts::load_prompt(&state.workflow, &state.current_step)?.to_string();

        if let Ok(repo_root) = git::repo_root(worktree_path) {
            if let Some(cache) = self.additions.get_or_load(&repo_root) {
                if let Some(addition) = cache.get(&state.workflow, &state.current_step) {
                    prompt = format!(
                        "{prompt}\n\n---\n\n### Project-Specific Guidance\n\n{addition}"
                    );
                }
            }
        }

        let context = guidance::dynamic_context(worktree_path, &state.current_step);
        if !context.is_empty() {
            prompt = format!("{prompt}\n\n---\n\n## Current Context\n\n{context}");
        }

        let can_loop_back = workflow::get_definition(&state.workflow, Some(worktree_path))
            .ok()
            .and_then(|def| def.step(&state.current_step).map(|s| s.can_loop_to.clone()))
            .unwrap_or_default();

        Ok(GuidanceResult {
            current_step: state.current_step,
            prompt,
            can_loop_back,
            loop_count: 0,
        })
    }

    /// Resume a workflow at an arbitrary step (or re-confirm the current
    /// one when no step is given).
    pub fn rejoin(
        &self,
        worktree_path: &Path,
        step: &str,
        _task_description: &str,
        reset_subsequent: bool,
        session_id: &str,
        agent_id: &str,
    ) -> Result<RejoinResult, MachineError> {
        let workflow_id = worktree_to_id(worktree_path, session_id, agent_id);
        let mut state = self
            .store
            .load(&workflow_id)
            .map_err(|_| MachineError::NotRegistered)?;

        let target = if step.is_empty() {
            state.current_step.clone()
        } else {
            let def = workflow::get_definition(&state.workflow, Some(worktree_path))?;
            if def.step(step).is_none() {
                return Err(MachineError::InvalidStep {
                    step: step.to_string(),
                    workflow: state.workflow.clone(),
                });
            }
            step.to_string()
        };

        let from_step = state.current_step.clone();
        state.current_step = target;
        self.store.save(&state)?;

        Ok(RejoinResult {
            rejoined: true,
            workflow_id,
            from_step,
            current_step: state.current_step,
            reset_subsequent,
            timestamp: Utc::now(),
        })
    }

    /// Delete the instance record. No archiving.
    pub fn reset(
        &self,
        worktree_path: &Path,
        _archive: bool,
        session_id: &str,
        agent_id: &str,
    ) -> Result<ResetResult, MachineError> {
        let workflow_id = worktree_to_id(worktree_path, session_id, agent_id);
        self.store.delete(&workflow_id)?;

        Ok(ResetResult {
            reset: true,
            workflow_id,
            archived: false,
            timestamp: Utc::now(),
        })
    }

    /// Status projection for one instance.
    pub fn get_status(
        &self,
        worktree_path: &Path,
        session_id: &str,
        agent_id: &str,
    ) -> Result<StatusResult, MachineError> {
        let workflow_id = worktree_to_id(worktree_path, session_id, agent_id);
        let state = self
            .store
            .load(&workflow_id)
            .map_err(|_| MachineError::NotRegistered)?;

        Ok(StatusResult {
            workflow_id: state.workflow_id,
            workflow: state.workflow,
            worktree_path: state.worktree_path,
            current_step: state.current_step,
            task_description: String::new(),
            loop_count: 0,
            progress_history: Vec::new(),
            updated_at: String::new(),
        })
    }

    /// All registered instances, optionally filtered to one worktree.
    pub fn list_agents(&self, worktree_path: Option<&Path>) -> AgentsResult {
        let agents: Vec<AgentSummary> = self
            .store
            .list()
            .into_iter()
            .filter(|state| {
                worktree_path.map_or(true, |filter| state.worktree_path == filter)
            })
            .map(|state| AgentSummary {
                workflow_id: state.workflow_id,
                workflow: state.workflow,
                worktree_path: state.worktree_path,
                current_step: state.current_step,
            })
            .collect();

        AgentsResult {
            count: agents.len(),
            agents,
        }
    }

    /// Deprecated surface: issues live in `bots/<step>.md` now.
    pub fn record_issues(&self) -> RecordIssuesResult {
        RecordIssuesResult {
            recorded: false,
            issue_count: 0,
            should_loop: false,
            loop_back_to: String::new(),
            total_issues: 0,
            deprecated: true,
            warning: "This function is deprecated. Issues are now stored in markdown files \
                      under bots/<step>.md. Write findings to those files instead."
                .to_string(),
        }
    }

    /// Deprecated surface: sessions are no longer tracked.
    pub fn get_session_status(&self, session_id: &str) -> SessionStatusResult {
        tracing::warn!("get_session_status is deprecated; use list_agents instead");
        SessionStatusResult {
            session_id: session_id.to_string(),
            agent_count: 0,
            agents: Vec::new(),
            deprecated: "Session tracking removed - use list_agents instead".to_string(),
        }
    }
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new()
    }
}
