//! # Bob
//!
//! Workflow orchestrator for LLM coding agents.
//!
//! Bob drives agents through named workflow phases (INIT, PLAN, EXECUTE,
//! TEST, REVIEW, ...), one git worktree per agent, and decides from the
//! artifacts they leave under `bots/` whether to advance, loop back, or
//! complete. It is the server side of an MCP tool surface spoken over
//! JSON on stdio.
//!
//! ## Architecture
//!
//! - **State machine** (`state`): per-worktree instance records under
//!   `~/.bob/state/`, with artifact-classified checkpoint routing.
//! - **Workflow catalog** (`workflow`): embedded definitions and prompts,
//!   repository overrides, per-repo prompt additions from the `bob` branch.
//! - **Worktrees** (`git`): isolated checkouts at
//!   `<parent>/<repo>-worktrees/<feature>`.
//! - **Tasks** (`tasks`): JSON-per-task records on the `bob` branch with a
//!   symmetric dependency graph.
//! - **Tool surface** (`mcp`): the JSON-RPC dispatch agents call.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::return_self_not_must_use)]

pub mod ai;
pub mod git;
pub mod mcp;
pub mod state;
pub mod tasks;
pub mod workflow;

pub use ai::{Classifier, ClaudeClassifier};
pub use mcp::{Dispatcher, McpServer};
pub use state::machine::StateManager;
pub use state::{StateStore, WorkflowState};
pub use tasks::{Task, TaskManager};
pub use workflow::{Step, WorkflowDefinition};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Binary name
pub const APP_NAME: &str = "bob";
