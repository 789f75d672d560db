//! Workflow catalog.
//!
//! A workflow is a named, ordered list of steps with optional loop-back
//! targets. Definitions ship embedded in the binary; a repository can
//! override or extend them with `.bob/workflows/<keyword>.json` files.

pub mod additions;
pub mod findings;
pub mod guidance;
pub mod prompts;

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// Error type for catalog operations.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("workflow not found: {0}")]
    NotFound(String),

    #[error("failed to parse workflow {keyword}: {source}")]
    Parse {
        keyword: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid workflow {keyword}: {reason}")]
    Invalid { keyword: String, reason: String },

    /// The current step is the last one. Transitions match on this; it is
    /// an outcome, not a failure.
    #[error("already at final step")]
    FinalStep,

    #[error("unknown step: {0}")]
    UnknownStep(String),
}

/// A complete workflow: ordered steps plus loop rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDefinition {
    pub keyword: String,
    pub name: String,
    pub description: String,
    pub steps: Vec<Step>,
    #[serde(default)]
    pub loop_rules: Vec<LoopRule>,
}

/// A single workflow step.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub name: String,
    pub description: String,
    /// Earlier steps this one may route back to when issues are found.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub can_loop_to: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requirements: Vec<String>,
}

/// When and where a checkpoint step loops back.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopRule {
    pub from_step: String,
    pub to_step: String,
    pub condition: String,
    pub description: String,
}

static EMBEDDED: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("work", include_str!("../../workflows/work.json")),
        ("code-review", include_str!("../../workflows/code-review.json")),
        ("performance", include_str!("../../workflows/performance.json")),
        ("explore", include_str!("../../workflows/explore.json")),
    ])
});

impl WorkflowDefinition {
    /// Look up a step by name.
    pub fn step(&self, name: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.name == name)
    }

    /// Step names must be unique and every loop target must name a step.
    pub fn validate(&self) -> Result<(), WorkflowError> {
        let mut names = BTreeSet::new();
        for step in &self.steps {
            if !names.insert(step.name.as_str()) {
                return Err(WorkflowError::Invalid {
                    keyword: self.keyword.clone(),
                    reason: format!("duplicate step name: {}", step.name),
                });
            }
        }
        for step in &self.steps {
            for target in &step.can_loop_to {
                if !names.contains(target.as_str()) {
                    return Err(WorkflowError::Invalid {
                        keyword: self.keyword.clone(),
                        reason: format!(
                            "step {} loops to unknown step: {target}",
                            step.name
                        ),
                    });
                }
            }
        }
        for rule in &self.loop_rules {
            for name in [&rule.from_step, &rule.to_step] {
                if !names.contains(name.as_str()) {
                    return Err(WorkflowError::Invalid {
                        keyword: self.keyword.clone(),
                        reason: format!("loop rule references unknown step: {name}"),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Resolve a workflow by keyword. A repository-local definition at
/// `.bob/workflows/<keyword>.json` wins over the embedded catalog.
pub fn get_definition(
    keyword: &str,
    repo_root: Option<&Path>,
) -> Result<WorkflowDefinition, WorkflowError> {
    if let Some(root) = repo_root {
        let path = root
            .join(".bob")
            .join("workflows")
            .join(format!("{keyword}.json"));
        if let Ok(data) = std::fs::read_to_string(&path) {
            let def: WorkflowDefinition =
                serde_json::from_str(&data).map_err(|source| WorkflowError::Parse {
                    keyword: keyword.to_string(),
                    source,
                })?;
            def.validate()?;
            return Ok(def);
        }
    }

    let data = EMBEDDED
        .get(keyword)
        .ok_or_else(|| WorkflowError::NotFound(keyword.to_string()))?;
    serde_json::from_str(data).map_err(|source| WorkflowError::Parse {
        keyword: keyword.to_string(),
        source,
    })
}

/// All known workflow keywords: the embedded catalog plus any repository
/// definitions, de-duplicated and sorted.
pub fn list_workflows(repo_root: Option<&Path>) -> Vec<String> {
    let mut keywords: BTreeSet<String> = EMBEDDED.keys().map(|k| (*k).to_string()).collect();

    if let Some(root) = repo_root {
        if let Ok(entries) = std::fs::read_dir(root.join(".bob").join("workflows")) {
            for entry in entries.flatten() {
                let name = entry.file_name().to_string_lossy().into_owned();
                if let Some(keyword) = name.strip_suffix(".json") {
                    keywords.insert(keyword.to_string());
                }
            }
        }
    }

    keywords.into_iter().collect()
}

/// Next step in declaration order. [`WorkflowError::FinalStep`] is the
/// completion signal the state machine matches on.
pub fn next_step(
    workflow: &str,
    current: &str,
    repo_root: Option<&Path>,
) -> Result<String, WorkflowError> {
    let def = get_definition(workflow, repo_root)?;
    let index = def
        .steps
        .iter()
        .position(|s| s.name == current)
        .ok_or_else(|| WorkflowError::UnknownStep(current.to_string()))?;

    match def.steps.get(index + 1) {
        Some(step) => Ok(step.name.clone()),
        None => Err(WorkflowError::FinalStep),
    }
}
