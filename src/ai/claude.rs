//! Claude-backed findings classifier.
//!
//! A single-shot request with a strict binary prompt; anything that goes
//! wrong on the wire falls back to the offline heuristic at the call site.

use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::{Classifier, ClassifierError};

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MODEL: &str = "claude-haiku-4-5-20251001";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Words that mark an artifact as describing work still to do.
const ISSUE_KEYWORDS: &[&str] = &[
    "error",
    "bug",
    "issue",
    "problem",
    "warning",
    "critical",
    "high",
    "medium",
    "severity",
    "fix",
    "missing",
    "incorrect",
    "invalid",
    "vulnerability",
    "security",
    "unsafe",
];

static CLEAN_SUMMARY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"total issues:\s*0\b").expect("clean summary pattern"));

/// Classifier backed by the Claude API, with an offline fallback.
pub struct ClaudeClassifier {
    api_key: Option<String>,
    model: String,
}

impl ClaudeClassifier {
    /// Build from `ANTHROPIC_API_KEY` (or `CLAUDE_API_KEY`). With neither
    /// set, every classification uses the offline heuristic.
    pub fn from_env() -> Self {
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .or_else(|_| std::env::var("CLAUDE_API_KEY"))
            .ok()
            .filter(|key| !key.is_empty());
        Self::new(api_key)
    }

    pub fn new(api_key: Option<String>) -> Self {
        Self {
            api_key,
            model: DEFAULT_MODEL.to_string(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    fn remote_classify(&self, api_key: &str, findings: &str) -> Result<bool, ClassifierError> {
        let prompt = format!(
            r#"You are a binary classifier. Analyze the following code review findings and determine if there are any actual issues that need to be fixed.

Rules:
- Empty findings, placeholder text, or a review so short it could not have examined the change count as issues (answer "yes").
- An explicit all-clear summary ("no issues", "Total Issues: 0") with nothing actionable counts as clean (answer "no").
- Comments, praise, and style observations with no requested change count as clean.

Code Review Findings:
{findings}

Answer with ONLY one word: "yes" if there are issues that need fixing, or "no" if there are no issues.

Answer:"#
        );

        let request = MessagesRequest {
            model: self.model.clone(),
            max_tokens: 10,
            messages: vec![Message {
                role: "user".to_string(),
                content: prompt,
            }],
        };

        let client = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        let response = client
            .post(API_URL)
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&request)
            .send()?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().unwrap_or_default();
            return Err(ClassifierError::Api { status, body });
        }

        let response: MessagesResponse = response.json()?;
        let answer = response
            .content
            .first()
            .ok_or(ClassifierError::EmptyResponse)?
            .text
            .trim()
            .to_lowercase();

        Ok(answer.contains("yes"))
    }
}

impl Classifier for ClaudeClassifier {
    fn has_issues(&self, findings: &str) -> Result<bool, ClassifierError> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Ok(fallback_classification(findings));
        };
        if findings.trim().len() < 10 {
            return Ok(false);
        }
        self.remote_classify(api_key, findings)
    }
}

/// Deterministic heuristic used when no credential is configured or the
/// remote call fails.
pub fn fallback_classification(findings: &str) -> bool {
    let trimmed = findings.trim();
    if trimmed.len() < 10 {
        return false;
    }

    let lower = trimmed.to_lowercase();

    // An explicit all-clear wins over the keyword scan: "Total Issues: 0"
    // contains "issue" but reports none.
    if lower.contains("no issues") || CLEAN_SUMMARY.is_match(&lower) {
        return false;
    }

    if ISSUE_KEYWORDS.iter().any(|keyword| lower.contains(keyword)) {
        return true;
    }

    // Structured sections usually mean itemized findings.
    trimmed.contains("##")
}

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    text: String,
}
