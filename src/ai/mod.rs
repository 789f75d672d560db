//! Findings classification.
//!
//! Checkpoint phases route on a single yes/no question: does this
//! artifact describe issues that still need fixing? The answer comes from
//! a remote model when credentials are available and from a deterministic
//! heuristic otherwise.

mod claude;

pub use claude::{fallback_classification, ClaudeClassifier};

/// Error type for classification.
#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    #[error("classification request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("classification API error (status {status}): {body}")]
    Api { status: u16, body: String },

    #[error("empty response from classifier")]
    EmptyResponse,
}

/// Binary findings classifier.
pub trait Classifier: Send + Sync {
    /// Whether the text describes issues that need fixing.
    fn has_issues(&self, findings: &str) -> Result<bool, ClassifierError>;
}
