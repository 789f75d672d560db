//! Embedded phase prompts.
//!
//! Each workflow step has a markdown prompt compiled into the binary,
//! keyed by an explicit per-workflow slug. Steps the map does not know
//! degrade to a lowercased, dash-separated slug so repository-defined
//! workflows can still resolve files dropped next to the embedded set.

/// Error type for prompt lookup.
#[derive(Debug, thiserror::Error)]
#[error("prompt not found for workflow={workflow} step={step}")]
pub struct PromptNotFound {
    pub workflow: String,
    pub step: String,
}

static PROMPTS: &[(&str, &str, &str)] = &[
    ("work", "01-init", include_str!("../../prompts/work/01-init.md")),
    ("work", "02-prompt", include_str!("../../prompts/work/02-prompt.md")),
    ("work", "03-brainstorm", include_str!("../../prompts/work/03-brainstorm.md")),
    ("work", "04-design", include_str!("../../prompts/work/04-design.md")),
    ("work", "05-plan", include_str!("../../prompts/work/05-plan.md")),
    ("work", "06-execute", include_str!("../../prompts/work/06-execute.md")),
    ("work", "07-test", include_str!("../../prompts/work/07-test.md")),
    ("work", "08-review", include_str!("../../prompts/work/08-review.md")),
    ("work", "09-commit", include_str!("../../prompts/work/09-commit.md")),
    ("work", "10-monitor", include_str!("../../prompts/work/10-monitor.md")),
    ("work", "11-complete", include_str!("../../prompts/work/11-complete.md")),
    ("code-review", "01-init", include_str!("../../prompts/code-review/01-init.md")),
    ("code-review", "02-review", include_str!("../../prompts/code-review/02-review.md")),
    ("code-review", "03-fix", include_str!("../../prompts/code-review/03-fix.md")),
    ("code-review", "04-test", include_str!("../../prompts/code-review/04-test.md")),
    ("code-review", "05-commit", include_str!("../../prompts/code-review/05-commit.md")),
    ("code-review", "06-complete", include_str!("../../prompts/code-review/06-complete.md")),
    ("performance", "01-init", include_str!("../../prompts/performance/01-init.md")),
    ("performance", "02-benchmark", include_str!("../../prompts/performance/02-benchmark.md")),
    ("performance", "03-analyze", include_str!("../../prompts/performance/03-analyze.md")),
    ("performance", "04-optimize", include_str!("../../prompts/performance/04-optimize.md")),
    ("performance", "05-verify", include_str!("../../prompts/performance/05-verify.md")),
    ("performance", "06-commit", include_str!("../../prompts/performance/06-commit.md")),
    ("performance", "07-complete", include_str!("../../prompts/performance/07-complete.md")),
    ("explore", "01-discover", include_str!("../../prompts/explore/01-discover.md")),
    ("explore", "02-document", include_str!("../../prompts/explore/02-document.md")),
    ("explore", "03-complete", include_str!("../../prompts/explore/03-complete.md")),
];

/// Explicit step-to-file mapping per workflow.
fn step_slug(workflow: &str, step: &str) -> String {
    let explicit = match (workflow, step) {
        ("work", "INIT") => Some("01-init"),
        ("work", "PROMPT") => Some("02-prompt"),
        ("work", "BRAINSTORM") => Some("03-brainstorm"),
        ("work", "DESIGN") => Some("04-design"),
        ("work", "PLAN") => Some("05-plan"),
        ("work", "EXECUTE") => Some("06-execute"),
        ("work", "TEST") => Some("07-test"),
        ("work", "REVIEW") => Some("08-review"),
        ("work", "COMMIT") => Some("09-commit"),
        ("work", "MONITOR") => Some("10-monitor"),
        ("work", "COMPLETE") => Some("11-complete"),
        ("code-review", "INIT") => Some("01-init"),
        ("code-review", "REVIEW") => Some("02-review"),
        ("code-review", "FIX") => Some("03-fix"),
        ("code-review", "TEST") => Some("04-test"),
        ("code-review", "COMMIT") => Some("05-commit"),
        ("code-review", "COMPLETE") => Some("06-complete"),
        ("performance", "INIT") => Some("01-init"),
        ("performance", "BENCHMARK") => Some("02-benchmark"),
        ("performance", "ANALYZE") => Some("03-analyze"),
        ("performance", "OPTIMIZE") => Some("04-optimize"),
        ("performance", "VERIFY") => Some("05-verify"),
        ("performance", "COMMIT") => Some("06-commit"),
        ("performance", "COMPLETE") => Some("07-complete"),
        ("explore", "DISCOVER") => Some("01-discover"),
        ("explore", "DOCUMENT") => Some("02-document"),
        ("explore", "COMPLETE") => Some("03-complete"),
        _ => None,
    };

    match explicit {
        Some(slug) => slug.to_string(),
        // "MY_STEP" -> "my-step"
        None => step.to_lowercase().replace('_', "-"),
    }
}

/// The embedded prompt for a workflow step.
pub fn load_prompt(workflow: &str, step: &str) -> Result<&'static str, PromptNotFound> {
    let slug = step_slug(workflow, step);
    PROMPTS
        .iter()
        .find(|(w, s, _)| *w == workflow && *s == slug)
        .map(|(_, _, content)| *content)
        .ok_or_else(|| PromptNotFound {
            workflow: workflow.to_string(),
            step: step.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_prompt_work_plan() {
        let prompt = load_prompt("work", "PLAN").unwrap();
        assert!(prompt.contains("PLAN Phase"));
    }

    #[test]
    fn test_every_step_of_every_workflow_has_a_prompt() {
        for keyword in ["work", "code-review", "performance", "explore"] {
            let def = crate::workflow::get_definition(keyword, None).unwrap();
            for step in &def.steps {
                load_prompt(keyword, &step.name).unwrap_or_else(|err| {
                    panic!("missing prompt: {err}");
                });
            }
        }
    }

    #[test]
    fn test_unknown_step_uses_lowercase_slug() {
        assert_eq!(step_slug("work", "MY_STEP"), "my-step");
    }

    #[test]
    fn test_unknown_step_fails_with_prompt_not_found() {
        let result = load_prompt("work", "NO_SUCH_STEP");
        assert!(result.is_err());
    }
}
