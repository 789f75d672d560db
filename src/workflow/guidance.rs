//! Dynamic guidance context.
//!
//! When a checkpoint loops an agent back to an earlier step, the findings
//! that caused the loop are folded into that step's prompt so the agent
//! does not have to rediscover them.

use std::path::Path;

use super::findings;

/// Artifacts consulted for a step before its own, in priority order: the
/// checkpoint phases that can loop back into it.
fn loopback_sources(step: &str) -> &'static [&'static str] {
    match step {
        "PLAN" => &["review", "test"],
        "EXECUTE" => &["test", "review"],
        "REVIEW" => &["monitor"],
        _ => &[],
    }
}

fn context_header(step: &str) -> &'static str {
    match step {
        "PLAN" => "Issues to address in your plan:",
        "EXECUTE" => "Issues to fix in this implementation pass:",
        "TEST" => "Test failures to address:",
        "REVIEW" => "Observations to verify in this review:",
        _ => "Findings from the previous phase:",
    }
}

fn context_directive(step: &str) -> &'static str {
    match step {
        "PLAN" => "Revise the plan so every numbered item above is resolved.",
        "EXECUTE" => "Fix each numbered item before reporting progress.",
        "TEST" => "Make these pass before reporting progress.",
        "REVIEW" => "Confirm each item is resolved or record it as a finding.",
        _ => "Take these into account before moving on.",
    }
}

/// Build the dynamic context block for a step, or an empty string when no
/// substantive findings exist.
///
/// Source selection happens first: the first substantive loop-back
/// artifact wins, else the step's own artifact. Whatever is selected is
/// then parsed; an artifact with no list items produces nothing.
pub fn dynamic_context(worktree: &Path, step: &str) -> String {
    let source = loopback_sources(step)
        .iter()
        .find(|phase| findings::is_substantive(worktree, phase))
        .map_or_else(|| step.to_lowercase(), |phase| (*phase).to_string());

    let items = findings::read_findings(worktree, &source);
    if items.is_empty() {
        return String::new();
    }

    let mut block = String::new();
    block.push_str(context_header(step));
    block.push('\n');
    for (index, item) in items.iter().enumerate() {
        block.push_str(&format!("{}. {item}\n", index + 1));
    }
    block.push('\n');
    block.push_str(context_directive(step));
    block
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn write_artifact(worktree: &Path, phase: &str, content: &str) -> PathBuf {
        let bots = worktree.join("bots");
        std::fs::create_dir_all(&bots).unwrap();
        let path = bots.join(format!("{phase}.md"));
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_no_files_gives_empty_context() {
        let tmp = TempDir::new().unwrap();
        assert_eq!(dynamic_context(tmp.path(), "PLAN"), "");
    }

    #[test]
    fn test_short_file_gives_empty_context() {
        let tmp = TempDir::new().unwrap();
        write_artifact(tmp.path(), "plan", "ok");
        assert_eq!(dynamic_context(tmp.path(), "PLAN"), "");
    }

    #[test]
    fn test_plan_picks_up_review_findings() {
        let tmp = TempDir::new().unwrap();
        write_artifact(
            tmp.path(),
            "review",
            "# Review\n\n1. Missing error handling in server.rs:245\n2. Unclosed file handle\n",
        );

        let context = dynamic_context(tmp.path(), "PLAN");
        assert!(context.starts_with("Issues to address in your plan:"));
        assert!(context.contains("1. Missing error handling in server.rs:245"));
        assert!(context.contains("2. Unclosed file handle"));
        assert!(context.contains("Revise the plan"));
    }

    #[test]
    fn test_plan_prefers_review_over_test() {
        let tmp = TempDir::new().unwrap();
        write_artifact(tmp.path(), "review", "- review finding here\n");
        write_artifact(tmp.path(), "test", "- test failure here\n");

        let context = dynamic_context(tmp.path(), "PLAN");
        assert!(context.contains("review finding"));
        assert!(!context.contains("test failure"));
    }

    #[test]
    fn test_execute_prefers_test_over_review() {
        let tmp = TempDir::new().unwrap();
        write_artifact(tmp.path(), "review", "- review finding here\n");
        write_artifact(tmp.path(), "test", "- test failure here\n");

        let context = dynamic_context(tmp.path(), "EXECUTE");
        assert!(context.contains("test failure"));
        assert!(context.starts_with("Issues to fix in this implementation pass:"));
    }

    #[test]
    fn test_step_without_sources_reads_own_artifact() {
        let tmp = TempDir::new().unwrap();
        write_artifact(tmp.path(), "brainstorm", "- approach one\n- approach two\n");

        let context = dynamic_context(tmp.path(), "BRAINSTORM");
        assert!(context.contains("1. approach one"));
        assert!(context.starts_with("Findings from the previous phase:"));
    }

    #[test]
    fn test_selected_source_with_no_list_items_emits_nothing() {
        let tmp = TempDir::new().unwrap();
        // Substantive but free of list items: selection stops here and the
        // empty parse wins, even though test.md has findings.
        write_artifact(tmp.path(), "review", "All clear, nothing to report.\n");
        write_artifact(tmp.path(), "test", "- test failure here\n");

        assert_eq!(dynamic_context(tmp.path(), "PLAN"), "");
    }
}
