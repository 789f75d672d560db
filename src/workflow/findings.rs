//! Findings extraction from phase artifacts.
//!
//! Agents record what they found at each phase in `bots/<phase>.md` inside
//! their worktree. The orchestrator only ever reads these files.

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;

/// Artifacts shorter than this carry no meaningful findings.
pub const MIN_FINDINGS_LEN: usize = 10;

/// At most this many findings are surfaced from one artifact.
pub const MAX_FINDINGS: usize = 10;

static NUMBERED_ITEM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+\.\s+(.*)").expect("numbered item pattern"));

/// Path of the artifact an agent writes for a phase.
pub fn artifact_path(worktree: &Path, phase: &str) -> PathBuf {
    worktree
        .join("bots")
        .join(format!("{}.md", phase.to_lowercase()))
}

/// Whether a phase artifact exists and is long enough to mean something.
pub fn is_substantive(worktree: &Path, phase: &str) -> bool {
    std::fs::metadata(artifact_path(worktree, phase))
        .map(|meta| meta.len() >= MIN_FINDINGS_LEN as u64)
        .unwrap_or(false)
}

/// Read a phase artifact and extract its findings. Missing or trivially
/// short files yield an empty list.
pub fn read_findings(worktree: &Path, phase: &str) -> Vec<String> {
    let path = artifact_path(worktree, phase);
    let Ok(content) = std::fs::read_to_string(&path) else {
        return Vec::new();
    };
    if content.len() < MIN_FINDINGS_LEN {
        return Vec::new();
    }
    parse_findings(&content)
}

/// Bulleted (`-`, `*`, `+`) and numbered (`1.`) list items, in source
/// order, capped at [`MAX_FINDINGS`].
pub fn parse_findings(content: &str) -> Vec<String> {
    let mut findings = Vec::new();

    for line in content.lines() {
        if findings.len() >= MAX_FINDINGS {
            break;
        }
        let line = line.trim();
        let item = line
            .strip_prefix("- ")
            .or_else(|| line.strip_prefix("* "))
            .or_else(|| line.strip_prefix("+ "))
            .or_else(|| {
                NUMBERED_ITEM
                    .captures(line)
                    .and_then(|caps| caps.get(1))
                    .map(|m| m.as_str())
            });
        if let Some(item) = item {
            let item = item.trim();
            if !item.is_empty() {
                findings.push(item.to_string());
            }
        }
    }

    findings
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_bulleted_and_numbered() {
        let content = "# Review\n\n- first\n* second\n+ third\n1. fourth\n12. fifth\n";
        let findings = parse_findings(content);
        assert_eq!(findings, vec!["first", "second", "third", "fourth", "fifth"]);
    }

    #[test]
    fn test_parse_ignores_prose_and_headings() {
        let content = "## Issues\nThis line is prose.\n-not a bullet\n1.also not\n- real\n";
        assert_eq!(parse_findings(content), vec!["real"]);
    }

    #[test]
    fn test_parse_preserves_source_order() {
        let content = "3. c\n1. a\n2. b\n";
        assert_eq!(parse_findings(content), vec!["c", "a", "b"]);
    }

    #[test]
    fn test_parse_stops_at_ten() {
        let content: String = (1..=15).map(|i| format!("- item {i}\n")).collect();
        let findings = parse_findings(&content);
        assert_eq!(findings.len(), MAX_FINDINGS);
        assert_eq!(findings[9], "item 10");
    }

    #[test]
    fn test_read_findings_missing_file() {
        let tmp = TempDir::new().unwrap();
        assert!(read_findings(tmp.path(), "REVIEW").is_empty());
    }

    #[test]
    fn test_read_findings_short_file() {
        let tmp = TempDir::new().unwrap();
        let bots = tmp.path().join("bots");
        std::fs::create_dir_all(&bots).unwrap();
        std::fs::write(bots.join("review.md"), "- tiny").unwrap();

        assert!(read_findings(tmp.path(), "REVIEW").is_empty());
    }

    #[test]
    fn test_read_findings_lowercases_phase() {
        let tmp = TempDir::new().unwrap();
        let bots = tmp.path().join("bots");
        std::fs::create_dir_all(&bots).unwrap();
        std::fs::write(bots.join("review.md"), "- a finding here\n").unwrap();

        assert_eq!(read_findings(tmp.path(), "REVIEW"), vec!["a finding here"]);
    }

    #[test]
    fn test_is_substantive_boundary() {
        let tmp = TempDir::new().unwrap();
        let bots = tmp.path().join("bots");
        std::fs::create_dir_all(&bots).unwrap();

        std::fs::write(bots.join("test.md"), "123456789").unwrap();
        assert!(!is_substantive(tmp.path(), "TEST"));

        std::fs::write(bots.join("test.md"), "1234567890").unwrap();
        assert!(is_substantive(tmp.path(), "TEST"));
    }
}
