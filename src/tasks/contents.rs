//! Contents-API seam for the task store.
//!
//! Task files live on the `bob` branch of the repository's hosting
//! service and are read and written through its contents API. The trait
//! is the seam: production resolves a GitHub client from the `origin`
//! remote, tests plug in an in-memory store.

use std::path::Path;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::Method;
use serde::Deserialize;

use super::TaskError;
use crate::git;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// A file as the contents API returns it.
#[derive(Debug, Deserialize)]
struct GitHubFile {
    content: String,
    sha: String,
}

/// Content and blob id of one file.
#[derive(Debug, Clone)]
pub struct FileContent {
    pub content: String,
    pub sha: String,
}

/// File-level operations against one branch of one repository.
pub trait ContentsStore: Send + Sync {
    /// Create the branch from the default branch head when missing.
    fn ensure_branch(&self) -> Result<(), TaskError>;

    /// File names (not paths) under a directory; empty when absent.
    fn list_files(&self, dir: &str) -> Result<Vec<String>, TaskError>;

    /// Read one file; `None` when it does not exist.
    fn read_file(&self, path: &str) -> Result<Option<FileContent>, TaskError>;

    /// Create (`sha: None`) or update (`sha: Some`) one file.
    fn write_file(
        &self,
        path: &str,
        content: &str,
        message: &str,
        sha: Option<&str>,
    ) -> Result<(), TaskError>;

    /// Delete one file at its current blob id.
    fn delete_file(&self, path: &str, message: &str, sha: &str) -> Result<(), TaskError>;
}

/// GitHub contents-API client for one repository branch.
pub struct GitHubContents {
    owner: String,
    repo: String,
    token: String,
    branch: String,
    client: Client,
}

impl GitHubContents {
    pub fn new(
        owner: impl Into<String>,
        repo: impl Into<String>,
        token: impl Into<String>,
        branch: impl Into<String>,
    ) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
            token: token.into(),
            branch: branch.into(),
            client: Client::new(),
        }
    }

    /// Resolve the hosting repository from the `origin` remote of a local
    /// checkout. Requires `GITHUB_TOKEN`.
    pub fn from_repo(repo_root: &Path, branch: &str) -> Result<Self, TaskError> {
        let remote = git::origin_url(repo_root)
            .map_err(|_| TaskError::InvalidRemote("missing origin remote".to_string()))?;
        let (owner, repo) = parse_github_remote(&remote)
            .ok_or_else(|| TaskError::InvalidRemote(remote.clone()))?;
        let token = std::env::var("GITHUB_TOKEN").map_err(|_| TaskError::MissingToken)?;
        Ok(Self::new(owner, repo, token, branch))
    }

    fn contents_url(&self, path: &str) -> String {
        format!(
            "https://api.github.com/repos/{}/{}/contents/{}",
            self.owner, self.repo, path
        )
    }

    fn api_url(&self, path: &str) -> String {
        format!(
            "https://api.github.com/repos/{}/{}{}",
            self.owner, self.repo, path
        )
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.client
            .request(method, url)
            .timeout(REQUEST_TIMEOUT)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", crate::APP_NAME)
            .header("X-GitHub-Api-Version", "2022-11-28")
    }

    fn api_error(response: Response) -> TaskError {
        let status = response.status().as_u16();
        let message = response
            .json::<serde_json::Value>()
            .ok()
            .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(String::from))
            .unwrap_or_else(|| format!("HTTP {status}"));
        TaskError::Api { status, message }
    }

    fn branch_head_sha(&self, branch: &str) -> Result<String, TaskError> {
        let url = self.api_url(&format!("/git/ref/heads/{branch}"));
        let response = self.request(Method::GET, &url).send()?;
        if !response.status().is_success() {
            return Err(Self::api_error(response));
        }
        let reference: serde_json::Value = response.json()?;
        reference
            .pointer("/object/sha")
            .and_then(|v| v.as_str())
            .map(String::from)
            .ok_or_else(|| TaskError::Decode("ref response missing object.sha".to_string()))
    }
}

impl ContentsStore for GitHubContents {
    fn ensure_branch(&self) -> Result<(), TaskError> {
        let url = self.api_url(&format!("/branches/{}", self.branch));
        let response = self.request(Method::GET, &url).send()?;
        if response.status().is_success() {
            return Ok(());
        }
        if response.status().as_u16() != 404 {
            return Err(Self::api_error(response));
        }

        // Branch the side branch off the default branch head.
        let response = self.request(Method::GET, &self.api_url("")).send()?;
        if !response.status().is_success() {
            return Err(Self::api_error(response));
        }
        let repo_info: serde_json::Value = response.json()?;
        let default_branch = repo_info
            .get("default_branch")
            .and_then(|v| v.as_str())
            .ok_or_else(|| TaskError::Decode("repo response missing default_branch".to_string()))?;

        let sha = self.branch_head_sha(default_branch)?;

        let response = self
            .request(Method::POST, &self.api_url("/git/refs"))
            .json(&serde_json::json!({
                "ref": format!("refs/heads/{}", self.branch),
                "sha": sha,
            }))
            .send()?;
        if response.status().as_u16() != 201 {
            return Err(Self::api_error(response));
        }
        Ok(())
    }

    fn list_files(&self, dir: &str) -> Result<Vec<String>, TaskError> {
        let url = format!("{}?ref={}", self.contents_url(dir), self.branch);
        let response = self.request(Method::GET, &url).send()?;
        if response.status().as_u16() == 404 {
            return Ok(Vec::new());
        }
        if !response.status().is_success() {
            return Err(Self::api_error(response));
        }

        let entries: Vec<serde_json::Value> = response.json()?;
        Ok(entries
            .iter()
            .filter_map(|entry| entry.get("name").and_then(|n| n.as_str()))
            .map(String::from)
            .collect())
    }

    fn read_file(&self, path: &str) -> Result<Option<FileContent>, TaskError> {
        let url = format!("{}?ref={}", self.contents_url(path), self.branch);
        let response = self.request(Method::GET, &url).send()?;
        if response.status().as_u16() == 404 {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Self::api_error(response));
        }

        let file: GitHubFile = response.json()?;
        // The API wraps base64 payloads across lines.
        let packed: String = file.content.chars().filter(|c| !c.is_whitespace()).collect();
        let bytes = BASE64
            .decode(packed.as_bytes())
            .map_err(|err| TaskError::Decode(format!("{path}: {err}")))?;
        let content = String::from_utf8(bytes)
            .map_err(|err| TaskError::Decode(format!("{path}: {err}")))?;

        Ok(Some(FileContent {
            content,
            sha: file.sha,
        }))
    }

    fn write_file(
        &self,
        path: &str,
        content: &str,
        message: &str,
        sha: Option<&str>,
    ) -> Result<(), TaskError> {
        let mut payload = serde_json::json!({
            "message": message,
            "content": BASE64.encode(content.as_bytes()),
            "branch": self.branch,
        });
        if let Some(sha) = sha {
            payload["sha"] = serde_json::Value::String(sha.to_string());
        }

        let response = self
            .request(Method::PUT, &self.contents_url(path))
            .json(&payload)
            .send()?;
        if !response.status().is_success() {
            return Err(Self::api_error(response));
        }
        Ok(())
    }

    fn delete_file(&self, path: &str, message: &str, sha: &str) -> Result<(), TaskError> {
        let payload = serde_json::json!({
            "message": message,
            "sha": sha,
            "branch": self.branch,
        });

        let response = self
            .request(Method::DELETE, &self.contents_url(path))
            .json(&payload)
            .send()?;
        if !response.status().is_success() {
            return Err(Self::api_error(response));
        }
        Ok(())
    }
}

/// `git@github.com:owner/repo.git` or `https://github.com/owner/repo.git`.
pub(crate) fn parse_github_remote(remote: &str) -> Option<(String, String)> {
    let remote = remote.trim().trim_end_matches(".git");
    let rest = remote
        .strip_prefix("git@github.com:")
        .or_else(|| remote.split_once("github.com/").map(|(_, rest)| rest))?;
    let (owner, repo) = rest.split_once('/')?;
    if owner.is_empty() || repo.is_empty() || repo.contains('/') {
        return None;
    }
    Some((owner.to_string(), repo.to_string()))
}
