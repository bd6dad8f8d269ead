//! Repository identity extraction from clone URLs

use regex::Regex;
use std::sync::LazyLock;

use crate::error::{HookError, Result};

static REPO_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^.*/([^/]+)/([^/]+)\.git$").expect("repository url pattern is valid")
});

/// Owner (user, group or project key) and repository name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoId {
    pub owner: String,
    pub name: String,
}

impl RepoId {
    /// `owner/name`, the form GitLab expects as an encoded project id
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

/// Parse `.../<owner>/<repo>.git` into its trailing owner and repository name.
/// Anything without that exact trailing shape is a parse error.
pub fn parse_repo_url(repo_url: &str) -> Result<RepoId> {
    let caps = REPO_URL.captures(repo_url).ok_or_else(|| {
        HookError::Parse(format!(
            "error getting owner/repo from repository url: {}",
            repo_url
        ))
    })?;
    Ok(RepoId {
        owner: caps[1].to_string(),
        name: caps[2].to_string(),
    })
}
