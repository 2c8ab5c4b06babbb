//! Domain model shared by the pullgate service: pull requests, feedback,
//! commits, statuses and the people that show up in MAINTAINERS files.
//!
//! Everything in this crate is plain data. Behavior lives in the `pullgate`
//! crate; the forge client maps wire payloads into these types.

use std::borrow::Borrow;
use std::fmt;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};

/// A case-folded forge login. The forge treats logins case-insensitively,
/// so every login is stored lowercase and comparisons are exact.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Login(String);

impl Login {
    pub fn new(raw: &str) -> Self {
        Login(raw.to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Login {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Login {
    fn from(raw: &str) -> Self {
        Login::new(raw)
    }
}

impl From<String> for Login {
    fn from(raw: String) -> Self {
        if raw.chars().any(|c| c.is_uppercase()) {
            Login(raw.to_lowercase())
        } else {
            Login(raw)
        }
    }
}

impl Borrow<str> for Login {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for Login {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Login::from(raw))
    }
}

/// An individual from the MAINTAINERS file or expanded from a group.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Person {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub login: String,
}

/// A monitored repository. `slug` is `owner/name` and unique per host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Repo {
    pub owner: String,
    pub name: String,
    pub slug: String,
    /// True when the owner is an organization rather than a user.
    pub org: bool,
    #[serde(default)]
    pub private: bool,
}

impl Repo {
    pub fn new(owner: &str, name: &str, org: bool) -> Self {
        Repo {
            owner: owner.to_string(),
            name: name.to_string(),
            slug: format!("{owner}/{name}"),
            org,
            private: false,
        }
    }
}

/// The branch pair of a pull request. The compare branch carries the
/// changes, the base branch is where they land.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Branch {
    pub base_name: String,
    pub base_sha: String,
    pub compare_name: String,
    pub compare_sha: String,
    pub compare_owner: String,
    pub mergeable: bool,
    pub merged: bool,
    #[serde(default)]
    pub merge_commit_sha: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: u32,
    pub title: String,
    #[serde(default)]
    pub body: String,
    pub author: Login,
    pub branch: Branch,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub number: u32,
    pub title: String,
    pub author: Login,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub author: Login,
    pub body: String,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewState {
    Approved,
    ChangesRequested,
    Commented,
    Dismissed,
    Pending,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    pub id: u64,
    pub author: Login,
    #[serde(default)]
    pub body: String,
    pub submitted_at: DateTime<Utc>,
    pub state: ReviewState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commit {
    pub sha: String,
    pub author: Login,
    /// Display name of the committer, not a login. The forge web UI
    /// commits under a well-known name.
    pub committer: String,
    pub message: String,
    pub parents: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitFile {
    pub filename: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusState {
    Pending,
    Success,
    Error,
    Failure,
}

impl fmt::Display for StatusState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            StatusState::Pending => "pending",
            StatusState::Success => "success",
            StatusState::Error => "error",
            StatusState::Failure => "failure",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitStatus {
    pub state: StatusState,
    pub context: String,
    #[serde(default)]
    pub description: String,
}

/// All statuses attached to one commit, keyed by context.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CombinedStatus {
    pub sha: String,
    pub statuses: IndexMap<String, CommitStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tag(pub String);

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of comparing the compare branch against its base.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BranchComparison {
    pub ahead_by: u32,
    pub behind_by: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentInfo {
    pub reference: String,
    #[serde(default)]
    pub task: Option<String>,
    #[serde(default)]
    pub environment: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_is_case_folded() {
        assert_eq!(Login::new("OctoCat"), Login::new("octocat"));
        assert_eq!(Login::from("MiXeD".to_string()).as_str(), "mixed");
    }

    #[test]
    fn repo_slug() {
        let repo = Repo::new("acme", "widgets", true);
        assert_eq!(repo.slug, "acme/widgets");
    }
}
