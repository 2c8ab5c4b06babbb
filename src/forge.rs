//! The interface to the code hosting platform. Everything the engine
//! needs from the outside world goes through this trait so tests can
//! substitute an in-memory implementation.

use pullgate_data::{
    BranchComparison, CombinedStatus, Comment, Commit, CommitFile, CommitStatus, DeploymentInfo,
    Issue, Person, PullRequest, Repo, Review, Tag,
};
use serde::{Deserialize, Serialize};

use crate::ctx::Ctx;

/// What the authenticated token is allowed to do. Configuration
/// validation rejects features the token cannot deliver.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub org: OrgCapabilities,
    pub repo: RepoCapabilities,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrgCapabilities {
    pub read: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoCapabilities {
    pub tag: bool,
    pub merge: bool,
    pub delete_branch: bool,
    pub commit_status: bool,
    pub pr_write_comment: bool,
    pub deployment_status: bool,
}

impl Capabilities {
    pub fn allow_all() -> Capabilities {
        Capabilities {
            org: OrgCapabilities { read: true },
            repo: RepoCapabilities {
                tag: true,
                merge: true,
                delete_branch: true,
                commit_status: true,
                pr_write_comment: true,
                deployment_status: true,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeMethod {
    Merge,
    Squash,
    Rebase,
}

impl MergeMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            MergeMethod::Merge => "merge",
            MergeMethod::Squash => "squash",
            MergeMethod::Rebase => "rebase",
        }
    }
}

pub trait Forge: Send + Sync {
    fn capabilities(&self) -> anyhow::Result<Capabilities>;

    // people and groups
    fn get_person(&self, ctx: &Ctx, login: &str) -> anyhow::Result<Person>;
    fn get_org_members(&self, ctx: &Ctx, org: &str) -> anyhow::Result<Vec<Person>>;
    fn get_collaborators(&self, ctx: &Ctx, owner: &str, name: &str) -> anyhow::Result<Vec<Person>>;
    fn get_team_members(&self, ctx: &Ctx, org: &str, team: &str) -> anyhow::Result<Vec<Person>>;
    fn list_teams(&self, ctx: &Ctx, org: &str) -> anyhow::Result<Vec<String>>;

    // repository metadata and contents
    fn get_repo(&self, ctx: &Ctx, owner: &str, name: &str) -> anyhow::Result<Repo>;
    fn get_contents(&self, ctx: &Ctx, repo: &Repo, path: &str) -> anyhow::Result<Vec<u8>>;

    // pull request lifecycle
    fn get_pull_request(&self, ctx: &Ctx, repo: &Repo, number: u32)
        -> anyhow::Result<PullRequest>;
    fn get_pull_request_files(
        &self,
        ctx: &Ctx,
        repo: &Repo,
        number: u32,
    ) -> anyhow::Result<Vec<CommitFile>>;
    fn get_pull_request_commits(
        &self,
        ctx: &Ctx,
        repo: &Repo,
        number: u32,
    ) -> anyhow::Result<Vec<Commit>>;
    fn get_pull_requests_for_commit(
        &self,
        ctx: &Ctx,
        repo: &Repo,
        sha: &str,
    ) -> anyhow::Result<Vec<PullRequest>>;
    /// Merges the pull request and returns the merge commit SHA.
    fn merge_pull_request(
        &self,
        ctx: &Ctx,
        repo: &Repo,
        pr: &PullRequest,
        message: &str,
        method: MergeMethod,
    ) -> anyhow::Result<String>;
    fn compare_branches(
        &self,
        ctx: &Ctx,
        repo: &Repo,
        base: &str,
        head: &str,
    ) -> anyhow::Result<BranchComparison>;
    fn delete_branch(&self, ctx: &Ctx, repo: &Repo, branch: &str) -> anyhow::Result<()>;

    // commits, refs and tags
    fn get_commit(&self, ctx: &Ctx, repo: &Repo, sha: &str) -> anyhow::Result<Commit>;
    fn list_commits(
        &self,
        ctx: &Ctx,
        repo: &Repo,
        branch: &str,
        limit: usize,
    ) -> anyhow::Result<Vec<Commit>>;
    /// Creates an empty commit on top of `sha` and returns its SHA.
    fn create_empty_commit(
        &self,
        ctx: &Ctx,
        repo: &Repo,
        sha: &str,
        message: &str,
    ) -> anyhow::Result<String>;
    fn create_reference(&self, ctx: &Ctx, repo: &Repo, sha: &str, name: &str)
        -> anyhow::Result<()>;
    fn create_pull_request(
        &self,
        ctx: &Ctx,
        repo: &Repo,
        base: &str,
        head: &str,
        title: &str,
        body: &str,
    ) -> anyhow::Result<PullRequest>;
    /// Web URL comparing two commits, for human-readable messages.
    fn compare_url(&self, repo: &Repo, from: &str, to: &str) -> String;
    fn list_tags(&self, ctx: &Ctx, repo: &Repo) -> anyhow::Result<Vec<Tag>>;
    fn tag(&self, ctx: &Ctx, repo: &Repo, tag: &Tag, sha: &str) -> anyhow::Result<()>;

    // commit statuses
    fn get_status(&self, ctx: &Ctx, repo: &Repo, sha: &str) -> anyhow::Result<CombinedStatus>;
    fn has_required_status(
        &self,
        ctx: &Ctx,
        repo: &Repo,
        branch: &str,
        sha: &str,
    ) -> anyhow::Result<bool>;
    fn set_status(
        &self,
        ctx: &Ctx,
        repo: &Repo,
        sha: &str,
        status: &CommitStatus,
    ) -> anyhow::Result<()>;

    // feedback
    fn get_all_comments(&self, ctx: &Ctx, repo: &Repo, number: u32)
        -> anyhow::Result<Vec<Comment>>;
    fn get_comments_since_head(
        &self,
        ctx: &Ctx,
        repo: &Repo,
        number: u32,
        ignore_ui_merge: bool,
    ) -> anyhow::Result<Vec<Comment>>;
    fn get_all_reviews(&self, ctx: &Ctx, repo: &Repo, number: u32) -> anyhow::Result<Vec<Review>>;
    fn get_reviews_since_head(
        &self,
        ctx: &Ctx,
        repo: &Repo,
        number: u32,
        ignore_ui_merge: bool,
    ) -> anyhow::Result<Vec<Review>>;
    fn write_comment(&self, ctx: &Ctx, repo: &Repo, number: u32, body: &str) -> anyhow::Result<()>;
    fn is_head_ui_merge(&self, ctx: &Ctx, repo: &Repo, number: u32) -> anyhow::Result<bool>;

    // issues and deployments
    fn get_issue(&self, ctx: &Ctx, repo: &Repo, number: u32) -> anyhow::Result<Issue>;
    fn schedule_deployment(
        &self,
        ctx: &Ctx,
        repo: &Repo,
        deployment: &DeploymentInfo,
    ) -> anyhow::Result<()>;
}
