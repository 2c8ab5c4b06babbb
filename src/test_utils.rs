//! Shared fixtures: a canned repository, pull request and maintainer
//! snapshot, plus an in-memory forge with builder methods for the few
//! lookups tests care about.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use pullgate_data::{
    BranchComparison, CombinedStatus, Comment, Commit, CommitFile, CommitStatus, DeploymentInfo,
    Issue, Login, Person, PullRequest, Repo, Review, Tag,
};

use crate::approval::{ApprovalRequest, ResolvedPolicy};
use crate::config::{ApprovalPolicy, Config};
use crate::ctx::Ctx;
use crate::feedback::Feedback;
use crate::forge::{Capabilities, Forge, MergeMethod};
use crate::snapshot::MaintainerSnapshot;

pub fn test_repo() -> Repo {
    Repo::new("octo", "widgets", true)
}

pub fn test_ctx() -> Ctx {
    Ctx::new(test_repo())
}

pub fn pull_request(number: u32, author: &str) -> PullRequest {
    PullRequest {
        number,
        title: "Update the frobnicator".to_string(),
        body: String::new(),
        author: Login::new(author),
        branch: pullgate_data::Branch {
            base_name: "master".to_string(),
            base_sha: "base".to_string(),
            compare_name: "feature".to_string(),
            compare_sha: "head".to_string(),
            compare_owner: "octo".to_string(),
            mergeable: true,
            merged: false,
            merge_commit_sha: None,
        },
    }
}

fn test_snapshot() -> MaintainerSnapshot {
    let mut snapshot = MaintainerSnapshot::default();
    snapshot.people.insert(
        Login::new("alice"),
        Person {
            name: "Alice Smith".to_string(),
            email: "alice@example.com".to_string(),
            login: "alice".to_string(),
        },
    );
    snapshot.people.insert(
        Login::new("bob"),
        Person {
            login: "bob".to_string(),
            ..Person::default()
        },
    );
    snapshot.people.insert(
        Login::new("octocat"),
        Person {
            login: "octocat".to_string(),
            ..Person::default()
        },
    );
    snapshot
}

/// A request with the default policy, the canned snapshot and no
/// feedback. Tests override the fields they exercise.
pub fn approval_request() -> ApprovalRequest {
    let config = Config::default();
    let policy = ApprovalPolicy::default();
    ApprovalRequest {
        repo: test_repo(),
        pull_request: pull_request(1, "octocat"),
        snapshot: Arc::new(test_snapshot()),
        policy: ResolvedPolicy::resolve(&config, &policy),
        issues: Vec::new(),
        files: Vec::new(),
        commits: Vec::new(),
        approval_feedback: Vec::new(),
        disapproval_feedback: Vec::new(),
    }
}

pub fn comment_feedback(author: &str, body: &str) -> Feedback {
    Feedback::Comment(Comment {
        author: Login::new(author),
        body: body.to_string(),
        submitted_at: Utc::now(),
    })
}

fn people(logins: &[String]) -> Vec<Person> {
    logins
        .iter()
        .map(|login| Person {
            login: login.clone(),
            ..Person::default()
        })
        .collect()
}

/// A forge that answers from in-memory tables. Lookups with no seeded
/// data return empty results; mutations succeed and are discarded.
#[derive(Default)]
pub struct FakeForge {
    org_members: HashMap<String, Vec<String>>,
    team_members: HashMap<(String, String), Vec<String>>,
    teams: HashMap<String, Vec<String>>,
    statuses: HashMap<String, Vec<CommitStatus>>,
    pulls: HashMap<String, Vec<PullRequest>>,
    failing_files: HashSet<u32>,
}

impl FakeForge {
    pub fn with_org_members(mut self, org: &str, logins: &[&str]) -> Self {
        self.org_members
            .insert(org.to_string(), logins.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn with_team_members(mut self, org: &str, team: &str, logins: &[&str]) -> Self {
        self.team_members.insert(
            (org.to_string(), team.to_string()),
            logins.iter().map(|s| s.to_string()).collect(),
        );
        self
    }

    pub fn with_teams(mut self, org: &str, names: &[&str]) -> Self {
        self.teams
            .insert(org.to_string(), names.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn with_pull_for_commit(mut self, sha: &str, pr: PullRequest) -> Self {
        self.pulls.entry(sha.to_string()).or_default().push(pr);
        self
    }

    /// Makes the file listing for one pull request fail.
    pub fn with_failing_files(mut self, number: u32) -> Self {
        self.failing_files.insert(number);
        self
    }

    pub fn with_status(mut self, sha: &str, context: &str, state: pullgate_data::StatusState) -> Self {
        self.statuses.entry(sha.to_string()).or_default().push(CommitStatus {
            state,
            context: context.to_string(),
            description: String::new(),
        });
        self
    }
}

impl Forge for FakeForge {
    fn capabilities(&self) -> anyhow::Result<Capabilities> {
        Ok(Capabilities::allow_all())
    }

    fn get_person(&self, _ctx: &Ctx, login: &str) -> anyhow::Result<Person> {
        Ok(Person {
            login: login.to_lowercase(),
            ..Person::default()
        })
    }

    fn get_org_members(&self, _ctx: &Ctx, org: &str) -> anyhow::Result<Vec<Person>> {
        Ok(people(
            self.org_members.get(org).map(Vec::as_slice).unwrap_or(&[]),
        ))
    }

    fn get_collaborators(&self, _ctx: &Ctx, _owner: &str, _name: &str) -> anyhow::Result<Vec<Person>> {
        Ok(Vec::new())
    }

    fn get_team_members(&self, _ctx: &Ctx, org: &str, team: &str) -> anyhow::Result<Vec<Person>> {
        Ok(people(
            self.team_members
                .get(&(org.to_string(), team.to_string()))
                .map(Vec::as_slice)
                .unwrap_or(&[]),
        ))
    }

    fn list_teams(&self, _ctx: &Ctx, org: &str) -> anyhow::Result<Vec<String>> {
        Ok(self.teams.get(org).cloned().unwrap_or_default())
    }

    fn get_repo(&self, _ctx: &Ctx, owner: &str, name: &str) -> anyhow::Result<Repo> {
        Ok(Repo::new(owner, name, true))
    }

    fn get_contents(&self, _ctx: &Ctx, repo: &Repo, path: &str) -> anyhow::Result<Vec<u8>> {
        Err(crate::error::not_found(format!(
            "no file {path} in {}",
            repo.slug
        )))
    }

    fn get_pull_request(&self, _ctx: &Ctx, _repo: &Repo, number: u32) -> anyhow::Result<PullRequest> {
        Ok(pull_request(number, "octocat"))
    }

    fn get_pull_request_files(
        &self,
        _ctx: &Ctx,
        _repo: &Repo,
        number: u32,
    ) -> anyhow::Result<Vec<CommitFile>> {
        if self.failing_files.contains(&number) {
            return Err(crate::error::not_found(format!(
                "no files for pull request {number}"
            )));
        }
        Ok(Vec::new())
    }

    fn get_pull_request_commits(
        &self,
        _ctx: &Ctx,
        _repo: &Repo,
        _number: u32,
    ) -> anyhow::Result<Vec<Commit>> {
        Ok(Vec::new())
    }

    fn get_pull_requests_for_commit(
        &self,
        _ctx: &Ctx,
        _repo: &Repo,
        sha: &str,
    ) -> anyhow::Result<Vec<PullRequest>> {
        Ok(self.pulls.get(sha).cloned().unwrap_or_default())
    }

    fn merge_pull_request(
        &self,
        _ctx: &Ctx,
        _repo: &Repo,
        _pr: &PullRequest,
        _message: &str,
        _method: MergeMethod,
    ) -> anyhow::Result<String> {
        Ok("merged".to_string())
    }

    fn compare_branches(
        &self,
        _ctx: &Ctx,
        _repo: &Repo,
        _base: &str,
        _head: &str,
    ) -> anyhow::Result<BranchComparison> {
        Ok(BranchComparison::default())
    }

    fn delete_branch(&self, _ctx: &Ctx, _repo: &Repo, _branch: &str) -> anyhow::Result<()> {
        Ok(())
    }

    fn get_commit(&self, _ctx: &Ctx, _repo: &Repo, sha: &str) -> anyhow::Result<Commit> {
        Ok(Commit {
            sha: sha.to_string(),
            author: Login::new("octocat"),
            committer: "Octo Cat".to_string(),
            message: String::new(),
            parents: Vec::new(),
        })
    }

    fn list_commits(
        &self,
        _ctx: &Ctx,
        _repo: &Repo,
        _branch: &str,
        _limit: usize,
    ) -> anyhow::Result<Vec<Commit>> {
        Ok(Vec::new())
    }

    fn create_empty_commit(
        &self,
        _ctx: &Ctx,
        _repo: &Repo,
        _sha: &str,
        _message: &str,
    ) -> anyhow::Result<String> {
        Ok("empty".to_string())
    }

    fn create_reference(&self, _ctx: &Ctx, _repo: &Repo, _sha: &str, _name: &str) -> anyhow::Result<()> {
        Ok(())
    }

    fn create_pull_request(
        &self,
        _ctx: &Ctx,
        _repo: &Repo,
        _base: &str,
        _head: &str,
        title: &str,
        _body: &str,
    ) -> anyhow::Result<PullRequest> {
        let mut pr = pull_request(99, "octocat");
        pr.title = title.to_string();
        Ok(pr)
    }

    fn compare_url(&self, repo: &Repo, from: &str, to: &str) -> String {
        format!("https://github.test/{}/compare/{from}...{to}", repo.slug)
    }

    fn list_tags(&self, _ctx: &Ctx, _repo: &Repo) -> anyhow::Result<Vec<Tag>> {
        Ok(Vec::new())
    }

    fn tag(&self, _ctx: &Ctx, _repo: &Repo, _tag: &Tag, _sha: &str) -> anyhow::Result<()> {
        Ok(())
    }

    fn get_status(&self, _ctx: &Ctx, _repo: &Repo, sha: &str) -> anyhow::Result<CombinedStatus> {
        let mut combined = CombinedStatus {
            sha: sha.to_string(),
            statuses: Default::default(),
        };
        for status in self.statuses.get(sha).into_iter().flatten() {
            combined
                .statuses
                .insert(status.context.clone(), status.clone());
        }
        Ok(combined)
    }

    fn has_required_status(
        &self,
        _ctx: &Ctx,
        _repo: &Repo,
        _branch: &str,
        _sha: &str,
    ) -> anyhow::Result<bool> {
        Ok(true)
    }

    fn set_status(
        &self,
        _ctx: &Ctx,
        _repo: &Repo,
        _sha: &str,
        _status: &CommitStatus,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    fn get_all_comments(&self, _ctx: &Ctx, _repo: &Repo, _number: u32) -> anyhow::Result<Vec<Comment>> {
        Ok(Vec::new())
    }

    fn get_comments_since_head(
        &self,
        _ctx: &Ctx,
        _repo: &Repo,
        _number: u32,
        _ignore_ui_merge: bool,
    ) -> anyhow::Result<Vec<Comment>> {
        Ok(Vec::new())
    }

    fn get_all_reviews(&self, _ctx: &Ctx, _repo: &Repo, _number: u32) -> anyhow::Result<Vec<Review>> {
        Ok(Vec::new())
    }

    fn get_reviews_since_head(
        &self,
        _ctx: &Ctx,
        _repo: &Repo,
        _number: u32,
        _ignore_ui_merge: bool,
    ) -> anyhow::Result<Vec<Review>> {
        Ok(Vec::new())
    }

    fn write_comment(&self, _ctx: &Ctx, _repo: &Repo, _number: u32, _body: &str) -> anyhow::Result<()> {
        Ok(())
    }

    fn is_head_ui_merge(&self, _ctx: &Ctx, _repo: &Repo, _number: u32) -> anyhow::Result<bool> {
        Ok(false)
    }

    fn get_issue(&self, _ctx: &Ctx, _repo: &Repo, number: u32) -> anyhow::Result<Issue> {
        Ok(Issue {
            number,
            title: String::new(),
            author: Login::new("octocat"),
        })
    }

    fn schedule_deployment(
        &self,
        _ctx: &Ctx,
        _repo: &Repo,
        _deployment: &DeploymentInfo,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}
