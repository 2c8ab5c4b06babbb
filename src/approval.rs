//! Approval decisions for one pull request: resolve the active policy,
//! gather feedback, evaluate the matchers and produce the commit
//! status that gates the merge.

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::Context as _;
use pullgate_data::{Commit, CommitFile, CommitStatus, Issue, Login, PullRequest, Repo, StatusState};

use crate::config::{ApprovalPolicy, Config, FeedbackConfig, MergeConfig, TagConfig};
use crate::ctx::Ctx;
use crate::feedback::{self, Feedback};
use crate::forge::Forge;
use crate::matcher::eval::{approve, ApprovalOp};
use crate::matcher::Matcher;
use crate::rx::Pattern;
use crate::snapshot::MaintainerSnapshot;
use crate::{audit, scope, SERVICE_TITLE};

pub const AUTHOR_AFFIRM_MSG: &str = "Someone besides the committers and the PR author \
    should approve the pull request. If this is not possible, the PR author can approve \
    to indicate they have reviewed the other commits in the PR. The PR author must \
    approve with a comment directly on the PR.";

/// An approval policy with every global fallback already applied, so
/// evaluation never needs to look back at the configuration.
#[derive(Debug, Clone)]
pub struct ResolvedPolicy {
    pub name: String,
    pub position: usize,
    pub matcher: Matcher,
    pub anti_matcher: Matcher,
    pub author_matcher: Matcher,
    pub pattern: Pattern,
    pub anti_pattern: Option<Pattern>,
    pub anti_title: Option<Pattern>,
    pub merge: MergeConfig,
    pub tag: TagConfig,
    pub feedback: FeedbackConfig,
}

impl ResolvedPolicy {
    pub fn resolve(config: &Config, policy: &ApprovalPolicy) -> ResolvedPolicy {
        ResolvedPolicy {
            name: policy.name.clone(),
            position: policy.position,
            matcher: policy.matcher.clone(),
            anti_matcher: policy.anti_matcher.clone(),
            author_matcher: policy.author_matcher.clone(),
            pattern: config.pattern(policy).clone(),
            anti_pattern: config.anti_pattern(policy).cloned(),
            anti_title: config.anti_title(policy).cloned(),
            merge: config.merge_config(policy).clone(),
            tag: config.tag_config(policy).clone(),
            feedback: config.feedback_config(policy).clone(),
        }
    }

    /// Display name for status descriptions and audit messages.
    pub fn label(&self) -> String {
        if self.name.is_empty() {
            format!("policy {}", self.position)
        } else {
            self.name.clone()
        }
    }
}

/// Everything the matcher evaluation reads. The snapshot is shared
/// because lazy organizations memoize inside it.
#[derive(Clone)]
pub struct ApprovalRequest {
    pub repo: Repo,
    pub pull_request: PullRequest,
    pub snapshot: Arc<MaintainerSnapshot>,
    pub policy: ResolvedPolicy,
    pub issues: Vec<Issue>,
    pub files: Vec<CommitFile>,
    pub commits: Vec<Commit>,
    pub approval_feedback: Vec<Feedback>,
    pub disapproval_feedback: Vec<Feedback>,
}

impl ApprovalRequest {
    pub fn is_title_blocked(&self) -> bool {
        self.policy
            .anti_title
            .as_ref()
            .is_some_and(|rx| rx.is_match(&self.pull_request.title))
    }
}

/// What the most recent feedback did, for comment notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedbackOutcome {
    NoChange,
    Approval(Login),
    Disapproval(Login),
    BlockedAuthor,
    BlockedTitle,
    BlockedAudit,
}

#[derive(Debug, Clone)]
pub struct ApprovalInfo {
    pub policy: ResolvedPolicy,
    pub approved: bool,
    /// The author is allowed to submit pull requests at all.
    pub author_approved: bool,
    /// The author has affirmed ownership of commits they did not write.
    pub author_affirmed: bool,
    pub title_approved: bool,
    pub audit_approved: bool,
    pub approvers: BTreeSet<Login>,
    pub disapprovers: BTreeSet<Login>,
    pub outcome: FeedbackOutcome,
}

/// Fetches everything about the pull request and evaluates its
/// approval state.
pub fn build_approvers(
    forge: &dyn Forge,
    ctx: &Ctx,
    config: &Config,
    snapshot: Arc<MaintainerSnapshot>,
    pr: &PullRequest,
) -> anyhow::Result<ApprovalInfo> {
    let repo = &ctx.repo;
    let files = forge
        .get_pull_request_files(ctx, repo, pr.number)
        .with_context(|| format!("error retrieving files for {} pr {}", repo.slug, pr.number))?;
    let commits = forge
        .get_pull_request_commits(ctx, repo, pr.number)
        .with_context(|| format!("error retrieving commits for {} pr {}", repo.slug, pr.number))?;
    let policy = scope::find_approval_policy(config, &pr.branch, &files);
    let ranges = feedback::collect_ranges(forge, ctx, repo, config, &policy, pr.number)?;
    let issues = feedback::harvest_issues(forge, ctx, repo, pr, &ranges.all);

    let request = ApprovalRequest {
        repo: repo.clone(),
        pull_request: pr.clone(),
        snapshot,
        policy: ResolvedPolicy::resolve(config, &policy),
        issues,
        files,
        commits,
        approval_feedback: ranges.approval,
        disapproval_feedback: ranges.disapproval,
    };

    let audit_ok = if audit::requires_audit(config, pr) {
        audit::test_audit(forge, ctx, repo, pr)?
    } else {
        true
    };
    evaluate(&request, audit_ok)
}

pub fn evaluate(request: &ApprovalRequest, audit_ok: bool) -> anyhow::Result<ApprovalInfo> {
    let mut approvers = BTreeSet::new();
    let mut disapprovers = BTreeSet::new();
    let mut valid_author = false;
    let mut valid_title = false;

    let mut approved = approve(request, &mut |f, op| {
        let author = f.author().clone();
        match op {
            ApprovalOp::Approval => {
                approvers.insert(author);
            }
            ApprovalOp::DisapprovalInsert => {
                disapprovers.insert(author);
            }
            ApprovalOp::DisapprovalRemove => {
                disapprovers.remove(&author);
            }
            ApprovalOp::ValidAuthor => valid_author = true,
            ApprovalOp::ValidTitle => valid_title = true,
        }
    })?;

    // the affirm gate only applies once enough approvals are in
    let affirmed = if !approved {
        true
    } else if author_affirmed(request) {
        true
    } else {
        let mut stripped = request.clone();
        for commit in &request.commits {
            stripped
                .approval_feedback
                .retain(|f| *f.author() != commit.author);
        }
        approvers.clear();
        approve(&stripped, &mut |f, op| {
            if op == ApprovalOp::Approval {
                approvers.insert(f.author().clone());
            }
        })?
    };
    approved = approved && audit_ok && affirmed;

    let mut info = ApprovalInfo {
        policy: request.policy.clone(),
        approved,
        author_approved: valid_author,
        author_affirmed: affirmed,
        title_approved: valid_title,
        audit_approved: audit_ok,
        approvers,
        disapprovers,
        outcome: FeedbackOutcome::NoChange,
    };

    if !audit_ok {
        info.outcome = FeedbackOutcome::BlockedAudit;
    } else if !valid_title {
        // the title gate runs before the author gate, so report it first
        info.outcome = FeedbackOutcome::BlockedTitle;
    } else if !valid_author {
        info.outcome = FeedbackOutcome::BlockedAuthor;
    } else if !request.approval_feedback.is_empty() && !request.disapproval_feedback.is_empty() {
        // replay only the newest feedback to see what it changed
        let mut lookback = request.clone();
        lookback.approval_feedback = request.approval_feedback[request.approval_feedback.len() - 1..].to_vec();
        lookback.disapproval_feedback =
            request.disapproval_feedback[request.disapproval_feedback.len() - 1..].to_vec();
        approve(&lookback, &mut |f, op| match op {
            ApprovalOp::Approval => {
                info.outcome = FeedbackOutcome::Approval(f.author().clone());
            }
            ApprovalOp::DisapprovalInsert => {
                info.outcome = FeedbackOutcome::Disapproval(f.author().clone());
            }
            _ => {}
        })?;
    }

    Ok(info)
}

/// The forge web UI commits merges under well-known committer names.
fn is_system_committer(committer: &str) -> bool {
    committer == "GitHub" || committer == "GitHub Enterprise"
}

fn author_affirmed(request: &ApprovalRequest) -> bool {
    if !request.policy.feedback.author_affirm {
        return true;
    }
    for commit in &request.commits {
        if commit.parents.len() == 2 && is_system_committer(&commit.committer) {
            continue;
        }
        if commit.author != request.pull_request.author {
            return author_approved(request);
        }
    }
    true
}

fn author_approved(request: &ApprovalRequest) -> bool {
    request
        .approval_feedback
        .iter()
        .any(|f| *f.author() == request.pull_request.author && f.is_approval(request))
}

fn print_logins(logins: &BTreeSet<Login>) -> String {
    logins
        .iter()
        .map(Login::as_str)
        .collect::<Vec<_>>()
        .join(",")
}

/// The commit status summarizing the approval state.
pub fn generate_status(info: &ApprovalInfo) -> (StatusState, String) {
    if info.approved {
        let desc = if info.approvers.is_empty() {
            "approval did not require approvers".to_string()
        } else {
            format!("approved by {}", print_logins(&info.approvers))
        };
        return (StatusState::Success, desc);
    }
    if !info.author_affirmed {
        return (
            StatusState::Error,
            "non-committer or PR author must approve".to_string(),
        );
    }
    if !info.audit_approved {
        return (
            StatusState::Error,
            "audit chain must be manually approved".to_string(),
        );
    }
    if !info.title_approved {
        return (
            StatusState::Error,
            "pull request title is blocking merge".to_string(),
        );
    }
    if !info.author_approved {
        return (StatusState::Error, "pull request author not allowed".to_string());
    }
    let desc = if !info.disapprovers.is_empty() {
        format!("blocked by {}", print_logins(&info.disapprovers))
    } else if !info.approvers.is_empty() {
        format!(
            "more approvals needed. {}: {}",
            SERVICE_TITLE,
            print_logins(&info.approvers)
        )
    } else {
        "no approvals received".to_string()
    };
    (StatusState::Pending, desc)
}

pub fn status_for(info: &ApprovalInfo) -> CommitStatus {
    let (state, description) = generate_status(info);
    CommitStatus {
        state,
        context: crate::SERVICE_NAME.to_string(),
        description,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{approval_request, comment_feedback};

    #[test]
    fn quorum_of_two_requires_two_distinct_maintainers() {
        let mut req = approval_request();
        req.policy.matcher = "all[count=2]".parse().unwrap();
        req.approval_feedback = vec![
            comment_feedback("alice", "I approve"),
            comment_feedback("alice", "I approve"),
        ];
        let info = evaluate(&req, true).unwrap();
        assert!(!info.approved);
        assert_eq!(info.approvers.len(), 1);

        req.approval_feedback.push(comment_feedback("bob", "I approve"));
        let info = evaluate(&req, true).unwrap();
        assert!(info.approved);
        assert_eq!(info.approvers.len(), 2);
    }

    #[test]
    fn self_approval_can_be_disabled() {
        let mut req = approval_request();
        req.policy.matcher = "all[count=1,self=false]".parse().unwrap();
        req.approval_feedback = vec![comment_feedback("octocat", "I approve")];
        let info = evaluate(&req, true).unwrap();
        assert!(!info.approved);
    }

    #[test]
    fn later_approval_cancels_disapproval() {
        let mut req = approval_request();
        req.policy.anti_pattern = Some("(?i)^I do not approve".parse().unwrap());
        req.disapproval_feedback = vec![
            comment_feedback("alice", "I do not approve"),
            comment_feedback("alice", "I approve"),
        ];
        req.approval_feedback = req.disapproval_feedback.clone();
        let info = evaluate(&req, true).unwrap();
        assert!(info.approved);
        assert!(info.disapprovers.is_empty());
    }

    #[test]
    fn standing_disapproval_blocks_the_merge() {
        let mut req = approval_request();
        req.policy.anti_pattern = Some("(?i)^I do not approve".parse().unwrap());
        req.disapproval_feedback = vec![comment_feedback("alice", "I do not approve")];
        req.approval_feedback = vec![comment_feedback("bob", "I approve")];
        let info = evaluate(&req, true).unwrap();
        assert!(!info.approved);
        assert_eq!(print_logins(&info.disapprovers), "alice");
        let (state, desc) = generate_status(&info);
        assert_eq!(state, StatusState::Pending);
        assert_eq!(desc, "blocked by alice");
    }

    #[test]
    fn blocked_title_reports_before_author() {
        let mut req = approval_request();
        req.policy.anti_title = Some("(?i)wip".parse().unwrap());
        req.pull_request.title = "WIP: do not merge".to_string();
        let info = evaluate(&req, true).unwrap();
        assert!(!info.approved);
        assert!(!info.title_approved);
        assert_eq!(info.outcome, FeedbackOutcome::BlockedTitle);
        let (state, desc) = generate_status(&info);
        assert_eq!(state, StatusState::Error);
        assert_eq!(desc, "pull request title is blocking merge");
    }

    #[test]
    fn unlisted_author_blocks_regardless_of_approvals() {
        let mut req = approval_request();
        req.policy.author_matcher = "{bob}".parse().unwrap();
        req.approval_feedback = vec![comment_feedback("alice", "I approve")];
        let info = evaluate(&req, true).unwrap();
        assert!(!info.approved);
        assert!(!info.author_approved);
        assert_eq!(info.outcome, FeedbackOutcome::BlockedAuthor);
        let (state, desc) = generate_status(&info);
        assert_eq!(state, StatusState::Error);
        assert_eq!(desc, "pull request author not allowed");
    }

    #[test]
    fn failed_audit_blocks_an_otherwise_approved_pull_request() {
        let mut req = approval_request();
        req.approval_feedback = vec![comment_feedback("alice", "I approve")];
        let info = evaluate(&req, false).unwrap();
        assert!(!info.approved);
        assert_eq!(info.outcome, FeedbackOutcome::BlockedAudit);
        let (state, desc) = generate_status(&info);
        assert_eq!(state, StatusState::Error);
        assert_eq!(desc, "audit chain must be manually approved");
    }

    #[test]
    fn no_feedback_yields_pending_status() {
        let req = approval_request();
        let info = evaluate(&req, true).unwrap();
        let (state, desc) = generate_status(&info);
        assert_eq!(state, StatusState::Pending);
        assert_eq!(desc, "no approvals received");
    }

    #[test]
    fn author_affirm_demands_author_signoff_for_foreign_commits() {
        let mut req = approval_request();
        req.policy.feedback.author_affirm = true;
        req.commits = vec![Commit {
            sha: "abc".to_string(),
            author: Login::from("alice"),
            committer: "alice".to_string(),
            message: "change".to_string(),
            parents: vec!["p1".to_string()],
        }];
        req.approval_feedback = vec![comment_feedback("alice", "I approve")];
        let info = evaluate(&req, true).unwrap();
        assert!(!info.approved);
        assert!(!info.author_affirmed);
        let (state, desc) = generate_status(&info);
        assert_eq!(state, StatusState::Error);
        assert_eq!(desc, "non-committer or PR author must approve");

        req.approval_feedback.push(comment_feedback("octocat", "I approve"));
        let info = evaluate(&req, true).unwrap();
        assert!(info.approved);
        assert!(info.author_affirmed);
    }
}
