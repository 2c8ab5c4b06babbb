//! Post-approval orchestration. When the combined status of a commit
//! turns green, every mergeable pull request containing that commit is
//! merged, tagged, its branch deleted and its deployments scheduled,
//! per the resolved policy. Failures on one pull request never block
//! the others.

pub mod tag;

use std::sync::Arc;

use anyhow::Result;
use indexmap::IndexMap;
use log::{debug, warn};
use pullgate_data::{Person, PullRequest, StatusState};
use serde::Serialize;

use crate::approval::{self, ApprovalRequest, ResolvedPolicy};
use crate::config::Config;
use crate::ctx::Ctx;
use crate::feedback;
use crate::forge::Forge;
use crate::notify::{MessageBatch, MessageKind, Notifier};
use crate::scope;
use crate::snapshot::MaintainerSnapshot;

/// Outcome for one pull request, keyed by PR number in the response.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatusResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(rename = "error", skip_serializing_if = "Option::is_none")]
    pub err: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info: Option<String>,
}

pub struct StatusEvent {
    pub sha: String,
    pub state: StatusState,
}

struct PrOutcome {
    result: StatusResponse,
    batch: MessageBatch,
}

impl PrOutcome {
    fn new(pr: &PullRequest, slug: &str) -> PrOutcome {
        PrOutcome {
            result: StatusResponse::default(),
            batch: MessageBatch::new(&pr.title, pr.number, slug),
        }
    }

    fn fail(&mut self, what: &str, err: &anyhow::Error) {
        warn!("{what}: {err:#}");
        self.result.err = Some(format!("{err:#}"));
        self.batch.push(MessageKind::Error, format!("{err:#}"));
    }

    fn skip(&mut self, info: &str) {
        self.result.info = Some(info.to_string());
    }
}

/// Handles a commit status event. Returns the per-pull-request merge
/// results.
pub fn process_status(
    forge: &dyn Forge,
    ctx: &Ctx,
    config: &Config,
    snapshot: Arc<MaintainerSnapshot>,
    notifier: &Notifier,
    event: &StatusEvent,
) -> Result<IndexMap<String, StatusResponse>> {
    let mut merged = IndexMap::new();
    if event.state != StatusState::Success {
        return Ok(merged);
    }
    let repo = &ctx.repo;
    debug!("looking up pull requests for commit {}", event.sha);
    let pull_requests = match forge.get_pull_requests_for_commit(ctx, repo, &event.sha) {
        Ok(prs) => prs,
        Err(err) => {
            notifier.send_error(ctx, config, "Unknown", 0, &repo.slug, &format!("{err:#}"));
            return Err(err);
        }
    };

    for pr in &pull_requests {
        if !pr.branch.mergeable {
            continue;
        }
        let mut outcome = PrOutcome::new(pr, &repo.slug);
        process_pull_request(forge, ctx, config, snapshot.clone(), pr, &mut outcome);
        merged.insert(pr.number.to_string(), outcome.result);
        notifier.send(ctx, config, &outcome.batch);
    }
    debug!("processed status for {}", repo.slug);
    Ok(merged)
}

fn process_pull_request(
    forge: &dyn Forge,
    ctx: &Ctx,
    config: &Config,
    snapshot: Arc<MaintainerSnapshot>,
    pr: &PullRequest,
    outcome: &mut PrOutcome,
) {
    let repo = &ctx.repo;
    let files = match forge.get_pull_request_files(ctx, repo, pr.number) {
        Ok(files) => files,
        Err(err) => return outcome.fail("unable to get pull request files", &err),
    };
    let policy = scope::find_approval_policy(config, &pr.branch, &files);
    let resolved = ResolvedPolicy::resolve(config, &policy);

    if !resolved.merge.enable {
        return outcome.skip("merge config not enabled");
    }

    match forge.has_required_status(ctx, repo, &pr.branch.base_name, &pr.branch.compare_sha) {
        Ok(true) => {}
        Ok(false) => return outcome.skip("required status checks are not passed"),
        Err(err) => return outcome.fail("unable to test commit statuses", &err),
    }

    if resolved.merge.up_to_date {
        match forge.compare_branches(ctx, repo, &pr.branch.base_name, &pr.branch.compare_name) {
            Ok(comparison) if comparison.behind_by > 0 => {
                return outcome.skip("compare branch is behind base branch");
            }
            Ok(_) => {}
            Err(err) => return outcome.fail("unable to compare branches", &err),
        }
    }

    let request = match build_request(forge, ctx, config, snapshot, pr, resolved) {
        Ok(request) => request,
        Err(err) => return outcome.fail("unable to evaluate pull request", &err),
    };

    let sha = match do_merge(forge, ctx, &request) {
        Ok(Some(sha)) => sha,
        Ok(None) => return outcome.skip("pull request is not approved"),
        Err(err) => return outcome.fail("unable to merge pull request", &err),
    };
    outcome.batch.push(MessageKind::Merge, "merged");
    outcome.result.sha = Some(sha.clone());

    match tag::tag_if_enabled(forge, ctx, &request, &sha) {
        Ok(Some(tag)) => {
            outcome.result.tag = Some(tag.to_string());
            outcome
                .batch
                .push(MessageKind::Tag, format!("Tag {tag} has been added"));
        }
        Ok(None) => {}
        Err(err) => return outcome.fail("unable to tag", &err),
    }

    if request.policy.merge.delete && pr.branch.compare_owner == repo.owner {
        if let Err(err) = forge.delete_branch(ctx, repo, &pr.branch.compare_name) {
            return outcome.fail("unable to delete merged branch", &err);
        }
        outcome.batch.push(
            MessageKind::Delete,
            format!("Branch {} has been deleted", pr.branch.compare_name),
        );
    }

    if config.deploy.enable {
        schedule_deployments(forge, ctx, config, &pr.branch.base_name);
        outcome.batch.push(
            MessageKind::Deploy,
            format!(
                "Deployment has been triggered from branch {}",
                pr.branch.base_name
            ),
        );
    }
}

fn build_request(
    forge: &dyn Forge,
    ctx: &Ctx,
    config: &Config,
    snapshot: Arc<MaintainerSnapshot>,
    pr: &PullRequest,
    resolved: ResolvedPolicy,
) -> Result<ApprovalRequest> {
    let repo = &ctx.repo;
    let files = forge.get_pull_request_files(ctx, repo, pr.number)?;
    let commits = forge.get_pull_request_commits(ctx, repo, pr.number)?;
    let policy = scope::find_approval_policy(config, &pr.branch, &files);
    let ranges = feedback::collect_ranges(forge, ctx, repo, config, &policy, pr.number)?;
    let issues = feedback::harvest_issues(forge, ctx, repo, pr, &ranges.all);
    Ok(ApprovalRequest {
        repo: repo.clone(),
        pull_request: pr.clone(),
        snapshot,
        policy: resolved,
        issues,
        files,
        commits,
        approval_feedback: ranges.approval,
        disapproval_feedback: ranges.disapproval,
    })
}

/// Re-evaluates the approval and merges with a commit message naming
/// the approvers and any comment harvested from the approval phrase.
/// Returns `None` when the pull request is not approved.
fn do_merge(forge: &dyn Forge, ctx: &Ctx, request: &ApprovalRequest) -> Result<Option<String>> {
    let info = approval::evaluate(request, true)?;
    if !info.approved {
        return Ok(None);
    }
    let mut approvers: Vec<Person> = Vec::new();
    for login in &info.approvers {
        match request.snapshot.people.get(login) {
            Some(person) => approvers.push(person.clone()),
            None => approvers.push(Person {
                login: login.to_string(),
                ..Person::default()
            }),
        }
    }
    let comment = tag::commit_comment(request)?;
    let message = merge_message(comment.as_deref(), &approvers);
    let sha = forge.merge_pull_request(
        ctx,
        &request.repo,
        &request.pull_request,
        &message,
        request.policy.merge.method,
    )?;
    Ok(Some(sha))
}

fn merge_message(comment: Option<&str>, approvers: &[Person]) -> String {
    let mut message = String::new();
    if let Some(comment) = comment {
        if !comment.is_empty() {
            message.push_str(comment);
            message.push('\n');
        }
    }
    message.push_str(&format!("Merged by {}\n", crate::SERVICE_TITLE));
    if !approvers.is_empty() {
        message.push_str("Approved by:\n");
        for person in approvers {
            if !person.name.is_empty() {
                message.push_str(&person.name);
            }
            if !person.email.is_empty() {
                message.push_str(&format!(" <{}>", person.email));
            }
            if !person.login.is_empty() {
                message.push_str(&format!(" (@{})", person.login));
            }
            message.push('\n');
        }
    }
    message
}

fn schedule_deployments(forge: &dyn Forge, ctx: &Ctx, config: &Config, base: &str) {
    let Some(deployment) = config.deploy.deployment_map.get(base) else {
        return;
    };
    let environment = deployment.environment.clone().unwrap_or_default();
    let infos: Vec<pullgate_data::DeploymentInfo> =
        if deployment.tasks.is_empty() && !environment.is_empty() {
            vec![pullgate_data::DeploymentInfo {
                reference: base.to_string(),
                task: None,
                environment: environment.clone(),
            }]
        } else {
            deployment
                .tasks
                .iter()
                .map(|task| pullgate_data::DeploymentInfo {
                    reference: base.to_string(),
                    task: Some(task.clone()),
                    environment: environment.clone(),
                })
                .collect()
        };
    for info in infos {
        if let Err(err) = forge.schedule_deployment(ctx, &ctx.repo, &info) {
            warn!("unable to schedule deployment {info:?}: {err:#}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_message_names_every_approver() {
        let approvers = vec![
            Person {
                name: "Alice Smith".to_string(),
                email: "alice@example.com".to_string(),
                login: "alice".to_string(),
            },
            Person {
                login: "bob".to_string(),
                ..Person::default()
            },
        ];
        let message = merge_message(Some("release fix"), &approvers);
        assert_eq!(
            message,
            "release fix\nMerged by Pullgate\nApproved by:\n\
             Alice Smith <alice@example.com> (@alice)\n (@bob)\n"
        );
    }

    #[test]
    fn merge_message_without_approvers_is_minimal() {
        let message = merge_message(None, &[]);
        assert_eq!(message, "Merged by Pullgate\n");
    }

    #[test]
    fn unapproved_pull_requests_are_not_merged() {
        use crate::test_utils::{approval_request, comment_feedback, test_ctx, FakeForge};
        let forge = FakeForge::default();
        let ctx = test_ctx();
        let mut req = approval_request();
        assert_eq!(do_merge(&forge, &ctx, &req).unwrap(), None);

        req.policy.matcher = "all[count=1]".parse().unwrap();
        req.approval_feedback = vec![comment_feedback("alice", "I approve")];
        assert_eq!(
            do_merge(&forge, &ctx, &req).unwrap().as_deref(),
            Some("merged")
        );
    }

    #[test]
    fn one_failing_pull_request_leaves_the_others_intact() {
        use crate::test_utils::{pull_request, test_ctx, FakeForge};
        let forge = FakeForge::default()
            .with_pull_for_commit("abc", pull_request(1, "octocat"))
            .with_pull_for_commit("abc", pull_request(2, "octocat"))
            .with_failing_files(1);
        let ctx = test_ctx();
        let mut config = Config::default();
        config.merge.enable = true;
        // a policy that approves unconditionally, so the healthy pull
        // request reaches the merge step
        config.approvals = vec![crate::config::ApprovalPolicy {
            position: 1,
            matcher: "true".parse().unwrap(),
            ..crate::config::ApprovalPolicy::default()
        }];
        let merged = process_status(
            &forge,
            &ctx,
            &config,
            Arc::new(MaintainerSnapshot::default()),
            &Notifier::new(),
            &StatusEvent {
                sha: "abc".to_string(),
                state: StatusState::Success,
            },
        )
        .unwrap();
        assert_eq!(merged.len(), 2);
        assert!(merged["1"].err.is_some());
        assert!(merged["1"].sha.is_none());
        assert!(merged["2"].err.is_none());
        assert_eq!(merged["2"].sha.as_deref(), Some("merged"));
    }

    #[test]
    fn ignored_status_states_produce_no_work() {
        use crate::test_utils::{test_ctx, FakeForge};
        let forge = FakeForge::default();
        let ctx = test_ctx();
        let config = Config::default();
        let merged = process_status(
            &forge,
            &ctx,
            &config,
            Arc::new(MaintainerSnapshot::default()),
            &Notifier::new(),
            &StatusEvent {
                sha: "abc".to_string(),
                state: StatusState::Pending,
            },
        )
        .unwrap();
        assert!(merged.is_empty());
    }
}
