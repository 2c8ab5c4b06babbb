//! Webhook event routing. Each event resolves the repository's
//! configuration and maintainer snapshot, dispatches to the right
//! handler and surfaces failures both as an error commit status and
//! as a notification.

use std::sync::Arc;

use anyhow::Result;
use log::{info, warn};
use pullgate_data::{CommitStatus, PullRequest, StatusState};
use serde::Serialize;
use serde_json::json;

use crate::approval::{self, ApprovalInfo, FeedbackOutcome, AUTHOR_AFFIRM_MSG};
use crate::audit;
use crate::config::{CommitRange, Config};
use crate::ctx::Ctx;
use crate::error;
use crate::forge::{Capabilities, Forge};
use crate::notify::{MessageBatch, MessageKind, Notifier};
use crate::orchestrator::{self, StatusEvent};
use crate::snapshot::resolve::get_config_and_maintainers;
use crate::snapshot::MaintainerSnapshot;
use crate::stats::Stats;
use crate::store::Store;
use crate::{orchestrator::StatusResponse, SERVICE_NAME};

/// Pull request actions that trigger re-evaluation. Everything else
/// is acknowledged and dropped.
const PR_ACTION_WHITELIST: &[&str] = &["synchronize", "opened", "reopened", "closed"];

#[derive(Debug, Clone)]
pub enum Event {
    PullRequest {
        action: String,
        number: u32,
    },
    Comment {
        number: u32,
        body: String,
    },
    Review {
        number: u32,
    },
    Status {
        sha: String,
        state: StatusState,
    },
    Repository {
        action: String,
    },
}

/// JSON payload returned to the webhook caller after an approval
/// re-evaluation.
#[derive(Debug, Serialize)]
pub struct ApprovalOutput {
    pub policy: String,
    pub approved: bool,
    pub approvers: Vec<String>,
    pub disapprovers: Vec<String>,
}

impl ApprovalOutput {
    fn from_info(info: &ApprovalInfo) -> ApprovalOutput {
        ApprovalOutput {
            policy: info.policy.label(),
            approved: info.approved,
            approvers: info.approvers.iter().map(ToString::to_string).collect(),
            disapprovers: info.disapprovers.iter().map(ToString::to_string).collect(),
        }
    }
}

pub struct Router {
    forge: Arc<dyn Forge>,
    store: Arc<dyn Store>,
    notifier: Notifier,
    stats: Stats,
}

struct HookParams {
    config: Config,
    snapshot: Arc<MaintainerSnapshot>,
    caps: Capabilities,
}

impl Router {
    pub fn new(
        forge: Arc<dyn Forge>,
        store: Arc<dyn Store>,
        notifier: Notifier,
        stats: Stats,
    ) -> Router {
        Router {
            forge,
            store,
            notifier,
            stats,
        }
    }

    /// Dispatches one event. `Ok(None)` means the event was ignored.
    pub fn handle(&self, ctx: &Ctx, event: &Event) -> Result<Option<serde_json::Value>> {
        ctx.check_cancelled()?;
        match event {
            Event::PullRequest { action, number } => self.handle_pull_request(ctx, action, *number),
            Event::Comment { number, body } => {
                if body.starts_with(crate::COMMENT_PREFIX) {
                    return Ok(None);
                }
                self.handle_approval(ctx, *number, Some(body))
            }
            Event::Review { number } => self.handle_approval(ctx, *number, None),
            Event::Status { sha, state } => self.handle_status(ctx, sha, *state),
            Event::Repository { action } => self.handle_repository(ctx, action),
        }
    }

    /// Repository lifecycle events. A deleted repository is removed
    /// from the enrollment store; every other action is acknowledged
    /// and dropped.
    fn handle_repository(&self, ctx: &Ctx, action: &str) -> Result<Option<serde_json::Value>> {
        if action != "deleted" {
            return Ok(None);
        }
        let slug = &ctx.repo.slug;
        self.store.delete_repo(slug)?;
        info!("repository {slug} deleted, enrollment removed");
        Ok(Some(json!({ "removed": slug })))
    }

    fn params(&self, ctx: &Ctx) -> Result<HookParams> {
        let caps = self.forge.capabilities()?;
        let (config, snapshot) = get_config_and_maintainers(&self.forge, ctx, &caps, &ctx.repo)?;
        Ok(HookParams {
            config,
            snapshot: Arc::new(snapshot),
            caps,
        })
    }

    fn handle_status(
        &self,
        ctx: &Ctx,
        sha: &str,
        state: StatusState,
    ) -> Result<Option<serde_json::Value>> {
        if state != StatusState::Success {
            return Ok(None);
        }
        let params = self.params(ctx)?;
        let merged: indexmap::IndexMap<String, StatusResponse> = orchestrator::process_status(
            self.forge.as_ref(),
            ctx,
            &params.config,
            params.snapshot,
            &self.notifier,
            &StatusEvent {
                sha: sha.to_string(),
                state,
            },
        )?;
        Ok(Some(json!(merged)))
    }

    /// A failed evaluation surfaces twice: as an error commit status
    /// on the pull request and as the returned error.
    fn handle_approval(
        &self,
        ctx: &Ctx,
        number: u32,
        trigger_body: Option<&str>,
    ) -> Result<Option<serde_json::Value>> {
        match self.approve_and_notify(ctx, number, trigger_body) {
            Ok(output) => Ok(Some(json!(output))),
            Err(err) => {
                let status_err = self.send_error_status(ctx, number, &err);
                Err(error::append(err, status_err))
            }
        }
    }

    fn approve_and_notify(
        &self,
        ctx: &Ctx,
        number: u32,
        trigger_body: Option<&str>,
    ) -> Result<ApprovalOutput> {
        let params = self.params(ctx)?;
        let pr = self.forge.get_pull_request(ctx, &ctx.repo, number)?;
        let info = match self.approve_pull_request(ctx, &params, &pr, trigger_body) {
            Ok(info) => info,
            Err(err) => {
                self.notifier.send_error(
                    ctx,
                    &params.config,
                    &pr.title,
                    pr.number,
                    &ctx.repo.slug,
                    &format!("{err:#}"),
                );
                return Err(err);
            }
        };
        let batch = outcome_batch(&pr, &ctx.repo.slug, &info);
        self.notifier.send(ctx, &params.config, &batch);
        Ok(ApprovalOutput::from_info(&info))
    }

    /// Evaluates the pull request, posts the resulting commit status
    /// and records approval statistics.
    fn approve_pull_request(
        &self,
        ctx: &Ctx,
        params: &HookParams,
        pr: &PullRequest,
        trigger_body: Option<&str>,
    ) -> Result<ApprovalInfo> {
        let info = approval::build_approvers(
            self.forge.as_ref(),
            ctx,
            &params.config,
            params.snapshot.clone(),
            pr,
        )?;
        if !info.author_affirmed {
            if let Some(body) = trigger_body {
                if info.policy.pattern.is_match(body) {
                    self.forge
                        .write_comment(ctx, &ctx.repo, pr.number, AUTHOR_AFFIRM_MSG)?;
                }
            }
        }
        let status = approval::status_for(&info);
        self.forge
            .set_status(ctx, &ctx.repo, &pr.branch.compare_sha, &status)?;
        self.record_stats(&ctx.repo.slug, pr, &info);
        Ok(info)
    }

    fn record_stats(&self, slug: &str, pr: &PullRequest, info: &ApprovalInfo) {
        if info.approved && !info.approvers.is_empty() {
            self.stats.record_pull_request(slug, pr.number);
        }
        for login in &info.approvers {
            self.stats.record_approver(login);
        }
        for login in &info.disapprovers {
            self.stats.record_disapprover(login);
        }
    }

    fn handle_pull_request(
        &self,
        ctx: &Ctx,
        action: &str,
        number: u32,
    ) -> Result<Option<serde_json::Value>> {
        if !PR_ACTION_WHITELIST.contains(&action) {
            return Ok(None);
        }
        let params = self.params(ctx)?;
        let pr = self.forge.get_pull_request(ctx, &ctx.repo, number)?;

        if action == "closed" {
            let batch = self.pr_closed(ctx, &params, &pr)?;
            self.notifier.send(ctx, &params.config, &batch);
            return Ok(None);
        }

        if matches!(action, "opened" | "reopened") {
            self.open_audit(ctx, &params, &pr)?;
        }

        let result = self.approve_pull_request(ctx, &params, &pr, None);
        match result {
            Ok(info) => {
                let mut batch = self.action_batch(ctx, &params, action, &pr, Some(&info));
                batch.merge(outcome_batch(&pr, &ctx.repo.slug, &info));
                self.notifier.send(ctx, &params.config, &batch);
                Ok(Some(json!(ApprovalOutput::from_info(&info))))
            }
            Err(err) => {
                let batch =
                    MessageBatch::error(&pr.title, pr.number, &ctx.repo.slug, &format!("{err:#}"));
                self.notifier.send(ctx, &params.config, &batch);
                let status_err = self.send_error_status(ctx, number, &err);
                Err(error::append(err, status_err))
            }
        }
    }

    /// A freshly opened pull request against an audited branch opens
    /// a manual audit review when the chain is broken.
    fn open_audit(&self, ctx: &Ctx, params: &HookParams, pr: &PullRequest) -> Result<()> {
        if !audit::requires_audit(&params.config, pr) {
            return Ok(());
        }
        if audit::test_audit(self.forge.as_ref(), ctx, &ctx.repo, pr)? {
            return Ok(());
        }
        audit::manual_audit(self.forge.as_ref(), ctx, &ctx.repo, pr)
    }

    /// A merged pull request against an audited branch stamps the
    /// merge commit to extend the chain.
    fn pr_closed(&self, ctx: &Ctx, params: &HookParams, pr: &PullRequest) -> Result<MessageBatch> {
        if audit::requires_audit(&params.config, pr)
            && audit::test_audit(self.forge.as_ref(), ctx, &ctx.repo, pr)?
        {
            audit::apply_audit(self.forge.as_ref(), ctx, &ctx.repo, pr)?;
        }
        Ok(self.action_batch(ctx, params, "closed", pr, None))
    }

    fn action_batch(
        &self,
        ctx: &Ctx,
        params: &HookParams,
        action: &str,
        pr: &PullRequest,
        info: Option<&ApprovalInfo>,
    ) -> MessageBatch {
        let mut batch = MessageBatch::new(&pr.title, pr.number, &ctx.repo.slug);
        match action {
            "opened" => {
                let mut message = "opened".to_string();
                if let Some(info) = info {
                    message.push_str(&format!(" Applying approval policy {}", info.policy.label()));
                }
                batch.push(MessageKind::Open, message);
            }
            "reopened" => batch.push(MessageKind::Open, "reopened"),
            "closed" => {
                if pr.branch.merged {
                    batch.push(MessageKind::Accept, "merged");
                } else {
                    batch.push(MessageKind::Close, "closed without being merged");
                }
            }
            "synchronize" => {
                if params.config.commit.range == CommitRange::Head {
                    if params.config.commit.ignore_ui_merge && self.head_is_ui_merge(ctx, pr) {
                        batch.push(
                            MessageKind::PushIgnore,
                            "merged through the user interface. Merge commit ignored.",
                        );
                    } else {
                        batch.push(
                            MessageKind::Reset,
                            "updated. No comments before this one will count for approval.",
                        );
                    }
                }
            }
            _ => {}
        }
        batch
    }

    fn head_is_ui_merge(&self, ctx: &Ctx, pr: &PullRequest) -> bool {
        match self.forge.is_head_ui_merge(ctx, &ctx.repo, pr.number) {
            Ok(merge) => merge,
            Err(err) => {
                warn!(
                    "unable to test HEAD of pull request {}/{}: {err:#}",
                    ctx.repo.slug, pr.number
                );
                false
            }
        }
    }

    fn send_error_status(&self, ctx: &Ctx, number: u32, err: &anyhow::Error) -> Result<()> {
        let pr = self.forge.get_pull_request(ctx, &ctx.repo, number)?;
        let status = CommitStatus {
            state: StatusState::Error,
            context: SERVICE_NAME.to_string(),
            description: format!("{err:#}"),
        };
        self.forge
            .set_status(ctx, &ctx.repo, &pr.branch.compare_sha, &status)
    }
}

/// The notification describing what the newest feedback changed.
fn outcome_batch(pr: &PullRequest, slug: &str, info: &ApprovalInfo) -> MessageBatch {
    let mut batch = MessageBatch::new(&pr.title, pr.number, slug);
    match &info.outcome {
        FeedbackOutcome::NoChange => {}
        FeedbackOutcome::Approval(author) => {
            batch.push(MessageKind::Approve, format!("approval added by {author}."));
        }
        FeedbackOutcome::Disapproval(author) => {
            batch.push(MessageKind::Block, format!("blocked by {author}."));
        }
        FeedbackOutcome::BlockedAuthor => {
            batch.push(
                MessageKind::Block,
                format!(
                    "blocked because it was created by unapproved author {}.",
                    pr.author
                ),
            );
        }
        FeedbackOutcome::BlockedTitle => {
            batch.push(
                MessageKind::Block,
                "blocked because its title indicates that it should not be merged",
            );
        }
        FeedbackOutcome::BlockedAudit => {
            batch.push(MessageKind::Block, "blocked by gap in audit chain");
        }
    }
    batch
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unlisted_pull_request_actions_are_ignored() {
        assert!(!PR_ACTION_WHITELIST.contains(&"labeled"));
        assert!(PR_ACTION_WHITELIST.contains(&"synchronize"));
    }

    #[test]
    fn deleted_repositories_are_deenrolled() {
        use crate::store::{MemStore, RepoRow};
        use crate::test_utils::{test_ctx, FakeForge};

        let store = Arc::new(MemStore::new());
        store
            .create_repo(RepoRow {
                id: 1,
                slug: "octo/widgets".to_string(),
                owner: "octo".to_string(),
                name: "widgets".to_string(),
                user_id: 1,
                secret: "hmac".to_string(),
                private: false,
                org: true,
            })
            .unwrap();
        let router = Router::new(
            Arc::new(FakeForge::default()),
            store.clone(),
            Notifier::new(),
            Stats::new(),
        );
        let ctx = test_ctx();

        let ignored = router
            .handle(
                &ctx,
                &Event::Repository {
                    action: "publicized".to_string(),
                },
            )
            .unwrap();
        assert!(ignored.is_none());
        assert!(store.get_repo_by_slug("octo/widgets").unwrap().is_some());

        router
            .handle(
                &ctx,
                &Event::Repository {
                    action: "deleted".to_string(),
                },
            )
            .unwrap();
        assert!(store.get_repo_by_slug("octo/widgets").unwrap().is_none());
    }

    #[test]
    fn outcome_batch_reports_the_latest_change() {
        let pr = crate::test_utils::pull_request(7, "octocat");
        let req = crate::test_utils::approval_request();
        let mut info = approval::evaluate(&req, true).unwrap();
        info.outcome = FeedbackOutcome::Approval("alice".into());
        let batch = outcome_batch(&pr, "octo/widgets", &info);
        assert_eq!(batch.messages.len(), 1);
        assert_eq!(batch.messages[0].message, "approval added by alice.");
        assert_eq!(batch.messages[0].kind, MessageKind::Approve);
    }
}
