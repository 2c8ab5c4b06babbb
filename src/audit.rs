//! The audit chain. Protected branches carry an `audit/<branch>`
//! commit status; a pull request preserves the chain when either side
//! of it is stamped, and a maintainer can stamp manually through an
//! empty-commit review pull request.

use anyhow::Result;
use pullgate_data::{CommitStatus, PullRequest, Repo, StatusState};

use crate::config::Config;
use crate::ctx::Ctx;
use crate::forge::Forge;
use crate::AUDIT_CONTEXT;

/// How far back to look for an audit stamp on the base branch.
pub const COMMIT_WALK_LIMIT: usize = 30;

const NO_AUDIT: &str = "the entire branch history. No audits found in the past 30 commits";

fn audit_context(pr: &PullRequest) -> String {
    format!("{}/{}", AUDIT_CONTEXT, pr.branch.base_name)
}

pub fn requires_audit(config: &Config, pr: &PullRequest) -> bool {
    config.audit.covers(&pr.branch.base_name)
}

fn has_audit_status(
    forge: &dyn Forge,
    ctx: &Ctx,
    repo: &Repo,
    context: &str,
    sha: &str,
) -> Result<bool> {
    let status = forge.get_status(ctx, repo, sha)?;
    Ok(status.statuses.contains_key(context))
}

/// A stamp on the base commit means the chain is unbroken. A stamp on
/// the compare commit means the chain was manually approved.
pub fn test_audit(forge: &dyn Forge, ctx: &Ctx, repo: &Repo, pr: &PullRequest) -> Result<bool> {
    let context = audit_context(pr);
    if has_audit_status(forge, ctx, repo, &context, &pr.branch.base_sha)? {
        return Ok(true);
    }
    has_audit_status(forge, ctx, repo, &context, &pr.branch.compare_sha)
}

/// Stamps the merge commit after a merge so the chain continues.
pub fn apply_audit(forge: &dyn Forge, ctx: &Ctx, repo: &Repo, pr: &PullRequest) -> Result<()> {
    let Some(merge_sha) = pr.branch.merge_commit_sha.as_deref() else {
        return Ok(());
    };
    let status = CommitStatus {
        state: StatusState::Success,
        context: audit_context(pr),
        description: format!("audited by pr {}", pr.number),
    };
    forge.set_status(ctx, repo, merge_sha, &status)
}

fn find_audit_range(
    forge: &dyn Forge,
    ctx: &Ctx,
    repo: &Repo,
    pr: &PullRequest,
) -> Result<String> {
    let context = audit_context(pr);
    let commits = forge.list_commits(ctx, repo, &pr.branch.base_sha, COMMIT_WALK_LIMIT)?;
    for commit in &commits {
        if has_audit_status(forge, ctx, repo, &context, &commit.sha)? {
            let url = forge.compare_url(repo, &commit.sha, &pr.branch.base_sha);
            return Ok(format!("the range {url}"));
        }
    }
    Ok(NO_AUDIT.to_string())
}

/// Opens a review pull request whose approval stamps the base branch.
/// The stamp goes on an empty commit so history is untouched.
pub fn manual_audit(forge: &dyn Forge, ctx: &Ctx, repo: &Repo, pr: &PullRequest) -> Result<()> {
    let base = &pr.branch.base_name;
    let context = audit_context(pr);
    let branch_name = format!("pr-{}-audit-{}", pr.number, chrono::Utc::now().timestamp());
    let title = format!("Audit branch {} for pr {}", base, pr.number);
    let audit_range = find_audit_range(forge, ctx, repo, pr)?;
    let body = format!(
        "Please review the commits in {audit_range}. \
         You must review commits that were not submitted via pull request. \
         Approving this pull request indicates \
         that you have reviewed the commits to branch {base}."
    );
    let commit_message = format!(
        "empty commit. Added commit status branch '{base}' manual audit\n\n\
         The commits have been reviewed in {audit_range}"
    );
    let commit_sha = forge.create_empty_commit(ctx, repo, &pr.branch.base_sha, &commit_message)?;
    let status = CommitStatus {
        state: StatusState::Success,
        context,
        description: format!("manual audit of branch {base}"),
    };
    forge.set_status(ctx, repo, &commit_sha, &status)?;
    forge.create_reference(ctx, repo, &commit_sha, &format!("heads/{branch_name}"))?;
    let audit_pr = forge.create_pull_request(ctx, repo, base, &branch_name, &title, &body)?;
    let message = format!(
        "You must approve pr #{} to preserve the audit chain. \
         Use the \"Update branch\" button after you have merged the other pull request.",
        audit_pr.number
    );
    forge.write_comment(ctx, repo, pr.number, &message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuditConfig;
    use crate::test_utils::{pull_request, test_ctx, FakeForge};

    #[test]
    fn audit_is_scoped_to_configured_branches() {
        let mut config = Config::default();
        config.audit = AuditConfig {
            enable: true,
            branches: vec!["master".to_string()],
        };
        let mut pr = pull_request(7, "octocat");
        pr.branch.base_name = "master".to_string();
        assert!(requires_audit(&config, &pr));
        pr.branch.base_name = "develop".to_string();
        assert!(!requires_audit(&config, &pr));
        config.audit.enable = false;
        pr.branch.base_name = "master".to_string();
        assert!(!requires_audit(&config, &pr));
    }

    #[test]
    fn stamp_on_either_side_preserves_the_chain() {
        let ctx = test_ctx();
        let mut pr = pull_request(7, "octocat");
        pr.branch.base_name = "master".to_string();
        pr.branch.base_sha = "base".to_string();
        pr.branch.compare_sha = "head".to_string();

        let forge = FakeForge::default();
        assert!(!test_audit(&forge, &ctx, &ctx.repo, &pr).unwrap());

        let forge = FakeForge::default().with_status("base", "audit/master", StatusState::Success);
        assert!(test_audit(&forge, &ctx, &ctx.repo, &pr).unwrap());

        let forge = FakeForge::default().with_status("head", "audit/master", StatusState::Success);
        assert!(test_audit(&forge, &ctx, &ctx.repo, &pr).unwrap());
    }
}
