//! Feedback is everything a person can say about a pull request:
//! issue comments and formal reviews, merged into one ordered stream.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use anyhow::Context as _;
use chrono::{DateTime, Utc};
use log::warn;
use pullgate_data::{Comment, Issue, Login, PullRequest, Repo, Review, ReviewState};
use regex::Regex;

use crate::approval::ApprovalRequest;
use crate::config::{ApprovalPolicy, CommitRange, Config, FeedbackType};
use crate::ctx::Ctx;
use crate::forge::Forge;
use crate::COMMENT_PREFIX;

/// Issue references recognized by the hosting service in commit and
/// pull request messages.
fn close_issue_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(closes|closed|close|fixes|fixed|fix|resolves|resolved|resolve) #(\d+)")
            .unwrap()
    })
}

#[derive(Debug, Clone, PartialEq)]
pub enum Feedback {
    Comment(Comment),
    Review(Review),
}

impl Feedback {
    /// The comment the author gate pretends the author wrote.
    pub fn synthetic_author_comment(author: &Login) -> Feedback {
        Feedback::Comment(Comment {
            author: author.clone(),
            body: String::new(),
            submitted_at: Utc::now(),
        })
    }

    pub fn author(&self) -> &Login {
        match self {
            Feedback::Comment(c) => &c.author,
            Feedback::Review(r) => &r.author,
        }
    }

    pub fn body(&self) -> &str {
        match self {
            Feedback::Comment(c) => &c.body,
            Feedback::Review(r) => &r.body,
        }
    }

    pub fn submitted_at(&self) -> DateTime<Utc> {
        match self {
            Feedback::Comment(c) => c.submitted_at,
            Feedback::Review(r) => r.submitted_at,
        }
    }

    /// A comment approves when it matches the approval phrase. A
    /// review approves through its state, never its body.
    pub fn is_approval(&self, req: &ApprovalRequest) -> bool {
        match self {
            Feedback::Comment(c) => req.policy.pattern.is_match(&c.body),
            Feedback::Review(r) => r.state == ReviewState::Approved,
        }
    }

    /// Disapproval phrase matching is optional; without an
    /// antipattern a comment can never disapprove.
    pub fn is_disapproval(&self, req: &ApprovalRequest) -> bool {
        match self {
            Feedback::Comment(c) => req
                .policy
                .anti_pattern
                .as_ref()
                .is_some_and(|rx| rx.is_match(&c.body)),
            Feedback::Review(r) => r.state == ReviewState::ChangesRequested,
        }
    }
}

/// The three feedback windows a policy evaluation needs. `all` spans
/// the whole pull request; the approval and disapproval windows may
/// be narrowed to comments since the last head push.
#[derive(Debug, Default)]
pub struct FeedbackRanges {
    pub all: Vec<Feedback>,
    pub approval: Vec<Feedback>,
    pub disapproval: Vec<Feedback>,
}

pub fn collect_ranges(
    forge: &dyn Forge,
    ctx: &Ctx,
    repo: &Repo,
    config: &Config,
    policy: &ApprovalPolicy,
    number: u32,
) -> anyhow::Result<FeedbackRanges> {
    let types = &config.feedback_config(policy).types;
    let ignore_ui_merge = config.commit.ignore_ui_merge;
    let mut ranges = FeedbackRanges::default();
    ranges.all = fetch(forge, ctx, repo, number, CommitRange::All, ignore_ui_merge, types)?;
    ranges.approval = if config.commit.range == CommitRange::All {
        ranges.all.clone()
    } else {
        fetch(forge, ctx, repo, number, config.commit.range, ignore_ui_merge, types)?
    };
    ranges.disapproval = if config.commit.anti_range == config.commit.range {
        ranges.approval.clone()
    } else {
        fetch(forge, ctx, repo, number, config.commit.anti_range, ignore_ui_merge, types)?
    };
    Ok(ranges)
}

fn fetch(
    forge: &dyn Forge,
    ctx: &Ctx,
    repo: &Repo,
    number: u32,
    range: CommitRange,
    ignore_ui_merge: bool,
    types: &[FeedbackType],
) -> anyhow::Result<Vec<Feedback>> {
    let mut feedback = Vec::new();
    if types.contains(&FeedbackType::Comment) {
        let comments = match range {
            CommitRange::All => forge.get_all_comments(ctx, repo, number),
            CommitRange::Head => {
                forge.get_comments_since_head(ctx, repo, number, ignore_ui_merge)
            }
        }
        .with_context(|| {
            format!("error retrieving comments for {} pr {}", repo.slug, number)
        })?;
        feedback.extend(comments.into_iter().map(Feedback::Comment));
    }
    if types.contains(&FeedbackType::Review) {
        let reviews = match range {
            CommitRange::All => forge.get_all_reviews(ctx, repo, number),
            CommitRange::Head => {
                forge.get_reviews_since_head(ctx, repo, number, ignore_ui_merge)
            }
        }
        .with_context(|| {
            format!("error retrieving reviews for {} pr {}", repo.slug, number)
        })?;
        feedback.extend(reviews.into_iter().map(Feedback::Review));
    }
    feedback.retain(|f| !f.body().starts_with(COMMENT_PREFIX));
    feedback.sort_by_key(Feedback::submitted_at);
    Ok(feedback)
}

fn issue_references(message: &str, numbers: &mut BTreeSet<u32>) {
    let message = message.to_lowercase();
    for captures in close_issue_re().captures_iter(&message) {
        if let Some(number) = captures.get(2).and_then(|m| m.as_str().parse().ok()) {
            numbers.insert(number);
        }
    }
}

/// Collects the distinct issues referenced by the pull request body
/// and its feedback stream, for issue-author matching. Fetch failures
/// are logged and skipped.
pub fn harvest_issues(
    forge: &dyn Forge,
    ctx: &Ctx,
    repo: &Repo,
    pr: &PullRequest,
    feedback: &[Feedback],
) -> Vec<Issue> {
    let mut numbers = BTreeSet::new();
    issue_references(&pr.body, &mut numbers);
    for f in feedback {
        issue_references(f.body(), &mut numbers);
    }
    let mut issues = Vec::new();
    for number in numbers {
        match forge.get_issue(ctx, repo, number) {
            Ok(issue) => issues.push(issue),
            Err(err) => {
                warn!("unable to fetch issue {}/{}: {:#}", repo.slug, number, err);
            }
        }
    }
    issues
}
