//! Tag generation after a merge. The algorithm comes from the
//! resolved policy; versions can be harvested from approval comments
//! through the `version` capture group of the approval phrase.

use anyhow::Result;
use chrono::Utc;
use log::{debug, warn};
use pullgate_data::Tag;
use semver::Version;

use crate::approval::ApprovalRequest;
use crate::config::{SemverIncrement, TagAlgorithm};
use crate::ctx::Ctx;
use crate::forge::Forge;
use crate::matcher::eval::{approve, ApprovalOp};

/// Tags `sha` when the policy enables tagging. Returns the tag that
/// was created, if any.
pub fn tag_if_enabled(
    forge: &dyn Forge,
    ctx: &Ctx,
    req: &ApprovalRequest,
    sha: &str,
) -> Result<Option<Tag>> {
    let config = &req.policy.tag;
    if !config.enable {
        return Ok(None);
    }
    let version = match config.algorithm {
        TagAlgorithm::TimestampMillis => Utc::now().timestamp().to_string(),
        TagAlgorithm::TimestampRfc3339 => timestamp_rfc3339(),
        TagAlgorithm::Semver => semver_version(forge, ctx, req)?,
        TagAlgorithm::Explicit => match last_version_comment(req)? {
            Some(version) => version,
            // explicit tagging without a version comment tags nothing
            None => return Ok(None),
        },
    };
    let tag = Tag(config.expand(&version));
    debug!("tagging merge from pr {} with tag {}", req.pull_request.number, tag);
    forge.tag(ctx, &req.repo, &tag, sha)?;
    Ok(Some(tag))
}

/// RFC 3339 with dots in the time component so the result is a legal
/// git reference.
fn timestamp_rfc3339() -> String {
    Utc::now().format("%Y-%m-%dT%H.%M.%SZ").to_string()
}

fn semver_version(forge: &dyn Forge, ctx: &Ctx, req: &ApprovalRequest) -> Result<String> {
    let tags = forge.list_tags(ctx, &req.repo).unwrap_or_else(|err| {
        warn!("unable to list tags for {}: {:#}", req.repo.slug, err);
        Vec::new()
    });
    let mut max = max_existing_version(&tags);
    match max_version_comment(req)? {
        Some(found) if found > max => max = found,
        _ => increment(&mut max, req.policy.tag.increment),
    }
    Ok(max.to_string())
}

fn increment(version: &mut Version, policy: SemverIncrement) {
    version.pre = semver::Prerelease::EMPTY;
    version.build = semver::BuildMetadata::EMPTY;
    match policy {
        SemverIncrement::Major => {
            version.major += 1;
            version.minor = 0;
            version.patch = 0;
        }
        SemverIncrement::Minor => {
            version.minor += 1;
            version.patch = 0;
        }
        SemverIncrement::Patch => version.patch += 1,
        SemverIncrement::None => {}
    }
}

/// Accepts a leading `v` and missing minor or patch components.
fn parse_version(raw: &str) -> Option<Version> {
    let raw = raw.trim().trim_start_matches('v');
    if let Ok(version) = Version::parse(raw) {
        return Some(version);
    }
    let dots = raw.split('.').count();
    if dots < 3 && raw.chars().all(|c| c.is_ascii_digit() || c == '.') {
        let padded = match dots {
            1 => format!("{raw}.0.0"),
            2 => format!("{raw}.0"),
            _ => return None,
        };
        return Version::parse(&padded).ok();
    }
    None
}

fn max_existing_version(tags: &[Tag]) -> Version {
    let mut max = Version::new(0, 0, 0);
    for tag in tags {
        if let Some(version) = parse_version(&tag.0) {
            if version > max {
                max = version;
            }
        }
    }
    max
}

/// The largest version named in an approval comment.
fn max_version_comment(req: &ApprovalRequest) -> Result<Option<Version>> {
    if !has_capture_group(req, "version") {
        return Ok(None);
    }
    let mut found: Option<Version> = None;
    approve(req, &mut |f, op| {
        if op != ApprovalOp::Approval || f.body().is_empty() {
            return;
        }
        let version = req
            .policy
            .pattern
            .captures(f.body())
            .and_then(|c| c.name("version"))
            .and_then(|m| parse_version(m.as_str()));
        if let Some(version) = version {
            if found.as_ref().is_none_or(|max| version > *max) {
                found = Some(version);
            }
        }
    })?;
    Ok(found)
}

/// The version named by the most recent approval comment, verbatim.
fn last_version_comment(req: &ApprovalRequest) -> Result<Option<String>> {
    if !has_capture_group(req, "version") {
        return Ok(None);
    }
    let mut found: Option<String> = None;
    approve(req, &mut |f, op| {
        if op != ApprovalOp::Approval || f.body().is_empty() {
            return;
        }
        let version = req
            .policy
            .pattern
            .captures(f.body())
            .and_then(|c| c.name("version"))
            .map(|m| m.as_str().to_string());
        if let Some(version) = version {
            if !version.is_empty() {
                found = Some(version);
            }
        }
    })?;
    Ok(found)
}

/// The commit message named by the most recent approval comment,
/// through the `comment` capture group.
pub fn commit_comment(req: &ApprovalRequest) -> Result<Option<String>> {
    if !has_capture_group(req, "comment") {
        return Ok(None);
    }
    let mut found: Option<String> = None;
    approve(req, &mut |f, op| {
        if op != ApprovalOp::Approval || f.body().is_empty() {
            return;
        }
        let comment = req
            .policy
            .pattern
            .captures(f.body())
            .and_then(|c| c.name("comment"))
            .map(|m| m.as_str().to_string());
        if let Some(comment) = comment {
            if !comment.is_empty() {
                found = Some(comment);
            }
        }
    })?;
    Ok(found)
}

fn has_capture_group(req: &ApprovalRequest, name: &str) -> bool {
    req.policy
        .pattern
        .capture_names()
        .any(|n| n == Some(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{approval_request, comment_feedback};

    #[test]
    fn millis_algorithm_emits_decimal_unix_seconds() {
        use crate::test_utils::{test_ctx, FakeForge};
        let forge = FakeForge::default();
        let ctx = test_ctx();
        let mut req = approval_request();
        req.policy.tag.enable = true;
        req.policy.tag.algorithm = TagAlgorithm::TimestampMillis;
        let before = Utc::now().timestamp();
        let tag = tag_if_enabled(&forge, &ctx, &req, "abc").unwrap().unwrap();
        let stamp: i64 = tag.0.parse().unwrap();
        assert!(stamp >= before);
        assert!(stamp <= Utc::now().timestamp());
    }

    #[test]
    fn rfc3339_timestamps_swap_colons_for_dots() {
        let stamp = timestamp_rfc3339();
        assert!(!stamp.contains(':'));
        assert!(
            chrono::NaiveDateTime::parse_from_str(&stamp, "%Y-%m-%dT%H.%M.%SZ").is_ok(),
            "unexpected timestamp spelling: {stamp}"
        );
    }

    #[test]
    fn existing_tags_set_the_floor() {
        let tags = vec![
            Tag("v1.2.3".to_string()),
            Tag("not-a-version".to_string()),
            Tag("0.9.0".to_string()),
        ];
        assert_eq!(max_existing_version(&tags), Version::new(1, 2, 3));
    }

    #[test]
    fn short_versions_are_padded() {
        assert_eq!(parse_version("v2.1"), Some(Version::new(2, 1, 0)));
        assert_eq!(parse_version("3"), Some(Version::new(3, 0, 0)));
        assert_eq!(parse_version("garbage"), None);
    }

    #[test]
    fn increments_reset_lower_components() {
        let mut v = Version::new(1, 2, 3);
        increment(&mut v, SemverIncrement::Minor);
        assert_eq!(v, Version::new(1, 3, 0));
        increment(&mut v, SemverIncrement::Major);
        assert_eq!(v, Version::new(2, 0, 0));
        increment(&mut v, SemverIncrement::None);
        assert_eq!(v, Version::new(2, 0, 0));
    }

    #[test]
    fn approval_comments_supply_versions() {
        let mut req = approval_request();
        req.approval_feedback = vec![
            comment_feedback("alice", "I approve version: 1.5.0"),
            comment_feedback("bob", "I approve version: 1.4.0"),
        ];
        let max = max_version_comment(&req).unwrap();
        assert_eq!(max, Some(Version::new(1, 5, 0)));
        let last = last_version_comment(&req).unwrap();
        assert_eq!(last.as_deref(), Some("1.4.0"));
    }

    #[test]
    fn commit_comment_takes_the_latest_match() {
        let mut req = approval_request();
        req.approval_feedback = vec![
            comment_feedback("alice", "I approve comment: first message"),
            comment_feedback("bob", "I approve comment: final message"),
        ];
        let comment = commit_comment(&req).unwrap();
        assert_eq!(comment.as_deref(), Some("final message"));
    }

    #[test]
    fn non_approvals_contribute_nothing() {
        let mut req = approval_request();
        req.approval_feedback = vec![comment_feedback("alice", "just chatting version: 9.9.9")];
        assert_eq!(max_version_comment(&req).unwrap(), None);
    }
}
