//! Approval scopes decide which policy applies to a pull request.
//! Policies are tried in order; the first whose scope matches wins.

use pullgate_data::{Branch, CommitFile};
use serde::{Deserialize, Serialize};

use crate::config::{ApprovalPolicy, Config};
use crate::glob;
use crate::matcher::Matcher;
use crate::rx::Pattern;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApprovalScope {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub paths: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub branches: Vec<String>,
    #[serde(default, rename = "regexpaths", skip_serializing_if = "Vec::is_empty")]
    pub path_regexp: Vec<Pattern>,
    #[serde(default, rename = "regexbase", skip_serializing_if = "Vec::is_empty")]
    pub base_regexp: Vec<Pattern>,
    #[serde(default, rename = "regexcompare", skip_serializing_if = "Vec::is_empty")]
    pub compare_regexp: Vec<Pattern>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nested: Vec<InnerScope>,
}

/// A per-directory policy fragment for monorepos: applies when some
/// changed file matches the path expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InnerScope {
    #[serde(rename = "regexpath")]
    pub path_regexp: Pattern,
    #[serde(rename = "match")]
    pub matcher: Matcher,
    #[serde(default, rename = "antimatch", skip_serializing_if = "Option::is_none")]
    pub anti_matcher: Option<Matcher>,
}

impl ApprovalScope {
    /// A scope with no criteria matches every pull request.
    pub fn is_universal(&self) -> bool {
        self.paths.is_empty()
            && self.branches.is_empty()
            && self.path_regexp.is_empty()
            && self.base_regexp.is_empty()
            && self.compare_regexp.is_empty()
            && self.nested.is_empty()
    }
}

fn matches_paths(globs: &[String], files: &[CommitFile]) -> bool {
    if files.is_empty() {
        return false;
    }
    let compiled: Vec<_> = globs.iter().filter_map(|g| glob::compile(g).ok()).collect();
    files.iter().all(|f| {
        compiled.iter().any(|re| re.is_match(&f.filename))
    })
}

fn matches_paths_regexp(exprs: &[Pattern], files: &[CommitFile]) -> bool {
    if files.is_empty() {
        return false;
    }
    files
        .iter()
        .all(|f| exprs.iter().any(|re| re.is_match(&f.filename)))
}

fn matches_regexp(exprs: &[Pattern], candidate: &str) -> bool {
    exprs.iter().any(|re| re.is_match(candidate))
}

fn matches_scope(branch: &Branch, scope: &ApprovalScope, files: &[CommitFile]) -> bool {
    // nested scopes only ever match partially
    if !scope.nested.is_empty() {
        return false;
    }
    if !scope.paths.is_empty() && !matches_paths(&scope.paths, files) {
        return false;
    }
    if !scope.branches.is_empty() && !scope.branches.contains(&branch.base_name) {
        return false;
    }
    if !scope.path_regexp.is_empty() && !matches_paths_regexp(&scope.path_regexp, files) {
        return false;
    }
    if !scope.base_regexp.is_empty() && !matches_regexp(&scope.base_regexp, &branch.base_name) {
        return false;
    }
    if !scope.compare_regexp.is_empty()
        && !matches_regexp(&scope.compare_regexp, &branch.compare_name)
    {
        return false;
    }
    true
}

/// Flattens a nested policy: the parent match is anded with every
/// nested match whose path expression hits a changed file, and their
/// anti-matches are ored together.
fn matches_partial_scope(
    branch: &Branch,
    policy: &ApprovalPolicy,
    files: &[CommitFile],
) -> Option<ApprovalPolicy> {
    let scope = &policy.scope;
    if scope.nested.is_empty() {
        return None;
    }
    if !scope.branches.is_empty() && !scope.branches.contains(&branch.base_name) {
        return None;
    }
    if !scope.base_regexp.is_empty() && !matches_regexp(&scope.base_regexp, &branch.base_name) {
        return None;
    }
    if !scope.compare_regexp.is_empty()
        && !matches_regexp(&scope.compare_regexp, &branch.compare_name)
    {
        return None;
    }
    let mut matchers = vec![policy.matcher.clone()];
    let mut anti_matchers = vec![policy.anti_matcher.clone()];
    for inner in &scope.nested {
        if files.iter().any(|f| inner.path_regexp.is_match(&f.filename)) {
            matchers.push(inner.matcher.clone());
            if let Some(anti) = &inner.anti_matcher {
                anti_matchers.push(anti.clone());
            }
        }
    }
    let mut flattened = policy.clone();
    flattened.matcher = Matcher::And(matchers);
    flattened.anti_matcher = Matcher::Or(anti_matchers);
    Some(flattened)
}

/// The sentinel returned when no scope matched; never approves.
fn fallback_policy() -> ApprovalPolicy {
    ApprovalPolicy {
        matcher: Matcher::False,
        ..ApprovalPolicy::default()
    }
}

pub fn find_approval_policy(
    config: &Config,
    branch: &Branch,
    files: &[CommitFile],
) -> ApprovalPolicy {
    for policy in &config.approvals {
        if matches_scope(branch, &policy.scope, files) {
            return policy.clone();
        }
        if let Some(partial) = matches_partial_scope(branch, policy, files) {
            return partial;
        }
    }
    log::warn!("no approval policy has a default scope; refusing approval");
    fallback_policy()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn branch(base: &str) -> Branch {
        Branch {
            base_name: base.to_string(),
            compare_name: "feature".to_string(),
            ..Branch::default()
        }
    }

    fn files(names: &[&str]) -> Vec<CommitFile> {
        names
            .iter()
            .map(|n| CommitFile {
                filename: n.to_string(),
            })
            .collect()
    }

    fn policy_with_scope(name: &str, scope: ApprovalScope) -> ApprovalPolicy {
        ApprovalPolicy {
            name: name.to_string(),
            scope,
            ..ApprovalPolicy::default()
        }
    }

    #[test]
    fn first_matching_scope_wins() {
        let config = Config {
            approvals: vec![
                policy_with_scope(
                    "master-only",
                    ApprovalScope {
                        branches: vec!["master".to_string()],
                        ..ApprovalScope::default()
                    },
                ),
                policy_with_scope("default", ApprovalScope::default()),
            ],
            ..Config::default()
        };
        assert_eq!(
            find_approval_policy(&config, &branch("master"), &[]).name,
            "master-only"
        );
        assert_eq!(
            find_approval_policy(&config, &branch("dev"), &[]).name,
            "default"
        );
    }

    #[test]
    fn path_scope_requires_every_file_to_match() {
        let scope = ApprovalScope {
            paths: vec!["docs/**".to_string()],
            ..ApprovalScope::default()
        };
        let b = branch("master");
        assert!(matches_scope(&b, &scope, &files(&["docs/a.md", "docs/b/c.md"])));
        assert!(!matches_scope(&b, &scope, &files(&["docs/a.md", "src/main.rs"])));
        // an empty change list never satisfies a path filter
        assert!(!matches_scope(&b, &scope, &[]));
    }

    #[test]
    fn missing_default_scope_falls_back_to_never_approve() {
        let config = Config {
            approvals: vec![policy_with_scope(
                "narrow",
                ApprovalScope {
                    branches: vec!["master".to_string()],
                    ..ApprovalScope::default()
                },
            )],
            ..Config::default()
        };
        let policy = find_approval_policy(&config, &branch("dev"), &[]);
        assert_eq!(policy.matcher, Matcher::False);
    }

    #[test]
    fn nested_scopes_combine_matches_for_touched_directories() {
        let mut parent = policy_with_scope(
            "monorepo",
            ApprovalScope {
                branches: vec!["master".to_string()],
                nested: vec![
                    InnerScope {
                        path_regexp: Pattern::new(".*/gui/.*").unwrap(),
                        matcher: Matcher::parse("frontend").unwrap(),
                        anti_matcher: None,
                    },
                    InnerScope {
                        path_regexp: Pattern::new(".*/db/.*").unwrap(),
                        matcher: Matcher::parse("dba").unwrap(),
                        anti_matcher: None,
                    },
                ],
                ..ApprovalScope::default()
            },
        );
        parent.matcher = Matcher::True;
        let config = Config {
            approvals: vec![parent],
            ..Config::default()
        };
        let policy =
            find_approval_policy(&config, &branch("master"), &files(&["app/gui/view.rs"]));
        match policy.matcher {
            Matcher::And(children) => {
                assert_eq!(children.len(), 2);
                assert_eq!(children[0], Matcher::True);
            }
            other => panic!("expected a combined match, got {other}"),
        }
    }
}
