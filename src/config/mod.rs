//! Repository configuration: the `.pullgate` file. Parsed from HJSON
//! with documented defaults for everything that can be omitted, then
//! validated against the capabilities of the authenticated token.

mod deploy;
mod legacy;
mod tag;

pub use deploy::{DeploymentConfig, DeploymentConfigs};
pub use legacy::parse_legacy_config;
pub use tag::{SemverIncrement, TagAlgorithm, TagConfig};

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::{bad_request, MultiError};
use crate::forge::{Capabilities, MergeMethod};
use crate::matcher::Matcher;
use crate::notify::MessageKind;
use crate::rx::Pattern;
use crate::scope::ApprovalScope;
use crate::snapshot::MaintainerFormat;

/// The approval phrase recognized by default, with optional version
/// and comment captures.
pub const DEFAULT_PATTERN: &str =
    r"(?i)^I approve\s*(version:\s*(?P<version>\S+))?\s*(comment:\s*(?P<comment>.*\S))?\s*";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub approvals: Vec<ApprovalPolicy>,
    #[serde(default = "default_pattern")]
    pub pattern: Pattern,
    #[serde(default, rename = "antipattern", skip_serializing_if = "Option::is_none")]
    pub anti_pattern: Option<Pattern>,
    #[serde(default, rename = "antititle", skip_serializing_if = "Option::is_none")]
    pub anti_title: Option<Pattern>,
    #[serde(default)]
    pub commit: CommitConfig,
    #[serde(default)]
    pub maintainers: MaintainersConfig,
    #[serde(default)]
    pub merge: MergeConfig,
    #[serde(default)]
    pub feedback: FeedbackConfig,
    #[serde(default)]
    pub tag: TagConfig,
    #[serde(default)]
    pub comment: CommentConfig,
    #[serde(default, rename = "deploy")]
    pub deploy: DeployConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    /// Set when the configuration was converted from a `.lgtm` file.
    #[serde(skip)]
    pub is_old: bool,
}

fn default_pattern() -> Pattern {
    Pattern::new(DEFAULT_PATTERN).unwrap()
}

impl Default for Config {
    fn default() -> Self {
        Config {
            approvals: Vec::new(),
            pattern: default_pattern(),
            anti_pattern: None,
            anti_title: None,
            commit: CommitConfig::default(),
            maintainers: MaintainersConfig::default(),
            merge: MergeConfig::default(),
            feedback: FeedbackConfig::default(),
            tag: TagConfig::default(),
            comment: CommentConfig::default(),
            deploy: DeployConfig::default(),
            audit: AuditConfig::default(),
            is_old: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitRange {
    All,
    Head,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitConfig {
    #[serde(default = "default_range")]
    pub range: CommitRange,
    #[serde(default = "default_range", rename = "antirange")]
    pub anti_range: CommitRange,
    #[serde(default = "default_range", rename = "tagrange")]
    pub tag_range: CommitRange,
    #[serde(default = "default_true", rename = "ignoreuimerge")]
    pub ignore_ui_merge: bool,
}

fn default_range() -> CommitRange {
    CommitRange::Head
}

fn default_true() -> bool {
    true
}

impl Default for CommitConfig {
    fn default() -> Self {
        CommitConfig {
            range: CommitRange::Head,
            anti_range: CommitRange::Head,
            tag_range: CommitRange::Head,
            ignore_ui_merge: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaintainersConfig {
    #[serde(default = "default_maintainers_path")]
    pub path: String,
    #[serde(default = "default_maintainers_format", rename = "type")]
    pub format: MaintainerFormat,
}

fn default_maintainers_path() -> String {
    "MAINTAINERS".to_string()
}

fn default_maintainers_format() -> MaintainerFormat {
    MaintainerFormat::Text
}

impl Default for MaintainersConfig {
    fn default() -> Self {
        MaintainersConfig {
            path: default_maintainers_path(),
            format: default_maintainers_format(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeConfig {
    #[serde(default)]
    pub enable: bool,
    #[serde(default, rename = "uptodate")]
    pub up_to_date: bool,
    #[serde(default = "default_merge_method")]
    pub method: MergeMethod,
    #[serde(default)]
    pub delete: bool,
}

fn default_merge_method() -> MergeMethod {
    MergeMethod::Merge
}

impl Default for MergeConfig {
    fn default() -> Self {
        MergeConfig {
            enable: false,
            up_to_date: false,
            method: MergeMethod::Merge,
            delete: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackType {
    Comment,
    Review,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackConfig {
    #[serde(default = "default_feedback_types")]
    pub types: Vec<FeedbackType>,
    /// Require the author to affirm review of commits they did not
    /// write once other approvals are in.
    #[serde(default, rename = "authoraffirm")]
    pub author_affirm: bool,
}

fn default_feedback_types() -> Vec<FeedbackType> {
    vec![FeedbackType::Comment, FeedbackType::Review]
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        FeedbackConfig {
            types: default_feedback_types(),
            author_affirm: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommentConfig {
    #[serde(default)]
    pub enable: bool,
    #[serde(default)]
    pub targets: Vec<TargetConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetConfig {
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<Pattern>,
    #[serde(default)]
    pub types: Vec<MessageKind>,
    #[serde(default)]
    pub names: Vec<String>,
    /// Resolved at request time, never read from the file.
    #[serde(skip)]
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeployConfig {
    #[serde(default)]
    pub enable: bool,
    #[serde(default = "default_deploy_path")]
    pub path: String,
    #[serde(skip)]
    pub deployment_map: DeploymentConfigs,
}

fn default_deploy_path() -> String {
    "DEPLOYMENTS".to_string()
}

impl Default for DeployConfig {
    fn default() -> Self {
        DeployConfig {
            enable: false,
            path: default_deploy_path(),
            deployment_map: DeploymentConfigs::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditConfig {
    #[serde(default)]
    pub enable: bool,
    #[serde(default)]
    pub branches: Vec<String>,
}

impl AuditConfig {
    pub fn covers(&self, branch: &str) -> bool {
        self.enable && self.branches.iter().any(|b| b == branch)
    }
}

/// A named approval rule plus optional overrides of the global
/// settings. Policies are matched in order by scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalPolicy {
    #[serde(default)]
    pub name: String,
    /// 1-based index in the approvals array, for messages.
    #[serde(skip)]
    pub position: usize,
    #[serde(default)]
    pub scope: ApprovalScope,
    #[serde(default = "Matcher::default_match", rename = "match")]
    pub matcher: Matcher,
    #[serde(default = "Matcher::default_match", rename = "antimatch")]
    pub anti_matcher: Matcher,
    #[serde(default = "Matcher::default_author_match", rename = "authormatch")]
    pub author_matcher: Matcher,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<TagConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge: Option<MergeConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<Pattern>,
    #[serde(default, rename = "antipattern", skip_serializing_if = "Option::is_none")]
    pub anti_pattern: Option<Pattern>,
    #[serde(default, rename = "antititle", skip_serializing_if = "Option::is_none")]
    pub anti_title: Option<Pattern>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<FeedbackConfig>,
}

impl Default for ApprovalPolicy {
    fn default() -> Self {
        ApprovalPolicy {
            name: String::new(),
            position: 0,
            scope: ApprovalScope::default(),
            matcher: Matcher::default_match(),
            anti_matcher: Matcher::default_match(),
            author_matcher: Matcher::default_author_match(),
            tag: None,
            merge: None,
            pattern: None,
            anti_pattern: None,
            anti_title: None,
            feedback: None,
        }
    }
}

impl Config {
    /// A configuration with a single default policy, used for legacy
    /// conversion.
    pub fn non_empty() -> Config {
        let mut config = Config::default();
        config.approvals = vec![ApprovalPolicy {
            position: 1,
            ..ApprovalPolicy::default()
        }];
        config
    }

    pub fn merge_config<'a>(&'a self, policy: &'a ApprovalPolicy) -> &'a MergeConfig {
        policy.merge.as_ref().unwrap_or(&self.merge)
    }

    pub fn tag_config<'a>(&'a self, policy: &'a ApprovalPolicy) -> &'a TagConfig {
        policy.tag.as_ref().unwrap_or(&self.tag)
    }

    pub fn feedback_config<'a>(&'a self, policy: &'a ApprovalPolicy) -> &'a FeedbackConfig {
        policy.feedback.as_ref().unwrap_or(&self.feedback)
    }

    pub fn pattern<'a>(&'a self, policy: &'a ApprovalPolicy) -> &'a Pattern {
        policy.pattern.as_ref().unwrap_or(&self.pattern)
    }

    pub fn anti_pattern<'a>(&'a self, policy: &'a ApprovalPolicy) -> Option<&'a Pattern> {
        policy.anti_pattern.as_ref().or(self.anti_pattern.as_ref())
    }

    pub fn anti_title<'a>(&'a self, policy: &'a ApprovalPolicy) -> Option<&'a Pattern> {
        policy.anti_title.as_ref().or(self.anti_title.as_ref())
    }

    pub fn load_deployment_map(&mut self, data: &str) -> anyhow::Result<()> {
        self.deploy.deployment_map = deploy::parse_deployment_map(data)?;
        Ok(())
    }

    pub fn validate(&self, caps: &Capabilities) -> anyhow::Result<()> {
        let mut errs = MultiError::new();
        validate_capabilities(self, caps, &mut errs);
        validate_approvals(&self.approvals, &mut errs);
        errs.into_result()
    }
}

/// Parses a `.pullgate` file, fills in defaults and validates.
pub fn parse_config(data: &str, caps: &Capabilities) -> anyhow::Result<Config> {
    let mut config: Config =
        deser_hjson::from_str(data).map_err(|err| bad_request(err.to_string()))?;
    config.tag.compile()?;
    for (i, policy) in config.approvals.iter_mut().enumerate() {
        setup_policy_defaults(i, policy);
    }
    config.validate(caps)?;
    Ok(config)
}

fn setup_policy_defaults(i: usize, policy: &mut ApprovalPolicy) {
    policy.position = i + 1;
    // `off` turns the policy into an unconditional pass with default
    // merge and tag behavior
    if policy.matcher == Matcher::Disable {
        if policy.merge.is_none() {
            policy.merge = Some(MergeConfig::default());
        }
        if policy.tag.is_none() {
            policy.tag = Some(TagConfig::default());
        }
        policy.anti_matcher = Matcher::False;
    }
}

fn validate_capabilities(config: &Config, caps: &Capabilities, errs: &mut MultiError) {
    let mut messages: BTreeSet<&'static str> = BTreeSet::new();
    if !caps.repo.commit_status {
        messages.insert("commit status OAuth scope is required");
    }
    let mut check_merge_tag = |merge: Option<&MergeConfig>, tag: Option<&TagConfig>| {
        if tag.is_some_and(|t| t.enable) && !caps.repo.tag {
            messages.insert("unable to git tag with provided OAuth scopes");
        }
        if merge.is_some_and(|m| m.enable) && !caps.repo.merge {
            messages.insert("unable to git merge with provided OAuth scopes");
        }
        if merge.is_some_and(|m| m.enable && m.delete) && !caps.repo.delete_branch {
            messages.insert("unable to delete branch with provided OAuth scopes");
        }
    };
    check_merge_tag(Some(&config.merge), Some(&config.tag));
    for policy in &config.approvals {
        check_merge_tag(policy.merge.as_ref(), policy.tag.as_ref());
    }
    if config.comment.enable {
        for target in &config.comment.targets {
            if target.target == "github" && !caps.repo.pr_write_comment {
                messages.insert("unable to add PR comment with provided OAuth scopes");
            }
        }
    }
    for message in messages {
        errs.push(bad_request(message));
    }
}

fn validate_approvals(approvals: &[ApprovalPolicy], errs: &mut MultiError) {
    let Some(last) = approvals.last() else {
        errs.push(bad_request("no approval policies specified"));
        return;
    };
    if !last.scope.is_universal() {
        errs.push(bad_request(
            "the final approval policy must have an unrestricted scope",
        ));
    }
    for policy in approvals {
        if let Some(tag) = &policy.tag {
            errs.push_result(tag.compile());
        }
        if !policy.scope.paths.is_empty() && !policy.scope.path_regexp.is_empty() {
            errs.push(bad_request("'paths' and 'regexpaths' cannot be used together"));
        }
        if !policy.scope.branches.is_empty() && !policy.scope.base_regexp.is_empty() {
            errs.push(bad_request("'branches' and 'regexbase' cannot be used together"));
        }
        if !policy.scope.nested.is_empty()
            && (!policy.scope.paths.is_empty() || !policy.scope.path_regexp.is_empty())
        {
            errs.push(bad_request(
                "nested scopes cannot be used with 'paths' or 'regexpaths'",
            ));
        }
    }
    let mut seen: BTreeSet<&str> = BTreeSet::new();
    let mut reported: BTreeSet<&str> = BTreeSet::new();
    for policy in approvals {
        if policy.name.is_empty() {
            continue;
        }
        if !seen.insert(&policy.name) && reported.insert(&policy.name) {
            errs.push(bad_request(format!(
                "the approval policy name '{}' is used more than once",
                policy.name
            )));
        }
    }
}
