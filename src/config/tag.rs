//! Tagging configuration. The template is a text expansion over
//! `{Version}` whose result must be a valid git ref, with stricter
//! rules when docker compatibility is requested.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::bad_request;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TagAlgorithm {
    Semver,
    Explicit,
    TimestampRfc3339,
    TimestampMillis,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SemverIncrement {
    Major,
    Minor,
    Patch,
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagConfig {
    #[serde(default)]
    pub enable: bool,
    #[serde(default = "default_algorithm")]
    pub algorithm: TagAlgorithm,
    #[serde(default = "default_template")]
    pub template: String,
    #[serde(default)]
    pub docker: bool,
    #[serde(default = "default_increment")]
    pub increment: SemverIncrement,
}

fn default_algorithm() -> TagAlgorithm {
    TagAlgorithm::Semver
}

fn default_template() -> String {
    "{Version}".to_string()
}

fn default_increment() -> SemverIncrement {
    SemverIncrement::Patch
}

impl Default for TagConfig {
    fn default() -> Self {
        TagConfig {
            enable: false,
            algorithm: default_algorithm(),
            template: default_template(),
            docker: false,
            increment: default_increment(),
        }
    }
}

fn illegal_ref_chars() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[[:cntrl:]]|[ ~^:?*\\\[]").unwrap())
}

fn docker_tag() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_.\-]+$").unwrap())
}

impl TagConfig {
    pub fn expand(&self, version: &str) -> String {
        self.template.replace("{Version}", version)
    }

    /// Checks the template against ref naming rules using a sample
    /// version.
    pub fn compile(&self) -> anyhow::Result<()> {
        let sample = self.expand("1.0.0");
        if self.docker && !docker_tag().is_match(&sample) {
            return Err(bad_request(format!(
                "illegal template tag {} with docker validation enabled: \
                 only [A-Za-z0-9_.-] characters are allowed",
                self.template
            )));
        }
        if let Some(ill) = illegal_ref_chars().find(&sample) {
            return Err(bad_request(format!(
                "illegal template tag {}: cannot contain the character {:?}; \
                 ASCII control characters, space, tilde, caret, colon, \
                 question mark, asterisk, open bracket and backslash are \
                 not allowed",
                self.template,
                ill.as_str()
            )));
        }
        Ok(())
    }
}
