pub mod approval;
pub mod audit;
pub mod cache;
pub mod config;
pub mod ctx;
pub mod error;
pub mod feedback;
pub mod forge;
pub mod github;
pub mod glob;
pub mod matcher;
pub mod notify;
pub mod orchestrator;
pub mod router;
pub mod rx;
pub mod scope;
pub mod snapshot;
pub mod stats;
pub mod store;

#[cfg(test)]
pub(crate) mod test_utils;

pub const USER_AGENT: &str = "pullgate merge gate (https://github.com/pullgate/pullgate)";

/// Short name used in commit status contexts and user-facing strings.
pub const SERVICE_NAME: &str = "pullgate";

/// Branded name used in notification prose.
pub const SERVICE_TITLE: &str = "Pullgate";

/// Prefix on every comment the service writes, so the feedback
/// aggregator can filter its own comments out.
pub const COMMENT_PREFIX: &str = "Message from Pullgate --";

/// Commit status context for the audit chain, joined with the base
/// branch name as `audit/<base>`.
pub const AUDIT_CONTEXT: &str = "audit";
