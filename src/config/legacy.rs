//! Conversion of the deprecated `.lgtm` TOML format into a current
//! configuration.

use serde::Deserialize;

use crate::error::bad_request;
use crate::matcher::{Matcher, Quorum};
use crate::rx::Pattern;
use crate::snapshot::MaintainerFormat;

use super::{Config, DeployConfig, TagConfig};

const DEFAULT_APPROVALS: u32 = 2;
const DEFAULT_LGTM_PATTERN: &str = "(?i)LGTM";

#[derive(Debug, Deserialize)]
struct LegacyConfig {
    approvals: Option<u32>,
    pattern: Option<String>,
    self_approval_off: Option<bool>,
}

/// Parses a `.lgtm` file into a single-policy configuration. Team
/// scoping never existed in the old format, so the result always
/// matches the full maintainer set.
pub fn parse_legacy_config(data: &str) -> anyhow::Result<Config> {
    let legacy: LegacyConfig =
        ::toml::from_str(data).map_err(|err| bad_request(err.to_string()))?;
    let pattern = Pattern::new(
        legacy.pattern.as_deref().unwrap_or(DEFAULT_LGTM_PATTERN),
    )?;
    let mut config = Config::non_empty();
    config.pattern = pattern;
    config.approvals[0].matcher = Matcher::Maintainers(Quorum {
        count: legacy.approvals.unwrap_or(DEFAULT_APPROVALS),
        self_approval: !legacy.self_approval_off.unwrap_or(false),
    });
    config.tag = TagConfig {
        enable: false,
        ..TagConfig::default()
    };
    config.deploy = DeployConfig::default();
    config.is_old = true;
    config.maintainers.format = MaintainerFormat::Legacy;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_lgtm_settings_into_a_maintainer_quorum() {
        let config = parse_legacy_config(
            "approvals = 3\npattern = \"(?i)ship it\"\nself_approval_off = true\n",
        )
        .unwrap();
        assert_eq!(
            config.approvals[0].matcher,
            Matcher::Maintainers(Quorum { count: 3, self_approval: false })
        );
        assert!(config.pattern.is_match("Ship It"));
        assert!(config.is_old);
        assert_eq!(config.maintainers.format, MaintainerFormat::Legacy);
    }

    #[test]
    fn empty_file_uses_historical_defaults() {
        let config = parse_legacy_config("").unwrap();
        assert_eq!(
            config.approvals[0].matcher,
            Matcher::Maintainers(Quorum { count: 2, self_approval: true })
        );
        assert!(config.pattern.is_match("lgtm"));
    }

    #[test]
    fn bad_toml_is_rejected() {
        assert!(parse_legacy_config("approvals = [").is_err());
    }
}
