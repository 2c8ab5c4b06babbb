//! The TOML MAINTAINERS dialect: `[people.<login>]` tables and
//! `[org.<name>] people = [...]` arrays. Shares the raw shape and
//! validation with the HJSON dialect.

use super::{hjson, Maintainer};

pub(super) fn parse(data: &str) -> anyhow::Result<Maintainer> {
    hjson::parse_toml(data)
}
