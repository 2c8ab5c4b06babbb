//! The maintainer snapshot: a point-in-time resolution of the
//! MAINTAINERS file against the forge. Dialect parsers produce a raw
//! [`Maintainer`]; resolution expands group directives into people.

mod hjson;
mod text;
mod toml;

pub mod resolve;

use std::collections::BTreeSet;
use std::fmt;
use std::sync::OnceLock;

use anyhow::bail;
use indexmap::IndexMap;
use pullgate_data::{Login, Person, Repo};
use serde::{Deserialize, Serialize};

use crate::ctx::Ctx;
use crate::forge::Forge;

/// Sentinel resolving to the enclosing repository (or its owner).
pub const SELF_REPO: &str = "repo-self";

/// Group names claimed by the expression language.
pub const RESERVED_ORGS: &[&str] = &["all", "us", "them", "universe"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaintainerFormat {
    Text,
    Hjson,
    Toml,
    /// TOML if it parses, text otherwise. Used for `.lgtm` repos.
    Legacy,
}

impl std::str::FromStr for MaintainerFormat {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> anyhow::Result<Self> {
        Ok(match raw {
            "text" => MaintainerFormat::Text,
            "hjson" => MaintainerFormat::Hjson,
            "toml" => MaintainerFormat::Toml,
            "legacy" => MaintainerFormat::Legacy,
            other => bail!("unknown maintainers format '{other}'"),
        })
    }
}

impl fmt::Display for MaintainerFormat {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            MaintainerFormat::Text => "text",
            MaintainerFormat::Hjson => "hjson",
            MaintainerFormat::Toml => "toml",
            MaintainerFormat::Legacy => "legacy",
        };
        f.write_str(name)
    }
}

/// The MAINTAINERS file before group references are resolved.
/// `raw_org` members are directive strings like `github-team ops`.
#[derive(Debug, Default, Clone)]
pub struct Maintainer {
    pub raw_people: IndexMap<Login, Person>,
    pub raw_org: IndexMap<Login, OrgInput>,
}

#[derive(Debug, Default, Clone)]
pub struct OrgInput {
    pub people: BTreeSet<String>,
}

/// Parses the MAINTAINERS file in the configured dialect. The text
/// dialect may consult the forge to enumerate teams.
pub fn parse_maintainer(
    forge: &dyn Forge,
    ctx: &Ctx,
    data: &str,
    repo: &Repo,
    format: MaintainerFormat,
) -> anyhow::Result<Maintainer> {
    match format {
        MaintainerFormat::Text => text::parse(forge, ctx, data, repo),
        MaintainerFormat::Hjson => hjson::parse(data),
        MaintainerFormat::Toml => toml::parse(data),
        MaintainerFormat::Legacy => {
            toml::parse(data).or_else(|_| text::parse(forge, ctx, data, repo))
        }
    }
}

/// A resolved group. Most groups are expanded while the snapshot is
/// built; a group backed by a single team reference is resolved on
/// first use, and the outcome (success or failure) is kept.
pub struct Org {
    inner: OrgInner,
}

type OrgLoader = Box<dyn Fn() -> anyhow::Result<BTreeSet<Login>> + Send + Sync>;

enum OrgInner {
    Eager(BTreeSet<Login>),
    Lazy {
        cell: OnceLock<Result<BTreeSet<Login>, String>>,
        loader: OrgLoader,
    },
}

impl Org {
    pub fn eager(members: BTreeSet<Login>) -> Org {
        Org {
            inner: OrgInner::Eager(members),
        }
    }

    pub fn lazy(
        loader: impl Fn() -> anyhow::Result<BTreeSet<Login>> + Send + Sync + 'static,
    ) -> Org {
        Org {
            inner: OrgInner::Lazy {
                cell: OnceLock::new(),
                loader: Box::new(loader),
            },
        }
    }

    pub fn people(&self) -> anyhow::Result<&BTreeSet<Login>> {
        match &self.inner {
            OrgInner::Eager(members) => Ok(members),
            OrgInner::Lazy { cell, loader } => {
                let result = cell.get_or_init(|| loader().map_err(|err| format!("{err:#}")));
                match result {
                    Ok(members) => Ok(members),
                    Err(message) => bail!("{message}"),
                }
            }
        }
    }
}

impl fmt::Debug for Org {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.inner {
            OrgInner::Eager(members) => f.debug_tuple("Eager").field(members).finish(),
            OrgInner::Lazy { cell, .. } => f.debug_tuple("Lazy").field(&cell.get()).finish(),
        }
    }
}

/// The resolved MAINTAINERS file: people by login plus groups.
#[derive(Debug, Default)]
pub struct MaintainerSnapshot {
    pub people: IndexMap<Login, Person>,
    pub org: IndexMap<Login, Org>,
}

impl MaintainerSnapshot {
    /// The logins a named entity stands for: a group's membership, or
    /// the name itself when it is not a group.
    pub fn entity_members(&self, name: &Login) -> anyhow::Result<BTreeSet<Login>> {
        match self.org.get(name) {
            Some(org) => Ok(org.people()?.clone()),
            None => Ok(BTreeSet::from([name.clone()])),
        }
    }

    /// Everyone sharing a group with the given author. Empty when the
    /// author belongs to no group.
    pub fn author_org_members(&self, author: &Login) -> anyhow::Result<BTreeSet<Login>> {
        let mut members = BTreeSet::new();
        for org in self.org.values() {
            let people = org.people()?;
            if people.contains(author) {
                members.extend(people.iter().cloned());
            }
        }
        Ok(members)
    }

    /// Maps each known person to the set of groups they belong to.
    /// Members missing from the people table are skipped.
    pub fn person_to_org(&self) -> anyhow::Result<IndexMap<Login, BTreeSet<Login>>> {
        let mut mapping: IndexMap<Login, BTreeSet<Login>> = IndexMap::new();
        for (name, org) in &self.org {
            for member in org.people()? {
                if !self.people.contains_key(member) {
                    continue;
                }
                mapping.entry(member.clone()).or_default().insert(name.clone());
            }
        }
        Ok(mapping)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn logins(names: &[&str]) -> BTreeSet<Login> {
        names.iter().map(|n| Login::from(*n)).collect()
    }

    #[test]
    fn lazy_orgs_resolve_once_and_cache_failures() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let org = Org::lazy(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("team lookup failed");
        });
        assert!(org.people().is_err());
        assert!(org.people().is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn entity_members_falls_back_to_a_login() {
        let mut snapshot = MaintainerSnapshot::default();
        snapshot
            .org
            .insert(Login::from("core"), Org::eager(logins(&["alice", "bob"])));
        assert_eq!(
            snapshot.entity_members(&Login::from("core")).unwrap(),
            logins(&["alice", "bob"])
        );
        assert_eq!(
            snapshot.entity_members(&Login::from("mallory")).unwrap(),
            logins(&["mallory"])
        );
    }

    #[test]
    fn person_to_org_skips_unknown_members() {
        let mut snapshot = MaintainerSnapshot::default();
        snapshot
            .people
            .insert(Login::from("alice"), Person::default());
        snapshot
            .org
            .insert(Login::from("core"), Org::eager(logins(&["alice", "ghost"])));
        let mapping = snapshot.person_to_org().unwrap();
        assert_eq!(mapping.len(), 1);
        assert_eq!(mapping[&Login::from("alice")], logins(&["core"]));
    }
}
